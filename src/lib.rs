#![deny(missing_docs)]

//! Engine adapter driving an external S/MIME helper process over the
//! assuan-style line protocol, exposing decrypt / encrypt / sign / verify /
//! import / genkey / keylist operations as a small session API.

mod channel;
mod colon;
mod config;
mod data;
mod error;
mod host_loop;
mod io_cbs;
mod ops;
mod protocol;
mod session;
mod status;
#[cfg(test)]
mod test_support;

pub use channel::{ChannelKind, Direction};
pub use config::{Config, ConfigBuilder};
pub use data::{Consumer, DataHandle, Encoding, Mode, Producer};
pub use error::{EngineError, ErrorKind, Result};
pub use host_loop::{PollLoop, SharedPollLoop};
pub use io_cbs::{Event, IoCallbacks, IoHandler, Tag};
pub use ops::{
    decrypt, delete, encrypt, export, genkey, import, keylist, keylist_ext, percent_encode_pattern,
    sign, trustlist, verify,
};
pub use session::{LifecycleState, Session};
pub use status::StatusCode;

use anyhow::Context as _;
use env_logger::fmt::Color;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Top-level entry point bundling a validated [`Config`] with the helper
/// path and defaults it carries; the thin equivalent of the surrounding
/// library context this adapter slots into, out of scope for the core
/// proper.
#[derive(Debug, Default)]
pub struct Engine {
    config: Config,
}

impl Engine {
    /// Build an `Engine` from a parsed [`Config`], validating it and
    /// initializing logging.
    pub fn new(mut config: Config) -> anyhow::Result<Self> {
        init_logging(config.log_level()).context("init logging")?;
        config.validate().context("validate config")?;
        Ok(Self { config })
    }

    /// Spawn a fresh [`Session`] against this engine's configured helper.
    pub fn open_session(&self, io_cbs: Box<dyn IoCallbacks>) -> Result<Session> {
        Session::new(self.config.helper_path(), io_cbs)
    }

    /// The validated configuration this engine was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Initialize the logger and set the verbosity to the provided level.
///
/// Format: `[YYYY-MM-DDTHH:MM:SS:MMMZ LEVEL crate::module file:LINE] MSG…`.
/// The file and line are only printed at debug level or more verbose.
fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
    env::set_var("RUST_LOG", level.to_string());
    env_logger::builder()
        .format(move |buf, r| {
            let mut style = buf.style();
            style.set_color(Color::Black).set_intense(true);
            writeln!(
                buf,
                "{}{} {:<5} {}{}{} {}",
                style.value("["),
                buf.timestamp_millis(),
                buf.default_styled_level(r.level()),
                r.target(),
                match (level >= LevelFilter::Debug, r.file(), r.line()) {
                    (true, Some(file), Some(line)) => format!(" {}:{}", file, line),
                    _ => "".into(),
                },
                style.value("]"),
                r.args()
            )
        })
        .try_init()
        .context("init env logger")
}
