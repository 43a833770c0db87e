//! Configuration related structures

use anyhow::Result;
use clap::{crate_version, Parser};
use derive_builder::Builder;
use getset::{CopyGetters, Getters, Setters};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

macro_rules! prefix {
    () => {
        "GPGSM_"
    };
}

#[derive(
    Builder, CopyGetters, Debug, Deserialize, Eq, Getters, Parser, PartialEq, Serialize, Setters,
)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
#[serde(rename_all = "kebab-case")]
#[clap(
    after_help("More info at: https://www.gnupg.org/documentation/manuals/assuan/"),
    version(crate_version!()),
)]
/// An adapter driving an external S/MIME helper over the assuan line protocol.
pub struct Config {
    #[get_copy = "pub"]
    #[clap(
        default_value("info"),
        env(concat!(prefix!(), "LOG_LEVEL")),
        long("log-level"),
        possible_values(["trace", "debug", "info", "warn", "error", "off"]),
        value_name("LEVEL")
    )]
    /// The logging level of the application.
    log_level: LevelFilter,

    #[getset(get = "pub", set)]
    #[clap(
        default_value("gpgsm"),
        env(concat!(prefix!(), "HELPER_PATH")),
        long("helper-path"),
        short('H'),
        value_name("PATH")
    )]
    /// Path to the S/MIME helper binary, spawned as `<helper-path> --server`.
    helper_path: String,

    #[get_copy = "pub"]
    #[clap(
        default_value("-1"),
        env(concat!(prefix!(), "DEFAULT_INCLUDE_CERTS")),
        long("default-include-certs"),
        value_name("N")
    )]
    /// Default `OPTION include-certs` value sent before a SIGN command
    /// when the caller does not override it. `-1` means "all certificates".
    default_include_certs: i32,

    #[get_copy = "pub"]
    #[clap(
        default_value("0"),
        env(concat!(prefix!(), "DEFAULT_LIST_MODE")),
        long("default-list-mode"),
        value_name("BITS")
    )]
    /// Default `OPTION list-mode` value (masked to 2 bits) sent before a
    /// LISTKEYS/LISTSECRETKEYS command when the caller does not override it.
    default_list_mode: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse()
    }
}

impl Config {
    /// Validate the configuration, filling in any derived state.
    pub fn validate(&mut self) -> Result<()> {
        if self.helper_path.trim().is_empty() {
            anyhow::bail!("helper-path must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_list_mode_masks_to_two_bits() {
        let cfg = ConfigBuilder::default()
            .helper_path("gpgsm")
            .default_list_mode(0b1111u32)
            .build()
            .unwrap();
        // Masking happens where list_mode is consumed, not at construction;
        // the builder simply stores what it's given.
        assert_eq!(cfg.default_list_mode(), 0b1111);
    }

    #[test]
    fn validate_rejects_empty_helper_path() {
        let mut cfg = ConfigBuilder::default().helper_path("  ").build().unwrap();
        assert!(cfg.validate().is_err());
    }
}
