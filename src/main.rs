use anyhow::Result;
use clap::Parser;
use gpgsm_engine::{keylist, Config, Engine, SharedPollLoop};

/// List keys matching the given pattern (or all keys if empty), printing
/// each status event and colon-data record to stdout. A small smoke-test
/// harness for the engine adapter, not a full S/MIME client.
fn main() -> Result<()> {
    let config = Config::parse();
    let engine = Engine::new(config)?;

    let pattern = std::env::args().nth(1).unwrap_or_default();

    let loop_ = SharedPollLoop::new();
    let mut session = engine.open_session(Box::new(loop_.clone()))?;

    session.set_status_handler(|code, rest| {
        println!("status: {:?} {}", code, rest);
    });
    session.set_colon_handler(|record| {
        println!("data: {}", String::from_utf8_lossy(record));
    });

    keylist(&mut session, &pattern, false, 0)?;
    session.start()?;
    loop_.run_until_done()?;

    Ok(())
}
