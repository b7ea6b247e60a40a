pub mod config;
pub mod cron;
pub mod login;
pub mod plugin;
pub mod user;

use useraccess_core::clock::parse_timestamp;
use useraccess_core::{Clock, FixedClock, SystemClock};

/// System clock, or a fixed one when `--now` is given.
pub fn clock(now: Option<&str>) -> Result<Box<dyn Clock>, Box<dyn std::error::Error>> {
    match now {
        Some(raw) => {
            let ts = parse_timestamp(raw)
                .ok_or_else(|| format!("invalid --now value '{raw}', expected YYYY-MM-DD HH:MM:SS"))?;
            Ok(Box::new(FixedClock(ts)))
        }
        None => Ok(Box::new(SystemClock)),
    }
}
