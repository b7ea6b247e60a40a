use clap::Subcommand;
use useraccess_core::lifecycle::reconcile;
use useraccess_core::{Clock, Config, Database};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "access.duration_days", "welcome.enabled")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Reset config to defaults
    Reset,
}

pub fn run(action: ConfigAction, _clock: &dyn Clock) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            let before = config.access.duration_days;
            config.set(&key, &value)?;
            config.save()?;
            if config.access.duration_days != before {
                let summary = reconcile(&Database::open()?, &config)?;
                println!("expiry dates updated: {}", summary.expiry_updated);
            }
            println!("ok");
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        ConfigAction::Reset => {
            let before = Config::load_or_default().access.duration_days;
            let config = Config::default();
            config.save()?;
            if config.access.duration_days != before {
                reconcile(&Database::open()?, &config)?;
            }
            println!("config reset to defaults");
        }
    }
    Ok(())
}
