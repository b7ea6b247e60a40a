use clap::Subcommand;
use useraccess_core::lifecycle::{activate, deactivate, reconcile};
use useraccess_core::{Clock, Config, Database};

#[derive(Subcommand)]
pub enum PluginAction {
    /// Install/upgrade: write default settings, backfill users, schedule runs
    Activate,
    /// Uninstall: cancel scheduled runs
    Deactivate,
    /// Recompute expiry dates from registration times
    Maintain,
}

pub fn run(action: PluginAction, clock: &dyn Clock) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        PluginAction::Activate => {
            // Writes the defaults on first install.
            let config = Config::load()?;
            let summary = activate(&db, &config, clock.now())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        PluginAction::Deactivate => {
            if deactivate(&db)? {
                println!("schedule cancelled");
            } else {
                println!("no schedule registered");
            }
        }
        PluginAction::Maintain => {
            let config = Config::load()?;
            let summary = reconcile(&db, &config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
