use clap::Subcommand;
use useraccess_core::notify::transport;
use useraccess_core::{run_batch, schedule, tick, BatchReport, Clock, Config, Database};

#[derive(Subcommand)]
pub enum CronAction {
    /// Run the notification batch now, ignoring the schedule
    Run {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the batch only if the registered schedule is due
    Tick {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the registered schedule
    Status,
}

fn print_report(report: &BatchReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

/// A fatal delivery failure is reported once, after the report itself.
fn finish(report: &BatchReport) -> Result<(), Box<dyn std::error::Error>> {
    match report.fatal() {
        Some(reason) => Err(format!("batch run aborted: {reason}").into()),
        None => Ok(()),
    }
}

pub fn run(action: CronAction, clock: &dyn Clock) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        CronAction::Run { json } => {
            let config = Config::load()?;
            let transport = transport::from_config(&config)?;
            let report = run_batch(&db, &config, transport.as_ref(), clock.now())?;
            print_report(&report, json)?;
            finish(&report)?;
        }
        CronAction::Tick { json } => {
            let config = Config::load()?;
            let transport = transport::from_config(&config)?;
            match tick(&db, &config, transport.as_ref(), clock.now())? {
                Some(report) => {
                    print_report(&report, json)?;
                    finish(&report)?;
                }
                None => println!("nothing due"),
            }
        }
        CronAction::Status => match schedule::state(&db)? {
            Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
            None => println!("no schedule registered"),
        },
    }
    Ok(())
}
