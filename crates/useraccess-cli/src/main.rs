use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "useraccess-cli", version, about = "User access expiration CLI")]
struct Cli {
    /// Pin the clock, e.g. "2024-02-01 00:00:00"
    #[arg(long, global = true)]
    now: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Settings management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// User directory and profile access field
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Run the access gate for a login
    Login {
        /// Login name
        login: String,
    },
    /// Install, uninstall and maintenance hooks
    Plugin {
        #[command(subcommand)]
        action: commands::plugin::PluginAction,
    },
    /// Scheduled notification runs
    Cron {
        #[command(subcommand)]
        action: commands::cron::CronAction,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let clock = match commands::clock(cli.now.as_deref()) {
        Ok(clock) => clock,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action, clock.as_ref()),
        Commands::User { action } => commands::user::run(action, clock.as_ref()),
        Commands::Login { login } => commands::login::run(&login, clock.as_ref()),
        Commands::Plugin { action } => commands::plugin::run(action, clock.as_ref()),
        Commands::Cron { action } => commands::cron::run(action, clock.as_ref()),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
