//! User directory commands for CLI.
//!
//! `add` stands in for the host's registration event; `access` is the
//! profile field an administrator flips.

use clap::{Subcommand, ValueEnum};
use useraccess_core::clock::parse_timestamp;
use useraccess_core::lifecycle::{audit, profile, register_user, set_access};
use useraccess_core::{
    AccessError, AccessFlag, Clock, Config, Database, NewUser, Role, UserAccount, UserDirectory,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum AccessArg {
    Allow,
    Deny,
}

#[derive(Subcommand)]
pub enum UserAction {
    /// Register a new user
    Add {
        /// Login name
        login: String,
        /// Email address
        email: String,
        /// Give the user the administrator role
        #[arg(long)]
        admin: bool,
        /// Registration time (defaults to now)
        #[arg(long)]
        registered: Option<String>,
    },
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a user's registration date and access state
    Show {
        /// Login name
        login: String,
    },
    /// Change a user's access (administrators only)
    Access {
        /// Login name of the user to change
        login: String,
        /// New access state
        #[arg(value_enum)]
        state: AccessArg,
        /// Login name of the administrator making the change
        #[arg(long = "as")]
        actor: String,
    },
    /// Report data-integrity problems in access metadata
    Audit {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn lookup(db: &Database, login: &str) -> Result<UserAccount, Box<dyn std::error::Error>> {
    db.user_by_login(login)?
        .ok_or_else(|| AccessError::UnknownUser(login.to_string()).into())
}

pub fn run(action: UserAction, clock: &dyn Clock) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        UserAction::Add {
            login,
            email,
            admin,
            registered,
        } => {
            let registered_at = match registered {
                Some(raw) => parse_timestamp(&raw)
                    .ok_or_else(|| format!("invalid registration time '{raw}'"))?,
                None => clock.now(),
            };
            let config = Config::load()?;
            let user = register_user(
                &db,
                &config,
                &NewUser {
                    login,
                    email,
                    role: if admin {
                        Role::Administrator
                    } else {
                        Role::Subscriber
                    },
                    registered_at,
                },
            )?;
            println!("User registered: {} (id {})", user.login, user.id);
        }
        UserAction::List { json } => {
            let users = db.users()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else {
                for user in users {
                    let view = profile(&db, user.id)?;
                    let state = match view.access.access_flag {
                        Some(AccessFlag::Allowed) => "allowed",
                        Some(AccessFlag::Denied) => "denied",
                        None => "uninitialized",
                    };
                    println!(
                        "{:>4}  {:<20} {:<13} {}  {}",
                        user.id,
                        user.login,
                        user.role.as_str(),
                        view.membership_since(),
                        state
                    );
                }
            }
        }
        UserAction::Show { login } => {
            let user = lookup(&db, &login)?;
            let view = profile(&db, user.id)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        UserAction::Access {
            login,
            state,
            actor,
        } => {
            let actor = lookup(&db, &actor)?;
            let user = lookup(&db, &login)?;
            let flag = match state {
                AccessArg::Allow => AccessFlag::Allowed,
                AccessArg::Deny => AccessFlag::Denied,
            };
            set_access(&db, &actor, user.id, flag)?;
            println!("ok");
        }
        UserAction::Audit { json } => {
            let config = Config::load()?;
            let issues = audit(&db, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&issues)?);
            } else if issues.is_empty() {
                println!("no integrity issues");
            } else {
                for issue in &issues {
                    println!("{}", serde_json::to_string(issue)?);
                }
            }
        }
    }
    Ok(())
}
