use useraccess_core::{AccessError, AccessGate, Clock, Config, Database};

/// Exit code for a login the gate denied.
const EXIT_DENIED: i32 = 2;

pub fn run(login: &str, clock: &dyn Clock) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unreadable configuration; denying non-administrators");
        let mut config = Config::default();
        config.access.duration_days = 0;
        config
    });
    let gate = AccessGate::new(&db, &config, clock);

    match gate.check_login(login) {
        Ok(user) => {
            println!("access granted: {}", user.login);
            Ok(())
        }
        Err(e @ AccessError::UnknownUser(_)) => Err(e.into()),
        Err(e) => {
            eprintln!("access denied: {e}");
            std::process::exit(EXIT_DENIED);
        }
    }
}
