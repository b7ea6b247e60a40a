//! Metadata lifecycle: registration, install-time backfill, maintenance,
//! integrity audit and the administrator's profile field.
//!
//! `registered_at` on the account is the source of truth. The
//! `registered_date` meta is a denormalized copy that nothing reads as authoritative;
//! [`reconcile`] repairs it and [`audit`] reports when it drifts.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::clock::format_timestamp;
use crate::error::{AccessError, CoreError, Result};
use crate::policy::{compute_expiry, valid_duration};
use crate::schedule::{self, ScheduleState};
use crate::storage::{Config, UserDirectory};
use crate::user::{AccessFlag, MetaKey, NewUser, ProfileView, UserAccount};

/// Values a fresh account starts with.
fn initial_values(config: &Config, user: &UserAccount) -> [(MetaKey, String); 5] {
    if valid_duration(config.access.duration_days).is_none() {
        tracing::warn!(
            user_id = user.id,
            duration_days = config.access.duration_days,
            "invalid access duration; expiry set to registration time"
        );
    }
    let expire_at = compute_expiry(user.registered_at, config.access.duration_days);
    [
        (MetaKey::AccessExpired, AccessFlag::Allowed.as_meta().to_string()),
        (MetaKey::ExpireDate, format_timestamp(expire_at)),
        (MetaKey::RegisteredDate, format_timestamp(user.registered_at)),
        (MetaKey::ExpireNotified, "0".to_string()),
        (MetaKey::WelcomeNotified, "0".to_string()),
    ]
}

/// Create an account in the directory and initialize its metadata.
pub fn register_user(
    dir: &dyn UserDirectory,
    config: &Config,
    new_user: &NewUser,
) -> Result<UserAccount> {
    let user = dir.insert_user(new_user)?;
    initialize(dir, config, &user)?;
    Ok(user)
}

/// First-time initialization: writes all five keys, markers at zero.
pub fn initialize(dir: &dyn UserDirectory, config: &Config, user: &UserAccount) -> Result<()> {
    for (key, value) in initial_values(config, user) {
        dir.set_meta(user.id, key, &value)?;
    }
    tracing::info!(user_id = user.id, login = %user.login, "access metadata initialized");
    Ok(())
}

/// Add whichever keys are missing; present values are never touched.
/// Returns the number of keys written.
pub fn backfill(dir: &dyn UserDirectory, config: &Config, user: &UserAccount) -> Result<usize> {
    let mut added = 0;
    for (key, value) in initial_values(config, user) {
        if dir.add_meta(user.id, key, &value)? {
            added += 1;
        }
    }
    if added > 0 {
        tracing::info!(user_id = user.id, keys = added, "access metadata backfilled");
    }
    Ok(added)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationSummary {
    pub users_scanned: usize,
    pub users_backfilled: usize,
    pub keys_added: usize,
    pub schedule: ScheduleState,
}

/// Install/upgrade hook: backfill every account and register the batch run.
pub fn activate(
    dir: &dyn UserDirectory,
    config: &Config,
    now: NaiveDateTime,
) -> Result<ActivationSummary> {
    config.validate()?;

    let users = dir.users()?;
    let mut users_backfilled = 0;
    let mut keys_added = 0;
    for user in &users {
        let added = backfill(dir, config, user)?;
        if added > 0 {
            users_backfilled += 1;
            keys_added += added;
        }
    }

    let schedule = schedule::register(dir, config.schedule.recurrence, now)?;
    Ok(ActivationSummary {
        users_scanned: users.len(),
        users_backfilled,
        keys_added,
        schedule,
    })
}

/// Uninstall hook: cancel the batch run. Metadata stays in place.
pub fn deactivate(dir: &dyn UserDirectory) -> Result<bool> {
    Ok(schedule::cancel(dir)?)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub expiry_updated: usize,
    pub registered_copy_repaired: usize,
}

/// Maintenance routine: rederive `expire_date` (and the registered-date
/// copy) from `registered_at` with the current duration.
///
/// Only the raw values of those two keys are read, so a corrupt value
/// elsewhere in a user's metadata does not stop the pass. Access flags and
/// notification markers are left alone.
pub fn reconcile(dir: &dyn UserDirectory, config: &Config) -> Result<ReconcileSummary> {
    config.validate()?;

    let mut summary = ReconcileSummary::default();
    for user in dir.users()? {
        let canonical = format_timestamp(user.registered_at);

        if let Some(cached) = dir.meta(user.id, MetaKey::RegisteredDate)? {
            if cached != canonical {
                dir.set_meta(user.id, MetaKey::RegisteredDate, &canonical)?;
                summary.registered_copy_repaired += 1;
                tracing::warn!(user_id = user.id, cached = %cached, "repaired registered date copy");
            }
        }

        if let Some(stored) = dir.meta(user.id, MetaKey::ExpireDate)? {
            let expected =
                format_timestamp(compute_expiry(user.registered_at, config.access.duration_days));
            if stored != expected {
                dir.set_meta(user.id, MetaKey::ExpireDate, &expected)?;
                summary.expiry_updated += 1;
            }
        }
    }

    tracing::info!(
        expiry_updated = summary.expiry_updated,
        registered_copy_repaired = summary.registered_copy_repaired,
        "maintenance finished"
    );
    Ok(summary)
}

/// A data-integrity finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    MissingMetadata {
        user_id: i64,
        login: String,
        keys: Vec<String>,
    },
    RegisteredCopyDiverges {
        user_id: i64,
        login: String,
        canonical: String,
        cached: String,
    },
    ExpiryMismatch {
        user_id: i64,
        login: String,
        stored: String,
        expected: String,
    },
    Unreadable {
        user_id: i64,
        login: String,
        error: String,
    },
}

/// Report integrity problems without changing anything.
pub fn audit(dir: &dyn UserDirectory, config: &Config) -> Result<Vec<IntegrityIssue>> {
    let mut issues = Vec::new();
    for user in dir.users()? {
        let record = match dir.access_record(user.id) {
            Ok(record) => record,
            Err(e) => {
                issues.push(IntegrityIssue::Unreadable {
                    user_id: user.id,
                    login: user.login.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let missing = record.missing_keys();
        if !missing.is_empty() {
            issues.push(IntegrityIssue::MissingMetadata {
                user_id: user.id,
                login: user.login.clone(),
                keys: missing.iter().map(|k| k.as_str().to_string()).collect(),
            });
        }

        if let Some(cached) = record.registered_at.filter(|c| *c != user.registered_at) {
            issues.push(IntegrityIssue::RegisteredCopyDiverges {
                user_id: user.id,
                login: user.login.clone(),
                canonical: format_timestamp(user.registered_at),
                cached: format_timestamp(cached),
            });
        }

        let expected = compute_expiry(user.registered_at, config.access.duration_days);
        if let Some(stored) = record.expire_at.filter(|s| *s != expected) {
            issues.push(IntegrityIssue::ExpiryMismatch {
                user_id: user.id,
                login: user.login.clone(),
                stored: format_timestamp(stored),
                expected: format_timestamp(expected),
            });
        }
    }
    Ok(issues)
}

/// Registration date and access state for the profile page.
pub fn profile(dir: &dyn UserDirectory, user_id: i64) -> Result<ProfileView> {
    let user = dir
        .user(user_id)?
        .ok_or_else(|| AccessError::UnknownUser(user_id.to_string()))?;
    let access = dir.access_record(user.id)?;
    Ok(ProfileView { user, access })
}

/// The profile field's write path. Only administrators may write; this is
/// the only way a denied account becomes allowed again.
pub fn set_access(
    dir: &dyn UserDirectory,
    actor: &UserAccount,
    user_id: i64,
    flag: AccessFlag,
) -> Result<()> {
    if !actor.role.can_manage_options() {
        tracing::warn!(actor = %actor.login, user_id, "rejected access change by non-administrator");
        return Err(CoreError::Access(AccessError::NotPermitted { user_id }));
    }
    if dir.user(user_id)?.is_none() {
        return Err(AccessError::UnknownUser(user_id.to_string()).into());
    }
    dir.set_meta(user_id, MetaKey::AccessExpired, flag.as_meta())?;
    tracing::info!(actor = %actor.login, user_id, flag = ?flag, "access changed by administrator");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_timestamp;
    use crate::storage::Database;
    use crate::user::{AccessRecord, Role};

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn new_user(login: &str, role: Role, registered: &str) -> NewUser {
        NewUser {
            login: login.into(),
            email: format!("{login}@example.com"),
            role,
            registered_at: ts(registered),
        }
    }

    #[test]
    fn registration_initializes_all_keys() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        let user =
            register_user(&db, &config, &new_user("ana", Role::Subscriber, "2024-01-01 00:00:00"))
                .unwrap();
        let record = db.access_record(user.id).unwrap();
        assert_eq!(
            record,
            AccessRecord {
                access_flag: Some(AccessFlag::Allowed),
                expire_at: Some(ts("2024-01-31 00:00:00")),
                registered_at: Some(ts("2024-01-01 00:00:00")),
                expire_notified_count: Some(0),
                welcome_notified_count: Some(0),
            }
        );
    }

    #[test]
    fn backfill_keeps_existing_values() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        let user = db
            .insert_user(&new_user("old", Role::Subscriber, "2023-05-01 00:00:00"))
            .unwrap();
        db.set_meta(user.id, MetaKey::AccessExpired, "true").unwrap();
        db.set_meta(user.id, MetaKey::ExpireNotified, "1").unwrap();

        assert_eq!(backfill(&db, &config, &user).unwrap(), 3);
        assert_eq!(backfill(&db, &config, &user).unwrap(), 0);

        let record = db.access_record(user.id).unwrap();
        assert_eq!(record.access_flag, Some(AccessFlag::Denied));
        assert_eq!(record.expire_notified_count, Some(1));
        assert_eq!(record.welcome_notified_count, Some(0));
        assert_eq!(record.expire_at, Some(ts("2023-05-31 00:00:00")));
    }

    #[test]
    fn activation_backfills_and_schedules() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        db.insert_user(&new_user("a", Role::Subscriber, "2023-05-01 00:00:00"))
            .unwrap();
        register_user(&db, &config, &new_user("b", Role::Subscriber, "2023-06-01 00:00:00"))
            .unwrap();

        let summary = activate(&db, &config, ts("2024-01-01 00:00:00")).unwrap();
        assert_eq!(summary.users_scanned, 2);
        assert_eq!(summary.users_backfilled, 1);
        assert_eq!(summary.keys_added, 5);
        assert_eq!(summary.schedule.next_run, ts("2024-01-01 00:00:00"));

        let again = activate(&db, &config, ts("2024-01-02 00:00:00")).unwrap();
        assert_eq!(again.users_backfilled, 0);
        assert_eq!(again.schedule.next_run, ts("2024-01-01 00:00:00"));

        assert!(deactivate(&db).unwrap());
        assert!(schedule::state(&db).unwrap().is_none());
    }

    #[test]
    fn activation_refuses_invalid_config() {
        let db = Database::open_memory().unwrap();
        let mut config = Config::default();
        config.access.duration_days = 0;
        assert!(matches!(
            activate(&db, &config, ts("2024-01-01 00:00:00")),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn reconcile_follows_new_duration() {
        let db = Database::open_memory().unwrap();
        let mut config = Config::default();
        let user =
            register_user(&db, &config, &new_user("ana", Role::Subscriber, "2024-01-01 00:00:00"))
                .unwrap();
        db.set_meta(user.id, MetaKey::AccessExpired, "true").unwrap();
        db.set_meta(user.id, MetaKey::ExpireNotified, "1").unwrap();

        config.access.duration_days = 60;
        let summary = reconcile(&db, &config).unwrap();
        assert_eq!(summary.expiry_updated, 1);

        let record = db.access_record(user.id).unwrap();
        assert_eq!(record.expire_at, Some(ts("2024-03-01 00:00:00")));
        assert_eq!(record.access_flag, Some(AccessFlag::Denied));
        assert_eq!(record.expire_notified_count, Some(1));

        assert_eq!(reconcile(&db, &config).unwrap(), ReconcileSummary::default());
    }

    #[test]
    fn reconcile_continues_past_corrupt_metadata() {
        let db = Database::open_memory().unwrap();
        let mut config = Config::default();
        let a =
            register_user(&db, &config, &new_user("a", Role::Subscriber, "2024-01-01 00:00:00"))
                .unwrap();
        let b =
            register_user(&db, &config, &new_user("b", Role::Subscriber, "2024-01-02 00:00:00"))
                .unwrap();
        db.set_meta(a.id, MetaKey::WelcomeNotified, "lots").unwrap();

        config.access.duration_days = 60;
        let summary = reconcile(&db, &config).unwrap();
        assert_eq!(summary.expiry_updated, 2);

        assert_eq!(
            db.meta(a.id, MetaKey::ExpireDate).unwrap().as_deref(),
            Some("2024-03-01 00:00:00")
        );
        assert_eq!(
            db.access_record(b.id).unwrap().expire_at,
            Some(ts("2024-03-02 00:00:00"))
        );
        assert_eq!(
            db.meta(a.id, MetaKey::WelcomeNotified).unwrap().as_deref(),
            Some("lots")
        );
    }

    #[test]
    fn audit_flags_divergence_and_missing_keys() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        let ana =
            register_user(&db, &config, &new_user("ana", Role::Subscriber, "2024-01-01 00:00:00"))
                .unwrap();
        db.insert_user(&new_user("legacy", Role::Subscriber, "2023-01-01 00:00:00"))
            .unwrap();
        db.set_meta(ana.id, MetaKey::RegisteredDate, "2024-02-01 00:00:00").unwrap();

        let issues = audit(&db, &config).unwrap();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| matches!(
            i,
            IntegrityIssue::RegisteredCopyDiverges { login, .. } if login == "ana"
        )));
        assert!(issues.iter().any(|i| matches!(
            i,
            IntegrityIssue::MissingMetadata { login, keys, .. } if login == "legacy" && keys.len() == 5
        )));

        let repaired = reconcile(&db, &config).unwrap();
        assert_eq!(repaired.registered_copy_repaired, 1);
    }

    #[test]
    fn only_administrators_change_access() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        let admin = register_user(
            &db,
            &config,
            &new_user("root", Role::Administrator, "2023-01-01 00:00:00"),
        )
        .unwrap();
        let ana =
            register_user(&db, &config, &new_user("ana", Role::Subscriber, "2024-01-01 00:00:00"))
                .unwrap();
        db.set_meta(ana.id, MetaKey::AccessExpired, "true").unwrap();

        let err = set_access(&db, &ana, ana.id, AccessFlag::Allowed).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Access(AccessError::NotPermitted { .. })
        ));
        assert!(!profile(&db, ana.id).unwrap().has_access());

        set_access(&db, &admin, ana.id, AccessFlag::Allowed).unwrap();
        let view = profile(&db, ana.id).unwrap();
        assert!(view.has_access());
        assert_eq!(view.membership_since(), "2024-01-01 00:00:00");
    }

    #[test]
    fn profile_of_unknown_user_fails() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            profile(&db, 99),
            Err(CoreError::Access(AccessError::UnknownUser(_)))
        ));
    }
}
