//! Due-user selection for the two notification kinds.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::clock::format_timestamp;
use crate::error::DatabaseError;
use crate::storage::{Config, UserDirectory};
use crate::user::{NotificationKind, UserAccount};

/// Inclusive time range a notification timestamp must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    #[serde(with = "crate::user::ts_format")]
    pub start: NaiveDateTime,
    #[serde(with = "crate::user::ts_format")]
    pub end: NaiveDateTime,
}

impl ScanWindow {
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// `[now, now + days_before]`, matched against `expire_date`.
pub fn expiry_warning_window(now: NaiveDateTime, days_before: i64) -> ScanWindow {
    ScanWindow {
        start: now,
        end: now + Duration::days(days_before.max(0)),
    }
}

/// `[now - (after_days + grace_days), now - after_days]`, matched against
/// the registration date.
pub fn welcome_window(now: NaiveDateTime, after_days: i64, grace_days: i64) -> ScanWindow {
    let after = after_days.max(0);
    ScanWindow {
        start: now - Duration::days(after + grace_days.max(0)),
        end: now - Duration::days(after),
    }
}

pub fn window_for(kind: NotificationKind, config: &Config, now: NaiveDateTime) -> ScanWindow {
    match kind {
        NotificationKind::ExpiryWarning => {
            expiry_warning_window(now, config.expiry_notice.days_before)
        }
        NotificationKind::Welcome => {
            welcome_window(now, config.welcome.after_days, config.welcome.grace_days)
        }
    }
}

/// Users of `kind` whose timestamp is inside `window` and who have not been
/// sent that notification, oldest registration first.
pub fn scan(
    dir: &dyn UserDirectory,
    kind: NotificationKind,
    window: ScanWindow,
) -> Result<Vec<UserAccount>, DatabaseError> {
    dir.users_in_window(
        kind.scan_field(),
        &format_timestamp(window.start),
        &format_timestamp(window.end),
        kind.marker_key(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_timestamp;
    use crate::lifecycle::register_user;
    use crate::storage::Database;
    use crate::user::{MetaKey, NewUser, Role};

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn register(db: &Database, config: &Config, login: &str, registered: &str) -> UserAccount {
        register_user(
            db,
            config,
            &NewUser {
                login: login.into(),
                email: format!("{login}@example.com"),
                role: Role::Subscriber,
                registered_at: ts(registered),
            },
        )
        .unwrap()
    }

    #[test]
    fn expiry_window_spans_notice_days() {
        let w = expiry_warning_window(ts("2024-01-27 00:00:00"), 5);
        assert_eq!(w.end, ts("2024-02-01 00:00:00"));
        assert!(w.contains(ts("2024-01-30 00:00:00")));
        assert!(w.contains(w.start) && w.contains(w.end));
    }

    #[test]
    fn welcome_window_trails_registration() {
        let w = welcome_window(ts("2024-01-20 00:00:00"), 7, 4);
        assert_eq!(w.start, ts("2024-01-09 00:00:00"));
        assert_eq!(w.end, ts("2024-01-13 00:00:00"));
    }

    #[test]
    fn expiry_scan_selects_due_unmarked_users() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        // duration 30 days: expires 2024-01-30
        let due = register(&db, &config, "due", "2023-12-31 00:00:00");
        // expires 2024-03-01, outside the window
        register(&db, &config, "later", "2024-01-31 00:00:00");
        let marked = register(&db, &config, "marked", "2023-12-31 00:00:00");
        db.set_meta(marked.id, MetaKey::ExpireNotified, "1").unwrap();

        let window = expiry_warning_window(ts("2024-01-27 00:00:00"), 5);
        let found = scan(&db, NotificationKind::ExpiryWarning, window).unwrap();
        assert_eq!(found, vec![due]);
    }

    #[test]
    fn welcome_scan_matches_registration_time() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        let fresh = register(&db, &config, "fresh", "2024-01-10 08:00:00");
        register(&db, &config, "too_new", "2024-01-18 00:00:00");
        register(&db, &config, "too_old", "2023-12-01 00:00:00");

        let window = window_for(NotificationKind::Welcome, &config, ts("2024-01-20 00:00:00"));
        let found = scan(&db, NotificationKind::Welcome, window).unwrap();
        assert_eq!(found, vec![fresh]);
    }

    #[test]
    fn welcome_scan_ignores_diverged_registration_copy() {
        let db = Database::open_memory().unwrap();
        let config = Config::default();
        let ana = register(&db, &config, "ana", "2024-01-10 08:00:00");
        db.set_meta(ana.id, MetaKey::RegisteredDate, "2023-06-01 00:00:00")
            .unwrap();

        let window = welcome_window(ts("2024-01-20 00:00:00"), 7, 4);
        assert!(window.contains(ana.registered_at));
        let found = scan(&db, NotificationKind::Welcome, window).unwrap();
        assert_eq!(found, vec![ana]);
    }

    #[test]
    fn empty_scan_is_not_an_error() {
        let db = Database::open_memory().unwrap();
        let window = expiry_warning_window(ts("2024-01-27 00:00:00"), 5);
        assert!(scan(&db, NotificationKind::ExpiryWarning, window)
            .unwrap()
            .is_empty());
    }
}
