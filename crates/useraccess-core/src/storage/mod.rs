mod config;
pub mod database;
pub mod migrations;

pub use config::{
    AccessConfig, Config, ExpiryNoticeConfig, MailConfig, ScheduleConfig, TransportKind,
    WelcomeConfig,
};
pub use database::Database;

use std::path::PathBuf;

use crate::clock::parse_timestamp;
use crate::error::DatabaseError;
use crate::user::{AccessFlag, AccessRecord, MetaKey, NewUser, ScanField, UserAccount};

/// Returns `~/.config/useraccess[-dev]/` based on USERACCESS_ENV.
///
/// Set USERACCESS_ENV=dev to use development data directory, or
/// USERACCESS_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("USERACCESS_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env =
                std::env::var("USERACCESS_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("useraccess-dev")
            } else {
                base_dir.join("useraccess")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// The host's user directory: identities, per-user metadata and a small
/// key-value area for plugin state.
///
/// Each call is expected to be atomic per key; no locking happens above it.
pub trait UserDirectory {
    fn user(&self, id: i64) -> Result<Option<UserAccount>, DatabaseError>;

    fn user_by_login(&self, login: &str) -> Result<Option<UserAccount>, DatabaseError>;

    /// Every account, oldest registration first.
    fn users(&self) -> Result<Vec<UserAccount>, DatabaseError>;

    fn insert_user(&self, user: &NewUser) -> Result<UserAccount, DatabaseError>;

    fn meta(&self, user_id: i64, key: MetaKey) -> Result<Option<String>, DatabaseError>;

    /// Insert or overwrite one metadata value.
    fn set_meta(&self, user_id: i64, key: MetaKey, value: &str) -> Result<(), DatabaseError>;

    /// Insert only if absent. Returns whether a row was written.
    fn add_meta(&self, user_id: i64, key: MetaKey, value: &str) -> Result<bool, DatabaseError>;

    /// Users whose `field` lies in `[start, end]` and whose `marker` meta is
    /// below 1, ordered by registration time then id.
    fn users_in_window(
        &self,
        field: ScanField,
        start: &str,
        end: &str,
        marker: MetaKey,
    ) -> Result<Vec<UserAccount>, DatabaseError>;

    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError>;

    /// Decode all five metadata keys of a user.
    fn access_record(&self, user_id: i64) -> Result<AccessRecord, DatabaseError> {
        let corrupt = |key: MetaKey, value: String| DatabaseError::CorruptValue {
            user_id,
            key: key.as_str().to_string(),
            value,
        };
        let timestamp = |key: MetaKey| -> Result<_, DatabaseError> {
            match self.meta(user_id, key)? {
                Some(v) => parse_timestamp(&v).map(Some).ok_or_else(|| corrupt(key, v)),
                None => Ok(None),
            }
        };
        let counter = |key: MetaKey| -> Result<_, DatabaseError> {
            match self.meta(user_id, key)? {
                Some(v) => v.trim().parse::<u32>().map(Some).map_err(|_| corrupt(key, v)),
                None => Ok(None),
            }
        };

        let access_flag = match self.meta(user_id, MetaKey::AccessExpired)? {
            Some(v) => Some(
                AccessFlag::from_meta(&v).ok_or_else(|| corrupt(MetaKey::AccessExpired, v))?,
            ),
            None => None,
        };

        Ok(AccessRecord {
            access_flag,
            expire_at: timestamp(MetaKey::ExpireDate)?,
            registered_at: timestamp(MetaKey::RegisteredDate)?,
            expire_notified_count: counter(MetaKey::ExpireNotified)?,
            welcome_notified_count: counter(MetaKey::WelcomeNotified)?,
        })
    }
}
