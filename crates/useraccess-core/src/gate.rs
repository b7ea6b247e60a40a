//! Access gate - the authentication hook.
//!
//! Runs after the host has matched credentials and before it issues a
//! session. It either hands the user back (admit) or returns an
//! [`AccessError`] (deny); nothing on this path panics or grants access on
//! a storage or configuration fault.
//!
//! ## Decision order
//!
//! 1. Administrators are always admitted.
//! 2. A denied flag denies.
//! 3. Missing metadata is an activation error.
//! 4. An elapsed expiry denies and persists the flag.
//! 5. Everything else is admitted unchanged.

use chrono::NaiveDateTime;

use crate::clock::{format_timestamp, Clock};
use crate::error::AccessError;
use crate::policy::{compute_expiry, is_expired, valid_duration};
use crate::storage::{Config, UserDirectory};
use crate::user::{AccessFlag, AccessRecord, MetaKey, UserAccount};

/// Per-request access check over an explicit directory, config and clock.
pub struct AccessGate<'a> {
    dir: &'a dyn UserDirectory,
    config: &'a Config,
    clock: &'a dyn Clock,
}

impl<'a> AccessGate<'a> {
    pub fn new(dir: &'a dyn UserDirectory, config: &'a Config, clock: &'a dyn Clock) -> Self {
        Self { dir, config, clock }
    }

    /// Resolve a login name and run [`AccessGate::check`].
    ///
    /// A directory that cannot be read refuses the login.
    pub fn check_login(&self, login: &str) -> Result<UserAccount, AccessError> {
        let user = self
            .dir
            .user_by_login(login)
            .map_err(|e| {
                tracing::error!(login, error = %e, "user lookup failed during authentication");
                AccessError::DirectoryUnavailable
            })?
            .ok_or_else(|| AccessError::UnknownUser(login.to_string()))?;
        self.check(user)
    }

    /// Admit or deny one authentication attempt.
    pub fn check(&self, user: UserAccount) -> Result<UserAccount, AccessError> {
        if user.role.can_manage_options() {
            return Ok(user);
        }

        let record = self.dir.access_record(user.id).map_err(|e| {
            tracing::error!(user_id = user.id, error = %e, "unreadable access metadata");
            AccessError::Activation { user_id: user.id }
        })?;

        // A denied flag is sticky whatever else the record holds.
        if record.access_flag == Some(AccessFlag::Denied) {
            return Err(self.expired());
        }

        let expire_at = self.effective_expiry(&user, &record);
        let (Some(_), Some(expire_at)) = (record.access_flag, expire_at) else {
            tracing::warn!(
                user_id = user.id,
                missing = ?record.missing_keys(),
                "access metadata not initialized"
            );
            return Err(AccessError::Activation { user_id: user.id });
        };

        let now = self.clock.now();
        if self.config_fails_closed(user.id) || is_expired(expire_at, now) {
            match self
                .dir
                .set_meta(user.id, MetaKey::AccessExpired, AccessFlag::Denied.as_meta())
            {
                Ok(()) => tracing::info!(
                    user_id = user.id,
                    login = %user.login,
                    expire_at = %format_timestamp(expire_at),
                    "access expired"
                ),
                Err(e) => {
                    tracing::error!(user_id = user.id, error = %e, "failed to persist denied flag")
                }
            }
            return Err(self.expired());
        }

        Ok(user)
    }

    fn expired(&self) -> AccessError {
        AccessError::Expired {
            message: self.config.access.denied_message.clone(),
        }
    }

    /// Stored expiry, unless the registered-date copy disagrees with the
    /// canonical registration time; then the expiry is recomputed from the
    /// canonical value.
    fn effective_expiry(
        &self,
        user: &UserAccount,
        record: &AccessRecord,
    ) -> Option<NaiveDateTime> {
        let cached_registered = record.registered_at?;
        let stored = record.expire_at?;
        if cached_registered == user.registered_at {
            return Some(stored);
        }
        tracing::warn!(
            user_id = user.id,
            registered_at = %format_timestamp(user.registered_at),
            cached = %format_timestamp(cached_registered),
            "registered date copy diverges; using canonical registration time"
        );
        Some(compute_expiry(user.registered_at, self.config.access.duration_days))
    }

    fn config_fails_closed(&self, user_id: i64) -> bool {
        if valid_duration(self.config.access.duration_days).is_some() {
            return false;
        }
        tracing::warn!(
            user_id,
            duration_days = self.config.access.duration_days,
            "invalid access duration; treating account as expired"
        );
        true
    }
}
