//! TOML-based plugin configuration.
//!
//! One global record with the settings-page sections:
//! - Access duration and the denial message shown at login
//! - Expiry warning email (threshold, subject, body)
//! - Welcome email (enabled, threshold, grace window, subject, body)
//! - Mail transport and sender
//! - Batch run recurrence
//!
//! Configuration is stored at `~/.config/useraccess/config.toml`.
//! The core never writes it; only the settings surface does.

use std::path::{Path, PathBuf};

use indoc::indoc;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::policy::{valid_duration, MAX_DURATION_DAYS};
use crate::schedule::Recurrence;

/// Access duration and denial text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Days of access after registration.
    #[serde(default = "default_duration_days")]
    pub duration_days: i64,
    /// Shown to a user whose access has expired.
    #[serde(default = "default_denied_message")]
    pub denied_message: String,
}

/// Pre-expiration warning email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryNoticeConfig {
    /// Warn when the expiry falls within this many days.
    #[serde(default = "default_days_before")]
    pub days_before: i64,
    #[serde(default = "default_expiry_subject")]
    pub subject: String,
    #[serde(default = "default_expiry_message")]
    pub message: String,
}

/// Post-registration welcome email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Send once this many days have passed since registration.
    #[serde(default = "default_after_days")]
    pub after_days: i64,
    /// Width of the welcome scan window. Must cover the gap between runs.
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,
    #[serde(default = "default_welcome_subject")]
    pub subject: String,
    #[serde(default = "default_welcome_message")]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Append messages to a local JSON-lines spool.
    Outbox,
    /// POST messages to an HTTP mail relay.
    Webhook,
}

/// Mail transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_from")]
    pub from: String,
    /// Extra recipient copied on every notification.
    #[serde(default)]
    pub admin_copy: Option<String>,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Spool file for the outbox transport; defaults to `outbox.jsonl` in the data dir.
    #[serde(default)]
    pub outbox_path: Option<String>,
}

/// Batch run cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub recurrence: Recurrence,
}

/// Plugin configuration.
///
/// Serialized to/from TOML at `~/.config/useraccess/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub expiry_notice: ExpiryNoticeConfig,
    #[serde(default)]
    pub welcome: WelcomeConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

// Default functions
fn default_duration_days() -> i64 {
    30
}
fn default_denied_message() -> String {
    "To gain access please contact us.".into()
}
fn default_days_before() -> i64 {
    15
}
fn default_expiry_subject() -> String {
    "Your subscription is going to expire!".into()
}
fn default_expiry_message() -> String {
    indoc! {"
        Hello {login},

        Your subscription expires on {expire_at}, {days_left} days from now.
        Please contact us to keep your access.
    "}
    .into()
}
fn default_after_days() -> i64 {
    7
}
fn default_grace_days() -> i64 {
    4
}
fn default_welcome_subject() -> String {
    "Welcome aboard!".into()
}
fn default_welcome_message() -> String {
    indoc! {"
        Hello {login},

        Thanks for joining us on {registered_at}. Your access runs until {expire_at}.
    "}
    .into()
}
fn default_mail_from() -> String {
    "Site Notifications <noreply@localhost>".into()
}
fn default_transport() -> TransportKind {
    TransportKind::Outbox
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            duration_days: default_duration_days(),
            denied_message: default_denied_message(),
        }
    }
}

impl Default for ExpiryNoticeConfig {
    fn default() -> Self {
        Self {
            days_before: default_days_before(),
            subject: default_expiry_subject(),
            message: default_expiry_message(),
        }
    }
}

impl Default for WelcomeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            after_days: default_after_days(),
            grace_days: default_grace_days(),
            subject: default_welcome_subject(),
            message: default_welcome_message(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
            admin_copy: None,
            transport: default_transport(),
            webhook_url: None,
            outbox_path: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            recurrence: Recurrence::Daily,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::MissingKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .trim()
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .trim()
                            .parse::<i64>()
                            .map_err(|_| invalid(format!("'{value}' is not a whole number")))?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    serde_json::Value::Null if value.is_empty() => serde_json::Value::Null,
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from disk, writing defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Update one value by key, validating the resulting record.
    ///
    /// Nothing changes when the key is unknown, the value does not parse,
    /// or the updated record fails [`Config::validate`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Check every value the core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        if valid_duration(self.access.duration_days).is_none() {
            return Err(invalid(
                "access.duration_days",
                format!("must be between 1 and {MAX_DURATION_DAYS}"),
            ));
        }
        if self.expiry_notice.days_before < 0 {
            return Err(invalid("expiry_notice.days_before", "must not be negative".into()));
        }
        if self.welcome.after_days < 0 {
            return Err(invalid("welcome.after_days", "must not be negative".into()));
        }
        if self.welcome.grace_days < 1 {
            return Err(invalid("welcome.grace_days", "must be at least 1".into()));
        }
        if self.mail.transport == TransportKind::Webhook {
            let raw = self
                .mail
                .webhook_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingKey("mail.webhook_url".into()))?;
            let parsed = url::Url::parse(raw).map_err(|e| invalid("mail.webhook_url", e.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid("mail.webhook_url", "must be an http(s) URL".into()));
            }
        }
        Ok(())
    }

    /// Where the outbox transport spools messages.
    pub fn outbox_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.mail.outbox_path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(Self::path()?.with_file_name("outbox.jsonl")),
        }
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default configuration");
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.access.duration_days, 30);
        assert_eq!(parsed.expiry_notice.days_before, 15);
        assert!(!parsed.welcome.enabled);
        assert_eq!(parsed.mail.transport, TransportKind::Outbox);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str("[access]\nduration_days = 90\n").unwrap();
        assert_eq!(cfg.access.duration_days, 90);
        assert_eq!(cfg.access.denied_message, "To gain access please contact us.");
        assert_eq!(cfg.welcome.grace_days, 4);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("access.duration_days").as_deref(), Some("30"));
        assert_eq!(cfg.get("welcome.enabled").as_deref(), Some("false"));
        assert_eq!(cfg.get("schedule.recurrence").as_deref(), Some("daily"));
        assert!(cfg.get("access.missing_key").is_none());
    }

    #[test]
    fn set_updates_number_and_bool() {
        let mut cfg = Config::default();
        cfg.set("access.duration_days", "45").unwrap();
        cfg.set("welcome.enabled", "true").unwrap();
        assert_eq!(cfg.access.duration_days, 45);
        assert!(cfg.welcome.enabled);
    }

    #[test]
    fn set_rejects_non_numeric_duration() {
        let mut cfg = Config::default();
        let err = cfg.set("access.duration_days", "thirty").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(cfg.access.duration_days, 30);
    }

    #[test]
    fn set_rejects_zero_duration() {
        let mut cfg = Config::default();
        assert!(cfg.set("access.duration_days", "0").is_err());
        assert!(cfg.set("access.duration_days", "-3").is_err());
        assert_eq!(cfg.access.duration_days, 30);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        let err = cfg.set("access.nonexistent_key", "value").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(_)));
    }

    #[test]
    fn set_optional_string() {
        let mut cfg = Config::default();
        cfg.set("mail.admin_copy", "owner@example.com").unwrap();
        assert_eq!(cfg.mail.admin_copy.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn set_recurrence_by_name() {
        let mut cfg = Config::default();
        cfg.set("schedule.recurrence", "twice_weekly").unwrap();
        assert_eq!(cfg.schedule.recurrence, Recurrence::TwiceWeekly);
        assert!(cfg.set("schedule.recurrence", "hourly").is_err());
    }

    #[test]
    fn webhook_transport_requires_url() {
        let mut cfg = Config::default();
        assert!(cfg.set("mail.transport", "webhook").is_err());
        cfg.set("mail.webhook_url", "https://relay.example.com/send").unwrap();
        cfg.set("mail.transport", "webhook").unwrap();
        assert_eq!(cfg.mail.transport, TransportKind::Webhook);

        cfg.mail.webhook_url = Some("ftp://relay.example.com".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.access.duration_days, 30);
        assert!(path.exists());
    }

    #[test]
    fn hand_edited_invalid_duration_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[access]\nduration_days = 0\n").unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.access.duration_days, 0);
        assert!(cfg.validate().is_err());
    }
}
