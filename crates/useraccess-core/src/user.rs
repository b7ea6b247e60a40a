//! Host-owned user identity and the expiration metadata attached to it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::clock::format_timestamp;

/// Host-defined privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Subscriber,
}

impl Role {
    /// Whether this role may manage site options (bypasses expiration).
    pub fn can_manage_options(self) -> bool {
        matches!(self, Role::Administrator)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Subscriber => "subscriber",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "administrator" => Some(Role::Administrator),
            "subscriber" => Some(Role::Subscriber),
            _ => None,
        }
    }
}

/// A user account as the host directory knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub role: Role,
    #[serde(with = "ts_format")]
    pub registered_at: NaiveDateTime,
}

/// Input for creating an account in the host directory.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub role: Role,
    pub registered_at: NaiveDateTime,
}

/// Sticky per-user access state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessFlag {
    Allowed,
    Denied,
}

impl AccessFlag {
    /// Stored form: the meta value answers "is access expired?".
    pub fn as_meta(self) -> &'static str {
        match self {
            AccessFlag::Allowed => "false",
            AccessFlag::Denied => "true",
        }
    }

    pub fn from_meta(s: &str) -> Option<Self> {
        match s {
            "false" => Some(AccessFlag::Allowed),
            "true" => Some(AccessFlag::Denied),
            _ => None,
        }
    }
}

/// The five per-user metadata keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    AccessExpired,
    ExpireDate,
    RegisteredDate,
    ExpireNotified,
    WelcomeNotified,
}

impl MetaKey {
    pub const ALL: [MetaKey; 5] = [
        MetaKey::AccessExpired,
        MetaKey::ExpireDate,
        MetaKey::RegisteredDate,
        MetaKey::ExpireNotified,
        MetaKey::WelcomeNotified,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetaKey::AccessExpired => "access_expired",
            MetaKey::ExpireDate => "expire_date",
            MetaKey::RegisteredDate => "registered_date",
            MetaKey::ExpireNotified => "expire_notified_count",
            MetaKey::WelcomeNotified => "welcome_notified_count",
        }
    }
}

/// Expiration metadata of one user; `None` means the key is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub access_flag: Option<AccessFlag>,
    #[serde(with = "ts_format::option")]
    pub expire_at: Option<NaiveDateTime>,
    /// Denormalized copy of [`UserAccount::registered_at`].
    #[serde(with = "ts_format::option")]
    pub registered_at: Option<NaiveDateTime>,
    pub expire_notified_count: Option<u32>,
    pub welcome_notified_count: Option<u32>,
}

impl AccessRecord {
    /// All five keys present.
    pub fn is_initialized(&self) -> bool {
        self.access_flag.is_some()
            && self.expire_at.is_some()
            && self.registered_at.is_some()
            && self.expire_notified_count.is_some()
            && self.welcome_notified_count.is_some()
    }

    pub fn missing_keys(&self) -> Vec<MetaKey> {
        let mut missing = Vec::new();
        if self.access_flag.is_none() {
            missing.push(MetaKey::AccessExpired);
        }
        if self.expire_at.is_none() {
            missing.push(MetaKey::ExpireDate);
        }
        if self.registered_at.is_none() {
            missing.push(MetaKey::RegisteredDate);
        }
        if self.expire_notified_count.is_none() {
            missing.push(MetaKey::ExpireNotified);
        }
        if self.welcome_notified_count.is_none() {
            missing.push(MetaKey::WelcomeNotified);
        }
        missing
    }
}

/// Timestamp a scan window is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanField {
    /// The canonical `users.registered_at` column, never the meta copy.
    RegisteredAt,
    Meta(MetaKey),
}

/// The two notification kinds and the keys that drive their scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ExpiryWarning,
    Welcome,
}

impl NotificationKind {
    pub fn scan_field(self) -> ScanField {
        match self {
            NotificationKind::ExpiryWarning => ScanField::Meta(MetaKey::ExpireDate),
            NotificationKind::Welcome => ScanField::RegisteredAt,
        }
    }

    /// One-shot sent marker.
    pub fn marker_key(self) -> MetaKey {
        match self {
            NotificationKind::ExpiryWarning => MetaKey::ExpireNotified,
            NotificationKind::Welcome => MetaKey::WelcomeNotified,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NotificationKind::ExpiryWarning => "expiry warning",
            NotificationKind::Welcome => "welcome",
        }
    }
}

/// What an administrator sees on a user's profile page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    pub user: UserAccount,
    pub access: AccessRecord,
}

impl ProfileView {
    pub fn has_access(&self) -> bool {
        self.access.access_flag == Some(AccessFlag::Allowed)
    }

    pub fn membership_since(&self) -> String {
        format_timestamp(self.user.registered_at)
    }
}

pub(crate) mod ts_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::clock::{format_timestamp, parse_timestamp};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            ts: &Option<NaiveDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => s.serialize_some(&format_timestamp(*ts)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => parse_timestamp(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}"))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_timestamp;

    #[test]
    fn access_flag_meta_values() {
        assert_eq!(AccessFlag::Denied.as_meta(), "true");
        assert_eq!(AccessFlag::from_meta("false"), Some(AccessFlag::Allowed));
        assert_eq!(AccessFlag::from_meta("maybe"), None);
    }

    #[test]
    fn empty_record_reports_every_key_missing() {
        let record = AccessRecord::default();
        assert!(!record.is_initialized());
        assert_eq!(record.missing_keys(), MetaKey::ALL.to_vec());
    }

    #[test]
    fn kinds_map_to_distinct_markers() {
        assert_eq!(
            NotificationKind::ExpiryWarning.scan_field(),
            ScanField::Meta(MetaKey::ExpireDate)
        );
        assert_eq!(NotificationKind::Welcome.scan_field(), ScanField::RegisteredAt);
        assert_ne!(
            NotificationKind::ExpiryWarning.marker_key(),
            NotificationKind::Welcome.marker_key()
        );
    }

    #[test]
    fn account_serializes_timestamp_as_text() {
        let user = UserAccount {
            id: 7,
            login: "ana".into(),
            email: "ana@example.com".into(),
            role: Role::Subscriber,
            registered_at: parse_timestamp("2024-01-01 00:00:00").unwrap(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["registered_at"], "2024-01-01 00:00:00");
        assert_eq!(json["role"], "subscriber");
    }
}
