//! Core error types for useraccess-core.
//!
//! Storage and configuration failures are faults. Access and delivery
//! outcomes are data: the gate hands an [`AccessError`] back to the host
//! pipeline and the dispatcher folds [`DeliveryError::Rejected`] into its
//! report instead of raising it.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for useraccess-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Access decisions and profile writes
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    /// Mail delivery errors that escaped a batch
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded
    #[error("Corrupt value for '{key}' of user {user_id}: {value:?}")]
    CorruptValue {
        user_id: i64,
        key: String,
        value: String,
    },

    /// Unique constraint violated (e.g. duplicate login)
    #[error("Already exists: {0}")]
    Conflict(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Outcomes that deny a login or an admin write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The account has no expiration metadata yet (never initialized).
    #[error("Access metadata missing for user {user_id}; run plugin activation")]
    Activation { user_id: i64 },

    /// Access has expired or was revoked by an administrator.
    #[error("Your access to this site has expired. {message}")]
    Expired { message: String },

    /// Caller lacks the administrator role.
    #[error("Only administrators may change access for user {user_id}")]
    NotPermitted { user_id: i64 },

    /// The user directory could not be read during authentication.
    #[error("User directory unavailable; access denied")]
    DirectoryUnavailable,

    /// No such account in the user directory.
    #[error("Unknown user: {0}")]
    UnknownUser(String),
}

/// Mail delivery errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport refused this one message; the batch continues.
    #[error("Delivery to {recipient} rejected: {reason}")]
    Rejected { recipient: String, reason: String },

    /// The transport cannot deliver anything; the batch stops.
    #[error("Mail transport unavailable: {0}")]
    TransportUnavailable(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => match e.code {
                rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy => {
                    DatabaseError::Locked
                }
                rusqlite::ErrorCode::ConstraintViolation => {
                    DatabaseError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                _ => DatabaseError::QueryFailed(err.to_string()),
            },
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_message_carries_configured_text() {
        let err = AccessError::Expired {
            message: "To gain access please contact us.".into(),
        };
        assert_eq!(
            err.to_string(),
            "Your access to this site has expired. To gain access please contact us."
        );
    }

    #[test]
    fn no_rows_maps_to_query_failed() {
        let err: DatabaseError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, DatabaseError::QueryFailed(_)));
    }

    #[test]
    fn access_error_lifts_into_core_error() {
        let err: CoreError = AccessError::UnknownUser("ghost".into()).into();
        assert!(err.to_string().contains("ghost"));
    }
}
