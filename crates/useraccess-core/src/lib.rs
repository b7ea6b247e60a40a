//! # useraccess Core Library
//!
//! Time-based access expiration for registered users of a site, plus two
//! one-shot email notifications (pre-expiration warning, post-registration
//! welcome). The CLI binary is a thin adapter that binds these operations
//! to host events (registration, login, install, scheduled runs).
//!
//! ## Architecture
//!
//! - **Policy**: pure expiry arithmetic that fails closed on bad durations
//! - **Gate**: the authentication hook admitting or denying a login
//! - **Notify**: range scans, mail transports and the marker-flipping dispatcher
//! - **Lifecycle**: registration, install-time backfill, maintenance, admin edits
//! - **Storage**: SQLite user directory and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`AccessGate`]: per-login admit/deny decision
//! - [`run_batch`]: one scheduled scan+dispatch pass over both notification kinds
//! - [`Database`]: the user directory and per-user metadata
//! - [`Config`]: the single global settings record

pub mod batch;
pub mod clock;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod notify;
pub mod policy;
pub mod schedule;
pub mod storage;
pub mod user;

pub use batch::{run_batch, tick, BatchReport};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{AccessError, ConfigError, CoreError, DatabaseError, DeliveryError};
pub use gate::AccessGate;
pub use notify::{DeliveryReport, MailMessage, MailTransport};
pub use schedule::{Recurrence, ScheduleState};
pub use storage::{Config, Database, UserDirectory};
pub use user::{
    AccessFlag, AccessRecord, NewUser, NotificationKind, ProfileView, Role, ScanField, UserAccount,
};
