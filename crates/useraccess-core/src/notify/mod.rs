//! Expiry-warning and welcome notifications: scan, send, mark.

pub mod dispatch;
pub mod scan;
pub mod transport;

pub use dispatch::{render, DeliveryReport, Dispatcher, Template};
pub use scan::{expiry_warning_window, scan, welcome_window, window_for, ScanWindow};
pub use transport::{MailMessage, MailTransport, OutboxTransport, WebhookTransport};

use crate::storage::Config;
use crate::user::NotificationKind;

/// Configured templates for `kind`.
pub fn template_for(kind: NotificationKind, config: &Config) -> Template<'_> {
    match kind {
        NotificationKind::ExpiryWarning => Template {
            subject: &config.expiry_notice.subject,
            body: &config.expiry_notice.message,
        },
        NotificationKind::Welcome => Template {
            subject: &config.welcome.subject,
            body: &config.welcome.message,
        },
    }
}
