//! Per-user sending with exactly-once markers.
//!
//! The marker is written right after each successful send, so a run that
//! dies halfway never re-sends to the users it already reached. Rejected
//! messages leave the marker at zero and the user is picked up by the next
//! scan.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::transport::{MailMessage, MailTransport};
use crate::clock::format_timestamp;
use crate::error::DeliveryError;
use crate::policy::days_left;
use crate::storage::{MailConfig, UserDirectory};
use crate::user::{AccessRecord, NotificationKind, UserAccount};

/// Subject and body templates for one notification kind.
#[derive(Debug, Clone)]
pub struct Template<'a> {
    pub subject: &'a str,
    pub body: &'a str,
}

/// Outcome of dispatching one notification kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub kind: NotificationKind,
    pub sent: Vec<String>,
    pub failed: Vec<String>,
    /// Set when the run stopped early; remaining users were not attempted.
    pub aborted: Option<String>,
}

impl DeliveryReport {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            sent: Vec::new(),
            failed: Vec::new(),
            aborted: None,
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_fatal(&self) -> bool {
        self.aborted.is_some()
    }
}

/// Fill `{login}`, `{email}`, `{registered_at}`, `{expire_at}` and `{days_left}`.
pub fn render(
    template: &str,
    user: &UserAccount,
    record: &AccessRecord,
    now: NaiveDateTime,
) -> String {
    let expire_at = record.expire_at.map(format_timestamp).unwrap_or_default();
    let left = record
        .expire_at
        .map(|e| days_left(e, now).to_string())
        .unwrap_or_default();
    template
        .replace("{login}", &user.login)
        .replace("{email}", &user.email)
        .replace("{registered_at}", &format_timestamp(user.registered_at))
        .replace("{expire_at}", &expire_at)
        .replace("{days_left}", &left)
}

pub struct Dispatcher<'a> {
    dir: &'a dyn UserDirectory,
    transport: &'a dyn MailTransport,
    mail: &'a MailConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        dir: &'a dyn UserDirectory,
        transport: &'a dyn MailTransport,
        mail: &'a MailConfig,
    ) -> Self {
        Self {
            dir,
            transport,
            mail,
        }
    }

    fn message(
        &self,
        user: &UserAccount,
        template: &Template<'_>,
        now: NaiveDateTime,
    ) -> MailMessage {
        // An unreadable record only costs the placeholders.
        let record = self.dir.access_record(user.id).unwrap_or_default();
        let mut to = vec![user.email.clone()];
        if let Some(copy) = self.mail.admin_copy.as_deref().filter(|c| !c.is_empty()) {
            to.push(copy.to_string());
        }
        MailMessage {
            to,
            subject: render(template.subject, user, &record, now),
            body: render(template.body, user, &record, now),
            headers: vec![("From".to_string(), self.mail.from.clone())],
        }
    }

    /// Send `template` to each user in order and flip their `kind` marker
    /// on success.
    pub fn dispatch(
        &self,
        kind: NotificationKind,
        users: &[UserAccount],
        template: &Template<'_>,
        now: NaiveDateTime,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::new(kind);

        for user in users {
            let message = self.message(user, template, now);
            match self.transport.send(&message) {
                Ok(()) => {
                    report.sent.push(user.email.clone());
                    if let Err(e) = self.dir.set_meta(user.id, kind.marker_key(), "1") {
                        tracing::error!(
                            user_id = user.id,
                            kind = kind.label(),
                            error = %e,
                            "sent but could not record marker; stopping"
                        );
                        report.aborted = Some(format!(
                            "could not record {} marker for {}: {e}",
                            kind.label(),
                            user.email
                        ));
                        break;
                    }
                    tracing::info!(user_id = user.id, kind = kind.label(), "notification sent");
                }
                Err(DeliveryError::Rejected { recipient, reason }) => {
                    tracing::warn!(
                        user_id = user.id,
                        kind = kind.label(),
                        recipient = %recipient,
                        reason = %reason,
                        "notification rejected"
                    );
                    report.failed.push(user.email.clone());
                }
                Err(DeliveryError::TransportUnavailable(reason)) => {
                    tracing::error!(
                        transport = self.transport.name(),
                        kind = kind.label(),
                        reason = %reason,
                        "mail transport unavailable; stopping"
                    );
                    report.aborted = Some(reason);
                    break;
                }
            }
        }

        report
    }
}
