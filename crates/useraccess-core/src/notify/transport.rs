//! Mail transports.
//!
//! A transport either delivers one message, rejects that message
//! ([`DeliveryError::Rejected`]) or reports that it cannot deliver anything
//! ([`DeliveryError::TransportUnavailable`]).

use std::io::Write;
use std::path::PathBuf;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreError, DeliveryError};
use crate::storage::{Config, TransportKind};

/// One outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl MailMessage {
    pub fn recipients(&self) -> String {
        self.to.join(", ")
    }
}

pub trait MailTransport {
    /// Short identifier for logs (e.g. "outbox", "webhook").
    fn name(&self) -> &str;

    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError>;
}

/// Build the transport selected in `[mail]`.
pub fn from_config(config: &Config) -> Result<Box<dyn MailTransport>, CoreError> {
    match config.mail.transport {
        TransportKind::Outbox => Ok(Box::new(OutboxTransport::new(config.outbox_path()?))),
        TransportKind::Webhook => {
            let url = config
                .mail
                .webhook_url
                .clone()
                .ok_or_else(|| ConfigError::MissingKey("mail.webhook_url".into()))?;
            Ok(Box::new(WebhookTransport::new(url)?))
        }
    }
}

/// Appends each message as a JSON line to a spool file.
pub struct OutboxTransport {
    path: PathBuf,
}

impl OutboxTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl MailTransport for OutboxTransport {
    fn name(&self) -> &str {
        "outbox"
    }

    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(message).map_err(|e| DeliveryError::Rejected {
            recipient: message.recipients(),
            reason: e.to_string(),
        })?;
        let unavailable = |e: std::io::Error| {
            DeliveryError::TransportUnavailable(format!("{}: {e}", self.path.display()))
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(unavailable)?;
        writeln!(file, "{line}").map_err(unavailable)
    }
}

/// POSTs each message as JSON to an HTTP mail relay.
pub struct WebhookTransport {
    url: String,
    client: Client,
    runtime: tokio::runtime::Runtime,
}

impl WebhookTransport {
    pub fn new(url: String) -> Result<Self, DeliveryError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DeliveryError::TransportUnavailable(e.to_string()))?;
        Ok(Self {
            url,
            client: Client::new(),
            runtime,
        })
    }
}

impl MailTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send(&self, message: &MailMessage) -> Result<(), DeliveryError> {
        let resp = self
            .runtime
            .block_on(self.client.post(&self.url).json(message).send())
            .map_err(|e| DeliveryError::TransportUnavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = self.runtime.block_on(resp.text()).unwrap_or_default();
        if status.is_client_error() {
            Err(DeliveryError::Rejected {
                recipient: message.recipients(),
                reason: format!("HTTP {status}: {text}"),
            })
        } else {
            Err(DeliveryError::TransportUnavailable(format!(
                "mail relay error (HTTP {status}): {text}"
            )))
        }
    }
}
