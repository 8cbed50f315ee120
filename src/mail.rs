//! Send emails to user for important updates.
//!
//! Delivery is an external concern. This module fixes the trigger and the
//! payload contract; the [`Notifier`] implementation decides transport.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Template list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Greets a freshly provisioned account.
    Welcome,
    /// Carries the single-use reset key.
    LoginToken,
}

/// One notification, addressed and fully rendered-ready.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub template: Template,
    pub to: String,
    pub subject: String,
    /// Template variables, ordered for stable payloads.
    pub vars: BTreeMap<&'static str, String>,
}

/// Port for sending notification emails.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Notifier that only records the trigger in the logs.
///
/// Default for deployments without a mail pipeline attached.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, message: &Message) -> Result<()> {
        tracing::info!(
            template = ?message.template,
            to = message.to,
            subject = message.subject,
            "notification triggered"
        );
        Ok(())
    }
}

/// Notifier capturing every message, for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<Message>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &Message) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Notifier that always fails, for error-path tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingNotifier;

#[cfg(test)]
#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _message: &Message) -> Result<()> {
        Err(crate::error::ServerError::Notification {
            details: "mail pipeline unavailable".to_owned(),
        })
    }
}
