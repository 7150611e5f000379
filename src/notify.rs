//! User-facing notifications.
//!
//! The engine reports session outcomes and asks for pre-cancellation
//! confirmation through a [`NotificationSink`], keeping UI concerns out of
//! the session logic. The default sink just logs; richer frontends attach
//! their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity,
        }
    }

    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Success, title, body)
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, body)
    }

    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, body)
    }
}

/// A user's answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAnswer {
    Proceed,
    Abort,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, note: Notification);

    /// Ask the user to confirm an action. `None` means no answer arrived;
    /// callers treat that the same as [`ConfirmAnswer::Abort`].
    async fn confirm(&self, note: Notification) -> Option<ConfirmAnswer>;
}

/// Sink that writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, note: Notification) {
        match note.severity {
            Severity::Info => tracing::info!(title = %note.title, "{}", note.body),
            Severity::Success => tracing::info!(title = %note.title, "{}", note.body),
            Severity::Error => tracing::error!(title = %note.title, "{}", note.body),
        }
    }

    async fn confirm(&self, note: Notification) -> Option<ConfirmAnswer> {
        tracing::warn!(
            title = %note.title,
            "confirmation requested but no interactive notifier is attached"
        );
        None
    }
}
