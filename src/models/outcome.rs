use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified cause of a failed cancellation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An element was absent. Expected during polling, fatal only when the
    /// catalog is exhausted.
    NotFound,
    /// The page context could not be reached even after re-injection.
    CommunicationFailure,
    /// A per-step or session deadline fired.
    Timeout,
    /// The flow bounced through more pages than the navigation budget allows.
    TooManyRedirects,
    /// No cancel control matched anywhere in the combined selector list.
    NoCancelControl,
    /// The host refused to open the requested page.
    HostRejected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::CommunicationFailure => "communication_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TooManyRedirects => "too_many_redirects",
            ErrorKind::NoCancelControl => "no_cancel_control",
            ErrorKind::HostRejected => "host_rejected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one cancellation session, as surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl CancelOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_kind: Some(kind),
        }
    }

    /// The request never became a session: duplicate, disabled service, or
    /// unconfirmed. No error kind because no page was touched.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_kind: None,
        }
    }
}

/// What one executor invocation did to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepResult {
    /// An action changed the page URL (or requested a navigation); the
    /// orchestrator should wait for the next load-complete event.
    Navigating {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_url: Option<String>,
    },
    /// The batch completed on this page without navigating away.
    Succeeded,
    /// An action went wrong in the page context.
    Failed { reason: String },
    /// Nothing in the combined selector list matched, and the current URL
    /// does not look like a confirmation page.
    NoActionableElement,
}
