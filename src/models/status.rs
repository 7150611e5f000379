use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ServiceId;

/// Probed state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Unknown,
    Error,
    Timeout,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Unknown => "unknown",
            SubscriptionStatus::Error => "error",
            SubscriptionStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached result of the most recent status probe for one service.
///
/// Written whole-record by the prober; read by UI surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub service_id: ServiceId,
    pub status: SubscriptionStatus,
    /// Raw next-billing text scraped from the account page, when found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_billing: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(service_id: ServiceId, status: SubscriptionStatus, checked_at: DateTime<Utc>) -> Self {
        Self {
            service_id,
            status,
            next_billing: None,
            checked_at,
        }
    }

    pub fn with_next_billing(mut self, text: impl Into<String>) -> Self {
        self.next_billing = Some(text.into());
        self
    }
}
