//! Browser host abstraction.
//!
//! The engine drives cancellations and status probes through a [`TabHost`]:
//! open a tab, hear about its page loads over a broadcast channel, send a
//! [`PageRequest`] into the loaded page, close the tab. The live
//! implementation speaks the Chrome DevTools Protocol; the simulated one
//! serves scripted [`FixtureDom`](crate::page::FixtureDom) pages so session
//! logic can be tested without a browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::catalog::CancelStep;
use crate::models::{StepResult, SubscriptionStatus};
use crate::page::PageError;
use crate::selector::Selector;

pub mod sim;

#[cfg(feature = "browser")]
pub mod cdp;

/// Host-assigned identifier for an open tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(u64);

impl TabId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// Tab lifecycle notifications, fanned out to every subscriber.
#[derive(Debug, Clone)]
pub enum TabEvent {
    /// A document finished loading in the tab. Fired once per committed
    /// navigation, including the first.
    LoadComplete { tab: TabId, url: String },
    /// The tab is gone, whether we closed it or the user did.
    Closed { tab: TabId },
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host refused to open {url}: {reason}")]
    OpenRejected { url: String, reason: String },
    #[error("unknown tab {0}")]
    UnknownTab(TabId),
    /// The page context did not answer; re-injection may recover it.
    #[error("page context unreachable: {0}")]
    PageUnreachable(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<PageError> for HostError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::Unreachable(detail) => HostError::PageUnreachable(detail),
            PageError::BadSelector(_) => HostError::Backend(anyhow::Error::new(err)),
            PageError::Backend(inner) => HostError::Backend(inner),
        }
    }
}

/// A browser the engine can drive, one request per loaded page.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Open `url` in a fresh tab. Probes open in the background; interactive
    /// cancellations in the foreground, so the user can watch.
    async fn open_tab(&self, url: &str, foreground: bool) -> Result<TabId, HostError>;

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError>;

    async fn current_url(&self, tab: TabId) -> Result<String, HostError>;

    /// Subscribe to tab lifecycle events. Subscribe before opening a tab or
    /// the first load can slip past.
    fn subscribe(&self) -> broadcast::Receiver<TabEvent>;

    /// Run one request against the tab's current document.
    async fn execute(&self, tab: TabId, request: PageRequest) -> Result<PageResponse, HostError>;

    /// Re-establish the page context after [`HostError::PageUnreachable`].
    async fn reinject(&self, tab: TabId) -> Result<(), HostError>;
}

/// One unit of work for the page the tab currently shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageRequest {
    /// Run declarative steps in order until one navigates or the batch ends.
    Steps(StepBatch),
    /// Click the highest-priority cancel control currently present.
    Greedy(GreedyBatch),
    /// Read subscription indicators without touching anything.
    Probe(ProbeBatch),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepBatch {
    pub steps: Vec<CancelStep>,
    /// Reason controls to tick before the first step; empty once the
    /// session has already handled reason selection.
    #[serde(default)]
    pub reason: Vec<Selector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreedyBatch {
    /// Combined cancel selectors, service-specific entries first.
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub reason: Vec<Selector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeBatch {
    /// Checked first; an already-cancelled page often still shows upsell
    /// buttons that would read as active.
    pub inactive: Vec<Selector>,
    pub active: Vec<Selector>,
    pub next_billing: Vec<Selector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageResponse {
    Step(StepOutcome),
    Probe(ProbeOutcome),
}

/// What a step or greedy request did on the current page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    #[serde(flatten)]
    pub result: StepResult,
    /// How many declarative steps finished, so the orchestrator can advance
    /// its cursor across navigations.
    pub steps_consumed: usize,
    /// Page-mutating actions performed by this request.
    pub actions: u32,
    /// A reason control was ticked (or found already ticked) this round.
    pub reason_selected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: SubscriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_billing: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_error_maps_onto_host_error() {
        let err: HostError = PageError::Unreachable("no receiver".into()).into();
        assert!(matches!(err, HostError::PageUnreachable(_)));

        let err: HostError = PageError::BadSelector("div >".into()).into();
        assert!(matches!(err, HostError::Backend(_)));
    }

    #[test]
    fn requests_serialize_with_kind_tags() {
        let request = PageRequest::Greedy(GreedyBatch {
            selectors: vec![Selector::Structural("#cancel".into())],
            reason: Vec::new(),
        });
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"kind\":\"greedy\""));
        assert!(json.contains("#cancel"));

        let back: PageRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, PageRequest::Greedy(_)));
    }
}
