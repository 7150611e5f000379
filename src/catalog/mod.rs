//! The selector catalog: which services exist, where their account and
//! cancellation pages live, and which selectors drive status probes and
//! cancellation flows.
//!
//! The catalog is loaded once at startup and injected read-only into the
//! engine. A built-in table ships with the crate; a TOML file with the same
//! shape can replace it for custom services.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration_opt;
use crate::models::ServiceId;
use crate::selector::{Selector, SelectorError};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate service id {0:?}")]
    DuplicateService(String),
    #[error("service {service:?}: invalid id")]
    InvalidId {
        service: String,
        #[source]
        source: crate::models::ServiceIdError,
    },
    #[error("service {service:?}, {field}: {source}")]
    InvalidSelector {
        service: String,
        field: &'static str,
        #[source]
        source: SelectorError,
    },
    #[error("service {service:?}, step {index}: {problem}")]
    InvalidStep {
        service: String,
        index: usize,
        problem: String,
    },
}

/// What one cancellation step does once its element is located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Click,
    /// Set a form control's value and dispatch a change signal.
    Select { value: String },
    /// Ask the host to navigate the tab; no element is located.
    Navigate { url: String },
}

/// One unit of a declarative cancellation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelStep {
    /// Candidate selectors, tried in order within each locator poll.
    pub selectors: Vec<Selector>,
    #[serde(flatten)]
    pub action: StepAction,
    /// URL substring guard; the step only fires when the current page URL
    /// contains it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_pattern: Option<String>,
    /// Absent optional steps are skipped instead of failing the flow.
    #[serde(default)]
    pub optional: bool,
    /// Locator budget for this step, overriding the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<Duration>,
}

/// Immutable description of one supported service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub name: String,
    pub domain: String,
    /// Brand color, surfaced to UI layers alongside status.
    pub color: String,
    /// Account/membership page probed for status indicators.
    pub account_url: String,
    /// Where cancellation starts; falls back to `account_url` when absent.
    pub cancel_url: Option<String>,
    /// Presence of any of these implies an active subscription.
    pub active_indicators: Vec<Selector>,
    /// Presence of any of these implies an already-cancelled subscription.
    /// Checked before the active indicators.
    pub inactive_indicators: Vec<Selector>,
    /// Where to scrape the next-billing text from, best effort.
    pub next_billing: Vec<Selector>,
    /// Service-specific cancel controls for the greedy policy, consulted
    /// before the catalog-wide defaults.
    pub cancel_selectors: Vec<Selector>,
    /// Declarative multi-page flow; empty means greedy-only.
    pub sequence: Vec<CancelStep>,
    /// A cancellation-reason control (radio/checkbox) to tick once before
    /// acting, where the flow demands one.
    pub reason_selector: Option<Selector>,
    /// Heavily client-rendered pages get the longer settle delay.
    pub slow_render: bool,
}

impl ServiceDescriptor {
    /// URL a cancellation session opens first.
    pub fn cancel_start_url(&self) -> &str {
        self.cancel_url.as_deref().unwrap_or(&self.account_url)
    }
}

/// The full service table plus the generic fallback cancel selectors.
#[derive(Debug, Clone)]
pub struct Catalog {
    services: Vec<ServiceDescriptor>,
    default_cancel_selectors: Vec<Selector>,
    default_reason_selectors: Vec<Selector>,
}

impl Catalog {
    /// The catalog baked into the crate.
    pub fn builtin() -> Result<Self> {
        Self::load_str(include_str!("builtin.toml")).context("Built-in catalog is invalid")
    }

    /// Load a catalog from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file {}", path.display()))?;
        Self::load_str(&content)
            .with_context(|| format!("Failed to load catalog from {}", path.display()))
    }

    pub fn load_str(content: &str) -> Result<Self> {
        let raw: RawCatalog = toml::from_str(content).context("Failed to parse catalog TOML")?;
        let catalog = Self::from_raw(raw)?;
        Ok(catalog)
    }

    fn from_raw(raw: RawCatalog) -> Result<Self, CatalogError> {
        let default_cancel_selectors = parse_selectors(
            "<defaults>",
            "default_cancel_selectors",
            &raw.default_cancel_selectors,
        )?;
        let default_reason_selectors = parse_selectors(
            "<defaults>",
            "default_reason_selectors",
            &raw.default_reason_selectors,
        )?;

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(raw.services.len());
        for service in raw.services {
            let descriptor = service.validate()?;
            if !seen.insert(descriptor.id.clone()) {
                return Err(CatalogError::DuplicateService(descriptor.id.to_string()));
            }
            services.push(descriptor);
        }

        Ok(Self {
            services,
            default_cancel_selectors,
            default_reason_selectors,
        })
    }

    pub fn get(&self, id: &ServiceId) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| &s.id == id)
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn default_cancel_selectors(&self) -> &[Selector] {
        &self.default_cancel_selectors
    }

    /// Service-specific selectors first, generic fallbacks second; the
    /// greedy policy scans this whole list each poll cycle.
    pub fn combined_cancel_selectors(&self, service: &ServiceDescriptor) -> Vec<Selector> {
        let mut combined = service.cancel_selectors.clone();
        combined.extend(self.default_cancel_selectors.iter().cloned());
        combined
    }

    /// Reason controls to try before acting, service-specific first.
    pub fn combined_reason_selectors(&self, service: &ServiceDescriptor) -> Vec<Selector> {
        let mut combined: Vec<Selector> = service.reason_selector.iter().cloned().collect();
        combined.extend(self.default_reason_selectors.iter().cloned());
        combined
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    default_cancel_selectors: Vec<String>,
    #[serde(default)]
    default_reason_selectors: Vec<String>,
    #[serde(default, rename = "services")]
    services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    id: String,
    name: String,
    domain: String,
    #[serde(default = "default_color")]
    color: String,
    account_url: String,
    #[serde(default)]
    cancel_url: Option<String>,
    #[serde(default)]
    active_indicators: Vec<String>,
    #[serde(default)]
    inactive_indicators: Vec<String>,
    #[serde(default)]
    next_billing: Vec<String>,
    #[serde(default)]
    cancel_selectors: Vec<String>,
    #[serde(default)]
    reason_selector: Option<String>,
    #[serde(default)]
    slow_render: bool,
    #[serde(default, rename = "steps")]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    selectors: Vec<String>,
    #[serde(default = "default_action")]
    action: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    page_pattern: Option<String>,
    #[serde(default)]
    optional: bool,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    wait: Option<Duration>,
}

fn default_color() -> String {
    "#777777".to_string()
}

fn default_action() -> String {
    "click".to_string()
}

impl RawService {
    fn validate(self) -> Result<ServiceDescriptor, CatalogError> {
        let id = ServiceId::parse(&self.id).map_err(|source| CatalogError::InvalidId {
            service: self.id.clone(),
            source,
        })?;

        let active_indicators = parse_selectors(&self.id, "active_indicators", &self.active_indicators)?;
        let inactive_indicators =
            parse_selectors(&self.id, "inactive_indicators", &self.inactive_indicators)?;
        let next_billing = parse_selectors(&self.id, "next_billing", &self.next_billing)?;
        let cancel_selectors = parse_selectors(&self.id, "cancel_selectors", &self.cancel_selectors)?;
        let reason_selector = match &self.reason_selector {
            Some(raw) => Some(parse_selector(&self.id, "reason_selector", raw)?),
            None => None,
        };

        let mut sequence = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            sequence.push(step.validate(&self.id, index)?);
        }

        Ok(ServiceDescriptor {
            id,
            name: self.name,
            domain: self.domain,
            color: self.color,
            account_url: self.account_url,
            cancel_url: self.cancel_url,
            active_indicators,
            inactive_indicators,
            next_billing,
            cancel_selectors,
            sequence,
            reason_selector,
            slow_render: self.slow_render,
        })
    }
}

impl RawStep {
    fn validate(&self, service: &str, index: usize) -> Result<CancelStep, CatalogError> {
        let action = match self.action.as_str() {
            "click" => StepAction::Click,
            "select" => {
                let value = self.value.clone().ok_or_else(|| CatalogError::InvalidStep {
                    service: service.to_string(),
                    index,
                    problem: "select steps need a value".to_string(),
                })?;
                StepAction::Select { value }
            }
            "navigate" => {
                let url = self.url.clone().ok_or_else(|| CatalogError::InvalidStep {
                    service: service.to_string(),
                    index,
                    problem: "navigate steps need a url".to_string(),
                })?;
                StepAction::Navigate { url }
            }
            other => {
                return Err(CatalogError::InvalidStep {
                    service: service.to_string(),
                    index,
                    problem: format!("unknown action {other:?}"),
                })
            }
        };

        if self.selectors.is_empty() && !matches!(action, StepAction::Navigate { .. }) {
            return Err(CatalogError::InvalidStep {
                service: service.to_string(),
                index,
                problem: "click and select steps need at least one selector".to_string(),
            });
        }

        let selectors =
            parse_selectors(service, "steps", &self.selectors).map_err(|err| match err {
                CatalogError::InvalidSelector { source, .. } => CatalogError::InvalidStep {
                    service: service.to_string(),
                    index,
                    problem: source.to_string(),
                },
                other => other,
            })?;

        Ok(CancelStep {
            selectors,
            action,
            page_pattern: self.page_pattern.clone(),
            optional: self.optional,
            wait: self.wait,
        })
    }
}

fn parse_selector(
    service: &str,
    field: &'static str,
    raw: &str,
) -> Result<Selector, CatalogError> {
    Selector::parse(raw).map_err(|source| CatalogError::InvalidSelector {
        service: service.to_string(),
        field,
        source,
    })
}

fn parse_selectors(
    service: &str,
    field: &'static str,
    raw: &[String],
) -> Result<Vec<Selector>, CatalogError> {
    raw.iter().map(|s| parse_selector(service, field, s)).collect()
}
