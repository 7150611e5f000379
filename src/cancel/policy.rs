//! Step selection for cancellation sessions.
//!
//! Two strategies sit behind [`StepPolicy`]. A declarative sequence walks
//! the service's authored steps in order, gated by per-step URL patterns.
//! The greedy fallback just keeps clicking the highest-priority cancel
//! control the combined selector list can find, page after page, until a
//! confirmation URL or the click budget stops it.

use crate::catalog::{CancelStep, Catalog, ServiceDescriptor};
use crate::config::{PolicyChoice, Timing};
use crate::executor::is_confirmation_url;
use crate::host::{GreedyBatch, PageRequest, StepBatch};
use crate::selector::Selector;

/// What to do on the current page.
#[derive(Debug)]
pub enum Plan {
    /// Send this request into the page.
    Execute(PageRequest),
    /// Nothing runnable here; wait for the next navigation.
    Hold,
    /// The flow is complete.
    Finished,
    /// The click budget is spent.
    Exhausted,
}

pub enum StepPolicy {
    Sequence { steps: Vec<CancelStep>, cursor: usize },
    Greedy { selectors: Vec<Selector> },
}

impl StepPolicy {
    pub fn for_service(
        service: &ServiceDescriptor,
        catalog: &Catalog,
        choice: PolicyChoice,
    ) -> Self {
        let use_sequence = match choice {
            PolicyChoice::Auto => !service.sequence.is_empty(),
            PolicyChoice::Greedy => false,
            PolicyChoice::Sequence => {
                if service.sequence.is_empty() {
                    tracing::debug!(
                        service = %service.id,
                        "sequence policy requested but the service has no steps, using greedy"
                    );
                    false
                } else {
                    true
                }
            }
        };

        if use_sequence {
            StepPolicy::Sequence {
                steps: service.sequence.clone(),
                cursor: 0,
            }
        } else {
            StepPolicy::Greedy {
                selectors: catalog.combined_cancel_selectors(service),
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepPolicy::Sequence { .. } => "sequence",
            StepPolicy::Greedy { .. } => "greedy",
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            StepPolicy::Sequence { steps, cursor } => *cursor >= steps.len(),
            StepPolicy::Greedy { .. } => false,
        }
    }

    /// Decide what to run on the page at `url`.
    ///
    /// For a sequence this is the longest run of pending steps whose URL
    /// patterns all match the current page; steps for later pages stay
    /// queued. An empty run means hold for navigation, except off a
    /// confirmation URL after at least one action, which means done.
    pub fn plan(
        &self,
        url: &str,
        actions_so_far: u32,
        clicks: u32,
        reason: Vec<Selector>,
        timing: &Timing,
    ) -> Plan {
        match self {
            StepPolicy::Sequence { steps, cursor } => {
                if *cursor >= steps.len() {
                    return Plan::Finished;
                }
                let runnable: Vec<CancelStep> = steps[*cursor..]
                    .iter()
                    .take_while(|step| {
                        step.page_pattern
                            .as_deref()
                            .map(|pattern| url.contains(pattern))
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect();
                if runnable.is_empty() {
                    if actions_so_far > 0 && is_confirmation_url(url) {
                        Plan::Finished
                    } else {
                        Plan::Hold
                    }
                } else {
                    Plan::Execute(PageRequest::Steps(StepBatch {
                        steps: runnable,
                        reason,
                    }))
                }
            }
            StepPolicy::Greedy { selectors } => {
                if clicks >= timing.max_clicks {
                    Plan::Exhausted
                } else {
                    Plan::Execute(PageRequest::Greedy(GreedyBatch {
                        selectors: selectors.clone(),
                        reason,
                    }))
                }
            }
        }
    }

    /// Move the cursor past steps the page reported finished.
    pub fn advance(&mut self, consumed: usize) {
        if let StepPolicy::Sequence { steps, cursor } = self {
            *cursor = (*cursor + consumed).min(steps.len());
        }
    }
}
