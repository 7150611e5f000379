//! In-page action execution.
//!
//! Interprets one [`PageRequest`] against the document a tab currently
//! shows: tick a cancellation-reason control, walk declarative steps, click
//! the best greedy candidate, or read status indicators. All effects go
//! through [`PageDom`], so the same interpreter runs against the live
//! browser and the in-memory fixture.

use std::sync::OnceLock;

use regex::Regex;
use tokio::time::sleep;

use crate::catalog::StepAction;
use crate::config::Timing;
use crate::host::{GreedyBatch, PageRequest, PageResponse, ProbeBatch, ProbeOutcome, StepBatch, StepOutcome};
use crate::locator::{locate, locate_once};
use crate::models::{StepResult, SubscriptionStatus};
use crate::page::{ElementHandle, PageDom, PageError};
use crate::selector::{normalize_text, Selector};

/// Heuristic for "the flow is done": cancellation endpoints land on URLs
/// like `/cancel/confirm`, `/cancelplan/success`, `/membership-complete`.
pub fn is_confirmation_url(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    ["confirm", "success", "complete"]
        .iter()
        .any(|marker| url.contains(marker))
}

/// Run one request against the current document.
pub async fn perform(
    page: &dyn PageDom,
    request: &PageRequest,
    timing: &Timing,
) -> Result<PageResponse, PageError> {
    match request {
        PageRequest::Steps(batch) => Ok(PageResponse::Step(run_steps(page, batch, timing).await?)),
        PageRequest::Greedy(batch) => {
            Ok(PageResponse::Step(run_greedy(page, batch, timing).await?))
        }
        PageRequest::Probe(batch) => Ok(PageResponse::Probe(run_probe(page, batch, timing).await?)),
    }
}

enum ClickVerdict {
    Stayed,
    Navigated(String),
}

/// Scroll, highlight, pause so a watching user can follow along, click,
/// then give any triggered navigation a moment to commit before comparing
/// URLs.
async fn click_control(
    page: &dyn PageDom,
    element: ElementHandle,
    timing: &Timing,
) -> Result<ClickVerdict, PageError> {
    let before = page.url().await?;
    page.scroll_into_view(element).await?;
    page.highlight(element).await?;
    sleep(timing.highlight_pause).await;
    page.click(element).await?;
    sleep(timing.nav_settle).await;
    let after = page.url().await?;
    if after != before {
        Ok(ClickVerdict::Navigated(after))
    } else {
        Ok(ClickVerdict::Stayed)
    }
}

/// Tick the first present reason control. Reports whether one was handled
/// so the session stops sending reason selectors on later pages; a control
/// that is already ticked still counts as handled.
async fn select_reason(
    page: &dyn PageDom,
    reason: &[Selector],
    timing: &Timing,
) -> Result<bool, PageError> {
    let Some(element) = locate_once(page, reason).await? else {
        return Ok(false);
    };
    if page.is_checked(element).await? {
        return Ok(true);
    }
    page.set_checked(element, true).await?;
    page.fire_change(element).await?;
    sleep(timing.reason_settle).await;
    Ok(true)
}

async fn run_steps(
    page: &dyn PageDom,
    batch: &StepBatch,
    timing: &Timing,
) -> Result<StepOutcome, PageError> {
    let mut consumed = 0usize;
    let mut actions = 0u32;
    let mut reason_selected = false;
    if !batch.reason.is_empty() {
        reason_selected = select_reason(page, &batch.reason, timing).await?;
    }

    for step in &batch.steps {
        if let StepAction::Navigate { url } = &step.action {
            page.navigate(url).await?;
            return Ok(StepOutcome {
                result: StepResult::Navigating {
                    next_url: Some(url.clone()),
                },
                steps_consumed: consumed + 1,
                actions: actions + 1,
                reason_selected,
            });
        }

        let budget = step.wait.unwrap_or(timing.locate_budget);
        let Some(element) = locate(page, &step.selectors, budget, timing.poll_interval).await?
        else {
            if step.optional {
                tracing::debug!(step = consumed, "optional step matched nothing, skipping");
                consumed += 1;
                continue;
            }
            return Ok(StepOutcome {
                result: StepResult::Failed {
                    reason: format!("Element not found: {}", describe_selectors(&step.selectors)),
                },
                steps_consumed: consumed,
                actions,
                reason_selected,
            });
        };

        consumed += 1;
        actions += 1;
        if let StepAction::Select { value } = &step.action {
            page.set_value(element, value).await?;
            page.fire_change(element).await?;
        } else if let ClickVerdict::Navigated(url) = click_control(page, element, timing).await? {
            return Ok(StepOutcome {
                result: StepResult::Navigating { next_url: Some(url) },
                steps_consumed: consumed,
                actions,
                reason_selected,
            });
        }
    }

    Ok(StepOutcome {
        result: StepResult::Succeeded,
        steps_consumed: consumed,
        actions,
        reason_selected,
    })
}

async fn run_greedy(
    page: &dyn PageDom,
    batch: &GreedyBatch,
    timing: &Timing,
) -> Result<StepOutcome, PageError> {
    let mut reason_selected = false;
    if !batch.reason.is_empty() {
        reason_selected = select_reason(page, &batch.reason, timing).await?;
    }

    let found = locate(page, &batch.selectors, timing.locate_budget, timing.poll_interval).await?;
    let Some(element) = found else {
        let result = if is_confirmation_url(&page.url().await?) {
            StepResult::Succeeded
        } else {
            StepResult::NoActionableElement
        };
        return Ok(StepOutcome {
            result,
            steps_consumed: 0,
            actions: 0,
            reason_selected,
        });
    };

    let result = match click_control(page, element, timing).await? {
        ClickVerdict::Navigated(url) => StepResult::Navigating { next_url: Some(url) },
        ClickVerdict::Stayed => StepResult::Succeeded,
    };
    Ok(StepOutcome {
        result,
        steps_consumed: 0,
        actions: 1,
        reason_selected,
    })
}

/// Inactive indicators trump active ones, since cancelled-state pages keep
/// showing resubscribe buttons that would otherwise read as active. Only
/// the active sweep polls; the others are single passes.
async fn run_probe(
    page: &dyn PageDom,
    batch: &ProbeBatch,
    timing: &Timing,
) -> Result<ProbeOutcome, PageError> {
    if locate_once(page, &batch.inactive).await?.is_some() {
        return Ok(ProbeOutcome {
            status: SubscriptionStatus::Inactive,
            next_billing: None,
        });
    }

    let active = locate(
        page,
        &batch.active,
        timing.indicator_budget,
        timing.poll_interval,
    )
    .await?;
    if active.is_none() {
        return Ok(ProbeOutcome {
            status: SubscriptionStatus::Unknown,
            next_billing: None,
        });
    }

    let next_billing = match locate_once(page, &batch.next_billing).await? {
        Some(element) => extract_billing_date(&page.text(element).await?),
        None => None,
    };
    Ok(ProbeOutcome {
        status: SubscriptionStatus::Active,
        next_billing,
    })
}

/// Pull a date out of next-billing text like "Your next billing date is
/// March 5, 2026". Falls back to the whole normalized text when no date
/// shape is recognized.
fn extract_billing_date(text: &str) -> Option<String> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return None;
    }
    match billing_date_pattern().find(&normalized) {
        Some(found) => Some(found.as_str().to_string()),
        None => Some(normalized),
    }
}

fn billing_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{1,2}/\d{1,2}/\d{2,4})|([A-Z][a-z]+ \d{1,2},? \d{4})|(\d{4}-\d{2}-\d{2})")
            .expect("valid date pattern")
    })
}

fn describe_selectors(selectors: &[Selector]) -> String {
    selectors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_urls_match_case_insensitively() {
        assert!(is_confirmation_url("https://svc.example/cancel/CONFIRM"));
        assert!(is_confirmation_url("https://svc.example/cancelplan/success?x=1"));
        assert!(is_confirmation_url("https://svc.example/membership-complete"));
        assert!(!is_confirmation_url("https://svc.example/account"));
    }

    #[test]
    fn billing_dates_extract_common_shapes() {
        assert_eq!(
            extract_billing_date("Next billing date: 3/15/2026"),
            Some("3/15/2026".into())
        );
        assert_eq!(
            extract_billing_date("Renews on March 5, 2026."),
            Some("March 5, 2026".into())
        );
        assert_eq!(
            extract_billing_date("renewal  2026-04-01 "),
            Some("2026-04-01".into())
        );
        assert_eq!(
            extract_billing_date("  next   cycle soon  "),
            Some("next cycle soon".into())
        );
        assert_eq!(extract_billing_date("   "), None);
    }
}
