mod support;

use cancelkit::catalog::{CancelStep, StepAction};
use cancelkit::executor::perform;
use cancelkit::host::{GreedyBatch, PageRequest, PageResponse, StepBatch, StepOutcome};
use cancelkit::models::StepResult;
use cancelkit::page::{ClickEffect, FixtureDom};
use cancelkit::selector::Selector;

use support::quick_timing;

fn sel(raw: &str) -> Selector {
    Selector::parse(raw).expect("test selector parses")
}

fn click_step(selector: &str) -> CancelStep {
    CancelStep {
        selectors: vec![sel(selector)],
        action: StepAction::Click,
        page_pattern: None,
        optional: false,
        wait: None,
    }
}

async fn run(page: &FixtureDom, request: PageRequest) -> StepOutcome {
    match perform(page, &request, &quick_timing()).await.unwrap() {
        PageResponse::Step(outcome) => outcome,
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn click_highlights_scrolls_and_reports_navigation() {
    let page = FixtureDom::new("https://svc.example/account");
    let button = page.insert("button", &[("id", "cancel")], "Cancel").await;
    page.on_click(
        button,
        ClickEffect::SetUrl("https://svc.example/cancelplan".into()),
    )
    .await;

    let outcome = run(
        &page,
        PageRequest::Steps(StepBatch {
            steps: vec![click_step("#cancel")],
            reason: Vec::new(),
        }),
    )
    .await;

    assert_eq!(
        outcome.result,
        StepResult::Navigating {
            next_url: Some("https://svc.example/cancelplan".into())
        }
    );
    assert_eq!(outcome.steps_consumed, 1);
    assert_eq!(outcome.actions, 1);
    assert!(page.was_scrolled_to(button).await);
    assert!(page.is_highlighted(button).await);
    assert_eq!(page.click_count(button).await, 1);
}

#[tokio::test]
async fn click_that_stays_on_the_page_succeeds() {
    let page = FixtureDom::new("https://svc.example/account");
    let button = page.insert("button", &[("id", "confirm")], "Yes, cancel").await;

    let outcome = run(
        &page,
        PageRequest::Steps(StepBatch {
            steps: vec![click_step("#confirm")],
            reason: Vec::new(),
        }),
    )
    .await;

    assert_eq!(outcome.result, StepResult::Succeeded);
    assert_eq!(page.click_count(button).await, 1);
}

#[tokio::test]
async fn select_sets_the_value_and_fires_change() {
    let page = FixtureDom::new("https://svc.example/survey");
    let control = page.insert("select", &[("id", "why")], "").await;

    let outcome = run(
        &page,
        PageRequest::Steps(StepBatch {
            steps: vec![CancelStep {
                selectors: vec![sel("#why")],
                action: StepAction::Select {
                    value: "too-expensive".into(),
                },
                page_pattern: None,
                optional: false,
                wait: None,
            }],
            reason: Vec::new(),
        }),
    )
    .await;

    assert_eq!(outcome.result, StepResult::Succeeded);
    assert_eq!(page.value_of(control).await, "too-expensive");
    assert_eq!(page.change_count(control).await, 1);
}

#[tokio::test]
async fn navigate_steps_hand_the_url_to_the_host() {
    let page = FixtureDom::new("https://svc.example/account");

    let outcome = run(
        &page,
        PageRequest::Steps(StepBatch {
            steps: vec![CancelStep {
                selectors: Vec::new(),
                action: StepAction::Navigate {
                    url: "https://svc.example/cancelplan".into(),
                },
                page_pattern: None,
                optional: false,
                wait: None,
            }],
            reason: Vec::new(),
        }),
    )
    .await;

    assert_eq!(
        outcome.result,
        StepResult::Navigating {
            next_url: Some("https://svc.example/cancelplan".into())
        }
    );
    assert_eq!(page.current_url().await, "https://svc.example/cancelplan");
}

#[tokio::test]
async fn absent_optional_steps_are_skipped() {
    let page = FixtureDom::new("https://svc.example/survey");
    let finish = page.insert("button", &[("id", "finish")], "Finish").await;

    let mut optional = click_step("#feedback");
    optional.optional = true;

    let outcome = run(
        &page,
        PageRequest::Steps(StepBatch {
            steps: vec![optional, click_step("#finish")],
            reason: Vec::new(),
        }),
    )
    .await;

    assert_eq!(outcome.result, StepResult::Succeeded);
    assert_eq!(outcome.steps_consumed, 2);
    assert_eq!(outcome.actions, 1);
    assert_eq!(page.click_count(finish).await, 1);
}

#[tokio::test]
async fn absent_required_step_fails_with_the_selector_in_the_reason() {
    let page = FixtureDom::new("https://svc.example/account");

    let outcome = run(
        &page,
        PageRequest::Steps(StepBatch {
            steps: vec![click_step("#missing")],
            reason: Vec::new(),
        }),
    )
    .await;

    let StepResult::Failed { reason } = outcome.result else {
        panic!("expected failure, got {:?}", outcome.result);
    };
    assert!(reason.contains("#missing"), "reason was {reason:?}");
    assert_eq!(outcome.steps_consumed, 0);
}

#[tokio::test]
async fn greedy_without_a_match_reads_the_url_for_a_verdict() {
    let batch = || {
        PageRequest::Greedy(GreedyBatch {
            selectors: vec![sel("#cancel")],
            reason: Vec::new(),
        })
    };

    let plain = FixtureDom::new("https://svc.example/account");
    let outcome = run(&plain, batch()).await;
    assert_eq!(outcome.result, StepResult::NoActionableElement);

    let confirmed = FixtureDom::new("https://svc.example/cancel/confirm");
    let outcome = run(&confirmed, batch()).await;
    assert_eq!(outcome.result, StepResult::Succeeded);
    assert_eq!(outcome.actions, 0);
}

#[tokio::test]
async fn reason_selection_ticks_once_and_reports_it() {
    let page = FixtureDom::new("https://svc.example/cancelplan");
    let radio = page
        .insert("input", &[("type", "radio"), ("id", "too-expensive")], "")
        .await;
    let button = page.insert("button", &[("id", "cancel")], "Cancel").await;

    let request = || {
        PageRequest::Greedy(GreedyBatch {
            selectors: vec![sel("#cancel")],
            reason: vec![sel("input[type='radio']")],
        })
    };

    let outcome = run(&page, request()).await;
    assert!(outcome.reason_selected);
    assert!(page.checked_of(radio).await);
    assert_eq!(page.change_count(radio).await, 1);

    // A second invocation sees the control already checked: still reported
    // handled, but no second change event.
    let outcome = run(&page, request()).await;
    assert!(outcome.reason_selected);
    assert_eq!(page.change_count(radio).await, 1);
    assert_eq!(page.click_count(button).await, 2);
}

#[tokio::test]
async fn absent_reason_control_is_not_an_error() {
    let page = FixtureDom::new("https://svc.example/cancelplan");
    let button = page.insert("button", &[("id", "cancel")], "Cancel").await;

    let outcome = run(
        &page,
        PageRequest::Greedy(GreedyBatch {
            selectors: vec![sel("#cancel")],
            reason: vec![sel("input[type='radio']")],
        }),
    )
    .await;

    assert!(!outcome.reason_selected);
    assert_eq!(outcome.result, StepResult::Succeeded);
    assert_eq!(page.click_count(button).await, 1);
}
