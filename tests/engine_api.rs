mod support;

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use cancelkit::api::{Request, Response};
use cancelkit::catalog::Catalog;
use cancelkit::clock::FixedClock;
use cancelkit::config::ExhaustedPolicy;
use cancelkit::engine::Engine;
use cancelkit::host::sim::SimHost;
use cancelkit::models::{
    HistoryEntry, RecoveryRecord, ServiceId, Settings, SubscriptionStatus,
};
use cancelkit::notify::ConfirmAnswer;
use cancelkit::page::FixtureDom;
use cancelkit::storage::{MemoryStorage, Storage};

use support::{quick_timing, rig, CapturingNotifier};

const CATALOG: &str = r##"
[[services]]
id = "alpha"
name = "Alpha"
domain = "alpha.example"
account_url = "https://alpha.example/account"
active_indicators = ["#badge"]

[[services]]
id = "beta"
name = "Beta"
domain = "beta.example"
account_url = "https://beta.example/account"
active_indicators = ["#badge"]
"##;

fn id(raw: &str) -> ServiceId {
    ServiceId::from_string(raw)
}

#[tokio::test]
async fn get_services_reflects_settings_and_cached_status() {
    let rig = rig(CATALOG);

    let mut settings = Settings::default();
    settings.set_enabled(id("beta"), false);
    rig.storage.put_settings(&settings).await.unwrap();

    // Prime a cached status for alpha only.
    let page = Arc::new(FixtureDom::new(""));
    page.insert("div", &[("id", "badge")], "Active").await;
    rig.host.stage("https://alpha.example/account", page).await;
    let Response::Status { record } = rig
        .engine
        .handle(Request::CheckStatus {
            service_id: id("alpha"),
        })
        .await
    else {
        panic!("expected a status response");
    };
    assert_eq!(record.status, SubscriptionStatus::Active);

    let Response::Services { services } = rig.engine.handle(Request::GetServices).await else {
        panic!("expected a services response");
    };
    assert_eq!(services.len(), 2);
    assert_eq!(services[0].id, id("alpha"));
    assert!(services[0].enabled);
    assert_eq!(
        services[0].last_status.as_ref().map(|r| r.status),
        Some(SubscriptionStatus::Active)
    );
    assert_eq!(services[1].id, id("beta"));
    assert!(!services[1].enabled);
    assert!(services[1].last_status.is_none());
}

#[tokio::test]
async fn unknown_service_requests_come_back_as_errors() {
    let rig = rig(CATALOG);

    let response = rig
        .engine
        .handle(Request::CheckStatus {
            service_id: id("nope"),
        })
        .await;
    let Response::Error { message } = response else {
        panic!("expected an error response");
    };
    assert!(message.contains("nope"), "message was {message:?}");

    let Response::CancelResult { outcome } = rig
        .engine
        .handle(Request::CancelSubscription {
            service_id: id("nope"),
        })
        .await
    else {
        panic!("expected a cancel result");
    };
    assert!(!outcome.success);
    assert!(outcome.error_kind.is_none());
}

#[tokio::test]
async fn disabled_services_are_skipped_everywhere() {
    let rig = rig(CATALOG);

    let mut settings = Settings::default();
    settings.set_enabled(id("beta"), false);
    rig.storage.put_settings(&settings).await.unwrap();

    let outcome = rig.engine.cancel(&id("beta"), true).await;
    assert!(!outcome.success);
    assert!(
        outcome.error.as_deref().unwrap_or("").contains("disabled"),
        "unexpected rejection: {outcome:?}"
    );
    assert_eq!(rig.host.open_count().await, 0);

    let records = rig.engine.check_all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].service_id, id("alpha"));
}

#[tokio::test]
async fn confirmation_prompt_gates_the_session() {
    let rig = rig(CATALOG);

    let mut settings = Settings::default();
    settings.confirm_before_cancel = true;
    rig.storage.put_settings(&settings).await.unwrap();

    // No scripted answer: the prompt comes back empty and the session never
    // starts.
    let outcome = rig.engine.cancel(&id("alpha"), false).await;
    assert!(!outcome.success);
    assert!(
        outcome.error.as_deref().unwrap_or("").contains("not confirmed"),
        "unexpected rejection: {outcome:?}"
    );
    assert_eq!(rig.notifier.confirm_count().await, 1);
    assert_eq!(rig.host.open_count().await, 0);

    // An approved prompt lets the session run (and fail on the empty page).
    rig.notifier.answer_with(ConfirmAnswer::Proceed).await;
    let outcome = rig.engine.cancel(&id("alpha"), false).await;
    assert!(outcome.error_kind.is_some(), "session never ran: {outcome:?}");
    assert_eq!(rig.notifier.confirm_count().await, 2);
    assert_eq!(rig.host.open_count().await, 1);

    // `assume_yes` skips the prompt entirely.
    let _ = rig.engine.cancel(&id("alpha"), true).await;
    assert_eq!(rig.notifier.confirm_count().await, 2);
}

#[tokio::test]
async fn history_comes_back_newest_first() {
    let rig = rig(CATALOG);

    let first = HistoryEntry {
        service_id: id("alpha"),
        service_name: "Alpha".into(),
        at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    };
    let second = HistoryEntry {
        service_id: id("beta"),
        service_name: "Beta".into(),
        at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    };
    rig.storage.append_history(&first).await.unwrap();
    rig.storage.append_history(&second).await.unwrap();

    let Response::History { entries } = rig.engine.handle(Request::GetHistory).await else {
        panic!("expected a history response");
    };
    assert_eq!(entries, vec![second, first]);
}

#[tokio::test]
async fn update_settings_round_trips_through_the_engine() {
    let rig = rig(CATALOG);

    let mut settings = Settings::default();
    settings.auto_check = false;
    settings.check_interval_secs = 7200;

    let Response::Settings { settings: echoed } = rig
        .engine
        .handle(Request::UpdateSettings {
            settings: settings.clone(),
        })
        .await
    else {
        panic!("expected a settings response");
    };
    assert!(!echoed.auto_check);

    let Response::Settings { settings: stored } =
        rig.engine.handle(Request::GetSettings).await
    else {
        panic!("expected a settings response");
    };
    assert_eq!(stored.check_interval_secs, 7200);
    assert!(!stored.auto_check);
}

#[tokio::test]
async fn startup_sweep_drops_only_stale_recovery_markers() {
    let timing = quick_timing();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

    let catalog = Arc::new(Catalog::load_str(CATALOG).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let host = Arc::new(SimHost::new(timing.clone()));
    let notifier = Arc::new(CapturingNotifier::new());
    let engine = Engine::new(
        catalog,
        storage.clone() as Arc<dyn Storage>,
        host,
        notifier,
        Default::default(),
        ExhaustedPolicy::Failure,
        timing.clone(),
    )
    .with_clock(Arc::new(FixedClock::new(now)));

    let stale = RecoveryRecord {
        service_id: id("alpha"),
        started_at: now - chrono::Duration::hours(1),
    };
    let fresh = RecoveryRecord {
        service_id: id("beta"),
        started_at: now - chrono::Duration::milliseconds(10),
    };
    storage.put_recovery(&stale).await.unwrap();
    storage.put_recovery(&fresh).await.unwrap();

    engine.startup_sweep().await;

    let left = storage.list_recovery().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].service_id, id("beta"));
}
