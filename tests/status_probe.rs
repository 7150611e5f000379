mod support;

use std::sync::Arc;

use cancelkit::catalog::Catalog;
use cancelkit::host::sim::SimHost;
use cancelkit::models::{ServiceId, SubscriptionStatus};
use cancelkit::page::FixtureDom;
use cancelkit::probe::StatusProber;
use cancelkit::storage::{MemoryStorage, Storage};

use support::{ms, quick_timing};

const CATALOG: &str = r##"
[[services]]
id = "demo"
name = "Demo"
domain = "demo.example"
account_url = "https://demo.example/account"
active_indicators = ["#sub-badge"]
inactive_indicators = [".cancelled-note"]
next_billing = ["#billing"]
"##;

struct ProbeRig {
    catalog: Catalog,
    storage: Arc<MemoryStorage>,
    host: Arc<SimHost>,
    prober: StatusProber,
}

fn probe_rig() -> ProbeRig {
    let catalog = Catalog::load_str(CATALOG).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let host = Arc::new(SimHost::new(quick_timing()));
    let prober = StatusProber::new(
        storage.clone() as Arc<dyn Storage>,
        host.clone(),
        quick_timing(),
    );
    ProbeRig {
        catalog,
        storage,
        host,
        prober,
    }
}

fn demo_id() -> ServiceId {
    ServiceId::from_string("demo")
}

#[tokio::test]
async fn present_indicator_reads_active_and_is_cached() {
    let rig = probe_rig();
    let page = Arc::new(FixtureDom::new(""));
    page.insert("div", &[("id", "sub-badge")], "Premium").await;
    page.insert("span", &[("id", "billing")], "Next billing date: 3/15/2026")
        .await;
    rig.host.stage("https://demo.example/account", page).await;

    let service = rig.catalog.get(&demo_id()).unwrap();
    let record = rig.prober.check(service).await;

    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.next_billing.as_deref(), Some("3/15/2026"));

    let cached = rig.storage.get_status(&demo_id()).await.unwrap().unwrap();
    assert_eq!(cached.status, SubscriptionStatus::Active);
    assert!(rig.host.open_tabs().await.is_empty(), "probe tab left open");

    // Probes open in the background.
    assert_eq!(
        rig.host.opens().await,
        vec![("https://demo.example/account".to_string(), false)]
    );
}

#[tokio::test]
async fn missing_indicators_read_unknown() {
    let rig = probe_rig();
    let page = Arc::new(FixtureDom::new(""));
    page.insert("h1", &[], "Your account").await;
    rig.host.stage("https://demo.example/account", page.clone()).await;

    let service = rig.catalog.get(&demo_id()).unwrap();
    let record = rig.prober.check(service).await;
    assert_eq!(record.status, SubscriptionStatus::Unknown);

    // Adding the badge and rerunning overwrites the cached record.
    page.insert("div", &[("id", "sub-badge")], "Premium").await;
    let record = rig.prober.check(service).await;
    assert_eq!(record.status, SubscriptionStatus::Active);
    let cached = rig.storage.get_status(&demo_id()).await.unwrap().unwrap();
    assert_eq!(cached.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn inactive_indicator_outranks_active() {
    let rig = probe_rig();
    let page = Arc::new(FixtureDom::new(""));
    // A cancelled-state page still showing an upsell badge.
    page.insert("div", &[("id", "sub-badge")], "Rejoin Premium").await;
    page.insert("p", &[("class", "cancelled-note")], "Your plan has ended")
        .await;
    rig.host.stage("https://demo.example/account", page).await;

    let service = rig.catalog.get(&demo_id()).unwrap();
    let record = rig.prober.check(service).await;
    assert_eq!(record.status, SubscriptionStatus::Inactive);
    assert!(record.next_billing.is_none());
}

#[tokio::test]
async fn refused_tab_reads_error() {
    let rig = probe_rig();
    rig.host.refuse_open("demo.example").await;

    let service = rig.catalog.get(&demo_id()).unwrap();
    let record = rig.prober.check(service).await;
    assert_eq!(record.status, SubscriptionStatus::Error);

    let cached = rig.storage.get_status(&demo_id()).await.unwrap().unwrap();
    assert_eq!(cached.status, SubscriptionStatus::Error);
}

#[tokio::test]
async fn silent_page_reads_timeout_and_still_closes_the_tab() {
    let mut timing = quick_timing();
    timing.probe_timeout = ms(80);

    let catalog = Catalog::load_str(CATALOG).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let host = Arc::new(SimHost::new(timing.clone()));
    host.never_load("demo.example").await;
    let prober = StatusProber::new(storage.clone() as Arc<dyn Storage>, host.clone(), timing);

    let service = catalog.get(&demo_id()).unwrap();
    let record = prober.check(service).await;

    assert_eq!(record.status, SubscriptionStatus::Timeout);
    assert!(host.open_tabs().await.is_empty(), "probe tab left open");
}
