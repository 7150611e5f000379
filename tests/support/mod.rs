#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use cancelkit::catalog::Catalog;
use cancelkit::config::{ExhaustedPolicy, PolicyChoice, Timing};
use cancelkit::engine::Engine;
use cancelkit::host::sim::SimHost;
use cancelkit::notify::{ConfirmAnswer, Notification, NotificationSink, Severity};
use cancelkit::storage::{MemoryStorage, Storage};

pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Production `Timing` shrunk so timer scenarios finish in milliseconds.
pub fn quick_timing() -> Timing {
    Timing {
        poll_interval: ms(5),
        settle: ms(1),
        settle_slow: ms(2),
        reason_settle: ms(1),
        highlight_pause: ms(1),
        nav_settle: ms(1),
        locate_budget: ms(30),
        indicator_budget: ms(30),
        probe_timeout: ms(500),
        step_timeout: ms(500),
        overall_timeout: ms(1500),
        step_delay: ms(1),
        reinject_delay: ms(1),
        max_navigations: 3,
        max_clicks: 5,
    }
}

/// Notification sink that records everything and answers confirmation
/// prompts with a scripted reply.
#[derive(Default)]
pub struct CapturingNotifier {
    notes: Mutex<Vec<Notification>>,
    confirms: Mutex<Vec<Notification>>,
    answer: Mutex<Option<ConfirmAnswer>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn answer_with(&self, answer: ConfirmAnswer) {
        *self.answer.lock().await = Some(answer);
    }

    pub async fn notes(&self) -> Vec<Notification> {
        self.notes.lock().await.clone()
    }

    pub async fn confirm_count(&self) -> usize {
        self.confirms.lock().await.len()
    }

    pub async fn count_with_severity(&self, severity: Severity) -> usize {
        self.notes
            .lock()
            .await
            .iter()
            .filter(|n| n.severity == severity)
            .count()
    }
}

#[async_trait]
impl NotificationSink for CapturingNotifier {
    async fn notify(&self, note: Notification) {
        self.notes.lock().await.push(note);
    }

    async fn confirm(&self, note: Notification) -> Option<ConfirmAnswer> {
        self.confirms.lock().await.push(note);
        *self.answer.lock().await
    }
}

/// Everything a session test needs, wired over the simulated host and
/// in-memory storage.
pub struct Rig {
    pub catalog: Arc<Catalog>,
    pub storage: Arc<MemoryStorage>,
    pub host: Arc<SimHost>,
    pub notifier: Arc<CapturingNotifier>,
    pub engine: Arc<Engine>,
}

pub fn rig(catalog_toml: &str) -> Rig {
    rig_with(catalog_toml, ExhaustedPolicy::Failure, quick_timing())
}

pub fn rig_with(catalog_toml: &str, on_exhausted: ExhaustedPolicy, timing: Timing) -> Rig {
    let catalog = Arc::new(Catalog::load_str(catalog_toml).expect("test catalog parses"));
    let storage = Arc::new(MemoryStorage::new());
    let host = Arc::new(SimHost::new(timing.clone()));
    let notifier = Arc::new(CapturingNotifier::new());
    let engine = Arc::new(Engine::new(
        catalog.clone(),
        storage.clone() as Arc<dyn Storage>,
        host.clone(),
        notifier.clone(),
        PolicyChoice::Auto,
        on_exhausted,
        timing,
    ));
    Rig {
        catalog,
        storage,
        host,
        notifier,
        engine,
    }
}
