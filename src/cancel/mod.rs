//! Cancellation orchestration.
//!
//! [`CancelOrchestrator`] owns the shared dependencies and the in-flight
//! registry; each accepted request becomes one [`session::Session`], which
//! drives a foreground tab from open to verdict. At most one session per
//! service runs at a time.

mod policy;
mod session;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::catalog::{Catalog, ServiceDescriptor};
use crate::clock::{Clock, SystemClock};
use crate::config::{ExhaustedPolicy, PolicyChoice, Timing};
use crate::host::TabHost;
use crate::models::{CancelOutcome, ServiceId};
use crate::notify::NotificationSink;
use crate::storage::Storage;

use session::Session;

pub struct CancelOrchestrator {
    catalog: Arc<Catalog>,
    storage: Arc<dyn Storage>,
    host: Arc<dyn TabHost>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    timing: Timing,
    policy: PolicyChoice,
    on_exhausted: ExhaustedPolicy,
    active: Mutex<HashSet<ServiceId>>,
}

impl CancelOrchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        storage: Arc<dyn Storage>,
        host: Arc<dyn TabHost>,
        notifier: Arc<dyn NotificationSink>,
        policy: PolicyChoice,
        on_exhausted: ExhaustedPolicy,
        timing: Timing,
    ) -> Self {
        Self {
            catalog,
            storage,
            host,
            notifier,
            clock: Arc::new(SystemClock),
            timing,
            policy,
            on_exhausted,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one cancellation session for `service`, unless one is already in
    /// flight for it.
    pub async fn cancel(&self, service: &ServiceDescriptor) -> CancelOutcome {
        {
            let mut active = self.active.lock().await;
            if !active.insert(service.id.clone()) {
                tracing::warn!(service = %service.id, "cancellation already in progress");
                return CancelOutcome::rejected(format!(
                    "A cancellation for {} is already in progress",
                    service.id
                ));
            }
        }

        let outcome = Session::new(self, service).run().await;

        self.active.lock().await.remove(&service.id);
        outcome
    }
}
