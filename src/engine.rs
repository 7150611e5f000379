//! The engine ties the catalog, storage, tab host, prober, and orchestrator
//! together behind the [`crate::api`] surface.
//!
//! Frontends construct one [`Engine`] per process and feed it requests; the
//! engine owns gatekeeping (unknown or disabled services, the optional
//! confirmation prompt) so sessions only ever start for work that should
//! happen.

use std::sync::Arc;

use tokio::time::timeout;

use crate::api::{service_infos, Request, Response};
use crate::cancel::CancelOrchestrator;
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{ExhaustedPolicy, PolicyChoice, Timing};
use crate::host::TabHost;
use crate::models::{CancelOutcome, ServiceId, Settings, StatusRecord};
use crate::notify::{ConfirmAnswer, Notification, NotificationSink};
use crate::probe::StatusProber;
use crate::storage::Storage;

pub struct Engine {
    catalog: Arc<Catalog>,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    timing: Timing,
    prober: StatusProber,
    orchestrator: CancelOrchestrator,
}

impl Engine {
    pub fn new(
        catalog: Arc<Catalog>,
        storage: Arc<dyn Storage>,
        host: Arc<dyn TabHost>,
        notifier: Arc<dyn NotificationSink>,
        policy: PolicyChoice,
        on_exhausted: ExhaustedPolicy,
        timing: Timing,
    ) -> Self {
        let prober = StatusProber::new(storage.clone(), host.clone(), timing.clone());
        let orchestrator = CancelOrchestrator::new(
            catalog.clone(),
            storage.clone(),
            host,
            notifier.clone(),
            policy,
            on_exhausted,
            timing.clone(),
        );
        Self {
            catalog,
            storage,
            notifier,
            clock: Arc::new(SystemClock),
            timing,
            prober,
            orchestrator,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.prober = self.prober.with_clock(clock.clone());
        self.orchestrator = self.orchestrator.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Serve one frontend request.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetServices => {
                match service_infos(&self.catalog, self.storage.as_ref()).await {
                    Ok(services) => Response::Services { services },
                    Err(err) => Response::error(format!("{err:#}")),
                }
            }
            Request::CheckStatus { service_id } => match self.catalog.get(&service_id) {
                Some(service) => Response::Status {
                    record: self.prober.check(service).await,
                },
                None => Response::error(format!("Unknown service: {service_id}")),
            },
            Request::CheckAllStatuses => Response::Statuses {
                records: self.check_all().await,
            },
            Request::CancelSubscription { service_id } => Response::CancelResult {
                outcome: self.cancel(&service_id, false).await,
            },
            Request::GetSettings => match self.storage.get_settings().await {
                Ok(settings) => Response::Settings { settings },
                Err(err) => Response::error(format!("{err:#}")),
            },
            Request::UpdateSettings { settings } => {
                match self.storage.put_settings(&settings).await {
                    Ok(()) => Response::Settings { settings },
                    Err(err) => Response::error(format!("{err:#}")),
                }
            }
            Request::GetHistory => match self.storage.get_history().await {
                Ok(mut entries) => {
                    entries.reverse();
                    Response::History { entries }
                }
                Err(err) => Response::error(format!("{err:#}")),
            },
        }
    }

    /// Probe every enabled service, in catalog order.
    pub async fn check_all(&self) -> Vec<StatusRecord> {
        let settings = self.settings().await;
        let mut records = Vec::new();
        for service in self.catalog.services() {
            if !settings.is_enabled(&service.id) {
                tracing::debug!(service = %service.id, "skipping disabled service");
                continue;
            }
            records.push(self.prober.check(service).await);
        }
        records
    }

    /// Gatekeep and run one cancellation.
    ///
    /// `assume_yes` skips the confirmation prompt where settings ask for one.
    pub async fn cancel(&self, id: &ServiceId, assume_yes: bool) -> CancelOutcome {
        let Some(service) = self.catalog.get(id) else {
            return CancelOutcome::rejected(format!("Unknown service: {id}"));
        };

        let settings = self.settings().await;
        if !settings.is_enabled(id) {
            return CancelOutcome::rejected(format!(
                "{} is disabled in settings",
                service.name
            ));
        }

        if settings.confirm_before_cancel && !assume_yes {
            let note = Notification::info(
                format!("Cancel {}?", service.name),
                format!("About to start cancelling {}.", service.name),
            );
            let answer = timeout(self.timing.overall_timeout, self.notifier.confirm(note)).await;
            match answer {
                Ok(Some(ConfirmAnswer::Proceed)) => {}
                Ok(_) => return CancelOutcome::rejected("Cancellation not confirmed"),
                Err(_) => {
                    tracing::warn!(service = %id, "confirmation prompt went unanswered");
                    return CancelOutcome::rejected("Cancellation not confirmed");
                }
            }
        }

        self.orchestrator.cancel(service).await
    }

    /// Drop recovery markers left behind by sessions that died with a
    /// previous process. Called once at startup.
    pub async fn startup_sweep(&self) {
        let markers = match self.storage.list_recovery().await {
            Ok(markers) => markers,
            Err(err) => {
                tracing::warn!(error = %err, "could not list recovery markers");
                return;
            }
        };

        let now = self.clock.now();
        for marker in markers {
            if !marker.is_stale(now, self.timing.overall_timeout) {
                continue;
            }
            tracing::warn!(
                service = %marker.service_id,
                started_at = %marker.started_at,
                "clearing recovery marker from an interrupted cancellation"
            );
            if let Err(err) = self.storage.remove_recovery(&marker.service_id).await {
                tracing::warn!(
                    service = %marker.service_id,
                    error = %err,
                    "could not remove recovery marker"
                );
            }
        }
    }

    async fn settings(&self) -> Settings {
        match self.storage.get_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %err, "could not load settings, using defaults");
                Settings::default()
            }
        }
    }
}
