//! Subscription status probing.
//!
//! One probe opens the service's account page in a background tab, waits
//! for it to load and settle, asks the page for its indicator verdict, and
//! caches the result. A probe never fails outward: open failures, probe
//! errors, and deadline overruns all become a [`StatusRecord`] with the
//! matching status, and the tab is closed no matter how the probe ended.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use crate::catalog::ServiceDescriptor;
use crate::clock::{Clock, SystemClock};
use crate::config::Timing;
use crate::host::{PageRequest, PageResponse, ProbeBatch, TabEvent, TabHost, TabId};
use crate::models::{StatusRecord, SubscriptionStatus};
use crate::storage::Storage;

pub struct StatusProber {
    storage: Arc<dyn Storage>,
    host: Arc<dyn TabHost>,
    clock: Arc<dyn Clock>,
    timing: Timing,
}

impl StatusProber {
    pub fn new(storage: Arc<dyn Storage>, host: Arc<dyn TabHost>, timing: Timing) -> Self {
        Self {
            storage,
            host,
            clock: Arc::new(SystemClock),
            timing,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Probe one service and cache the result.
    pub async fn check(&self, service: &ServiceDescriptor) -> StatusRecord {
        // Subscribe before opening so the first load cannot slip past.
        let mut events = self.host.subscribe();
        tracing::info!(service = %service.id, url = %service.account_url, "checking subscription status");

        let record = match self.host.open_tab(&service.account_url, false).await {
            Err(err) => {
                tracing::warn!(service = %service.id, error = %err, "could not open status tab");
                self.record(service, SubscriptionStatus::Error)
            }
            Ok(tab) => {
                let verdict = tokio::time::timeout(
                    self.timing.probe_timeout,
                    self.probe_tab(tab, &mut events, service),
                )
                .await;

                if let Err(err) = self.host.close_tab(tab).await {
                    tracing::debug!(service = %service.id, error = %err, "status tab already gone");
                }

                match verdict {
                    Err(_) => {
                        tracing::warn!(service = %service.id, "status probe timed out");
                        self.record(service, SubscriptionStatus::Timeout)
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(service = %service.id, error = %err, "status probe failed");
                        self.record(service, SubscriptionStatus::Error)
                    }
                    Ok(Ok(outcome)) => {
                        let mut record = self.record(service, outcome.status);
                        if let Some(text) = outcome.next_billing {
                            record = record.with_next_billing(text);
                        }
                        record
                    }
                }
            }
        };

        tracing::info!(service = %service.id, status = %record.status, "status probe finished");
        if let Err(err) = self.storage.put_status(&record).await {
            tracing::warn!(service = %service.id, error = %err, "failed to cache status record");
        }
        record
    }

    fn record(&self, service: &ServiceDescriptor, status: SubscriptionStatus) -> StatusRecord {
        StatusRecord::new(service.id.clone(), status, self.clock.now())
    }

    /// Wait for the page, let it settle, then read the indicators.
    async fn probe_tab(
        &self,
        tab: TabId,
        events: &mut broadcast::Receiver<TabEvent>,
        service: &ServiceDescriptor,
    ) -> Result<crate::host::ProbeOutcome> {
        loop {
            match events.recv().await {
                Ok(TabEvent::LoadComplete { tab: loaded, .. }) if loaded == tab => break,
                Ok(TabEvent::Closed { tab: closed }) if closed == tab => {
                    anyhow::bail!("status tab closed before the page loaded");
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("host event channel closed");
                }
            }
        }

        tokio::time::sleep(self.timing.settle_for(service.slow_render)).await;

        let response = self
            .host
            .execute(
                tab,
                PageRequest::Probe(ProbeBatch {
                    inactive: service.inactive_indicators.clone(),
                    active: service.active_indicators.clone(),
                    next_billing: service.next_billing.clone(),
                }),
            )
            .await?;
        match response {
            PageResponse::Probe(outcome) => Ok(outcome),
            PageResponse::Step(_) => anyhow::bail!("host answered a probe with a step outcome"),
        }
    }
}
