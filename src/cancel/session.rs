//! One cancellation session: a foreground tab driven from open to verdict.
//!
//! The session is an event loop over the host's tab events, bounded by two
//! timers. The overall timer covers the whole session; the step timer is
//! armed by the first page load and re-armed by every one after it, so a
//! flow that keeps navigating can use the full overall budget while a page
//! that stops answering cannot. Work on a loaded page races against both.
//!
//! Whatever the verdict, cleanup runs exactly once: close the tab, drop the
//! crash-recovery marker, record history on success, and notify.

use tokio::sync::broadcast;
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use crate::catalog::ServiceDescriptor;
use crate::clock::Clock;
use crate::config::{ExhaustedPolicy, Timing};
use crate::host::{HostError, PageRequest, PageResponse, StepOutcome, TabEvent, TabHost, TabId};
use crate::models::{CancelOutcome, ErrorKind, HistoryEntry, RecoveryRecord, StepResult};
use crate::notify::{Notification, NotificationSink};
use crate::selector::Selector;
use crate::storage::Storage;

use super::policy::{Plan, StepPolicy};
use super::CancelOrchestrator;

/// How one loaded page ended relative to the session timers.
enum PagePhase {
    OverallTimeout,
    StepTimeout,
    /// `None` means the page is done for now; wait for the next load.
    Settled(Option<CancelOutcome>),
}

pub(super) struct Session<'a> {
    service: &'a ServiceDescriptor,
    storage: &'a dyn Storage,
    host: &'a dyn TabHost,
    notifier: &'a dyn NotificationSink,
    clock: &'a dyn Clock,
    timing: &'a Timing,
    on_exhausted: ExhaustedPolicy,
    session_id: Uuid,
    policy: StepPolicy,
    reason_selectors: Vec<Selector>,
    tab: Option<TabId>,
    navigations: u32,
    clicks: u32,
    actions_total: u32,
    reason_done: bool,
    reinjected: bool,
}

impl<'a> Session<'a> {
    pub(super) fn new(
        orchestrator: &'a CancelOrchestrator,
        service: &'a ServiceDescriptor,
    ) -> Self {
        let policy = StepPolicy::for_service(service, &orchestrator.catalog, orchestrator.policy);
        let reason_selectors = orchestrator.catalog.combined_reason_selectors(service);
        Self {
            service,
            storage: orchestrator.storage.as_ref(),
            host: orchestrator.host.as_ref(),
            notifier: orchestrator.notifier.as_ref(),
            clock: orchestrator.clock.as_ref(),
            timing: &orchestrator.timing,
            on_exhausted: orchestrator.on_exhausted,
            session_id: Uuid::new_v4(),
            policy,
            reason_selectors,
            tab: None,
            navigations: 0,
            clicks: 0,
            actions_total: 0,
            reason_done: false,
            reinjected: false,
        }
    }

    pub(super) async fn run(mut self) -> CancelOutcome {
        let outcome = self.drive().await;
        self.finish(&outcome).await;
        outcome
    }

    async fn drive(&mut self) -> CancelOutcome {
        let marker = RecoveryRecord {
            service_id: self.service.id.clone(),
            started_at: self.clock.now(),
        };
        if let Err(err) = self.storage.put_recovery(&marker).await {
            tracing::warn!(
                session = %self.session_id,
                error = %err,
                "failed to write recovery marker"
            );
        }

        // Subscribe before opening so the first load event cannot be missed.
        let mut events = self.host.subscribe();

        let start_url = self.service.cancel_start_url();
        tracing::info!(
            session = %self.session_id,
            service = %self.service.id,
            policy = self.policy.kind(),
            url = start_url,
            "starting cancellation"
        );

        let tab = match self.host.open_tab(start_url, true).await {
            Ok(tab) => tab,
            Err(err) => {
                tracing::warn!(
                    session = %self.session_id,
                    error = %err,
                    "could not open cancellation tab"
                );
                return CancelOutcome::failed(
                    ErrorKind::HostRejected,
                    "Could not open the cancellation page",
                );
            }
        };
        self.tab = Some(tab);

        let overall_deadline = Instant::now() + self.timing.overall_timeout;
        let overall = sleep_until(overall_deadline);
        tokio::pin!(overall);
        // The step timer stays parked past the overall deadline until the
        // first load arms it.
        let step = sleep_until(overall_deadline + self.timing.step_timeout);
        tokio::pin!(step);

        loop {
            let event = tokio::select! {
                _ = &mut overall => {
                    tracing::warn!(session = %self.session_id, "session hit the overall deadline");
                    return CancelOutcome::failed(ErrorKind::Timeout, "Cancellation timed out");
                }
                _ = &mut step => {
                    tracing::warn!(session = %self.session_id, "no page progress before the step deadline");
                    return CancelOutcome::failed(
                        ErrorKind::Timeout,
                        "Cancellation stalled waiting for the page",
                    );
                }
                event = events.recv() => event,
            };

            let url = match event {
                Ok(TabEvent::LoadComplete { tab: loaded, url }) if loaded == tab => url,
                Ok(TabEvent::Closed { tab: closed }) if closed == tab => {
                    tracing::warn!(session = %self.session_id, "cancellation tab disappeared");
                    return CancelOutcome::failed(
                        ErrorKind::CommunicationFailure,
                        "The cancellation tab was closed",
                    );
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(session = %self.session_id, skipped, "tab event stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return CancelOutcome::failed(
                        ErrorKind::CommunicationFailure,
                        "Lost the connection to the browser",
                    );
                }
            };

            step.as_mut().reset(Instant::now() + self.timing.step_timeout);
            tracing::debug!(session = %self.session_id, %url, "page loaded");

            let phase = tokio::select! {
                _ = &mut overall => PagePhase::OverallTimeout,
                _ = &mut step => PagePhase::StepTimeout,
                verdict = self.run_page(tab, &url) => PagePhase::Settled(verdict),
            };
            match phase {
                PagePhase::OverallTimeout => {
                    tracing::warn!(session = %self.session_id, "session hit the overall deadline");
                    return CancelOutcome::failed(ErrorKind::Timeout, "Cancellation timed out");
                }
                PagePhase::StepTimeout => {
                    tracing::warn!(session = %self.session_id, "no page progress before the step deadline");
                    return CancelOutcome::failed(
                        ErrorKind::Timeout,
                        "Cancellation stalled waiting for the page",
                    );
                }
                PagePhase::Settled(Some(outcome)) => return outcome,
                PagePhase::Settled(None) => {}
            }
        }
    }

    /// Drive the policy on one loaded page until it hands back control.
    ///
    /// `None` means the session should wait for the next load event, either
    /// because an action navigated or because the pending steps belong to a
    /// page we have not reached yet.
    async fn run_page(&mut self, tab: TabId, url: &str) -> Option<CancelOutcome> {
        sleep(self.timing.settle_for(self.service.slow_render)).await;

        loop {
            let reason = if self.reason_done {
                Vec::new()
            } else {
                self.reason_selectors.clone()
            };
            let plan = self
                .policy
                .plan(url, self.actions_total, self.clicks, reason, self.timing);

            let request = match plan {
                Plan::Finished => {
                    tracing::info!(session = %self.session_id, "all steps completed");
                    return Some(CancelOutcome::succeeded());
                }
                Plan::Hold => {
                    tracing::debug!(
                        session = %self.session_id,
                        %url,
                        "no runnable step on this page, waiting for navigation"
                    );
                    return None;
                }
                Plan::Exhausted => {
                    tracing::warn!(
                        session = %self.session_id,
                        clicks = self.clicks,
                        "click budget spent without reaching a confirmation page"
                    );
                    return Some(CancelOutcome::failed(
                        ErrorKind::TooManyRedirects,
                        "Too many redirects",
                    ));
                }
                Plan::Execute(request) => request,
            };

            let greedy = matches!(request, PageRequest::Greedy(_));
            let outcome = match self.execute_with_retry(tab, request).await {
                Ok(outcome) => outcome,
                Err(failed) => return Some(failed),
            };

            if outcome.reason_selected {
                self.reason_done = true;
            }
            self.actions_total += outcome.actions;
            if greedy {
                self.clicks += outcome.actions;
            }
            self.policy.advance(outcome.steps_consumed);

            match outcome.result {
                StepResult::Navigating { next_url } => {
                    self.navigations += 1;
                    if matches!(self.policy, StepPolicy::Sequence { .. })
                        && self.navigations > self.timing.max_navigations
                    {
                        tracing::warn!(
                            session = %self.session_id,
                            navigations = self.navigations,
                            "navigation budget spent"
                        );
                        return Some(CancelOutcome::failed(
                            ErrorKind::TooManyRedirects,
                            "Too many redirects",
                        ));
                    }
                    tracing::debug!(
                        session = %self.session_id,
                        next = next_url.as_deref().unwrap_or("<pending>"),
                        "navigation under way"
                    );
                    return None;
                }
                StepResult::Succeeded => {
                    if greedy {
                        if outcome.actions == 0 {
                            // Nothing matched but the URL already reads as a
                            // confirmation page.
                            tracing::info!(session = %self.session_id, %url, "landed on a confirmation page");
                            return Some(CancelOutcome::succeeded());
                        }
                        // Clicked without navigating; give the page a moment
                        // and look for the next control.
                        sleep(self.timing.step_delay).await;
                    }
                    continue;
                }
                StepResult::NoActionableElement => {
                    return Some(self.exhausted_verdict());
                }
                StepResult::Failed { reason } => {
                    tracing::warn!(session = %self.session_id, reason = %reason, "page reported a failed step");
                    return Some(Self::classify_failure(reason));
                }
            }
        }
    }

    /// Run one page request, re-injecting the page logic once per session
    /// if the page context stops answering.
    async fn execute_with_retry(
        &mut self,
        tab: TabId,
        request: PageRequest,
    ) -> Result<StepOutcome, CancelOutcome> {
        let first = self.host.execute(tab, request.clone()).await;
        let detail = match first {
            Ok(response) => return Self::expect_step(response),
            Err(HostError::PageUnreachable(detail)) => detail,
            Err(err) => {
                tracing::warn!(session = %self.session_id, error = %err, "page request failed");
                return Err(Self::communication_failure());
            }
        };

        if self.reinjected {
            tracing::warn!(
                session = %self.session_id,
                detail = %detail,
                "page context unreachable after an earlier re-injection"
            );
            return Err(Self::communication_failure());
        }
        self.reinjected = true;
        tracing::info!(session = %self.session_id, detail = %detail, "page context unreachable, re-injecting");

        if let Err(err) = self.host.reinject(tab).await {
            tracing::warn!(session = %self.session_id, error = %err, "re-injection failed");
            return Err(Self::communication_failure());
        }
        sleep(self.timing.reinject_delay).await;

        match self.host.execute(tab, request).await {
            Ok(response) => Self::expect_step(response),
            Err(err) => {
                tracing::warn!(
                    session = %self.session_id,
                    error = %err,
                    "page request failed again after re-injection"
                );
                Err(Self::communication_failure())
            }
        }
    }

    fn expect_step(response: PageResponse) -> Result<StepOutcome, CancelOutcome> {
        match response {
            PageResponse::Step(outcome) => Ok(outcome),
            PageResponse::Probe(_) => Err(CancelOutcome::failed(
                ErrorKind::CommunicationFailure,
                "The page answered with the wrong response kind",
            )),
        }
    }

    fn communication_failure() -> CancelOutcome {
        CancelOutcome::failed(
            ErrorKind::CommunicationFailure,
            "Could not communicate with the cancellation page",
        )
    }

    fn classify_failure(reason: String) -> CancelOutcome {
        let lowered = reason.to_lowercase();
        if lowered.contains("not found") || lowered.contains("selector") {
            CancelOutcome::failed(ErrorKind::NotFound, reason)
        } else {
            CancelOutcome::failed(ErrorKind::CommunicationFailure, reason)
        }
    }

    /// Verdict when no actionable element is left anywhere on the page.
    fn exhausted_verdict(&self) -> CancelOutcome {
        if self.actions_total == 0 {
            return CancelOutcome::failed(
                ErrorKind::NoCancelControl,
                "No cancellation control was found on the page",
            );
        }
        match self.on_exhausted {
            ExhaustedPolicy::Success => {
                tracing::info!(
                    session = %self.session_id,
                    actions = self.actions_total,
                    "steps exhausted, treating as success per configuration"
                );
                CancelOutcome::succeeded()
            }
            ExhaustedPolicy::Failure => CancelOutcome::failed(
                ErrorKind::TooManyRedirects,
                "Ran out of cancellation steps before reaching a confirmation page",
            ),
        }
    }

    /// Terminal bookkeeping; runs exactly once, whatever the verdict.
    async fn finish(&mut self, outcome: &CancelOutcome) {
        if let Some(tab) = self.tab.take() {
            if let Err(err) = self.host.close_tab(tab).await {
                tracing::debug!(session = %self.session_id, error = %err, "cancellation tab already gone");
            }
        }

        if let Err(err) = self.storage.remove_recovery(&self.service.id).await {
            tracing::warn!(
                session = %self.session_id,
                error = %err,
                "failed to remove recovery marker"
            );
        }

        if outcome.success {
            let entry = HistoryEntry {
                service_id: self.service.id.clone(),
                service_name: self.service.name.clone(),
                at: self.clock.now(),
            };
            if let Err(err) = self.storage.append_history(&entry).await {
                tracing::warn!(
                    session = %self.session_id,
                    error = %err,
                    "failed to record cancellation history"
                );
            }
            self.notifier
                .notify(Notification::success(
                    "Subscription cancelled",
                    format!("{} was cancelled.", self.service.name),
                ))
                .await;
        } else {
            let body = outcome
                .error
                .clone()
                .unwrap_or_else(|| "Cancellation failed".to_string());
            self.notifier
                .notify(Notification::error(
                    format!("Could not cancel {}", self.service.name),
                    body,
                ))
                .await;
        }

        tracing::info!(
            session = %self.session_id,
            service = %self.service.id,
            success = outcome.success,
            error_kind = outcome.error_kind.map(|kind| kind.as_str()),
            "cancellation session finished"
        );
    }
}
