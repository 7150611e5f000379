//! Simulated browser host.
//!
//! Serves scripted [`FixtureDom`] pages instead of driving a browser, with
//! the same observable contract as the live host: loads are announced over
//! the broadcast channel a beat after `open_tab` returns, and a request
//! whose actions change the page URL gets a fresh document installed plus a
//! load-complete event. Tests stage pages by URL (exact key first, then
//! substring), inject page-context failures, and inspect what the engine
//! did to each tab.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::config::Timing;
use crate::executor;
use crate::host::{HostError, PageRequest, PageResponse, TabEvent, TabHost, TabId};
use crate::page::{FixtureDom, PageDom};

const EVENT_CAPACITY: usize = 64;

struct SimTab {
    dom: Arc<FixtureDom>,
}

#[derive(Default)]
struct SimState {
    tabs: HashMap<TabId, SimTab>,
    staged: Vec<(String, Arc<FixtureDom>)>,
    next_tab: u64,
    refuse_open: Vec<String>,
    never_load: Vec<String>,
    fail_executes: u32,
    opens: Vec<(String, bool)>,
    reinjects: u32,
    close_calls: HashMap<TabId, u32>,
}

impl SimState {
    fn staged_for(&self, url: &str) -> Option<Arc<FixtureDom>> {
        self.staged
            .iter()
            .find(|(key, _)| key == url)
            .or_else(|| self.staged.iter().find(|(key, _)| url.contains(key.as_str())))
            .map(|(_, dom)| dom.clone())
    }

    fn never_loads(&self, url: &str) -> bool {
        self.never_load.iter().any(|pattern| url.contains(pattern))
    }
}

/// In-process [`TabHost`] over scripted fixture pages.
pub struct SimHost {
    state: Mutex<SimState>,
    events: broadcast::Sender<TabEvent>,
    timing: Timing,
    load_delay: Duration,
}

impl SimHost {
    pub fn new(timing: Timing) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(SimState::default()),
            events,
            timing,
            load_delay: Duration::from_millis(5),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Stage a page for any URL equal to `key`, or containing it when no
    /// exact key matches. Staged pages are shared, so a test can keep its
    /// handle and mutate the page mid-flow.
    pub async fn stage(&self, key: impl Into<String>, dom: Arc<FixtureDom>) {
        self.state.lock().await.staged.push((key.into(), dom));
    }

    /// Refuse `open_tab` for URLs containing this pattern.
    pub async fn refuse_open(&self, pattern: impl Into<String>) {
        self.state.lock().await.refuse_open.push(pattern.into());
    }

    /// Never announce load-complete for URLs containing this pattern.
    pub async fn never_load(&self, pattern: impl Into<String>) {
        self.state.lock().await.never_load.push(pattern.into());
    }

    /// Make the next `count` execute calls fail as unreachable page
    /// contexts.
    pub async fn fail_next_executes(&self, count: u32) {
        self.state.lock().await.fail_executes = count;
    }

    /// Drop a tab as if the user closed it; announces [`TabEvent::Closed`]
    /// without counting as an engine close.
    pub async fn simulate_tab_closed(&self, tab: TabId) {
        let removed = self.state.lock().await.tabs.remove(&tab).is_some();
        if removed {
            let _ = self.events.send(TabEvent::Closed { tab });
        }
    }

    pub async fn open_count(&self) -> usize {
        self.state.lock().await.opens.len()
    }

    /// Every open so far as `(url, foreground)`, in order.
    pub async fn opens(&self) -> Vec<(String, bool)> {
        self.state.lock().await.opens.clone()
    }

    pub async fn reinject_count(&self) -> u32 {
        self.state.lock().await.reinjects
    }

    pub async fn close_call_count(&self, tab: TabId) -> u32 {
        self.state
            .lock()
            .await
            .close_calls
            .get(&tab)
            .copied()
            .unwrap_or(0)
    }

    pub async fn open_tabs(&self) -> Vec<TabId> {
        let state = self.state.lock().await;
        let mut tabs: Vec<TabId> = state.tabs.keys().copied().collect();
        tabs.sort();
        tabs
    }

    fn announce_load(&self, tab: TabId, url: String) {
        let events = self.events.clone();
        let delay = self.load_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(TabEvent::LoadComplete { tab, url });
        });
    }

    /// Install the staged (or blank) document for `url` into the tab and
    /// schedule its load-complete event.
    async fn install_page(&self, tab: TabId, url: String) {
        let (dom, never) = {
            let state = self.state.lock().await;
            (state.staged_for(&url), state.never_loads(&url))
        };
        let dom = match dom {
            Some(dom) => {
                dom.set_url(url.clone()).await;
                dom
            }
            None => Arc::new(FixtureDom::new(url.clone())),
        };
        if let Some(entry) = self.state.lock().await.tabs.get_mut(&tab) {
            entry.dom = dom;
        }
        if !never {
            self.announce_load(tab, url);
        }
    }
}

#[async_trait]
impl TabHost for SimHost {
    async fn open_tab(&self, url: &str, foreground: bool) -> Result<TabId, HostError> {
        let (tab, dom, never) = {
            let mut state = self.state.lock().await;
            if let Some(pattern) = state.refuse_open.iter().find(|p| url.contains(p.as_str())) {
                return Err(HostError::OpenRejected {
                    url: url.to_string(),
                    reason: format!("matched refusal rule {pattern:?}"),
                });
            }
            state.opens.push((url.to_string(), foreground));
            let tab = TabId::new(state.next_tab);
            state.next_tab += 1;
            let dom = state
                .staged_for(url)
                .unwrap_or_else(|| Arc::new(FixtureDom::new(url)));
            state.tabs.insert(tab, SimTab { dom: dom.clone() });
            (tab, dom, state.never_loads(url))
        };
        dom.set_url(url).await;
        if !never {
            self.announce_load(tab, url.to_string());
        }
        Ok(tab)
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        let removed = {
            let mut state = self.state.lock().await;
            *state.close_calls.entry(tab).or_insert(0) += 1;
            state.tabs.remove(&tab).is_some()
        };
        if !removed {
            return Err(HostError::UnknownTab(tab));
        }
        let _ = self.events.send(TabEvent::Closed { tab });
        Ok(())
    }

    async fn current_url(&self, tab: TabId) -> Result<String, HostError> {
        let dom = {
            let state = self.state.lock().await;
            state
                .tabs
                .get(&tab)
                .ok_or(HostError::UnknownTab(tab))?
                .dom
                .clone()
        };
        Ok(dom.url().await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }

    async fn execute(&self, tab: TabId, request: PageRequest) -> Result<PageResponse, HostError> {
        let dom = {
            let mut state = self.state.lock().await;
            if state.fail_executes > 0 {
                state.fail_executes -= 1;
                return Err(HostError::PageUnreachable(
                    "no listener in page context".to_string(),
                ));
            }
            state
                .tabs
                .get(&tab)
                .ok_or(HostError::UnknownTab(tab))?
                .dom
                .clone()
        };

        let before = dom.url().await?;
        let response = executor::perform(dom.as_ref(), &request, &self.timing).await?;
        let after = dom.url().await?;
        if after != before {
            self.install_page(tab, after).await;
        }
        Ok(response)
    }

    async fn reinject(&self, tab: TabId) -> Result<(), HostError> {
        let mut state = self.state.lock().await;
        if !state.tabs.contains_key(&tab) {
            return Err(HostError::UnknownTab(tab));
        }
        state.reinjects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{GreedyBatch, StepOutcome};
    use crate::models::StepResult;
    use crate::page::ClickEffect;
    use crate::selector::Selector;

    fn quick_timing() -> Timing {
        Timing {
            poll_interval: Duration::from_millis(5),
            highlight_pause: Duration::from_millis(1),
            nav_settle: Duration::from_millis(5),
            locate_budget: Duration::from_millis(20),
            ..Timing::default()
        }
    }

    async fn greedy(host: &SimHost, tab: TabId, selector: &str) -> StepOutcome {
        let request = PageRequest::Greedy(GreedyBatch {
            selectors: vec![Selector::parse(selector).unwrap()],
            reason: Vec::new(),
        });
        match host.execute(tab, request).await.unwrap() {
            PageResponse::Step(outcome) => outcome,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_announces_load_and_serves_staged_page() {
        let host = SimHost::new(quick_timing());
        let page = Arc::new(FixtureDom::new("https://svc.example/account"));
        page.insert("button", &[("id", "cancel")], "Cancel").await;
        host.stage("https://svc.example/account", page).await;

        let mut events = host.subscribe();
        let tab = host.open_tab("https://svc.example/account", true).await.unwrap();

        match events.recv().await.unwrap() {
            TabEvent::LoadComplete { tab: loaded, url } => {
                assert_eq!(loaded, tab);
                assert_eq!(url, "https://svc.example/account");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(host.opens().await, vec![("https://svc.example/account".to_string(), true)]);
    }

    #[tokio::test]
    async fn url_changing_click_installs_next_page() {
        let host = SimHost::new(quick_timing());
        let first = Arc::new(FixtureDom::new("https://svc.example/account"));
        let button = first.insert("button", &[("id", "cancel")], "Cancel").await;
        first
            .on_click(button, ClickEffect::SetUrl("https://svc.example/cancel/confirm".into()))
            .await;
        let second = Arc::new(FixtureDom::new(""));
        second.insert("button", &[("id", "finish")], "Finish").await;
        host.stage("https://svc.example/account", first).await;
        host.stage("cancel/confirm", second.clone()).await;

        let mut events = host.subscribe();
        let tab = host.open_tab("https://svc.example/account", true).await.unwrap();
        events.recv().await.unwrap();

        let outcome = greedy(&host, tab, "#cancel").await;
        assert_eq!(
            outcome.result,
            StepResult::Navigating {
                next_url: Some("https://svc.example/cancel/confirm".into())
            }
        );

        match events.recv().await.unwrap() {
            TabEvent::LoadComplete { url, .. } => {
                assert_eq!(url, "https://svc.example/cancel/confirm");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(second.current_url().await, "https://svc.example/cancel/confirm");
        assert_eq!(host.current_url(tab).await.unwrap(), "https://svc.example/cancel/confirm");
    }

    #[tokio::test]
    async fn refusal_and_failure_injection() {
        let host = SimHost::new(quick_timing());
        host.refuse_open("blocked.example").await;
        let err = host.open_tab("https://blocked.example/x", true).await.unwrap_err();
        assert!(matches!(err, HostError::OpenRejected { .. }));

        let tab = host.open_tab("https://svc.example/account", true).await.unwrap();
        host.fail_next_executes(1).await;
        let request = PageRequest::Greedy(GreedyBatch {
            selectors: vec![Selector::parse("#cancel").unwrap()],
            reason: Vec::new(),
        });
        let err = host.execute(tab, request.clone()).await.unwrap_err();
        assert!(matches!(err, HostError::PageUnreachable(_)));

        host.reinject(tab).await.unwrap();
        assert_eq!(host.reinject_count().await, 1);
        assert!(host.execute(tab, request).await.is_ok());
    }
}
