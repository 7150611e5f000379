//! Live browser host over the Chrome DevTools Protocol.
//!
//! Owns one Chrome/Chromium process for the lifetime of the host. Each tab
//! is a CDP page; load events are forwarded onto the shared broadcast
//! channel, and requests run through a [`CdpDom`] adapter that evaluates
//! selectors and element actions in the page. Only the top document is
//! exposed as a scope; shadow roots and frames are not traversed over CDP.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::{broadcast, MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::config::{BrowserConfig, Timing};
use crate::executor;
use crate::host::{HostError, PageRequest, PageResponse, TabEvent, TabHost, TabId};
use crate::page::{ElementHandle, PageDom, PageError, ScopeHandle};

const EVENT_CAPACITY: usize = 64;

struct HostState {
    pages: HashMap<TabId, Page>,
    next_tab: u64,
}

/// [`TabHost`] backed by a launched Chrome/Chromium instance.
pub struct CdpHost {
    browser: Browser,
    state: Mutex<HostState>,
    events: broadcast::Sender<TabEvent>,
    timing: Timing,
    handler_task: JoinHandle<()>,
    // Keeps a throwaway profile directory alive for the browser's lifetime.
    _user_data: Option<TempDir>,
}

impl CdpHost {
    pub async fn launch(settings: &BrowserConfig, timing: Timing) -> Result<Self> {
        let chrome = find_chrome(settings).context(
            "Chrome/Chromium not found. Install one or set browser.chrome_path in the config.",
        )?;

        let (profile_dir, user_data) = match &settings.user_data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create profile dir: {}", dir.display()))?;
                (dir.clone(), None)
            }
            None => {
                let tmp = TempDir::new().context("Failed to create temporary profile dir")?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let mut builder = chromiumoxide::BrowserConfig::builder()
            .chrome_executable(chrome)
            .viewport(None)
            .user_data_dir(&profile_dir)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            browser,
            state: Mutex::new(HostState {
                pages: HashMap::new(),
                next_tab: 1,
            }),
            events,
            timing,
            handler_task,
            _user_data: user_data,
        })
    }

    /// Close every tab and tear the browser down.
    pub async fn shutdown(self) {
        let pages: Vec<Page> = {
            let mut state = self.state.lock().await;
            state.pages.drain().map(|(_, page)| page).collect()
        };
        for page in pages {
            let _ = page.close().await;
        }
        drop(self.browser);
        self.handler_task.abort();
    }

    /// Forward the page's load events onto the broadcast channel, and a
    /// close notification once the page goes away.
    async fn forward_events(&self, tab: TabId, page: &Page) -> Result<()> {
        let mut loads = page
            .event_listener::<EventLoadEventFired>()
            .await
            .context("Failed to listen for page load events")?;
        let events = self.events.clone();
        let page = page.clone();
        tokio::spawn(async move {
            while loads.next().await.is_some() {
                let url = page.url().await.ok().flatten().unwrap_or_default();
                // The about:blank bootstrap load is not a page anyone
                // asked for.
                if url == "about:blank" {
                    continue;
                }
                let _ = events.send(TabEvent::LoadComplete { tab, url });
            }
            let _ = events.send(TabEvent::Closed { tab });
        });
        Ok(())
    }

    async fn page_for(&self, tab: TabId) -> Result<Page, HostError> {
        let state = self.state.lock().await;
        state
            .pages
            .get(&tab)
            .cloned()
            .ok_or(HostError::UnknownTab(tab))
    }
}

#[async_trait]
impl TabHost for CdpHost {
    async fn open_tab(&self, url: &str, foreground: bool) -> Result<TabId, HostError> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .background(!foreground)
            .build()
            .map_err(|e| anyhow!("Failed to build target params: {e}"))?;
        let page = self
            .browser
            .new_page(params)
            .await
            .context("Failed to open tab")?;

        let tab = {
            let mut state = self.state.lock().await;
            let tab = TabId::new(state.next_tab);
            state.next_tab += 1;
            state.pages.insert(tab, page.clone());
            tab
        };
        self.forward_events(tab, &page).await?;

        if foreground {
            let _ = page.bring_to_front().await;
        }
        if let Err(err) = page.goto(url).await {
            self.state.lock().await.pages.remove(&tab);
            let _ = page.close().await;
            return Err(HostError::OpenRejected {
                url: url.to_string(),
                reason: err.to_string(),
            });
        }
        tracing::debug!(%tab, url, foreground, "opened tab");
        Ok(tab)
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        let page = {
            let mut state = self.state.lock().await;
            state.pages.remove(&tab).ok_or(HostError::UnknownTab(tab))?
        };
        page.close().await.context("Failed to close tab")?;
        Ok(())
    }

    async fn current_url(&self, tab: TabId) -> Result<String, HostError> {
        let page = self.page_for(tab).await?;
        let url = page
            .url()
            .await
            .map_err(|e| HostError::PageUnreachable(e.to_string()))?;
        Ok(url.unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }

    async fn execute(&self, tab: TabId, request: PageRequest) -> Result<PageResponse, HostError> {
        let page = self.page_for(tab).await?;
        let dom = CdpDom::new(page);
        Ok(executor::perform(&dom, &request, &self.timing).await?)
    }

    /// Page logic runs over CDP per call rather than living in the page,
    /// so recovery is a liveness check: if the tab still answers, the next
    /// execute can proceed.
    async fn reinject(&self, tab: TabId) -> Result<(), HostError> {
        let page = self.page_for(tab).await?;
        page.url()
            .await
            .map_err(|e| HostError::PageUnreachable(e.to_string()))?;
        Ok(())
    }
}

struct ElementStore {
    elements: HashMap<u64, Element>,
    next: u64,
}

impl ElementStore {
    fn admit(&mut self, element: Element) -> ElementHandle {
        let id = self.next;
        self.next += 1;
        self.elements.insert(id, element);
        ElementHandle::new(id)
    }
}

/// [`PageDom`] over one CDP page.
///
/// Built fresh per request; element handles are only valid within the
/// request that produced them. CDP call failures surface as unreachable
/// page contexts so the session's re-injection path gets to retry.
struct CdpDom {
    page: Page,
    store: Mutex<ElementStore>,
}

impl CdpDom {
    fn new(page: Page) -> Self {
        Self {
            page,
            store: Mutex::new(ElementStore {
                elements: HashMap::new(),
                next: 1,
            }),
        }
    }

    async fn element(&self, handle: ElementHandle) -> Result<MappedMutexGuard<'_, Element>, PageError> {
        let guard = self.store.lock().await;
        MutexGuard::try_map(guard, |store| store.elements.get_mut(&handle.raw()))
            .map_err(|_| PageError::Backend(anyhow!("stale {handle}")))
    }

    /// Run a zero-argument function against the element, returning its
    /// JSON result. `format!`-built bodies must embed values through
    /// `serde_json::to_string` so they stay valid JS literals.
    async fn eval_on(
        &self,
        handle: ElementHandle,
        function: &str,
    ) -> Result<Option<serde_json::Value>, PageError> {
        let element = self.element(handle).await?;
        let returns = element
            .call_js_fn(function, false)
            .await
            .map_err(unreachable_page)?;
        Ok(returns.result.value)
    }
}

fn unreachable_page(err: chromiumoxide::error::CdpError) -> PageError {
    PageError::Unreachable(err.to_string())
}

#[async_trait]
impl PageDom for CdpDom {
    async fn url(&self) -> Result<String, PageError> {
        let url = self.page.url().await.map_err(unreachable_page)?;
        Ok(url.unwrap_or_default())
    }

    async fn scopes(&self) -> Result<Vec<ScopeHandle>, PageError> {
        Ok(vec![ScopeHandle::DOCUMENT])
    }

    /// A failed query reads as a bad selector and gets skipped by the
    /// locator; tab liveness is checked separately around each request.
    async fn query(
        &self,
        _scope: ScopeHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, PageError> {
        let found = self
            .page
            .find_elements(selector)
            .await
            .map_err(|err| PageError::BadSelector(format!("{selector}: {err}")))?;
        let mut store = self.store.lock().await;
        Ok(found.into_iter().map(|el| store.admit(el)).collect())
    }

    async fn text(&self, element: ElementHandle) -> Result<String, PageError> {
        let guard = self.element(element).await?;
        let text = guard.inner_text().await.map_err(unreachable_page)?;
        Ok(text.unwrap_or_default())
    }

    async fn is_checked(&self, element: ElementHandle) -> Result<bool, PageError> {
        let value = self
            .eval_on(element, "function() { return this.checked === true; }")
            .await?;
        Ok(value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn set_checked(&self, element: ElementHandle, checked: bool) -> Result<(), PageError> {
        self.eval_on(element, &format!("function() {{ this.checked = {checked}; }}"))
            .await?;
        Ok(())
    }

    async fn set_value(&self, element: ElementHandle, value: &str) -> Result<(), PageError> {
        let literal = serde_json::to_string(value)
            .map_err(|e| PageError::Backend(anyhow::Error::new(e)))?;
        self.eval_on(element, &format!("function() {{ this.value = {literal}; }}"))
            .await?;
        Ok(())
    }

    async fn fire_change(&self, element: ElementHandle) -> Result<(), PageError> {
        self.eval_on(
            element,
            "function() { this.dispatchEvent(new Event('change', { bubbles: true })); }",
        )
        .await?;
        Ok(())
    }

    async fn scroll_into_view(&self, element: ElementHandle) -> Result<(), PageError> {
        let guard = self.element(element).await?;
        guard.scroll_into_view().await.map_err(unreachable_page)?;
        Ok(())
    }

    async fn highlight(&self, element: ElementHandle) -> Result<(), PageError> {
        self.eval_on(
            element,
            "function() { this.style.border = '3px solid #ff0000'; this.style.backgroundColor = '#ffeeee'; }",
        )
        .await?;
        Ok(())
    }

    async fn click(&self, element: ElementHandle) -> Result<(), PageError> {
        let guard = self.element(element).await?;
        guard.click().await.map_err(unreachable_page)?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.page.goto(url).await.map_err(unreachable_page)?;
        Ok(())
    }
}

/// Find a Chrome/Chromium executable, honoring an explicit configuration
/// override first.
fn find_chrome(settings: &BrowserConfig) -> Option<String> {
    if let Some(path) = &settings.chrome_path {
        return Some(path.clone());
    }

    if let Ok(output) = std::process::Command::new("which")
        .arg("google-chrome")
        .output()
    {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Some(path);
            }
        }
    }

    if let Ok(output) = std::process::Command::new("which").arg("chromium").output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Some(path);
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_path_override_wins() {
        let settings = BrowserConfig {
            chrome_path: Some("/opt/custom/chrome".to_string()),
            ..BrowserConfig::default()
        };
        assert_eq!(find_chrome(&settings), Some("/opt/custom/chrome".to_string()));
    }

    #[test]
    fn unused_path_field_is_unset_by_default() {
        let settings = BrowserConfig::default();
        assert!(settings.chrome_path.is_none());
        assert!(settings.user_data_dir.is_none());
    }
}
