//! The DOM surface the engine drives.
//!
//! The locator and executor never talk to a browser directly; they work
//! against [`PageDom`], an object-safe async view of one loaded page. The
//! live host adapts this onto the DevTools protocol, and [`FixtureDom`]
//! implements it over an in-memory page for tests and the simulated host.

pub mod fixture;

pub use fixture::{ClickEffect, FixtureDom};

use async_trait::async_trait;
use std::fmt;

/// One searchable document scope within a page: the top document, an open
/// shadow root, or a same-origin iframe document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeHandle(u64);

impl ScopeHandle {
    /// The top-level document scope.
    pub const DOCUMENT: ScopeHandle = ScopeHandle(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque reference to one element, valid until the page navigates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    /// The page context cannot be reached: the document navigated away,
    /// the tab died, or the in-page logic is not primed.
    #[error("page context unreachable: {0}")]
    Unreachable(String),
    /// The backend cannot evaluate this selector. The locator treats this
    /// as "matches nothing" rather than a failure.
    #[error("unsupported selector {0:?}")]
    BadSelector(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Async view of one loaded page.
///
/// Methods take element handles previously returned by [`PageDom::query`];
/// a handle from before a navigation is dead and may error. All mutating
/// calls map onto single DOM operations so that backends stay thin.
#[async_trait]
pub trait PageDom: Send + Sync {
    /// Current page URL.
    async fn url(&self) -> Result<String, PageError>;

    /// Accessible search scopes in locator order: the document first, then
    /// open shadow roots, then same-origin iframe documents. Cross-origin
    /// frames are omitted.
    async fn scopes(&self) -> Result<Vec<ScopeHandle>, PageError>;

    /// All elements matching a structural selector within one scope, in
    /// document order.
    async fn query(&self, scope: ScopeHandle, selector: &str)
        -> Result<Vec<ElementHandle>, PageError>;

    /// Rendered text content of an element.
    async fn text(&self, element: ElementHandle) -> Result<String, PageError>;

    async fn is_checked(&self, element: ElementHandle) -> Result<bool, PageError>;

    async fn set_checked(&self, element: ElementHandle, checked: bool) -> Result<(), PageError>;

    /// Set a form control's value. Does not dispatch a change signal;
    /// callers follow up with [`PageDom::fire_change`].
    async fn set_value(&self, element: ElementHandle, value: &str) -> Result<(), PageError>;

    /// Dispatch a change signal on a form control.
    async fn fire_change(&self, element: ElementHandle) -> Result<(), PageError>;

    async fn scroll_into_view(&self, element: ElementHandle) -> Result<(), PageError>;

    /// Apply the pre-click highlight: a red border and tinted background,
    /// observable through the backend's styling surface.
    async fn highlight(&self, element: ElementHandle) -> Result<(), PageError>;

    async fn click(&self, element: ElementHandle) -> Result<(), PageError>;

    /// Ask the containing tab to navigate. The new document is only
    /// usable after the host reports the next load-complete event.
    async fn navigate(&self, url: &str) -> Result<(), PageError>;
}
