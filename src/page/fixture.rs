//! In-memory page implementation of [`PageDom`].
//!
//! A `FixtureDom` is a flat arena of elements spread over scopes (document,
//! shadow roots, iframes) with scriptable click behavior, so tests and the
//! simulated host can stage multi-page cancellation flows without a
//! browser. It mirrors the live backend's observable semantics: document
//! order is insertion order, detached elements stop matching, clicks apply
//! their scripted effects synchronously.

use std::collections::BTreeMap;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ElementHandle, PageDom, PageError, ScopeHandle};

const HIGHLIGHT_BORDER: &str = "3px solid #ff0000";
const HIGHLIGHT_BACKGROUND: &str = "#ffeeee";

/// What a scripted click does to the page.
#[derive(Debug, Clone)]
pub enum ClickEffect {
    /// Change the page URL, as a navigation-triggering control would.
    SetUrl(String),
    /// Detach an element from the page.
    Remove(u64),
    /// Attach a new element to the document scope.
    Insert {
        tag: String,
        attrs: Vec<(String, String)>,
        text: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    scope: u64,
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: String,
    checked: bool,
    detached: bool,
    border: Option<String>,
    background: Option<String>,
    scrolled: bool,
    clicks: u32,
    change_events: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Document,
    ShadowRoot,
    Frame { same_origin: bool },
}

#[derive(Debug)]
struct FixtureState {
    url: String,
    nodes: Vec<Node>,
    scope_kinds: Vec<ScopeKind>,
    click_effects: BTreeMap<u64, Vec<ClickEffect>>,
}

/// Scriptable in-memory page.
#[derive(Debug)]
pub struct FixtureDom {
    state: Mutex<FixtureState>,
}

impl FixtureDom {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                url: url.into(),
                nodes: Vec::new(),
                scope_kinds: vec![ScopeKind::Document],
                click_effects: BTreeMap::new(),
            }),
        }
    }

    /// Attach an element to the document scope; returns its id.
    ///
    /// `attrs` entries named `id` and `class` feed `#id` and `.class`
    /// matching.
    pub async fn insert(&self, tag: &str, attrs: &[(&str, &str)], text: &str) -> u64 {
        self.insert_in(ScopeHandle::DOCUMENT, tag, attrs, text).await
    }

    pub async fn insert_in(
        &self,
        scope: ScopeHandle,
        tag: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> u64 {
        let mut state = self.state.lock().await;
        state.attach(scope.raw(), tag, attrs, text)
    }

    /// Add an open shadow root scope.
    pub async fn add_shadow_root(&self) -> ScopeHandle {
        let mut state = self.state.lock().await;
        state.scope_kinds.push(ScopeKind::ShadowRoot);
        ScopeHandle::new(state.scope_kinds.len() as u64 - 1)
    }

    /// Add an iframe document scope. Cross-origin frames exist in the page
    /// but are invisible to [`PageDom::scopes`].
    pub async fn add_frame(&self, same_origin: bool) -> ScopeHandle {
        let mut state = self.state.lock().await;
        state.scope_kinds.push(ScopeKind::Frame { same_origin });
        ScopeHandle::new(state.scope_kinds.len() as u64 - 1)
    }

    /// Detach an element from the page.
    pub async fn remove(&self, element: u64) {
        let mut state = self.state.lock().await;
        if let Some(node) = state.nodes.get_mut(element as usize) {
            node.detached = true;
        }
    }

    pub async fn set_url(&self, url: impl Into<String>) {
        self.state.lock().await.url = url.into();
    }

    /// Script what clicking `element` does, in addition to being counted.
    /// Effects run in registration order.
    pub async fn on_click(&self, element: u64, effect: ClickEffect) {
        let mut state = self.state.lock().await;
        state.click_effects.entry(element).or_default().push(effect);
    }

    pub async fn current_url(&self) -> String {
        self.state.lock().await.url.clone()
    }

    pub async fn click_count(&self, element: u64) -> u32 {
        let state = self.state.lock().await;
        state.nodes.get(element as usize).map(|n| n.clicks).unwrap_or(0)
    }

    pub async fn change_count(&self, element: u64) -> u32 {
        let state = self.state.lock().await;
        state
            .nodes
            .get(element as usize)
            .map(|n| n.change_events)
            .unwrap_or(0)
    }

    pub async fn is_highlighted(&self, element: u64) -> bool {
        let state = self.state.lock().await;
        state
            .nodes
            .get(element as usize)
            .map(|n| n.border.as_deref() == Some(HIGHLIGHT_BORDER) && n.background.is_some())
            .unwrap_or(false)
    }

    pub async fn was_scrolled_to(&self, element: u64) -> bool {
        let state = self.state.lock().await;
        state.nodes.get(element as usize).map(|n| n.scrolled).unwrap_or(false)
    }

    pub async fn value_of(&self, element: u64) -> String {
        let state = self.state.lock().await;
        state
            .nodes
            .get(element as usize)
            .map(|n| n.value.clone())
            .unwrap_or_default()
    }

    pub async fn checked_of(&self, element: u64) -> bool {
        let state = self.state.lock().await;
        state.nodes.get(element as usize).map(|n| n.checked).unwrap_or(false)
    }
}

impl FixtureState {
    fn attach(&mut self, scope: u64, tag: &str, attrs: &[(&str, &str)], text: &str) -> u64 {
        let id = self.nodes.len() as u64;
        self.nodes.push(Node {
            scope,
            tag: tag.to_ascii_lowercase(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: text.to_string(),
            value: String::new(),
            checked: false,
            detached: false,
            border: None,
            background: None,
            scrolled: false,
            clicks: 0,
            change_events: 0,
        });
        id
    }

    fn node(&self, element: ElementHandle) -> Result<&Node, PageError> {
        self.nodes
            .get(element.raw() as usize)
            .ok_or_else(|| PageError::Backend(anyhow!("no element {}", element.raw())))
    }

    fn node_mut(&mut self, element: ElementHandle) -> Result<&mut Node, PageError> {
        self.nodes
            .get_mut(element.raw() as usize)
            .ok_or_else(|| PageError::Backend(anyhow!("no element {}", element.raw())))
    }

    fn apply(&mut self, effect: &ClickEffect) {
        match effect {
            ClickEffect::SetUrl(url) => {
                self.url = url.clone();
            }
            ClickEffect::Remove(target) => {
                if let Some(node) = self.nodes.get_mut(*target as usize) {
                    node.detached = true;
                }
            }
            ClickEffect::Insert { tag, attrs, text } => {
                let attrs: Vec<(&str, &str)> =
                    attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                self.attach(ScopeHandle::DOCUMENT.raw(), tag, &attrs, text);
            }
        }
    }
}

#[async_trait]
impl PageDom for FixtureDom {
    async fn url(&self) -> Result<String, PageError> {
        Ok(self.state.lock().await.url.clone())
    }

    async fn scopes(&self) -> Result<Vec<ScopeHandle>, PageError> {
        let state = self.state.lock().await;
        let by_kind = |want: fn(&ScopeKind) -> bool| {
            state
                .scope_kinds
                .iter()
                .enumerate()
                .filter(move |(_, kind)| want(kind))
                .map(|(idx, _)| ScopeHandle::new(idx as u64))
        };
        let mut scopes: Vec<ScopeHandle> =
            by_kind(|k| matches!(k, ScopeKind::Document)).collect();
        scopes.extend(by_kind(|k| matches!(k, ScopeKind::ShadowRoot)));
        scopes.extend(by_kind(|k| matches!(k, ScopeKind::Frame { same_origin: true })));
        Ok(scopes)
    }

    async fn query(
        &self,
        scope: ScopeHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, PageError> {
        let compound = Compound::parse(selector)?;
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.scope == scope.raw() && !node.detached && compound.matches(node)
            })
            .map(|(idx, _)| ElementHandle::new(idx as u64))
            .collect())
    }

    async fn text(&self, element: ElementHandle) -> Result<String, PageError> {
        let state = self.state.lock().await;
        Ok(state.node(element)?.text.clone())
    }

    async fn is_checked(&self, element: ElementHandle) -> Result<bool, PageError> {
        let state = self.state.lock().await;
        Ok(state.node(element)?.checked)
    }

    async fn set_checked(&self, element: ElementHandle, checked: bool) -> Result<(), PageError> {
        let mut state = self.state.lock().await;
        state.node_mut(element)?.checked = checked;
        Ok(())
    }

    async fn set_value(&self, element: ElementHandle, value: &str) -> Result<(), PageError> {
        let mut state = self.state.lock().await;
        state.node_mut(element)?.value = value.to_string();
        Ok(())
    }

    async fn fire_change(&self, element: ElementHandle) -> Result<(), PageError> {
        let mut state = self.state.lock().await;
        state.node_mut(element)?.change_events += 1;
        Ok(())
    }

    async fn scroll_into_view(&self, element: ElementHandle) -> Result<(), PageError> {
        let mut state = self.state.lock().await;
        state.node_mut(element)?.scrolled = true;
        Ok(())
    }

    async fn highlight(&self, element: ElementHandle) -> Result<(), PageError> {
        let mut state = self.state.lock().await;
        let node = state.node_mut(element)?;
        node.border = Some(HIGHLIGHT_BORDER.to_string());
        node.background = Some(HIGHLIGHT_BACKGROUND.to_string());
        Ok(())
    }

    async fn click(&self, element: ElementHandle) -> Result<(), PageError> {
        let mut state = self.state.lock().await;
        state.node_mut(element)?.clicks += 1;
        let effects = state
            .click_effects
            .get(&element.raw())
            .cloned()
            .unwrap_or_default();
        for effect in &effects {
            state.apply(effect);
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.state.lock().await.url = url.to_string();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Present,
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
struct AttrCond {
    name: String,
    op: AttrOp,
    value: String,
}

/// One parsed compound selector: `tag#id.class[attr="v"]`.
///
/// Combinators (descendant, child, sibling) and pseudo-selectors are out of
/// scope here and reject as [`PageError::BadSelector`]; the locator skips
/// such selectors instead of failing a poll.
#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCond>,
}

impl Compound {
    fn parse(selector: &str) -> Result<Self, PageError> {
        let bad = || PageError::BadSelector(selector.to_string());
        let input = selector.trim();
        if input.is_empty() {
            return Err(bad());
        }

        let mut compound = Compound::default();
        let mut chars = input.char_indices().peekable();

        // Leading tag name or universal selector.
        match chars.peek() {
            Some((_, '*')) => {
                chars.next();
            }
            Some((_, c)) if c.is_ascii_alphanumeric() => {
                let mut tag = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '-' {
                        tag.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                compound.tag = Some(tag.to_ascii_lowercase());
            }
            _ => {}
        }

        while let Some((idx, c)) = chars.next() {
            match c {
                '#' | '.' => {
                    let mut name = String::new();
                    while let Some((_, c)) = chars.peek() {
                        if c.is_ascii_alphanumeric() || *c == '-' || *c == '_' {
                            name.push(*c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(bad());
                    }
                    if c == '#' {
                        compound.id = Some(name);
                    } else {
                        compound.classes.push(name);
                    }
                }
                '[' => {
                    let rest = &input[idx + 1..];
                    let end = rest.find(']').ok_or_else(bad)?;
                    compound.attrs.push(parse_attr(&rest[..end]).ok_or_else(bad)?);
                    // Skip past the closing bracket.
                    while let Some((i, _)) = chars.next() {
                        if i == idx + 1 + end {
                            break;
                        }
                    }
                }
                // Pseudo-selectors and combinators belong to richer engines.
                _ => return Err(bad()),
            }
        }

        Ok(compound)
    }

    fn matches(&self, node: &Node) -> bool {
        if let Some(tag) = &self.tag {
            if &node.tag != tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.attrs.get("id") != Some(id) {
                return false;
            }
        }
        for class in &self.classes {
            let has = node
                .attrs
                .get("class")
                .map(|c| c.split_whitespace().any(|part| part == class))
                .unwrap_or(false);
            if !has {
                return false;
            }
        }
        for cond in &self.attrs {
            let Some(actual) = node.attrs.get(&cond.name) else {
                return false;
            };
            let ok = match cond.op {
                AttrOp::Present => true,
                AttrOp::Equals => actual == &cond.value,
                AttrOp::Contains => actual.contains(&cond.value),
                AttrOp::StartsWith => actual.starts_with(&cond.value),
                AttrOp::EndsWith => actual.ends_with(&cond.value),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

fn parse_attr(body: &str) -> Option<AttrCond> {
    let body = body.trim();
    let (name, op, raw_value) = if let Some(at) = body.find("*=") {
        (&body[..at], AttrOp::Contains, Some(&body[at + 2..]))
    } else if let Some(at) = body.find("^=") {
        (&body[..at], AttrOp::StartsWith, Some(&body[at + 2..]))
    } else if let Some(at) = body.find("$=") {
        (&body[..at], AttrOp::EndsWith, Some(&body[at + 2..]))
    } else if let Some(at) = body.find('=') {
        (&body[..at], AttrOp::Equals, Some(&body[at + 1..]))
    } else {
        (body, AttrOp::Present, None)
    };

    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let value = match raw_value {
        None => String::new(),
        Some(raw) => {
            let raw = raw.trim();
            let stripped = raw
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .or_else(|| raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
                .unwrap_or(raw);
            stripped.to_string()
        }
    };

    Some(AttrCond {
        name: name.to_string(),
        op,
        value,
    })
}
