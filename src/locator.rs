//! Polling element locator.
//!
//! Given an ordered selector list, find the first element the page currently
//! offers, re-sweeping on an interval until a budget runs out. Priority is
//! selector-major: every scope is tried for the first selector before the
//! second selector is considered, so catalog authors can rank fallbacks.
//!
//! Within one selector the scopes run in the order the page reports them
//! (document, then open shadow roots, then same-origin frames) and the first
//! scope with any match settles the result: first match in document order
//! for structural selectors, last match for text-filtered ones, since
//! "cancel" text tends to sit on the innermost, most specific control.

use std::time::Duration;

use tokio::time::Instant;

use crate::page::{ElementHandle, PageDom, PageError};
use crate::selector::{text_contains, Selector};

/// Poll for the first locatable element until `budget` elapses.
///
/// The first sweep happens immediately, so a zero budget means exactly one
/// pass over the page. Returns `Ok(None)` when the budget runs out without
/// a match; selectors the page cannot evaluate are skipped, not fatal.
pub async fn locate(
    page: &dyn PageDom,
    selectors: &[Selector],
    budget: Duration,
    poll: Duration,
) -> Result<Option<ElementHandle>, PageError> {
    let start = Instant::now();
    loop {
        if let Some(element) = sweep(page, selectors).await? {
            return Ok(Some(element));
        }
        if start.elapsed() >= budget {
            return Ok(None);
        }
        tokio::time::sleep(poll).await;
    }
}

/// Single sweep, no waiting.
pub async fn locate_once(
    page: &dyn PageDom,
    selectors: &[Selector],
) -> Result<Option<ElementHandle>, PageError> {
    sweep(page, selectors).await
}

async fn sweep(
    page: &dyn PageDom,
    selectors: &[Selector],
) -> Result<Option<ElementHandle>, PageError> {
    let scopes = page.scopes().await?;
    'selectors: for selector in selectors {
        for scope in &scopes {
            let matches = match page.query(*scope, selector.base()).await {
                Ok(matches) => matches,
                Err(PageError::BadSelector(raw)) => {
                    tracing::debug!(selector = %raw, "skipping selector the page cannot evaluate");
                    continue 'selectors;
                }
                Err(err) => return Err(err),
            };
            match selector {
                Selector::Structural(_) => {
                    if let Some(first) = matches.first() {
                        return Ok(Some(*first));
                    }
                }
                Selector::TextContains { text, .. } => {
                    let mut last = None;
                    for element in matches {
                        if text_contains(&page.text(element).await?, text) {
                            last = Some(element);
                        }
                    }
                    if last.is_some() {
                        return Ok(last);
                    }
                }
            }
        }
    }
    Ok(None)
}
