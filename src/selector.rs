//! Selector expressions for locating elements.
//!
//! Catalog entries mix plain CSS selectors with a `:contains("text")`
//! pseudo-selector borrowed from jQuery. The pseudo form is not valid CSS,
//! so selectors are parsed up front into a tagged [`Selector`] and the
//! text-containment matching is done by the locator, never by the DOM
//! backend.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,
    #[error("selector {0:?}: :contains() needs a non-empty text argument")]
    MissingText(String),
    #[error("selector {0:?}: unterminated :contains() argument")]
    Unterminated(String),
}

/// A parsed selector expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Selector {
    /// A structural selector evaluated by the DOM backend as-is.
    Structural(String),
    /// `base:contains("text")`: elements matching `base` whose
    /// whitespace-normalized text contains `text`. An empty base means all
    /// elements. The last match in document order wins.
    TextContains { base: String, text: String },
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SelectorError::Empty);
        }

        let Some(at) = input.find(":contains(") else {
            return Ok(Selector::Structural(input.to_string()));
        };

        let base = input[..at].trim();
        let arg = &input[at + ":contains(".len()..];

        let (text, rest) = match arg.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let inner = &arg[1..];
                let Some(end) = inner.find(quote) else {
                    return Err(SelectorError::Unterminated(input.to_string()));
                };
                (&inner[..end], &inner[end + 1..])
            }
            _ => {
                let Some(end) = arg.find(')') else {
                    return Err(SelectorError::Unterminated(input.to_string()));
                };
                (&arg[..end], &arg[end..])
            }
        };

        if !rest.trim_start().starts_with(')') {
            return Err(SelectorError::Unterminated(input.to_string()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SelectorError::MissingText(input.to_string()));
        }

        Ok(Selector::TextContains {
            base: if base.is_empty() {
                "*".to_string()
            } else {
                base.to_string()
            },
            text: text.to_string(),
        })
    }

    /// The structural part handed to the DOM backend.
    pub fn base(&self) -> &str {
        match self {
            Selector::Structural(base) => base,
            Selector::TextContains { base, .. } => base,
        }
    }

    /// Parse a whole list, failing on the first bad entry.
    pub fn parse_all<I, S>(inputs: I) -> Result<Vec<Self>, SelectorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        inputs.into_iter().map(|s| Self::parse(s.as_ref())).collect()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Structural(base) => f.write_str(base),
            Selector::TextContains { base, text } => {
                write!(f, "{base}:contains(\"{text}\")")
            }
        }
    }
}

impl TryFrom<String> for Selector {
    type Error = SelectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(value: Selector) -> Self {
        value.to_string()
    }
}

/// Collapse runs of whitespace to single spaces, matching how rendered text
/// is compared.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Containment test over whitespace-normalized text.
pub fn text_contains(haystack: &str, needle: &str) -> bool {
    normalize_text(haystack).contains(&normalize_text(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_selector_is_structural() {
        assert_eq!(
            Selector::parse("button[data-uia='cancel']").unwrap(),
            Selector::Structural("button[data-uia='cancel']".into())
        );
    }

    #[test]
    fn contains_with_double_quotes() {
        assert_eq!(
            Selector::parse("button:contains(\"Cancel Membership\")").unwrap(),
            Selector::TextContains {
                base: "button".into(),
                text: "Cancel Membership".into()
            }
        );
    }

    #[test]
    fn contains_with_single_quotes_and_bare_text() {
        assert_eq!(
            Selector::parse("a:contains('Finish')").unwrap(),
            Selector::TextContains {
                base: "a".into(),
                text: "Finish".into()
            }
        );
        assert_eq!(
            Selector::parse("a:contains(Finish)").unwrap(),
            Selector::TextContains {
                base: "a".into(),
                text: "Finish".into()
            }
        );
    }

    #[test]
    fn empty_base_defaults_to_star() {
        assert_eq!(
            Selector::parse(":contains(\"Cancel\")").unwrap(),
            Selector::TextContains {
                base: "*".into(),
                text: "Cancel".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_contains() {
        assert_eq!(
            Selector::parse("button:contains(\"Cancel"),
            Err(SelectorError::Unterminated("button:contains(\"Cancel".into()))
        );
        assert_eq!(
            Selector::parse("button:contains()"),
            Err(SelectorError::MissingText("button:contains()".into()))
        );
        assert_eq!(Selector::parse("  "), Err(SelectorError::Empty));
    }

    #[test]
    fn display_round_trips() {
        for raw in ["#cancel-btn", "button:contains(\"Cancel\")"] {
            let sel = Selector::parse(raw).unwrap();
            assert_eq!(Selector::parse(&sel.to_string()).unwrap(), sel);
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let sel: Selector = serde_json::from_str("\"button:contains('End plan')\"").unwrap();
        assert_eq!(
            sel,
            Selector::TextContains {
                base: "button".into(),
                text: "End plan".into()
            }
        );
        assert!(serde_json::from_str::<Selector>("\"x:contains(\"").is_err());
    }

    #[test]
    fn text_matching_normalizes_whitespace() {
        assert!(text_contains("  Cancel\n   Membership ", "Cancel Membership"));
        assert!(!text_contains("Keep Membership", "Cancel"));
    }
}
