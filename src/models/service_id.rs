use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid service id {value:?}: ids must be non-empty lowercase slugs (a-z, 0-9, '-')")]
pub struct ServiceIdError {
    value: String,
}

/// Identifier of a catalog service, e.g. `netflix` or `youtube-premium`.
///
/// Service ids double as storage path segments, so they are restricted to
/// lowercase slug characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    /// Create a service id from an arbitrary string without validation.
    ///
    /// Intended for catalog-internal literals that are known to be slugs.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Create a service id, validating the slug shape.
    pub fn parse(value: impl Into<String>) -> Result<Self, ServiceIdError> {
        let value = value.into();
        if Self::is_valid_slug(&value) {
            Ok(Self(value))
        } else {
            Err(ServiceIdError { value })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for non-empty strings of lowercase ASCII letters,
    /// digits, and hyphens. Such strings are always safe path segments.
    pub fn is_valid_slug(value: &str) -> bool {
        !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for ServiceId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_slugs() {
        assert!(ServiceId::parse("netflix").is_ok());
        assert!(ServiceId::parse("youtube-premium").is_ok());
        assert!(ServiceId::parse("svc-2").is_ok());
    }

    #[test]
    fn parse_rejects_non_slugs() {
        assert!(ServiceId::parse("").is_err());
        assert!(ServiceId::parse("Netflix").is_err());
        assert!(ServiceId::parse("a/b").is_err());
        assert!(ServiceId::parse("..").is_err());
        assert!(ServiceId::parse("with space").is_err());
    }

    #[test]
    fn serde_is_transparent() {
        let id = ServiceId::from_string("netflix");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"netflix\"");
        let back: ServiceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
