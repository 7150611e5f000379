use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::ServiceId;

/// Per-service user preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Disabled services are skipped by status sweeps and refused for
    /// cancellation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// User-editable engine settings, stored as one JSON document and replaced
/// whole on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Run periodic status sweeps from the daemon.
    #[serde(default = "default_auto_check")]
    pub auto_check: bool,
    /// Interval between automatic sweeps, in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Ask for confirmation (proceed/abort notification) before starting a
    /// cancellation.
    #[serde(default)]
    pub confirm_before_cancel: bool,
    /// Per-service overrides; services absent from the map use defaults.
    #[serde(default)]
    pub services: BTreeMap<ServiceId, ServiceSettings>,
}

fn default_auto_check() -> bool {
    true
}

fn default_check_interval_secs() -> u64 {
    24 * 60 * 60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_check: true,
            check_interval_secs: default_check_interval_secs(),
            confirm_before_cancel: false,
            services: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn is_enabled(&self, id: &ServiceId) -> bool {
        self.services.get(id).map(|s| s.enabled).unwrap_or(true)
    }

    pub fn set_enabled(&mut self, id: ServiceId, enabled: bool) {
        self.services.entry(id).or_default().enabled = enabled;
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_services_default_to_enabled() {
        let settings = Settings::default();
        assert!(settings.is_enabled(&ServiceId::from_string("netflix")));
    }

    #[test]
    fn set_enabled_round_trips() {
        let mut settings = Settings::default();
        let id = ServiceId::from_string("hulu");
        settings.set_enabled(id.clone(), false);
        assert!(!settings.is_enabled(&id));

        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert!(!back.is_enabled(&id));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert!(settings.auto_check);
        assert_eq!(settings.check_interval(), Duration::from_secs(86400));
        assert!(!settings.confirm_before_cancel);
    }
}
