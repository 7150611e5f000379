use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ServiceId;

/// One completed cancellation, appended to the durable history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub service_id: ServiceId,
    pub service_name: String,
    pub at: DateTime<Utc>,
}

/// Crash-recovery marker for an in-flight session.
///
/// Written when a session starts and removed on its terminal transition.
/// A record that survives a process restart is swept at startup once it is
/// older than the overall session timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub service_id: ServiceId,
    pub started_at: DateTime<Utc>,
}

impl RecoveryRecord {
    pub fn is_stale(&self, now: DateTime<Utc>, overall_timeout: std::time::Duration) -> bool {
        let age = now.signed_duration_since(self.started_at);
        age.num_milliseconds() >= overall_timeout.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn recovery_record_staleness_uses_overall_timeout() {
        let started = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let record = RecoveryRecord {
            service_id: ServiceId::from_string("netflix"),
            started_at: started,
        };

        let timeout = Duration::from_secs(120);
        assert!(!record.is_stale(started + chrono::Duration::seconds(30), timeout));
        assert!(record.is_stale(started + chrono::Duration::seconds(120), timeout));
        assert!(record.is_stale(started + chrono::Duration::hours(1), timeout));
    }
}
