mod history;
mod outcome;
mod service_id;
mod settings;
mod status;

pub use history::{HistoryEntry, RecoveryRecord};
pub use outcome::{CancelOutcome, ErrorKind, StepResult};
pub use service_id::{ServiceId, ServiceIdError};
pub use settings::{ServiceSettings, Settings};
pub use status::{StatusRecord, SubscriptionStatus};
