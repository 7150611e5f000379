mod json_file;
mod memory;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;

use anyhow::Result;
use crate::models::{HistoryEntry, RecoveryRecord, ServiceId, Settings, StatusRecord};

/// Storage trait for persisting engine state.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Settings
    /// Defaults when nothing has been saved yet.
    async fn get_settings(&self) -> Result<Settings>;
    async fn put_settings(&self, settings: &Settings) -> Result<()>;

    // Status cache
    async fn get_status(&self, service: &ServiceId) -> Result<Option<StatusRecord>>;
    async fn put_status(&self, record: &StatusRecord) -> Result<()>;
    async fn list_statuses(&self) -> Result<Vec<StatusRecord>>;

    // Cancellation history, append-only, oldest first
    async fn append_history(&self, entry: &HistoryEntry) -> Result<()>;
    async fn get_history(&self) -> Result<Vec<HistoryEntry>>;

    // Crash-recovery markers for in-flight sessions
    async fn put_recovery(&self, record: &RecoveryRecord) -> Result<()>;
    /// Removing an absent marker is not an error.
    async fn remove_recovery(&self, service: &ServiceId) -> Result<()>;
    async fn list_recovery(&self) -> Result<Vec<RecoveryRecord>>;
}
