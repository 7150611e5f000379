//! In-memory storage implementation for testing.

use std::collections::BTreeMap;

use anyhow::Result;
use tokio::sync::Mutex;

use super::Storage;
use crate::models::{HistoryEntry, RecoveryRecord, ServiceId, Settings, StatusRecord};

/// In-memory storage, mirroring the file-backed semantics.
pub struct MemoryStorage {
    settings: Mutex<Option<Settings>>,
    statuses: Mutex<BTreeMap<ServiceId, StatusRecord>>,
    history: Mutex<Vec<HistoryEntry>>,
    recovery: Mutex<BTreeMap<ServiceId, RecoveryRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            settings: Mutex::new(None),
            statuses: Mutex::new(BTreeMap::new()),
            history: Mutex::new(Vec::new()),
            recovery: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get_settings(&self) -> Result<Settings> {
        let settings = self.settings.lock().await;
        Ok(settings.clone().unwrap_or_default())
    }

    async fn put_settings(&self, new: &Settings) -> Result<()> {
        let mut settings = self.settings.lock().await;
        *settings = Some(new.clone());
        Ok(())
    }

    async fn get_status(&self, service: &ServiceId) -> Result<Option<StatusRecord>> {
        let statuses = self.statuses.lock().await;
        Ok(statuses.get(service).cloned())
    }

    async fn put_status(&self, record: &StatusRecord) -> Result<()> {
        let mut statuses = self.statuses.lock().await;
        statuses.insert(record.service_id.clone(), record.clone());
        Ok(())
    }

    async fn list_statuses(&self) -> Result<Vec<StatusRecord>> {
        let statuses = self.statuses.lock().await;
        Ok(statuses.values().cloned().collect())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        let mut history = self.history.lock().await;
        history.push(entry.clone());
        Ok(())
    }

    async fn get_history(&self) -> Result<Vec<HistoryEntry>> {
        let history = self.history.lock().await;
        Ok(history.clone())
    }

    async fn put_recovery(&self, record: &RecoveryRecord) -> Result<()> {
        let mut recovery = self.recovery.lock().await;
        recovery.insert(record.service_id.clone(), record.clone());
        Ok(())
    }

    async fn remove_recovery(&self, service: &ServiceId) -> Result<()> {
        let mut recovery = self.recovery.lock().await;
        recovery.remove(service);
        Ok(())
    }

    async fn list_recovery(&self) -> Result<Vec<RecoveryRecord>> {
        let recovery = self.recovery.lock().await;
        Ok(recovery.values().cloned().collect())
    }
}
