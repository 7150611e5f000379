use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::Storage;
use crate::models::{HistoryEntry, RecoveryRecord, ServiceId, Settings, StatusRecord};

/// JSON file-based storage implementation.
///
/// Directory structure:
/// ```text
/// data/
///   settings.json
///   history.jsonl
///   status/
///     {service_id}.json
///   recovery/
///     {service_id}.json
/// ```
#[derive(Clone)]
pub struct JsonFileStorage {
    base_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn settings_file(&self) -> PathBuf {
        self.base_path.join("settings.json")
    }

    fn history_file(&self) -> PathBuf {
        self.base_path.join("history.jsonl")
    }

    fn status_dir(&self) -> PathBuf {
        self.base_path.join("status")
    }

    fn status_file(&self, service: &ServiceId) -> PathBuf {
        self.status_dir().join(format!("{}.json", service.as_str()))
    }

    fn recovery_dir(&self) -> PathBuf {
        self.base_path.join("recovery")
    }

    fn recovery_file(&self, service: &ServiceId) -> PathBuf {
        self.recovery_dir().join(format!("{}.json", service.as_str()))
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create directory")?;
        }
        Ok(())
    }

    async fn read_json<T: for<'de> serde::Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse JSON from {:?}", path))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read file"),
        }
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        self.ensure_dir(path).await?;
        let content = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
        fs::write(path, content)
            .await
            .context("Failed to write file")?;
        Ok(())
    }

    async fn read_jsonl<T: for<'de> serde::Deserialize<'de>>(&self, path: &Path) -> Result<Vec<T>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to open file"),
        };

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut items = Vec::new();

        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.trim().is_empty() {
                continue;
            }
            let item: T = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse JSONL line: {}", line))?;
            items.push(item);
        }

        Ok(items)
    }

    async fn append_jsonl<T: serde::Serialize>(&self, path: &Path, items: &[T]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        self.ensure_dir(path).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context("Failed to open file for append")?;

        for item in items {
            let line = serde_json::to_string(item).context("Failed to serialize item")?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }

        Ok(())
    }

    /// Read every `{service_id}.json` in a directory; absent directory
    /// means nothing stored yet.
    async fn read_dir_json<T: for<'de> serde::Deserialize<'de>>(&self, dir: &Path) -> Result<Vec<T>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to read directory"),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("Failed to read entry")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut items = Vec::new();
        for path in paths {
            if let Some(item) = self.read_json(&path).await? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl Storage for JsonFileStorage {
    async fn get_settings(&self) -> Result<Settings> {
        Ok(self
            .read_json(&self.settings_file())
            .await?
            .unwrap_or_default())
    }

    async fn put_settings(&self, settings: &Settings) -> Result<()> {
        self.write_json(&self.settings_file(), settings).await
    }

    async fn get_status(&self, service: &ServiceId) -> Result<Option<StatusRecord>> {
        self.read_json(&self.status_file(service)).await
    }

    async fn put_status(&self, record: &StatusRecord) -> Result<()> {
        self.write_json(&self.status_file(&record.service_id), record)
            .await
    }

    async fn list_statuses(&self) -> Result<Vec<StatusRecord>> {
        self.read_dir_json(&self.status_dir()).await
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        self.append_jsonl(&self.history_file(), std::slice::from_ref(entry))
            .await
    }

    async fn get_history(&self) -> Result<Vec<HistoryEntry>> {
        self.read_jsonl(&self.history_file()).await
    }

    async fn put_recovery(&self, record: &RecoveryRecord) -> Result<()> {
        self.write_json(&self.recovery_file(&record.service_id), record)
            .await
    }

    async fn remove_recovery(&self, service: &ServiceId) -> Result<()> {
        match fs::remove_file(self.recovery_file(service)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove recovery marker"),
        }
    }

    async fn list_recovery(&self) -> Result<Vec<RecoveryRecord>> {
        self.read_dir_json(&self.recovery_dir()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionStatus;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn storage() -> (TempDir, JsonFileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn settings_default_then_round_trip() -> Result<()> {
        let (_dir, storage) = storage();

        let settings = storage.get_settings().await?;
        assert!(settings.auto_check);

        let mut settings = settings;
        settings.set_enabled(ServiceId::from_string("netflix"), false);
        settings.confirm_before_cancel = true;
        storage.put_settings(&settings).await?;

        let back = storage.get_settings().await?;
        assert_eq!(back, settings);
        Ok(())
    }

    #[tokio::test]
    async fn status_records_stored_per_service() -> Result<()> {
        let (_dir, storage) = storage();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

        assert!(storage
            .get_status(&ServiceId::from_string("hulu"))
            .await?
            .is_none());

        storage
            .put_status(&StatusRecord::new(
                ServiceId::from_string("hulu"),
                SubscriptionStatus::Active,
                at,
            ))
            .await?;
        storage
            .put_status(
                &StatusRecord::new(ServiceId::from_string("netflix"), SubscriptionStatus::Inactive, at)
                    .with_next_billing("3/15/2026"),
            )
            .await?;

        let one = storage
            .get_status(&ServiceId::from_string("netflix"))
            .await?
            .unwrap();
        assert_eq!(one.status, SubscriptionStatus::Inactive);
        assert_eq!(one.next_billing.as_deref(), Some("3/15/2026"));

        let all = storage.list_statuses().await?;
        assert_eq!(all.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn history_appends_in_order() -> Result<()> {
        let (_dir, storage) = storage();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

        for (idx, name) in ["Netflix", "Hulu"].iter().enumerate() {
            storage
                .append_history(&HistoryEntry {
                    service_id: ServiceId::from_string(name.to_lowercase()),
                    service_name: name.to_string(),
                    at: at + chrono::Duration::minutes(idx as i64),
                })
                .await?;
        }

        let history = storage.get_history().await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].service_name, "Netflix");
        assert_eq!(history[1].service_name, "Hulu");
        Ok(())
    }

    #[tokio::test]
    async fn recovery_markers_add_and_remove() -> Result<()> {
        let (_dir, storage) = storage();
        let id = ServiceId::from_string("spotify");

        storage
            .put_recovery(&RecoveryRecord {
                service_id: id.clone(),
                started_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            })
            .await?;
        assert_eq!(storage.list_recovery().await?.len(), 1);

        storage.remove_recovery(&id).await?;
        assert!(storage.list_recovery().await?.is_empty());

        // Removing again is fine.
        storage.remove_recovery(&id).await?;
        Ok(())
    }
}
