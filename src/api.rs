//! Typed request/response surface for engine frontends.
//!
//! Every frontend, the CLI included, talks to the engine through these
//! messages. They serialize with a `type` tag so an IPC transport can carry
//! them verbatim.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::models::{CancelOutcome, HistoryEntry, ServiceId, Settings, StatusRecord};
use crate::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    GetServices,
    CheckStatus { service_id: ServiceId },
    CheckAllStatuses,
    CancelSubscription { service_id: ServiceId },
    GetSettings,
    UpdateSettings { settings: Settings },
    GetHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Services { services: Vec<ServiceInfo> },
    Status { record: StatusRecord },
    Statuses { records: Vec<StatusRecord> },
    CancelResult { outcome: CancelOutcome },
    Settings { settings: Settings },
    /// Newest first.
    History { entries: Vec<HistoryEntry> },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

/// Catalog entry merged with per-service settings and the cached status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub name: String,
    pub domain: String,
    pub color: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<StatusRecord>,
}

/// The service list every frontend renders: catalog order, with settings
/// applied and the last cached status attached.
pub async fn service_infos(catalog: &Catalog, storage: &dyn Storage) -> Result<Vec<ServiceInfo>> {
    let settings = storage.get_settings().await?;
    let mut infos = Vec::with_capacity(catalog.services().len());
    for service in catalog.services() {
        let last_status = storage.get_status(&service.id).await?;
        infos.push(ServiceInfo {
            id: service.id.clone(),
            name: service.name.clone(),
            domain: service.domain.clone(),
            color: service.color.clone(),
            enabled: settings.is_enabled(&service.id),
            last_status,
        });
    }
    Ok(infos)
}
