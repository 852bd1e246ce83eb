//! Local-first persistence and sharing for FieldRisk assessments
//!
//! Provides:
//! - Local SQLite store, the durable source of truth on the device
//! - Opportunistic backup to a remote store with last-writer-wins merge
//! - Encrypted, expiring share envelopes redeemable on another device
//! - Folder metadata, device identity and a wizard draft slot

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod folders;
pub mod identity;
pub mod local_db;
pub mod merge;
pub mod model;
pub mod remote;
pub mod share;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{ConfigError, FieldRiskConfig, RemoteConfig, ShareConfig};
pub use coordinator::{RecordLocks, SaveOutcome, SyncCoordinator, SyncReport};
pub use error::{RemoteError, RemoteResult, ShareError, ShareResult, SyncError, SyncResult};
pub use export::{ExportContent, ExportRenderer, JsonExportRenderer};
pub use folders::MAX_FOLDERS;
pub use identity::DeviceIdentity;
pub use local_db::{LocalDatabase, LocalDbConfig, RecordStore};
pub use merge::{merge_records, MergeOutcome};
pub use model::{Folder, NewShareEnvelope, Record, ShareEnvelope, ShareTicket, SyncState};
pub use remote::{
    probe_within, HttpRemoteConfig, HttpRemoteStore, InMemoryRemoteStore, RemoteStore,
};
pub use share::ShareManager;

use std::sync::Arc;

/// Everything one installation needs, wired from configuration
pub struct SyncEngine {
    local_db: Arc<LocalDatabase>,
    identity: DeviceIdentity,
    coordinator: SyncCoordinator,
    shares: ShareManager,
}

impl SyncEngine {
    /// Open the local store and, if enabled, the HTTP remote
    pub async fn open(config: &FieldRiskConfig) -> SyncResult<Self> {
        let remote: Option<Arc<dyn RemoteStore>> = match config.remote.http() {
            Some(http) => Some(Arc::new(HttpRemoteStore::new(http)?) as Arc<dyn RemoteStore>),
            None => None,
        };
        Self::with_remote(config, remote, Arc::new(SystemClock)).await
    }

    /// Open with an explicit remote and clock
    pub async fn with_remote(
        config: &FieldRiskConfig,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let local_db = Arc::new(LocalDatabase::new(config.local.clone()).await?);
        let identity = DeviceIdentity::load_or_create(&local_db).await?;

        let coordinator = SyncCoordinator::new(
            local_db.clone(),
            remote.clone(),
            clock.clone(),
            identity.device_id(),
        )
        .with_probe_timeout(config.remote.probe_timeout());

        let shares = ShareManager::new(
            local_db.clone(),
            remote,
            clock,
            identity.device_id(),
            config.share.clone(),
        )
        .with_record_locks(coordinator.record_locks())
        .with_probe_timeout(config.remote.probe_timeout());

        tracing::debug!(device_id = %identity, "Sync engine ready");

        Ok(Self {
            local_db,
            identity,
            coordinator,
            shares,
        })
    }

    pub fn local_db(&self) -> &LocalDatabase {
        &self.local_db
    }

    pub fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn shares(&self) -> &ShareManager {
        &self.shares
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sync_engine_creation() {
        let dir = TempDir::new().unwrap();
        let mut config = FieldRiskConfig::default();
        config.local.db_path = dir.path().join("engine.db").to_string_lossy().into_owned();

        let engine = SyncEngine::open(&config).await.unwrap();
        assert!(!engine.device_id().is_empty());
        assert!(!engine.coordinator().is_cloud_enabled());
        assert_eq!(engine.coordinator().device_id(), engine.device_id());
    }
}
