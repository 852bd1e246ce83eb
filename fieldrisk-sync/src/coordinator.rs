//! Sync coordinator
//!
//! Owns the save-then-sync flow, whole-set sync with last-writer-wins, and
//! the per-session "cloud disabled" switch.
//!
//! Locking:
//! - one async mutex per record id, taken in sorted id order when several
//!   are needed
//! - one mutex around whole-set syncs so two never overlap
//!
//! Remote failures never surface from [`SyncCoordinator::save_assessment`]
//! or [`SyncCoordinator::sync_with_remote`]; they are logged, the cloud is
//! disabled for the session and the local copy stays authoritative.

use crate::clock::Clock;
use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::export::{ExportContent, ExportRenderer};
use crate::local_db::RecordStore;
use crate::merge::merge_records;
use crate::model::{Record, SyncState};
use crate::remote::{probe_within, RemoteStore};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default bound on a reachability probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// What happened to a saved record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Durable locally and confirmed by the remote
    Synced,
    /// Durable locally only
    LocalOnly,
}

/// Summary of a whole-set sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// False when the remote could not be reached; nothing else happened
    pub online: bool,
    /// Records whose remote copy replaced the local one
    pub pulled: usize,
    /// Records the remote was missing or held an older copy of
    pub pushed: usize,
    /// Records in the merged set
    pub total: usize,
    /// The merged set was upserted and marked synced
    pub confirmed: bool,
}

impl SyncReport {
    pub fn offline() -> Self {
        Self::default()
    }
}

/// Removes ids from the in-flight set when dropped
struct InFlight<'a> {
    set: &'a DashSet<String>,
    ids: Vec<String>,
}

impl<'a> InFlight<'a> {
    fn mark(set: &'a DashSet<String>, ids: Vec<String>) -> Self {
        for id in &ids {
            set.insert(id.clone());
        }
        Self { set, ids }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        for id in &self.ids {
            self.set.remove(id);
        }
    }
}

/// One async mutex per record id.
///
/// Shared by every writer that does a read-modify-write of a single record,
/// so a save, a sync and a share redemption never interleave on one id.
#[derive(Default)]
pub struct RecordLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RecordLocks {
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Lock every id in sorted order
    pub async fn lock_many(&self, ids: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.lock(id).await);
        }
        guards
    }
}

pub struct SyncCoordinator {
    store: Arc<dyn RecordStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    clock: Arc<dyn Clock>,
    device_id: String,
    probe_timeout: Duration,
    cloud_disabled: AtomicBool,
    record_locks: Arc<RecordLocks>,
    in_flight: DashSet<String>,
    sync_lock: Mutex<()>,
}

impl SyncCoordinator {
    /// `remote` is `None` when the app runs without a backup store.
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
            device_id: device_id.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            cloud_disabled: AtomicBool::new(false),
            record_locks: Arc::new(RecordLocks::default()),
            in_flight: DashSet::new(),
            sync_lock: Mutex::new(()),
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Lock map to share with other single-record writers
    pub fn record_locks(&self) -> Arc<RecordLocks> {
        self.record_locks.clone()
    }

    /// A remote is configured and has not failed this session
    pub fn is_cloud_enabled(&self) -> bool {
        self.remote.is_some() && !self.cloud_disabled.load(Ordering::SeqCst)
    }

    /// Persist `record` locally, then push it to the remote if reachable.
    ///
    /// Fails only when the local write fails.
    pub async fn save_assessment(&self, mut record: Record) -> SyncResult<SaveOutcome> {
        let _guard = self.record_locks.lock(&record.id).await;

        if let Some(existing) = self.store.get(&record.id).await? {
            record.touch(existing.updated_at);
        }

        self.store.put(&record).await?;
        tracing::info!(record_id = %record.id, "Saved assessment locally");

        if !self.is_cloud_enabled() {
            tracing::debug!(
                record_id = %record.id,
                "Cloud disabled for this session; keeping local copy only"
            );
            return Ok(SaveOutcome::LocalOnly);
        }

        let pushed = {
            let _in_flight = InFlight::mark(&self.in_flight, vec![record.id.clone()]);
            self.push_one(&record).await
        };

        match pushed {
            Ok(()) => {
                record.synced_at = Some(self.confirmation_time(record.updated_at));
                self.store.put(&record).await?;
                tracing::info!(record_id = %record.id, "Assessment backed up to remote");
                Ok(SaveOutcome::Synced)
            }
            Err(err) => {
                self.disable_cloud(&err);
                Ok(SaveOutcome::LocalOnly)
            }
        }
    }

    async fn push_one(&self, record: &Record) -> RemoteResult<()> {
        let remote = self.probe().await?;
        remote.insert(record, &self.device_id).await
    }

    /// Pull, merge by last-writer-wins and push back.
    ///
    /// Always re-probes, so it also recovers a session whose cloud was
    /// disabled. Unreachable remote gives an offline report, not an error.
    pub async fn sync_with_remote(&self) -> SyncResult<SyncReport> {
        let _sync = self.sync_lock.lock().await;

        let remote = match self.probe().await {
            Ok(remote) => remote,
            Err(err) => {
                self.disable_cloud(&err);
                return Ok(SyncReport::offline());
            }
        };
        self.cloud_disabled.store(false, Ordering::SeqCst);

        let remote_records = match remote.select_all(&self.device_id).await {
            Ok(records) => records,
            Err(err) => {
                self.disable_cloud(&err);
                return Ok(SyncReport::offline());
            }
        };

        let mut ids: Vec<String> = self.store.get_all().await?.into_iter().map(|r| r.id).collect();
        ids.extend(remote_records.iter().map(|r| r.id.clone()));
        let _guards = self.record_locks.lock_many(&ids).await;

        // Records saved after the id list was taken sync on their own
        let locked: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let local: Vec<Record> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|r| locked.contains(r.id.as_str()))
            .collect();

        let outcome = merge_records(&local, &remote_records)?;
        self.store.put_many(&outcome.records).await?;

        let mut report = SyncReport {
            online: true,
            pulled: outcome.pulled.len(),
            pushed: outcome.pushed.len(),
            total: outcome.len(),
            confirmed: false,
        };

        let upserted = {
            let merged_ids = outcome.records.iter().map(|r| r.id.clone()).collect();
            let _in_flight = InFlight::mark(&self.in_flight, merged_ids);
            remote.upsert_many(&outcome.records, &self.device_id).await
        };

        match upserted {
            Ok(()) => {
                let confirmed = self.mark_synced(outcome.records);
                self.store.put_many(&confirmed).await?;
                report.confirmed = true;
            }
            Err(err) => self.disable_cloud(&err),
        }

        tracing::info!(
            pulled = report.pulled,
            pushed = report.pushed,
            total = report.total,
            confirmed = report.confirmed,
            "Sync finished"
        );
        Ok(report)
    }

    /// Local records the remote has not confirmed
    pub async fn pending_records(&self) -> SyncResult<Vec<Record>> {
        let records = self.store.get_all().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.persisted_sync_state() == SyncState::LocalOnly)
            .collect())
    }

    /// Upsert pending records if the cloud is usable. Returns how many
    /// were confirmed.
    pub async fn push_pending(&self) -> SyncResult<usize> {
        if !self.is_cloud_enabled() {
            return Ok(0);
        }

        let ids: Vec<String> = self.pending_records().await?.into_iter().map(|r| r.id).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let _guards = self.record_locks.lock_many(&ids).await;

        let pending: Vec<Record> = self
            .pending_records()
            .await?
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .collect();

        let pushed = {
            let _in_flight = InFlight::mark(&self.in_flight, ids.clone());
            match self.probe().await {
                Ok(remote) => remote.upsert_many(&pending, &self.device_id).await,
                Err(err) => Err(err),
            }
        };

        match pushed {
            Ok(()) => {
                let count = pending.len();
                let confirmed = self.mark_synced(pending);
                self.store.put_many(&confirmed).await?;
                tracing::info!(count, "Pushed pending assessments");
                Ok(count)
            }
            Err(err) => {
                self.disable_cloud(&err);
                Ok(0)
            }
        }
    }

    /// Best-effort sync, then the local record set
    pub async fn refresh(&self) -> SyncResult<Vec<Record>> {
        if self.is_cloud_enabled() {
            if let Err(err) = self.sync_with_remote().await {
                tracing::warn!(error = %err, "Sync during refresh failed; returning local records");
            }
        }
        self.store.get_all().await
    }

    /// Clear the session's cloud-disabled flag and probe again.
    pub async fn reconnect(&self) -> bool {
        self.cloud_disabled.store(false, Ordering::SeqCst);
        match self.probe().await {
            Ok(_) => {
                tracing::info!("Remote reachable again");
                true
            }
            Err(err) => {
                self.disable_cloud(&err);
                false
            }
        }
    }

    /// Derived sync state of one record
    pub async fn sync_state(&self, id: &str) -> SyncResult<Option<SyncState>> {
        if self.in_flight.contains(id) {
            return Ok(Some(SyncState::Syncing));
        }
        Ok(self.store.get(id).await?.map(|r| r.persisted_sync_state()))
    }

    pub async fn export(
        &self,
        id: &str,
        renderer: &dyn ExportRenderer,
    ) -> SyncResult<ExportContent> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("assessment {id}")))?;
        Ok(renderer.render(&record))
    }

    /// Probe the remote within the probe timeout
    async fn probe(&self) -> RemoteResult<&Arc<dyn RemoteStore>> {
        let remote = self.remote.as_ref().ok_or(RemoteError::Disabled)?;

        probe_within(remote.as_ref(), self.probe_timeout).await?;
        Ok(remote)
    }

    fn disable_cloud(&self, err: &RemoteError) {
        if *err == RemoteError::Disabled {
            return;
        }
        if !self.cloud_disabled.swap(true, Ordering::SeqCst) {
            tracing::warn!(error = %err, "Remote unavailable; cloud disabled for this session");
        }
    }

    fn mark_synced(&self, mut records: Vec<Record>) -> Vec<Record> {
        for record in &mut records {
            record.synced_at = Some(self.confirmation_time(record.updated_at));
        }
        records
    }

    // Never earlier than the edit it confirms
    fn confirmation_time(&self, updated_at: DateTime<Utc>) -> DateTime<Utc> {
        self.clock.now().max(updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::local_db::{LocalDatabase, LocalDbConfig};
    use crate::remote::{InMemoryRemoteStore, MockRemoteStore};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
    }

    async fn local() -> Arc<LocalDatabase> {
        Arc::new(LocalDatabase::new(LocalDbConfig::in_memory()).await.unwrap())
    }

    fn record(name: &str) -> Record {
        Record::new(name, "Manual handling", "f1", serde_json::json!({"hazards": []}), start())
    }

    #[tokio::test]
    async fn test_save_marks_synced_when_remote_confirms() {
        let store = local().await;
        let remote = Arc::new(InMemoryRemoteStore::new());
        let clock = Arc::new(ManualClock::new(start() + chrono::Duration::minutes(1)));
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(remote.clone()),
            clock,
            "device-1",
        );

        let record = record("Stores");
        let outcome = coordinator.save_assessment(record.clone()).await.unwrap();

        assert_eq!(outcome, SaveOutcome::Synced);
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.synced_at, Some(start() + chrono::Duration::minutes(1)));
        assert_eq!(stored.updated_at, record.updated_at);
        assert!(remote.snapshot(&record.id).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_probe_disables_cloud_until_reconnect() {
        let store = local().await;
        let mut remote = MockRemoteStore::new();
        remote
            .expect_probe()
            .times(1)
            .returning(|| Err(RemoteError::Unreachable("no route".to_string())));
        remote.expect_insert().never();

        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(Arc::new(remote)),
            Arc::new(ManualClock::new(start())),
            "d",
        );

        assert_eq!(coordinator.save_assessment(record("A")).await.unwrap(), SaveOutcome::LocalOnly);
        assert!(!coordinator.is_cloud_enabled());

        // Second save must not probe again
        assert_eq!(coordinator.save_assessment(record("B")).await.unwrap(), SaveOutcome::LocalOnly);
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_failure_is_swallowed() {
        let store = local().await;
        let mut remote = MockRemoteStore::new();
        remote.expect_probe().returning(|| Ok(()));
        remote.expect_insert().times(1).returning(|_, _| {
            Err(RemoteError::Status {
                status: 500,
                body: "boom".to_string(),
            })
        });

        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(Arc::new(remote)),
            Arc::new(ManualClock::new(start())),
            "d",
        );

        let record = record("C");
        assert_eq!(
            coordinator.save_assessment(record.clone()).await.unwrap(),
            SaveOutcome::LocalOnly
        );
        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.synced_at, None);
        assert!(!coordinator.is_cloud_enabled());
    }

    #[tokio::test]
    async fn test_slow_probe_counts_as_unreachable() {
        struct SlowRemote(InMemoryRemoteStore);

        #[async_trait::async_trait]
        impl RemoteStore for SlowRemote {
            async fn probe(&self) -> RemoteResult<()> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
            async fn insert(&self, record: &Record, device_id: &str) -> RemoteResult<()> {
                self.0.insert(record, device_id).await
            }
            async fn select_all(&self, device_id: &str) -> RemoteResult<Vec<Record>> {
                self.0.select_all(device_id).await
            }
            async fn upsert_many(&self, records: &[Record], device_id: &str) -> RemoteResult<()> {
                self.0.upsert_many(records, device_id).await
            }
            async fn create_envelope(
                &self,
                envelope: &crate::model::NewShareEnvelope,
            ) -> RemoteResult<String> {
                self.0.create_envelope(envelope).await
            }
            async fn get_envelope(
                &self,
                share_id: &str,
            ) -> RemoteResult<Option<crate::model::ShareEnvelope>> {
                self.0.get_envelope(share_id).await
            }
        }

        let store = local().await;
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(Arc::new(SlowRemote(InMemoryRemoteStore::new()))),
            Arc::new(ManualClock::new(start())),
            "d",
        )
        .with_probe_timeout(Duration::from_millis(20));

        let outcome = coordinator.save_assessment(record("Slow")).await.unwrap();
        assert_eq!(outcome, SaveOutcome::LocalOnly);
        assert!(!coordinator.is_cloud_enabled());
    }

    #[tokio::test]
    async fn test_without_remote_everything_stays_local() {
        let store = local().await;
        let coordinator = SyncCoordinator::new(
            store.clone(),
            None,
            Arc::new(ManualClock::new(start())),
            "d",
        );

        assert_eq!(coordinator.save_assessment(record("A")).await.unwrap(), SaveOutcome::LocalOnly);
        assert!(!coordinator.is_cloud_enabled());
        assert_eq!(coordinator.sync_with_remote().await.unwrap(), SyncReport::offline());
        assert_eq!(coordinator.push_pending().await.unwrap(), 0);
        assert!(!coordinator.reconnect().await);
    }

    #[tokio::test]
    async fn test_save_keeps_updated_at_monotonic() {
        let store = local().await;
        let coordinator = SyncCoordinator::new(
            store.clone(),
            None,
            Arc::new(ManualClock::new(start())),
            "d",
        );

        let mut newer = record("A");
        newer.updated_at = start() + chrono::Duration::hours(1);
        coordinator.save_assessment(newer.clone()).await.unwrap();

        let mut stale = newer.clone();
        stale.updated_at = start();
        stale.name = "A (edited)".to_string();
        coordinator.save_assessment(stale).await.unwrap();

        let stored = store.get(&newer.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "A (edited)");
        assert_eq!(stored.updated_at, newer.updated_at);
    }

    #[tokio::test]
    async fn test_sync_pulls_newer_and_pushes_local_only() {
        let store = local().await;
        let remote = Arc::new(InMemoryRemoteStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(remote.clone()),
            clock.clone(),
            "d",
        );

        let shared = record("Shared");
        let mine = record("Mine");
        store.put(&shared).await.unwrap();
        store.put(&mine).await.unwrap();

        let mut edited = shared.clone();
        edited.rename("Shared (remote edit)", start() + chrono::Duration::minutes(5));
        remote.seed(edited.clone(), "d").await;

        clock.advance(chrono::Duration::minutes(10));
        let report = coordinator.sync_with_remote().await.unwrap();

        assert!(report.online && report.confirmed);
        assert_eq!(report.pulled, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(report.total, 2);

        let local_shared = store.get(&shared.id).await.unwrap().unwrap();
        assert_eq!(local_shared.name, "Shared (remote edit)");
        assert_eq!(local_shared.synced_at, Some(start() + chrono::Duration::minutes(10)));
        assert!(remote.snapshot(&mine.id).await.is_some());
        assert!(coordinator.pending_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_offline_is_a_no_op() {
        let store = local().await;
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.set_reachable(false);
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(remote),
            Arc::new(ManualClock::new(start())),
            "d",
        );

        store.put(&record("Offline")).await.unwrap();
        let report = coordinator.sync_with_remote().await.unwrap();

        assert!(!report.online);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_surfaces_merge_ambiguity() {
        let store = local().await;
        let mut remote = MockRemoteStore::new();
        remote.expect_probe().returning(|| Ok(()));
        remote.expect_select_all().returning(|_| {
            let a = Record {
                id: "dup".to_string(),
                name: "one".to_string(),
                activity: "x".to_string(),
                created_at: start(),
                updated_at: start(),
                synced_at: None,
                folder_id: "f".to_string(),
                payload: serde_json::json!({}),
            };
            let mut b = a.clone();
            b.name = "two".to_string();
            Ok(vec![a, b])
        });
        remote.expect_upsert_many().never();

        let coordinator = SyncCoordinator::new(
            store,
            Some(Arc::new(remote)),
            Arc::new(ManualClock::new(start())),
            "d",
        );

        assert!(matches!(
            coordinator.sync_with_remote().await,
            Err(SyncError::MergeAmbiguity { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_reenables_cloud_and_push_pending() {
        let store = local().await;
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.set_reachable(false);
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(remote.clone()),
            Arc::new(ManualClock::new(start())),
            "d",
        );

        coordinator.save_assessment(record("Queued")).await.unwrap();
        assert_eq!(coordinator.pending_records().await.unwrap().len(), 1);
        assert_eq!(coordinator.push_pending().await.unwrap(), 0);

        remote.set_reachable(true);
        assert!(coordinator.reconnect().await);
        assert_eq!(coordinator.push_pending().await.unwrap(), 1);
        assert!(coordinator.pending_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_returns_merged_records() {
        let store = local().await;
        let remote = Arc::new(InMemoryRemoteStore::new());
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Some(remote.clone()),
            Arc::new(ManualClock::new(start())),
            "d",
        );

        remote.seed(record("From another session"), "d").await;
        let records = coordinator.refresh().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_state_and_export() {
        let store = local().await;
        let coordinator = SyncCoordinator::new(
            store.clone(),
            None,
            Arc::new(ManualClock::new(start())),
            "d",
        );

        let record = record("Export me");
        coordinator.save_assessment(record.clone()).await.unwrap();

        assert_eq!(coordinator.sync_state(&record.id).await.unwrap(), Some(SyncState::LocalOnly));
        assert_eq!(coordinator.sync_state("missing").await.unwrap(), None);

        let content = coordinator
            .export(&record.id, &crate::export::JsonExportRenderer)
            .await
            .unwrap();
        assert_eq!(content.content_type, "application/json");
        assert!(matches!(
            coordinator.export("missing", &crate::export::JsonExportRenderer).await,
            Err(SyncError::NotFound(_))
        ));
    }
}
