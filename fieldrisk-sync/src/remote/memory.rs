//! Process-local remote with a reachability switch

use super::RemoteStore;
use crate::error::{RemoteError, RemoteResult};
use crate::model::{NewShareEnvelope, Record, ShareEnvelope};
use async_trait::async_trait;
use crypto::KeyGenerator;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRecord {
    device_id: String,
    record: Record,
}

/// Remote store held in memory. Calls fail with `Unreachable` while the
/// switch is off, which lets callers exercise their offline paths.
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    records: RwLock<HashMap<String, StoredRecord>>,
    envelopes: RwLock<HashMap<String, ShareEnvelope>>,
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            envelopes: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Number of calls made, reachable or not
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Write directly, bypassing the reachability switch. Stands in for an
    /// edit made on another device.
    pub async fn seed(&self, record: Record, device_id: &str) {
        self.records.write().await.insert(
            record.id.clone(),
            StoredRecord {
                device_id: device_id.to_string(),
                record,
            },
        );
    }

    /// Current remote copy of `id`, bypassing the reachability switch
    pub async fn snapshot(&self, id: &str) -> Option<Record> {
        self.records.read().await.get(id).map(|stored| stored.record.clone())
    }

    /// Replace a stored envelope, bypassing the reachability switch
    pub async fn replace_envelope(&self, envelope: ShareEnvelope) {
        self.envelopes
            .write()
            .await
            .insert(envelope.share_id.clone(), envelope);
    }

    fn check_reachable(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_reachable() {
            Ok(())
        } else {
            Err(RemoteError::Unreachable("in-memory remote switched off".to_string()))
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn probe(&self) -> RemoteResult<()> {
        self.check_reachable()
    }

    async fn insert(&self, record: &Record, device_id: &str) -> RemoteResult<()> {
        self.upsert_many(std::slice::from_ref(record), device_id).await
    }

    async fn select_all(&self, device_id: &str) -> RemoteResult<Vec<Record>> {
        self.check_reachable()?;
        let records = self.records.read().await;
        let mut selected: Vec<Record> = records
            .values()
            .filter(|stored| stored.device_id == device_id)
            .map(|stored| stored.record.clone())
            .collect();
        selected.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(selected)
    }

    async fn upsert_many(&self, records: &[Record], device_id: &str) -> RemoteResult<()> {
        self.check_reachable()?;
        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(
                record.id.clone(),
                StoredRecord {
                    device_id: device_id.to_string(),
                    record: record.clone(),
                },
            );
        }
        Ok(())
    }

    async fn create_envelope(&self, envelope: &NewShareEnvelope) -> RemoteResult<String> {
        self.check_reachable()?;
        let share_id = KeyGenerator::random_token(16);
        self.envelopes.write().await.insert(
            share_id.clone(),
            ShareEnvelope::from_new(share_id.clone(), envelope.clone()),
        );
        Ok(share_id)
    }

    async fn get_envelope(&self, share_id: &str) -> RemoteResult<Option<ShareEnvelope>> {
        self.check_reachable()?;
        Ok(self.envelopes.read().await.get(share_id).cloned())
    }
}
