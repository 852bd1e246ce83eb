//! Remote backup store
//!
//! A best-effort mirror of the local store plus the share envelope table.
//! Nothing here is guaranteed reachable; callers treat every error as
//! "offline for now".

use crate::error::{RemoteError, RemoteResult};
use crate::model::{NewShareEnvelope, Record, ShareEnvelope};
use async_trait::async_trait;
use std::time::Duration;

pub mod http;
pub mod memory;

pub use http::{HttpRemoteConfig, HttpRemoteStore};
pub use memory::InMemoryRemoteStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap reachability check
    async fn probe(&self) -> RemoteResult<()>;

    /// Insert or replace one record attributed to `device_id`
    async fn insert(&self, record: &Record, device_id: &str) -> RemoteResult<()>;

    /// All records attributed to `device_id`
    async fn select_all(&self, device_id: &str) -> RemoteResult<Vec<Record>>;

    /// Insert or replace by id
    async fn upsert_many(&self, records: &[Record], device_id: &str) -> RemoteResult<()>;

    /// Store an envelope; returns the assigned share id
    async fn create_envelope(&self, envelope: &NewShareEnvelope) -> RemoteResult<String>;

    async fn get_envelope(&self, share_id: &str) -> RemoteResult<Option<ShareEnvelope>>;
}

/// Probe `remote`, giving up after `timeout`
pub async fn probe_within(remote: &dyn RemoteStore, timeout: Duration) -> RemoteResult<()> {
    match tokio::time::timeout(timeout, remote.probe()).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}
