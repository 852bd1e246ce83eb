//! Share issuing and redemption
//!
//! A share is an AES-256-GCM sealed copy of a record stored remotely as an
//! expiring envelope. The key goes to the user for out-of-band delivery and
//! is never uploaded. The envelope's expiry is bound into the ciphertext as
//! associated data, so moving it breaks decryption.

use crate::clock::Clock;
use crate::config::ShareConfig;
use crate::coordinator::{RecordLocks, DEFAULT_PROBE_TIMEOUT};
use crate::error::{RemoteError, ShareError, ShareResult, SyncError};
use crate::local_db::RecordStore;
use crate::model::{NewShareEnvelope, Record, ShareTicket};
use crate::remote::{probe_within, RemoteStore};
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use crypto::{Encryptor, ShareKey};
use std::sync::Arc;
use std::time::Duration as StdDuration;

pub struct ShareManager {
    store: Arc<dyn RecordStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    clock: Arc<dyn Clock>,
    device_id: String,
    config: ShareConfig,
    record_locks: Arc<RecordLocks>,
    probe_timeout: StdDuration,
}

impl ShareManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
        device_id: impl Into<String>,
        config: ShareConfig,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
            device_id: device_id.into(),
            config,
            record_locks: Arc::new(RecordLocks::default()),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Serialize redemptions with the coordinator's writers
    pub fn with_record_locks(mut self, record_locks: Arc<RecordLocks>) -> Self {
        self.record_locks = record_locks;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: StdDuration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn default_expiry_days(&self) -> u32 {
        self.config.default_expiry_days
    }

    /// Seal `record` and upload it as an envelope expiring in `expiry_days`.
    pub async fn create_shareable_record(
        &self,
        record: &Record,
        expiry_days: u32,
        recipient: Option<&str>,
    ) -> ShareResult<ShareTicket> {
        if !(1..=self.config.max_expiry_days).contains(&expiry_days) {
            return Err(ShareError::InvalidExpiry {
                requested: expiry_days,
                max: self.config.max_expiry_days,
            });
        }
        let remote = self.reachable_remote().await?;

        let created_at = self.clock.now().trunc_subsecs(0);
        let expires_at = created_at + Duration::days(i64::from(expiry_days));

        let key = ShareKey::generate();
        let encryptor = key.encryptor().map_err(ShareError::Encryption)?;
        let plaintext = serde_json::to_vec(record).map_err(SyncError::from)?;
        let ciphertext = encryptor
            .encrypt(&plaintext, expiry_aad(expires_at).as_bytes())
            .map_err(ShareError::Encryption)?;

        let envelope = NewShareEnvelope {
            ciphertext,
            created_at,
            expires_at,
            device_id: self.device_id.clone(),
            recipient: recipient
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        };
        let share_id = remote.create_envelope(&envelope).await?;

        tracing::info!(
            share_id = %share_id,
            record_id = %record.id,
            expires_at = %expires_at,
            "Created share"
        );

        Ok(ShareTicket {
            share_id,
            encryption_key: key.encode(),
            expires_at,
        })
    }

    /// Share a record already on this device. `expiry_days` falls back to
    /// the configured default.
    pub async fn share_stored_record(
        &self,
        id: &str,
        expiry_days: Option<u32>,
        recipient: Option<&str>,
    ) -> ShareResult<ShareTicket> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ShareError::RecordNotFound(id.to_string()))?;

        let days = expiry_days.unwrap_or(self.config.default_expiry_days);
        self.create_shareable_record(&record, days, recipient).await
    }

    /// Fetch, check expiry, decrypt and file the record under
    /// `destination_folder_id`. Every other field is kept as shared.
    ///
    /// A local copy with a later `updated_at` is kept as is and returned.
    pub async fn redeem_share(
        &self,
        share_id: &str,
        encryption_key: &str,
        destination_folder_id: &str,
    ) -> ShareResult<Record> {
        let share_id = share_id.trim();
        let encryption_key = encryption_key.trim();
        if share_id.is_empty() || encryption_key.is_empty() {
            return Err(ShareError::InvalidInput(
                "share id and encryption key are both required".to_string(),
            ));
        }
        if destination_folder_id.trim().is_empty() {
            return Err(ShareError::InvalidInput(
                "destination folder is required".to_string(),
            ));
        }

        let envelope = self
            .reachable_remote()
            .await?
            .get_envelope(share_id)
            .await?
            .ok_or_else(|| ShareError::ShareNotFound {
                share_id: share_id.to_string(),
            })?;

        if envelope.is_expired(self.clock.now()) {
            tracing::info!(share_id = %share_id, "Rejected expired share");
            return Err(ShareError::ExpiredShare {
                expired_at: envelope.expires_at,
            });
        }

        let key = ShareKey::decode(encryption_key).map_err(|_| ShareError::DecryptionFailed)?;
        let encryptor = key.encryptor().map_err(|_| ShareError::DecryptionFailed)?;
        let plaintext = encryptor
            .decrypt(&envelope.ciphertext, expiry_aad(envelope.expires_at).as_bytes())
            .map_err(|_| ShareError::DecryptionFailed)?;
        let mut record: Record =
            serde_json::from_slice(&plaintext).map_err(|_| ShareError::DecryptionFailed)?;

        record.folder_id = destination_folder_id.trim().to_string();
        let record = self.file_redeemed(record).await?;

        tracing::info!(share_id = %share_id, record_id = %record.id, "Redeemed share");
        Ok(record)
    }

    /// Store a redeemed record unless this device holds a newer copy of it.
    /// Returns the copy that ends up stored.
    async fn file_redeemed(&self, record: Record) -> ShareResult<Record> {
        let _guard = self.record_locks.lock(&record.id).await;

        match self.store.get(&record.id).await? {
            Some(existing) if existing.updated_at > record.updated_at => {
                tracing::info!(
                    record_id = %record.id,
                    local_updated_at = %existing.updated_at,
                    shared_updated_at = %record.updated_at,
                    "Local copy is newer than the shared one; keeping it"
                );
                Ok(existing)
            }
            _ => {
                self.store.put(&record).await?;
                Ok(record)
            }
        }
    }

    /// The remote, once it answers a probe within the probe timeout
    async fn reachable_remote(&self) -> ShareResult<&Arc<dyn RemoteStore>> {
        let remote = self
            .remote
            .as_ref()
            .ok_or(ShareError::RemoteUnavailable(RemoteError::Disabled))?;

        if let Err(err) = probe_within(remote.as_ref(), self.probe_timeout).await {
            tracing::warn!(error = %err, "Remote unavailable for sharing");
            return Err(err.into());
        }
        Ok(remote)
    }
}

fn expiry_aad(expires_at: DateTime<Utc>) -> String {
    expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
