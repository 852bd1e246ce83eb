//! Records, folders and share envelopes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A finalized risk assessment.
///
/// `payload` carries the hazard/risk content and is never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub name: String,
    pub activity: String,
    pub created_at: DateTime<Utc>,
    /// Sole input to conflict resolution; never moves backwards.
    pub updated_at: DateTime<Utc>,
    /// Last confirmed remote write, `None` if never confirmed.
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    pub folder_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Record {
    /// Create a record with a fresh id, stamped at `now`
    pub fn new(
        name: impl Into<String>,
        activity: impl Into<String>,
        folder_id: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            activity: activity.into(),
            created_at: now,
            updated_at: now,
            synced_at: None,
            folder_id: folder_id.into(),
            payload,
        }
    }

    /// Advance `updated_at` to `now` unless it is already later.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    pub fn rename(&mut self, name: impl Into<String>, now: DateTime<Utc>) {
        self.name = name.into();
        self.touch(now);
    }

    pub fn set_activity(&mut self, activity: impl Into<String>, now: DateTime<Utc>) {
        self.activity = activity.into();
        self.touch(now);
    }

    pub fn set_payload(&mut self, payload: serde_json::Value, now: DateTime<Utc>) {
        self.payload = payload;
        self.touch(now);
    }

    pub fn move_to_folder(&mut self, folder_id: impl Into<String>, now: DateTime<Utc>) {
        self.folder_id = folder_id.into();
        self.touch(now);
    }

    /// Sync state as seen from the persisted fields alone.
    pub fn persisted_sync_state(&self) -> SyncState {
        match self.synced_at {
            Some(synced_at) if synced_at >= self.updated_at => SyncState::Synced,
            _ => SyncState::LocalOnly,
        }
    }

    /// Same content and ordering key, ignoring sync bookkeeping.
    pub fn same_content(&self, other: &Record) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.activity == other.activity
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
            && self.folder_id == other.folder_id
            && self.payload == other.payload
    }
}

/// Per-record sync state. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    LocalOnly,
    Syncing,
    Synced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::LocalOnly => "local_only",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

/// Envelope as uploaded; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShareEnvelope {
    pub ciphertext: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// Envelope as stored remotely. Holds no key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEnvelope {
    pub share_id: String,
    pub ciphertext: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device_id: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

impl ShareEnvelope {
    pub fn from_new(share_id: impl Into<String>, envelope: NewShareEnvelope) -> Self {
        Self {
            share_id: share_id.into(),
            ciphertext: envelope.ciphertext,
            created_at: envelope.created_at,
            expires_at: envelope.expires_at,
            device_id: envelope.device_id,
            recipient: envelope.recipient,
        }
    }

    /// Expired strictly after `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// What a share issuer hands to the user for out-of-band delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTicket {
    pub share_id: String,
    /// URL-safe base64 share key. Never stored alongside the envelope.
    pub encryption_key: String,
    pub expires_at: DateTime<Utc>,
}
