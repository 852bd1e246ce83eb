//! Error types for the persistence-and-sharing core

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from local persistence, sync and merge.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The on-device write or read itself failed. Always surfaces.
    #[error("Local persistence error: {0}")]
    LocalPersistence(String),

    /// The remote backup store could not be used. Save and sync paths
    /// degrade to offline behaviour instead of returning this.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(#[from] RemoteError),

    /// A persisted collection failed to parse. The store recovers from this
    /// internally by resetting the collection.
    #[error("Corrupt local data under key '{key}': {reason}")]
    CorruptLocalData { key: String, reason: String },

    /// Two copies of one record cannot be ordered by last-writer-wins.
    #[error("Ambiguous merge for record {id}: equal updated_at with different content")]
    MergeAmbiguity { id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::LocalPersistence(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures at the remote boundary. Never fatal on their own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote disabled by configuration")]
    Disabled,

    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("remote call timed out after {0} ms")]
    Timeout(u64),

    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote response could not be decoded: {0}")]
    Decode(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures of issuing or redeeming a share. Each variant is reported to
/// the user distinctly; none is retried automatically.
#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Share {share_id} not found")]
    ShareNotFound { share_id: String },

    #[error("Share expired at {expired_at}")]
    ExpiredShare { expired_at: DateTime<Utc> },

    /// Wrong key, malformed key or malformed ciphertext.
    #[error("Could not decrypt shared assessment: check the encryption key")]
    DecryptionFailed,

    #[error("Assessment {0} not found on this device")]
    RecordNotFound(String),

    #[error("Share expiry must be between 1 and {max} days, got {requested}")]
    InvalidExpiry { requested: u32, max: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sharing needs a connection: {0}")]
    RemoteUnavailable(#[from] RemoteError),

    #[error("Failed to seal assessment: {0}")]
    Encryption(crypto::CryptoError),

    #[error(transparent)]
    Local(#[from] SyncError),
}

pub type ShareResult<T> = Result<T, ShareError>;
