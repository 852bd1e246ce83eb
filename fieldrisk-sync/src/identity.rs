//! Per-installation device identifier

use crate::error::SyncResult;
use crate::local_db::{keys, LocalDatabase};
use uuid::Uuid;

/// Stable id generated at first run. Attribution tag only, never a
/// credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: String,
}

impl DeviceIdentity {
    /// Load the persisted id, generating and storing one if absent or
    /// unreadable.
    pub async fn load_or_create(db: &LocalDatabase) -> SyncResult<Self> {
        let _guard = db.lock_writes().await;

        if let Some(raw) = db.read_value(keys::DEVICE_ID).await? {
            match parse_device_id(&raw) {
                Some(device_id) => return Ok(Self { device_id }),
                None => {
                    tracing::warn!(
                        key = keys::DEVICE_ID,
                        "Stored device id is unreadable; generating a new one"
                    );
                }
            }
        }

        let device_id = Uuid::new_v4().to_string();
        db.write_json(keys::DEVICE_ID, &device_id).await?;
        tracing::info!(device_id = %device_id, "Generated device id");

        Ok(Self { device_id })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.device_id)
    }
}

// Stored as a JSON string; older installs may hold the bare value.
fn parse_device_id(raw: &str) -> Option<String> {
    let value = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.trim().to_string());
    Uuid::parse_str(&value).ok().map(|_| value)
}
