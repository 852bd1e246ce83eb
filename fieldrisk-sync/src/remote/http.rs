//! PostgREST backend (Supabase-compatible)
//!
//! Tables:
//! - `assessments`: `id`, `device_id`, `updated_at`, `data` (the record JSON)
//! - `shared_assessments`: `id` (server-assigned), `ciphertext`,
//!   `created_at`, `expires_at`, `device_id`, `recipient`

use super::RemoteStore;
use crate::error::{RemoteError, RemoteResult};
use crate::model::{NewShareEnvelope, Record, ShareEnvelope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

const ASSESSMENTS_TABLE: &str = "assessments";
const SHARES_TABLE: &str = "shared_assessments";

#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssessmentRow {
    id: String,
    device_id: String,
    updated_at: DateTime<Utc>,
    data: Record,
}

impl AssessmentRow {
    fn new(record: &Record, device_id: &str) -> Self {
        Self {
            id: record.id.clone(),
            device_id: device_id.to_string(),
            updated_at: record.updated_at,
            data: record.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ShareRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    ciphertext: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    device_id: String,
    #[serde(default)]
    recipient: Option<String>,
}

pub struct HttpRemoteStore {
    client: Client,
    config: HttpRemoteConfig,
}

impl HttpRemoteStore {
    pub fn new(config: HttpRemoteConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url.trim_end_matches('/'), table)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn send(&self, req: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> RemoteResult<T> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    fn map_transport_error(&self, err: &reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            let millis = u64::try_from(self.config.request_timeout.as_millis()).unwrap_or(u64::MAX);
            RemoteError::Timeout(millis)
        } else {
            RemoteError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn probe(&self) -> RemoteResult<()> {
        let req = self
            .client
            .get(self.table_url(ASSESSMENTS_TABLE))
            .query(&[("select", "id"), ("limit", "0")]);
        self.send(req).await?;
        Ok(())
    }

    async fn insert(&self, record: &Record, device_id: &str) -> RemoteResult<()> {
        self.upsert_many(std::slice::from_ref(record), device_id).await
    }

    async fn select_all(&self, device_id: &str) -> RemoteResult<Vec<Record>> {
        let req = self
            .client
            .get(self.table_url(ASSESSMENTS_TABLE))
            .query(&[("select", "*".to_string()), ("device_id", format!("eq.{device_id}"))]);

        let rows: Vec<AssessmentRow> = self.send_json(req).await?;
        Ok(rows.into_iter().map(|row| row.data).collect())
    }

    async fn upsert_many(&self, records: &[Record], device_id: &str) -> RemoteResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let rows: Vec<AssessmentRow> = records
            .iter()
            .map(|r| AssessmentRow::new(r, device_id))
            .collect();
        let req = self
            .client
            .post(self.table_url(ASSESSMENTS_TABLE))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&rows);

        self.send(req).await?;
        tracing::debug!(count = rows.len(), "Upserted records to remote");
        Ok(())
    }

    async fn create_envelope(&self, envelope: &NewShareEnvelope) -> RemoteResult<String> {
        let row = ShareRow {
            id: None,
            ciphertext: envelope.ciphertext.clone(),
            created_at: envelope.created_at,
            expires_at: envelope.expires_at,
            device_id: envelope.device_id.clone(),
            recipient: envelope.recipient.clone(),
        };
        let req = self
            .client
            .post(self.table_url(SHARES_TABLE))
            .header("Prefer", "return=representation")
            .json(&[row]);

        let created: Vec<ShareRow> = self.send_json(req).await?;
        created
            .into_iter()
            .next()
            .and_then(|row| row.id)
            .ok_or_else(|| RemoteError::Decode("share insert returned no id".to_string()))
    }

    async fn get_envelope(&self, share_id: &str) -> RemoteResult<Option<ShareEnvelope>> {
        let req = self
            .client
            .get(self.table_url(SHARES_TABLE))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{share_id}"))]);

        let rows: Vec<ShareRow> = self.send_json(req).await?;
        Ok(rows.into_iter().next().map(|row| ShareEnvelope {
            share_id: row.id.unwrap_or_else(|| share_id.to_string()),
            ciphertext: row.ciphertext,
            created_at: row.created_at,
            expires_at: row.expires_at,
            device_id: row.device_id,
            recipient: row.recipient,
        }))
    }
}
