//! Export seam
//!
//! Formatting (HTML, CSV, ...) lives outside this crate. The core only hands
//! a finalized record to a renderer and passes the opaque result along.

use crate::model::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportContent {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait ExportRenderer: Send + Sync {
    fn render(&self, record: &Record) -> ExportContent;
}

/// Pretty-printed record JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExportRenderer;

impl ExportRenderer for JsonExportRenderer {
    fn render(&self, record: &Record) -> ExportContent {
        // Record serialization cannot fail: every field is a plain JSON type
        let bytes = serde_json::to_vec_pretty(record).unwrap_or_default();
        ExportContent {
            content_type: "application/json".to_string(),
            bytes,
        }
    }
}
