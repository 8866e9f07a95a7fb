//! JSON document backend.
//!
//! Reads exports of the shape:
//!
//! ```json
//! {
//!   "fields": [{"name": "id", "type": "NUMBER"}, {"name": "name", "type": "TEXT"}],
//!   "records": [{"id": "1", "name": "Ada"}]
//! }
//! ```
//!
//! Every record must carry a value for every declared field; the staging
//! loader enforces completeness on insert.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::{FieldDescriptor, IngestError, SourceBackend, SourceDocument};

#[derive(Debug, Deserialize)]
struct JsonDocument {
    fields: Vec<JsonField>,
    records: Vec<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct JsonField {
    name: String,
    #[serde(rename = "type", default)]
    type_hint: String,
}

/// Backend for JSON exports.
pub struct JsonBackend {
    max_records: u64,
}

impl JsonBackend {
    /// Create a backend. `max_records` of 0 means unlimited.
    pub fn new(max_records: u64) -> Self {
        Self { max_records }
    }
}

impl SourceBackend for JsonBackend {
    fn parse(&self, path: &Path) -> Result<SourceDocument, IngestError> {
        let path_display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path_display.clone(),
            source,
        })?;
        let document: JsonDocument =
            serde_json::from_str(&content).map_err(|e| IngestError::Malformed {
                path: path_display.clone(),
                message: e.to_string(),
            })?;

        let fields = document
            .fields
            .into_iter()
            .map(|f| FieldDescriptor {
                name: f.name,
                type_hint: f.type_hint,
            })
            .collect();

        let mut records = document.records;
        if self.max_records > 0 && records.len() as u64 > self.max_records {
            // The limit stops ingestion; it is not an error.
            records.truncate(self.max_records as usize);
        }

        info!(path = path_display.as_str(), records = records.len(), "parsed source file");
        Ok(SourceDocument { fields, records })
    }
}
