//! Source ingestion adapters.
//!
//! A backend parses one legacy export file into a list of field descriptors
//! plus a list of raw records, honoring an optional record-count limit by
//! stopping early rather than erroring. The staging loader consumes the
//! result as-is.

pub mod json;

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

pub use json::JsonBackend;

/// Ingestion errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The source file could not be read.
    #[error("could not read source file '{path}': {source}")]
    Io {
        /// Path of the source file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The source file did not parse.
    #[error("source file '{path}' is malformed: {message}")]
    Malformed {
        /// Path of the source file.
        path: String,
        /// What was wrong with it.
        message: String,
    },
}

/// One declared source field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name, becoming the staged column name.
    pub name: String,
    /// The source format's declared type hint (informational only; staging
    /// stores everything as text).
    pub type_hint: String,
}

/// One raw record: field name → textual value.
pub type SourceRecord = HashMap<String, String>;

/// A parsed source file.
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Raw records, in file order.
    pub records: Vec<SourceRecord>,
}

impl SourceDocument {
    /// Column names, in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// A source-format parser.
///
/// `max_records` of 0 means unlimited; a positive limit stops ingestion
/// after that many records.
pub trait SourceBackend {
    /// Parse `path` into a source document.
    fn parse(&self, path: &Path) -> Result<SourceDocument, IngestError>;
}
