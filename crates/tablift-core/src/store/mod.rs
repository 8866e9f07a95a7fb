//! The external record store contract.
//!
//! The migration engine validates and persists its output through this
//! trait; the real destination (an application's ORM, a service, a
//! database) lives outside the core. [`MemoryRecordStore`] is the shipped
//! reference implementation used by the test suite and the CLI's ephemeral
//! destination.

pub mod memory;

use std::fmt;

use thiserror::Error;

use crate::value::{FormData, Lookup, Value};

pub use memory::{KindSchema, MemoryRecordStore};

/// An opaque reference to a persisted target record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    /// The record kind (model name, table, collection).
    pub kind: String,
    /// The store-assigned primary key.
    pub pk: i64,
}

impl RecordRef {
    /// Create a reference.
    pub fn new(kind: impl Into<String>, pk: i64) -> Self {
        Self {
            kind: kind.into(),
            pk,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.pk)
    }
}

/// Field-level validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<(String, String)>,
}

impl ValidationErrors {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message against a field.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push((field.into(), message.into()));
    }

    /// Iterate over `(field, message)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.errors.iter()
    }

    /// Check if any message was recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .errors
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{rendered}")
    }
}

/// Record-store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The form data failed the store's validation contract.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// A uniqueness or integrity constraint was violated at persistence
    /// time.
    #[error("integrity conflict: {0}")]
    Integrity(String),

    /// A persisted record does not expose the requested attribute.
    #[error("'{kind}' records have no attribute '{attribute}'")]
    MissingAttribute {
        /// The record kind.
        kind: String,
        /// The attribute that was requested.
        attribute: String,
    },

    /// Any other store-side failure.
    #[error("record store failure: {0}")]
    Internal(String),
}

/// The persistence/validation capability the migration engine depends on.
///
/// The store owns its transaction discipline; the engine only brackets each
/// record's pipeline with `begin`/`commit`/`rollback`. Implementations that
/// commit eagerly can leave the bracket methods as the default no-ops.
pub trait RecordStore {
    /// Find at most one record of `kind` matching every lookup entry.
    fn find_one(&self, kind: &str, lookup: &Lookup) -> Result<Option<RecordRef>, StoreError>;

    /// Validate `form_data` and persist it, updating `existing` when given,
    /// creating a record otherwise.
    fn validate_and_save(
        &self,
        kind: &str,
        form_data: &FormData,
        existing: Option<&RecordRef>,
    ) -> Result<RecordRef, StoreError>;

    /// Read an attribute from a persisted record.
    fn read_attr(&self, instance: &RecordRef, attribute: &str) -> Result<Value, StoreError>;

    /// Write an attribute onto a persisted record (uncommitted until
    /// [`RecordStore::save`]).
    fn write_attr(
        &self,
        instance: &RecordRef,
        attribute: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Commit attribute mutations on a persisted record.
    fn save(&self, instance: &RecordRef) -> Result<(), StoreError>;

    /// Delete every record of `kind`, returning how many were removed.
    fn delete_all(&self, kind: &str) -> Result<u64, StoreError>;

    /// A stable numeric tag for `kind`, used by polymorphic references.
    fn type_tag(&self, kind: &str) -> i64;

    /// Open a per-record transaction.
    fn begin(&self) {}

    /// Commit the current per-record transaction.
    fn commit(&self) {}

    /// Roll the current per-record transaction back.
    fn rollback(&self) {}
}
