//! In-memory reference implementation of the record store.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::value::{FormData, Lookup, Value};

use super::{RecordRef, RecordStore, StoreError, ValidationErrors};

/// Per-kind validation and integrity rules.
#[derive(Debug, Clone, Default)]
pub struct KindSchema {
    /// Fields that must be present and truthy for a record to validate.
    pub required: Vec<String>,
    /// Fields whose values must be unique across the kind.
    pub unique: Vec<String>,
    /// Attributes records of this kind expose; empty means unrestricted.
    pub attributes: Vec<String>,
}

impl KindSchema {
    /// Create an unrestricted schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a truthy value for `field`.
    pub fn with_required(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Enforce uniqueness of `field` across the kind.
    pub fn with_unique(mut self, field: impl Into<String>) -> Self {
        self.unique.push(field.into());
        self
    }

    /// Restrict the attribute surface to the declared names.
    pub fn with_attribute(mut self, field: impl Into<String>) -> Self {
        self.attributes.push(field.into());
        self
    }
}

#[derive(Clone, Default)]
struct KindTable {
    next_pk: i64,
    rows: BTreeMap<i64, FormData>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, KindTable>,
    schemas: HashMap<String, KindSchema>,
    tags: Vec<String>,
    snapshots: Vec<HashMap<String, KindTable>>,
    save_count: u64,
}

/// A kind-keyed record table with auto-increment primary keys,
/// schema-driven validation, and snapshot-based transactions.
///
/// Single-threaded, matching the engine's sequential batch model; not
/// `Sync`.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: RefCell<Inner>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install validation/integrity rules for a kind.
    pub fn define_kind(&self, kind: impl Into<String>, schema: KindSchema) {
        self.inner.borrow_mut().schemas.insert(kind.into(), schema);
    }

    /// Number of persistence events (creates and updates) so far.
    pub fn save_count(&self) -> u64 {
        self.inner.borrow().save_count
    }

    /// Number of records currently held for `kind`.
    pub fn row_count(&self, kind: &str) -> usize {
        self.inner
            .borrow()
            .tables
            .get(kind)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Snapshot every record as JSON, keyed by kind then primary key.
    pub fn dump_json(&self) -> serde_json::Value {
        let inner = self.inner.borrow();
        let mut kinds = serde_json::Map::new();
        for (kind, table) in &inner.tables {
            let rows: Vec<serde_json::Value> = table
                .rows
                .iter()
                .map(|(pk, row)| {
                    let mut object = serde_json::Map::new();
                    object.insert("pk".to_string(), serde_json::json!(pk));
                    for (key, value) in row.iter() {
                        object.insert(
                            key.clone(),
                            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                        );
                    }
                    serde_json::Value::Object(object)
                })
                .collect();
            kinds.insert(kind.clone(), serde_json::Value::Array(rows));
        }
        serde_json::Value::Object(kinds)
    }

    fn validate(schema: Option<&KindSchema>, form_data: &FormData) -> Result<(), StoreError> {
        let Some(schema) = schema else {
            return Ok(());
        };
        let mut errors = ValidationErrors::new();
        for field in &schema.required {
            let present = form_data.get(field).map(Value::is_truthy).unwrap_or(false);
            if !present {
                errors.push(field.clone(), "this field is required");
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(errors))
        }
    }

    fn check_unique(
        schema: Option<&KindSchema>,
        table: &KindTable,
        form_data: &FormData,
        existing_pk: Option<i64>,
    ) -> Result<(), StoreError> {
        let Some(schema) = schema else {
            return Ok(());
        };
        for field in &schema.unique {
            let Some(candidate) = form_data.get(field) else {
                continue;
            };
            for (pk, row) in &table.rows {
                if Some(*pk) == existing_pk {
                    continue;
                }
                if row
                    .get(field)
                    .map(|held| held.loosely_equals(candidate))
                    .unwrap_or(false)
                {
                    return Err(StoreError::Integrity(format!(
                        "duplicate value for unique field '{field}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl RecordStore for MemoryRecordStore {
    fn find_one(&self, kind: &str, lookup: &Lookup) -> Result<Option<RecordRef>, StoreError> {
        let inner = self.inner.borrow();
        let Some(table) = inner.tables.get(kind) else {
            return Ok(None);
        };
        for (pk, row) in &table.rows {
            let matches = lookup.iter().all(|(key, wanted)| {
                row.get(key)
                    .map(|held| held.loosely_equals(wanted))
                    .unwrap_or(false)
            });
            if matches {
                return Ok(Some(RecordRef::new(kind, *pk)));
            }
        }
        Ok(None)
    }

    fn validate_and_save(
        &self,
        kind: &str,
        form_data: &FormData,
        existing: Option<&RecordRef>,
    ) -> Result<RecordRef, StoreError> {
        let mut inner = self.inner.borrow_mut();
        let schema = inner.schemas.get(kind).cloned();
        let table = inner.tables.entry(kind.to_string()).or_default();

        Self::validate(schema.as_ref(), form_data)?;
        Self::check_unique(schema.as_ref(), table, form_data, existing.map(|e| e.pk))?;

        let pk = match existing {
            Some(existing) => {
                let row = table.rows.get_mut(&existing.pk).ok_or_else(|| {
                    StoreError::Internal(format!("stale reference {existing}"))
                })?;
                row.extend(form_data);
                existing.pk
            }
            None => {
                table.next_pk += 1;
                let pk = table.next_pk;
                table.rows.insert(pk, form_data.clone());
                pk
            }
        };

        inner.save_count += 1;
        Ok(RecordRef::new(kind, pk))
    }

    fn read_attr(&self, instance: &RecordRef, attribute: &str) -> Result<Value, StoreError> {
        let inner = self.inner.borrow();
        inner
            .tables
            .get(&instance.kind)
            .and_then(|table| table.rows.get(&instance.pk))
            .and_then(|row| row.get(attribute))
            .cloned()
            .ok_or_else(|| StoreError::MissingAttribute {
                kind: instance.kind.clone(),
                attribute: attribute.to_string(),
            })
    }

    fn write_attr(
        &self,
        instance: &RecordRef,
        attribute: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(schema) = inner.schemas.get(&instance.kind) {
            if !schema.attributes.is_empty()
                && !schema.attributes.iter().any(|a| a == attribute)
            {
                return Err(StoreError::MissingAttribute {
                    kind: instance.kind.clone(),
                    attribute: attribute.to_string(),
                });
            }
        }
        let row = inner
            .tables
            .get_mut(&instance.kind)
            .and_then(|table| table.rows.get_mut(&instance.pk))
            .ok_or_else(|| StoreError::Internal(format!("stale reference {instance}")))?;
        row.insert(attribute, value);
        Ok(())
    }

    fn save(&self, _instance: &RecordRef) -> Result<(), StoreError> {
        // Attribute writes land in place; there is nothing further to flush.
        Ok(())
    }

    fn delete_all(&self, kind: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.borrow_mut();
        let removed = inner
            .tables
            .get_mut(kind)
            .map(|table| {
                let count = table.rows.len() as u64;
                table.rows.clear();
                count
            })
            .unwrap_or(0);
        info!(kind, removed, "deleted existing target records");
        Ok(removed)
    }

    fn type_tag(&self, kind: &str) -> i64 {
        let mut inner = self.inner.borrow_mut();
        if let Some(position) = inner.tags.iter().position(|t| t == kind) {
            return position as i64 + 1;
        }
        inner.tags.push(kind.to_string());
        inner.tags.len() as i64
    }

    fn begin(&self) {
        let mut inner = self.inner.borrow_mut();
        let snapshot = inner.tables.clone();
        inner.snapshots.push(snapshot);
    }

    fn commit(&self) {
        self.inner.borrow_mut().snapshots.pop();
    }

    fn rollback(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(snapshot) = inner.snapshots.pop() {
            inner.tables = snapshot;
        }
    }
}
