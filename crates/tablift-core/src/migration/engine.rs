//! The per-record migration engine.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::convert::{ConcatConversion, Conversion, DirectConversion, FieldBinding};
use crate::error::{ConfigError, MigrationError};
use crate::relation::{BindingKind, RelationBinding};
use crate::staging::StagingStore;
use crate::store::{RecordRef, RecordStore, StoreError};
use crate::value::{FormData, Lookup, RawRecord, Value};

use super::definition::{FieldRule, LookupRule, MigrationDefinition};
use super::registry::MigrationRegistry;

/// What happened to one field of one record.
///
/// The skip-vs-abort policy is visible here instead of being inferred from
/// caught exceptions: a skipped field is logged and the record continues.
#[derive(Debug)]
pub enum FieldOutcome {
    /// The field resolved to a value.
    Resolved(Value),
    /// The field was skipped, with the reason.
    Skipped(String),
}

/// Counters for one migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Records read from the staging store.
    pub processed: u64,
    /// Records validated and persisted.
    pub migrated: u64,
    /// Records skipped on validation failure.
    pub skipped: u64,
}

enum ResolvedRule {
    Convert(Arc<dyn Conversion>),
    Skip,
}

/// Drives one migration definition: per-record pipeline, bulk iteration,
/// and recursive resolution of relation bindings through the registry.
///
/// Field rules are resolved into conversion instances here, once, not per
/// record.
pub struct Migrator<'a> {
    definition: MigrationDefinition,
    staging: &'a StagingStore,
    store: &'a dyn RecordStore,
    registry: &'a MigrationRegistry,
    presave: Vec<(String, ResolvedRule)>,
    postsave: Vec<(String, ResolvedRule)>,
}

impl<'a> Migrator<'a> {
    /// Build an engine for `definition`. Fails on definition
    /// misconfiguration before any data is touched.
    pub fn new(
        definition: MigrationDefinition,
        staging: &'a StagingStore,
        store: &'a dyn RecordStore,
        registry: &'a MigrationRegistry,
    ) -> Result<Self, ConfigError> {
        definition.validate()?;
        let presave = resolve_rules(&definition.presave_fields)?;
        let postsave = resolve_rules(&definition.postsave_fields)?;
        Ok(Self {
            definition,
            staging,
            store,
            registry,
            presave,
            postsave,
        })
    }

    /// The definition this engine runs.
    pub fn definition(&self) -> &MigrationDefinition {
        &self.definition
    }

    /// Run the full migration.
    ///
    /// Unless the definition upserts (and purging was not opted out), every
    /// pre-existing target record for the dependent kinds and the primary
    /// kind is deleted first, keeping the migration idempotent-from-scratch.
    /// A positive `limit` stops after that many staged records; 0 is
    /// unlimited.
    pub fn run(&self, limit: u64) -> Result<RunStats, MigrationError> {
        if !self.definition.update() && self.definition.purge() {
            for kind in &self.definition.dependent_kinds {
                warn!(kind = kind.as_str(), "full replace: deleting dependent records");
                self.store
                    .delete_all(kind)
                    .map_err(|e| MigrationError::Store(e.to_string()))?;
            }
            warn!(
                kind = self.definition.kind.as_str(),
                "full replace: deleting existing target records"
            );
            self.store
                .delete_all(&self.definition.kind)
                .map_err(|e| MigrationError::Store(e.to_string()))?;
        }

        let rows = self.staging.select_all(
            &self.definition.tablespace,
            &self.definition.conditions,
            &self.definition.joins,
        )?;

        let mut stats = RunStats::default();
        for mut raw in rows {
            if limit > 0 && stats.processed >= limit {
                break;
            }
            match self.migrate_record(&mut raw, None, &FormData::new())? {
                Some(_) => stats.migrated += 1,
                None => stats.skipped += 1,
            }
            stats.processed += 1;
        }

        info!(
            migration = %self.definition.qualified_name(),
            processed = stats.processed,
            migrated = stats.migrated,
            skipped = stats.skipped,
            "migration run complete"
        );
        Ok(stats)
    }

    /// Run one staged record through the pipeline.
    ///
    /// `instance` short-circuits the lookup step (used by relation
    /// bindings); `initial` values overlay the definition defaults (used by
    /// reverse bindings to inject the parent reference). Returns the
    /// persisted reference, or `None` when the record was skipped on
    /// validation failure.
    ///
    /// The whole pipeline is one all-or-nothing transaction at the record
    /// store.
    pub fn migrate_record(
        &self,
        raw: &mut RawRecord,
        instance: Option<RecordRef>,
        initial: &FormData,
    ) -> Result<Option<RecordRef>, MigrationError> {
        self.store.begin();
        match self.migrate_record_inner(raw, instance, initial) {
            Ok(Some(reference)) => {
                self.store.commit();
                Ok(Some(reference))
            }
            // A skipped record retains no partial state, including related
            // records created while resolving its bindings.
            Ok(None) => {
                self.store.rollback();
                Ok(None)
            }
            Err(error) => {
                self.store.rollback();
                Err(error)
            }
        }
    }

    fn migrate_record_inner(
        &self,
        raw: &mut RawRecord,
        instance: Option<RecordRef>,
        initial: &FormData,
    ) -> Result<Option<RecordRef>, MigrationError> {
        let mut form = self.definition.defaults.clone();
        form.extend(initial);

        let instance = match instance {
            Some(found) => Some(found),
            None => self.existing_instance(raw, None)?,
        };

        // Presave fields, in declaration order.
        for (key, rule) in &self.presave {
            match rule {
                ResolvedRule::Skip => {
                    debug!(key = key.as_str(), "field mapping explicitly removed; skipping");
                }
                ResolvedRule::Convert(rule) => match self.resolve_field(rule, raw, &mut form) {
                    FieldOutcome::Resolved(value) => form.insert(key.clone(), value),
                    FieldOutcome::Skipped(reason) => warn!(
                        key = key.as_str(),
                        reason = reason.as_str(),
                        tablespace = self.definition.tablespace.as_str(),
                        "skipping presave field"
                    ),
                },
            }
        }

        // Presave relations, in declaration order.
        for (key, bindings) in &self.definition.presave_relations {
            for binding in bindings {
                match self.resolve_binding(key, binding, raw, None)? {
                    Some(reference) => binding.splice_into_form(&mut form, key, &reference),
                    None => warn!(key = key.as_str(), "related record not resolved"),
                }
            }
        }

        // Validate and persist.
        let persisted = match self
            .store
            .validate_and_save(&self.definition.kind, &form, instance.as_ref())
        {
            Ok(reference) => reference,
            Err(StoreError::Validation(errors)) => {
                warn!(
                    kind = self.definition.kind.as_str(),
                    errors = %errors,
                    form = ?form,
                    "record failed validation; skipping"
                );
                return Ok(None);
            }
            Err(StoreError::Integrity(message)) => {
                return Err(MigrationError::IntegrityConflict {
                    form: format!("{form:?}"),
                    message,
                });
            }
            Err(other) => return Err(MigrationError::Store(other.to_string())),
        };

        // Postsave fields read the persisted form data, not the raw record.
        if !self.postsave.is_empty() {
            let mut source = form.as_record();
            let mut scratch = FormData::new();
            for (key, rule) in &self.postsave {
                let rule = match rule {
                    ResolvedRule::Skip => {
                        debug!(key = key.as_str(), "attribute mapping explicitly removed");
                        continue;
                    }
                    ResolvedRule::Convert(rule) => rule,
                };
                match self.resolve_field(rule, &mut source, &mut scratch) {
                    FieldOutcome::Resolved(value) => {
                        match self.store.write_attr(&persisted, key, value) {
                            Ok(()) => {}
                            Err(StoreError::MissingAttribute { .. }) => warn!(
                                key = key.as_str(),
                                instance = %persisted,
                                "attribute missing on persisted record; skipping"
                            ),
                            Err(other) => return Err(MigrationError::Store(other.to_string())),
                        }
                    }
                    FieldOutcome::Skipped(reason) => warn!(
                        key = key.as_str(),
                        reason = reason.as_str(),
                        "skipping postsave field"
                    ),
                }
            }
            self.store
                .save(&persisted)
                .map_err(|e| MigrationError::Store(e.to_string()))?;
        }

        // Postsave relations; return values are unused further.
        for (key, bindings) in &self.definition.postsave_relations {
            for binding in bindings {
                self.resolve_binding(key, binding, raw, Some(&persisted))?;
            }
        }

        Ok(Some(persisted))
    }

    fn resolve_field(
        &self,
        rule: &Arc<dyn Conversion>,
        record: &mut RawRecord,
        form: &mut FormData,
    ) -> FieldOutcome {
        let raw_value = match rule.binding() {
            FieldBinding::Column(column) => match record.get(column) {
                Some(value) => value.clone(),
                None => {
                    return FieldOutcome::Skipped(format!("column '{column}' is not present"))
                }
            },
            FieldBinding::Columns(_) | FieldBinding::Unbound => Value::Null,
        };
        match rule.convert(&raw_value, record, form) {
            Ok(value) => FieldOutcome::Resolved(value),
            Err(error) => FieldOutcome::Skipped(error.to_string()),
        }
    }

    /// Locate an existing target record via the lookup template plus any
    /// extra lookup. With neither configured nor given, a new record is
    /// always created.
    fn existing_instance(
        &self,
        raw: &RawRecord,
        extra: Option<&Lookup>,
    ) -> Result<Option<RecordRef>, MigrationError> {
        let has_extra = extra.map(|lookup| !lookup.is_empty()).unwrap_or(false);
        if self.definition.lookup.is_empty() && !has_extra {
            return Ok(None);
        }

        let mut lookup = Lookup::new();
        for (key, rule) in &self.definition.lookup {
            match rule {
                LookupRule::Value(value) => lookup.insert(key.clone(), value.clone()),
                LookupRule::Column(column) => match raw.get(column) {
                    Some(value) => {
                        let coerced = value
                            .coerce_int()
                            .map(Value::Int)
                            .unwrap_or_else(|| value.clone());
                        lookup.insert(key.clone(), coerced);
                    }
                    None => warn!(
                        column = column.as_str(),
                        "lookup column missing from record; entry omitted"
                    ),
                },
            }
        }
        if let Some(extra) = extra {
            lookup.extend(extra);
        }
        if lookup.is_empty() {
            return Ok(None);
        }

        self.store
            .find_one(&self.definition.kind, &lookup)
            .map_err(|e| MigrationError::Store(e.to_string()))
    }

    fn nested(&self, name: &str) -> Result<Migrator<'a>, MigrationError> {
        let definition = self
            .registry
            .get(name)
            .map_err(|_| MigrationError::UnknownMigration(name.to_string()))?;
        let mut definition = definition.clone();
        if definition.tablespace.is_empty() {
            definition.tablespace = self.definition.tablespace.clone();
        }
        Ok(Migrator::new(
            definition,
            self.staging,
            self.store,
            self.registry,
        )?)
    }

    /// Resolve one relation binding against a raw record, recursing into the
    /// nested migration where needed.
    fn resolve_binding(
        &self,
        key: &str,
        binding: &RelationBinding,
        raw: &RawRecord,
        parent: Option<&RecordRef>,
    ) -> Result<Option<RecordRef>, MigrationError> {
        match binding.kind {
            BindingKind::ForeignKey | BindingKind::ManyToMany => {
                self.resolve_forward(key, binding, raw)
            }
            BindingKind::Reverse | BindingKind::GenericReverse => {
                self.resolve_reverse(key, binding, raw, parent)
            }
            // Rejected at definition validation; unreachable through a
            // registered definition.
            BindingKind::GenericForeignKey => Err(MigrationError::Config(
                ConfigError::UnsupportedRelationShape {
                    key: key.to_string(),
                },
            )),
        }
    }

    fn resolve_forward(
        &self,
        key: &str,
        binding: &RelationBinding,
        raw: &RawRecord,
    ) -> Result<Option<RecordRef>, MigrationError> {
        let nested = self.nested(&binding.migration)?;

        let lookup = binding.lookup_attributes(raw);
        let mut related_raw = if binding.fetch {
            let raw_lookup = binding.raw_lookup_attributes(raw);
            match nested.staging.select_one(
                &nested.definition.tablespace,
                &raw_lookup,
                &nested.definition.joins,
            )? {
                Some(record) => record,
                None => {
                    warn!(
                        key,
                        tablespace = nested.definition.tablespace.as_str(),
                        "no staged record for relation; nothing bound"
                    );
                    return Ok(None);
                }
            }
        } else {
            raw.clone()
        };

        let existing = nested.existing_instance(&related_raw, Some(&lookup))?;
        if existing.is_some() && !binding.update {
            debug!(key, "related record exists; reusing without re-migration");
            return Ok(existing);
        }
        nested.migrate_record(&mut related_raw, existing, &FormData::new())
    }

    fn resolve_reverse(
        &self,
        key: &str,
        binding: &RelationBinding,
        raw: &RawRecord,
        parent: Option<&RecordRef>,
    ) -> Result<Option<RecordRef>, MigrationError> {
        let Some(parent) = parent else {
            warn!(key, "reverse binding requires a persisted parent; nothing bound");
            return Ok(None);
        };

        let type_tag = matches!(binding.kind, BindingKind::GenericReverse)
            .then(|| self.store.type_tag(&parent.kind));

        let nested = self.nested(&binding.migration)?;
        let lookup = binding.reverse_lookup(parent, type_tag);
        let existing = nested.existing_instance(raw, Some(&lookup))?;
        let initial = binding.reverse_initial(parent, type_tag);

        // Children are created or refreshed unconditionally.
        let mut related_raw = raw.clone();
        nested.migrate_record(&mut related_raw, existing, &initial)
    }
}

fn resolve_rules(
    entries: &[(String, FieldRule)],
) -> Result<Vec<(String, ResolvedRule)>, ConfigError> {
    entries
        .iter()
        .map(|(key, rule)| {
            let resolved = match rule {
                FieldRule::Direct(column) => {
                    ResolvedRule::Convert(Arc::new(DirectConversion::new(column.clone())?))
                }
                FieldRule::Concat(columns) => {
                    ResolvedRule::Convert(Arc::new(ConcatConversion::new(columns.clone())?))
                }
                FieldRule::Rule(rule) => ResolvedRule::Convert(rule.clone()),
                FieldRule::Skip => ResolvedRule::Skip,
            };
            Ok((key.clone(), resolved))
        })
        .collect()
}
