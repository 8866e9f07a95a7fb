//! Declarative migration definitions.

use std::fmt;
use std::sync::Arc;

use crate::convert::Conversion;
use crate::error::ConfigError;
use crate::relation::RelationBinding;
use crate::staging::JoinSpec;
use crate::value::{FormData, Lookup, Value};

/// How one output field obtains its value.
///
/// Resolved into a conversion rule once, when the engine for the owning
/// definition is built, never per record.
#[derive(Clone)]
pub enum FieldRule {
    /// Copy one source column.
    Direct(String),
    /// Concatenate several source columns with a single space.
    Concat(Vec<String>),
    /// Apply a conversion rule instance.
    Rule(Arc<dyn Conversion>),
    /// Explicitly produce nothing; the declared mechanism for removing an
    /// inherited field mapping.
    Skip,
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRule::Direct(column) => write!(f, "Direct({column})"),
            FieldRule::Concat(columns) => write!(f, "Concat({columns:?})"),
            FieldRule::Rule(_) => write!(f, "Rule(..)"),
            FieldRule::Skip => write!(f, "Skip"),
        }
    }
}

/// One entry of the lookup template used to locate an existing target
/// record.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupRule {
    /// Resolve from the raw record's column, integer-coerced when possible.
    Column(String),
    /// A constant value.
    Value(Value),
}

/// The declarative specification for transforming one tablespace into
/// target records.
///
/// Field and relation maps keep declaration order; the engine honors it.
#[derive(Debug, Clone, Default)]
pub struct MigrationDefinition {
    /// Namespace the definition belongs to (usually the defining crate or
    /// application name).
    pub namespace: String,
    /// The definition's own name.
    pub name: String,
    /// Target record kind. Required.
    pub kind: String,
    /// Primary tablespace the migration reads from.
    pub tablespace: String,
    /// Auxiliary tablespaces joined into every read.
    pub joins: Vec<JoinSpec>,
    /// Equality conditions applied to the bulk iteration.
    pub conditions: Lookup,
    /// Output fields applied before the record is persisted.
    pub presave_fields: Vec<(String, FieldRule)>,
    /// Instance attributes applied after the record is persisted.
    pub postsave_fields: Vec<(String, FieldRule)>,
    /// Relations resolved before the record is persisted.
    pub presave_relations: Vec<(String, Vec<RelationBinding>)>,
    /// Relations resolved after the record is persisted.
    pub postsave_relations: Vec<(String, Vec<RelationBinding>)>,
    /// Kinds whose records are owned by this migration's output and are
    /// purged with it on full replace.
    pub dependent_kinds: Vec<String>,
    /// Upsert instead of full replace. `None` means unset (inheritable).
    pub update: Option<bool>,
    /// Delete existing target records before a non-update run. `None` means
    /// unset (inheritable); the default is on.
    pub purge: Option<bool>,
    /// Template for locating an existing target record.
    pub lookup: Vec<(String, LookupRule)>,
    /// Initial values seeded into every record's output.
    pub defaults: FormData,
}

impl MigrationDefinition {
    /// Create a definition for migrating `tablespace` into `kind` records.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        tablespace: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: kind.into(),
            tablespace: tablespace.into(),
            ..Self::default()
        }
    }

    /// The registry name: `namespace.name`, lower-cased.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            self.namespace.to_lowercase(),
            self.name.to_lowercase()
        )
    }

    /// Whether this migration upserts instead of replacing.
    pub fn update(&self) -> bool {
        self.update.unwrap_or(false)
    }

    /// Whether a non-update run purges existing target records first.
    pub fn purge(&self) -> bool {
        self.purge.unwrap_or(true)
    }

    /// Join an auxiliary tablespace into every read.
    pub fn with_join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    /// Restrict the bulk iteration with an equality condition.
    pub fn with_condition(mut self, column: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(column, value);
        self
    }

    /// Declare a presave output field.
    pub fn with_presave_field(mut self, key: impl Into<String>, rule: FieldRule) -> Self {
        upsert_entry(&mut self.presave_fields, key.into(), rule);
        self
    }

    /// Declare a postsave instance attribute.
    pub fn with_postsave_field(mut self, key: impl Into<String>, rule: FieldRule) -> Self {
        upsert_entry(&mut self.postsave_fields, key.into(), rule);
        self
    }

    /// Declare a presave relation binding under `key`.
    pub fn with_presave_relation(
        mut self,
        key: impl Into<String>,
        binding: RelationBinding,
    ) -> Self {
        push_relation(&mut self.presave_relations, key.into(), binding);
        self
    }

    /// Declare a postsave relation binding under `key`.
    pub fn with_postsave_relation(
        mut self,
        key: impl Into<String>,
        binding: RelationBinding,
    ) -> Self {
        push_relation(&mut self.postsave_relations, key.into(), binding);
        self
    }

    /// Declare a dependent kind purged alongside this migration's output.
    pub fn with_dependent_kind(mut self, kind: impl Into<String>) -> Self {
        self.dependent_kinds.push(kind.into());
        self
    }

    /// Upsert into existing target records instead of replacing them.
    pub fn with_update(mut self) -> Self {
        self.update = Some(true);
        self
    }

    /// Keep existing target records even on a non-update run.
    pub fn without_purge(mut self) -> Self {
        self.purge = Some(false);
        self
    }

    /// Add a lookup-template entry.
    pub fn with_lookup(mut self, key: impl Into<String>, rule: LookupRule) -> Self {
        self.lookup.push((key.into(), rule));
        self
    }

    /// Seed a default output value.
    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key, value);
        self
    }

    /// Validate the definition; fatal before any data touches the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind.is_empty() {
            return Err(ConfigError::MissingTargetKind(self.qualified_name()));
        }
        for (key, bindings) in self.presave_relations.iter().chain(&self.postsave_relations) {
            for binding in bindings {
                binding.validate(key)?;
            }
        }
        Ok(())
    }

    /// Merge a base definition with an override, per-field:
    ///
    /// - lists are concatenated base-then-override,
    /// - maps are overlaid (override wins per key, base order first),
    /// - scalars take the override only where it is set (non-empty strings,
    ///   `Some` flags).
    pub fn merge(base: &MigrationDefinition, override_def: &MigrationDefinition) -> Self {
        let mut merged = base.clone();

        if !override_def.namespace.is_empty() {
            merged.namespace = override_def.namespace.clone();
        }
        if !override_def.name.is_empty() {
            merged.name = override_def.name.clone();
        }
        if !override_def.kind.is_empty() {
            merged.kind = override_def.kind.clone();
        }
        if !override_def.tablespace.is_empty() {
            merged.tablespace = override_def.tablespace.clone();
        }
        if override_def.update.is_some() {
            merged.update = override_def.update;
        }
        if override_def.purge.is_some() {
            merged.purge = override_def.purge;
        }

        merged.joins.extend(override_def.joins.iter().cloned());
        merged
            .dependent_kinds
            .extend(override_def.dependent_kinds.iter().cloned());

        merged.conditions.extend(&override_def.conditions);
        merged.defaults.extend(&override_def.defaults);

        for (key, rule) in &override_def.presave_fields {
            upsert_entry(&mut merged.presave_fields, key.clone(), rule.clone());
        }
        for (key, rule) in &override_def.postsave_fields {
            upsert_entry(&mut merged.postsave_fields, key.clone(), rule.clone());
        }
        for (key, bindings) in &override_def.presave_relations {
            replace_relations(&mut merged.presave_relations, key.clone(), bindings.clone());
        }
        for (key, bindings) in &override_def.postsave_relations {
            replace_relations(&mut merged.postsave_relations, key.clone(), bindings.clone());
        }
        for (key, rule) in &override_def.lookup {
            match merged.lookup.iter_mut().find(|(k, _)| k == key) {
                Some((_, slot)) => *slot = rule.clone(),
                None => merged.lookup.push((key.clone(), rule.clone())),
            }
        }

        merged
    }
}

fn upsert_entry(entries: &mut Vec<(String, FieldRule)>, key: String, rule: FieldRule) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, slot)) => *slot = rule,
        None => entries.push((key, rule)),
    }
}

fn push_relation(
    entries: &mut Vec<(String, Vec<RelationBinding>)>,
    key: String,
    binding: RelationBinding,
) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, bindings)) => bindings.push(binding),
        None => entries.push((key, vec![binding])),
    }
}

fn replace_relations(
    entries: &mut Vec<(String, Vec<RelationBinding>)>,
    key: String,
    bindings: Vec<RelationBinding>,
) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, slot)) => *slot = bindings,
        None => entries.push((key, bindings)),
    }
}
