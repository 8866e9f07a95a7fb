//! Relation binding rules.
//!
//! A binding resolves (or recursively creates) a related target record while
//! a parent record is being migrated, then reports how to splice the result
//! into the parent's in-progress output. The recursive resolution itself
//! lives in the migration engine; this module holds the declarative shape,
//! key coercion, and splice semantics.

use tracing::warn;

use crate::error::ConfigError;
use crate::store::RecordRef;
use crate::value::{FormData, Lookup, RawRecord, Value};

/// The relation shapes a binding can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Forward reference written back as a scalar foreign key.
    ForeignKey,
    /// Multi-valued forward reference accumulated into an ordered list.
    ManyToMany,
    /// Reverse reference: the related record's own foreign key points back
    /// at the parent; children are created or refreshed unconditionally.
    Reverse,
    /// Polymorphic forward reference. Declared for completeness; its
    /// raw-side lookup is unsupported and rejected at definition build time.
    GenericForeignKey,
    /// Polymorphic reverse reference, resolved via a type-tag plus numeric
    /// id pair.
    GenericReverse,
}

/// How a raw key column is coerced before lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    /// Coerce to an integer (the default for legacy numeric keys).
    #[default]
    Integer,
    /// Keep the textual form.
    Text,
}

/// A declarative relation binding.
///
/// `migration` names the nested migration (by its registry name) that owns
/// the related record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationBinding {
    /// Registry name of the nested migration.
    pub migration: String,
    /// The relation shape.
    pub kind: BindingKind,
    /// Re-run the nested migration even when a related record exists.
    pub update: bool,
    /// Fetch the related raw record from the related tablespace before
    /// migrating; when off, the parent's own raw record is reused.
    pub fetch: bool,
    /// Coercion applied to the raw key.
    pub key_type: KeyType,
    /// Target-store attribute the related record is looked up by.
    pub primary_key: String,
    /// Column on the parent's tablespace holding the raw key.
    pub local_key: String,
    /// Column on the related tablespace the raw key points at.
    pub remote_key: String,
    /// Type-tag attribute for generic bindings.
    pub content_type_field: String,
    /// Numeric-id attribute for generic bindings.
    pub object_id_field: String,
    /// Attribute on the related record that points back at the parent.
    pub related_field: String,
}

impl RelationBinding {
    fn base(migration: String, kind: BindingKind) -> Self {
        Self {
            migration,
            kind,
            update: false,
            fetch: true,
            key_type: KeyType::Integer,
            primary_key: String::new(),
            local_key: String::new(),
            remote_key: String::new(),
            content_type_field: "content_type".to_string(),
            object_id_field: "object_id".to_string(),
            related_field: "parent".to_string(),
        }
    }

    /// Forward reference resolved into a scalar foreign key.
    ///
    /// `local_key` and `remote_key` default to `primary_key` unless set.
    pub fn foreign_key(migration: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let mut binding = Self::base(migration.into(), BindingKind::ForeignKey);
        binding.primary_key = primary_key.into();
        binding
    }

    /// Multi-valued forward reference accumulated into an ordered list.
    pub fn many_to_many(migration: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let mut binding = Self::base(migration.into(), BindingKind::ManyToMany);
        binding.primary_key = primary_key.into();
        binding
    }

    /// Reverse reference: children carry a foreign key back to the parent.
    pub fn reverse(migration: impl Into<String>) -> Self {
        let mut binding = Self::base(migration.into(), BindingKind::Reverse);
        binding.fetch = false;
        binding
    }

    /// Polymorphic reverse reference.
    pub fn generic_reverse(migration: impl Into<String>) -> Self {
        let mut binding = Self::base(migration.into(), BindingKind::GenericReverse);
        binding.fetch = false;
        binding
    }

    /// Polymorphic forward reference. Constructible so definitions can name
    /// it, but rejected when the owning definition is validated.
    pub fn generic_foreign_key(
        migration: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        let mut binding = Self::base(migration.into(), BindingKind::GenericForeignKey);
        binding.primary_key = primary_key.into();
        binding
    }

    /// Set the parent-side raw key column.
    pub fn with_local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }

    /// Set the related-side raw key column.
    pub fn with_remote_key(mut self, remote_key: impl Into<String>) -> Self {
        self.remote_key = remote_key.into();
        self
    }

    /// Set the raw key coercion.
    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    /// Re-run the nested migration even when a related record exists.
    pub fn with_update(mut self) -> Self {
        self.update = true;
        self
    }

    /// Reuse the parent's raw record instead of fetching from the related
    /// tablespace.
    pub fn without_fetch(mut self) -> Self {
        self.fetch = false;
        self
    }

    /// Set the back-reference attribute for reverse bindings.
    pub fn with_related_field(mut self, related_field: impl Into<String>) -> Self {
        self.related_field = related_field.into();
        self
    }

    /// Set the type-tag attribute for generic bindings.
    pub fn with_content_type_field(mut self, field: impl Into<String>) -> Self {
        self.content_type_field = field.into();
        self
    }

    /// Set the numeric-id attribute for generic bindings.
    pub fn with_object_id_field(mut self, field: impl Into<String>) -> Self {
        self.object_id_field = field.into();
        self
    }

    /// Whether this binding resolves forward (parent holds the reference).
    pub fn is_forward(&self) -> bool {
        matches!(
            self.kind,
            BindingKind::ForeignKey | BindingKind::ManyToMany | BindingKind::GenericForeignKey
        )
    }

    /// Validate the binding as part of its owning definition.
    pub fn validate(&self, key: &str) -> Result<(), ConfigError> {
        match self.kind {
            BindingKind::GenericForeignKey => Err(ConfigError::UnsupportedRelationShape {
                key: key.to_string(),
            }),
            BindingKind::ForeignKey | BindingKind::ManyToMany => {
                if self.primary_key.is_empty() {
                    Err(ConfigError::MissingPrimaryKey {
                        key: key.to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            BindingKind::Reverse | BindingKind::GenericReverse => Ok(()),
        }
    }

    /// The parent-side raw key column, falling back to the primary key.
    pub fn local_key(&self) -> &str {
        if self.local_key.is_empty() {
            &self.primary_key
        } else {
            &self.local_key
        }
    }

    /// The related-side raw key column, falling back to the local key.
    pub fn remote_key(&self) -> &str {
        if self.remote_key.is_empty() {
            self.local_key()
        } else {
            &self.remote_key
        }
    }

    fn coerce(&self, value: &Value) -> Option<Value> {
        match self.key_type {
            KeyType::Integer => value.coerce_int().map(Value::Int),
            KeyType::Text => Some(Value::Text(value.render())),
        }
    }

    fn keyed_lookup(&self, key: &str, raw_record: &RawRecord) -> Lookup {
        let local = self.local_key();
        let coerced = raw_record.get(local).and_then(|value| self.coerce(value));
        match coerced {
            Some(value) => Lookup::from_entry(key, value),
            None => {
                // Coercion failures degrade to an empty lookup; the binding
                // then resolves against the store order instead of raising.
                warn!(
                    local_key = local,
                    key_type = ?self.key_type,
                    "raw key missing or not coercible; using empty lookup"
                );
                Lookup::new()
            }
        }
    }

    /// Target-store lookup for the related record:
    /// `{primary_key: coerce(raw[local_key])}`.
    pub fn lookup_attributes(&self, raw_record: &RawRecord) -> Lookup {
        self.keyed_lookup(&self.primary_key, raw_record)
    }

    /// Related-tablespace lookup for the raw fetch:
    /// `{remote_key: coerce(raw[local_key])}`.
    pub fn raw_lookup_attributes(&self, raw_record: &RawRecord) -> Lookup {
        self.keyed_lookup(self.remote_key(), raw_record)
    }

    /// Lookup for an existing child owned by `parent`.
    pub fn reverse_lookup(&self, parent: &RecordRef, type_tag: Option<i64>) -> Lookup {
        match self.kind {
            BindingKind::GenericReverse => {
                let mut lookup = Lookup::new();
                lookup.insert(
                    self.content_type_field.clone(),
                    Value::Int(type_tag.unwrap_or_default()),
                );
                lookup.insert(self.object_id_field.clone(), Value::Int(parent.pk));
                lookup
            }
            _ => Lookup::from_entry(self.related_field.clone(), Value::Int(parent.pk)),
        }
    }

    /// Initial values injected into the nested migration so the child's
    /// back-reference lands on `parent`.
    pub fn reverse_initial(&self, parent: &RecordRef, type_tag: Option<i64>) -> FormData {
        let mut initial = FormData::new();
        match self.kind {
            BindingKind::GenericReverse => {
                initial.insert(
                    self.content_type_field.clone(),
                    Value::Int(type_tag.unwrap_or_default()),
                );
                initial.insert(self.object_id_field.clone(), Value::Int(parent.pk));
            }
            _ => initial.insert(self.related_field.clone(), Value::Int(parent.pk)),
        }
        initial
    }

    /// Splice a resolved reference into the parent's form data.
    pub fn splice_into_form(&self, form_data: &mut FormData, key: &str, instance: &RecordRef) {
        match self.kind {
            BindingKind::ForeignKey | BindingKind::GenericForeignKey => {
                form_data.insert(key, Value::Int(instance.pk));
            }
            BindingKind::ManyToMany => {
                form_data.append(key, Value::Int(instance.pk));
            }
            // Reverse bindings write nothing on the parent; the child owns
            // the reference.
            BindingKind::Reverse | BindingKind::GenericReverse => {}
        }
    }

    /// Splice a resolved reference into a cascading lookup.
    pub fn splice_into_lookup(&self, lookup: &mut Lookup, key: &str, instance: &RecordRef) {
        match self.kind {
            BindingKind::ManyToMany => match lookup.get(key).cloned() {
                Some(Value::List(mut items)) => {
                    items.push(Value::Int(instance.pk));
                    lookup.insert(key, Value::List(items));
                }
                _ => lookup.insert(key, Value::List(vec![Value::Int(instance.pk)])),
            },
            _ => lookup.insert(key, Value::Int(instance.pk)),
        }
    }
}
