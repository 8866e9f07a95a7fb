//! tablift core - staging store, conversion rules, and migration engine.
//!
//! Legacy tabular data lands in a schema-light SQLite staging store
//! ("tablespace"); declarative migration definitions then read the staged
//! records, apply per-field conversion rules and per-relation binding rules
//! (recursing into nested migrations for related records), and persist the
//! result through an external record store, with post-save enrichment.

pub mod convert;
pub mod error;
pub mod migration;
pub mod plan;
pub mod relation;
pub mod staging;
pub mod store;
pub mod value;

pub use convert::{
    BooleanConversion, ChoiceConversion, CleanConversion, ConcatConversion, Conversion,
    ConvertError, DateOrNoneConversion, DateToDateTimeConversion, DirectConversion,
    DynamicSourceConversion, FieldBinding, FlagConversion, MultipleChoiceConversion,
    MultipleColumnChoiceConversion,
};
pub use error::{ConfigError, MigrationError, PlanError, StagingError};
pub use migration::{
    FieldOutcome, FieldRule, LookupRule, MigrationDefinition, MigrationRegistry, Migrator,
    RunStats,
};
pub use plan::{MigrationOutcome, MigrationPlan, PlanReport};
pub use relation::{BindingKind, KeyType, RelationBinding};
pub use staging::{JoinKind, JoinSpec, StagingStore};
pub use store::{
    KindSchema, MemoryRecordStore, RecordRef, RecordStore, StoreError, ValidationErrors,
};
pub use value::{FormData, Lookup, RawRecord, Value};
