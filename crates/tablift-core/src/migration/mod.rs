//! Migration definitions, the registry, and the per-record engine.
//!
//! A [`MigrationDefinition`] declares what to build (target kind, field and
//! relation maps, lookup template, flags); a [`Migrator`] executes it
//! against a staging store and a record store, resolving relation bindings
//! recursively through the [`MigrationRegistry`].
//!
//! Per-record lifecycle: presave fields → presave relations →
//! validate/persist → postsave fields → postsave relations.

pub mod definition;
pub mod engine;
pub mod registry;

pub use definition::{FieldRule, LookupRule, MigrationDefinition};
pub use engine::{FieldOutcome, Migrator, RunStats};
pub use registry::MigrationRegistry;
