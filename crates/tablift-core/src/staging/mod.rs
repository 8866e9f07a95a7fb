//! Schema-light staging store ("tablespace") backed by SQLite.
//!
//! Source records land here between ingestion and migration. Every column is
//! declared as a generic TEXT column; the query surface is limited to
//! equality lookups and fixed left/inner joins, the only shapes the
//! migration engine needs.

pub mod store;

pub use store::{JoinKind, JoinSpec, StagingStore};
