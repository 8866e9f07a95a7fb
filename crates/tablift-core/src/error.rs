//! Core error types.
//!
//! The taxonomy separates configuration errors (fatal before any data moves),
//! staging I/O errors (fatal for the current run), per-migration fatal errors,
//! and plan construction errors. Per-field and per-record conditions that are
//! recovered locally never surface here; they are logged and skipped inside
//! the engine.

use thiserror::Error;

/// Staging-store errors.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Underlying SQLite failure: connectivity or malformed statement.
    #[error("staging database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A bulk-insert record did not supply every declared column. The whole
    /// batch is rolled back.
    #[error("record {index} in batch for '{table}' is missing column '{column}'")]
    IncompleteRecord {
        /// Table the batch was destined for.
        table: String,
        /// Zero-based position of the offending record in the batch.
        index: usize,
        /// The declared column the record left out.
        column: String,
    },
}

/// Definition-construction errors, raised before any data touches the
/// pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Every migration definition must declare a target record kind.
    #[error("migration definition '{0}' does not declare a target kind")]
    MissingTargetKind(String),

    /// A column-bound conversion rule was built without a column name.
    #[error("conversion rule '{rule}' requires a bound column")]
    UnboundConversion {
        /// The rule type that was misconfigured.
        rule: &'static str,
    },

    /// A forward relation binding was declared without a primary key.
    #[error("relation binding for '{key}' must declare a primary key")]
    MissingPrimaryKey {
        /// The output key the binding was declared under.
        key: String,
    },

    /// Generic forward bindings cannot resolve their raw-side lookup;
    /// rejected when the owning definition is built, not at first use.
    #[error("relation binding for '{key}' uses an unsupported relation shape: \
             generic forward references cannot be fetched from a tablespace")]
    UnsupportedRelationShape {
        /// The output key the binding was declared under.
        key: String,
    },
}

/// Fatal conditions for one migration definition's run.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Staging store failure.
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// Definition misconfiguration discovered while building the engine.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Uniqueness/integrity conflict while persisting a record. This is not
    /// skipped: it signals a lookup or update-flag misconfiguration.
    #[error("integrity conflict while persisting {form}: {message}")]
    IntegrityConflict {
        /// Rendering of the form data that triggered the conflict.
        form: String,
        /// Store-level description of the conflict.
        message: String,
    },

    /// Any other record-store failure.
    #[error("record store error: {0}")]
    Store(String),

    /// A relation binding referenced a migration name the registry does not
    /// know about.
    #[error("nested migration '{0}' has not been registered")]
    UnknownMigration(String),
}

/// Plan construction and registry lookup errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Lookup of an unregistered migration name.
    #[error("migration '{0}' has not been registered")]
    NotRegistered(String),

    /// The plan file could not be read.
    #[error("could not read plan file '{path}': {source}")]
    Unreadable {
        /// Path of the plan file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The plan file did not parse or was structurally incomplete.
    #[error("plan file '{path}' is malformed: {message}")]
    Malformed {
        /// Path of the plan file.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// A requested group is not declared in the plan file.
    #[error("plan group '{0}' is not declared in the plan file")]
    UnknownGroup(String),
}
