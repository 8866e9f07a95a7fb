//! Command surface for the tablift binary.
//!
//! `import` is self-contained: it parses a source export and (re)loads a
//! staging tablespace. `migrate` runs a plan against a migration registry;
//! the shipped binary starts from an empty registry, so embedding
//! applications that define their own migrations drive
//! [`commands::run_migrate`] directly with a populated one. The command
//! only ever sees migrations its host registered.

pub mod commands;

pub use commands::{CliError, ImportArgs, MigrateArgs};
