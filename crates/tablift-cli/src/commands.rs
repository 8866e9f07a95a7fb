//! The `import` and `migrate` commands.

use std::path::PathBuf;

use clap::Args;
use thiserror::Error;
use tracing::info;

use tablift_core::error::{PlanError, StagingError};
use tablift_core::plan::{MigrationPlan, PlanReport};
use tablift_core::store::MemoryRecordStore;
use tablift_core::{MigrationRegistry, StagingStore};
use tablift_ingest::{IngestError, JsonBackend, SourceBackend};

/// Command-level errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Incompatible or missing arguments.
    #[error("{0}")]
    Usage(String),

    /// The named ingestion backend does not exist.
    #[error("unknown ingestion backend '{0}'")]
    UnknownBackend(String),

    /// Staging store failure.
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// Source parsing failure.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Plan construction failure.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The JSON dump could not be written.
    #[error("could not write output file '{path}': {source}")]
    Output {
        /// Path of the output file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Arguments for `tablift import`.
#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Source data files to load.
    #[arg(required = true)]
    pub datafiles: Vec<PathBuf>,

    /// Tablespace name; derived from the input file name when omitted.
    #[arg(long)]
    pub dest: Option<String>,

    /// Limit on the number of records imported (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub limit: u64,

    /// Comma-delimited list of columns to index.
    #[arg(long, value_delimiter = ',')]
    pub indexes: Vec<String>,

    /// Ingestion backend for the source format.
    #[arg(long, default_value = "json")]
    pub backend: String,

    /// Backend database name (stored as `<name>.sqlite3`).
    #[arg(long, default_value = "migration_db")]
    pub db: String,
}

/// Arguments for `tablift migrate`.
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Migration plan file to execute.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// A single migration to run instead of a plan.
    #[arg(long)]
    pub migration: Option<String>,

    /// Restrict the plan to one group.
    #[arg(long)]
    pub group: Option<String>,

    /// Limit records per migration (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub limit: u64,

    /// Backend database name (stored as `<name>.sqlite3`).
    #[arg(long, default_value = "migration_db")]
    pub db: String,

    /// Dump the resulting records as JSON to this path.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

fn backend_for(name: &str, limit: u64) -> Result<Box<dyn SourceBackend>, CliError> {
    match name {
        "json" => Ok(Box::new(JsonBackend::new(limit))),
        other => Err(CliError::UnknownBackend(other.to_string())),
    }
}

fn tablespace_for(datafile: &std::path::Path, dest: Option<&str>) -> String {
    match dest {
        Some(dest) => dest.to_string(),
        None => datafile
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tablespace".to_string()),
    }
}

/// Drop, recreate, index, and bulk-load one tablespace per source file.
pub fn run_import(args: &ImportArgs) -> Result<(), CliError> {
    let backend = backend_for(&args.backend, args.limit)?;
    let staging = StagingStore::open(&args.db)?;

    for datafile in &args.datafiles {
        let tablespace = tablespace_for(datafile, args.dest.as_deref());
        info!(
            datafile = %datafile.display(),
            tablespace = tablespace.as_str(),
            "loading source file"
        );

        let document = backend.parse(datafile)?;
        let columns = document.column_names();

        staging.drop_table(&tablespace)?;
        staging.create_table(&tablespace, &columns)?;
        if !args.indexes.is_empty() {
            staging.create_indexes(&tablespace, &args.indexes)?;
        }
        staging.bulk_insert(&tablespace, &columns, &document.records)?;

        println!(
            "Loaded {} records from {} into tablespace '{}'",
            document.records.len(),
            datafile.display(),
            tablespace
        );
    }
    Ok(())
}

/// Build the plan (from a file or a single migration name) and run it
/// against an ephemeral in-memory record store.
pub fn run_migrate(
    args: &MigrateArgs,
    registry: &MigrationRegistry,
) -> Result<PlanReport, CliError> {
    if args.group.is_some() && args.plan.is_none() {
        return Err(CliError::Usage(
            "a migration plan is required when specifying a group".to_string(),
        ));
    }

    let mut plan = match &args.plan {
        Some(path) => MigrationPlan::from_file(path, args.group.as_deref(), registry)?,
        None => MigrationPlan::new(),
    };
    if plan.is_empty() {
        if let Some(name) = &args.migration {
            plan.add_migration(name, registry)?;
        }
    }
    if plan.is_empty() {
        return Err(CliError::Usage(
            "nothing to run: supply a plan file or a migration name".to_string(),
        ));
    }

    let staging = StagingStore::open(&args.db)?;
    let store = MemoryRecordStore::new();
    let report = plan.run(&staging, &store, registry, args.limit);

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(stats) => println!(
                "{}: {} processed, {} migrated, {} skipped",
                outcome.name, stats.processed, stats.migrated, stats.skipped
            ),
            Err(error) => println!("{}: FAILED ({error})", outcome.name),
        }
    }

    if let Some(out) = &args.out {
        let rendered = serde_json::to_string_pretty(&store.dump_json())
            .unwrap_or_else(|_| "{}".to_string());
        std::fs::write(out, rendered).map_err(|source| CliError::Output {
            path: out.display().to_string(),
            source,
        })?;
        println!("Wrote migrated records to {}", out.display());
    }

    Ok(report)
}
