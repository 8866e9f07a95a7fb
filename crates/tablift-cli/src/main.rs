//! tablift - migrate legacy tabular data through a staging store.

use clap::{Parser, Subcommand};

use tablift_cli::commands::{self, ImportArgs, MigrateArgs};
use tablift_core::MigrationRegistry;

/// Legacy-data migration toolkit.
#[derive(Debug, Parser)]
#[command(name = "tablift")]
#[command(version, about = "Migrate legacy tabular data through a staging store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a source export into a staging tablespace.
    Import(ImportArgs),
    /// Run registered migrations against the staged data.
    Migrate(MigrateArgs),
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tablift_core=info".parse().unwrap())
                .add_directive("tablift_cli=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Import(args) => commands::run_import(&args),
        Command::Migrate(args) => {
            // Embedding applications register their migrations here before
            // handing the registry to the command layer.
            let registry = MigrationRegistry::new();
            commands::run_migrate(&args, &registry).map(|_| ())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
