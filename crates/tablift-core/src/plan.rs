//! Migration plans: ordered, optionally grouped sequences of migrations.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info};

use crate::error::{MigrationError, PlanError};
use crate::migration::{MigrationDefinition, MigrationRegistry, Migrator, RunStats};
use crate::staging::StagingStore;
use crate::store::RecordStore;

#[derive(Debug, Deserialize)]
struct PlanFile {
    plan: PlanHeader,
    #[serde(default)]
    groups: HashMap<String, PlanGroup>,
}

#[derive(Debug, Deserialize)]
struct PlanHeader {
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanGroup {
    migrations: Vec<String>,
}

/// The outcome of one migration within a plan run.
#[derive(Debug)]
pub struct MigrationOutcome {
    /// Registry name of the migration.
    pub name: String,
    /// Run counters, or the error that stopped this migration.
    pub result: Result<RunStats, MigrationError>,
}

/// Per-migration outcomes of one plan run, in plan order.
#[derive(Debug, Default)]
pub struct PlanReport {
    /// One entry per migration, in execution order.
    pub outcomes: Vec<MigrationOutcome>,
}

impl PlanReport {
    /// Number of migrations that completed.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Number of migrations that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

/// An ordered sequence of migration definitions, built once per run and
/// executed once.
#[derive(Default)]
pub struct MigrationPlan {
    migrations: Vec<MigrationDefinition>,
}

impl MigrationPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from a JSON plan file.
    ///
    /// The file declares an ordered `plan.groups` list and one `groups`
    /// section per group naming its migrations in order. With a `group`
    /// given, every other group is skipped (an unknown group is fatal).
    /// Duplicated names simply run twice.
    pub fn from_file(
        path: &Path,
        group: Option<&str>,
        registry: &MigrationRegistry,
    ) -> Result<Self, PlanError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Unreadable {
            path: display.clone(),
            source,
        })?;
        let file: PlanFile =
            serde_json::from_str(&content).map_err(|e| PlanError::Malformed {
                path: display.clone(),
                message: e.to_string(),
            })?;

        if let Some(wanted) = group {
            if !file.plan.groups.iter().any(|g| g == wanted) {
                return Err(PlanError::UnknownGroup(wanted.to_string()));
            }
        }

        let mut plan = Self::new();
        for group_name in &file.plan.groups {
            if let Some(wanted) = group {
                if group_name != wanted {
                    continue;
                }
            }
            let section = file.groups.get(group_name).ok_or_else(|| PlanError::Malformed {
                path: display.clone(),
                message: format!("group '{group_name}' has no section"),
            })?;
            for name in &section.migrations {
                plan.add_migration(name, registry)?;
            }
        }
        Ok(plan)
    }

    /// Append one migration by registry name. Unknown names are fatal
    /// before anything runs.
    pub fn add_migration(
        &mut self,
        name: &str,
        registry: &MigrationRegistry,
    ) -> Result<(), PlanError> {
        let definition = registry.get(name)?;
        self.migrations.push(definition.clone());
        Ok(())
    }

    /// Check whether the plan names no migrations.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Number of migrations in the plan.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Registry names in execution order.
    pub fn migration_names(&self) -> Vec<String> {
        self.migrations
            .iter()
            .map(MigrationDefinition::qualified_name)
            .collect()
    }

    /// Run every migration sequentially, in plan order.
    ///
    /// A failed migration does not stop the ones after it; each outcome is
    /// collected into the report and aborting on failure is the caller's
    /// policy.
    pub fn run(
        &self,
        staging: &StagingStore,
        store: &dyn RecordStore,
        registry: &MigrationRegistry,
        limit: u64,
    ) -> PlanReport {
        let mut report = PlanReport::default();
        for definition in &self.migrations {
            let name = definition.qualified_name();
            info!(migration = name.as_str(), "running migration");

            let result = Migrator::new(definition.clone(), staging, store, registry)
                .map_err(MigrationError::from)
                .and_then(|migrator| migrator.run(limit));
            if let Err(e) = &result {
                error!(migration = name.as_str(), error = %e, "migration failed");
            }
            report.outcomes.push(MigrationOutcome { name, result });
        }
        report
    }
}
