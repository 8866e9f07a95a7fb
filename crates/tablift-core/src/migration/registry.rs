//! The process-scoped migration registry.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, PlanError};

use super::definition::MigrationDefinition;

/// Name→definition table populated at plan-load time.
///
/// Names derive from the definition's namespace and name, both lower-cased.
/// Re-registering a name overwrites silently (last writer wins); nothing is
/// pruned during a run. `clear` exists for test isolation.
#[derive(Default)]
pub struct MigrationRegistry {
    entries: HashMap<String, MigrationDefinition>,
}

impl MigrationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a definition, returning its registry name.
    pub fn register(&mut self, definition: MigrationDefinition) -> Result<String, ConfigError> {
        definition.validate()?;
        let name = definition.qualified_name();
        debug!(name = name.as_str(), "registered migration");
        self.entries.insert(name.clone(), definition);
        Ok(name)
    }

    /// Look a definition up by registry name.
    pub fn get(&self, name: &str) -> Result<&MigrationDefinition, PlanError> {
        self.entries
            .get(name)
            .ok_or_else(|| PlanError::NotRegistered(name.to_string()))
    }

    /// Remove every registration.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str) -> MigrationDefinition {
        MigrationDefinition::new("legacy", name, "author", "authors")
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = MigrationRegistry::new();
        let name = registry.register(definition("Authors")).unwrap();
        assert_eq!(name, "legacy.authors");
        assert!(registry.get("legacy.authors").is_ok());
    }

    #[test]
    fn test_unknown_name_errors() {
        let registry = MigrationRegistry::new();
        assert!(matches!(
            registry.get("legacy.missing"),
            Err(PlanError::NotRegistered(name)) if name == "legacy.missing"
        ));
    }

    #[test]
    fn test_last_writer_wins() {
        let mut registry = MigrationRegistry::new();
        registry.register(definition("Authors")).unwrap();

        let mut replacement = definition("Authors");
        replacement.tablespace = "people".to_string();
        registry.register(replacement).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("legacy.authors").unwrap().tablespace, "people");
    }

    #[test]
    fn test_register_validates() {
        let mut registry = MigrationRegistry::new();
        let invalid = MigrationDefinition::new("legacy", "Broken", "", "authors");
        assert!(registry.register(invalid).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut registry = MigrationRegistry::new();
        registry.register(definition("Authors")).unwrap();
        registry.clear();
        assert!(registry.is_empty());
    }
}
