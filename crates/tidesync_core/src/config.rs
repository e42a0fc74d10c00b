//! Configuration for the sync core.

use tidesync_storage::ModelDefinition;

/// Default table holding queued mutation events.
pub const DEFAULT_MUTATION_EVENT_MODEL: &str = "MutationEvent";
/// Default table holding pending mutation versions.
pub const DEFAULT_PENDING_VERSION_MODEL: &str = "PendingMutationVersion";
/// Default separator between composite primary-key values.
pub const DEFAULT_IDENTIFIER_SEPARATOR: &str = "-";

/// Configuration shared by the outbox and the merger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Name of the table holding queued mutation events.
    pub mutation_event_model: String,
    /// Name of the table holding pending mutation versions.
    pub pending_version_model: String,
    /// Separator used to join composite primary-key values.
    pub identifier_separator: String,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mutation event table name.
    #[must_use]
    pub fn with_mutation_event_model(mut self, name: impl Into<String>) -> Self {
        self.mutation_event_model = name.into();
        self
    }

    /// Sets the pending version table name.
    #[must_use]
    pub fn with_pending_version_model(mut self, name: impl Into<String>) -> Self {
        self.pending_version_model = name.into();
        self
    }

    /// Sets the composite key separator.
    #[must_use]
    pub fn with_identifier_separator(mut self, separator: impl Into<String>) -> Self {
        self.identifier_separator = separator.into();
        self
    }

    /// Definition of the mutation event table (keyed by `id`).
    pub fn mutation_event_definition(&self) -> ModelDefinition {
        ModelDefinition::new(&self.mutation_event_model)
    }

    /// Definition of the pending version table (keyed by `model`, `id`).
    pub fn pending_version_definition(&self) -> ModelDefinition {
        ModelDefinition::new(&self.pending_version_model).with_primary_key(["model", "id"])
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mutation_event_model: DEFAULT_MUTATION_EVENT_MODEL.to_string(),
            pending_version_model: DEFAULT_PENDING_VERSION_MODEL.to_string(),
            identifier_separator: DEFAULT_IDENTIFIER_SEPARATOR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.mutation_event_definition().name(), "MutationEvent");
        assert_eq!(
            config.pending_version_definition().name(),
            "PendingMutationVersion"
        );
        assert_eq!(config.identifier_separator, "-");
        assert_eq!(
            config.pending_version_definition().primary_key(),
            ["model".to_string(), "id".to_string()]
        );
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new()
            .with_mutation_event_model("Outbox")
            .with_pending_version_model("OutboxVersion")
            .with_identifier_separator("#");

        assert_eq!(config.mutation_event_model, "Outbox");
        assert_eq!(config.pending_version_model, "OutboxVersion");
        assert_eq!(config.identifier_separator, "#");
    }
}
