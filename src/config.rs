//! Engine configuration
//!
//! Built in code through [`EngineConfig::builder`] or decoded from JSON; every
//! field has a default so partial documents are accepted.
//!
//! ```rust
//! use run_lineage::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "default_branch": "Trunk" }"#)?;
//! assert_eq!(config.default_branch, "trunk");
//! assert_eq!(config.max_commit_retries, 16);
//! # Ok::<(), run_lineage::Error>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::experiment::{normalize_name, DEFAULT_BRANCH};
use crate::{Error, Result};

/// Tag attached to every run produced by a rollback.
pub const ROLLBACK_TAG: &str = "rollback";

/// Which rollback sources are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackPolicy {
    /// Allow rolling back to a run that is still queued or running.
    pub allow_active_source: bool,
    /// Allow the new run to land on a branch other than the source run's.
    pub allow_cross_branch: bool,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            allow_active_source: true,
            allow_cross_branch: true,
        }
    }
}

/// Lineage engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Branch created with every experiment.
    pub default_branch: String,
    /// Tag added to rolled-back runs.
    pub rollback_tag: String,
    /// Attempts for a conditional write before giving up with `Conflict`.
    pub max_commit_retries: u32,
    /// Upper bound on ancestor traversal steps.
    pub max_lineage_depth: usize,
    /// Register unknown branches on first use instead of failing with `NotFound`.
    pub implicit_branches: bool,
    /// Rollback source restrictions.
    pub rollback_policy: RollbackPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
            rollback_tag: ROLLBACK_TAG.to_string(),
            max_commit_retries: 16,
            max_lineage_depth: 10_000,
            implicit_branches: false,
            rollback_policy: RollbackPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Decode a JSON document and validate it.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed JSON and `InvalidArgument` for
    /// values that fail [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// Normalize names and reject unusable values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a blank branch or tag name, or zero retries/depth.
    pub fn validate(mut self) -> Result<Self> {
        self.default_branch = normalize_name(&self.default_branch);
        self.rollback_tag = normalize_name(&self.rollback_tag);
        if self.default_branch.is_empty() {
            return Err(Error::InvalidArgument(
                "default_branch must not be blank".to_string(),
            ));
        }
        if self.rollback_tag.is_empty() {
            return Err(Error::InvalidArgument(
                "rollback_tag must not be blank".to_string(),
            ));
        }
        if self.max_commit_retries == 0 {
            return Err(Error::InvalidArgument(
                "max_commit_retries must be at least 1".to_string(),
            ));
        }
        if self.max_lineage_depth == 0 {
            return Err(Error::InvalidArgument(
                "max_lineage_depth must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Builder for `EngineConfig`.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the default branch name.
    #[must_use]
    pub fn default_branch(mut self, name: &str) -> Self {
        self.config.default_branch = name.to_string();
        self
    }

    /// Set the tag added to rolled-back runs.
    #[must_use]
    pub fn rollback_tag(mut self, tag: &str) -> Self {
        self.config.rollback_tag = tag.to_string();
        self
    }

    /// Set the conditional-write retry budget.
    #[must_use]
    pub const fn max_commit_retries(mut self, retries: u32) -> Self {
        self.config.max_commit_retries = retries;
        self
    }

    /// Set the ancestor traversal bound.
    #[must_use]
    pub const fn max_lineage_depth(mut self, depth: usize) -> Self {
        self.config.max_lineage_depth = depth;
        self
    }

    /// Register unknown branches on first use.
    #[must_use]
    pub const fn implicit_branches(mut self, enabled: bool) -> Self {
        self.config.implicit_branches = enabled;
        self
    }

    /// Set the rollback policy.
    #[must_use]
    pub const fn rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.config.rollback_policy = policy;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if validation fails.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.rollback_tag, "rollback");
        assert!(config.rollback_policy.allow_active_source);
        assert!(config.rollback_policy.allow_cross_branch);
        assert!(!config.implicit_branches);
    }

    #[test]
    fn test_builder_normalizes() {
        let config = EngineConfig::builder()
            .default_branch(" Trunk ")
            .max_commit_retries(3)
            .build()
            .unwrap();
        assert_eq!(config.default_branch, "trunk");
        assert_eq!(config.max_commit_retries, 3);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = EngineConfig::builder()
            .max_commit_retries(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json_str(
            r#"{ "implicit_branches": true, "rollback_policy": { "allow_cross_branch": false } }"#,
        )
        .unwrap();
        assert!(config.implicit_branches);
        assert!(!config.rollback_policy.allow_cross_branch);
        assert!(config.rollback_policy.allow_active_source);
    }

    #[test]
    fn test_malformed_json() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
