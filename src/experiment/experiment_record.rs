//! Experiment Record - root entity owning branches and runs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize_name, CallerId, ExperimentId};

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Accepting new runs.
    #[default]
    Active,
    /// Kept for reference.
    Archived,
    /// Finished.
    Completed,
}

impl ExperimentStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Experiment Record represents a tracked experiment.
///
/// This is the root entity of the lineage schema. It exclusively owns its
/// branches and runs: deleting it removes both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    experiment_id: ExperimentId,
    name: String,
    description: String,
    status: ExperimentStatus,
    default_branch: String,
    owner: CallerId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ExperimentRecord {
    /// Create a builder for constructing an experiment record with optional fields.
    ///
    /// The name is trimmed and lower-cased.
    #[must_use]
    pub fn builder(name: &str, owner: CallerId) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(name, owner)
    }

    /// Get the experiment ID.
    #[must_use]
    pub const fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    /// Get the normalized experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the experiment status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Get the name of the default branch.
    #[must_use]
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Get the owner identity.
    #[must_use]
    pub const fn owner(&self) -> &CallerId {
        &self.owner
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last-modified timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn rename(&mut self, name: &str) {
        self.name = normalize_name(name);
        self.touch();
    }

    pub(crate) fn set_description(&mut self, description: &str) {
        self.description = description.trim().to_lowercase();
        self.touch();
    }

    pub(crate) fn set_status(&mut self, status: ExperimentStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    experiment_id: ExperimentId,
    name: String,
    description: String,
    status: ExperimentStatus,
    default_branch: String,
    owner: CallerId,
    created_at: DateTime<Utc>,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: &str, owner: CallerId) -> Self {
        Self {
            experiment_id: ExperimentId::new(),
            name: normalize_name(name),
            description: String::new(),
            status: ExperimentStatus::Active,
            default_branch: super::DEFAULT_BRANCH.to_string(),
            owner,
            created_at: Utc::now(),
        }
    }

    /// Set a specific experiment ID.
    #[must_use]
    pub const fn experiment_id(mut self, experiment_id: ExperimentId) -> Self {
        self.experiment_id = experiment_id;
        self
    }

    /// Set the description (lower-cased).
    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.trim().to_lowercase();
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn status(mut self, status: ExperimentStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the default branch name (normalized).
    #[must_use]
    pub fn default_branch(mut self, branch: &str) -> Self {
        self.default_branch = normalize_name(branch);
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        ExperimentRecord {
            experiment_id: self.experiment_id,
            name: self.name,
            description: self.description,
            status: self.status,
            default_branch: self.default_branch,
            owner: self.owner,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
