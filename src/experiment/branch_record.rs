//! Branch Record - named lineage inside an experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize_name, CallerId, ExperimentId, RunId};

/// Branch Record represents a named line of runs within one experiment.
///
/// Names are unique per experiment and stored lower-case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchRecord {
    experiment_id: ExperimentId,
    name: String,
    parent_branch: Option<String>,
    created_from_run_id: Option<RunId>,
    owner: CallerId,
    description: String,
    created_at: DateTime<Utc>,
}

impl BranchRecord {
    /// Create a branch record with no parent and an empty description.
    #[must_use]
    pub fn new(experiment_id: ExperimentId, name: &str, owner: CallerId) -> Self {
        Self {
            experiment_id,
            name: normalize_name(name),
            parent_branch: None,
            created_from_run_id: None,
            owner,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the branch this one was forked from.
    #[must_use]
    pub fn with_parent_branch(mut self, parent: &str) -> Self {
        self.parent_branch = Some(normalize_name(parent));
        self
    }

    /// Set the run this branch was forked at.
    #[must_use]
    pub const fn with_created_from_run(mut self, run_id: RunId) -> Self {
        self.created_from_run_id = Some(run_id);
        self
    }

    /// Set the description (lower-cased).
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.trim().to_lowercase();
        self
    }

    /// Get the owning experiment ID.
    #[must_use]
    pub const fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    /// Get the branch name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the parent branch name, if any.
    #[must_use]
    pub fn parent_branch(&self) -> Option<&str> {
        self.parent_branch.as_deref()
    }

    /// Get the run this branch was created from, if any.
    #[must_use]
    pub const fn created_from_run_id(&self) -> Option<RunId> {
        self.created_from_run_id
    }

    /// Get the owner identity.
    #[must_use]
    pub const fn owner(&self) -> &CallerId {
        &self.owner
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_record_normalizes() {
        let owner = CallerId::new("u").unwrap();
        let branch = BranchRecord::new(ExperimentId::new(), " Feature-X ", owner)
            .with_parent_branch("MAIN")
            .with_description("Try Larger Batch");

        assert_eq!(branch.name(), "feature-x");
        assert_eq!(branch.parent_branch(), Some("main"));
        assert_eq!(branch.description(), "try larger batch");
        assert!(branch.created_from_run_id().is_none());
    }
}
