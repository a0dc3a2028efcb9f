//! Branch registry: branch resolution, creation, listing and deletion.

use serde::Serialize;
use tracing::info;

use super::LineageEngine;
use crate::experiment::{
    normalize_name, BranchRecord, CallerId, ExperimentId, ExperimentRecord, RunId,
};
use crate::store::{RunQuery, RunStore};
use crate::{Error, Result};

/// Request to create a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBranch {
    /// Branch name (normalized).
    pub name: String,
    /// Branch forked from; the experiment default when absent.
    pub parent_branch: Option<String>,
    /// Run the branch forks at.
    pub created_from_run_id: Option<RunId>,
    /// Description.
    pub description: String,
}

impl NewBranch {
    /// Branch named `name` forked from the default branch.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Branch with its run statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BranchSummary {
    /// The branch.
    pub branch: BranchRecord,
    /// Runs recorded on the branch.
    pub run_count: usize,
    /// Run currently holding the latest pointer, if any.
    pub latest_run_id: Option<RunId>,
}

/// Outcome of branch resolution.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedBranch {
    pub(crate) name: String,
    /// Set when the branch does not exist yet and must be registered with the run.
    pub(crate) register: Option<BranchRecord>,
}

impl<S: RunStore> LineageEngine<S> {
    /// Pick the branch an operation targets.
    ///
    /// Precedence: `requested`, then `fallback` (the source run's branch
    /// during rollback), then the experiment's default branch. The result is
    /// normalized and must exist unless implicit branches are enabled.
    pub(crate) async fn resolve_branch(
        &self,
        experiment: &ExperimentRecord,
        requested: Option<&str>,
        fallback: Option<&str>,
        caller: &CallerId,
    ) -> Result<ResolvedBranch> {
        let name = requested
            .map(normalize_name)
            .filter(|n| !n.is_empty())
            .or_else(|| fallback.map(normalize_name).filter(|n| !n.is_empty()))
            .unwrap_or_else(|| experiment.default_branch().to_string());

        let experiment_id = experiment.experiment_id();
        if self.store.get_branch(experiment_id, &name).await?.is_some() {
            return Ok(ResolvedBranch {
                name,
                register: None,
            });
        }
        if self.config.implicit_branches {
            let record = BranchRecord::new(experiment_id, &name, caller.clone())
                .with_parent_branch(experiment.default_branch());
            return Ok(ResolvedBranch {
                name,
                register: Some(record),
            });
        }
        Err(Error::NotFound(format!(
            "branch '{name}' in experiment {experiment_id}"
        )))
    }

    /// Create a branch.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a blank name, `NotFound` for a missing
    /// experiment, parent branch or fork run, `Conflict` for a duplicate name.
    pub async fn create_branch(
        &self,
        experiment_id: ExperimentId,
        request: NewBranch,
        caller: &CallerId,
    ) -> Result<BranchRecord> {
        let name = normalize_name(&request.name);
        if name.is_empty() {
            return Err(Error::InvalidArgument("branch name is required".to_string()));
        }
        let experiment = self.get_experiment(experiment_id).await?;

        let parent = request
            .parent_branch
            .as_deref()
            .map_or_else(|| experiment.default_branch().to_string(), normalize_name);
        if self.store.get_branch(experiment_id, &parent).await?.is_none() {
            return Err(Error::NotFound(format!(
                "parent branch '{parent}' in experiment {experiment_id}"
            )));
        }

        let mut branch = BranchRecord::new(experiment_id, &name, caller.clone())
            .with_parent_branch(&parent)
            .with_description(&request.description);
        if let Some(run_id) = request.created_from_run_id {
            self.require_run_in(experiment_id, run_id).await?;
            branch = branch.with_created_from_run(run_id);
        }

        self.store.create_branch(branch.clone()).await?;
        info!(
            experiment_id = %experiment_id,
            branch = branch.name(),
            parent = parent.as_str(),
            caller = %caller,
            "branch created"
        );
        Ok(branch)
    }

    /// Get a branch.
    ///
    /// # Errors
    ///
    /// `NotFound` if the branch does not exist.
    pub async fn get_branch(
        &self,
        experiment_id: ExperimentId,
        name: &str,
    ) -> Result<BranchRecord> {
        let name = normalize_name(name);
        self.store
            .get_branch(experiment_id, &name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("branch '{name}' in experiment {experiment_id}"))
            })
    }

    /// List branches in creation order with run counts and latest pointers.
    ///
    /// # Errors
    ///
    /// `NotFound` if the experiment does not exist.
    pub async fn list_branches(&self, experiment_id: ExperimentId) -> Result<Vec<BranchSummary>> {
        let branches = self.store.list_branches(experiment_id).await?;
        let mut summaries = Vec::with_capacity(branches.len());
        for branch in branches {
            let query = RunQuery::experiment(experiment_id).branch(branch.name());
            let run_count = self.store.query_runs(query.clone().limit(1)).await?.total;
            let latest_run_id = self
                .store
                .query_runs(query.latest_only().limit(1))
                .await?
                .items
                .first()
                .map(crate::experiment::RunRecord::run_id);
            summaries.push(BranchSummary {
                branch,
                run_count,
                latest_run_id,
            });
        }
        Ok(summaries)
    }

    /// Delete a branch record. Its runs stay in the experiment.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for the default branch, `NotFound` if absent.
    pub async fn delete_branch(
        &self,
        experiment_id: ExperimentId,
        name: &str,
        caller: &CallerId,
    ) -> Result<()> {
        let name = normalize_name(name);
        let experiment = self.get_experiment(experiment_id).await?;
        if name == experiment.default_branch() {
            return Err(Error::InvalidArgument(format!(
                "cannot delete default branch '{name}'"
            )));
        }
        if !self.store.delete_branch(experiment_id, &name).await? {
            return Err(Error::NotFound(format!(
                "branch '{name}' in experiment {experiment_id}"
            )));
        }
        info!(
            experiment_id = %experiment_id,
            branch = name.as_str(),
            caller = %caller,
            "branch deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::NewRun;
    use crate::store::MemoryRunStore;

    fn caller() -> CallerId {
        CallerId::new("u-1").unwrap()
    }

    #[tokio::test]
    async fn test_create_and_list_branches() {
        let engine = LineageEngine::in_memory();
        let exp = engine.create_experiment("b", "", &caller()).await.unwrap();
        let id = exp.experiment_id();

        let dev = engine
            .create_branch(id, NewBranch::named(" Dev "), &caller())
            .await
            .unwrap();
        assert_eq!(dev.name(), "dev");
        assert_eq!(dev.parent_branch(), Some("main"));

        engine.create_run(id, NewRun::new().on_branch("DEV"), &caller()).await.unwrap();
        let run = engine.create_run(id, NewRun::new().on_branch("dev"), &caller()).await.unwrap();

        let summaries = engine.list_branches(id).await.unwrap();
        assert_eq!(summaries.len(), 2);
        let dev = summaries.iter().find(|s| s.branch.name() == "dev").unwrap();
        assert_eq!(dev.run_count, 2);
        assert_eq!(dev.latest_run_id, Some(run.run_id()));
        let main = summaries.iter().find(|s| s.branch.name() == "main").unwrap();
        assert_eq!(main.run_count, 0);
        assert!(main.latest_run_id.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_branch_conflicts() {
        let engine = LineageEngine::in_memory();
        let exp = engine.create_experiment("b2", "", &caller()).await.unwrap();
        let err = engine
            .create_branch(exp.experiment_id(), NewBranch::named("MAIN"), &caller())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_default_branch_cannot_be_deleted() {
        let engine = LineageEngine::in_memory();
        let exp = engine.create_experiment("b3", "", &caller()).await.unwrap();
        let err = engine
            .delete_branch(exp.experiment_id(), "Main", &caller())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_delete_branch_keeps_runs() {
        let engine = LineageEngine::in_memory();
        let exp = engine.create_experiment("b4", "", &caller()).await.unwrap();
        let id = exp.experiment_id();
        engine.create_branch(id, NewBranch::named("tmp"), &caller()).await.unwrap();
        let run = engine.create_run(id, NewRun::new().on_branch("tmp"), &caller()).await.unwrap();

        engine.delete_branch(id, "tmp", &caller()).await.unwrap();
        assert!(engine.get_run(run.run_id()).await.is_ok());
        assert!(matches!(
            engine.get_branch(id, "tmp").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_implicit_branches_registered_on_first_run() {
        let config = EngineConfig::builder().implicit_branches(true).build().unwrap();
        let engine = LineageEngine::builder(MemoryRunStore::new())
            .config(config)
            .build()
            .unwrap();
        let exp = engine.create_experiment("b5", "", &caller()).await.unwrap();
        let id = exp.experiment_id();

        let run = engine
            .create_run(id, NewRun::new().on_branch("Sweep"), &caller())
            .await
            .unwrap();
        assert_eq!(run.branch_name(), "sweep");
        let branch = engine.get_branch(id, "sweep").await.unwrap();
        assert_eq!(branch.parent_branch(), Some("main"));
    }
}
