//! Lineage Engine
//!
//! Composes the version allocator, branch registry and run store into the
//! operations callers invoke: experiment management, run lifecycle, rollback,
//! tagging, lineage queries and run comparison.
//!
//! Every mutation that creates a run goes through one conditional store
//! write ([`RunStore::commit_run`]) prepared against the experiment's last
//! run number. A concurrent writer makes that stamp stale; the engine then
//! re-reads and retries, up to [`EngineConfig::max_commit_retries`] times.
//!
//! # Example
//!
//! ```rust
//! use run_lineage::engine::{LineageEngine, NewRun};
//! use run_lineage::experiment::CallerId;
//!
//! # async fn example() -> run_lineage::Result<()> {
//! let engine = LineageEngine::in_memory();
//! let caller = CallerId::new("researcher-7")?;
//!
//! let experiment = engine.create_experiment("Docking", "", &caller).await?;
//! let first = engine
//!     .create_run(experiment.experiment_id(), NewRun::new(), &caller)
//!     .await?;
//! let rolled = engine
//!     .rollback(experiment.experiment_id(), first.run_id(), &caller, None, None)
//!     .await?;
//!
//! assert_eq!(rolled.version(), "1.0.1");
//! assert_eq!(rolled.parent_run_id(), Some(first.run_id()));
//! # Ok(())
//! # }
//! ```

mod branches;
mod compare;
mod lifecycle;
mod lineage;
mod rollback;
mod tags;

pub use branches::{BranchSummary, NewBranch};
pub use compare::{AlignedValues, MetricStats, RunComparison, RunSummary};
pub use lifecycle::{NewRun, RunPatch};

use std::future::Future;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::experiment::{
    BranchRecord, CallerId, ExperimentId, ExperimentRecord, ExperimentStatus, RunId, RunRecord,
};
use crate::store::{
    ExperimentQuery, MemoryRunStore, Page, Pagination, RunCommit, RunQuery, RunStore,
};
use crate::version::allocate_above;
use crate::{Error, Result};

/// Run lineage and branch-versioning engine over a [`RunStore`].
#[derive(Debug)]
pub struct LineageEngine<S = MemoryRunStore> {
    store: S,
    config: EngineConfig,
}

/// Builder for `LineageEngine`.
#[derive(Debug)]
pub struct LineageEngineBuilder<S> {
    store: S,
    config: EngineConfig,
}

impl<S: RunStore> LineageEngineBuilder<S> {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration does not validate.
    pub fn build(self) -> Result<LineageEngine<S>> {
        Ok(LineageEngine {
            store: self.store,
            config: self.config.validate()?,
        })
    }
}

impl LineageEngine<MemoryRunStore> {
    /// Engine over a fresh in-memory store with default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: MemoryRunStore::new(),
            config: EngineConfig::default(),
        }
    }
}

/// Partial update of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentPatch {
    /// New name (normalized, must stay unique).
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New status.
    pub status: Option<ExperimentStatus>,
}

/// Experiment record with its run count and branches.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOverview {
    /// The experiment.
    pub experiment: ExperimentRecord,
    /// Number of runs across all branches.
    pub run_count: usize,
    /// Branches in creation order.
    pub branches: Vec<BranchRecord>,
}

impl<S: RunStore> LineageEngine<S> {
    /// Create an engine builder over `store`.
    #[must_use]
    pub fn builder(store: S) -> LineageEngineBuilder<S> {
        LineageEngineBuilder {
            store,
            config: EngineConfig::default(),
        }
    }

    /// Get the active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Create an experiment together with its default branch.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a blank name, `Conflict` if the normalized name
    /// is taken, `StoreUnavailable` on store failure.
    pub async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        owner: &CallerId,
    ) -> Result<ExperimentRecord> {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "experiment name is required".to_string(),
            ));
        }
        let experiment = ExperimentRecord::builder(name, owner.clone())
            .description(description)
            .default_branch(&self.config.default_branch)
            .build();
        let default_branch = BranchRecord::new(
            experiment.experiment_id(),
            experiment.default_branch(),
            owner.clone(),
        )
        .with_description("default main branch");

        self.store
            .create_experiment(experiment.clone(), default_branch)
            .await?;
        info!(
            experiment_id = %experiment.experiment_id(),
            name = experiment.name(),
            caller = %owner,
            "experiment created"
        );
        Ok(experiment)
    }

    /// Get an experiment.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist.
    pub async fn get_experiment(&self, experiment_id: ExperimentId) -> Result<ExperimentRecord> {
        self.store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("experiment {experiment_id}")))
    }

    /// Get an experiment with its run count and branches.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist.
    pub async fn experiment_overview(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<ExperimentOverview> {
        let experiment = self.get_experiment(experiment_id).await?;
        let runs = self
            .store
            .query_runs(RunQuery::experiment(experiment_id).limit(1))
            .await?;
        let branches = self.store.list_branches(experiment_id).await?;
        Ok(ExperimentOverview {
            experiment,
            run_count: runs.total,
            branches,
        })
    }

    /// List experiments, most recently updated first.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure.
    pub async fn list_experiments(
        &self,
        status: Option<ExperimentStatus>,
        pagination: Pagination,
    ) -> Result<Page<ExperimentRecord>> {
        self.store
            .list_experiments(ExperimentQuery { status, pagination })
            .await
    }

    /// Rename, re-describe or change the status of an experiment.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a blank new name, `NotFound`, or `Conflict` if
    /// the new name is taken.
    pub async fn update_experiment(
        &self,
        experiment_id: ExperimentId,
        patch: ExperimentPatch,
        caller: &CallerId,
    ) -> Result<ExperimentRecord> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::InvalidArgument(
                "experiment name must not be blank".to_string(),
            ));
        }
        let mut experiment = self.get_experiment(experiment_id).await?;
        if let Some(name) = &patch.name {
            experiment.rename(name);
        }
        if let Some(description) = &patch.description {
            experiment.set_description(description);
        }
        if let Some(status) = patch.status {
            experiment.set_status(status);
        }
        self.store.replace_experiment(experiment.clone()).await?;
        info!(experiment_id = %experiment_id, caller = %caller, "experiment updated");
        Ok(experiment)
    }

    /// Delete an experiment and, with it, all of its branches and runs.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist.
    pub async fn delete_experiment(
        &self,
        experiment_id: ExperimentId,
        caller: &CallerId,
    ) -> Result<()> {
        if !self.store.delete_experiment(experiment_id).await? {
            return Err(Error::NotFound(format!("experiment {experiment_id}")));
        }
        info!(experiment_id = %experiment_id, caller = %caller, "experiment deleted");
        Ok(())
    }

    /// Fetch a run and check it belongs to `experiment_id`.
    pub(crate) async fn require_run_in(
        &self,
        experiment_id: ExperimentId,
        run_id: RunId,
    ) -> Result<RunRecord> {
        match self.store.get_run(run_id).await? {
            Some(run) if run.experiment_id() == experiment_id => Ok(run),
            _ => Err(Error::NotFound(format!(
                "run {run_id} in experiment {experiment_id}"
            ))),
        }
    }

    /// Run `attempt` until it stops failing with `Conflict`.
    pub(crate) async fn with_retries<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.config.max_commit_retries;
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Err(e) if e.is_conflict() && tries < limit => {
                    debug!(
                        operation,
                        attempt = tries,
                        error = %e,
                        "conditional write lost, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) if e.is_conflict() => {
                    warn!(operation, attempts = tries, "giving up after repeated conflicts");
                    return Err(Error::Conflict(format!(
                        "{operation} failed after {tries} attempts: {e}"
                    )));
                }
                other => return other,
            }
        }
    }

    /// Allocate the next run number and version on `branch`, then commit the
    /// run built by `make` as the branch's latest.
    ///
    /// `make` receives `(run_number, version)` and may be called once per
    /// attempt; it must keep the run id stable.
    pub(crate) async fn commit_new_run<F>(
        &self,
        experiment_id: ExperimentId,
        branch: &str,
        register_branch: Option<&BranchRecord>,
        make: F,
    ) -> Result<RunRecord>
    where
        F: Fn(u64, String) -> RunRecord + Send + Sync,
    {
        let make = &make;
        self.with_retries("commit run", move || async move {
            let last = self.store.last_run_number(experiment_id).await?;
            let head = self
                .store
                .query_runs(RunQuery::experiment(experiment_id).branch(branch).limit(1))
                .await?
                .items
                .into_iter()
                .next();
            let latest = self
                .store
                .query_runs(
                    RunQuery::experiment(experiment_id)
                        .branch(branch)
                        .latest_only()
                        .limit(1),
                )
                .await?
                .items
                .into_iter()
                .next();

            let version = allocate_above(
                head.as_ref().map(RunRecord::version),
                latest.as_ref().map(RunRecord::version),
            );
            let run = make(last + 1, version);
            self.store
                .commit_run(RunCommit {
                    run: run.clone(),
                    expected_last_run_number: last,
                    register_branch: register_branch.cloned(),
                })
                .await?;
            Ok(run)
        })
        .await
    }
}
