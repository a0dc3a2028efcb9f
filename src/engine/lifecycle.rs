//! Run lifecycle: creation, patching, status transitions and duration.

use chrono::Utc;
use tracing::{debug, info};

use super::LineageEngine;
use crate::experiment::{
    normalize_name, normalize_tags, CallerId, ExperimentId, ParamMap, RunId, RunRecord,
    RunStatus, VersionInfo,
};
use crate::store::{Page, RunQuery, RunStore};
use crate::{Error, Result};

/// Request to create a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRun {
    /// Target branch; the experiment's default branch when absent.
    pub branch: Option<String>,
    /// Run name; `"run {n}"` when absent.
    pub name: Option<String>,
    /// Run parameters.
    pub parameters: ParamMap,
    /// Initial metrics.
    pub metrics: ParamMap,
    /// Tags (normalized on create).
    pub tags: Vec<String>,
    /// Initial status; `running` when absent. Must not be terminal.
    pub status: Option<RunStatus>,
    /// Commit message.
    pub commit_message: Option<String>,
    /// Run this one derives from.
    pub parent_run_id: Option<RunId>,
}

impl NewRun {
    /// Empty request: default branch, no parameters, status `running`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a branch.
    #[must_use]
    pub fn on_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    /// Name the run.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: ParamMap) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set initial metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: ParamMap) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set tags.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the commit message.
    #[must_use]
    pub fn with_commit_message(mut self, message: &str) -> Self {
        self.commit_message = Some(message.to_string());
        self
    }

    /// Record a parent run.
    #[must_use]
    pub const fn derived_from(mut self, parent: RunId) -> Self {
        self.parent_run_id = Some(parent);
        self
    }
}

/// Partial update of a run. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    /// New name.
    pub name: Option<String>,
    /// New status (validated against the state machine).
    pub status: Option<RunStatus>,
    /// Replacement parameters.
    pub parameters: Option<ParamMap>,
    /// Replacement metrics.
    pub metrics: Option<ParamMap>,
    /// Replacement tag set (normalized).
    pub tags: Option<Vec<String>>,
    /// New commit message.
    pub commit_message: Option<String>,
}

impl RunPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch that only replaces metrics.
    #[must_use]
    pub fn metrics(metrics: ParamMap) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::default()
        }
    }
}

impl<S: RunStore> LineageEngine<S> {
    /// Create a run on a branch, making it the branch's latest.
    ///
    /// The run number is the experiment's highest plus one, the version the
    /// branch head's with the patch bumped.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a terminal initial status or blank tag,
    /// `NotFound` for a missing experiment, branch or parent run, `Conflict`
    /// if the parent would create a cycle or retries are exhausted.
    pub async fn create_run(
        &self,
        experiment_id: ExperimentId,
        request: NewRun,
        caller: &CallerId,
    ) -> Result<RunRecord> {
        let status = request.status.unwrap_or(RunStatus::Running);
        if status.is_terminal() {
            return Err(Error::InvalidArgument(format!(
                "runs cannot be created in terminal status '{status}'"
            )));
        }
        let tags = normalize_tags(&request.tags)?;
        let experiment = self.get_experiment(experiment_id).await?;
        let branch = self
            .resolve_branch(&experiment, request.branch.as_deref(), None, caller)
            .await?;

        let run_id = RunId::new();
        if let Some(parent) = request.parent_run_id {
            self.require_run_in(experiment_id, parent).await?;
            self.ensure_acyclic(run_id, parent).await?;
        }

        let commit_message = request
            .commit_message
            .as_deref()
            .map(normalize_name)
            .unwrap_or_default();
        let make = |run_number: u64, version: String| {
            let mut version_info = VersionInfo::latest(version, &branch.name);
            version_info.parent_run_id = request.parent_run_id;
            version_info.commit_message.clone_from(&commit_message);

            let mut builder =
                RunRecord::builder(experiment_id, run_number, caller.clone(), version_info)
                    .run_id(run_id)
                    .status(status)
                    .parameters(request.parameters.clone())
                    .metrics(request.metrics.clone())
                    .tags(tags.clone())
                    .start_time(Utc::now());
            if let Some(name) = &request.name {
                builder = builder.name(name);
            }
            builder.build()
        };

        let run = self
            .commit_new_run(experiment_id, &branch.name, branch.register.as_ref(), make)
            .await?;
        info!(
            experiment_id = %experiment_id,
            run_id = %run.run_id(),
            run_number = run.run_number(),
            version = run.version(),
            branch = run.branch_name(),
            caller = %caller,
            "run created"
        );
        Ok(run)
    }

    /// Get a run.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist.
    pub async fn get_run(&self, run_id: RunId) -> Result<RunRecord> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
    }

    /// Query runs of an experiment. Tag filters are normalized first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the experiment does not exist.
    pub async fn list_runs(&self, mut query: RunQuery) -> Result<Page<RunRecord>> {
        query.tags = query.tags.iter().map(|t| normalize_name(t)).collect();
        self.store.query_runs(query).await
    }

    /// Apply a patch to a run.
    ///
    /// A status change follows the run state machine; entering a terminal
    /// state stamps `end_time` and finalizes the duration.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for blank tags, `InvalidTransition`, `NotFound`, or
    /// `Conflict` if concurrent writers exhaust the retries.
    pub async fn update_run(
        &self,
        run_id: RunId,
        patch: RunPatch,
        caller: &CallerId,
    ) -> Result<RunRecord> {
        let tags = patch.tags.as_ref().map(normalize_tags).transpose()?;
        let patch = &patch;
        let tags = &tags;

        let run = self
            .with_retries("update run", move || async move {
                let mut run = self.get_run(run_id).await?;
                let revision = run.revision();
                if let Some(status) = patch.status {
                    run.transition(status, Utc::now())?;
                }
                if let Some(name) = &patch.name {
                    run.set_name(name);
                }
                if let Some(parameters) = &patch.parameters {
                    run.set_parameters(parameters.clone());
                }
                if let Some(metrics) = &patch.metrics {
                    run.set_metrics(metrics.clone());
                }
                if let Some(tags) = tags {
                    run.replace_tags(tags.clone());
                }
                if let Some(message) = &patch.commit_message {
                    run.set_commit_message(message);
                }
                self.store.replace_run(run, revision).await
            })
            .await?;

        info!(
            run_id = %run_id,
            status = %run.status(),
            caller = %caller,
            "run updated"
        );
        Ok(run)
    }

    /// Move a run to `status`.
    ///
    /// # Errors
    ///
    /// As [`update_run`](Self::update_run).
    pub async fn transition(
        &self,
        run_id: RunId,
        status: RunStatus,
        caller: &CallerId,
    ) -> Result<RunRecord> {
        self.update_run(run_id, RunPatch::status(status), caller).await
    }

    /// Recompute `duration_ms` from the stored timestamps.
    ///
    /// Idempotent: nothing is written when the stored value is already correct.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run does not exist.
    pub async fn finalize_duration(&self, run_id: RunId, caller: &CallerId) -> Result<RunRecord> {
        self.with_retries("finalize duration", move || async move {
            let mut run = self.get_run(run_id).await?;
            let revision = run.revision();
            let before = run.duration_ms();
            if run.finalize_duration() == before {
                return Ok(run);
            }
            debug!(
                run_id = %run_id,
                duration_ms = ?run.duration_ms(),
                caller = %caller,
                "duration finalized"
            );
            self.store.replace_run(run, revision).await
        })
        .await
    }

    /// Delete a run. Runs derived from it keep a dangling parent reference.
    ///
    /// # Errors
    ///
    /// `NotFound` if it does not exist.
    pub async fn delete_run(&self, run_id: RunId, caller: &CallerId) -> Result<()> {
        if !self.store.delete_run(run_id).await? {
            return Err(Error::NotFound(format!("run {run_id}")));
        }
        info!(run_id = %run_id, caller = %caller, "run deleted");
        Ok(())
    }
}
