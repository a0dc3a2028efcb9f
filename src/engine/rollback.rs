//! Rollback orchestrator.
//!
//! A rollback never rewrites history: it commits a new run on the target
//! branch that copies the source run's parameters, records the source as its
//! parent and takes over the branch's latest pointer.

use chrono::Utc;
use tracing::info;

use super::LineageEngine;
use crate::experiment::{
    normalize_name, CallerId, ExperimentId, ParamMap, RunId, RunRecord, RunStatus, VersionInfo,
};
use crate::store::RunStore;
use crate::{Error, Result};

impl<S: RunStore> LineageEngine<S> {
    /// Materialize a new run from a historical one.
    ///
    /// The new run lands on `branch` (else the source run's branch, else the
    /// experiment default) with:
    /// - run number = experiment's highest + 1
    /// - version = branch head's version with patch + 1
    /// - `parameters` copied from the source, `metrics` reset to empty
    /// - `parent_run_id` = source, tags = source tags plus the rollback tag
    /// - status `running`, commit message `"rollback to run {n}"` unless given
    ///
    /// Flipping the previous latest and inserting the new run happen in one
    /// conditional store write, retried on concurrent commits.
    ///
    /// # Errors
    ///
    /// `NotFound` if the experiment, source run (in that experiment) or
    /// target branch is missing; `InvalidArgument`/`Conflict` when the
    /// rollback policy refuses the source; `Conflict` if retries run out;
    /// `StoreUnavailable` on store failure.
    pub async fn rollback(
        &self,
        experiment_id: ExperimentId,
        source_run_id: RunId,
        caller: &CallerId,
        branch: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<RunRecord> {
        let experiment = self.get_experiment(experiment_id).await?;
        let source = self.require_run_in(experiment_id, source_run_id).await?;

        let policy = self.config.rollback_policy;
        if !policy.allow_active_source && !source.status().is_terminal() {
            return Err(Error::Conflict(format!(
                "run {} is still {}; only finished runs can be rolled back to",
                source.run_number(),
                source.status()
            )));
        }

        let target = self
            .resolve_branch(&experiment, branch, Some(source.branch_name()), caller)
            .await?;
        if !policy.allow_cross_branch && target.name != source.branch_name() {
            return Err(Error::InvalidArgument(format!(
                "rollback from branch '{}' onto '{}' is disabled",
                source.branch_name(),
                target.name
            )));
        }

        let run_id = RunId::new();
        self.ensure_acyclic(run_id, source_run_id).await?;

        let label = format!("rollback to run {}", source.run_number());
        let commit_message = commit_message
            .map(normalize_name)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| label.clone());
        let mut tags = source.tags().clone();
        tags.insert(self.config.rollback_tag.clone());

        let make = |run_number: u64, version: String| {
            let mut version_info = VersionInfo::latest(version, &target.name);
            version_info.parent_run_id = Some(source_run_id);
            version_info.commit_message.clone_from(&commit_message);

            RunRecord::builder(experiment_id, run_number, caller.clone(), version_info)
                .run_id(run_id)
                .name(&label)
                .status(RunStatus::Running)
                .parameters(source.parameters().clone())
                .metrics(ParamMap::new())
                .tags(tags.clone())
                .start_time(Utc::now())
                .build()
        };

        let run = self
            .commit_new_run(experiment_id, &target.name, target.register.as_ref(), make)
            .await?;
        info!(
            experiment_id = %experiment_id,
            source_run = source.run_number(),
            run_number = run.run_number(),
            version = run.version(),
            branch = run.branch_name(),
            caller = %caller,
            "rolled back to run {} as run {}",
            source.run_number(),
            run.run_number()
        );
        Ok(run)
    }
}
