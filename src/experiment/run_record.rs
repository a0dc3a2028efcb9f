//! Run Record - one versioned execution inside an experiment

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize_name, CallerId, ExperimentId, RunId};
use crate::{Error, Result};

/// Opaque key/value payload used for run parameters and metrics.
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

/// Status of a run.
///
/// ```text
/// queued ──> running ──> completed | failed | cancelled
///    └──────────────────────────────────────> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is created but not yet started.
    Queued,
    /// Run is currently executing.
    Running,
    /// Run completed successfully.
    Completed,
    /// Run failed with an error.
    Failed,
    /// Run was cancelled by user or system.
    Cancelled,
}

impl RunStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` for completed, failed and cancelled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version and lineage metadata of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    /// Semantic version within the branch.
    pub version: String,
    /// Run this one was derived from. Non-owning; may dangle.
    pub parent_run_id: Option<RunId>,
    /// Branch the run belongs to.
    pub branch_name: String,
    /// Free-form change description.
    pub commit_message: String,
    /// Whether this run is the branch head pointer.
    pub is_latest: bool,
}

impl VersionInfo {
    /// Version info for a run on `branch_name` that becomes the branch's latest.
    #[must_use]
    pub fn latest(version: impl Into<String>, branch_name: &str) -> Self {
        Self {
            version: version.into(),
            parent_run_id: None,
            branch_name: normalize_name(branch_name),
            commit_message: String::new(),
            is_latest: true,
        }
    }
}

/// Run Record represents a single execution of an experiment.
///
/// Each experiment can have multiple runs spread over its branches. A run
/// tracks the execution lifecycle from start to completion together with its
/// version and parent in the lineage graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    run_id: RunId,
    experiment_id: ExperimentId,
    run_number: u64,
    name: String,
    owner: CallerId,
    status: RunStatus,
    parameters: ParamMap,
    metrics: ParamMap,
    version_info: VersionInfo,
    tags: BTreeSet<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revision: u64,
}

impl RunRecord {
    /// Create a builder for constructing a run record.
    #[must_use]
    pub fn builder(
        experiment_id: ExperimentId,
        run_number: u64,
        owner: CallerId,
        version_info: VersionInfo,
    ) -> RunRecordBuilder {
        RunRecordBuilder::new(experiment_id, run_number, owner, version_info)
    }

    /// Get the run ID.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub const fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    /// Get the experiment-wide run number.
    #[must_use]
    pub const fn run_number(&self) -> u64 {
        self.run_number
    }

    /// Get the run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the identity that created the run.
    #[must_use]
    pub const fn owner(&self) -> &CallerId {
        &self.owner
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the run parameters.
    #[must_use]
    pub const fn parameters(&self) -> &ParamMap {
        &self.parameters
    }

    /// Get the run metrics.
    #[must_use]
    pub const fn metrics(&self) -> &ParamMap {
        &self.metrics
    }

    /// Get version and lineage metadata.
    #[must_use]
    pub const fn version_info(&self) -> &VersionInfo {
        &self.version_info
    }

    /// Shorthand for `version_info().version`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version_info.version
    }

    /// Shorthand for `version_info().branch_name`.
    #[must_use]
    pub fn branch_name(&self) -> &str {
        &self.version_info.branch_name
    }

    /// Shorthand for `version_info().parent_run_id`.
    #[must_use]
    pub const fn parent_run_id(&self) -> Option<RunId> {
        self.version_info.parent_run_id
    }

    /// Shorthand for `version_info().is_latest`.
    #[must_use]
    pub const fn is_latest(&self) -> bool {
        self.version_info.is_latest
    }

    /// Get the normalized tag set.
    #[must_use]
    pub const fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Get the end timestamp, if the run reached a terminal state.
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Get the duration in milliseconds, once finalized.
    #[must_use]
    pub const fn duration_ms(&self) -> Option<i64> {
        self.duration_ms
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

    /// Store revision, bumped on every persisted change.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Move the run to `next`, stamping `end_time` when it becomes terminal.
    ///
    /// Re-asserting the current status is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the state machine has no such edge.
    pub fn transition(&mut self, next: RunStatus, now: DateTime<Utc>) -> Result<bool> {
        if self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(now);
            self.finalize_duration();
        }
        self.updated_at = now;
        Ok(true)
    }

    /// Derive `duration_ms` from the start and end timestamps.
    ///
    /// Returns the duration, or `None` while the run has no end time.
    /// Repeated calls with unchanged timestamps yield the same value.
    pub fn finalize_duration(&mut self) -> Option<i64> {
        let end = self.end_time?;
        let duration = (end - self.start_time).num_milliseconds();
        self.duration_ms = Some(duration);
        Some(duration)
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = normalize_name(name);
        self.touch();
    }

    pub(crate) fn set_parameters(&mut self, parameters: ParamMap) {
        self.parameters = parameters;
        self.touch();
    }

    pub(crate) fn set_metrics(&mut self, metrics: ParamMap) {
        self.metrics = metrics;
        self.touch();
    }

    pub(crate) fn set_commit_message(&mut self, message: &str) {
        self.version_info.commit_message = message.trim().to_lowercase();
        self.touch();
    }

    pub(crate) fn replace_tags(&mut self, tags: BTreeSet<String>) {
        self.tags = tags;
        self.touch();
    }

    pub(crate) fn insert_tags<'a>(&mut self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        let mut changed = false;
        for tag in tags {
            changed |= self.tags.insert(tag.clone());
        }
        if changed {
            self.touch();
        }
        changed
    }

    pub(crate) fn remove_tags<'a>(&mut self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        let mut changed = false;
        for tag in tags {
            changed |= self.tags.remove(tag);
        }
        if changed {
            self.touch();
        }
        changed
    }

    pub(crate) fn set_latest(&mut self, latest: bool) {
        self.version_info.is_latest = latest;
        self.touch();
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    run_id: RunId,
    experiment_id: ExperimentId,
    run_number: u64,
    name: Option<String>,
    owner: CallerId,
    status: RunStatus,
    parameters: ParamMap,
    metrics: ParamMap,
    version_info: VersionInfo,
    tags: BTreeSet<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    ///
    /// Defaults: fresh id, status `running`, empty payloads, start time now.
    #[must_use]
    pub fn new(
        experiment_id: ExperimentId,
        run_number: u64,
        owner: CallerId,
        version_info: VersionInfo,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            experiment_id,
            run_number,
            name: None,
            owner,
            status: RunStatus::Running,
            parameters: ParamMap::new(),
            metrics: ParamMap::new(),
            version_info,
            tags: BTreeSet::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Set a specific run ID.
    #[must_use]
    pub const fn run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Set the run name (normalized). Defaults to `"run {n}"`.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(normalize_name(name));
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the parameters.
    #[must_use]
    pub fn parameters(mut self, parameters: ParamMap) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the metrics.
    #[must_use]
    pub fn metrics(mut self, metrics: ParamMap) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the (already normalized) tags.
    #[must_use]
    pub fn tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set a custom start timestamp.
    #[must_use]
    pub const fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Set an end timestamp (for importing finished runs and tests).
    #[must_use]
    pub const fn end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        let name = self
            .name
            .unwrap_or_else(|| format!("run {}", self.run_number));
        let mut run = RunRecord {
            run_id: self.run_id,
            experiment_id: self.experiment_id,
            run_number: self.run_number,
            name,
            owner: self.owner,
            status: self.status,
            parameters: self.parameters,
            metrics: self.metrics,
            version_info: self.version_info,
            tags: self.tags,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms: None,
            created_at: self.start_time,
            updated_at: self.start_time,
            revision: 0,
        };
        run.finalize_duration();
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run() -> RunRecord {
        RunRecord::builder(
            ExperimentId::new(),
            1,
            CallerId::new("u").unwrap(),
            VersionInfo::latest("1.0.0", "main"),
        )
        .build()
    }

    #[test]
    fn test_run_defaults() {
        let run = run();
        assert_eq!(run.status(), RunStatus::Running);
        assert_eq!(run.name(), "run 1");
        assert!(run.is_latest());
        assert!(run.end_time().is_none());
        assert!(run.duration_ms().is_none());
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = run();
        let end = run.start_time() + Duration::milliseconds(1500);
        assert!(run.transition(RunStatus::Completed, end).unwrap());
        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!(run.end_time(), Some(end));
        assert_eq!(run.duration_ms(), Some(1500));
    }

    #[test]
    fn test_terminal_runs_cannot_restart() {
        let mut run = run();
        run.transition(RunStatus::Failed, Utc::now()).unwrap();
        let err = run.transition(RunStatus::Running, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: RunStatus::Failed,
                to: RunStatus::Running
            }
        ));
    }

    #[test]
    fn test_same_status_is_noop() {
        let mut run = run();
        assert!(!run.transition(RunStatus::Running, Utc::now()).unwrap());
    }

    #[test]
    fn test_edges() {
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Queued.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Cancelled));
    }

    #[test]
    fn test_finalize_duration_idempotent() {
        let start = Utc::now();
        let mut run = RunRecord::builder(
            ExperimentId::new(),
            2,
            CallerId::new("u").unwrap(),
            VersionInfo::latest("1.0.1", "main"),
        )
        .start_time(start)
        .end_time(start + Duration::seconds(3))
        .build();

        assert_eq!(run.duration_ms(), Some(3000));
        assert_eq!(run.finalize_duration(), Some(3000));
        assert_eq!(run.finalize_duration(), Some(3000));
    }
}
