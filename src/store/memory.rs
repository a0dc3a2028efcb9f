//! In-memory run store implementation using `DashMap`.
//!
//! This is the default backend - data is lost on process restart.
//!
//! Each experiment entry doubles as the lock for its runs: `commit_run` holds
//! the entry's write guard for the whole flip-and-insert, and run queries
//! hold its read guard while collecting, so no reader sees a half-applied
//! commit.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::{ExperimentQuery, Page, RunCommit, RunOrder, RunQuery, RunStore};
use crate::experiment::{BranchRecord, ExperimentId, ExperimentRecord, RunId, RunRecord};
use crate::{Error, Result};

#[derive(Debug)]
struct ExperimentEntry {
    record: ExperimentRecord,
    branches: FxHashMap<String, BranchRecord>,
    run_ids: Vec<RunId>,
    last_run_number: u64,
}

/// In-memory lineage store using lock-free concurrent hashmaps.
///
/// Thread-safe; per-experiment atomicity comes from the `DashMap` entry
/// guard of the owning experiment.
///
/// # Example
///
/// ```rust
/// use run_lineage::store::{MemoryRunStore, RunStore};
///
/// # async fn example() -> run_lineage::Result<()> {
/// let store = MemoryRunStore::new();
/// assert_eq!(store.run_count().await?, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryRunStore {
    experiments: DashMap<ExperimentId, ExperimentEntry>,
    names: DashMap<String, ExperimentId>,
    runs: DashMap<RunId, RunRecord>,
    available: AtomicBool,
}

impl MemoryRunStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            experiments: DashMap::new(),
            names: DashMap::new(),
            runs: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Create with pre-allocated capacity for runs.
    #[must_use]
    pub fn with_capacity(runs: usize) -> Self {
        Self {
            runs: DashMap::with_capacity(runs),
            ..Self::new()
        }
    }

    /// Simulate the backing store going offline (or coming back).
    ///
    /// While unavailable every operation fails with `StoreUnavailable`
    /// before touching any data.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of experiments held.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty() && self.runs.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable(
                "in-memory store is marked offline".to_string(),
            ))
        }
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

fn experiment_not_found(experiment_id: ExperimentId) -> Error {
    Error::NotFound(format!("experiment {experiment_id}"))
}

impl RunStore for MemoryRunStore {
    async fn create_experiment(
        &self,
        experiment: ExperimentRecord,
        default_branch: BranchRecord,
    ) -> Result<()> {
        self.check_available()?;
        let id = experiment.experiment_id();

        // Reserve the name first; the guard is released before the experiment
        // map is touched so the two maps are never locked in opposite orders.
        match self.names.entry(experiment.name().to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::Conflict(format!(
                    "experiment with name '{}' already exists",
                    experiment.name()
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let mut branches = FxHashMap::default();
        branches.insert(default_branch.name().to_string(), default_branch);
        self.experiments.insert(
            id,
            ExperimentEntry {
                record: experiment,
                branches,
                run_ids: Vec::new(),
                last_run_number: 0,
            },
        );
        debug!(experiment_id = %id, "experiment stored with default branch");
        Ok(())
    }

    async fn get_experiment(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<Option<ExperimentRecord>> {
        self.check_available()?;
        Ok(self
            .experiments
            .get(&experiment_id)
            .map(|entry| entry.record.clone()))
    }

    async fn find_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        self.check_available()?;
        let Some(id) = self.names.get(name).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.experiments.get(&id).map(|entry| entry.record.clone()))
    }

    async fn replace_experiment(&self, experiment: ExperimentRecord) -> Result<()> {
        self.check_available()?;
        let id = experiment.experiment_id();
        let mut entry = self
            .experiments
            .get_mut(&id)
            .ok_or_else(|| experiment_not_found(id))?;

        let old_name = entry.record.name().to_string();
        if old_name != experiment.name() {
            match self.names.entry(experiment.name().to_string()) {
                Entry::Occupied(_) => {
                    return Err(Error::Conflict(format!(
                        "experiment with name '{}' already exists",
                        experiment.name()
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
            self.names.remove_if(&old_name, |_, owner| *owner == id);
        }
        entry.record = experiment;
        Ok(())
    }

    async fn list_experiments(&self, query: ExperimentQuery) -> Result<Page<ExperimentRecord>> {
        self.check_available()?;
        let mut records: Vec<ExperimentRecord> = self
            .experiments
            .iter()
            .filter(|entry| query.status.map_or(true, |s| entry.record.status() == s))
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        Ok(Page::from_sorted(records, query.pagination))
    }

    async fn delete_experiment(&self, experiment_id: ExperimentId) -> Result<bool> {
        self.check_available()?;
        let Some((_, entry)) = self.experiments.remove(&experiment_id) else {
            return Ok(false);
        };
        for run_id in &entry.run_ids {
            self.runs.remove(run_id);
        }
        self.names
            .remove_if(entry.record.name(), |_, owner| *owner == experiment_id);
        debug!(
            experiment_id = %experiment_id,
            runs = entry.run_ids.len(),
            branches = entry.branches.len(),
            "experiment deleted with cascade"
        );
        Ok(true)
    }

    async fn create_branch(&self, branch: BranchRecord) -> Result<()> {
        self.check_available()?;
        let id = branch.experiment_id();
        let mut entry = self
            .experiments
            .get_mut(&id)
            .ok_or_else(|| experiment_not_found(id))?;
        if entry.branches.contains_key(branch.name()) {
            return Err(Error::Conflict(format!(
                "branch '{}' already exists",
                branch.name()
            )));
        }
        entry.branches.insert(branch.name().to_string(), branch);
        Ok(())
    }

    async fn get_branch(
        &self,
        experiment_id: ExperimentId,
        name: &str,
    ) -> Result<Option<BranchRecord>> {
        self.check_available()?;
        Ok(self
            .experiments
            .get(&experiment_id)
            .and_then(|entry| entry.branches.get(name).cloned()))
    }

    async fn list_branches(&self, experiment_id: ExperimentId) -> Result<Vec<BranchRecord>> {
        self.check_available()?;
        let entry = self
            .experiments
            .get(&experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;
        let mut branches: Vec<BranchRecord> = entry.branches.values().cloned().collect();
        drop(entry);
        branches.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.name().cmp(b.name()))
        });
        Ok(branches)
    }

    async fn delete_branch(&self, experiment_id: ExperimentId, name: &str) -> Result<bool> {
        self.check_available()?;
        let mut entry = self
            .experiments
            .get_mut(&experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;
        Ok(entry.branches.remove(name).is_some())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        self.check_available()?;
        Ok(self.runs.get(&run_id).map(|run| run.clone()))
    }

    async fn query_runs(&self, query: RunQuery) -> Result<Page<RunRecord>> {
        self.check_available()?;
        let entry = self
            .experiments
            .get(&query.experiment_id)
            .ok_or_else(|| experiment_not_found(query.experiment_id))?;
        let mut runs: Vec<RunRecord> = entry
            .run_ids
            .iter()
            .filter_map(|id| self.runs.get(id).map(|run| run.clone()))
            .filter(|run| query.matches(run))
            .collect();
        drop(entry);

        match query.order {
            RunOrder::NewestFirst => runs.sort_by(|a, b| b.run_number().cmp(&a.run_number())),
            RunOrder::OldestFirst => runs.sort_by_key(RunRecord::run_number),
        }
        Ok(Page::from_sorted(runs, query.pagination))
    }

    async fn last_run_number(&self, experiment_id: ExperimentId) -> Result<u64> {
        self.check_available()?;
        self.experiments
            .get(&experiment_id)
            .map(|entry| entry.last_run_number)
            .ok_or_else(|| experiment_not_found(experiment_id))
    }

    async fn commit_run(&self, commit: RunCommit) -> Result<()> {
        self.check_available()?;
        let RunCommit {
            run,
            expected_last_run_number,
            register_branch,
        } = commit;
        let experiment_id = run.experiment_id();

        let mut entry = self
            .experiments
            .get_mut(&experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;

        if entry.last_run_number != expected_last_run_number {
            return Err(Error::Conflict(format!(
                "experiment {experiment_id} advanced to run {} (prepared against {expected_last_run_number})",
                entry.last_run_number
            )));
        }
        if run.run_number() != expected_last_run_number + 1 {
            return Err(Error::InvalidArgument(format!(
                "run number {} does not follow {expected_last_run_number}",
                run.run_number()
            )));
        }
        if self.runs.contains_key(&run.run_id()) {
            return Err(Error::Conflict(format!("run {} already exists", run.run_id())));
        }

        let branch = run.branch_name().to_string();
        if !entry.branches.contains_key(&branch) {
            match register_branch {
                Some(record) if record.name() == branch => {
                    entry.branches.insert(branch.clone(), record);
                }
                _ => {
                    return Err(Error::NotFound(format!(
                        "branch '{branch}' in experiment {experiment_id}"
                    )));
                }
            }
        }

        if run.is_latest() {
            for id in &entry.run_ids {
                if let Some(mut other) = self.runs.get_mut(id) {
                    if other.is_latest() && other.branch_name() == branch {
                        other.set_latest(false);
                        other.bump_revision();
                        trace!(run_id = %id, "latest pointer cleared");
                    }
                }
            }
        }

        entry.last_run_number = run.run_number();
        entry.run_ids.push(run.run_id());
        self.runs.insert(run.run_id(), run);
        Ok(())
    }

    async fn replace_run(&self, mut run: RunRecord, expected_revision: u64) -> Result<RunRecord> {
        self.check_available()?;
        let experiment_id = run.experiment_id();
        // Read guard: excludes a concurrent commit on this experiment.
        let _entry = self
            .experiments
            .get(&experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;

        let mut stored = self
            .runs
            .get_mut(&run.run_id())
            .ok_or_else(|| Error::NotFound(format!("run {}", run.run_id())))?;
        if stored.revision() != expected_revision {
            return Err(Error::Conflict(format!(
                "run {} changed concurrently (revision {} != {expected_revision})",
                run.run_id(),
                stored.revision()
            )));
        }
        if run.is_latest() != stored.is_latest() {
            run.set_latest(stored.is_latest());
        }
        run.bump_revision();
        *stored = run.clone();
        Ok(run)
    }

    async fn delete_run(&self, run_id: RunId) -> Result<bool> {
        self.check_available()?;
        let Some(experiment_id) = self.runs.get(&run_id).map(|run| run.experiment_id()) else {
            return Ok(false);
        };
        let Some(mut entry) = self.experiments.get_mut(&experiment_id) else {
            return Ok(self.runs.remove(&run_id).is_some());
        };
        entry.run_ids.retain(|id| *id != run_id);
        let removed = self.runs.remove(&run_id).is_some();
        // next run number is always max(remaining) + 1
        entry.last_run_number = entry
            .run_ids
            .iter()
            .filter_map(|id| self.runs.get(id).map(|run| run.run_number()))
            .max()
            .unwrap_or(0);
        trace!(run_id = %run_id, last_run_number = entry.last_run_number, "run removed");
        Ok(removed)
    }

    async fn run_count(&self) -> Result<usize> {
        self.check_available()?;
        Ok(self.runs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{CallerId, VersionInfo};

    fn owner() -> CallerId {
        CallerId::new("tester").unwrap()
    }

    async fn seeded(name: &str) -> (MemoryRunStore, ExperimentId) {
        let store = MemoryRunStore::new();
        let experiment = ExperimentRecord::builder(name, owner()).build();
        let id = experiment.experiment_id();
        let main = BranchRecord::new(id, "main", owner());
        store.create_experiment(experiment, main).await.unwrap();
        (store, id)
    }

    fn run(experiment_id: ExperimentId, number: u64, branch: &str) -> RunRecord {
        RunRecord::builder(
            experiment_id,
            number,
            owner(),
            VersionInfo::latest(format!("1.0.{}", number - 1), branch),
        )
        .build()
    }

    fn commit(run: RunRecord, expected: u64) -> RunCommit {
        RunCommit {
            run,
            expected_last_run_number: expected,
            register_branch: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_experiment_name_conflicts() {
        let (store, _) = seeded("dup").await;
        let again = ExperimentRecord::builder("DUP", owner()).build();
        let branch = BranchRecord::new(again.experiment_id(), "main", owner());

        let err = store.create_experiment(again, branch).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.experiment_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_flips_latest_on_branch_only() {
        let (store, id) = seeded("flip").await;
        store
            .create_branch(BranchRecord::new(id, "dev", owner()))
            .await
            .unwrap();

        store.commit_run(commit(run(id, 1, "main"), 0)).await.unwrap();
        store.commit_run(commit(run(id, 2, "dev"), 1)).await.unwrap();
        store.commit_run(commit(run(id, 3, "main"), 2)).await.unwrap();

        let latest = store
            .query_runs(RunQuery::experiment(id).latest_only().all())
            .await
            .unwrap();
        let numbers: Vec<u64> = latest.items.iter().map(RunRecord::run_number).collect();
        assert_eq!(numbers, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_stale_commit_is_conflict() {
        let (store, id) = seeded("stale").await;
        store.commit_run(commit(run(id, 1, "main"), 0)).await.unwrap();

        let err = store.commit_run(commit(run(id, 1, "main"), 0)).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.run_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_unknown_branch_not_found() {
        let (store, id) = seeded("nobranch").await;
        let err = store
            .commit_run(commit(run(id, 1, "ghost"), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replace_run_checks_revision() {
        let (store, id) = seeded("rev").await;
        let first = run(id, 1, "main");
        store.commit_run(commit(first.clone(), 0)).await.unwrap();

        let stored = store.replace_run(first.clone(), 0).await.unwrap();
        assert_eq!(stored.revision(), 1);

        let err = store.replace_run(first, 0).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_run_lowers_last_run_number() {
        let (store, id) = seeded("renumber").await;
        let first = run(id, 1, "main");
        let second = run(id, 2, "main");
        store.commit_run(commit(first.clone(), 0)).await.unwrap();
        store.commit_run(commit(second.clone(), 1)).await.unwrap();

        assert!(store.delete_run(second.run_id()).await.unwrap());
        assert_eq!(store.last_run_number(id).await.unwrap(), 1);
        assert!(!store.delete_run(second.run_id()).await.unwrap());

        // deleting an older run keeps the maximum
        store.commit_run(commit(run(id, 2, "main"), 1)).await.unwrap();
        assert!(store.delete_run(first.run_id()).await.unwrap());
        assert_eq!(store.last_run_number(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_offline_store_fails_fast() {
        let (store, id) = seeded("offline").await;
        store.set_available(false);
        let err = store.get_experiment(id).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        store.set_available(true);
        assert!(store.get_experiment(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rename_releases_old_name() {
        let (store, id) = seeded("old").await;
        let mut record = store.get_experiment(id).await.unwrap().unwrap();
        record.rename("new");
        store.replace_experiment(record).await.unwrap();

        assert!(store.find_experiment_by_name("old").await.unwrap().is_none());
        assert!(store.find_experiment_by_name("new").await.unwrap().is_some());
    }
}
