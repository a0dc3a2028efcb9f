//! Run Store Module
//!
//! Storage contract consumed by the lineage engine:
//! - document create/read/update/delete for experiments, branches and runs
//! - query-with-sort-and-filter over runs and experiments
//! - two conditional writes ([`RunStore::commit_run`], [`RunStore::replace_run`])
//!   that make the latest-pointer flip and run-number allocation atomic
//!
//! # Example
//!
//! ```rust,no_run
//! use run_lineage::experiment::{BranchRecord, CallerId, ExperimentRecord};
//! use run_lineage::store::{MemoryRunStore, RunStore};
//!
//! # async fn example() -> run_lineage::Result<()> {
//! let store = MemoryRunStore::new();
//! let owner = CallerId::new("u-1")?;
//! let experiment = ExperimentRecord::builder("screen", owner.clone()).build();
//! let main = BranchRecord::new(experiment.experiment_id(), "main", owner);
//!
//! store.create_experiment(experiment.clone(), main).await?;
//! assert!(store.get_experiment(experiment.experiment_id()).await?.is_some());
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryRunStore;

use std::collections::BTreeSet;
use std::future::Future;

use crate::experiment::{
    BranchRecord, ExperimentId, ExperimentRecord, ExperimentStatus, RunId, RunRecord, RunStatus,
};
use crate::Result;

/// Page request (1-based page number). Both components are always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: usize,
    limit: usize,
}

impl Pagination {
    /// Build a page request; `page` and `limit` are clamped to at least 1.
    #[must_use]
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    /// 1-based page number.
    #[must_use]
    pub const fn page(&self) -> usize {
        self.page
    }

    /// Items per page.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Number of items to skip. Saturates instead of overflowing.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

/// One page of query results plus the unpaginated total.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matching items across all pages.
    pub total: usize,
    /// The request that produced this page.
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Total number of pages for `total` items.
    #[must_use]
    pub const fn total_pages(&self) -> usize {
        let limit = if self.pagination.limit == 0 {
            1
        } else {
            self.pagination.limit
        };
        self.total.div_ceil(limit)
    }

    pub(crate) fn from_sorted(all: Vec<T>, pagination: Pagination) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit())
            .collect();
        Self {
            items,
            total,
            pagination,
        }
    }
}

/// Sort order for run queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOrder {
    /// Highest run number first.
    #[default]
    NewestFirst,
    /// Lowest run number first.
    OldestFirst,
}

/// Filter over the runs of one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    /// Experiment to search.
    pub experiment_id: ExperimentId,
    /// Restrict to one branch.
    pub branch: Option<String>,
    /// Restrict to one status.
    pub status: Option<RunStatus>,
    /// Runs must carry every tag listed.
    pub tags: BTreeSet<String>,
    /// Restrict to runs holding the latest pointer.
    pub latest_only: bool,
    /// Restrict to direct children of a run.
    pub parent_run_id: Option<RunId>,
    /// Sort order.
    pub order: RunOrder,
    /// Page to return.
    pub pagination: Pagination,
}

impl RunQuery {
    /// All runs of an experiment, newest first, first page of 20.
    #[must_use]
    pub fn experiment(experiment_id: ExperimentId) -> Self {
        Self {
            experiment_id,
            branch: None,
            status: None,
            tags: BTreeSet::new(),
            latest_only: false,
            parent_run_id: None,
            order: RunOrder::NewestFirst,
            pagination: Pagination::default(),
        }
    }

    /// Restrict to one branch.
    #[must_use]
    pub fn branch(mut self, branch: &str) -> Self {
        self.branch = Some(crate::experiment::normalize_name(branch));
        self
    }

    /// Restrict to one status.
    #[must_use]
    pub const fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Require every tag in `tags`.
    #[must_use]
    pub fn tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Only runs holding the latest pointer.
    #[must_use]
    pub const fn latest_only(mut self) -> Self {
        self.latest_only = true;
        self
    }

    /// Only direct children of `parent`.
    #[must_use]
    pub const fn children_of(mut self, parent: RunId) -> Self {
        self.parent_run_id = Some(parent);
        self
    }

    /// Set the sort order.
    #[must_use]
    pub const fn order(mut self, order: RunOrder) -> Self {
        self.order = order;
        self
    }

    /// Set the page.
    #[must_use]
    pub const fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Return at most `limit` runs from the first page.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.pagination = Pagination::new(1, limit);
        self
    }

    /// Unbounded: every matching run on one page.
    #[must_use]
    pub const fn all(mut self) -> Self {
        self.pagination = Pagination {
            page: 1,
            limit: usize::MAX,
        };
        self
    }

    /// Whether `run` satisfies every filter.
    #[must_use]
    pub fn matches(&self, run: &RunRecord) -> bool {
        run.experiment_id() == self.experiment_id
            && self.branch.as_deref().map_or(true, |b| run.branch_name() == b)
            && self.status.map_or(true, |s| run.status() == s)
            && self.tags.iter().all(|t| run.tags().contains(t))
            && (!self.latest_only || run.is_latest())
            && self
                .parent_run_id
                .map_or(true, |p| run.parent_run_id() == Some(p))
    }
}

/// Filter over experiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExperimentQuery {
    /// Restrict to one status.
    pub status: Option<ExperimentStatus>,
    /// Page to return (most recently updated first).
    pub pagination: Pagination,
}

/// A new run plus the state it was prepared against.
#[derive(Debug, Clone)]
pub struct RunCommit {
    /// The run to insert.
    pub run: RunRecord,
    /// Highest run number in the experiment when the run was prepared (0 if none).
    pub expected_last_run_number: u64,
    /// Branch to register in the same atomic step when it does not exist yet.
    pub register_branch: Option<BranchRecord>,
}

/// Storage collaborator for the lineage engine.
///
/// Implementations must make [`commit_run`](Self::commit_run) and
/// [`replace_run`](Self::replace_run) atomic with respect to each other for
/// a given experiment. Transport failures surface as `StoreUnavailable`.
pub trait RunStore: Send + Sync {
    /// Insert an experiment together with its default branch.
    ///
    /// Fails with `Conflict` if the name is taken; neither record is written.
    fn create_experiment(
        &self,
        experiment: ExperimentRecord,
        default_branch: BranchRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Get an experiment by ID.
    fn get_experiment(
        &self,
        experiment_id: ExperimentId,
    ) -> impl Future<Output = Result<Option<ExperimentRecord>>> + Send;

    /// Look up an experiment by normalized name.
    fn find_experiment_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<ExperimentRecord>>> + Send;

    /// Overwrite an experiment record.
    ///
    /// Fails with `NotFound` if absent, `Conflict` if a rename collides.
    fn replace_experiment(
        &self,
        experiment: ExperimentRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// List experiments, most recently updated first.
    fn list_experiments(
        &self,
        query: ExperimentQuery,
    ) -> impl Future<Output = Result<Page<ExperimentRecord>>> + Send;

    /// Delete an experiment with all its branches and runs.
    ///
    /// Returns `false` if it did not exist.
    fn delete_experiment(
        &self,
        experiment_id: ExperimentId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Insert a branch. Fails with `Conflict` on a duplicate name.
    fn create_branch(&self, branch: BranchRecord) -> impl Future<Output = Result<()>> + Send;

    /// Get a branch by experiment and normalized name.
    fn get_branch(
        &self,
        experiment_id: ExperimentId,
        name: &str,
    ) -> impl Future<Output = Result<Option<BranchRecord>>> + Send;

    /// List an experiment's branches in creation order.
    fn list_branches(
        &self,
        experiment_id: ExperimentId,
    ) -> impl Future<Output = Result<Vec<BranchRecord>>> + Send;

    /// Delete a branch record (runs are kept). Returns `false` if absent.
    fn delete_branch(
        &self,
        experiment_id: ExperimentId,
        name: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Get a run by ID.
    fn get_run(&self, run_id: RunId) -> impl Future<Output = Result<Option<RunRecord>>> + Send;

    /// Query runs of one experiment.
    ///
    /// Fails with `NotFound` if the experiment does not exist.
    fn query_runs(&self, query: RunQuery) -> impl Future<Output = Result<Page<RunRecord>>> + Send;

    /// Highest run number among the experiment's current runs (0 if none).
    fn last_run_number(
        &self,
        experiment_id: ExperimentId,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Atomically insert a new run.
    ///
    /// In one step: verify the experiment's last run number still equals
    /// `expected_last_run_number` (else `Conflict`), verify or register the
    /// branch, clear `is_latest` on the branch's other runs if the new run is
    /// latest, and insert the run.
    fn commit_run(&self, commit: RunCommit) -> impl Future<Output = Result<()>> + Send;

    /// Overwrite a run if its stored revision equals `expected_revision`.
    ///
    /// Returns the stored record (with bumped revision). Fails with
    /// `Conflict` on a stale revision and `NotFound` if the run is gone. The
    /// latest pointer is owned by `commit_run` and is never changed here.
    fn replace_run(
        &self,
        run: RunRecord,
        expected_revision: u64,
    ) -> impl Future<Output = Result<RunRecord>> + Send;

    /// Delete one run. Children keep their (now dangling) parent reference;
    /// the experiment's last run number drops to the highest remaining one.
    fn delete_run(&self, run_id: RunId) -> impl Future<Output = Result<bool>> + Send;

    /// Total number of runs in the store.
    fn run_count(&self) -> impl Future<Output = Result<usize>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offset() {
        assert_eq!(Pagination::new(1, 10).offset(), 0);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
        assert_eq!(Pagination::new(0, 0), Pagination::new(1, 1));
        assert_eq!(Pagination::new(0, 0).offset(), 0);
        assert_eq!(Pagination::new(usize::MAX, usize::MAX).offset(), usize::MAX);
    }

    #[test]
    fn test_zero_page_and_limit_are_clamped() {
        let pagination = Pagination::new(0, 0);
        assert_eq!((pagination.page(), pagination.limit()), (1, 1));

        let page = Page::from_sorted(vec![1, 2, 3], pagination);
        assert_eq!(page.items, vec![1]);
        assert_eq!(page.total_pages(), 3);

        let unbounded = Page::from_sorted(vec![1, 2, 3], Pagination::new(5, usize::MAX));
        assert!(unbounded.items.is_empty());
        assert_eq!(unbounded.total_pages(), 1);
    }

    #[test]
    fn test_page_from_sorted() {
        let page = Page::from_sorted((1..=25).collect::<Vec<_>>(), Pagination::new(3, 10));
        assert_eq!(page.items, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages(), 3);
    }
}
