//! Lineage tracker: ancestry and descendant queries over `parent_run_id`.
//!
//! Parent references are non-owning and may dangle. Traversals are loops with
//! a visited set and a step bound, so corrupt data (a cycle, a deleted
//! ancestor) ends the walk instead of failing it.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::LineageEngine;
use crate::experiment::{RunId, RunRecord};
use crate::store::{RunOrder, RunQuery, RunStore};
use crate::{Error, Result};

impl<S: RunStore> LineageEngine<S> {
    /// Ancestors of a run, from immediate parent to root.
    ///
    /// Stops early at a missing (deleted) ancestor.
    ///
    /// # Errors
    ///
    /// `NotFound` if the starting run does not exist.
    pub async fn ancestors_of(&self, run_id: RunId) -> Result<Vec<RunRecord>> {
        let start = self.get_run(run_id).await?;
        let bound = self.traversal_bound().await?;

        let mut ancestors = Vec::new();
        let mut visited = HashSet::from([run_id]);
        let mut next = start.parent_run_id();

        while let Some(parent_id) = next {
            if ancestors.len() >= bound {
                warn!(run_id = %run_id, bound, "ancestor walk hit the step bound");
                break;
            }
            if !visited.insert(parent_id) {
                warn!(run_id = %run_id, revisited = %parent_id, "cycle in run lineage");
                break;
            }
            let Some(parent) = self.store.get_run(parent_id).await? else {
                debug!(run_id = %run_id, missing = %parent_id, "lineage ends at deleted ancestor");
                break;
            };
            next = parent.parent_run_id();
            ancestors.push(parent);
        }
        Ok(ancestors)
    }

    /// Runs whose parent is `run_id`, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run does not exist.
    pub async fn children_of(&self, run_id: RunId) -> Result<Vec<RunRecord>> {
        let run = self.get_run(run_id).await?;
        let page = self
            .store
            .query_runs(
                RunQuery::experiment(run.experiment_id())
                    .children_of(run_id)
                    .order(RunOrder::OldestFirst)
                    .all(),
            )
            .await?;
        Ok(page.items)
    }

    /// Reject a parent link that would make `run_id` its own ancestor.
    ///
    /// Walks up from `parent_id` (inclusive) within the traversal bound.
    pub(crate) async fn ensure_acyclic(&self, run_id: RunId, parent_id: RunId) -> Result<()> {
        let bound = self.traversal_bound().await?;
        let mut visited = HashSet::new();
        let mut next = Some(parent_id);
        let mut steps = 0;

        while let Some(current) = next {
            if current == run_id {
                return Err(Error::Conflict(format!(
                    "linking run {run_id} to parent {parent_id} would create a lineage cycle"
                )));
            }
            if steps >= bound || !visited.insert(current) {
                break;
            }
            steps += 1;
            next = self
                .store
                .get_run(current)
                .await?
                .and_then(|run| run.parent_run_id());
        }
        Ok(())
    }

    async fn traversal_bound(&self) -> Result<usize> {
        let runs = self.store.run_count().await?;
        Ok(runs.min(self.config.max_lineage_depth))
    }
}
