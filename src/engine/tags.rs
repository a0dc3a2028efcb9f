//! Tag manager: set-semantics add/remove over a run's normalized tags.

use std::collections::BTreeSet;

use tracing::info;

use super::LineageEngine;
use crate::experiment::{normalize_tags, CallerId, RunId};
use crate::store::RunStore;
use crate::{Error, Result};

fn non_empty_tags(tags: &[&str]) -> Result<BTreeSet<String>> {
    let tags = normalize_tags(tags)?;
    if tags.is_empty() {
        return Err(Error::InvalidArgument(
            "at least one tag is required".to_string(),
        ));
    }
    Ok(tags)
}

impl<S: RunStore> LineageEngine<S> {
    /// Add tags to a run. Tags already present are skipped.
    ///
    /// Returns the run's full tag set afterwards.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty list or a blank tag, `NotFound` if the
    /// run does not exist.
    pub async fn add_tags(
        &self,
        run_id: RunId,
        tags: &[&str],
        caller: &CallerId,
    ) -> Result<BTreeSet<String>> {
        let tags = &non_empty_tags(tags)?;
        let run = self
            .with_retries("add tags", move || async move {
                let mut run = self.get_run(run_id).await?;
                let revision = run.revision();
                if !run.insert_tags(tags) {
                    return Ok(run);
                }
                self.store.replace_run(run, revision).await
            })
            .await?;
        info!(run_id = %run_id, tags = ?tags, caller = %caller, "tags added");
        Ok(run.tags().clone())
    }

    /// Remove tags from a run. Tags not present are ignored.
    ///
    /// Returns the run's full tag set afterwards.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty list or a blank tag, `NotFound` if the
    /// run does not exist.
    pub async fn remove_tags(
        &self,
        run_id: RunId,
        tags: &[&str],
        caller: &CallerId,
    ) -> Result<BTreeSet<String>> {
        let tags = &non_empty_tags(tags)?;
        let run = self
            .with_retries("remove tags", move || async move {
                let mut run = self.get_run(run_id).await?;
                let revision = run.revision();
                if !run.remove_tags(tags) {
                    return Ok(run);
                }
                self.store.replace_run(run, revision).await
            })
            .await?;
        info!(run_id = %run_id, tags = ?tags, caller = %caller, "tags removed");
        Ok(run.tags().clone())
    }

    /// Current tags of a run.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run does not exist.
    pub async fn list_tags(&self, run_id: RunId) -> Result<BTreeSet<String>> {
        Ok(self.get_run(run_id).await?.tags().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewRun;

    fn caller() -> CallerId {
        CallerId::new("u-1").unwrap()
    }

    async fn engine_with_run() -> (LineageEngine, RunId) {
        let engine = LineageEngine::in_memory();
        let exp = engine.create_experiment("tags", "", &caller()).await.unwrap();
        let run = engine
            .create_run(exp.experiment_id(), NewRun::new(), &caller())
            .await
            .unwrap();
        (engine, run.run_id())
    }

    #[tokio::test]
    async fn test_add_tags_deduplicates() {
        let (engine, run) = engine_with_run().await;
        let tags = engine
            .add_tags(run, &["Important", "important", " GPU "], &caller())
            .await
            .unwrap();
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["gpu".to_string(), "important".to_string()]
        );

        let before = engine.get_run(run).await.unwrap().revision();
        engine.add_tags(run, &["IMPORTANT"], &caller()).await.unwrap();
        assert_eq!(engine.get_run(run).await.unwrap().revision(), before);
    }

    #[tokio::test]
    async fn test_remove_absent_tag_is_noop() {
        let (engine, run) = engine_with_run().await;
        engine.add_tags(run, &["keep"], &caller()).await.unwrap();

        let tags = engine.remove_tags(run, &["missing"], &caller()).await.unwrap();
        assert!(tags.contains("keep"));

        let tags = engine.remove_tags(run, &["KEEP"], &caller()).await.unwrap();
        assert!(tags.is_empty());
        assert!(engine.list_tags(run).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_or_blank_tags_rejected() {
        let (engine, run) = engine_with_run().await;
        assert!(matches!(
            engine.add_tags(run, &[], &caller()).await.unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            engine.remove_tags(run, &["  "], &caller()).await.unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn test_tags_on_missing_run() {
        let engine = LineageEngine::in_memory();
        let err = engine
            .add_tags(RunId::new(), &["x"], &caller())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
