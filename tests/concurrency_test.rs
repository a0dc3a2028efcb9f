//! Concurrent writers against one experiment.
//!
//! Every task races for the same conditional write; the store must end with
//! contiguous run numbers and exactly one latest run per branch.

use std::collections::BTreeSet;
use std::sync::Arc;

use run_lineage::engine::{NewBranch, NewRun};
use run_lineage::experiment::{CallerId, ExperimentId, RunRecord};
use run_lineage::store::{MemoryRunStore, RunQuery};
use run_lineage::{EngineConfig, LineageEngine};

const WRITERS: usize = 24;

fn caller(i: usize) -> CallerId {
    CallerId::new(format!("worker-{i}")).unwrap()
}

/// Each lost race means another writer committed, so `WRITERS` attempts
/// always suffice.
fn contended_engine() -> Arc<LineageEngine> {
    let config = EngineConfig::builder()
        .max_commit_retries(WRITERS as u32)
        .build()
        .unwrap();
    Arc::new(
        LineageEngine::builder(MemoryRunStore::new())
            .config(config)
            .build()
            .unwrap(),
    )
}

async fn all_runs(engine: &LineageEngine, id: ExperimentId) -> Vec<RunRecord> {
    engine
        .list_runs(RunQuery::experiment(id).all())
        .await
        .unwrap()
        .items
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rollbacks_keep_single_latest() {
    let engine = contended_engine();
    let exp = engine
        .create_experiment("contention", "", &caller(0))
        .await
        .unwrap();
    let id = exp.experiment_id();
    let source = engine.create_run(id, NewRun::new(), &caller(0)).await.unwrap();

    let mut handles = Vec::with_capacity(WRITERS);
    for i in 0..WRITERS {
        let engine = Arc::clone(&engine);
        let source = source.run_id();
        handles.push(tokio::spawn(async move {
            engine.rollback(id, source, &caller(i), None, None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let runs = all_runs(&engine, id).await;
    assert_eq!(runs.len(), WRITERS + 1);

    let numbers: BTreeSet<u64> = runs.iter().map(RunRecord::run_number).collect();
    assert_eq!(numbers, (1..=WRITERS as u64 + 1).collect());

    let versions: BTreeSet<&str> = runs.iter().map(RunRecord::version).collect();
    assert_eq!(versions.len(), runs.len(), "versions must not repeat on a branch");

    let latest: Vec<&RunRecord> = runs.iter().filter(|r| r.is_latest()).collect();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].run_number(), WRITERS as u64 + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_across_branches() {
    let engine = contended_engine();
    let exp = engine
        .create_experiment("fan-out", "", &caller(0))
        .await
        .unwrap();
    let id = exp.experiment_id();
    for branch in ["alpha", "beta"] {
        engine
            .create_branch(id, NewBranch::named(branch), &caller(0))
            .await
            .unwrap();
    }

    let mut handles = Vec::with_capacity(WRITERS);
    for i in 0..WRITERS {
        let engine = Arc::clone(&engine);
        let branch = ["main", "alpha", "beta"][i % 3];
        handles.push(tokio::spawn(async move {
            engine
                .create_run(id, NewRun::new().on_branch(branch), &caller(i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let runs = all_runs(&engine, id).await;
    let numbers: BTreeSet<u64> = runs.iter().map(RunRecord::run_number).collect();
    assert_eq!(numbers, (1..=WRITERS as u64).collect());

    for branch in ["main", "alpha", "beta"] {
        let on_branch: Vec<&RunRecord> =
            runs.iter().filter(|r| r.branch_name() == branch).collect();
        assert_eq!(on_branch.len(), WRITERS / 3);
        assert_eq!(on_branch.iter().filter(|r| r.is_latest()).count(), 1);

        let newest = on_branch.iter().max_by_key(|r| r.run_number()).unwrap();
        assert!(newest.is_latest(), "latest must be the newest run on {branch}");
    }
}
