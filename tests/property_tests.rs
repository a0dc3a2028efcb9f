//! Property-based tests for version allocation and run bookkeeping
//!
//! - Test ordering invariants of the version allocator
//! - Test run-number and latest-pointer invariants over random workloads
//! - Run with ProptestConfig::with_cases(100)

use proptest::prelude::*;
use run_lineage::engine::{NewBranch, NewRun};
use run_lineage::experiment::{normalize_tags, CallerId, RunRecord};
use run_lineage::store::RunQuery;
use run_lineage::version::{next_version, SemanticVersion};
use run_lineage::LineageEngine;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Well-formed `major.minor.patch` triples
fn arb_version() -> impl Strategy<Value = (u64, u64, u64)> {
    (0u64..1000, 0u64..1000, 0u64..100_000)
}

/// Sequence of operations: `None` creates a run on a branch index, `Some(k)`
/// rolls back to the k-th run created so far (modulo count)
fn arb_workload() -> impl Strategy<Value = Vec<(usize, Option<usize>)>> {
    proptest::collection::vec((0usize..3, proptest::option::of(0usize..64)), 1..24)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: next_version bumps only the patch component
    #[test]
    fn prop_next_version_bumps_patch((major, minor, patch) in arb_version()) {
        let current = format!("{major}.{minor}.{patch}");
        let next = next_version(Some(&current));
        prop_assert_eq!(next, format!("{major}.{minor}.{}", patch + 1));
    }

    /// Property: the allocated version orders strictly above its input
    #[test]
    fn prop_next_version_is_greater((major, minor, patch) in arb_version()) {
        let current = SemanticVersion::new(major, minor, patch);
        let next = SemanticVersion::parse(&next_version(Some(&current.to_string())));
        prop_assert_eq!(next.map(|v| v > current), Some(true));
    }

    /// Property: garbage in any position never panics and always yields a patch bump
    #[test]
    fn prop_next_version_total(current in "\\PC{0,16}") {
        let next = next_version(Some(&current));
        prop_assert_eq!(next.split('.').count(), 3);
    }

    /// Property: semantic ordering agrees with tuple ordering
    #[test]
    fn prop_semver_order_matches_tuple(a in arb_version(), b in arb_version()) {
        let va = SemanticVersion::new(a.0, a.1, a.2);
        let vb = SemanticVersion::new(b.0, b.1, b.2);
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
    }

    /// Property: tag normalization is idempotent and case-insensitive
    #[test]
    fn prop_normalize_tags_idempotent(
        tags in proptest::collection::vec("[A-Za-z][A-Za-z0-9_-]{0,8}", 1..10)
    ) {
        let once = normalize_tags(&tags).unwrap();
        let twice = normalize_tags(&once).unwrap();
        prop_assert_eq!(&once, &twice);

        let upper: Vec<String> = tags.iter().map(|t| t.to_uppercase()).collect();
        prop_assert_eq!(normalize_tags(&upper).unwrap(), once);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: any mix of creates and rollbacks leaves contiguous run
    /// numbers and exactly one latest run (the newest) per used branch
    #[test]
    fn prop_workload_invariants(workload in arb_workload()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let caller = CallerId::new("prop").unwrap();
            let engine = LineageEngine::in_memory();
            let exp = engine.create_experiment("prop", "", &caller).await.unwrap();
            let id = exp.experiment_id();
            let branches = ["main", "left", "right"];
            for branch in &branches[1..] {
                engine.create_branch(id, NewBranch::named(branch), &caller).await.unwrap();
            }

            let mut created: Vec<RunRecord> = Vec::new();
            for (branch, rollback) in &workload {
                let run = match rollback {
                    Some(k) if !created.is_empty() => {
                        let source = created[k % created.len()].run_id();
                        engine.rollback(id, source, &caller, None, None).await.unwrap()
                    }
                    _ => engine
                        .create_run(id, NewRun::new().on_branch(branches[*branch]), &caller)
                        .await
                        .unwrap(),
                };
                created.push(run);
            }

            let runs = engine
                .list_runs(RunQuery::experiment(id).all())
                .await
                .unwrap()
                .items;
            let mut numbers: Vec<u64> = runs.iter().map(RunRecord::run_number).collect();
            numbers.sort_unstable();
            assert_eq!(numbers, (1..=created.len() as u64).collect::<Vec<_>>());

            for branch in branches {
                let on_branch: Vec<&RunRecord> =
                    runs.iter().filter(|r| r.branch_name() == branch).collect();
                if on_branch.is_empty() {
                    continue;
                }
                let latest: Vec<&&RunRecord> = on_branch.iter().filter(|r| r.is_latest()).collect();
                assert_eq!(latest.len(), 1);
                let newest = on_branch.iter().map(|r| r.run_number()).max();
                assert_eq!(Some(latest[0].run_number()), newest);
            }
        });
    }
}
