//! Side-by-side comparison of runs within one experiment.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::LineageEngine;
use crate::experiment::{ExperimentId, ParamMap, RunId, RunRecord, RunStatus};
use crate::store::RunStore;
use crate::{Error, Result};

/// Compact view of a compared run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Run id.
    pub run_id: RunId,
    /// Experiment-wide run number.
    pub run_number: u64,
    /// Run name.
    pub name: String,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Version string.
    pub version: String,
    /// Branch.
    pub branch_name: String,
    /// Whether the run holds its branch's latest pointer.
    pub is_latest: bool,
    /// Start time.
    pub start_time: DateTime<Utc>,
    /// Duration once finished.
    pub duration_ms: Option<i64>,
}

impl From<&RunRecord> for RunSummary {
    fn from(run: &RunRecord) -> Self {
        Self {
            run_id: run.run_id(),
            run_number: run.run_number(),
            name: run.name().to_string(),
            status: run.status(),
            version: run.version().to_string(),
            branch_name: run.branch_name().to_string(),
            is_latest: run.is_latest(),
            start_time: run.start_time(),
            duration_ms: run.duration_ms(),
        }
    }
}

/// One run's values aligned to the union of keys; missing keys are `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedValues {
    /// Run id.
    pub run_id: RunId,
    /// Run number.
    pub run_number: u64,
    /// Key to value.
    pub values: BTreeMap<String, Value>,
}

/// Numeric summary of one metric across the compared runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Mean, rounded to 4 decimal places.
    pub avg: f64,
    /// Run with the best value.
    pub best_run_id: RunId,
}

/// Result of [`LineageEngine::compare_runs`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunComparison {
    /// Runs in request order.
    pub runs: Vec<RunSummary>,
    /// Union of parameter keys, sorted.
    pub parameter_keys: Vec<String>,
    /// Parameters per run.
    pub parameters: Vec<AlignedValues>,
    /// Union of metric keys, sorted.
    pub metric_keys: Vec<String>,
    /// Metrics per run.
    pub metrics: Vec<AlignedValues>,
    /// Statistics for every metric with at least one numeric value.
    pub statistics: BTreeMap<String, MetricStats>,
}

/// Metrics where a smaller value wins.
fn lower_is_better(metric: &str) -> bool {
    let metric = metric.to_lowercase();
    metric.contains("loss") || metric.contains("error")
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn key_union<'a>(maps: impl Iterator<Item = &'a ParamMap>) -> Vec<String> {
    maps.flat_map(|m| m.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn align(
    runs: &[RunRecord],
    keys: &[String],
    pick: fn(&RunRecord) -> &ParamMap,
) -> Vec<AlignedValues> {
    runs.iter()
        .map(|run| AlignedValues {
            run_id: run.run_id(),
            run_number: run.run_number(),
            values: keys
                .iter()
                .map(|k| (k.clone(), pick(run).get(k).cloned().unwrap_or(Value::Null)))
                .collect(),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn metric_stats(runs: &[RunRecord], metric: &str) -> Option<MetricStats> {
    let values: Vec<(RunId, f64)> = runs
        .iter()
        .filter_map(|run| {
            run.metrics()
                .get(metric)
                .and_then(Value::as_f64)
                .map(|v| (run.run_id(), v))
        })
        .collect();
    let (first_id, first) = *values.first()?;

    let lower = lower_is_better(metric);
    let (mut min, mut max, mut sum) = (first, first, 0.0);
    let (mut best_id, mut best) = (first_id, first);
    for &(run_id, value) in &values {
        min = min.min(value);
        max = max.max(value);
        sum += value;
        let better = if lower { value < best } else { value > best };
        if better {
            best = value;
            best_id = run_id;
        }
    }
    Some(MetricStats {
        min,
        max,
        avg: round4(sum / values.len() as f64),
        best_run_id: best_id,
    })
}

impl<S: RunStore> LineageEngine<S> {
    /// Compare two or more runs of one experiment.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for fewer than two ids or a repeated id, `NotFound`
    /// if the experiment is missing or a run is not part of it.
    pub async fn compare_runs(
        &self,
        experiment_id: ExperimentId,
        run_ids: &[RunId],
    ) -> Result<RunComparison> {
        if run_ids.len() < 2 {
            return Err(Error::InvalidArgument(
                "at least two runs are needed for a comparison".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(run_ids.len());
        if let Some(dup) = run_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(Error::InvalidArgument(format!(
                "run {dup} listed more than once"
            )));
        }
        self.get_experiment(experiment_id).await?;

        let mut runs = Vec::with_capacity(run_ids.len());
        for &run_id in run_ids {
            runs.push(self.require_run_in(experiment_id, run_id).await?);
        }

        let parameter_keys = key_union(runs.iter().map(RunRecord::parameters));
        let metric_keys = key_union(runs.iter().map(RunRecord::metrics));
        let statistics = metric_keys
            .iter()
            .filter_map(|k| metric_stats(&runs, k).map(|s| (k.clone(), s)))
            .collect();

        Ok(RunComparison {
            runs: runs.iter().map(RunSummary::from).collect(),
            parameters: align(&runs, &parameter_keys, RunRecord::parameters),
            metrics: align(&runs, &metric_keys, RunRecord::metrics),
            parameter_keys,
            metric_keys,
            statistics,
        })
    }
}
