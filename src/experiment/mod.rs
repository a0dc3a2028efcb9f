//! Lineage Schema
//!
//! Data structures for experiments, their branches and their versioned runs.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< BranchRecord (N)
//!        │
//!        └──< RunRecord (N) ── parent_run_id ──> RunRecord (non-owning)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use run_lineage::experiment::{CallerId, ExperimentRecord, RunRecord, RunStatus, VersionInfo};
//!
//! let owner = CallerId::new("researcher-7")?;
//! let experiment = ExperimentRecord::builder("Kinase Screen", owner.clone()).build();
//!
//! let mut run = RunRecord::builder(
//!     experiment.experiment_id(),
//!     1,
//!     owner,
//!     VersionInfo::latest("1.0.0", experiment.default_branch()),
//! )
//! .build();
//!
//! run.transition(RunStatus::Completed, chrono::Utc::now())?;
//! assert!(run.duration_ms().is_some());
//! # Ok::<(), run_lineage::Error>(())
//! ```

mod branch_record;
mod experiment_record;
mod ids;
mod run_record;

use std::collections::BTreeSet;

pub use branch_record::BranchRecord;
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder, ExperimentStatus};
pub use ids::{CallerId, ExperimentId, RunId};
pub use run_record::{ParamMap, RunRecord, RunRecordBuilder, RunStatus, VersionInfo};

use crate::{Error, Result};

/// Branch every experiment starts with unless configured otherwise.
pub const DEFAULT_BRANCH: &str = "main";

/// Trim and lower-case a name (experiment, branch, run, tag).
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Normalize a batch of tags into a set.
///
/// # Errors
///
/// Returns `InvalidArgument` if a tag is blank.
pub fn normalize_tags<I, S>(tags: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = BTreeSet::new();
    for tag in tags {
        let tag = normalize_name(tag.as_ref());
        if tag.is_empty() {
            return Err(Error::InvalidArgument("tags must not be blank".to_string()));
        }
        normalized.insert(tag);
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags_dedupes_case() {
        let tags = normalize_tags(["Important", " important ", "GPU"]).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("important"));
        assert!(tags.contains("gpu"));
    }

    #[test]
    fn test_normalize_tags_rejects_blank() {
        assert!(normalize_tags(["ok", "  "]).is_err());
        assert!(normalize_tags(Vec::<String>::new()).unwrap().is_empty());
    }
}
