//! # run-lineage: Experiment Run Lineage and Branch Versioning
//!
//! **Version**: 0.1.0
//!
//! Tracks runs of machine-learning experiments with per-branch semantic
//! versions, a single "latest" run per branch, parent/child lineage and
//! non-destructive rollback.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: Flipping the previous latest and inserting a new
//!   run is one conditional store write; a stale write is retried, never lost
//! - **Jidoka**: Invalid status transitions and lineage cycles stop at the
//!   write that would introduce them
//! - **Genchi Genbutsu**: History is append-only; rollback creates a new run
//!   pointing at the old one instead of rewriting it
//!
//! ## Example Usage
//!
//! ```rust
//! use run_lineage::engine::NewRun;
//! use run_lineage::experiment::{CallerId, RunStatus};
//! use run_lineage::LineageEngine;
//!
//! # async fn example() -> run_lineage::Result<()> {
//! let engine = LineageEngine::in_memory();
//! let caller = CallerId::new("researcher-7")?;
//! let experiment = engine.create_experiment("Docking", "", &caller).await?;
//!
//! let run = engine
//!     .create_run(experiment.experiment_id(), NewRun::new(), &caller)
//!     .await?;
//! engine
//!     .transition(run.run_id(), RunStatus::Completed, &caller)
//!     .await?;
//! assert_eq!(run.version(), "1.0.0");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod store;
pub mod version;

pub use config::EngineConfig;
pub use engine::LineageEngine;
pub use error::{Error, Result};
