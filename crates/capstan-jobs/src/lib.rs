//! The capstan job engine core.
//!
//! This crate is the per-job state machine of a distributed job queue: the
//! atomic server-side logic that carries a job from enqueue through
//! assignment, heartbeating, completion, failure, retry and dependency
//! resolution, keeping every index consistent across many concurrent
//! producers, workers and administrators sharing one store.
//!
//! # Guarantees
//!
//! - Every operation is one atomic transaction against the store; a typed
//!   error leaves the store unchanged.
//! - At most one worker owns a job: ownership is the job's `worker` field
//!   plus its membership in the queue's lock set, renewed by heartbeats and
//!   reassignable only once the lock expires.
//! - The dependency graph is stored symmetrically and completion cascades
//!   release dependents in the completing job's own transaction.
//! - All time is caller-supplied epoch seconds; the engine never reads a
//!   wall clock, so operations are deterministic under replay.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use capstan_core::Store;
//! use capstan_jobs::{CompleteOptions, JobEngine, JobState, PutOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> capstan_jobs::Result<()> {
//! let store = Arc::new(Store::new());
//! let engine = JobEngine::new(store);
//!
//! let jid = engine
//!     .put(100, "emails", &"job-1".into(), "SendEmail", serde_json::json!({}), PutOptions::default())
//!     .await?;
//!
//! let jobs = engine.pop(101, "emails", "worker-1", 1).await?;
//! assert_eq!(jobs[0].state, JobState::Running);
//!
//! let outcome = engine
//!     .complete(105, &jid, "worker-1", "emails", serde_json::json!({}), CompleteOptions::default())
//!     .await?;
//! assert_eq!(outcome, JobState::Complete);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod deps;
mod engine;
mod error;
mod gc;
mod history;
mod job;
mod keys;
mod queue;

pub use engine::CompleteOptions;
pub use engine::DEFAULT_NAMESPACE;
pub use engine::DependsChange;
pub use engine::JobEngine;
pub use engine::PutOptions;
pub use error::JobError;
pub use error::Result;
pub use job::FailureInfo;
pub use job::HistoryEntry;
pub use job::Jid;
pub use job::Job;
pub use job::JobState;
