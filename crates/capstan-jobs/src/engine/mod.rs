//! The job engine: every operation the core exposes.

mod admin;
mod depends;
mod heartbeat;
mod lifecycle;
mod query;
mod queue_ops;

use std::sync::Arc;

use capstan_core::Store;
use capstan_core::Txn;

pub use depends::DependsChange;

use crate::error::JobError;
use crate::error::Result;
use crate::job::Jid;
use crate::keys::Keys;

/// Default key namespace, compatible with existing deployments.
pub const DEFAULT_NAMESPACE: &str = "ql";

/// Channel carrying one structured event per significant transition.
pub(crate) const LOG_CHANNEL: &str = "log";
/// Per-jid channel for tracked jobs that complete.
pub(crate) const COMPLETED_CHANNEL: &str = "completed";
/// Per-jid channel for tracked jobs that fail.
pub(crate) const FAILED_CHANNEL: &str = "failed";
/// Per-jid channel for tracked jobs that are cancelled.
pub(crate) const CANCELED_CHANNEL: &str = "canceled";

/// Options accepted by [`JobEngine::complete`].
///
/// `delay` and `depends` both require `next`, and are mutually exclusive
/// with each other.
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    /// Queue to advance the job into.
    pub next: Option<String>,
    /// Seconds to park the job in `next`'s scheduled view.
    pub delay: u64,
    /// Jids the advanced job must wait on.
    pub depends: Vec<Jid>,
}

/// Options accepted by [`JobEngine::put`].
#[derive(Debug, Clone)]
pub struct PutOptions {
    /// Scheduling priority; higher pops first.
    pub priority: i64,
    /// Seconds to park the job before it becomes eligible.
    pub delay: u64,
    /// Maximum attempts per stage.
    pub retries: i64,
    /// Tags to index the job under.
    pub tags: Vec<String>,
    /// Jids the job must wait on.
    pub depends: Vec<Jid>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: 0,
            retries: 5,
            tags: Vec::new(),
            depends: Vec::new(),
        }
    }
}

/// The per-job state machine, executed against a shared store.
///
/// Every operation runs as one atomic transaction: preconditions are checked
/// and all JSON fields decoded before the first mutation, so a typed error
/// always leaves the store unchanged.
pub struct JobEngine {
    store: Arc<Store>,
    keys: Keys,
}

impl JobEngine {
    /// Create an engine over `store` under the default namespace.
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_namespace(store, DEFAULT_NAMESPACE)
    }

    /// Create an engine with a custom key namespace.
    pub fn with_namespace(store: Arc<Store>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            keys: Keys::new(namespace),
        }
    }

    /// Write a configuration value into the shared `config` hash.
    pub async fn set_config(&self, name: &str, value: &str) -> Result<()> {
        let keys = &self.keys;
        self.store
            .transaction(|txn| {
                txn.hash_set(&keys.config(), name, value);
                Ok::<_, JobError>(())
            })
            .await
    }

    /// Read a configuration value.
    pub async fn get_config(&self, name: &str) -> Result<Option<String>> {
        let keys = &self.keys;
        self.store.transaction(|txn| Ok::<_, JobError>(crate::config::get(txn, keys, name))).await
    }
}

/// Publish a structured event on the `log` channel.
pub(crate) fn log_event(txn: &mut Txn<'_>, event: serde_json::Value) {
    txn.publish(LOG_CHANNEL, event.to_string());
}
