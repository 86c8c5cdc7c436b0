//! Dependency edits on blocked jobs.

use tracing::debug;

use super::JobEngine;
use crate::deps;
use crate::error::JobError;
use crate::error::Result;
use crate::job::Jid;
use crate::job::JobState;
use crate::job::field;

/// An edit to a blocked job's dependency set.
#[derive(Debug, Clone)]
pub enum DependsChange {
    /// Add dependencies on the given jids.
    On(Vec<Jid>),
    /// Remove dependencies on the given jids.
    Off(Vec<Jid>),
    /// Remove every dependency.
    OffAll,
}

impl JobEngine {
    /// Edit the dependency set of a job in the `depends` state.
    ///
    /// Returns false without mutating when the job is absent or not blocked.
    /// Removing the last dependency releases the job into its queue's work
    /// view.
    pub async fn depends(&self, now: u64, jid: &Jid, change: DependsChange) -> Result<bool> {
        let keys = &self.keys;
        let applied = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let state = txn.hash_get(&job_key, field::STATE).unwrap_or_default();
                if state != JobState::Depends.as_str() {
                    return Ok::<_, JobError>(false);
                }

                match &change {
                    DependsChange::On(jids) => {
                        for dep in jids {
                            deps::add_edge(txn, keys, dep.as_str(), jid.as_str());
                        }
                    }
                    DependsChange::OffAll => {
                        for dep in txn.set_members(&keys.dependencies(jid.as_str())) {
                            txn.set_remove(&keys.dependents(&dep), jid.as_str());
                        }
                        txn.set_del(&keys.dependencies(jid.as_str()));
                        deps::release_to_work(txn, keys, now, jid.as_str());
                    }
                    DependsChange::Off(jids) => {
                        for dep in jids {
                            deps::remove_edge(txn, keys, dep.as_str(), jid.as_str());
                            let still_blocked = txn.hash_get(&job_key, field::STATE).as_deref()
                                == Some(JobState::Depends.as_str());
                            if still_blocked && txn.set_len(&keys.dependencies(jid.as_str())) == 0 {
                                deps::release_to_work(txn, keys, now, jid.as_str());
                            }
                        }
                    }
                }
                Ok(true)
            })
            .await?;

        if applied {
            debug!(jid = %jid, ?change, "dependencies edited");
        }
        Ok(applied)
    }
}
