//! Administrative operations: `cancel`, tracking and tag maintenance.

use tracing::debug;
use tracing::info;

use super::CANCELED_CHANNEL;
use super::JobEngine;
use crate::error::JobError;
use crate::error::Result;
use crate::job;
use crate::job::Jid;
use crate::job::JobState;
use crate::job::field;
use crate::queue::QueueHandle;

impl JobEngine {
    /// Destroy a job in any state.
    ///
    /// Refused while other jobs depend on it. Every index membership is
    /// removed, dependency edges are detached symmetrically, and the job
    /// hash is deleted. Returns false when the job does not exist.
    pub async fn cancel(&self, jid: &Jid) -> Result<bool> {
        let keys = &self.keys;
        let cancelled = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let Some(hash) = txn.hash_all(&job_key) else {
                    return Ok(false);
                };
                if txn.set_len(&keys.dependents(jid.as_str())) > 0 {
                    return Err(JobError::HasDependents { jid: jid.to_string() });
                }

                let state = hash.get(field::STATE).map(String::as_str).unwrap_or("");
                let queue = hash.get(field::QUEUE).map(String::as_str).unwrap_or("");
                let worker = hash.get(field::WORKER).map(String::as_str).unwrap_or("");
                let tags: Vec<String> = hash
                    .get(field::TAGS)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();
                let failure = job::decode_failure(hash.get(field::FAILURE))?;

                if !queue.is_empty() {
                    QueueHandle::new(keys, queue).remove_everywhere(txn, jid.as_str());
                }
                if !worker.is_empty() {
                    txn.zset_remove(&keys.worker_jobs(worker), jid.as_str());
                }
                if txn.zset_remove(&keys.tracked(), jid.as_str()) {
                    txn.publish(CANCELED_CHANNEL, jid.to_string());
                }

                for tag in &tags {
                    txn.zset_remove(&keys.tag_index(tag), jid.as_str());
                    if txn.zset_incr(&keys.tags(), tag, -1) <= 0 {
                        txn.zset_remove(&keys.tags(), tag);
                    }
                }

                if state == JobState::Failed.as_str() {
                    if let Some(failure) = failure {
                        let group_key = keys.failure_group(&failure.group);
                        txn.list_remove(&group_key, jid.as_str());
                        if txn.list_len(&group_key) == 0 {
                            txn.set_remove(&keys.failures(), &failure.group);
                        }
                    }
                }

                for dep in txn.set_members(&keys.dependencies(jid.as_str())) {
                    txn.set_remove(&keys.dependents(&dep), jid.as_str());
                }
                txn.set_del(&keys.dependencies(jid.as_str()));
                txn.set_del(&keys.dependents(jid.as_str()));

                txn.zset_remove(&keys.completed(), jid.as_str());
                txn.hash_del(&job_key);
                Ok::<_, JobError>(true)
            })
            .await?;

        if cancelled {
            info!(jid = %jid, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Add the jid to the tracked set, enabling its per-jid event channels.
    ///
    /// Returns false when the job does not exist.
    pub async fn track(&self, now: u64, jid: &Jid) -> Result<bool> {
        let keys = &self.keys;
        self.store
            .transaction(|txn| {
                if !txn.hash_exists(&keys.job(jid.as_str())) {
                    return Ok::<_, JobError>(false);
                }
                txn.zset_add(&keys.tracked(), jid.as_str(), now as i64);
                Ok(true)
            })
            .await
    }

    /// Remove the jid from the tracked set. Returns whether it was tracked.
    pub async fn untrack(&self, jid: &Jid) -> Result<bool> {
        let keys = &self.keys;
        self.store.transaction(|txn| Ok::<_, JobError>(txn.zset_remove(&keys.tracked(), jid.as_str()))).await
    }

    /// Add tags to a job, indexing it under each. Returns the new tag list.
    pub async fn tag(&self, now: u64, jid: &Jid, tags: &[&str]) -> Result<Vec<String>> {
        let keys = &self.keys;
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let result = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let hash = txn.hash_all(&job_key).ok_or_else(|| JobError::JobNotFound { jid: jid.to_string() })?;
                let mut current: Vec<String> = hash
                    .get(field::TAGS)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();

                for tag in &tags {
                    if !current.contains(tag) {
                        current.push(tag.clone());
                        txn.zset_add(&keys.tag_index(tag), jid.as_str(), now as i64);
                        txn.zset_incr(&keys.tags(), tag, 1);
                    }
                }
                txn.hash_set(&job_key, field::TAGS, &serde_json::to_string(&current)?);
                Ok::<_, JobError>(current)
            })
            .await?;

        debug!(jid = %jid, tags = result.len(), "job tagged");
        Ok(result)
    }

    /// Remove tags from a job and its tag-index entries. Returns the new tag
    /// list.
    pub async fn untag(&self, jid: &Jid, tags: &[&str]) -> Result<Vec<String>> {
        let keys = &self.keys;
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let result = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let hash = txn.hash_all(&job_key).ok_or_else(|| JobError::JobNotFound { jid: jid.to_string() })?;
                let mut current: Vec<String> = hash
                    .get(field::TAGS)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();

                for tag in &tags {
                    if let Some(index) = current.iter().position(|t| t == tag) {
                        current.remove(index);
                        txn.zset_remove(&keys.tag_index(tag), jid.as_str());
                        if txn.zset_incr(&keys.tags(), tag, -1) <= 0 {
                            txn.zset_remove(&keys.tags(), tag);
                        }
                    }
                }
                txn.hash_set(&job_key, field::TAGS, &serde_json::to_string(&current)?);
                Ok::<_, JobError>(current)
            })
            .await?;

        debug!(jid = %jid, tags = result.len(), "job untagged");
        Ok(result)
    }
}
