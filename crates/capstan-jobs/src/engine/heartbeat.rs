//! Lock renewal.

use tracing::debug;

use super::JobEngine;
use crate::config;
use crate::error::JobError;
use crate::error::Result;
use crate::job::Jid;
use crate::job::field;
use crate::queue::QueueHandle;

impl JobEngine {
    /// Renew the caller's lock on a job.
    ///
    /// Extends the lock to `now` plus the queue's heartbeat interval and
    /// re-asserts ownership in the lock and worker-job indices; `data`, when
    /// given, replaces the payload. Errors with `OwnershipLost` when the job
    /// is no longer held by `worker`. Returns the new expiry.
    pub async fn heartbeat(&self, now: u64, jid: &Jid, worker: &str, data: Option<serde_json::Value>) -> Result<u64> {
        if worker.is_empty() {
            return Err(JobError::MissingArgument { field: "worker".to_string() });
        }
        if let Some(data) = &data {
            if !data.is_object() {
                return Err(JobError::InvalidArgument {
                    reason: "data must be a JSON object".to_string(),
                });
            }
        }

        let keys = &self.keys;
        let expires = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let hash = txn.hash_all(&job_key).ok_or_else(|| JobError::JobNotFound { jid: jid.to_string() })?;

                let current_worker = hash.get(field::WORKER).map(String::as_str).unwrap_or("");
                if current_worker.is_empty() || current_worker != worker {
                    return Err(JobError::OwnershipLost {
                        jid: jid.to_string(),
                        worker: worker.to_string(),
                    });
                }
                let queue = hash.get(field::QUEUE).cloned().unwrap_or_default();

                let data_json = data.as_ref().map(serde_json::to_string).transpose()?;
                let expires = now + config::heartbeat(txn, keys, &queue);

                if let Some(data_json) = &data_json {
                    txn.hash_set(&job_key, field::DATA, data_json);
                }
                let expires_str = expires.to_string();
                txn.hash_set_many(&job_key, &[(field::EXPIRES, &expires_str), (field::WORKER, worker)]);

                txn.zset_add(&keys.worker_jobs(worker), jid.as_str(), expires as i64);
                if !queue.is_empty() {
                    QueueHandle::new(keys, queue).locks_add(txn, jid.as_str(), expires);
                }

                Ok(expires)
            })
            .await?;

        debug!(jid = %jid, worker, expires, "heartbeat");
        Ok(expires)
    }
}
