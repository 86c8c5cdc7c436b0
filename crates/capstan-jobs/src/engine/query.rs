//! Read and administrative field operations: `data`, `priority`, `update`.

use capstan_core::Txn;
use tracing::debug;

use super::JobEngine;
use crate::error::JobError;
use crate::error::Result;
use crate::job;
use crate::job::Jid;
use crate::job::Job;
use crate::job::field;
use crate::keys::Keys;
use crate::queue::PRIORITY_BAND;
use crate::queue::QueueHandle;

/// Decode the full job record, including its index memberships.
pub(crate) fn decode_job(txn: &Txn<'_>, keys: &Keys, jid: &str) -> Result<Option<Job>> {
    let Some(hash) = txn.hash_all(&keys.job(jid)) else {
        return Ok(None);
    };
    let dependencies = txn.set_members(&keys.dependencies(jid));
    let dependents = txn.set_members(&keys.dependents(jid));
    let tracked = txn.zset_contains(&keys.tracked(), jid);
    Job::from_hash(&hash, dependencies, dependents, tracked).map(Some)
}

impl JobEngine {
    /// Read a job's full record, or `None` when no job hash exists.
    pub async fn data(&self, jid: &Jid) -> Result<Option<Job>> {
        let keys = &self.keys;
        self.store.transaction(|txn| decode_job(txn, keys, jid.as_str())).await
    }

    /// Read a projection of a job's record onto `fields`, in order.
    ///
    /// Unknown fields project to JSON null. Returns `None` when no job hash
    /// exists.
    pub async fn data_fields(&self, jid: &Jid, fields: &[&str]) -> Result<Option<Vec<serde_json::Value>>> {
        let Some(job) = self.data(jid).await? else {
            return Ok(None);
        };
        let record = serde_json::to_value(&job)?;
        let projection = fields
            .iter()
            .map(|f| record.get(f).cloned().unwrap_or(serde_json::Value::Null))
            .collect();
        Ok(Some(projection))
    }

    /// Change a job's priority.
    ///
    /// Returns false when the job is missing. A job sitting in its queue's
    /// work view is re-inserted under the new priority with its enqueue time
    /// preserved; jobs in `scheduled`, `depends` or `locks` keep their
    /// position.
    pub async fn priority(&self, jid: &Jid, priority: i64) -> Result<bool> {
        let keys = &self.keys;
        let updated = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let Some(hash) = txn.hash_all(&job_key) else {
                    return Ok::<_, JobError>(false);
                };

                let old_priority = job::parse_i64(&hash, field::PRIORITY);
                let queue = hash.get(field::QUEUE).cloned().unwrap_or_default();
                txn.hash_set(&job_key, field::PRIORITY, &priority.to_string());

                if !queue.is_empty() {
                    let q = QueueHandle::new(keys, queue);
                    if let Some(score) = q.work_score_of(txn, jid.as_str()) {
                        let enqueued = score.saturating_add(old_priority.saturating_mul(PRIORITY_BAND));
                        q.work_add_scored(txn, jid.as_str(), enqueued.saturating_sub(priority.saturating_mul(PRIORITY_BAND)));
                    }
                }
                Ok(true)
            })
            .await?;

        if updated {
            debug!(jid = %jid, priority, "priority changed");
        }
        Ok(updated)
    }

    /// Bulk-overwrite recognised scalar fields on the job hash.
    ///
    /// This is an administrative path: no state or ownership validation is
    /// performed. Recognised fields: `klass`, `worker`, `queue` (strings),
    /// `priority`, `retries`, `remaining`, `expires` (integers) and `data`
    /// (JSON object). Unrecognised fields are rejected before any write.
    pub async fn update(&self, jid: &Jid, changes: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        let keys = &self.keys;
        self.store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                if !txn.hash_exists(&job_key) {
                    return Err(JobError::JobNotFound { jid: jid.to_string() });
                }

                let mut writes: Vec<(&str, String)> = Vec::with_capacity(changes.len());
                for (name, value) in &changes {
                    match name.as_str() {
                        field::KLASS | field::WORKER | field::QUEUE => {
                            let value = value.as_str().ok_or_else(|| JobError::InvalidArgument {
                                reason: format!("field {name} must be a string"),
                            })?;
                            writes.push((hash_field(name), value.to_string()));
                        }
                        field::PRIORITY | field::RETRIES | field::REMAINING | field::EXPIRES => {
                            let value = value.as_i64().ok_or_else(|| JobError::InvalidArgument {
                                reason: format!("field {name} must be an integer"),
                            })?;
                            writes.push((hash_field(name), value.to_string()));
                        }
                        field::DATA => {
                            if !value.is_object() {
                                return Err(JobError::InvalidArgument {
                                    reason: "data must be a JSON object".to_string(),
                                });
                            }
                            writes.push((field::DATA, serde_json::to_string(value)?));
                        }
                        other => {
                            return Err(JobError::InvalidArgument {
                                reason: format!("unrecognised field: {other}"),
                            });
                        }
                    }
                }

                for (fieldname, value) in &writes {
                    txn.hash_set(&job_key, fieldname, value);
                }
                Ok(())
            })
            .await?;

        debug!(jid = %jid, fields = changes.len(), "job updated");
        Ok(())
    }
}

/// Map a recognised update key back to its static hash-field name.
fn hash_field(name: &str) -> &'static str {
    match name {
        field::KLASS => field::KLASS,
        field::WORKER => field::WORKER,
        field::QUEUE => field::QUEUE,
        field::PRIORITY => field::PRIORITY,
        field::RETRIES => field::RETRIES,
        field::REMAINING => field::REMAINING,
        field::EXPIRES => field::EXPIRES,
        _ => unreachable!("update validated the field name"),
    }
}
