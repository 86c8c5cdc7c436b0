//! Lifecycle operations: `complete`, `fail`, `retry`.

use serde_json::json;
use tracing::debug;
use tracing::info;

use super::COMPLETED_CHANNEL;
use super::CompleteOptions;
use super::FAILED_CHANNEL;
use super::JobEngine;
use super::log_event;
use crate::deps;
use crate::error::JobError;
use crate::error::Result;
use crate::gc;
use crate::history;
use crate::job;
use crate::job::FailureInfo;
use crate::job::HistoryEntry;
use crate::job::Jid;
use crate::job::JobState;
use crate::job::field;
use crate::queue::QueueHandle;

impl JobEngine {
    /// Complete a running job.
    ///
    /// Without `next` the job becomes `complete` and enters the GC-bound
    /// completed set, cascading releases to its dependents. With `next` the
    /// job advances into that queue: parked when `delay` is set, blocked when
    /// any of `depends` is still unfinished, otherwise waiting. Returns the
    /// state the job ended in.
    pub async fn complete(
        &self,
        now: u64,
        jid: &Jid,
        worker: &str,
        queue: &str,
        data: serde_json::Value,
        options: CompleteOptions,
    ) -> Result<JobState> {
        if worker.is_empty() {
            return Err(JobError::MissingArgument { field: "worker".to_string() });
        }
        if queue.is_empty() {
            return Err(JobError::MissingArgument { field: "queue".to_string() });
        }
        if !data.is_object() {
            return Err(JobError::InvalidArgument {
                reason: "data must be a JSON object".to_string(),
            });
        }
        if options.delay > 0 && !options.depends.is_empty() {
            return Err(JobError::InvalidArgument {
                reason: "delay and depends are mutually exclusive".to_string(),
            });
        }
        if options.next.is_none() && (options.delay > 0 || !options.depends.is_empty()) {
            return Err(JobError::InvalidArgument {
                reason: "delay and depends require next".to_string(),
            });
        }
        if options.depends.iter().any(|dep| dep == jid) {
            return Err(JobError::InvalidArgument {
                reason: format!("job {jid} cannot depend on itself"),
            });
        }

        let keys = &self.keys;
        let outcome = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let hash = txn.hash_all(&job_key).ok_or_else(|| JobError::JobNotFound { jid: jid.to_string() })?;

                let current_worker = hash.get(field::WORKER).map(String::as_str).unwrap_or("");
                if current_worker != worker {
                    return Err(JobError::OwnershipLost {
                        jid: jid.to_string(),
                        worker: worker.to_string(),
                    });
                }
                let state = hash.get(field::STATE).map(String::as_str).unwrap_or("");
                if state != JobState::Running.as_str() {
                    return Err(JobError::InvalidJobState {
                        state: state.to_string(),
                        operation: "complete".to_string(),
                    });
                }
                let current_queue = hash.get(field::QUEUE).map(String::as_str).unwrap_or("");
                if current_queue != queue {
                    return Err(JobError::InvalidArgument {
                        reason: format!("job {jid} is running in queue {current_queue:?}, not {queue:?}"),
                    });
                }

                let mut hist = history::decode(hash.get(field::HISTORY).cloned())?;
                let retries = job::parse_i64(&hash, field::RETRIES);
                let priority = job::parse_i64(&hash, field::PRIORITY);
                let popped = hist.last().and_then(|e| e.popped).unwrap_or(now);
                let data_json = serde_json::to_string(&data)?;

                match hist.last_mut() {
                    Some(last) => last.done = Some(now),
                    None => hist.push(HistoryEntry {
                        done: Some(now),
                        ..Default::default()
                    }),
                }

                let q = QueueHandle::new(keys, queue);
                txn.hash_set(&job_key, field::DATA, &data_json);
                q.work_remove(txn, jid.as_str());
                q.locks_remove(txn, jid.as_str());
                q.scheduled_remove(txn, jid.as_str());
                q.stat_run(txn, now, now.saturating_sub(popped));
                txn.zset_remove(&keys.worker_jobs(worker), jid.as_str());
                if txn.zset_contains(&keys.tracked(), jid.as_str()) {
                    txn.publish(COMPLETED_CHANNEL, jid.to_string());
                }

                if let Some(next) = options.next.as_deref() {
                    log_event(txn, json!({ "jid": jid, "event": "advanced", "queue": queue, "to": next }));
                    hist.push(HistoryEntry {
                        q: Some(next.to_string()),
                        put: Some(now),
                        ..Default::default()
                    });
                    let history_json = history::encode(&hist)?;

                    let nextq = QueueHandle::new(keys, next);
                    nextq.ensure_known(txn, now);
                    let remaining = retries.to_string();
                    txn.hash_set_many(&job_key, &[
                        (field::STATE, JobState::Waiting.as_str()),
                        (field::WORKER, ""),
                        (field::FAILURE, "{}"),
                        (field::QUEUE, next),
                        (field::EXPIRES, "0"),
                        (field::REMAINING, &remaining),
                        (field::HISTORY, &history_json),
                    ]);

                    if options.delay > 0 {
                        nextq.scheduled_add(txn, jid.as_str(), now + options.delay);
                        txn.hash_set(&job_key, field::STATE, JobState::Scheduled.as_str());
                        Ok(JobState::Scheduled)
                    } else {
                        let mut blocked = false;
                        for dep in &options.depends {
                            blocked |= deps::add_edge(txn, keys, dep.as_str(), jid.as_str());
                        }
                        if blocked {
                            nextq.depends_add(txn, jid.as_str(), now);
                            txn.hash_set(&job_key, field::STATE, JobState::Depends.as_str());
                            Ok(JobState::Depends)
                        } else {
                            nextq.work_add(txn, jid.as_str(), priority, now);
                            Ok(JobState::Waiting)
                        }
                    }
                } else {
                    log_event(txn, json!({ "jid": jid, "event": "completed", "queue": queue }));
                    let history_json = history::encode(&hist)?;
                    let remaining = retries.to_string();
                    txn.hash_set_many(&job_key, &[
                        (field::STATE, JobState::Complete.as_str()),
                        (field::WORKER, ""),
                        (field::QUEUE, ""),
                        (field::EXPIRES, "0"),
                        (field::FAILURE, "{}"),
                        (field::REMAINING, &remaining),
                        (field::HISTORY, &history_json),
                    ]);

                    txn.zset_add(&keys.completed(), jid.as_str(), now as i64);
                    gc::sweep(txn, keys, now);
                    let released = deps::release_dependents_of(txn, keys, now, jid.as_str());
                    if !released.is_empty() {
                        debug!(jid = %jid, released = released.len(), "dependents released");
                    }
                    Ok(JobState::Complete)
                }
            })
            .await?;

        debug!(jid = %jid, queue, outcome = %outcome, "job completed");
        Ok(outcome)
    }

    /// Fail a running job into `group` with `message`.
    ///
    /// The job leaves its queue's views, its failure is recorded under the
    /// group's index, and the queue's failure counters are bumped for the
    /// day. Returns the jid.
    pub async fn fail(
        &self,
        now: u64,
        jid: &Jid,
        worker: &str,
        group: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Jid> {
        if worker.is_empty() {
            return Err(JobError::MissingArgument { field: "worker".to_string() });
        }
        if group.is_empty() {
            return Err(JobError::MissingArgument { field: "group".to_string() });
        }
        if message.is_empty() {
            return Err(JobError::MissingArgument { field: "message".to_string() });
        }
        if let Some(data) = &data {
            if !data.is_object() {
                return Err(JobError::InvalidArgument {
                    reason: "data must be a JSON object".to_string(),
                });
            }
        }

        let keys = &self.keys;
        self.store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let hash = txn.hash_all(&job_key).ok_or_else(|| JobError::JobNotFound { jid: jid.to_string() })?;

                let state = hash.get(field::STATE).map(String::as_str).unwrap_or("");
                if state != JobState::Running.as_str() {
                    return Err(JobError::InvalidJobState {
                        state: state.to_string(),
                        operation: "fail".to_string(),
                    });
                }
                let queue = hash.get(field::QUEUE).cloned().unwrap_or_default();

                let mut hist = history::decode(hash.get(field::HISTORY).cloned())?;
                if hist.is_empty() {
                    hist.push(HistoryEntry {
                        worker: Some(worker.to_string()),
                        failed: Some(now),
                        ..Default::default()
                    });
                } else {
                    // Stamp from the tail so only the most recent ownership is hit.
                    if let Some(entry) = hist.iter_mut().rev().find(|e| e.worker.as_deref() == Some(worker)) {
                        entry.failed = Some(now);
                    }
                }
                let history_json = history::encode(&hist)?;

                let failure = FailureInfo {
                    group: group.to_string(),
                    message: message.to_string(),
                    when: now,
                    worker: worker.to_string(),
                };
                let failure_json = serde_json::to_string(&failure)?;
                let data_json = data.as_ref().map(serde_json::to_string).transpose()?;

                log_event(
                    txn,
                    json!({ "jid": jid, "event": "failed", "worker": worker, "group": group, "message": message }),
                );
                if txn.zset_contains(&keys.tracked(), jid.as_str()) {
                    txn.publish(FAILED_CHANNEL, jid.to_string());
                }

                txn.zset_remove(&keys.worker_jobs(worker), jid.as_str());
                history::record_failure(txn, keys, &queue, now);

                let q = QueueHandle::new(keys, queue);
                q.work_remove(txn, jid.as_str());
                q.locks_remove(txn, jid.as_str());
                q.scheduled_remove(txn, jid.as_str());

                if let Some(data_json) = &data_json {
                    txn.hash_set(&job_key, field::DATA, data_json);
                }
                txn.hash_set_many(&job_key, &[
                    (field::STATE, JobState::Failed.as_str()),
                    (field::WORKER, ""),
                    (field::EXPIRES, ""),
                    (field::HISTORY, &history_json),
                    (field::FAILURE, &failure_json),
                ]);

                txn.set_add(&keys.failures(), group);
                txn.list_push_front(&keys.failure_group(group), jid.as_str());
                Ok(())
            })
            .await?;

        info!(jid = %jid, group, "job failed");
        Ok(jid.clone())
    }

    /// Put a running job back in its queue, consuming one attempt.
    ///
    /// Returns the new `remaining` count; a negative value means the job
    /// exhausted its attempts and was failed under the synthetic group
    /// `failed-retries-<queue>` instead of being re-queued.
    pub async fn retry(&self, now: u64, jid: &Jid, queue: &str, worker: &str, delay: u64) -> Result<i64> {
        if queue.is_empty() {
            return Err(JobError::MissingArgument { field: "queue".to_string() });
        }
        if worker.is_empty() {
            return Err(JobError::MissingArgument { field: "worker".to_string() });
        }

        let keys = &self.keys;
        let remaining = self
            .store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let hash = txn.hash_all(&job_key).ok_or_else(|| JobError::JobNotFound { jid: jid.to_string() })?;

                let current_worker = hash.get(field::WORKER).map(String::as_str).unwrap_or("");
                if current_worker != worker {
                    return Err(JobError::OwnershipLost {
                        jid: jid.to_string(),
                        worker: worker.to_string(),
                    });
                }
                let state = hash.get(field::STATE).map(String::as_str).unwrap_or("");
                if state != JobState::Running.as_str() {
                    return Err(JobError::InvalidJobState {
                        state: state.to_string(),
                        operation: "retry".to_string(),
                    });
                }
                let current_queue = hash.get(field::QUEUE).map(String::as_str).unwrap_or("");
                if current_queue != queue {
                    return Err(JobError::InvalidArgument {
                        reason: format!("job {jid} is running in queue {current_queue:?}, not {queue:?}"),
                    });
                }

                let mut hist = history::decode(hash.get(field::HISTORY).cloned())?;
                let priority = job::parse_i64(&hash, field::PRIORITY);

                let q = QueueHandle::new(keys, queue);
                q.locks_remove(txn, jid.as_str());
                let remaining = txn.hash_incr(&job_key, field::REMAINING, -1);
                txn.zset_remove(&keys.worker_jobs(worker), jid.as_str());

                if remaining < 0 {
                    let group = format!("failed-retries-{queue}");
                    match hist.last_mut() {
                        Some(last) => last.failed = Some(now),
                        None => hist.push(HistoryEntry {
                            worker: Some(worker.to_string()),
                            failed: Some(now),
                            ..Default::default()
                        }),
                    }
                    let history_json = history::encode(&hist)?;
                    let failure = FailureInfo {
                        group: group.clone(),
                        message: format!("Job exhausted retries in queue \"{queue}\""),
                        when: now,
                        worker: worker.to_string(),
                    };
                    let failure_json = serde_json::to_string(&failure)?;

                    txn.hash_set_many(&job_key, &[
                        (field::STATE, JobState::Failed.as_str()),
                        (field::WORKER, ""),
                        (field::EXPIRES, "0"),
                        (field::HISTORY, &history_json),
                        (field::FAILURE, &failure_json),
                    ]);
                    txn.set_add(&keys.failures(), &group);
                    txn.list_push_front(&keys.failure_group(&group), jid.as_str());
                } else if delay > 0 {
                    q.scheduled_add(txn, jid.as_str(), now + delay);
                    txn.hash_set_many(&job_key, &[
                        (field::STATE, JobState::Scheduled.as_str()),
                        (field::WORKER, ""),
                        (field::EXPIRES, "0"),
                    ]);
                } else {
                    q.work_add(txn, jid.as_str(), priority, now);
                    txn.hash_set_many(&job_key, &[
                        (field::STATE, JobState::Waiting.as_str()),
                        (field::WORKER, ""),
                        (field::EXPIRES, "0"),
                    ]);
                }

                Ok(remaining)
            })
            .await?;

        debug!(jid = %jid, queue, remaining, "job retried");
        Ok(remaining)
    }
}
