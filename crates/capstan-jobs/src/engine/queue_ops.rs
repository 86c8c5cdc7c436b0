//! Queue facade operations: `put`, `pop`, `peek`.

use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::JobEngine;
use super::PutOptions;
use super::log_event;
use super::query::decode_job;
use crate::config;
use crate::deps;
use crate::error::JobError;
use crate::error::Result;
use crate::history;
use crate::job;
use crate::job::HistoryEntry;
use crate::job::Jid;
use crate::job::Job;
use crate::job::JobState;
use crate::job::field;
use crate::queue::QueueHandle;

impl JobEngine {
    /// Create a job, or move an existing one into `queue`.
    ///
    /// An existing job is first detached from its previous queue, worker and
    /// dependency edges; its history is kept and a new stage appended. The
    /// job lands in `depends` when any given dependency is unfinished, in
    /// `scheduled` when `delay` is set, and in `work` otherwise.
    pub async fn put(
        &self,
        now: u64,
        queue: &str,
        jid: &Jid,
        klass: &str,
        data: serde_json::Value,
        options: PutOptions,
    ) -> Result<Jid> {
        if queue.is_empty() {
            return Err(JobError::MissingArgument { field: "queue".to_string() });
        }
        if klass.is_empty() {
            return Err(JobError::MissingArgument { field: "klass".to_string() });
        }
        if !data.is_object() {
            return Err(JobError::InvalidArgument {
                reason: "data must be a JSON object".to_string(),
            });
        }
        if options.retries < 0 {
            return Err(JobError::InvalidArgument {
                reason: "retries must be non-negative".to_string(),
            });
        }
        if options.depends.iter().any(|dep| dep == jid) {
            return Err(JobError::InvalidArgument {
                reason: format!("job {jid} cannot depend on itself"),
            });
        }

        let keys = &self.keys;
        self.store
            .transaction(|txn| {
                let job_key = keys.job(jid.as_str());
                let mut hist = Vec::new();

                if let Some(old) = txn.hash_all(&job_key) {
                    hist = history::decode(old.get(field::HISTORY).cloned())?;
                    let old_tags: Vec<String> = old
                        .get(field::TAGS)
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_default();
                    let old_failure = job::decode_failure(old.get(field::FAILURE))?;

                    let old_queue = old.get(field::QUEUE).map(String::as_str).unwrap_or("");
                    if !old_queue.is_empty() {
                        QueueHandle::new(keys, old_queue).remove_everywhere(txn, jid.as_str());
                    }
                    let old_worker = old.get(field::WORKER).map(String::as_str).unwrap_or("");
                    if !old_worker.is_empty() {
                        txn.zset_remove(&keys.worker_jobs(old_worker), jid.as_str());
                    }

                    for dep in txn.set_members(&keys.dependencies(jid.as_str())) {
                        txn.set_remove(&keys.dependents(&dep), jid.as_str());
                    }
                    txn.set_del(&keys.dependencies(jid.as_str()));

                    for tag in &old_tags {
                        txn.zset_remove(&keys.tag_index(tag), jid.as_str());
                        if txn.zset_incr(&keys.tags(), tag, -1) <= 0 {
                            txn.zset_remove(&keys.tags(), tag);
                        }
                    }

                    // A re-put of a failed job leaves its failure group.
                    if old.get(field::STATE).map(String::as_str) == Some(JobState::Failed.as_str()) {
                        if let Some(failure) = old_failure {
                            let group_key = keys.failure_group(&failure.group);
                            txn.list_remove(&group_key, jid.as_str());
                            if txn.list_len(&group_key) == 0 {
                                txn.set_remove(&keys.failures(), &failure.group);
                            }
                        }
                    }
                }

                hist.push(HistoryEntry {
                    q: Some(queue.to_string()),
                    put: Some(now),
                    ..Default::default()
                });
                let history_json = history::encode(&hist)?;
                let data_json = serde_json::to_string(&data)?;
                let tags_json = serde_json::to_string(&options.tags)?;

                let q = QueueHandle::new(keys, queue);
                q.ensure_known(txn, now);

                let mut blocked = false;
                for dep in &options.depends {
                    blocked |= deps::add_edge(txn, keys, dep.as_str(), jid.as_str());
                }
                let state = if blocked {
                    JobState::Depends
                } else if options.delay > 0 {
                    JobState::Scheduled
                } else {
                    JobState::Waiting
                };

                let priority = options.priority.to_string();
                let retries = options.retries.to_string();
                txn.hash_set_many(&job_key, &[
                    (field::JID, jid.as_str()),
                    (field::KLASS, klass),
                    (field::STATE, state.as_str()),
                    (field::QUEUE, queue),
                    (field::WORKER, ""),
                    (field::PRIORITY, &priority),
                    (field::EXPIRES, "0"),
                    (field::RETRIES, &retries),
                    (field::REMAINING, &retries),
                    (field::DATA, &data_json),
                    (field::TAGS, &tags_json),
                    (field::HISTORY, &history_json),
                    (field::FAILURE, "{}"),
                ]);

                for tag in &options.tags {
                    txn.zset_add(&keys.tag_index(tag), jid.as_str(), now as i64);
                    txn.zset_incr(&keys.tags(), tag, 1);
                }

                match state {
                    JobState::Depends => q.depends_add(txn, jid.as_str(), now),
                    JobState::Scheduled => q.scheduled_add(txn, jid.as_str(), now + options.delay),
                    _ => q.work_add(txn, jid.as_str(), options.priority, now),
                }

                log_event(txn, json!({ "jid": jid, "event": "put", "queue": queue }));
                Ok::<_, JobError>(())
            })
            .await?;

        info!(jid = %jid, queue, klass, "job put");
        Ok(jid.clone())
    }

    /// Take up to `count` jobs from `queue` for `worker`.
    ///
    /// Jobs whose lock has expired are seized first (their previous owner
    /// loses them), then due scheduled jobs migrate into the work view, then
    /// remaining slots fill from `work` in pop order. Every returned job is
    /// `running` under a fresh lock.
    pub async fn pop(&self, now: u64, queue: &str, worker: &str, count: usize) -> Result<Vec<Job>> {
        assert!(count > 0, "count must be positive, got 0");
        if queue.is_empty() {
            return Err(JobError::MissingArgument { field: "queue".to_string() });
        }
        if worker.is_empty() {
            return Err(JobError::MissingArgument { field: "worker".to_string() });
        }

        let keys = &self.keys;
        let jobs = self
            .store
            .transaction(|txn| {
                let q = QueueHandle::new(keys, queue);
                let mut jids: Vec<String> = Vec::new();

                // Seize jobs whose lock has expired.
                for jid in q.locks_expired(txn, now) {
                    if jids.len() >= count {
                        break;
                    }
                    let old_worker = txn.hash_get(&keys.job(&jid), field::WORKER).unwrap_or_default();
                    if !old_worker.is_empty() {
                        txn.zset_remove(&keys.worker_jobs(&old_worker), &jid);
                    }
                    log_event(txn, json!({ "jid": jid, "event": "lock_lost", "worker": old_worker }));
                    warn!(jid = %jid, worker = %old_worker, "lock expired, job reassigned");
                    jids.push(jid);
                }

                // Migrate due scheduled jobs into the work view.
                for jid in q.scheduled_due(txn, now) {
                    q.scheduled_remove(txn, &jid);
                    let hash = txn.hash_all(&keys.job(&jid)).unwrap_or_default();
                    q.work_add(txn, &jid, job::parse_i64(&hash, field::PRIORITY), now);
                    txn.hash_set(&keys.job(&jid), field::STATE, JobState::Waiting.as_str());
                }

                if jids.len() < count {
                    jids.extend(q.work_peek(txn, count - jids.len()));
                }

                let expires = now + config::heartbeat(txn, keys, queue);
                let expires_str = expires.to_string();
                let mut jobs = Vec::with_capacity(jids.len());
                for jid in &jids {
                    let job_key = keys.job(jid);
                    let mut hist = history::decode(txn.hash_get(&job_key, field::HISTORY))?;
                    match hist.last_mut() {
                        Some(last) if last.popped.is_none() => {
                            last.popped = Some(now);
                            last.worker = Some(worker.to_string());
                        }
                        _ => hist.push(HistoryEntry {
                            q: Some(queue.to_string()),
                            popped: Some(now),
                            worker: Some(worker.to_string()),
                            ..Default::default()
                        }),
                    }
                    let history_json = history::encode(&hist)?;

                    txn.hash_set_many(&job_key, &[
                        (field::STATE, JobState::Running.as_str()),
                        (field::WORKER, worker),
                        (field::EXPIRES, &expires_str),
                        (field::HISTORY, &history_json),
                    ]);
                    q.work_remove(txn, jid);
                    q.locks_add(txn, jid, expires);
                    txn.zset_add(&keys.worker_jobs(worker), jid, expires as i64);

                    if let Some(job) = decode_job(txn, keys, jid)? {
                        jobs.push(job);
                    }
                }
                Ok::<_, JobError>(jobs)
            })
            .await?;

        debug!(queue, worker, count = jobs.len(), "jobs popped");
        Ok(jobs)
    }

    /// Read up to `count` jobs in pop order without mutating anything.
    ///
    /// Scheduled jobs whose fire time has passed are included after the work
    /// view, mirroring what the next `pop` would see.
    pub async fn peek(&self, now: u64, queue: &str, count: usize) -> Result<Vec<Job>> {
        if queue.is_empty() {
            return Err(JobError::MissingArgument { field: "queue".to_string() });
        }

        let keys = &self.keys;
        self.store
            .transaction(|txn| {
                let q = QueueHandle::new(keys, queue);
                let mut jids = q.work_peek(txn, count);
                for jid in q.scheduled_due(txn, now) {
                    if jids.len() >= count {
                        break;
                    }
                    jids.push(jid);
                }

                let mut jobs = Vec::with_capacity(jids.len());
                for jid in &jids {
                    if let Some(job) = decode_job(txn, keys, jid)? {
                        jobs.push(job);
                    }
                }
                Ok(jobs)
            })
            .await
    }
}
