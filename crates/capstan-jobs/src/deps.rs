//! Dependency-graph maintenance.
//!
//! The graph is stored as paired sets per jid (`-dependencies` and
//! `-dependents`). Both directions of an edge are always written in the same
//! transaction, so the pairing is symmetric at every committed state.

use capstan_core::Txn;

use crate::job;
use crate::job::JobState;
use crate::job::field;
use crate::keys::Keys;
use crate::queue::QueueHandle;

/// Add the edge `dep -> dependent`.
///
/// The edge is only recorded when `dep` exists and has not completed;
/// returns whether it was added.
pub(crate) fn add_edge(txn: &mut Txn<'_>, keys: &Keys, dep: &str, dependent: &str) -> bool {
    let dep_key = keys.job(dep);
    if !txn.hash_exists(&dep_key) {
        return false;
    }
    if txn.hash_get(&dep_key, field::STATE).as_deref() == Some(JobState::Complete.as_str()) {
        return false;
    }

    txn.set_add(&keys.dependents(dep), dependent);
    txn.set_add(&keys.dependencies(dependent), dep);
    true
}

/// Remove the edge `dep -> dependent` from both sides.
pub(crate) fn remove_edge(txn: &mut Txn<'_>, keys: &Keys, dep: &str, dependent: &str) {
    txn.set_remove(&keys.dependents(dep), dependent);
    txn.set_remove(&keys.dependencies(dependent), dep);
}

/// Release a job whose last dependency was just removed: flip it to
/// `waiting` and, when it lives in a queue, move it from the queue's
/// `depends` view into `work` at its priority.
pub(crate) fn release_to_work(txn: &mut Txn<'_>, keys: &Keys, now: u64, jid: &str) {
    let job_key = keys.job(jid);
    let hash = txn.hash_all(&job_key).unwrap_or_default();
    let queue = hash.get(field::QUEUE).cloned().unwrap_or_default();
    let priority = job::parse_i64(&hash, field::PRIORITY);

    txn.hash_set(&job_key, field::STATE, JobState::Waiting.as_str());
    if !queue.is_empty() {
        let q = QueueHandle::new(keys, queue);
        q.depends_remove(txn, jid);
        q.work_add(txn, jid, priority, now);
    }
}

/// Cascade a completion: detach `jid` from every dependent, releasing the
/// ones it was the last dependency of. Returns the released jids.
pub(crate) fn release_dependents_of(txn: &mut Txn<'_>, keys: &Keys, now: u64, jid: &str) -> Vec<String> {
    let dependents = txn.set_members(&keys.dependents(jid));
    let mut released = Vec::new();

    for dependent in &dependents {
        txn.set_remove(&keys.dependencies(dependent), jid);
        if txn.set_len(&keys.dependencies(dependent)) == 0 {
            release_to_work(txn, keys, now, dependent);
            released.push(dependent.clone());
        }
    }

    txn.set_del(&keys.dependents(jid));
    released
}
