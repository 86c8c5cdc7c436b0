//! Completed-job garbage collection.
//!
//! The `completed` ordered set holds every completed jid by completion time.
//! Each sweep bounds it twice: first by age (`jobs-history`), then by count
//! (`jobs-history-count`), evicting strictly oldest-first. Evicted jobs lose
//! their tag-index entries and their job hash.

use capstan_core::Txn;

use crate::config;
use crate::job::field;
use crate::keys::Keys;

/// Run one GC sweep. Returns the number of evicted jobs.
pub(crate) fn sweep(txn: &mut Txn<'_>, keys: &Keys, now: u64) -> usize {
    let max_age = config::get_u64(txn, keys, "jobs-history", config::DEFAULT_JOBS_HISTORY_SECONDS);
    let max_count = config::get_u64(txn, keys, "jobs-history-count", config::DEFAULT_JOBS_HISTORY_COUNT) as usize;
    let completed = keys.completed();
    let mut evicted = 0;

    // Age bound: completion time strictly before `now - max_age`.
    let cutoff = now as i64 - max_age as i64;
    for jid in txn.zset_range_by_score(&completed, cutoff - 1) {
        evict(txn, keys, &jid);
        evicted += 1;
    }

    // Count bound: drop the oldest excess.
    let len = txn.zset_len(&completed);
    if len > max_count {
        for jid in txn.zset_range(&completed, len - max_count) {
            evict(txn, keys, &jid);
            evicted += 1;
        }
    }

    evicted
}

fn evict(txn: &mut Txn<'_>, keys: &Keys, jid: &str) {
    let job_key = keys.job(jid);

    let tags: Vec<String> = txn
        .hash_get(&job_key, field::TAGS)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    for tag in &tags {
        txn.zset_remove(&keys.tag_index(tag), jid);
        if txn.zset_incr(&keys.tags(), tag, -1) <= 0 {
            txn.zset_remove(&keys.tags(), tag);
        }
    }

    txn.zset_remove(&keys.completed(), jid);
    txn.set_del(&keys.dependencies(jid));
    txn.set_del(&keys.dependents(jid));
    txn.hash_del(&job_key);
}
