//! Per-queue view handles.
//!
//! Each queue owns four ordered-set views: `work` (pop order), `locks`
//! (by lock expiry), `scheduled` (by fire time) and `depends` (by enqueue
//! time). A jid appears in at most one view of one queue at any time; the
//! operations below are the only writers.

use capstan_core::Txn;

use crate::history;
use crate::keys::Keys;

/// Weight of one priority unit in the work view's composite score.
///
/// The work view orders by `(-priority, enqueue time)`. A single score
/// realises that as `now - priority * PRIORITY_BAND`: one priority unit
/// outweighs any realistic spread of enqueue seconds (epoch seconds stay
/// below 2^40), so higher priority sorts strictly earlier and ties break by
/// enqueue time, then member.
pub(crate) const PRIORITY_BAND: i64 = 1 << 40;

/// Handle over one queue's views.
pub(crate) struct QueueHandle<'a> {
    keys: &'a Keys,
    name: String,
}

impl<'a> QueueHandle<'a> {
    pub fn new(keys: &'a Keys, name: impl Into<String>) -> Self {
        Self { keys, name: name.into() }
    }

    fn view(&self, view: &str) -> String {
        self.keys.queue_view(&self.name, view)
    }

    /// Register the queue in the known-queues index at its first-seen time.
    pub fn ensure_known(&self, txn: &mut Txn<'_>, now: u64) {
        let queues = self.keys.queues();
        if !txn.zset_contains(&queues, &self.name) {
            txn.zset_add(&queues, &self.name, now as i64);
        }
    }

    /// Composite work-view score for `(priority, enqueue time)` ordering.
    pub fn work_score(priority: i64, now: u64) -> i64 {
        (now as i64).saturating_sub(priority.saturating_mul(PRIORITY_BAND))
    }

    pub fn work_add(&self, txn: &mut Txn<'_>, jid: &str, priority: i64, now: u64) {
        txn.zset_add(&self.view("work"), jid, Self::work_score(priority, now));
    }

    /// Insert with a precomputed composite score (priority re-scoring).
    pub fn work_add_scored(&self, txn: &mut Txn<'_>, jid: &str, score: i64) {
        txn.zset_add(&self.view("work"), jid, score);
    }

    pub fn work_remove(&self, txn: &mut Txn<'_>, jid: &str) -> bool {
        txn.zset_remove(&self.view("work"), jid)
    }

    pub fn work_score_of(&self, txn: &Txn<'_>, jid: &str) -> Option<i64> {
        txn.zset_score(&self.view("work"), jid)
    }

    /// The next `count` jids in pop order.
    pub fn work_peek(&self, txn: &Txn<'_>, count: usize) -> Vec<String> {
        txn.zset_range(&self.view("work"), count)
    }

    pub fn locks_add(&self, txn: &mut Txn<'_>, jid: &str, expires: u64) {
        txn.zset_add(&self.view("locks"), jid, expires as i64);
    }

    pub fn locks_remove(&self, txn: &mut Txn<'_>, jid: &str) -> bool {
        txn.zset_remove(&self.view("locks"), jid)
    }

    /// Jids whose lock expiry has passed.
    pub fn locks_expired(&self, txn: &Txn<'_>, now: u64) -> Vec<String> {
        txn.zset_range_by_score(&self.view("locks"), now as i64)
    }

    pub fn scheduled_add(&self, txn: &mut Txn<'_>, jid: &str, at: u64) {
        txn.zset_add(&self.view("scheduled"), jid, at as i64);
    }

    pub fn scheduled_remove(&self, txn: &mut Txn<'_>, jid: &str) -> bool {
        txn.zset_remove(&self.view("scheduled"), jid)
    }

    /// Jids whose fire time has passed.
    pub fn scheduled_due(&self, txn: &Txn<'_>, now: u64) -> Vec<String> {
        txn.zset_range_by_score(&self.view("scheduled"), now as i64)
    }

    pub fn depends_add(&self, txn: &mut Txn<'_>, jid: &str, now: u64) {
        txn.zset_add(&self.view("depends"), jid, now as i64);
    }

    pub fn depends_remove(&self, txn: &mut Txn<'_>, jid: &str) -> bool {
        txn.zset_remove(&self.view("depends"), jid)
    }

    /// Remove the jid from every view of this queue.
    pub fn remove_everywhere(&self, txn: &mut Txn<'_>, jid: &str) {
        self.work_remove(txn, jid);
        self.locks_remove(txn, jid);
        self.scheduled_remove(txn, jid);
        self.depends_remove(txn, jid);
    }

    /// Record a run-duration observation in the queue's day-binned stats.
    pub fn stat_run(&self, txn: &mut Txn<'_>, now: u64, duration: u64) {
        history::record_run(txn, self.keys, &self.name, now, duration);
    }
}

#[cfg(test)]
mod tests {
    use capstan_core::Store;

    use super::*;

    #[tokio::test]
    async fn work_view_orders_by_priority_then_enqueue_time() {
        let store = Store::new();
        let keys = Keys::new("ql");

        let order: Result<Vec<String>, ()> = store
            .transaction(|txn| {
                let q = QueueHandle::new(&keys, "q1");
                q.work_add(txn, "low-late", 0, 200);
                q.work_add(txn, "low-early", 0, 100);
                q.work_add(txn, "high", 10, 300);
                Ok(q.work_peek(txn, 10))
            })
            .await;

        assert_eq!(order.unwrap(), vec!["high", "low-early", "low-late"]);
    }

    #[tokio::test]
    async fn queues_index_keeps_first_seen_time() {
        let store = Store::new();
        let keys = Keys::new("ql");

        let score: Result<Option<i64>, ()> = store
            .transaction(|txn| {
                QueueHandle::new(&keys, "q1").ensure_known(txn, 100);
                QueueHandle::new(&keys, "q1").ensure_known(txn, 500);
                Ok(txn.zset_score(&keys.queues(), "q1"))
            })
            .await;

        assert_eq!(score.unwrap(), Some(100));
    }
}
