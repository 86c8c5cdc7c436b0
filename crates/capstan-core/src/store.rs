//! The single-writer transactional store.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered events per channel before lagging subscribers start missing them.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A sorted set: members ordered by `(score, member)`.
#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }
}

/// All store state, guarded by the transaction mutex.
///
/// Each data shape lives in its own keyspace map. Empty containers are pruned
/// on removal so key existence mirrors content.
#[derive(Default)]
struct StoreInner {
    strings: BTreeMap<String, String>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    sets: BTreeMap<String, BTreeSet<String>>,
    zsets: BTreeMap<String, SortedSet>,
    lists: BTreeMap<String, VecDeque<String>>,
}

/// The shared store.
///
/// One async mutex serialises every [`Store::transaction`]; inside a
/// transaction there are no suspension points visible to other callers, which
/// gives each operation linearisability across all of its key mutations and
/// event publishes.
pub struct Store {
    inner: Mutex<StoreInner>,
    channels: StdMutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            channels: StdMutex::new(HashMap::new()),
        }
    }

    /// Run `op` as one atomic transaction.
    ///
    /// Events published through [`Txn::publish`] are buffered and delivered
    /// only when `op` returns `Ok`; on `Err` they are discarded. The store
    /// does not roll back writes made before an error, so operations must
    /// finish validation and decoding before their first mutation — every
    /// engine operation follows that discipline.
    pub async fn transaction<T, E, F>(&self, op: F) -> Result<T, E>
    where F: FnOnce(&mut Txn<'_>) -> Result<T, E> {
        let mut guard = self.inner.lock().await;
        let mut txn = Txn {
            inner: &mut *guard,
            events: Vec::new(),
        };

        let result = op(&mut txn);
        let events = std::mem::take(&mut txn.events);

        // Delivery happens before the lock is released so subscribers observe
        // events in transaction order.
        if result.is_ok() {
            for (channel, payload) in events {
                self.deliver(&channel, payload);
            }
        }
        drop(guard);
        result
    }

    /// Subscribe to an event channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().expect("channel registry poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn deliver(&self, channel: &str, payload: String) {
        let channels = self.channels.lock().expect("channel registry poisoned");
        if let Some(tx) = channels.get(channel) {
            // A send error just means nobody is listening right now.
            if tx.send(payload).is_ok() {
                debug!(channel, "event delivered");
            }
        }
    }
}

/// A transaction's view of the store.
///
/// All accessors are plain in-memory operations; reads of absent keys behave
/// as reads of empty containers.
pub struct Txn<'a> {
    inner: &'a mut StoreInner,
    events: Vec<(String, String)>,
}

impl Txn<'_> {
    // ----- scalar keys -----

    /// Read a scalar key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.strings.get(key).cloned()
    }

    /// Write a scalar key.
    pub fn put(&mut self, key: &str, value: &str) {
        self.inner.strings.insert(key.to_string(), value.to_string());
    }

    /// Delete a scalar key.
    pub fn del(&mut self, key: &str) {
        self.inner.strings.remove(key);
    }

    // ----- hashes -----

    /// Whether a hash exists (has at least one field).
    pub fn hash_exists(&self, key: &str) -> bool {
        self.inner.hashes.contains_key(key)
    }

    /// Read one hash field.
    pub fn hash_get(&self, key: &str, field: &str) -> Option<String> {
        self.inner.hashes.get(key).and_then(|h| h.get(field)).cloned()
    }

    /// Read a whole hash.
    pub fn hash_all(&self, key: &str) -> Option<BTreeMap<String, String>> {
        self.inner.hashes.get(key).cloned()
    }

    /// Write one hash field.
    pub fn hash_set(&mut self, key: &str, field: &str, value: &str) {
        self.inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    /// Write several hash fields at once.
    pub fn hash_set_many(&mut self, key: &str, fields: &[(&str, &str)]) {
        let hash = self.inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert((*field).to_string(), (*value).to_string());
        }
    }

    /// Add `delta` to an integer hash field, treating absent or non-numeric
    /// values as 0. Returns the new value.
    pub fn hash_incr(&mut self, key: &str, field: &str, delta: i64) -> i64 {
        let hash = self.inner.hashes.entry(key.to_string()).or_default();
        let current = hash.get(field).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        next
    }

    /// Delete a whole hash.
    pub fn hash_del(&mut self, key: &str) {
        self.inner.hashes.remove(key);
    }

    // ----- sets -----

    /// Add a member. Returns true when the member was not present.
    pub fn set_add(&mut self, key: &str, member: &str) -> bool {
        self.inner.sets.entry(key.to_string()).or_default().insert(member.to_string())
    }

    /// Remove a member, pruning the set when it empties.
    pub fn set_remove(&mut self, key: &str, member: &str) -> bool {
        let Some(set) = self.inner.sets.get_mut(key) else {
            return false;
        };
        let removed = set.remove(member);
        if set.is_empty() {
            self.inner.sets.remove(key);
        }
        removed
    }

    /// Whether the member is present.
    pub fn set_contains(&self, key: &str, member: &str) -> bool {
        self.inner.sets.get(key).is_some_and(|s| s.contains(member))
    }

    /// All members, in lexicographic order.
    pub fn set_members(&self, key: &str) -> Vec<String> {
        self.inner.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Number of members.
    pub fn set_len(&self, key: &str) -> usize {
        self.inner.sets.get(key).map_or(0, |s| s.len())
    }

    /// Delete a whole set.
    pub fn set_del(&mut self, key: &str) {
        self.inner.sets.remove(key);
    }

    // ----- sorted sets -----

    /// Insert or re-score a member.
    pub fn zset_add(&mut self, key: &str, member: &str, score: i64) {
        self.inner.zsets.entry(key.to_string()).or_default().insert(member, score);
    }

    /// Remove a member, pruning the set when it empties.
    pub fn zset_remove(&mut self, key: &str, member: &str) -> bool {
        let Some(zset) = self.inner.zsets.get_mut(key) else {
            return false;
        };
        let removed = zset.remove(member);
        if zset.scores.is_empty() {
            self.inner.zsets.remove(key);
        }
        removed
    }

    /// The member's score, if present.
    pub fn zset_score(&self, key: &str, member: &str) -> Option<i64> {
        self.inner.zsets.get(key).and_then(|z| z.scores.get(member).copied())
    }

    /// Whether the member is present.
    pub fn zset_contains(&self, key: &str, member: &str) -> bool {
        self.inner.zsets.get(key).is_some_and(|z| z.scores.contains_key(member))
    }

    /// Number of members.
    pub fn zset_len(&self, key: &str) -> usize {
        self.inner.zsets.get(key).map_or(0, |z| z.scores.len())
    }

    /// Up to `limit` members in ascending `(score, member)` order.
    pub fn zset_range(&self, key: &str, limit: usize) -> Vec<String> {
        self.inner
            .zsets
            .get(key)
            .map(|z| z.ordered.iter().take(limit).map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// All members with `score <= max`, in ascending order.
    pub fn zset_range_by_score(&self, key: &str, max: i64) -> Vec<String> {
        self.inner
            .zsets
            .get(key)
            .map(|z| {
                z.ordered
                    .iter()
                    .take_while(|(score, _)| *score <= max)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Add `delta` to a member's score, inserting it at `delta` when absent.
    /// Returns the new score.
    pub fn zset_incr(&mut self, key: &str, member: &str, delta: i64) -> i64 {
        let zset = self.inner.zsets.entry(key.to_string()).or_default();
        let next = zset.scores.get(member).copied().unwrap_or(0) + delta;
        zset.insert(member, next);
        next
    }

    // ----- lists -----

    /// Prepend a value.
    pub fn list_push_front(&mut self, key: &str, value: &str) {
        self.inner.lists.entry(key.to_string()).or_default().push_front(value.to_string());
    }

    /// Remove every occurrence of `value`, pruning the list when it empties.
    pub fn list_remove(&mut self, key: &str, value: &str) {
        if let Some(list) = self.inner.lists.get_mut(key) {
            list.retain(|v| v != value);
            if list.is_empty() {
                self.inner.lists.remove(key);
            }
        }
    }

    /// All values, head first.
    pub fn list_range(&self, key: &str) -> Vec<String> {
        self.inner.lists.get(key).map(|l| l.iter().cloned().collect()).unwrap_or_default()
    }

    /// Number of values.
    pub fn list_len(&self, key: &str) -> usize {
        self.inner.lists.get(key).map_or(0, |l| l.len())
    }

    // ----- events -----

    /// Publish `payload` on `channel` when the transaction commits.
    pub fn publish(&mut self, channel: &str, payload: String) {
        self.events.push((channel.to_string(), payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zset_orders_by_score_then_member() {
        let store = Store::new();
        let range: Result<Vec<String>, ()> = store
            .transaction(|txn| {
                txn.zset_add("z", "b", 2);
                txn.zset_add("z", "a", 2);
                txn.zset_add("z", "c", 1);
                Ok(txn.zset_range("z", 10))
            })
            .await;
        assert_eq!(range.unwrap(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn zset_add_rescores_existing_member() {
        let store = Store::new();
        let out: Result<(Vec<String>, usize), ()> = store
            .transaction(|txn| {
                txn.zset_add("z", "a", 10);
                txn.zset_add("z", "b", 20);
                txn.zset_add("z", "a", 30);
                Ok((txn.zset_range("z", 10), txn.zset_len("z")))
            })
            .await;
        let (range, len) = out.unwrap();
        assert_eq!(range, vec!["b", "a"]);
        assert_eq!(len, 2);
    }

    #[tokio::test]
    async fn zset_range_by_score_is_inclusive() {
        let store = Store::new();
        let due: Result<Vec<String>, ()> = store
            .transaction(|txn| {
                txn.zset_add("z", "early", 5);
                txn.zset_add("z", "exact", 10);
                txn.zset_add("z", "late", 11);
                Ok(txn.zset_range_by_score("z", 10))
            })
            .await;
        assert_eq!(due.unwrap(), vec!["early", "exact"]);
    }

    #[tokio::test]
    async fn hash_incr_goes_negative() {
        let store = Store::new();
        let out: Result<(i64, Option<String>), ()> = store
            .transaction(|txn| {
                txn.hash_set("h", "remaining", "0");
                let next = txn.hash_incr("h", "remaining", -1);
                Ok((next, txn.hash_get("h", "remaining")))
            })
            .await;
        assert_eq!(out.unwrap(), (-1, Some("-1".to_string())));
    }

    #[tokio::test]
    async fn events_flush_only_on_commit() {
        let store = Store::new();
        let mut rx = store.subscribe("log");

        let failed: Result<(), &str> = store
            .transaction(|txn| {
                txn.publish("log", "dropped".to_string());
                Err("abort")
            })
            .await;
        assert!(failed.is_err());
        assert!(rx.try_recv().is_err());

        let ok: Result<(), &str> = store
            .transaction(|txn| {
                txn.publish("log", "kept".to_string());
                Ok(())
            })
            .await;
        assert!(ok.is_ok());
        assert_eq!(rx.try_recv().unwrap(), "kept");
    }

    #[tokio::test]
    async fn pruned_containers_read_as_absent() {
        let store = Store::new();
        let out: Result<(bool, usize), ()> = store
            .transaction(|txn| {
                txn.set_add("s", "only");
                txn.set_remove("s", "only");
                txn.zset_add("z", "only", 1);
                txn.zset_remove("z", "only");
                Ok((txn.set_contains("s", "only"), txn.zset_len("z")))
            })
            .await;
        assert_eq!(out.unwrap(), (false, 0));
    }
}
