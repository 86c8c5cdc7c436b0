//! Read-through configuration lookup.
//!
//! Configuration lives in the store's `config` hash so every engine sharing
//! the store sees the same values. Lookups fall back from a per-queue
//! override to the global key to a built-in default.

use capstan_core::Txn;

use crate::keys::Keys;

/// Default lock duration granted by `pop` and `heartbeat`, in seconds.
pub(crate) const DEFAULT_HEARTBEAT_SECONDS: u64 = 60;
/// Default retention of completed jobs, in seconds (7 days).
pub(crate) const DEFAULT_JOBS_HISTORY_SECONDS: u64 = 604_800;
/// Default retained completed-job count.
pub(crate) const DEFAULT_JOBS_HISTORY_COUNT: u64 = 50_000;

/// Read a raw configuration value.
pub(crate) fn get(txn: &Txn<'_>, keys: &Keys, name: &str) -> Option<String> {
    txn.hash_get(&keys.config(), name)
}

/// Read a numeric configuration value, or `default` when absent or
/// malformed.
pub(crate) fn get_u64(txn: &Txn<'_>, keys: &Keys, name: &str, default: u64) -> u64 {
    get(txn, keys, name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// The heartbeat interval for `queue`: `<queue>-heartbeat`, else the global
/// `heartbeat`, else 60 seconds.
pub(crate) fn heartbeat(txn: &Txn<'_>, keys: &Keys, queue: &str) -> u64 {
    let per_queue = get(txn, keys, &format!("{queue}-heartbeat")).and_then(|v| v.parse().ok());
    match per_queue {
        Some(value) => value,
        None => get_u64(txn, keys, "heartbeat", DEFAULT_HEARTBEAT_SECONDS),
    }
}
