//! History codec and the day-binned stats recorder.

use capstan_core::Txn;

use crate::error::Result;
use crate::job::HistoryEntry;
use crate::keys::Keys;

/// Decode a stored history list; absent reads as empty.
pub(crate) fn decode(raw: Option<String>) -> Result<Vec<HistoryEntry>> {
    match raw {
        Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(&raw)?),
        _ => Ok(Vec::new()),
    }
}

/// Encode a history list for storage.
pub(crate) fn encode(history: &[HistoryEntry]) -> Result<String> {
    Ok(serde_json::to_string(history)?)
}

/// The start-of-UTC-day bin a timestamp falls into.
pub(crate) fn day_bin(now: u64) -> u64 {
    now - now % 86_400
}

/// Record one run-duration observation for `queue`.
///
/// Writes `run.count`, a running `run.mean` and a coarse histogram bucket
/// into the queue's stats hash for the day.
pub(crate) fn record_run(txn: &mut Txn<'_>, keys: &Keys, queue: &str, now: u64, duration: u64) {
    let key = keys.stats(day_bin(now), queue);

    let count = txn.hash_incr(&key, "run.count", 1);
    let mean = txn.hash_get(&key, "run.mean").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    let mean = mean + (duration as f64 - mean) / count as f64;
    txn.hash_set(&key, "run.mean", &mean.to_string());

    let bucket = histogram_bucket(duration);
    txn.hash_incr(&key, &format!("run.histogram.{bucket}"), 1);
}

/// Record one failure for `queue`: bumps both the monotonic `failures`
/// counter and the `failed` count for the day.
pub(crate) fn record_failure(txn: &mut Txn<'_>, keys: &Keys, queue: &str, now: u64) {
    let key = keys.stats(day_bin(now), queue);
    txn.hash_incr(&key, "failures", 1);
    txn.hash_incr(&key, "failed", 1);
}

/// Histogram bucket label: per-second under a minute, then per-minute,
/// per-hour, per-day.
fn histogram_bucket(duration: u64) -> String {
    if duration < 60 {
        format!("{duration}s")
    } else if duration < 3_600 {
        format!("{}m", duration / 60)
    } else if duration < 86_400 {
        format!("{}h", duration / 3_600)
    } else {
        format!("{}d", duration / 86_400)
    }
}
