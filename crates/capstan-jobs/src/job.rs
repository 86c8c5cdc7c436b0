//! Core job types and the job-hash codec.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::error::JobError;
use crate::error::Result;

/// Field names of the job hash.
pub(crate) mod field {
    pub const JID: &str = "jid";
    pub const KLASS: &str = "klass";
    pub const STATE: &str = "state";
    pub const QUEUE: &str = "queue";
    pub const WORKER: &str = "worker";
    pub const PRIORITY: &str = "priority";
    pub const EXPIRES: &str = "expires";
    pub const RETRIES: &str = "retries";
    pub const REMAINING: &str = "remaining";
    pub const DATA: &str = "data";
    pub const TAGS: &str = "tags";
    pub const HISTORY: &str = "history";
    pub const FAILURE: &str = "failure";
}

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid(String);

impl Jid {
    /// Create a new random jid.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create a jid from a string.
    pub fn from_string(jid: String) -> Self {
        Self(jid)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Jid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Jid {
    fn from(jid: &str) -> Self {
        Self(jid.to_string())
    }
}

/// State of a job in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// In a queue's work set, eligible for pop.
    Waiting,
    /// Held by a worker under a live lock.
    Running,
    /// Parked until a fire time.
    Scheduled,
    /// Blocked on unfinished dependencies.
    Depends,
    /// Finished; retained until garbage collection.
    Complete,
    /// Failed; retained until cancelled or re-queued.
    Failed,
}

impl JobState {
    /// The stored string form of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Scheduled => "scheduled",
            Self::Depends => "depends",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored state string.
    pub fn parse(state: &str) -> Option<Self> {
        match state {
            "waiting" => Some(Self::Waiting),
            "running" => Some(Self::Running),
            "scheduled" => Some(Self::Scheduled),
            "depends" => Some(Self::Depends),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of a job's history.
///
/// A stage opens when the job is put into a queue and accumulates the pop,
/// completion or failure stamps of that stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Queue the stage ran in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// When the job was put (epoch seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<u64>,
    /// When the job was popped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popped: Option<u64>,
    /// When the job completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<u64>,
    /// When the job failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    /// Worker that held the job during the stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

/// Details of a job's most recent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Failure group for aggregate reporting.
    pub group: String,
    /// Human-readable message.
    pub message: String,
    /// When the failure was recorded (epoch seconds).
    pub when: u64,
    /// Worker that reported the failure.
    pub worker: String,
}

/// A fully decoded job record.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique job ID.
    pub jid: Jid,
    /// Job class/handler name.
    pub klass: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Queue the job lives in; empty when not in a queue.
    pub queue: String,
    /// Worker holding the job; empty when unowned.
    pub worker: String,
    /// Scheduling priority; higher pops first.
    pub priority: i64,
    /// Lock expiry (epoch seconds); 0 when not owned.
    pub expires: u64,
    /// Maximum attempts per stage.
    pub retries: i64,
    /// Attempts left in the current stage; negative when exhausted.
    pub remaining: i64,
    /// Opaque JSON payload.
    pub data: serde_json::Value,
    /// Tags, in application order.
    pub tags: Vec<String>,
    /// Stage history, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Most recent failure, if any.
    pub failure: Option<FailureInfo>,
    /// Jids this job waits on.
    pub dependencies: Vec<String>,
    /// Jids waiting on this job.
    pub dependents: Vec<String>,
    /// Whether the jid is in the tracked set.
    pub tracked: bool,
}

impl Job {
    /// Decode a job from its stored hash plus its index memberships.
    pub(crate) fn from_hash(
        hash: &BTreeMap<String, String>,
        dependencies: Vec<String>,
        dependents: Vec<String>,
        tracked: bool,
    ) -> Result<Self> {
        let state_raw = hash.get(field::STATE).map(String::as_str).unwrap_or("");
        let state = JobState::parse(state_raw).ok_or_else(|| JobError::InvalidArgument {
            reason: format!("unknown job state: {state_raw:?}"),
        })?;

        Ok(Self {
            jid: Jid::from_string(hash.get(field::JID).cloned().unwrap_or_default()),
            klass: hash.get(field::KLASS).cloned().unwrap_or_default(),
            state,
            queue: hash.get(field::QUEUE).cloned().unwrap_or_default(),
            worker: hash.get(field::WORKER).cloned().unwrap_or_default(),
            priority: parse_i64(hash, field::PRIORITY),
            expires: parse_expires(hash.get(field::EXPIRES)),
            retries: parse_i64(hash, field::RETRIES),
            remaining: parse_i64(hash, field::REMAINING),
            data: decode_json_or(hash.get(field::DATA), serde_json::json!({}))?,
            tags: decode_json_or(hash.get(field::TAGS), serde_json::json!([]))
                .and_then(|v| serde_json::from_value(v).map_err(JobError::from))?,
            history: crate::history::decode(hash.get(field::HISTORY).cloned())?,
            failure: decode_failure(hash.get(field::FAILURE))?,
            dependencies,
            dependents,
            tracked,
        })
    }
}

/// Lenient integer field read: absent or malformed values read as 0.
pub(crate) fn parse_i64(hash: &BTreeMap<String, String>, field: &str) -> i64 {
    hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Read the `expires` field, accepting both its spellings of "not owned":
/// `fail` writes the empty string where every other path writes 0.
pub(crate) fn parse_expires(raw: Option<&String>) -> u64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Decode the stored `failure` mapping; `{}` and absent both read as `None`.
pub(crate) fn decode_failure(raw: Option<&String>) -> Result<Option<FailureInfo>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(raw)?;
    match value.as_object() {
        Some(map) if map.is_empty() => Ok(None),
        _ => Ok(Some(serde_json::from_value(value)?)),
    }
}

fn decode_json_or(raw: Option<&String>, default: serde_json::Value) -> Result<serde_json::Value> {
    match raw {
        Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(raw)?),
        _ => Ok(default),
    }
}
