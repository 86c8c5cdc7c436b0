//! Centralised store key layout.
//!
//! Every key the engine touches is built here, under the namespace supplied
//! at construction, so the on-store layout stays interoperable with existing
//! deployments.

/// The namespaced key scheme.
#[derive(Debug, Clone)]
pub(crate) struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        assert!(!namespace.is_empty(), "key namespace must not be empty");
        Self { namespace }
    }

    fn scoped(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    /// `<ns>:j:<jid>` — the job hash.
    pub fn job(&self, jid: &str) -> String {
        self.scoped(&format!("j:{jid}"))
    }

    /// `<ns>:j:<jid>-dependencies` — jids this job waits on.
    pub fn dependencies(&self, jid: &str) -> String {
        self.scoped(&format!("j:{jid}-dependencies"))
    }

    /// `<ns>:j:<jid>-dependents` — jids waiting on this job.
    pub fn dependents(&self, jid: &str) -> String {
        self.scoped(&format!("j:{jid}-dependents"))
    }

    /// `<ns>:w:<worker>:jobs` — jids owned by the worker, by lock expiry.
    pub fn worker_jobs(&self, worker: &str) -> String {
        self.scoped(&format!("w:{worker}:jobs"))
    }

    /// `<ns>:q:<queue>-<view>` — one of a queue's four ordered-set views.
    pub fn queue_view(&self, queue: &str, view: &str) -> String {
        self.scoped(&format!("q:{queue}-{view}"))
    }

    /// `<ns>:queues` — known queues by first-seen time.
    pub fn queues(&self) -> String {
        self.scoped("queues")
    }

    /// `<ns>:tracked` — tracked jids.
    pub fn tracked(&self) -> String {
        self.scoped("tracked")
    }

    /// `<ns>:completed` — completed jids awaiting GC, by completion time.
    pub fn completed(&self) -> String {
        self.scoped("completed")
    }

    /// `<ns>:failures` — the set of failure group names.
    pub fn failures(&self) -> String {
        self.scoped("failures")
    }

    /// `<ns>:f:<group>` — failed jids in the group, newest first.
    pub fn failure_group(&self, group: &str) -> String {
        self.scoped(&format!("f:{group}"))
    }

    /// `<ns>:t:<tag>` — jids carrying the tag.
    pub fn tag_index(&self, tag: &str) -> String {
        self.scoped(&format!("t:{tag}"))
    }

    /// `<ns>:tags` — tags by cardinality.
    pub fn tags(&self) -> String {
        self.scoped("tags")
    }

    /// `<ns>:s:stats:<bin>:<queue>` — day-binned counters for the queue.
    pub fn stats(&self, bin: u64, queue: &str) -> String {
        self.scoped(&format!("s:stats:{bin}:{queue}"))
    }

    /// `<ns>:config` — the engine configuration hash.
    pub fn config(&self) -> String {
        self.scoped("config")
    }
}
