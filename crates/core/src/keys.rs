// Keyspace naming (spec.md 3.1)
//
// All state for a queue lives under `{prefix}:{name}:<suffix>`, where the
// braces form a Redis cluster hash-tag so every multi-key script for a
// given queue lands on one shard. This module only builds key strings;
// the backing-store crate is the one that issues commands against them.

/// Identifies a queue: its name plus the key prefix it's namespaced
/// under. Cheap to clone; carried by `Producer`, `Worker`, and
/// `QueueScheduler` alike (spec.md 9: they reference each other only by
/// queue name, never by direct struct reference).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueRef {
    prefix: String,
    name: String,
}

impl QueueRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_prefix("taskforge", name)
    }

    pub fn with_prefix(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `{prefix}:{name}` hash tag all this queue's keys share.
    fn tag(&self) -> String {
        format!("{}:{{{}}}", self.prefix, self.name)
    }

    /// Public form of [`Self::tag`]: the `prefix:{id}` string a backing
    /// store driver concatenates with a bare job id to build `job()`,
    /// `job_lock()`, etc. Exposed so Lua scripts that synthesize job
    /// keys from an id discovered at runtime (e.g. `promoteDelayed`
    /// iterating `ZRANGEBYSCORE` results) can be handed the prefix once
    /// as an argv rather than one key per possible id.
    pub fn job_key_prefix(&self) -> String {
        self.tag()
    }

    /// Glob pattern matching every key under this queue's namespace,
    /// for `obliterate`'s `SCAN MATCH` sweep.
    pub fn key_pattern(&self) -> String {
        format!("{}:*", self.tag())
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.tag(), suffix)
    }

    pub fn wait(&self) -> String {
        self.key("wait")
    }

    pub fn paused(&self) -> String {
        self.key("paused")
    }

    pub fn active(&self) -> String {
        self.key("active")
    }

    pub fn delayed(&self) -> String {
        self.key("delayed")
    }

    pub fn priority(&self) -> String {
        self.key("priority")
    }

    pub fn completed(&self) -> String {
        self.key("completed")
    }

    pub fn failed(&self) -> String {
        self.key("failed")
    }

    pub fn waiting_children(&self) -> String {
        self.key("waiting-children")
    }

    pub fn stalled(&self) -> String {
        self.key("stalled")
    }

    pub fn stalled_check(&self) -> String {
        self.key("stalled-check")
    }

    pub fn limiter(&self) -> String {
        self.key("limiter")
    }

    pub fn limiter_group(&self, group: &str) -> String {
        self.key(&format!("limiter:{group}"))
    }

    pub fn id_counter(&self) -> String {
        self.key("id")
    }

    pub fn events(&self) -> String {
        self.key("events")
    }

    pub fn meta(&self) -> String {
        self.key("meta")
    }

    pub fn repeat(&self) -> String {
        self.key("repeat")
    }

    pub fn metrics(&self, kind: &str) -> String {
        self.key(&format!("metrics:{kind}"))
    }

    pub fn job(&self, job_id: &str) -> String {
        self.key(job_id)
    }

    pub fn job_logs(&self, job_id: &str) -> String {
        self.key(&format!("{job_id}:logs"))
    }

    pub fn job_lock(&self, job_id: &str) -> String {
        self.key(&format!("{job_id}:lock"))
    }

    pub fn job_dependencies(&self, job_id: &str) -> String {
        self.key(&format!("{job_id}:dependencies"))
    }

    /// Conventional pub/sub channel jobs are published on (spec.md 6).
    pub fn events_channel(&self) -> String {
        self.events()
    }
}
