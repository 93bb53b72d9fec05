/// Centralizes the Redis key naming scheme shared by the manager, worker,
/// watcher and status reader.
#[derive(Debug, Clone)]
pub(crate) struct StorageKeys {
    /// Namespace prefix applied to every Redis key (default `onyx-background`).
    pub(crate) namespace: String,
}

pub(crate) const DEFAULT_NAMESPACE: &str = "onyx-background";

impl StorageKeys {
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE.to_string()
        } else {
            namespace
        };
        Self { namespace }
    }

    /// Redis hash holding one job record (`que`, `cls`, `arg`, `qat`, `pat`).
    pub(crate) fn job(&self, job_uuid: &str) -> String {
        format!("{}:jobs:{}", self.namespace, job_uuid)
    }

    /// Redis list of job UUIDs ready to be popped by a worker.
    pub(crate) fn ready(&self, queue: &str) -> String {
        format!("{}:ready:{}", self.namespace, queue)
    }

    /// Redis sorted set of scheduled job UUIDs, scored by due time in ms.
    pub(crate) fn scheduled(&self, queue: &str) -> String {
        format!("{}:scheduled:{}", self.namespace, queue)
    }

    /// Redis set of in-flight attempt UUIDs.
    pub(crate) fn processing(&self, queue: &str) -> String {
        format!("{}:processing:{}", self.namespace, queue)
    }

    /// Redis sorted set of successful attempt UUIDs, scored by finish ms.
    pub(crate) fn completed(&self, queue: &str) -> String {
        format!("{}:completed:{}", self.namespace, queue)
    }

    /// Redis sorted set of failed attempt UUIDs, scored by failure ms.
    pub(crate) fn failed(&self, queue: &str) -> String {
        format!("{}:failed:{}", self.namespace, queue)
    }

    /// Redis hash holding one attempt record (`sta`, `job`, `wrk`, `que`,
    /// then `fin`, `tim`, `err`).
    pub(crate) fn attempt(&self, attempt_uuid: &str) -> String {
        format!("{}:attempts:{}", self.namespace, attempt_uuid)
    }

    /// Extracts the queue name out of a key returned by `BLPOP` over ready
    /// lists. Returns `None` for keys outside this namespace.
    pub(crate) fn queue_of_ready<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.namespace)?
            .strip_prefix(":ready:")
            .filter(|queue| !queue.is_empty())
    }
}
