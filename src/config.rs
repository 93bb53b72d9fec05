use std::time::Duration;

use crate::storage_keys::DEFAULT_NAMESPACE;

/// Configuration of a [`Worker`](crate::Worker).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues consumed by the worker, in `BLPOP` priority order. Must not
    /// be empty.
    pub queues: Vec<String>,
    /// Maximum concurrent in-flight attempts, which is also the fiber
    /// connection pool bound.
    pub fibers: usize,
    /// Key-prefix namespace.
    pub namespace: String,
    /// Sleep between pool acquisition retries when all fibers are busy.
    pub redis_pool_wait: Duration,
    /// Idle fiber connections unused for this long are closed by the
    /// background reaper.
    pub redis_pool_ttl: Duration,
    /// On graceful stop, how long to wait for in-flight attempts before
    /// force-clearing the pool. `None` stops without waiting.
    pub fibers_timeout: Option<Duration>,
    /// Poll interval for the graceful-stop wait.
    pub fibers_check_interval: Duration,
}

impl WorkerConfig {
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: queues.into_iter().map(Into::into).collect(),
            fibers: 100,
            namespace: DEFAULT_NAMESPACE.to_string(),
            redis_pool_wait: Duration::from_micros(10),
            redis_pool_ttl: Duration::from_secs(30),
            fibers_timeout: None,
            fibers_check_interval: Duration::from_millis(1),
        }
    }

    pub fn fibers(mut self, fibers: usize) -> Self {
        self.fibers = fibers;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn fibers_timeout(mut self, timeout: Duration) -> Self {
        self.fibers_timeout = Some(timeout);
        self
    }
}

/// Configuration of a [`Watcher`](crate::Watcher).
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Queues the watcher reclaims and promotes for.
    pub queues: Vec<String>,
    /// Key-prefix namespace.
    pub namespace: String,
    /// Sleep between ticks.
    pub interval: Duration,
}

impl WatcherConfig {
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: queues.into_iter().map(Into::into).collect(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            interval: Duration::from_secs(1),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
