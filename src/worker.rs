use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use deadpool_redis::redis::{self, AsyncCommands, aio::MultiplexedConnection};
use tokio_util::sync::CancellationToken;

use crate::{
    config::WorkerConfig,
    error::OnyxError,
    executor,
    pool::FiberPool,
    registry::JobRegistry,
    storage::{self, WORKER_NAME_PREFIX},
    storage_keys::StorageKeys,
};

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Long-running consumer of ready queues.
///
/// The main loop blocks on `BLPOP` over every configured ready list on a
/// dedicated control connection and hands each popped job UUID to a fiber:
/// a spawned task holding one pooled connection for the whole attempt. At
/// most [`WorkerConfig::fibers`] attempts are in flight at a time.
///
/// A worker runs once: construct, `run`, `stop` from another task. Both
/// misuses (running twice, stopping a worker that is not running) are
/// errors.
pub struct Worker {
    config: WorkerConfig,
    client: redis::Client,
    registry: Arc<JobRegistry>,
    keys: StorageKeys,
    control: MultiplexedConnection,
    client_id: u64,
    pool: Arc<FiberPool>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Worker {
    /// Opens the control connection, names it
    /// `onyx-background-worker:<queues_csv>` and records its client id,
    /// which every fiber connection will reference in its own name.
    ///
    /// # Panics
    ///
    /// Panics when `config.queues` is empty.
    pub async fn new(
        client: redis::Client,
        registry: Arc<JobRegistry>,
        config: WorkerConfig,
    ) -> Result<Self, OnyxError> {
        assert!(
            !config.queues.is_empty(),
            "Worker requires at least one queue"
        );

        let keys = StorageKeys::new(config.namespace.clone());
        let mut control = client.get_multiplexed_async_connection().await?;
        let name = format!("{WORKER_NAME_PREFIX}{}", config.queues.join(","));
        storage::set_client_name(&mut control, &name).await?;
        let client_id = storage::client_id(&mut control).await?;
        let pool = Arc::new(FiberPool::new(client.clone(), client_id, &config));

        Ok(Self {
            config,
            client,
            registry,
            keys,
            control,
            client_id,
            pool,
            state: AtomicU8::new(STATE_IDLE),
            cancel: CancellationToken::new(),
        })
    }

    /// Redis client id of the control connection.
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Consumes ready queues until stopped. Returns after [`stop`] unblocks
    /// the control connection, or with the error when Redis fails.
    ///
    /// [`stop`]: Worker::stop
    pub async fn run(&self) -> Result<(), OnyxError> {
        self.state
            .compare_exchange(
                STATE_IDLE,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| OnyxError::WorkerAlreadyStarted)?;

        tracing::info!(
            queues = ?self.config.queues,
            fibers = self.config.fibers,
            client_id = self.client_id,
            "Worker started"
        );

        let reaper_pool = Arc::clone(&self.pool);
        let reaper_cancel = self.cancel.clone();
        tokio::spawn(async move { reaper_pool.run_reaper(reaper_cancel).await });

        let ready_keys: Vec<String> = self
            .config
            .queues
            .iter()
            .map(|queue| self.keys.ready(queue))
            .collect();
        let mut conn = self.control.clone();

        let result = loop {
            if self.state.load(Ordering::Acquire) == STATE_STOPPING {
                break Ok(());
            }

            let popped: Result<Option<(String, String)>, redis::RedisError> =
                conn.blpop(&ready_keys, 0.0).await;

            match popped {
                Ok(Some((key, job_uuid))) => {
                    let Some(queue) = self.keys.queue_of_ready(&key) else {
                        tracing::error!(key, "BLPOP returned a key outside the ready layout");
                        continue;
                    };
                    self.spawn_fiber(queue.to_string(), job_uuid);
                }
                Ok(None) => continue,
                Err(e) if storage::is_unblocked_error(&e) => break Ok(()),
                Err(e) => break Err(OnyxError::Redis(e)),
            }
        };

        self.cancel.cancel();
        self.state.store(STATE_STOPPED, Ordering::Release);

        match result {
            Ok(()) => {
                tracing::info!("Stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Worker terminated");
                Err(e)
            }
        }
    }

    fn spawn_fiber(&self, queue: String, job_uuid: String) {
        let pool = Arc::clone(&self.pool);
        let registry = Arc::clone(&self.registry);
        let keys = self.keys.clone();

        tokio::spawn(async move {
            let mut fiber = match pool.acquire().await {
                Ok(fiber) => fiber,
                Err(e) => {
                    tracing::error!(
                        job_uuid,
                        queue,
                        error = %e,
                        "Could not acquire a fiber connection"
                    );
                    return;
                }
            };

            let result = executor::run_attempt(
                &mut fiber.conn,
                fiber.client_id,
                &registry,
                &keys,
                &queue,
                &job_uuid,
            )
            .await;

            pool.release(fiber);

            // The attempt stays in the processing set; the watcher will
            // reclaim it.
            if let Err(e) = result {
                tracing::error!(job_uuid, queue, error = %e, "Attempt could not be recorded");
            }
        });
    }

    /// Stops the worker. The control connection is parked in `BLPOP`, so
    /// this opens an auxiliary connection and unblocks it with
    /// `CLIENT UNBLOCK <id> ERROR`, which the main loop recognizes as a
    /// clean break.
    ///
    /// With `force_kill` the fiber pool is cleared immediately and
    /// in-flight attempts die with a Redis error. Otherwise, when
    /// [`WorkerConfig::fibers_timeout`] is set, in-flight attempts get that
    /// long to drain before the pool is cleared forcibly; without it the
    /// call returns without waiting.
    pub async fn stop(&self, force_kill: bool) -> Result<(), OnyxError> {
        self.state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| OnyxError::WorkerNotRunning)?;

        tracing::info!(force_kill, "Stopping worker");

        let mut aux = self.client.get_multiplexed_async_connection().await?;

        // The main loop may not have parked in BLPOP yet; an unblock that
        // lands in that window is a no-op, so retry until it connects or
        // the loop has already observed the stopping flag and exited.
        loop {
            if storage::client_unblock(&mut aux, self.client_id, true).await? {
                break;
            }
            if self.state.load(Ordering::Acquire) == STATE_STOPPED {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        if force_kill {
            self.pool.clear(&mut aux).await?;
        } else if let Some(timeout) = self.config.fibers_timeout {
            let deadline = std::time::Instant::now() + timeout;
            while self.pool.in_use() > 0 && std::time::Instant::now() < deadline {
                tokio::time::sleep(self.config.fibers_check_interval).await;
            }
            if self.pool.in_use() > 0 {
                tracing::warn!(?timeout, "Fibers still busy after timeout, clearing pool");
                self.pool.clear(&mut aux).await?;
            }
        }

        Ok(())
    }
}
