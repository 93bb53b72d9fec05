use std::sync::Mutex;
use std::time::{Duration, Instant};

use deadpool_redis::redis::{self, aio::ConnectionLike, aio::MultiplexedConnection};
use tokio_util::sync::CancellationToken;

use crate::{
    config::WorkerConfig,
    error::OnyxError,
    storage::{self, FIBER_NAME_PREFIX},
};

/// How often the background reaper scans for expired idle connections.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// A fiber's checked-out connection. Returned to the pool explicitly via
/// [`FiberPool::release`] once the attempt is recorded.
pub(crate) struct FiberConn {
    pub(crate) conn: MultiplexedConnection,
    pub(crate) client_id: u64,
}

struct IdleConn {
    conn: MultiplexedConnection,
    client_id: u64,
    last_used: Instant,
}

struct PoolState {
    idle: Vec<IdleConn>,
    /// Client ids currently checked out by fibers.
    leased: Vec<u64>,
    /// Connections being opened; counted so concurrent acquires cannot
    /// overshoot the bound.
    opening: usize,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.leased.len() + self.opening
    }
}

/// Bounded pool of fiber connections.
///
/// Every connection is named `onyx-background-worker-fiber:<worker_client_id>`
/// inside the same transaction that reads its own client id back, so the
/// watcher can match in-flight attempts against `CLIENT LIST`.
///
/// Bookkeeping sits behind a mutex and is never held across a suspension
/// point; connections are opened outside the lock against a reserved slot.
pub(crate) struct FiberPool {
    client: redis::Client,
    worker_client_id: u64,
    max: usize,
    wait: Duration,
    ttl: Duration,
    state: Mutex<PoolState>,
}

enum AcquirePlan {
    Reuse(FiberConn),
    Open,
    Wait,
}

/// Releases a reserved `opening` slot on drop.
struct OpeningSlot<'a>(&'a FiberPool);

impl Drop for OpeningSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().opening -= 1;
    }
}

impl FiberPool {
    pub(crate) fn new(client: redis::Client, worker_client_id: u64, config: &WorkerConfig) -> Self {
        Self {
            client,
            worker_client_id,
            max: config.fibers,
            wait: config.redis_pool_wait,
            ttl: config.redis_pool_ttl,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                leased: Vec::new(),
                opening: 0,
            }),
        }
    }

    /// Takes an idle connection, opens a new one while the pool is below
    /// its bound, or sleeps and retries.
    pub(crate) async fn acquire(&self) -> Result<FiberConn, OnyxError> {
        loop {
            let plan = {
                let mut state = self.lock();
                if let Some(idle) = state.idle.pop() {
                    state.leased.push(idle.client_id);
                    AcquirePlan::Reuse(FiberConn {
                        conn: idle.conn,
                        client_id: idle.client_id,
                    })
                } else if state.live() < self.max {
                    state.opening += 1;
                    AcquirePlan::Open
                } else {
                    AcquirePlan::Wait
                }
            };

            match plan {
                AcquirePlan::Reuse(fiber) => return Ok(fiber),
                AcquirePlan::Open => {
                    // The guard gives the slot back even when this future
                    // is dropped mid-open.
                    let _opening = OpeningSlot(self);
                    let fiber = self.open().await?;
                    self.lock().leased.push(fiber.client_id);
                    return Ok(fiber);
                }
                AcquirePlan::Wait => tokio::time::sleep(self.wait).await,
            }
        }
    }

    async fn open(&self) -> Result<FiberConn, OnyxError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let name = format!("{FIBER_NAME_PREFIX}{}", self.worker_client_id);
        let (_, client_id): (redis::Value, u64) = redis::pipe()
            .atomic()
            .cmd("CLIENT")
            .arg("SETNAME")
            .arg(&name)
            .cmd("CLIENT")
            .arg("ID")
            .query_async(&mut conn)
            .await?;

        tracing::debug!(client_id, "Opened fiber connection");

        Ok(FiberConn { conn, client_id })
    }

    /// Marks the connection idle and stamps its last-used time. A
    /// connection the pool no longer knows (killed by [`clear`]) is
    /// dropped instead.
    ///
    /// [`clear`]: FiberPool::clear
    pub(crate) fn release(&self, fiber: FiberConn) {
        let mut state = self.lock();
        if let Some(pos) = state.leased.iter().position(|id| *id == fiber.client_id) {
            state.leased.swap_remove(pos);
            state.idle.push(IdleConn {
                conn: fiber.conn,
                client_id: fiber.client_id,
                last_used: Instant::now(),
            });
        }
    }

    /// In-flight lease count; the graceful-stop wait polls this.
    pub(crate) fn in_use(&self) -> usize {
        self.lock().leased.len()
    }

    /// Closes idle connections unused for longer than the pool TTL.
    fn reap_expired(&self) {
        let mut state = self.lock();
        let before = state.idle.len();
        state.idle.retain(|idle| idle.last_used.elapsed() < self.ttl);
        let reaped = before - state.idle.len();
        if reaped > 0 {
            tracing::debug!(reaped, "Closed expired fiber connections");
        }
    }

    /// Reaps expired idle connections every second until cancelled.
    pub(crate) async fn run_reaper(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(REAP_INTERVAL) => self.reap_expired(),
            }
        }
    }

    /// Forgets every known connection and terminates it server-side
    /// through `control`: unblock first so parked commands return, then
    /// kill. In-flight attempts on killed connections surface a Redis
    /// error and flow into the failed set through the normal error path.
    pub(crate) async fn clear<C>(&self, control: &mut C) -> Result<(), OnyxError>
    where
        C: ConnectionLike + Send,
    {
        let ids: Vec<u64> = {
            let mut state = self.lock();
            let ids = state
                .idle
                .iter()
                .map(|idle| idle.client_id)
                .chain(state.leased.iter().copied())
                .collect();
            state.idle.clear();
            state.leased.clear();
            ids
        };

        for id in &ids {
            storage::client_unblock(control, *id, false).await?;
            storage::client_kill_id(control, *id).await?;
        }

        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Cleared fiber pool");
        }

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
