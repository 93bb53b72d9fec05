use std::collections::HashSet;

use deadpool_redis::redis::{self, AsyncCommands, aio::MultiplexedConnection};
use tokio_util::sync::CancellationToken;

use crate::{
    attempt_record::{FIELD_ERROR, FIELD_FIBER, WORKER_TIMEOUT_ERROR},
    config::WatcherConfig,
    error::OnyxError,
    storage::{self, FIBER_NAME_PREFIX, WATCHER_NAME},
    storage_keys::StorageKeys,
};

/// Singleton per-namespace process that promotes due scheduled jobs to
/// ready and fails attempts whose owning fiber connection has vanished
/// from `CLIENT LIST`.
///
/// The watcher takes no lock against a second instance. Running two
/// watchers on one namespace can double-promote scheduled jobs (both race
/// `ZRANGEBYSCORE` against each other's `ZREM`), producing duplicate ready
/// entries. Run exactly one.
pub struct Watcher {
    config: WatcherConfig,
    keys: StorageKeys,
    control: MultiplexedConnection,
    cancel: CancellationToken,
}

impl Watcher {
    /// Opens the control connection and names it `onyx-background-watcher`.
    pub async fn new(client: redis::Client, config: WatcherConfig) -> Result<Self, OnyxError> {
        let keys = StorageKeys::new(config.namespace.clone());
        let mut control = client.get_multiplexed_async_connection().await?;
        storage::set_client_name(&mut control, WATCHER_NAME).await?;

        Ok(Self {
            config,
            keys,
            control,
            cancel: CancellationToken::new(),
        })
    }

    /// Ticks until stopped: stale-attempt reclamation, then scheduled
    /// promotion, then sleep. Per-tick Redis errors propagate and end the
    /// loop.
    pub async fn run(&self) -> Result<(), OnyxError> {
        tracing::info!(
            queues = ?self.config.queues,
            interval = ?self.config.interval,
            "Watcher started"
        );

        let mut conn = self.control.clone();

        loop {
            self.reclaim_stale(&mut conn).await?;
            self.promote_scheduled(&mut conn).await?;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Only sets a flag; shutdown takes effect at the next tick boundary,
    /// bounded by the configured interval.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// An attempt is stale when its `wrk` client id is absent from
    /// `CLIENT LIST`. Stale attempts get `err` but neither `fin` nor
    /// `tim`; their absence marks watcher reclamation.
    async fn reclaim_stale(&self, conn: &mut MultiplexedConnection) -> Result<(), OnyxError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("CLIENT").arg("LIST").arg("TYPE").arg("normal");
        for queue in &self.config.queues {
            pipe.smembers(self.keys.processing(queue));
        }
        let replies: Vec<redis::Value> = pipe.query_async(conn).await?;
        let mut replies = replies.into_iter();

        let client_list: String = match replies.next() {
            Some(value) => redis::from_redis_value(&value)?,
            None => return Ok(()),
        };

        let live_fibers: HashSet<u64> = storage::parse_client_list(&client_list)
            .into_iter()
            .filter(|client| client.name.starts_with(FIBER_NAME_PREFIX))
            .map(|client| client.id)
            .collect();

        let mut stale: Vec<(&str, String)> = Vec::new();

        for queue in &self.config.queues {
            let members: Vec<String> = match replies.next() {
                Some(value) => redis::from_redis_value(&value)?,
                None => break,
            };

            for attempt_uuid in members {
                let fiber: Option<String> = conn
                    .hget(self.keys.attempt(&attempt_uuid), FIELD_FIBER)
                    .await?;
                let Some(fiber) = fiber else {
                    tracing::error!(attempt_uuid, "BUG: in-flight attempt without a wrk field");
                    continue;
                };
                let Ok(fiber_id) = fiber.parse::<u64>() else {
                    tracing::error!(attempt_uuid, fiber, "BUG: unparseable wrk field");
                    continue;
                };

                if !live_fibers.contains(&fiber_id) {
                    stale.push((queue.as_str(), attempt_uuid));
                }
            }
        }

        if stale.is_empty() {
            return Ok(());
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut pipe = redis::pipe();
        for (queue, attempt_uuid) in &stale {
            pipe.hset(
                self.keys.attempt(attempt_uuid),
                FIELD_ERROR,
                WORKER_TIMEOUT_ERROR,
            );
            pipe.srem(self.keys.processing(queue), attempt_uuid);
            pipe.zadd(self.keys.failed(queue), attempt_uuid, now_ms);
        }
        let _: () = pipe.query_async(conn).await?;

        tracing::warn!(count = stale.len(), "Reclaimed stale attempts");

        Ok(())
    }

    async fn promote_scheduled(&self, conn: &mut MultiplexedConnection) -> Result<(), OnyxError> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        for queue in &self.config.queues {
            let due: Vec<String> = conn
                .zrangebyscore(self.keys.scheduled(queue), 0, now_ms)
                .await?;

            for job_uuid in due {
                let _: () = redis::pipe()
                    .atomic()
                    .zrem(self.keys.scheduled(queue), &job_uuid)
                    .rpush(self.keys.ready(queue), &job_uuid)
                    .query_async(conn)
                    .await?;

                tracing::debug!(job_uuid, queue, "Promoted scheduled job");
            }
        }

        Ok(())
    }
}
