use std::time::Duration;

use deadpool_redis::redis::{self, AsyncCommands};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use onyx_background::{Job, JobError};

pub fn setup() {
    dotenvy::from_filename(".env.test").ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn redis_url() -> String {
    dotenvy::from_filename(".env.test").ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn redis_pool() -> deadpool_redis::Pool {
    deadpool_redis::Config::from_url(redis_url())
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("Failed to create Redis pool")
}

pub fn redis_client() -> redis::Client {
    redis::Client::open(redis_url()).expect("Failed to create Redis client")
}

pub fn random_string() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

/// Polls `condition` every 25 ms until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Sets a sentinel Redis key to a fixed value.
#[derive(Serialize, Deserialize)]
pub struct SentinelJob {
    pub key: String,
    pub value: String,
}

#[async_trait::async_trait]
impl Job for SentinelJob {
    async fn perform(&self) -> Result<(), JobError> {
        let mut conn = redis_client().get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(&self.key, &self.value, 60).await?;
        Ok(())
    }
}

/// Fails with a fixed error kind.
#[derive(Serialize, Deserialize)]
pub struct FailingJob {}

#[async_trait::async_trait]
impl Job for FailingJob {
    async fn perform(&self) -> Result<(), JobError> {
        Err(JobError::new("ArgumentError", "this job always fails"))
    }
}

/// Sleeps, then sets a sentinel key.
#[derive(Serialize, Deserialize)]
pub struct SleepyJob {
    pub sleep_ms: u64,
    pub key: String,
}

#[async_trait::async_trait]
impl Job for SleepyJob {
    async fn perform(&self) -> Result<(), JobError> {
        tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
        let mut conn = redis_client().get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(&self.key, "done", 60).await?;
        Ok(())
    }
}

/// Writes its injected attempt UUID to a sentinel key.
#[derive(Serialize, Deserialize)]
pub struct AttemptEchoJob {
    pub key: String,
    #[serde(skip)]
    attempt_uuid: Option<Uuid>,
}

impl AttemptEchoJob {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attempt_uuid: None,
        }
    }
}

#[async_trait::async_trait]
impl Job for AttemptEchoJob {
    async fn perform(&self) -> Result<(), JobError> {
        let attempt_uuid = self
            .attempt_uuid
            .ok_or_else(|| JobError::new("ArgumentError", "attempt uuid was not injected"))?;
        let mut conn = redis_client().get_multiplexed_async_connection().await?;
        let _: () = conn
            .set_ex(&self.key, attempt_uuid.to_string(), 60)
            .await?;
        Ok(())
    }

    fn assign_attempt(&mut self, attempt_uuid: Uuid) {
        self.attempt_uuid = Some(attempt_uuid);
    }
}

/// Enqueued but never registered with any worker's registry.
#[derive(Serialize, Deserialize)]
pub struct UnregisteredJob {}

#[async_trait::async_trait]
impl Job for UnregisteredJob {
    async fn perform(&self) -> Result<(), JobError> {
        Ok(())
    }
}

pub fn registry() -> std::sync::Arc<onyx_background::JobRegistry> {
    let mut registry = onyx_background::JobRegistry::new();
    registry.register::<SentinelJob>();
    registry.register::<FailingJob>();
    registry.register::<SleepyJob>();
    registry.register::<AttemptEchoJob>();
    std::sync::Arc::new(registry)
}
