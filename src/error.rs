use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OnyxError {
    #[error("Job {0} not found")]
    JobNotFoundByUuid(Uuid),
    #[error("Worker was already started")]
    WorkerAlreadyStarted,
    #[error("Worker is not running")]
    WorkerNotRunning,
    #[error("Malformed attempt record: {0}")]
    MalformedAttempt(String),
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("Redis pool error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
