use uuid::Uuid;

/// A unit of background work.
///
/// Implementors are plain serde structs: the manager serializes them into
/// the job record's `arg` field, a worker fiber deserializes them back
/// through the [`JobRegistry`](crate::JobRegistry) and calls [`perform`].
/// Results are side effects; there is no return channel.
///
/// [`perform`]: Job::perform
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// Executes the job. Any error fails the attempt; its
    /// [`kind`](JobError::kind) lands in the attempt record's `err` field.
    async fn perform(&self) -> Result<(), JobError>;

    /// Called with the attempt UUID right before [`perform`](Job::perform).
    /// The default implementation discards it.
    fn assign_attempt(&mut self, attempt_uuid: Uuid) {
        let _ = attempt_uuid;
    }
}

pub(crate) type BoxedJob = Box<dyn Job>;

/// A job execution failure.
///
/// Carries a short `kind` name (what gets recorded in the attempt hash,
/// e.g. `"ArgumentError"`) and a free-form message for the logs.
#[derive(Debug, Clone)]
pub struct JobError {
    kind: String,
    message: String,
}

impl JobError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The short kind name recorded in the attempt's `err` field.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        Self::new("ArgumentError", e.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for JobError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Self::new("RedisError", e.to_string())
    }
}
