use chrono::{DateTime, Utc};
use deadpool_redis::redis::{self, AsyncCommands};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    attempt_record::AttemptRecord,
    error::OnyxError,
    job::Job,
    job_record::{self, JobRecord},
    storage,
    storage_keys::StorageKeys,
};

/// Library handle used inside application processes to enqueue and dequeue
/// jobs. Stateless other than its Redis pool and namespace; clones share
/// both.
#[derive(Clone)]
pub struct Manager {
    pool: deadpool_redis::Pool,
    keys: StorageKeys,
}

impl Manager {
    pub fn new(pool: deadpool_redis::Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            keys: StorageKeys::new(namespace),
        }
    }

    /// Builds a manager with its own pool from a Redis URL.
    pub fn from_url(url: &str, namespace: impl Into<String>) -> Result<Self, OnyxError> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
        Ok(Self::new(pool, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.keys.namespace
    }

    /// Enqueues a job for immediate execution and returns its UUID.
    pub async fn enqueue<T>(&self, queue: &str, job: &T) -> Result<Uuid, OnyxError>
    where
        T: Job + Serialize,
    {
        self.enqueue_record(queue, job, None).await
    }

    /// Enqueues a job to become ready after `delay`.
    pub async fn enqueue_in<T>(
        &self,
        queue: &str,
        job: &T,
        delay: std::time::Duration,
    ) -> Result<Uuid, OnyxError>
    where
        T: Job + Serialize,
    {
        let run_at_ms = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        self.enqueue_record(queue, job, Some(run_at_ms)).await
    }

    /// Enqueues a job to become ready at an absolute time. A time in the
    /// past lands in the scheduled set with a past score and is promoted on
    /// the watcher's next tick.
    pub async fn enqueue_at<T>(
        &self,
        queue: &str,
        job: &T,
        at: DateTime<Utc>,
    ) -> Result<Uuid, OnyxError>
    where
        T: Job + Serialize,
    {
        self.enqueue_record(queue, job, Some(at.timestamp_millis()))
            .await
    }

    async fn enqueue_record<T>(
        &self,
        queue: &str,
        job: &T,
        run_at_ms: Option<i64>,
    ) -> Result<Uuid, OnyxError>
    where
        T: Job + Serialize,
    {
        let record = JobRecord::new(queue, job, run_at_ms)?;

        tracing::trace!(queue, class = record.class, "Enqueuing job");

        // Hash and queue insert travel in one pipeline, not a transaction;
        // the worker drops a popped UUID whose hash is not visible yet.
        let mut pipe = redis::pipe();
        let job_uuid = self.append_enqueue(&mut pipe, &record);
        let mut conn = self.pool.get().await?;
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(job_uuid)
    }

    /// Emits the enqueue writes into a caller-owned pipeline instead of
    /// opening one, so many enqueues can be batched into a single
    /// round-trip. The caller executes the pipeline.
    pub fn enqueue_pipelined<T>(
        &self,
        pipe: &mut redis::Pipeline,
        queue: &str,
        job: &T,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid, OnyxError>
    where
        T: Job + Serialize,
    {
        let record = JobRecord::new(queue, job, run_at.map(|at| at.timestamp_millis()))?;
        Ok(self.append_enqueue(pipe, &record))
    }

    fn append_enqueue(&self, pipe: &mut redis::Pipeline, record: &JobRecord) -> Uuid {
        let job_uuid = Uuid::new_v4();
        let uuid = job_uuid.to_string();

        pipe.hset_multiple(self.keys.job(&uuid), &record.to_fields());
        match record.run_at_ms {
            Some(run_at_ms) => pipe.zadd(self.keys.scheduled(&record.queue), &uuid, run_at_ms),
            None => pipe.rpush(self.keys.ready(&record.queue), &uuid),
        };

        job_uuid
    }

    /// Removes a not-yet-running job: deletes its record and pulls its UUID
    /// out of the ready and scheduled queues in one transaction.
    ///
    /// Returns `true` when the job was still sitting in a queue. Returns
    /// `false` for jobs already picked up by a worker. Fails with
    /// [`OnyxError::JobNotFoundByUuid`] when no record exists.
    pub async fn dequeue(&self, job_uuid: Uuid) -> Result<bool, OnyxError> {
        let uuid = job_uuid.to_string();
        let mut conn = self.pool.get().await?;

        let queue: Option<String> = conn
            .hget(self.keys.job(&uuid), job_record::FIELD_QUEUE)
            .await?;
        let Some(queue) = queue else {
            return Err(OnyxError::JobNotFoundByUuid(job_uuid));
        };

        let (_, removed_scheduled, removed_ready): (i64, i64, i64) = redis::pipe()
            .atomic()
            .del(self.keys.job(&uuid))
            .zrem(self.keys.scheduled(&queue), &uuid)
            .lrem(self.keys.ready(&queue), 0, &uuid)
            .query_async(&mut conn)
            .await?;

        Ok(removed_scheduled + removed_ready > 0)
    }

    /// Reads a job record back. `None` once dequeued (records of executed
    /// jobs are retained).
    pub async fn job(&self, job_uuid: Uuid) -> Result<Option<JobRecord>, OnyxError> {
        let mut conn = self.pool.get().await?;
        storage::fetch_job(&mut conn, &self.keys, &job_uuid.to_string()).await
    }

    /// Reads an attempt record back.
    pub async fn attempt(&self, attempt_uuid: Uuid) -> Result<Option<AttemptRecord>, OnyxError> {
        let mut conn = self.pool.get().await?;
        storage::fetch_attempt(&mut conn, &self.keys, &attempt_uuid.to_string()).await
    }

    pub async fn ready_count(&self, queue: &str) -> Result<u64, OnyxError> {
        let mut conn = self.pool.get().await?;
        storage::ready_count(&mut conn, &self.keys, queue).await
    }

    pub async fn scheduled_count(&self, queue: &str) -> Result<u64, OnyxError> {
        let mut conn = self.pool.get().await?;
        storage::scheduled_count(&mut conn, &self.keys, queue).await
    }

    pub async fn processing_count(&self, queue: &str) -> Result<u64, OnyxError> {
        let mut conn = self.pool.get().await?;
        storage::processing_count(&mut conn, &self.keys, queue).await
    }

    pub async fn completed_count(&self, queue: &str) -> Result<u64, OnyxError> {
        let mut conn = self.pool.get().await?;
        storage::completed_count(&mut conn, &self.keys, queue).await
    }

    pub async fn failed_count(&self, queue: &str) -> Result<u64, OnyxError> {
        let mut conn = self.pool.get().await?;
        storage::failed_count(&mut conn, &self.keys, queue).await
    }
}
