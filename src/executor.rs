use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use deadpool_redis::redis::{self, aio::MultiplexedConnection};
use uuid::Uuid;

use crate::{
    attempt_record::{
        FIELD_DURATION, FIELD_ERROR, FIELD_FIBER, FIELD_FINISHED_AT, FIELD_JOB, FIELD_QUEUE,
        FIELD_STARTED_AT,
    },
    error::OnyxError,
    job::JobError,
    job_record,
    registry::JobRegistry,
    storage_keys::StorageKeys,
};

/// Runs one attempt of a popped job on a fiber connection: loads the job
/// record, creates the attempt, executes `perform` and records the terminal
/// state.
///
/// A Redis failure while recording the outcome propagates; the attempt is
/// then left in the processing set for the watcher to reclaim.
pub(crate) async fn run_attempt(
    conn: &mut MultiplexedConnection,
    fiber_client_id: u64,
    registry: &JobRegistry,
    keys: &StorageKeys,
    queue: &str,
    job_uuid: &str,
) -> Result<(), OnyxError> {
    let attempt_uuid = Uuid::new_v4();
    let attempt = attempt_uuid.to_string();

    let (class, args): (Option<String>, Option<String>) = redis::cmd("HMGET")
        .arg(keys.job(job_uuid))
        .arg(job_record::FIELD_CLASS)
        .arg(job_record::FIELD_ARGS)
        .query_async(conn)
        .await?;

    // Lost race with a concurrent dequeue; the record is gone so there is
    // nothing to attempt.
    let (Some(class), Some(args)) = (class, args) else {
        tracing::error!(job_uuid, queue, "Job record not found, dropping job");
        return Ok(());
    };

    let started_at_ms = chrono::Utc::now().timestamp_millis();
    let attempt_key = keys.attempt(&attempt);
    let _: () = redis::pipe()
        .atomic()
        .sadd(keys.processing(queue), &attempt)
        .hset_multiple(
            &attempt_key,
            &[
                (FIELD_STARTED_AT, started_at_ms.to_string()),
                (FIELD_JOB, job_uuid.to_string()),
                (FIELD_FIBER, fiber_client_id.to_string()),
                (FIELD_QUEUE, queue.to_string()),
            ],
        )
        .query_async(conn)
        .await?;

    tracing::info!(
        job_uuid,
        attempt_uuid = attempt,
        queue,
        class,
        "Attempt started"
    );
    let clock = std::time::Instant::now();

    let outcome = match registry.build(&class, &args) {
        Ok(mut job) => {
            job.assign_attempt(attempt_uuid);
            match AssertUnwindSafe(job.perform()).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic occurred".to_string()
                    };
                    Err(JobError::new("Panic", panic_msg))
                }
            }
        }
        Err(e) => Err(e),
    };

    let finished_at_ms = chrono::Utc::now().timestamp_millis();
    let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(()) => {
            tracing::info!(
                job_uuid,
                attempt_uuid = attempt,
                queue,
                duration_ms,
                "Attempt succeeded"
            );

            let _: () = redis::pipe()
                .hset_multiple(
                    &attempt_key,
                    &[
                        (FIELD_FINISHED_AT, finished_at_ms.to_string()),
                        (FIELD_DURATION, duration_ms.to_string()),
                    ],
                )
                .srem(keys.processing(queue), &attempt)
                .zadd(keys.completed(queue), &attempt, finished_at_ms)
                .query_async(conn)
                .await?;
        }
        Err(e) => {
            tracing::error!(
                job_uuid,
                attempt_uuid = attempt,
                queue,
                duration_ms,
                error = %e,
                "Attempt failed"
            );

            let _: () = redis::pipe()
                .hset_multiple(
                    &attempt_key,
                    &[
                        (FIELD_FINISHED_AT, finished_at_ms.to_string()),
                        (FIELD_DURATION, duration_ms.to_string()),
                        (FIELD_ERROR, e.kind().to_string()),
                    ],
                )
                .srem(keys.processing(queue), &attempt)
                .zadd(keys.failed(queue), &attempt, finished_at_ms)
                .query_async(conn)
                .await?;
        }
    }

    Ok(())
}
