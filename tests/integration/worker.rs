use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::redis::AsyncCommands;
use testresult::TestResult;
use uuid::Uuid;

use crate::shared::*;
use onyx_background::{Manager, OnyxError, Worker, WorkerConfig};

async fn start_worker(
    config: WorkerConfig,
) -> TestResult<(Arc<Worker>, tokio::task::JoinHandle<Result<(), OnyxError>>)> {
    let worker = Arc::new(Worker::new(redis_client(), registry(), config).await?);
    let handle = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run().await }
    });
    assert!(
        eventually(Duration::from_secs(1), || async { worker.running() }).await,
        "worker must report running"
    );
    Ok((worker, handle))
}

async fn completed_attempt_uuids(ns: &str, queue: &str) -> TestResult<Vec<String>> {
    let mut conn = redis_client().get_multiplexed_async_connection().await?;
    let members: Vec<String> = conn.zrange(format!("{ns}:completed:{queue}"), 0, -1).await?;
    Ok(members)
}

async fn failed_attempt_uuids(ns: &str, queue: &str) -> TestResult<Vec<String>> {
    let mut conn = redis_client().get_multiplexed_async_connection().await?;
    let members: Vec<String> = conn.zrange(format!("{ns}:failed:{queue}"), 0, -1).await?;
    Ok(members)
}

#[tokio::test]
async fn test_immediate_success() -> TestResult {
    setup();
    let ns = random_string();
    let manager = Manager::new(redis_pool(), ns.clone());
    let sentinel = format!("sentinel:{}", random_string());

    let job_uuid = manager
        .enqueue(
            "default",
            &SentinelJob {
                key: sentinel.clone(),
                value: "foo".to_string(),
            },
        )
        .await?;

    let (worker, handle) =
        start_worker(WorkerConfig::new(["default"]).namespace(ns.clone())).await?;

    assert!(
        eventually(Duration::from_secs(1), || async {
            manager.completed_count("default").await.unwrap_or(0) == 1
        })
        .await,
        "job must complete within a second"
    );

    let mut conn = redis_client().get_multiplexed_async_connection().await?;
    let value: Option<String> = conn.get(&sentinel).await?;
    assert_eq!(value.as_deref(), Some("foo"));

    assert_eq!(manager.failed_count("default").await?, 0);
    assert_eq!(manager.processing_count("default").await?, 0);

    let attempts = completed_attempt_uuids(&ns, "default").await?;
    assert_eq!(attempts.len(), 1);
    let attempt = manager
        .attempt(Uuid::parse_str(&attempts[0])?)
        .await?
        .expect("attempt record must exist");
    assert_eq!(attempt.job_uuid, job_uuid);
    assert!(attempt.fiber_client_id > 0);
    assert!(attempt.started_at_ms <= attempt.finished_at_ms.expect("fin"));
    assert!(attempt.duration_ms.expect("tim") > 0.0);
    assert!(attempt.error.is_none());
    assert!(attempt.succeeded());

    worker.stop(false).await?;
    handle.await??;
    assert!(!worker.running());

    Ok(())
}

#[tokio::test]
async fn test_failing_job_is_recorded_with_its_error_kind() -> TestResult {
    setup();
    let ns = random_string();
    let manager = Manager::new(redis_pool(), ns.clone());

    manager.enqueue("default", &FailingJob {}).await?;

    let (worker, handle) =
        start_worker(WorkerConfig::new(["default"]).namespace(ns.clone())).await?;

    assert!(
        eventually(Duration::from_secs(1), || async {
            manager.failed_count("default").await.unwrap_or(0) == 1
        })
        .await,
        "job must fail within a second"
    );

    assert_eq!(manager.completed_count("default").await?, 0);
    assert_eq!(manager.processing_count("default").await?, 0);

    let attempts = failed_attempt_uuids(&ns, "default").await?;
    let attempt = manager
        .attempt(Uuid::parse_str(&attempts[0])?)
        .await?
        .expect("attempt record must exist");
    assert_eq!(attempt.error.as_deref(), Some("ArgumentError"));
    assert!(attempt.finished_at_ms.is_some());
    assert!(attempt.duration_ms.expect("tim") > 0.0);
    assert!(!attempt.reclaimed());

    worker.stop(false).await?;
    handle.await??;

    Ok(())
}

#[tokio::test]
async fn test_unregistered_class_fails_the_attempt() -> TestResult {
    setup();
    let ns = random_string();
    let manager = Manager::new(redis_pool(), ns.clone());

    manager.enqueue("default", &UnregisteredJob {}).await?;

    let (worker, handle) =
        start_worker(WorkerConfig::new(["default"]).namespace(ns.clone())).await?;

    assert!(
        eventually(Duration::from_secs(1), || async {
            manager.failed_count("default").await.unwrap_or(0) == 1
        })
        .await,
        "unregistered class must fail the attempt"
    );

    let attempts = failed_attempt_uuids(&ns, "default").await?;
    let attempt = manager
        .attempt(Uuid::parse_str(&attempts[0])?)
        .await?
        .expect("attempt record must exist");
    assert_eq!(attempt.error.as_deref(), Some("JobNotFoundByClass"));

    worker.stop(false).await?;
    handle.await??;

    Ok(())
}

#[tokio::test]
async fn test_attempt_uuid_is_injected_before_perform() -> TestResult {
    setup();
    let ns = random_string();
    let manager = Manager::new(redis_pool(), ns.clone());
    let sentinel = format!("sentinel:{}", random_string());

    manager
        .enqueue("default", &AttemptEchoJob::new(sentinel.clone()))
        .await?;

    let (worker, handle) =
        start_worker(WorkerConfig::new(["default"]).namespace(ns.clone())).await?;

    assert!(
        eventually(Duration::from_secs(1), || async {
            manager.completed_count("default").await.unwrap_or(0) == 1
        })
        .await,
        "job must complete"
    );

    let mut conn = redis_client().get_multiplexed_async_connection().await?;
    let echoed: String = conn.get(&sentinel).await?;

    let attempts = completed_attempt_uuids(&ns, "default").await?;
    assert_eq!(attempts, vec![echoed]);

    worker.stop(false).await?;
    handle.await??;

    Ok(())
}

#[tokio::test]
async fn test_graceful_stop_waits_for_in_flight_attempts() -> TestResult {
    setup();
    let ns = random_string();
    let manager = Manager::new(redis_pool(), ns.clone());
    let sentinel = format!("sentinel:{}", random_string());

    manager
        .enqueue(
            "default",
            &SleepyJob {
                sleep_ms: 500,
                key: sentinel.clone(),
            },
        )
        .await?;

    let config = WorkerConfig::new(["default"])
        .namespace(ns.clone())
        .fibers_timeout(Duration::from_secs(2));
    let (worker, handle) = start_worker(config).await?;

    assert!(
        eventually(Duration::from_secs(1), || async {
            manager.processing_count("default").await.unwrap_or(0) == 1
        })
        .await,
        "attempt must be in flight"
    );

    worker.stop(false).await?;
    handle.await??;
    assert!(!worker.running());

    // The in-flight attempt was given time to finish cleanly.
    assert_eq!(manager.completed_count("default").await?, 1);
    assert_eq!(manager.processing_count("default").await?, 0);

    let mut conn = redis_client().get_multiplexed_async_connection().await?;
    let value: Option<String> = conn.get(&sentinel).await?;
    assert_eq!(value.as_deref(), Some("done"));

    Ok(())
}

#[tokio::test]
async fn test_run_twice_is_an_error() -> TestResult {
    setup();
    let ns = random_string();

    let (worker, handle) =
        start_worker(WorkerConfig::new(["default"]).namespace(ns.clone())).await?;

    match worker.run().await {
        Err(OnyxError::WorkerAlreadyStarted) => {}
        other => panic!("expected WorkerAlreadyStarted, got {other:?}"),
    }

    worker.stop(false).await?;
    handle.await??;

    // Stopping twice is a misuse as well.
    match worker.stop(false).await {
        Err(OnyxError::WorkerNotRunning) => {}
        other => panic!("expected WorkerNotRunning, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_stop_before_run_is_an_error() -> TestResult {
    setup();
    let ns = random_string();

    let worker = Worker::new(
        redis_client(),
        registry(),
        WorkerConfig::new(["default"]).namespace(ns),
    )
    .await?;

    match worker.stop(false).await {
        Err(OnyxError::WorkerNotRunning) => Ok(()),
        other => panic!("expected WorkerNotRunning, got {other:?}"),
    }
}

#[tokio::test]
async fn test_worker_consumes_multiple_queues() -> TestResult {
    setup();
    let ns = random_string();
    let manager = Manager::new(redis_pool(), ns.clone());
    let sentinel_one = format!("sentinel:{}", random_string());
    let sentinel_two = format!("sentinel:{}", random_string());

    manager
        .enqueue(
            "default",
            &SentinelJob {
                key: sentinel_one.clone(),
                value: "one".to_string(),
            },
        )
        .await?;
    manager
        .enqueue(
            "mailers",
            &SentinelJob {
                key: sentinel_two.clone(),
                value: "two".to_string(),
            },
        )
        .await?;

    let (worker, handle) =
        start_worker(WorkerConfig::new(["default", "mailers"]).namespace(ns.clone())).await?;

    assert!(
        eventually(Duration::from_secs(1), || async {
            manager.completed_count("default").await.unwrap_or(0) == 1
                && manager.completed_count("mailers").await.unwrap_or(0) == 1
        })
        .await,
        "both queues must drain"
    );

    let mut conn = redis_client().get_multiplexed_async_connection().await?;
    let one: Option<String> = conn.get(&sentinel_one).await?;
    let two: Option<String> = conn.get(&sentinel_two).await?;
    assert_eq!(one.as_deref(), Some("one"));
    assert_eq!(two.as_deref(), Some("two"));

    worker.stop(false).await?;
    handle.await??;

    Ok(())
}
