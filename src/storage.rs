use std::collections::HashMap;

use deadpool_redis::redis::{self, AsyncCommands, aio::ConnectionLike};

use crate::{
    attempt_record::AttemptRecord, error::OnyxError, job_record::JobRecord,
    storage_keys::StorageKeys,
};

/// Client name carried by a worker's control connection, followed by the
/// comma-separated queue list.
pub(crate) const WORKER_NAME_PREFIX: &str = "onyx-background-worker:";

/// Client name carried by every fiber connection, followed by the owning
/// worker's client id. The watcher treats the presence of this name in
/// `CLIENT LIST` as proof the fiber is alive.
pub(crate) const FIBER_NAME_PREFIX: &str = "onyx-background-worker-fiber:";

/// Client name carried by the watcher's control connection.
pub(crate) const WATCHER_NAME: &str = "onyx-background-watcher";

/// One entry of a `CLIENT LIST` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClientInfo {
    pub(crate) id: u64,
    pub(crate) name: String,
}

/// Parses a raw `CLIENT LIST` reply into id/name pairs. Entries without a
/// parseable id are skipped; an absent or empty `name=` field yields an
/// empty name.
pub(crate) fn parse_client_list(raw: &str) -> Vec<ClientInfo> {
    raw.lines()
        .filter_map(|line| {
            let mut id = None;
            let mut name = "";
            for field in line.split(' ') {
                if let Some(value) = field.strip_prefix("id=") {
                    id = value.parse().ok();
                } else if let Some(value) = field.strip_prefix("name=") {
                    name = value;
                }
            }
            id.map(|id| ClientInfo {
                id,
                name: name.to_string(),
            })
        })
        .collect()
}

pub(crate) async fn client_id<C>(conn: &mut C) -> Result<u64, OnyxError>
where
    C: ConnectionLike + Send,
{
    Ok(redis::cmd("CLIENT").arg("ID").query_async(conn).await?)
}

pub(crate) async fn set_client_name<C>(conn: &mut C, name: &str) -> Result<(), OnyxError>
where
    C: ConnectionLike + Send,
{
    let _: () = redis::cmd("CLIENT")
        .arg("SETNAME")
        .arg(name)
        .query_async(conn)
        .await?;
    Ok(())
}

pub(crate) async fn client_list_normal<C>(conn: &mut C) -> Result<String, OnyxError>
where
    C: ConnectionLike + Send,
{
    Ok(redis::cmd("CLIENT")
        .arg("LIST")
        .arg("TYPE")
        .arg("normal")
        .query_async(conn)
        .await?)
}

/// `CLIENT UNBLOCK <id>`. With `error = true` the blocked command fails
/// with an `UNBLOCKED` error; with `false` it returns as if it timed out.
/// Returns whether the target client was actually blocked.
pub(crate) async fn client_unblock<C>(conn: &mut C, id: u64, error: bool) -> Result<bool, OnyxError>
where
    C: ConnectionLike + Send,
{
    let unblocked: i64 = redis::cmd("CLIENT")
        .arg("UNBLOCK")
        .arg(id)
        .arg(if error { "ERROR" } else { "TIMEOUT" })
        .query_async(conn)
        .await?;
    Ok(unblocked != 0)
}

pub(crate) async fn client_kill_id<C>(conn: &mut C, id: u64) -> Result<(), OnyxError>
where
    C: ConnectionLike + Send,
{
    let _: i64 = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("ID")
        .arg(id)
        .query_async(conn)
        .await?;
    Ok(())
}

/// True for the error a `BLPOP` receives when its connection is unblocked
/// via `CLIENT UNBLOCK <id> ERROR`.
pub(crate) fn is_unblocked_error(e: &redis::RedisError) -> bool {
    e.code() == Some("UNBLOCKED")
}

pub(crate) async fn ready_count<C>(
    conn: &mut C,
    keys: &StorageKeys,
    queue: &str,
) -> Result<u64, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    Ok(conn.llen(keys.ready(queue)).await?)
}

pub(crate) async fn scheduled_count<C>(
    conn: &mut C,
    keys: &StorageKeys,
    queue: &str,
) -> Result<u64, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    Ok(conn.zcard(keys.scheduled(queue)).await?)
}

pub(crate) async fn processing_count<C>(
    conn: &mut C,
    keys: &StorageKeys,
    queue: &str,
) -> Result<u64, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    Ok(conn.scard(keys.processing(queue)).await?)
}

pub(crate) async fn completed_count<C>(
    conn: &mut C,
    keys: &StorageKeys,
    queue: &str,
) -> Result<u64, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    Ok(conn.zcard(keys.completed(queue)).await?)
}

pub(crate) async fn failed_count<C>(
    conn: &mut C,
    keys: &StorageKeys,
    queue: &str,
) -> Result<u64, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    Ok(conn.zcard(keys.failed(queue)).await?)
}

/// Completed attempts whose finish time falls in the last second.
pub(crate) async fn jobs_per_second<C>(
    conn: &mut C,
    keys: &StorageKeys,
    queue: &str,
) -> Result<u64, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    let now_ms = chrono::Utc::now().timestamp_millis();
    Ok(conn
        .zcount(keys.completed(queue), now_ms - 1_000, now_ms)
        .await?)
}

pub(crate) async fn fetch_job<C>(
    conn: &mut C,
    keys: &StorageKeys,
    job_uuid: &str,
) -> Result<Option<JobRecord>, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    let hash: HashMap<String, String> = conn.hgetall(keys.job(job_uuid)).await?;
    Ok(JobRecord::from_hash(&hash))
}

pub(crate) async fn fetch_attempt<C>(
    conn: &mut C,
    keys: &StorageKeys,
    attempt_uuid: &str,
) -> Result<Option<AttemptRecord>, OnyxError>
where
    C: ConnectionLike + Send + Sync,
{
    let hash: HashMap<String, String> = conn.hgetall(keys.attempt(attempt_uuid)).await?;
    AttemptRecord::from_hash(&hash)
}
