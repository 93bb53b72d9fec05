use std::collections::HashSet;

use deadpool_redis::redis::aio::MultiplexedConnection;
use serde::Serialize;

use crate::{
    error::OnyxError,
    storage::{self, ClientInfo, FIBER_NAME_PREFIX, WORKER_NAME_PREFIX},
    storage_keys::StorageKeys,
};

/// Column order of the status table.
pub const STATUS_COLUMNS: [&str; 8] = [
    "workers",
    "fibers",
    "jps",
    "ready",
    "scheduled",
    "processing",
    "completed",
    "failed",
];

/// Read-only snapshot of one queue, as printed by `onyx-background status`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue: String,
    /// Workers whose control connection lists this queue.
    pub workers: usize,
    /// Live fiber connections belonging to those workers.
    pub fibers: usize,
    /// Attempts completed within the last second.
    pub jps: u64,
    pub ready: u64,
    pub scheduled: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStatus {
    pub fn header() -> String {
        STATUS_COLUMNS.join("\t")
    }

    pub fn row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.workers,
            self.fibers,
            self.jps,
            self.ready,
            self.scheduled,
            self.processing,
            self.completed,
            self.failed
        )
    }
}

/// Counts workers serving `queue` and the fiber connections they own, from
/// a parsed `CLIENT LIST`. A fiber belongs to a worker when its name
/// suffix is that worker's client id.
fn serving_counts(clients: &[ClientInfo], queue: &str) -> (usize, usize) {
    let worker_ids: HashSet<u64> = clients
        .iter()
        .filter_map(|client| {
            let csv = client.name.strip_prefix(WORKER_NAME_PREFIX)?;
            csv.split(',').any(|q| q == queue).then_some(client.id)
        })
        .collect();

    let fibers = clients
        .iter()
        .filter(|client| {
            client
                .name
                .strip_prefix(FIBER_NAME_PREFIX)
                .and_then(|suffix| suffix.parse::<u64>().ok())
                .is_some_and(|worker_id| worker_ids.contains(&worker_id))
        })
        .count();

    (worker_ids.len(), fibers)
}

/// Gathers one [`QueueStatus`] per queue over a read-only connection.
pub async fn queue_statuses(
    conn: &mut MultiplexedConnection,
    namespace: &str,
    queues: &[String],
) -> Result<Vec<QueueStatus>, OnyxError> {
    let keys = StorageKeys::new(namespace);
    let client_list = storage::client_list_normal(conn).await?;
    let clients = storage::parse_client_list(&client_list);

    let mut statuses = Vec::with_capacity(queues.len());

    for queue in queues {
        let (workers, fibers) = serving_counts(&clients, queue);

        statuses.push(QueueStatus {
            queue: queue.clone(),
            workers,
            fibers,
            jps: storage::jobs_per_second(conn, &keys, queue).await?,
            ready: storage::ready_count(conn, &keys, queue).await?,
            scheduled: storage::scheduled_count(conn, &keys, queue).await?,
            processing: storage::processing_count(conn, &keys, queue).await?,
            completed: storage::completed_count(conn, &keys, queue).await?,
            failed: storage::failed_count(conn, &keys, queue).await?,
        });
    }

    Ok(statuses)
}
