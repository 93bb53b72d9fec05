use std::any::type_name;
use std::collections::HashMap;

use serde::Serialize;

use crate::error::OnyxError;

/// Field names of the `jobs:<uuid>` hash.
pub(crate) const FIELD_QUEUE: &str = "que";
pub(crate) const FIELD_CLASS: &str = "cls";
pub(crate) const FIELD_ARGS: &str = "arg";
pub(crate) const FIELD_ENQUEUED_AT: &str = "qat";
pub(crate) const FIELD_RUN_AT: &str = "pat";

/// One enqueued job, as stored in the `jobs:<uuid>` hash.
///
/// The record is written once by the manager and never mutated; a worker
/// only ever reads `cls` and `arg` back out of it.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Queue name the job was enqueued into.
    pub queue: String,
    /// Class identifier resolved through the job registry.
    pub class: String,
    /// Serialized argument payload (JSON).
    pub args: String,
    /// Enqueue time, ms since epoch.
    pub enqueued_at_ms: i64,
    /// Scheduled run time, ms since epoch. Absent for immediate jobs.
    pub run_at_ms: Option<i64>,
}

impl JobRecord {
    pub(crate) fn new<T: Serialize>(
        queue: impl Into<String>,
        job: &T,
        run_at_ms: Option<i64>,
    ) -> Result<Self, OnyxError> {
        Ok(Self {
            queue: queue.into(),
            class: type_name::<T>().to_string(),
            args: serde_json::to_string(job)?,
            enqueued_at_ms: chrono::Utc::now().timestamp_millis(),
            run_at_ms,
        })
    }

    /// Hash field pairs in write order.
    pub(crate) fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (FIELD_QUEUE, self.queue.clone()),
            (FIELD_CLASS, self.class.clone()),
            (FIELD_ARGS, self.args.clone()),
            (FIELD_ENQUEUED_AT, self.enqueued_at_ms.to_string()),
        ];
        if let Some(run_at_ms) = self.run_at_ms {
            fields.push((FIELD_RUN_AT, run_at_ms.to_string()));
        }
        fields
    }

    /// Decodes a `HGETALL` reply. Returns `None` when required fields are
    /// missing (an empty reply, or a record caught mid-write).
    pub(crate) fn from_hash(hash: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            queue: hash.get(FIELD_QUEUE)?.clone(),
            class: hash.get(FIELD_CLASS)?.clone(),
            args: hash.get(FIELD_ARGS)?.clone(),
            enqueued_at_ms: hash.get(FIELD_ENQUEUED_AT)?.parse().ok()?,
            run_at_ms: match hash.get(FIELD_RUN_AT) {
                Some(raw) => Some(raw.parse().ok()?),
                None => None,
            },
        })
    }
}
