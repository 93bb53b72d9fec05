use std::collections::HashMap;

use uuid::Uuid;

use crate::error::OnyxError;

/// Field names of the `attempts:<uuid>` hash.
pub(crate) const FIELD_STARTED_AT: &str = "sta";
pub(crate) const FIELD_JOB: &str = "job";
pub(crate) const FIELD_FIBER: &str = "wrk";
pub(crate) const FIELD_QUEUE: &str = "que";
pub(crate) const FIELD_FINISHED_AT: &str = "fin";
pub(crate) const FIELD_DURATION: &str = "tim";
pub(crate) const FIELD_ERROR: &str = "err";

/// Error kind written by the watcher when it reclaims a stale attempt.
pub const WORKER_TIMEOUT_ERROR: &str = "Worker Timeout";

/// One execution of a job by one worker fiber, as stored in the
/// `attempts:<uuid>` hash.
///
/// `sta`, `job`, `wrk` and `que` are written at creation; `fin`, `tim` and
/// `err` arrive on the terminal transition. A failed attempt without `fin`
/// was reclaimed by the watcher rather than reported by its fiber.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Wall-clock start, ms since epoch.
    pub started_at_ms: i64,
    /// UUID of the executed job.
    pub job_uuid: Uuid,
    /// Redis client id of the fiber connection that ran the attempt.
    pub fiber_client_id: u64,
    /// Queue the job was popped from.
    pub queue: String,
    /// Wall-clock end, ms since epoch. Absent while in flight and on
    /// watcher reclamation.
    pub finished_at_ms: Option<i64>,
    /// Monotonic duration in ms.
    pub duration_ms: Option<f64>,
    /// Error kind name. Absent on success.
    pub error: Option<String>,
}

impl AttemptRecord {
    /// Decodes a `HGETALL` reply. An empty reply decodes to no record; a
    /// reply missing creation-time fields is malformed.
    pub(crate) fn from_hash(
        hash: &HashMap<String, String>,
    ) -> Result<Option<Self>, OnyxError> {
        if hash.is_empty() {
            return Ok(None);
        }

        let required = |field: &str| {
            hash.get(field)
                .ok_or_else(|| OnyxError::MalformedAttempt(format!("missing field {field}")))
        };

        Ok(Some(Self {
            started_at_ms: parse_field(FIELD_STARTED_AT, required(FIELD_STARTED_AT)?)?,
            job_uuid: parse_field(FIELD_JOB, required(FIELD_JOB)?)?,
            fiber_client_id: parse_field(FIELD_FIBER, required(FIELD_FIBER)?)?,
            queue: required(FIELD_QUEUE)?.clone(),
            finished_at_ms: match hash.get(FIELD_FINISHED_AT) {
                Some(raw) => Some(parse_field(FIELD_FINISHED_AT, raw)?),
                None => None,
            },
            duration_ms: match hash.get(FIELD_DURATION) {
                Some(raw) => Some(parse_field(FIELD_DURATION, raw)?),
                None => None,
            },
            error: hash.get(FIELD_ERROR).cloned(),
        }))
    }

    /// True when the attempt finished without an error.
    pub fn succeeded(&self) -> bool {
        self.finished_at_ms.is_some() && self.error.is_none()
    }

    /// True when the watcher failed this attempt because its fiber
    /// connection disappeared. Reclaimed attempts carry `err` but no `fin`.
    pub fn reclaimed(&self) -> bool {
        self.error.is_some() && self.finished_at_ms.is_none()
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, OnyxError> {
    raw.parse()
        .map_err(|_| OnyxError::MalformedAttempt(format!("unparseable field {field}")))
}
