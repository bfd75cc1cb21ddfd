use crate::retry::{BackoffPolicy, JobOptions, Retention};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

/// A job as stored by a backend.
///
/// `attempts` counts leases handed out so far, so while a job is active it
/// is the number of the attempt in progress. It never exceeds
/// `max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    /// Wire name of the operation, e.g. `image:resize`
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: Retention,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be leased while waiting
    pub run_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        opts: JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            attempts: 0,
            max_attempts: opts.max_attempts.max(1),
            backoff: opts.backoff,
            retention: opts.retention,
            status: JobStatus::Waiting,
            created_at: now,
            run_at: now,
            finished_at: None,
            last_error: None,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Exclusive, time-bounded claim on an active job.
///
/// `token` fences the claim: once the lease expires and the job is handed
/// to someone else, ack/fail calls carrying the old token are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub job: JobRecord,
    pub token: String,
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Number of the attempt this lease represents (1 based)
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }
}

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying if attempts remain
    Retryable,
    /// Fail the job now regardless of remaining attempts
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Completed,
    /// The lease had already expired; nothing changed
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Requeued; eligible again after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// Terminal. The record is retained for inspection.
    Failed { attempt: u32 },
    /// The lease had already expired; nothing changed
    Stale,
}

impl FailOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
