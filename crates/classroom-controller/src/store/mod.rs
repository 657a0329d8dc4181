//! Durable activity log.
//!
//! Append-only rows for focus transitions and quiz submissions, queried by
//! room code. The end-of-class report is computed only from this log.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryActivityLog;
pub use postgres::PgActivityLog;

use crate::errors::CcError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{FocusKind, RoomCode};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One attention transition for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FocusEvent {
    pub participant: String,
    pub kind: FocusKind,
    pub timestamp: DateTime<Utc>,
}

/// One quiz submission, graded at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerRecord {
    pub participant: String,
    pub topic_id: u32,
    pub question: String,
    pub answer_given: String,
    pub is_correct: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Append/query interface of the durable log store.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append_focus(&self, code: &RoomCode, event: &FocusEvent) -> Result<(), CcError>;

    async fn append_answer(&self, code: &RoomCode, record: &AnswerRecord) -> Result<(), CcError>;

    /// Focus events for a room, oldest first.
    async fn focus_events(&self, code: &RoomCode) -> Result<Vec<FocusEvent>, CcError>;

    /// Answer records for a room, oldest first.
    async fn answers(&self, code: &RoomCode) -> Result<Vec<AnswerRecord>, CcError>;
}

/// Retry schedule for log appends: exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `op` until it succeeds or retries are exhausted.
    ///
    /// # Errors
    ///
    /// Returns the last error once every attempt has failed.
    pub async fn run<F, Fut>(&self, what: &'static str, mut op: F) -> Result<(), CcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), CcError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    let base = self.backoff(attempt);
                    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() / 10);
                    let delay = base + Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0));
                    warn!(
                        target: "cc.store",
                        operation = what,
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Log append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Append a focus event, retrying per `retry`.
///
/// # Errors
///
/// Returns the last store error once retries are exhausted.
pub async fn append_focus_with_retry(
    log: &Arc<dyn ActivityLog>,
    retry: RetryPolicy,
    code: &RoomCode,
    event: &FocusEvent,
) -> Result<(), CcError> {
    let result = retry
        .run("append_focus", || {
            let log = Arc::clone(log);
            let code = code.clone();
            let event = event.clone();
            async move { log.append_focus(&code, &event).await }
        })
        .await;
    record_log_append("activity_logs", result.is_ok());
    result
}

/// Append a quiz submission, retrying per `retry`.
///
/// # Errors
///
/// Returns the last store error once retries are exhausted.
pub async fn append_answer_with_retry(
    log: &Arc<dyn ActivityLog>,
    retry: RetryPolicy,
    code: &RoomCode,
    record: &AnswerRecord,
) -> Result<(), CcError> {
    let result = retry
        .run("append_answer", || {
            let log = Arc::clone(log);
            let code = code.clone();
            let record = record.clone();
            async move { log.append_answer(&code, &record).await }
        })
        .await;
    record_log_append("quiz_responses", result.is_ok());
    result
}

fn record_log_append(table: &str, ok: bool) {
    crate::observability::metrics::record_log_append(table, if ok { "success" } else { "error" });
}
