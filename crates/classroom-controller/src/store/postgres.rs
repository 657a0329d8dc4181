//! Postgres-backed activity log.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Participant names are not logged

use super::{ActivityLog, AnswerRecord, FocusEvent};
use crate::errors::CcError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{FocusKind, RoomCode};
use sqlx::PgPool;
use tracing::instrument;

/// Activity log stored in the `activity_logs` and `quiz_responses` tables.
#[derive(Debug, Clone)]
pub struct PgActivityLog {
    pool: PgPool,
}

impl PgActivityLog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FocusRow {
    student_name: String,
    event_type: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AnswerRow {
    student_name: String,
    topic_id: i32,
    question: String,
    answer_given: String,
    is_correct: bool,
    submitted_at: DateTime<Utc>,
}

#[async_trait]
impl ActivityLog for PgActivityLog {
    #[instrument(skip_all, name = "cc.store.append_focus", fields(room = %code))]
    async fn append_focus(&self, code: &RoomCode, event: &FocusEvent) -> Result<(), CcError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (session_code, student_name, event_type, timestamp)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(code.as_str())
        .bind(&event.participant)
        .bind(event.kind.as_str())
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| CcError::Database(format!("Failed to append focus event: {e}")))?;

        Ok(())
    }

    #[instrument(skip_all, name = "cc.store.append_answer", fields(room = %code, topic_id = record.topic_id))]
    async fn append_answer(&self, code: &RoomCode, record: &AnswerRecord) -> Result<(), CcError> {
        let topic_id = i32::try_from(record.topic_id)
            .map_err(|_| CcError::Internal(format!("topic id {} out of range", record.topic_id)))?;

        sqlx::query(
            r#"
            INSERT INTO quiz_responses
                (session_code, student_name, topic_id, question, answer_given, is_correct, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(code.as_str())
        .bind(&record.participant)
        .bind(topic_id)
        .bind(&record.question)
        .bind(&record.answer_given)
        .bind(record.is_correct)
        .bind(record.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CcError::Database(format!("Failed to append quiz response: {e}")))?;

        Ok(())
    }

    #[instrument(skip_all, name = "cc.store.focus_events", fields(room = %code))]
    async fn focus_events(&self, code: &RoomCode) -> Result<Vec<FocusEvent>, CcError> {
        let rows: Vec<FocusRow> = sqlx::query_as(
            r#"
            SELECT student_name, event_type, timestamp
            FROM activity_logs
            WHERE session_code = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CcError::Database(format!("Failed to fetch focus events: {e}")))?;

        // Rows with an unknown event type were written by something else; skip them.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let kind = row.event_type.parse::<FocusKind>().ok()?;
                Some(FocusEvent {
                    participant: row.student_name,
                    kind,
                    timestamp: row.timestamp,
                })
            })
            .collect())
    }

    #[instrument(skip_all, name = "cc.store.answers", fields(room = %code))]
    async fn answers(&self, code: &RoomCode) -> Result<Vec<AnswerRecord>, CcError> {
        let rows: Vec<AnswerRow> = sqlx::query_as(
            r#"
            SELECT student_name, topic_id, question, answer_given, is_correct, submitted_at
            FROM quiz_responses
            WHERE session_code = $1
            ORDER BY submitted_at ASC, id ASC
            "#,
        )
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CcError::Database(format!("Failed to fetch quiz responses: {e}")))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(AnswerRecord {
                    participant: row.student_name,
                    topic_id: u32::try_from(row.topic_id).ok()?,
                    question: row.question,
                    answer_given: row.answer_given,
                    is_correct: row.is_correct,
                    submitted_at: row.submitted_at,
                })
            })
            .collect())
    }
}
