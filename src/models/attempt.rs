// src/models/attempt.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::question::AnswerPayload;

/// Why an attempt was submitted. Only the integrity monitor may submit with
/// `Disqualified`; the timer sweep submits with `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    Timeout,
    Disqualified,
}

/// Represents the 'attempts' table: one student's timed run at one exam.
///
/// Exactly one unsubmitted attempt may exist per (exam, student); the
/// database enforces this with a partial unique index.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,

    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: i64,

    pub total_score: f64,
    pub max_possible_score: f64,
    pub percentage: Option<f64>,
    pub grade: Option<String>,

    pub is_submitted: bool,
    pub is_graded: bool,
    pub auto_submitted: bool,

    // Proctoring rollup, mirrored from the proctoring session.
    pub violations_count: i64,
    pub risk_score: f64,
    pub flagged_for_review: bool,

    pub graded_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn ensure_open(&self) -> Result<(), AppError> {
        if self.is_submitted {
            return Err(AppError::AttemptClosed(
                "Attempt has already been submitted".to_string(),
            ));
        }
        Ok(())
    }
}

/// Instant past which an unsubmitted attempt is overdue and eligible for a
/// forced timeout submit. The buffer absorbs network/autosave latency so a
/// last-second answer is not silently dropped.
pub fn submission_deadline(
    started_at: DateTime<Utc>,
    duration_minutes: i64,
    timeout_buffer_seconds: i64,
) -> DateTime<Utc> {
    started_at + Duration::minutes(duration_minutes) + Duration::seconds(timeout_buffer_seconds)
}

/// Time spent, clamped so it never exceeds the exam's duration plus the
/// clock-skew tolerance.
pub fn clamp_time_spent(
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    duration_minutes: i64,
    skew_tolerance_seconds: i64,
) -> i64 {
    let elapsed = (now - started_at).num_seconds().max(0);
    elapsed.min(duration_minutes * 60 + skew_tolerance_seconds)
}

/// Represents the 'responses' table: a student's (possibly in-progress)
/// answer to one exam question.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub exam_question_id: i64,

    pub answer: Json<AnswerPayload>,

    /// Server-assigned; non-decreasing per (attempt, question).
    pub saved_at: DateTime<Utc>,
    pub is_final: bool,

    pub awarded_marks: f64,
    pub is_correct: Option<bool>,
    pub is_graded: bool,

    pub ai_score: Option<f64>,
    pub ai_feedback: Option<String>,
    pub teacher_override: bool,
    pub teacher_feedback: Option<String>,

    pub time_spent_seconds: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// DTO for an autosave write.
///
/// `observed_saved_at` is the `saved_at` the client last saw for this
/// question (absent on first save). Last-writer-wins is keyed by
/// server-observed time, never client time.
#[derive(Debug, Deserialize)]
pub struct AutosaveRequest {
    pub exam_question_id: i64,
    pub answer: AnswerPayload,
    pub observed_saved_at: Option<DateTime<Utc>>,
}

/// DTO for a human grading override on one response.
#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct OverrideGradeRequest {
    pub marks: f64,
    #[validate(length(max = 5000))]
    pub feedback: Option<String>,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

/// Summary returned after a submit, echoing the idempotent outcome.
#[derive(Debug, Serialize)]
pub struct SubmitOutcome {
    pub attempt_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub auto_submitted: bool,
    /// False when the attempt had already been submitted and this call was
    /// a no-op.
    pub newly_submitted: bool,
}
