// src/models/exam.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Exam lifecycle status. Transitions are monotonic forward; the `locked`
/// flag on the exam row is orthogonal and freezes all further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "exam_status", rename_all = "snake_case")]
pub enum ExamStatus {
    Draft,
    Published,
    Started,
    Ended,
    ResultsPublished,
}

impl ExamStatus {
    /// Whether `next` is the single legal forward step from `self`.
    pub fn can_advance_to(self, next: ExamStatus) -> bool {
        matches!(
            (self, next),
            (ExamStatus::Draft, ExamStatus::Published)
                | (ExamStatus::Published, ExamStatus::Started)
                | (ExamStatus::Started, ExamStatus::Ended)
                | (ExamStatus::Ended, ExamStatus::ResultsPublished)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExamStatus::Draft => "draft",
            ExamStatus::Published => "published",
            ExamStatus::Started => "started",
            ExamStatus::Ended => "ended",
            ExamStatus::ResultsPublished => "results_published",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "exam_type", rename_all = "snake_case")]
pub enum ExamType {
    Ia1,
    Ia2,
    Assignment,
    Quiz,
    Practice,
    Final,
}

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub course_id: Uuid,
    pub created_by: Uuid,

    pub title: String,
    pub description: Option<String>,

    pub exam_type: ExamType,
    pub duration_minutes: i64,
    pub total_marks: f64,
    pub passing_marks: Option<f64>,

    /// Scheduled start. `start` refuses to run before this when set.
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,

    /// Seconds after `start_at` during which new attempts may still begin.
    /// Only meaningful while status = started.
    pub join_window_seconds: i64,

    pub status: ExamStatus,
    pub enable_proctoring: bool,

    /// When true, an attempt that trips the violation ceiling is
    /// force-submitted with reason `disqualified` instead of only flagged.
    pub auto_submit_on_flag: bool,

    // Lock-in policy: settable from any state by an authorized actor.
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<Uuid>,
    pub lock_reason: Option<String>,

    pub published_at: Option<DateTime<Utc>>,
    pub results_published_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Exam {
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    pub fn ensure_unlocked(&self) -> Result<(), AppError> {
        if self.is_locked() {
            return Err(AppError::InvalidTransition(format!(
                "Exam '{}' is locked: {}",
                self.title,
                self.lock_reason.as_deref().unwrap_or("no reason recorded")
            )));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes)
    }

    /// Last instant at which a new attempt may be created, when scheduled.
    pub fn join_deadline(&self) -> Option<DateTime<Utc>> {
        self.start_at
            .map(|start| start + Duration::seconds(self.join_window_seconds))
    }

    /// Joinability predicate: new attempts are accepted only while the exam
    /// is started and the join window has not elapsed. A closed window is a
    /// distinct, retryable-looking condition — existing attempts continue.
    pub fn ensure_joinable(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        match self.status {
            ExamStatus::Started => {}
            ExamStatus::Draft | ExamStatus::Published => {
                return Err(AppError::InvalidTransition(format!(
                    "Exam '{}' has not started",
                    self.title
                )));
            }
            ExamStatus::Ended | ExamStatus::ResultsPublished => {
                return Err(AppError::JoinWindowClosed(format!(
                    "Exam '{}' has ended",
                    self.title
                )));
            }
        }

        if let Some(deadline) = self.join_deadline() {
            if now > deadline {
                return Err(AppError::JoinWindowClosed(format!(
                    "Join window closed at {}",
                    deadline.format("%H:%M:%S")
                )));
            }
        }

        Ok(())
    }
}

/// DTO for creating a new exam (draft).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    pub course_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub exam_type: ExamType,
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: i64,
    pub passing_marks: Option<f64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub join_window_seconds: Option<i64>,
    pub enable_proctoring: Option<bool>,
    pub auto_submit_on_flag: Option<bool>,
}

/// DTO for locking an exam.
#[derive(Debug, Deserialize, Validate)]
pub struct LockExamRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}
