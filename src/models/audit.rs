// src/models/audit.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// Represents the 'exam_audit_logs' table: append-only record of every
/// lifecycle event (published, started, ended, results_published, locked)
/// with actor and reason. Never mutated or deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamAuditLog {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub actor_id: Option<Uuid>,

    pub event_type: String,
    pub description: String,

    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// Represents the 'grading_audit_logs' table: append-only ledger of every
/// change to a response's awarded marks. Inserted in the same transaction
/// as, and before, the live score mutation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GradingAuditLog {
    pub id: Uuid,
    pub response_id: Uuid,

    /// None for system actions (automatic grading at submit time).
    pub changed_by: Option<Uuid>,

    /// auto_graded, ai_graded or teacher_override.
    pub action: String,

    pub old_marks: Option<f64>,
    pub new_marks: f64,

    pub reason: Option<String>,
    pub feedback: Option<String>,

    pub timestamp: DateTime<Utc>,
}
