// src/models/proctoring.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::config::RiskWeights;

/// Integrity-policy breach categories reported by the client-side monitor.
/// The engine consumes an already-computed classification; it never runs
/// detection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "violation_type", rename_all = "snake_case")]
pub enum ViolationType {
    TabSwitch,
    CopyPaste,
    RightClick,
    FullscreenExit,
    MultipleFaces,
    NoFaceDetected,
    SuspiciousMovement,
    ExternalDevice,
    NetworkChange,
    BrowserResize,
    MobileDeviceDetected,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "risk_level", rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Fixed score bands: <25 low, <50 medium, <75 high, else critical.
    pub fn from_score(score: f64) -> RiskLevel {
        if score < 25.0 {
            RiskLevel::Low
        } else if score < 50.0 {
            RiskLevel::Medium
        } else if score < 75.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Staff decision attached to a reviewed proctor log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "review_decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Ignore,
    Warning,
    Penalty,
    Disqualify,
}

/// Represents the 'proctor_logs' table. Append-only: rows are never mutated
/// except to attach a review decision.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProctorLog {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub student_id: Uuid,

    pub violation_type: ViolationType,
    pub severity: RiskLevel,

    /// Question being answered when the violation occurred, when known.
    pub exam_question_id: Option<i64>,
    pub time_into_exam_seconds: Option<i64>,

    // Detection metadata from the external detector.
    pub detection_method: Option<String>,
    pub confidence_score: Option<f64>,
    pub event_data: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,

    // Review state.
    pub reviewed: bool,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_decision: Option<ReviewDecision>,
    pub review_notes: Option<String>,
}

/// Represents the 'proctoring_sessions' table: the per-attempt risk
/// aggregate, 1:1 with an attempt and mutated only by the integrity monitor.
///
/// `total_violations` must equal the count of proctor_logs rows for the
/// attempt at all times; counters are updated in lockstep with log inserts
/// under a row lock.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProctoringSession {
    pub id: Uuid,
    pub attempt_id: Uuid,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,

    pub total_violations: i64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,

    // Violation breakdown by category.
    pub tab_switches: i64,
    pub copy_paste_attempts: i64,
    pub right_clicks: i64,
    pub fullscreen_exits: i64,
    pub face_violations: i64,

    pub manual_review_required: bool,
    pub reviewed: bool,
    pub final_decision: Option<String>,

    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome of folding one violation into a session: the score/level movement
/// needed for threshold-crossing decisions downstream.
#[derive(Debug, Clone, Copy)]
pub struct RiskChange {
    pub previous_score: f64,
    pub score: f64,
    pub previous_level: RiskLevel,
    pub level: RiskLevel,
}

impl RiskChange {
    /// True exactly when this update moved the score from below `threshold`
    /// to at or above it. With the cap in place, repeated events at the cap
    /// never re-cross.
    pub fn crossed(&self, threshold: f64) -> bool {
        self.previous_score < threshold && self.score >= threshold
    }
}

impl ProctoringSession {
    /// Folds one violation into the aggregate: bumps the matching category
    /// counter and total, then recomputes score and level.
    ///
    /// The score is a monotonic weighted sum capped at `weights.score_cap`;
    /// violations never reduce it.
    pub fn apply_violation(
        &mut self,
        violation: ViolationType,
        severity: RiskLevel,
        weights: &RiskWeights,
    ) -> RiskChange {
        match violation {
            ViolationType::TabSwitch => self.tab_switches += 1,
            ViolationType::CopyPaste => self.copy_paste_attempts += 1,
            ViolationType::RightClick => self.right_clicks += 1,
            ViolationType::FullscreenExit => self.fullscreen_exits += 1,
            ViolationType::MultipleFaces | ViolationType::NoFaceDetected => {
                self.face_violations += 1
            }
            _ => {}
        }
        self.total_violations += 1;

        let previous_score = self.risk_score;
        let previous_level = self.risk_level;

        let gain = weights.weight(violation) * weights.multiplier(severity);
        self.risk_score = (self.risk_score + gain).min(weights.score_cap);
        self.risk_level = RiskLevel::from_score(self.risk_score);

        RiskChange {
            previous_score,
            score: self.risk_score,
            previous_level,
            level: self.risk_level,
        }
    }
}

/// Represents the 'proctoring_alerts' table: persisted alerts raised for
/// staff, in addition to the realtime broadcast.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProctoringAlert {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,

    pub alert_type: String,
    pub message: String,
    pub severity: RiskLevel,

    pub is_resolved: bool,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,

    pub created_at: Option<DateTime<Utc>>,
}

/// DTO for ingesting a violation event.
#[derive(Debug, Deserialize, Validate)]
pub struct RecordViolationRequest {
    pub attempt_id: Uuid,
    pub violation_type: ViolationType,
    pub severity: RiskLevel,
    pub exam_question_id: Option<i64>,
    #[validate(length(max = 100))]
    pub detection_method: Option<String>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_score: Option<f64>,
    pub event_data: Option<serde_json::Value>,
}

/// DTO for attaching a review decision to a proctor log entry.
#[derive(Debug, Deserialize, Validate)]
pub struct ReviewLogRequest {
    pub decision: ReviewDecision,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
}
