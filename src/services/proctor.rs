// src/services/proctor.rs

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::attempt::{Attempt, SubmitReason},
    models::proctoring::{
        ProctorLog, ProctoringSession, RecordViolationRequest, RiskLevel, ViolationType,
    },
    realtime::WsMessage,
    services::{lifecycle, notify, notify::NotificationJob, session},
    state::AppState,
    utils::jwt::Claims,
};

/// Ingests one violation event.
///
/// The log append is never rejected — events on an already-submitted attempt
/// are recorded for post-hoc audit without touching the finalized risk
/// score. For open attempts the log insert and the session update commit as
/// one transaction under a per-attempt row lock, so concurrent events from
/// different channels cannot lose increments. Alerting and auto-actions run
/// after the commit and are best-effort.
pub async fn record_violation(
    state: &AppState,
    claims: &Claims,
    req: RecordViolationRequest,
) -> Result<ProctorLog, AppError> {
    req.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    let principal = claims.principal_id()?;

    let attempt = sqlx::query_as::<_, Attempt>("SELECT * FROM attempts WHERE id = $1")
        .bind(req.attempt_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", req.attempt_id)))?;

    // A student's monitor may only report on its own attempt.
    if claims.is_student() && attempt.student_id != principal {
        return Err(AppError::Unauthorized(
            "Attempt belongs to another student".to_string(),
        ));
    }

    let now = Utc::now();
    let time_into_exam = (now - attempt.started_at).num_seconds().max(0);

    let mut tx = state.pool.begin().await?;
    let log = sqlx::query_as::<_, ProctorLog>(
        "INSERT INTO proctor_logs
             (id, attempt_id, student_id, violation_type, severity, exam_question_id,
              time_into_exam_seconds, detection_method, confidence_score, event_data, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(attempt.id)
    .bind(attempt.student_id)
    .bind(req.violation_type)
    .bind(req.severity)
    .bind(req.exam_question_id)
    .bind(time_into_exam)
    .bind(req.detection_method.as_deref())
    .bind(req.confidence_score)
    .bind(&req.event_data)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    if attempt.is_submitted {
        tx.commit().await?;
        tracing::debug!(
            "violation on submitted attempt {} recorded for audit only",
            attempt.id
        );
        return Ok(log);
    }

    // Row lock serializes all risk updates for this attempt; counters stay
    // in lockstep with the log insert above.
    let mut proctoring = sqlx::query_as::<_, ProctoringSession>(
        "SELECT * FROM proctoring_sessions WHERE attempt_id = $1 FOR UPDATE",
    )
    .bind(attempt.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| {
        AppError::InternalServerError(format!(
            "Missing proctoring session for attempt {}",
            attempt.id
        ))
    })?;

    let change = proctoring.apply_violation(req.violation_type, req.severity, &state.config.risk_weights);

    // Derived from the locked session row, so racing events cannot both
    // observe the pre-flag state and double-fire the alert.
    let newly_flagged = !proctoring.manual_review_required
        && (proctoring.tab_switches >= state.config.max_tab_switches
            || proctoring.total_violations >= state.config.suspicious_activity_threshold);
    if newly_flagged {
        proctoring.manual_review_required = true;
    }

    sqlx::query(
        "UPDATE proctoring_sessions
         SET total_violations = $2, risk_score = $3, risk_level = $4,
             tab_switches = $5, copy_paste_attempts = $6, right_clicks = $7,
             fullscreen_exits = $8, face_violations = $9,
             manual_review_required = $10, updated_at = now()
         WHERE id = $1",
    )
    .bind(proctoring.id)
    .bind(proctoring.total_violations)
    .bind(proctoring.risk_score)
    .bind(proctoring.risk_level)
    .bind(proctoring.tab_switches)
    .bind(proctoring.copy_paste_attempts)
    .bind(proctoring.right_clicks)
    .bind(proctoring.fullscreen_exits)
    .bind(proctoring.face_violations)
    .bind(proctoring.manual_review_required)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE attempts
         SET violations_count = $2, risk_score = $3,
             flagged_for_review = flagged_for_review OR $4, updated_at = now()
         WHERE id = $1",
    )
    .bind(attempt.id)
    .bind(proctoring.total_violations)
    .bind(proctoring.risk_score)
    .bind(newly_flagged)
    .execute(&mut *tx)
    .await?;

    // The risk update is durable from here on; nothing below may undo it.
    tx.commit().await?;

    if change.crossed(state.config.high_risk_alert_threshold) {
        raise_alert(
            state,
            &attempt,
            "high_risk_behavior",
            format!(
                "Risk score reached {:.0} ({:?})",
                proctoring.risk_score, proctoring.risk_level
            ),
            proctoring.risk_level,
            req.violation_type,
        )
        .await;
    }

    if newly_flagged {
        tracing::warn!(
            "attempt {} flagged for review after {} violations",
            attempt.id,
            proctoring.total_violations
        );
        raise_alert(
            state,
            &attempt,
            "flagged_for_review",
            format!(
                "Attempt flagged for review after {} violations",
                proctoring.total_violations
            ),
            RiskLevel::High,
            req.violation_type,
        )
        .await;

        let exam = lifecycle::fetch_exam(&state.pool, attempt.exam_id).await?;
        if exam.auto_submit_on_flag {
            // The violation-ceiling path is the only caller permitted to
            // submit with reason `disqualified`.
            if let Err(e) =
                session::submit(state, attempt.id, SubmitReason::Disqualified, None).await
            {
                tracing::error!(
                    "auto-disqualification failed for attempt {}: {}",
                    attempt.id,
                    e
                );
            }
        }
    }

    Ok(log)
}

/// Persists and fans out a proctoring alert. Best-effort on every leg:
/// a failure is logged and never propagated to the ingestion caller.
async fn raise_alert(
    state: &AppState,
    attempt: &Attempt,
    alert_type: &str,
    message: String,
    severity: RiskLevel,
    violation: ViolationType,
) {
    if let Err(e) = sqlx::query(
        "INSERT INTO proctoring_alerts (id, exam_id, student_id, alert_type, message, severity)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(attempt.exam_id)
    .bind(attempt.student_id)
    .bind(alert_type)
    .bind(&message)
    .bind(severity)
    .execute(&state.pool)
    .await
    {
        tracing::warn!("failed to persist proctoring alert: {}", e);
    }

    state
        .dispatcher
        .broadcast(
            attempt.exam_id,
            WsMessage::AntiCheatAlert {
                student_id: attempt.student_id,
                violation_type: violation,
                severity,
            },
        )
        .await;

    notify::enqueue(
        state.notifier.clone(),
        NotificationJob::ViolationDigest {
            exam_id: attempt.exam_id,
            student_id: attempt.student_id,
            message,
        },
    );
}
