// src/handlers/proctor.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::proctoring::{
        ProctorLog, ProctoringAlert, ProctoringSession, RecordViolationRequest, ReviewLogRequest,
    },
    services::proctor,
    state::AppState,
    utils::jwt::Claims,
};

/// Ingests a violation event reported over HTTP. The WebSocket channel
/// feeds the same service.
pub async fn record_violation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<RecordViolationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let log = proctor::record_violation(&state, &claims, payload).await?;
    Ok((StatusCode::CREATED, Json(log)))
}

pub async fn get_session(
    State(pool): State<PgPool>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session: ProctoringSession =
        sqlx::query_as("SELECT * FROM proctoring_sessions WHERE attempt_id = $1")
            .bind(attempt_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No proctoring session for attempt {}", attempt_id))
            })?;
    Ok(Json(session))
}

pub async fn list_logs(
    State(pool): State<PgPool>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let logs: Vec<ProctorLog> = sqlx::query_as(
        "SELECT * FROM proctor_logs WHERE attempt_id = $1 ORDER BY timestamp",
    )
    .bind(attempt_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(logs))
}

/// Attaches a review decision to a log entry — the only mutation the
/// append-only log permits, and it is applied once.
pub async fn review_log(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(log_id): Path<Uuid>,
    Json(payload): Json<ReviewLogRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let reviewer = claims.principal_id()?;

    let updated = sqlx::query_as::<_, ProctorLog>(
        "UPDATE proctor_logs
         SET reviewed = true, reviewed_by = $2, reviewed_at = $3,
             review_decision = $4, review_notes = $5
         WHERE id = $1 AND NOT reviewed
         RETURNING *",
    )
    .bind(log_id)
    .bind(reviewer)
    .bind(Utc::now())
    .bind(payload.decision)
    .bind(payload.notes.as_deref())
    .fetch_optional(&pool)
    .await?;

    match updated {
        Some(log) => Ok(Json(log)),
        None => {
            // Distinguish missing from already-reviewed for the client.
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM proctor_logs WHERE id = $1")
                    .bind(log_id)
                    .fetch_optional(&pool)
                    .await?;
            if exists.is_some() {
                Err(AppError::Conflict(
                    "Log entry has already been reviewed".to_string(),
                ))
            } else {
                Err(AppError::NotFound(format!("Log entry {} not found", log_id)))
            }
        }
    }
}

pub async fn list_alerts(
    State(pool): State<PgPool>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let alerts: Vec<ProctoringAlert> = sqlx::query_as(
        "SELECT * FROM proctoring_alerts WHERE exam_id = $1 ORDER BY created_at DESC",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(alerts))
}

pub async fn resolve_alert(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(alert_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let resolver = claims.principal_id()?;
    let alert = sqlx::query_as::<_, ProctoringAlert>(
        "UPDATE proctoring_alerts
         SET is_resolved = true, resolved_by = $2, resolved_at = $3
         WHERE id = $1
         RETURNING *",
    )
    .bind(alert_id)
    .bind(resolver)
    .bind(Utc::now())
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Alert {} not found", alert_id)))?;
    Ok(Json(alert))
}
