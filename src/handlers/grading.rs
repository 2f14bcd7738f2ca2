// src/handlers/grading.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::attempt::OverrideGradeRequest,
    models::audit::GradingAuditLog,
    services::grading,
    state::AppState,
    utils::jwt::Claims,
};

/// Human override of a response's awarded marks; the audit ledger entry is
/// written before the score changes.
pub async fn override_grade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(response_id): Path<Uuid>,
    Json(payload): Json<OverrideGradeRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let actor = claims.principal_id()?;
    let response = grading::override_response(&state, response_id, actor, &payload).await?;
    Ok(Json(response))
}

/// The full grading history of one response, oldest first.
pub async fn list_audit(
    State(pool): State<PgPool>,
    Path(response_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let entries: Vec<GradingAuditLog> = sqlx::query_as(
        "SELECT * FROM grading_audit_logs WHERE response_id = $1 ORDER BY timestamp",
    )
    .bind(response_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(entries))
}
