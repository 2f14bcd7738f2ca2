// src/handlers/attempt.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::attempt::{Attempt, AutosaveRequest, Response, SubmitReason},
    models::question::StudentQuestion,
    services::session,
    state::AppState,
    utils::jwt::Claims,
};

async fn fetch_attempt(pool: &PgPool, attempt_id: Uuid) -> Result<Attempt, AppError> {
    sqlx::query_as::<_, Attempt>("SELECT * FROM attempts WHERE id = $1")
        .bind(attempt_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt_id)))
}

fn ensure_owner_or_staff(attempt: &Attempt, claims: &Claims) -> Result<(), AppError> {
    if claims.is_staff() || attempt.student_id == claims.principal_id()? {
        return Ok(());
    }
    Err(AppError::Unauthorized(
        "Attempt belongs to another student".to_string(),
    ))
}

/// Joins an exam, creating (or resuming) the student's attempt.
pub async fn join(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !claims.is_student() {
        return Err(AppError::Unauthorized(
            "Only students may join an exam".to_string(),
        ));
    }
    let outcome = session::join(&state, exam_id, &claims).await?;
    let status = if outcome.resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

pub async fn get_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = fetch_attempt(&pool, attempt_id).await?;
    ensure_owner_or_staff(&attempt, &claims)?;

    let responses: Vec<Response> = sqlx::query_as(
        "SELECT * FROM responses WHERE attempt_id = $1 ORDER BY exam_question_id",
    )
    .bind(attempt_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "attempt": attempt,
        "responses": responses,
    })))
}

/// The exam paper as served to the student: questions without answer keys.
pub async fn list_questions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = fetch_attempt(&pool, attempt_id).await?;
    ensure_owner_or_staff(&attempt, &claims)?;

    let questions: Vec<StudentQuestion> = sqlx::query_as(
        "SELECT id, order_index, marks, is_mandatory, kind, question_text
         FROM exam_questions WHERE exam_id = $1
         ORDER BY order_index",
    )
    .bind(attempt.exam_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(questions))
}

pub async fn autosave(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<AutosaveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = session::autosave(&state, attempt_id, &claims, payload).await?;
    Ok(Json(response))
}

/// Manual submit by the student. Duplicate submits racing the timer are
/// answered identically with the recorded outcome.
pub async fn submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.principal_id()?;
    let outcome = session::submit(
        &state,
        attempt_id,
        SubmitReason::Manual,
        Some(student_id),
    )
    .await?;
    Ok(Json(outcome))
}
