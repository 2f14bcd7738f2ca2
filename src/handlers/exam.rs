// src/handlers/exam.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, types::Json as SqlJson};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::attempt::Attempt,
    models::exam::{CreateExamRequest, Exam, ExamStatus, LockExamRequest},
    models::question::{AttachQuestionRequest, ExamQuestion},
    services::lifecycle,
    state::AppState,
    utils::jwt::Claims,
};

/// Creates a draft exam. Teacher/HOD only; the role check lives here because
/// the list route shares this path.
pub async fn create_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !claims.is_staff() {
        return Err(AppError::Unauthorized(
            "Only teachers may create exams".to_string(),
        ));
    }
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let actor = claims.principal_id()?;

    let exam = sqlx::query_as::<_, Exam>(
        "INSERT INTO exams
             (id, course_id, created_by, title, description, exam_type, duration_minutes,
              start_at, end_at, join_window_seconds, passing_marks,
              enable_proctoring, auto_submit_on_flag)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(payload.course_id)
    .bind(actor)
    .bind(&payload.title)
    .bind(payload.description.as_deref())
    .bind(payload.exam_type)
    .bind(payload.duration_minutes)
    .bind(payload.start_at)
    .bind(payload.end_at)
    .bind(
        payload
            .join_window_seconds
            .unwrap_or(state.config.default_join_window_seconds),
    )
    .bind(payload.passing_marks)
    .bind(payload.enable_proctoring.unwrap_or(true))
    .bind(payload.auto_submit_on_flag.unwrap_or(false))
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(exam)))
}

/// Lists exams. Students only see exams past the draft stage.
pub async fn list_exams(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let mut builder =
        sqlx::QueryBuilder::<Postgres>::new("SELECT * FROM exams");
    if !claims.is_staff() {
        builder.push(" WHERE status != ").push_bind(ExamStatus::Draft);
    }
    builder.push(" ORDER BY created_at DESC");

    let exams: Vec<Exam> = builder.build_query_as().fetch_all(&pool).await?;
    Ok(Json(exams))
}

pub async fn get_exam(
    State(pool): State<PgPool>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = lifecycle::fetch_exam(&pool, exam_id).await?;
    Ok(Json(exam))
}

/// Attaches a question to a draft exam. The answer key must match the
/// question kind; unknown combinations fail closed.
pub async fn attach_question(
    State(pool): State<PgPool>,
    Path(exam_id): Path<Uuid>,
    Json(payload): Json<AttachQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    if !payload.key_matches_kind() {
        return Err(AppError::UnsupportedQuestionType(format!(
            "Answer key does not fit question kind {:?}",
            payload.kind
        )));
    }

    let exam = lifecycle::fetch_exam(&pool, exam_id).await?;
    exam.ensure_unlocked()?;
    if exam.status != ExamStatus::Draft {
        return Err(AppError::InvalidTransition(
            "Questions can only be attached while the exam is a draft".to_string(),
        ));
    }

    let question = sqlx::query_as::<_, ExamQuestion>(
        "INSERT INTO exam_questions
             (exam_id, order_index, marks, is_mandatory, kind, question_text, answer_key)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(exam_id)
    .bind(payload.order_index)
    .bind(payload.marks)
    .bind(payload.is_mandatory.unwrap_or(true))
    .bind(payload.kind)
    .bind(&payload.question_text)
    .bind(SqlJson(payload.answer_key.clone()))
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(question)))
}

/// Full question list including answer keys. Staff only.
pub async fn list_questions(
    State(pool): State<PgPool>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let questions: Vec<ExamQuestion> = sqlx::query_as(
        "SELECT * FROM exam_questions WHERE exam_id = $1 ORDER BY order_index",
    )
    .bind(exam_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(questions))
}

pub async fn list_attempts(
    State(pool): State<PgPool>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let attempts: Vec<Attempt> =
        sqlx::query_as("SELECT * FROM attempts WHERE exam_id = $1 ORDER BY started_at")
            .bind(exam_id)
            .fetch_all(&pool)
            .await?;
    Ok(Json(attempts))
}

pub async fn publish_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = lifecycle::publish(&state, exam_id, claims.principal_id()?).await?;
    Ok(Json(exam))
}

pub async fn start_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = lifecycle::start(&state, exam_id, claims.principal_id()?).await?;
    Ok(Json(exam))
}

pub async fn end_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = lifecycle::end(&state, exam_id, Some(claims.principal_id()?)).await?;
    Ok(Json(exam))
}

pub async fn publish_results_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = lifecycle::publish_results(&state, exam_id, claims.principal_id()?).await?;
    Ok(Json(exam))
}

pub async fn lock_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
    Json(payload): Json<LockExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let exam = lifecycle::lock(&state, exam_id, claims.principal_id()?, &payload.reason).await?;
    Ok(Json(exam))
}
