// src/services/session.rs

use chrono::Utc;
use serde::Serialize;
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::attempt::{
        Attempt, AutosaveRequest, Response, SubmitOutcome, SubmitReason, clamp_time_spent,
    },
    models::question::ExamQuestion,
    services::{grading, lifecycle},
    state::AppState,
    utils::jwt::Claims,
};

#[derive(Debug, Serialize)]
pub struct JoinOutcome {
    pub attempt: Attempt,
    /// True when an existing active attempt was returned instead of a new
    /// one being created.
    pub resumed: bool,
}

/// Creates (or resumes) the student's attempt at an exam.
///
/// Joinability is gated by the lifecycle controller; an unsubmitted attempt
/// is resumed rather than duplicated, and the partial unique index turns a
/// concurrent double-join into `AttemptAlreadyActive`.
pub async fn join(state: &AppState, exam_id: Uuid, claims: &Claims) -> Result<JoinOutcome, AppError> {
    let student_id = claims.principal_id()?;
    let exam = lifecycle::fetch_exam(&state.pool, exam_id).await?;
    let now = Utc::now();
    exam.ensure_joinable(now)?;

    if let Some(existing) = sqlx::query_as::<_, Attempt>(
        "SELECT * FROM attempts WHERE exam_id = $1 AND student_id = $2 AND NOT is_submitted",
    )
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(&state.pool)
    .await?
    {
        tracing::debug!("student {} resumed attempt {}", student_id, existing.id);
        return Ok(JoinOutcome {
            attempt: existing,
            resumed: true,
        });
    }

    let submitted_exists: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM attempts WHERE exam_id = $1 AND student_id = $2 AND is_submitted LIMIT 1",
    )
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(&state.pool)
    .await?;
    if submitted_exists.is_some() {
        return Err(AppError::Conflict(
            "Exam has already been attempted and submitted".to_string(),
        ));
    }

    let attempt_id = Uuid::new_v4();
    let mut tx = state.pool.begin().await?;
    let attempt = sqlx::query_as::<_, Attempt>(
        "INSERT INTO attempts (id, exam_id, student_id, started_at, max_possible_score)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(attempt_id)
    .bind(exam_id)
    .bind(student_id)
    .bind(now)
    .bind(exam.total_marks)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique") {
            AppError::AttemptAlreadyActive(
                "An attempt for this exam is already in progress".to_string(),
            )
        } else {
            AppError::from(e)
        }
    })?;

    // One proctoring session per attempt, created in the same transaction.
    sqlx::query(
        "INSERT INTO proctoring_sessions (id, attempt_id, started_at, is_active)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(attempt_id)
    .bind(now)
    .bind(exam.enable_proctoring)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(
        "student {} joined exam {} (attempt {})",
        student_id,
        exam_id,
        attempt_id
    );
    Ok(JoinOutcome {
        attempt,
        resumed: false,
    })
}

/// Upserts an in-progress answer.
///
/// `saved_at` is server-assigned and non-decreasing per (attempt, question);
/// a caller whose observed timestamp is older than the stored row gets
/// `StaleWrite` instead of clobbering the newer value. Row locks serialize
/// concurrent saves for the same question.
pub async fn autosave(
    state: &AppState,
    attempt_id: Uuid,
    claims: &Claims,
    req: AutosaveRequest,
) -> Result<Response, AppError> {
    let student_id = claims.principal_id()?;
    let now = Utc::now();

    let mut tx = state.pool.begin().await?;

    // Lock the attempt so a racing submit cannot finalize mid-save.
    let attempt = sqlx::query_as::<_, Attempt>("SELECT * FROM attempts WHERE id = $1 FOR UPDATE")
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt_id)))?;

    if attempt.student_id != student_id {
        return Err(AppError::Unauthorized(
            "Attempt belongs to another student".to_string(),
        ));
    }
    attempt.ensure_open()?;

    let question = sqlx::query_as::<_, ExamQuestion>(
        "SELECT * FROM exam_questions WHERE id = $1 AND exam_id = $2",
    )
    .bind(req.exam_question_id)
    .bind(attempt.exam_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Question is not part of this exam".to_string()))?;

    if !req.answer.matches_kind(question.kind) {
        return Err(AppError::BadRequest(
            "Answer payload does not match the question kind".to_string(),
        ));
    }

    let existing = sqlx::query_as::<_, Response>(
        "SELECT * FROM responses WHERE attempt_id = $1 AND exam_question_id = $2 FOR UPDATE",
    )
    .bind(attempt_id)
    .bind(req.exam_question_id)
    .fetch_optional(&mut *tx)
    .await?;

    let response = match existing {
        Some(current) => {
            if current.is_final {
                return Err(AppError::AttemptClosed(
                    "Response has been finalized; autosave rejected".to_string(),
                ));
            }
            if let Some(observed) = req.observed_saved_at {
                if current.saved_at > observed {
                    return Err(AppError::StaleWrite(format!(
                        "A newer save from {} exists for this question",
                        current.saved_at.format("%H:%M:%S%.3f")
                    )));
                }
            }
            let delta = (now - current.saved_at).num_seconds().max(0);
            sqlx::query_as::<_, Response>(
                "UPDATE responses
                 SET answer = $2, saved_at = GREATEST($3, saved_at),
                     time_spent_seconds = time_spent_seconds + $4
                 WHERE id = $1
                 RETURNING *",
            )
            .bind(current.id)
            .bind(Json(req.answer.clone()))
            .bind(now)
            .bind(delta)
            .fetch_one(&mut *tx)
            .await?
        }
        None => {
            sqlx::query_as::<_, Response>(
                "INSERT INTO responses (id, attempt_id, exam_question_id, answer, saved_at)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(attempt_id)
            .bind(req.exam_question_id)
            .bind(Json(req.answer.clone()))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    let (duration_minutes,): (i64,) =
        sqlx::query_as("SELECT duration_minutes FROM exams WHERE id = $1")
            .bind(attempt.exam_id)
            .fetch_one(&mut *tx)
            .await?;
    let spent = clamp_time_spent(
        attempt.started_at,
        now,
        duration_minutes,
        state.config.exam_timeout_buffer_seconds,
    );
    sqlx::query("UPDATE attempts SET time_spent_seconds = $2, updated_at = now() WHERE id = $1")
        .bind(attempt_id)
        .bind(spent)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(response)
}

/// Submits an attempt. Idempotent: a second submit (any reason) on an
/// already-submitted attempt is a no-op, so duplicate client requests and
/// redundant sweep instances are harmless.
///
/// Grading is handed off asynchronously; if it fails the attempt stays
/// `is_submitted = true, is_graded = false` — a student can never re-enter
/// a finished exam.
pub async fn submit(
    state: &AppState,
    attempt_id: Uuid,
    reason: SubmitReason,
    expected_student: Option<Uuid>,
) -> Result<SubmitOutcome, AppError> {
    let now = Utc::now();
    let mut tx = state.pool.begin().await?;

    let attempt = sqlx::query_as::<_, Attempt>("SELECT * FROM attempts WHERE id = $1 FOR UPDATE")
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt_id)))?;

    if let Some(student_id) = expected_student {
        if attempt.student_id != student_id {
            return Err(AppError::Unauthorized(
                "Attempt belongs to another student".to_string(),
            ));
        }
    }

    if attempt.is_submitted {
        return Ok(SubmitOutcome {
            attempt_id,
            submitted_at: attempt.submitted_at.unwrap_or(now),
            auto_submitted: attempt.auto_submitted,
            newly_submitted: false,
        });
    }

    let (duration_minutes,): (i64,) =
        sqlx::query_as("SELECT duration_minutes FROM exams WHERE id = $1")
            .bind(attempt.exam_id)
            .fetch_one(&mut *tx)
            .await?;
    let spent = clamp_time_spent(
        attempt.started_at,
        now,
        duration_minutes,
        state.config.exam_timeout_buffer_seconds,
    );
    let auto_submitted = reason != SubmitReason::Manual;

    sqlx::query(
        "UPDATE attempts
         SET is_submitted = true, submitted_at = $2, auto_submitted = $3,
             time_spent_seconds = $4, updated_at = now()
         WHERE id = $1",
    )
    .bind(attempt_id)
    .bind(now)
    .bind(auto_submitted)
    .bind(spent)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE responses SET is_final = true WHERE attempt_id = $1 AND NOT is_final")
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE proctoring_sessions
         SET is_active = false, ended_at = $2, updated_at = now()
         WHERE attempt_id = $1 AND ended_at IS NULL",
    )
    .bind(attempt_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!("attempt {} submitted (reason {:?})", attempt_id, reason);

    let pool = state.pool.clone();
    tokio::spawn(async move {
        if let Err(e) = grading::reconcile(&pool, attempt_id).await {
            tracing::error!(
                "grading reconciliation failed for attempt {}: {}",
                attempt_id,
                e
            );
        }
    });

    Ok(SubmitOutcome {
        attempt_id,
        submitted_at: now,
        auto_submitted,
        newly_submitted: true,
    })
}
