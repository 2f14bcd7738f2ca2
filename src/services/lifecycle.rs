// src/services/lifecycle.rs

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::exam::{Exam, ExamStatus},
    realtime::WsMessage,
    services::{grading, notify, notify::NotificationJob},
    state::AppState,
};

pub async fn fetch_exam(pool: &PgPool, exam_id: Uuid) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Exam {} not found", exam_id)))
}

/// Appends a row to the exam audit ledger. Runs inside the transaction that
/// performs the transition so the ledger never misses an event.
async fn record_exam_event(
    conn: &mut PgConnection,
    exam_id: Uuid,
    actor_id: Option<Uuid>,
    event_type: &str,
    description: String,
    reason: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO exam_audit_logs (id, exam_id, actor_id, event_type, description, reason)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(exam_id)
    .bind(actor_id)
    .bind(event_type)
    .bind(description)
    .bind(reason)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn broadcast_status(state: &AppState, exam_id: Uuid, status: ExamStatus) {
    state
        .dispatcher
        .broadcast(exam_id, WsMessage::ExamStatusChanged { exam_id, status })
        .await;
}

/// draft -> published. Requires at least one attached question and positive
/// total marks; stamps `published_at` and freezes `total_marks` to the sum
/// of the attached questions.
pub async fn publish(state: &AppState, exam_id: Uuid, actor: Uuid) -> Result<Exam, AppError> {
    let exam = fetch_exam(&state.pool, exam_id).await?;
    exam.ensure_unlocked()?;
    if exam.status != ExamStatus::Draft {
        return Err(AppError::InvalidTransition(format!(
            "Cannot publish exam in status '{}'",
            exam.status.as_str()
        )));
    }

    let (question_count, total_marks): (i64, f64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(marks), 0) FROM exam_questions WHERE exam_id = $1",
    )
    .bind(exam_id)
    .fetch_one(&state.pool)
    .await?;

    if question_count == 0 {
        return Err(AppError::InvalidTransition(
            "Cannot publish an exam with no questions".to_string(),
        ));
    }
    if total_marks <= 0.0 {
        return Err(AppError::InvalidTransition(
            "Cannot publish an exam with zero total marks".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;
    // Optimistic guard: a stale client racing another transition loses here.
    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams
         SET status = 'published', total_marks = $2, published_at = now(), updated_at = now()
         WHERE id = $1 AND status = 'draft' AND locked_at IS NULL
         RETURNING *",
    )
    .bind(exam_id)
    .bind(total_marks)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| {
        AppError::InvalidTransition("Exam was modified concurrently; refresh and retry".to_string())
    })?;

    record_exam_event(
        &mut tx,
        exam_id,
        Some(actor),
        "published",
        format!(
            "Exam '{}' published with {} questions ({} marks)",
            updated.title, question_count, total_marks
        ),
        None,
    )
    .await?;
    tx.commit().await?;

    tracing::info!("exam {} published by {}", exam_id, actor);
    broadcast_status(state, exam_id, updated.status).await;
    Ok(updated)
}

/// published -> started. Refuses to run before `start_at` when scheduled;
/// idempotent when already started. Backfills `start_at` for unscheduled
/// exams so the join window has an anchor.
pub async fn start(state: &AppState, exam_id: Uuid, actor: Uuid) -> Result<Exam, AppError> {
    let exam = fetch_exam(&state.pool, exam_id).await?;
    exam.ensure_unlocked()?;

    match exam.status {
        ExamStatus::Started => return Ok(exam),
        ExamStatus::Published => {}
        other => {
            return Err(AppError::InvalidTransition(format!(
                "Cannot start exam in status '{}'",
                other.as_str()
            )));
        }
    }

    let now = Utc::now();
    if let Some(start_at) = exam.start_at {
        if now < start_at {
            return Err(AppError::InvalidTransition(format!(
                "Exam is scheduled to start at {}",
                start_at.format("%Y-%m-%d %H:%M:%S UTC")
            )));
        }
    }

    let mut tx = state.pool.begin().await?;
    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams
         SET status = 'started', start_at = COALESCE(start_at, now()), updated_at = now()
         WHERE id = $1 AND status = 'published' AND locked_at IS NULL
         RETURNING *",
    )
    .bind(exam_id)
    .fetch_optional(&mut *tx)
    .await?;

    let updated = match updated {
        Some(exam) => exam,
        None => {
            // Lost the optimistic race; a concurrent start is a no-op.
            drop(tx);
            let again = fetch_exam(&state.pool, exam_id).await?;
            if again.status == ExamStatus::Started {
                return Ok(again);
            }
            return Err(AppError::InvalidTransition(
                "Exam was modified concurrently; refresh and retry".to_string(),
            ));
        }
    };

    record_exam_event(
        &mut tx,
        exam_id,
        Some(actor),
        "started",
        format!("Exam '{}' started", updated.title),
        None,
    )
    .await?;
    tx.commit().await?;

    tracing::info!("exam {} started by {}", exam_id, actor);
    broadcast_status(state, exam_id, updated.status).await;
    Ok(updated)
}

/// started -> ended. Invoked explicitly by staff, or with `actor = None` by
/// the sweep once `end_at` has passed and every attempt is submitted.
pub async fn end(state: &AppState, exam_id: Uuid, actor: Option<Uuid>) -> Result<Exam, AppError> {
    let exam = fetch_exam(&state.pool, exam_id).await?;
    exam.ensure_unlocked()?;
    if exam.status != ExamStatus::Started {
        return Err(AppError::InvalidTransition(format!(
            "Cannot end exam in status '{}'",
            exam.status.as_str()
        )));
    }

    let mut tx = state.pool.begin().await?;
    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams
         SET status = 'ended', updated_at = now()
         WHERE id = $1 AND status = 'started' AND locked_at IS NULL
         RETURNING *",
    )
    .bind(exam_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| {
        AppError::InvalidTransition("Exam was modified concurrently; refresh and retry".to_string())
    })?;

    let description = match actor {
        Some(id) => format!("Exam '{}' ended by {}", updated.title, id),
        None => format!("Exam '{}' ended automatically", updated.title),
    };
    record_exam_event(&mut tx, exam_id, actor, "ended", description, None).await?;
    tx.commit().await?;

    tracing::info!("exam {} ended", exam_id);
    broadcast_status(state, exam_id, updated.status).await;
    Ok(updated)
}

/// ended -> results_published. Blocked until every attempt is graded; an
/// attempt claiming to be graded while a response is not is an invariant
/// breach and blocks publication loudly.
pub async fn publish_results(state: &AppState, exam_id: Uuid, actor: Uuid) -> Result<Exam, AppError> {
    let exam = fetch_exam(&state.pool, exam_id).await?;
    exam.ensure_unlocked()?;
    if exam.status != ExamStatus::Ended {
        return Err(AppError::InvalidTransition(format!(
            "Cannot publish results for exam in status '{}'",
            exam.status.as_str()
        )));
    }

    grading::ensure_results_publishable(&state.pool, exam_id).await?;

    let mut tx = state.pool.begin().await?;
    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams
         SET status = 'results_published', results_published_at = now(), updated_at = now()
         WHERE id = $1 AND status = 'ended' AND locked_at IS NULL
         RETURNING *",
    )
    .bind(exam_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| {
        AppError::InvalidTransition("Exam was modified concurrently; refresh and retry".to_string())
    })?;

    record_exam_event(
        &mut tx,
        exam_id,
        Some(actor),
        "results_published",
        format!("Results published for exam '{}'", updated.title),
        None,
    )
    .await?;
    tx.commit().await?;

    tracing::info!("results published for exam {}", exam_id);
    broadcast_status(state, exam_id, updated.status).await;
    notify::enqueue(
        state.notifier.clone(),
        NotificationJob::ResultsPublished {
            exam_id,
            title: updated.title.clone(),
        },
    );
    Ok(updated)
}

/// Locks an exam from any state: captures reason, timestamp and actor, and
/// rejects all further mutation outside the review/alert subsystems.
pub async fn lock(
    state: &AppState,
    exam_id: Uuid,
    actor: Uuid,
    reason: &str,
) -> Result<Exam, AppError> {
    let exam = fetch_exam(&state.pool, exam_id).await?;
    if exam.is_locked() {
        return Err(AppError::Conflict(format!(
            "Exam is already locked: {}",
            exam.lock_reason.as_deref().unwrap_or("no reason recorded")
        )));
    }

    let mut tx = state.pool.begin().await?;
    let updated = sqlx::query_as::<_, Exam>(
        "UPDATE exams
         SET locked_at = now(), locked_by = $2, lock_reason = $3, updated_at = now()
         WHERE id = $1 AND locked_at IS NULL
         RETURNING *",
    )
    .bind(exam_id)
    .bind(actor)
    .bind(reason)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("Exam was locked concurrently".to_string()))?;

    record_exam_event(
        &mut tx,
        exam_id,
        Some(actor),
        "locked",
        format!("Exam '{}' locked", updated.title),
        Some(reason),
    )
    .await?;
    tx.commit().await?;

    tracing::warn!("exam {} locked by {}: {}", exam_id, actor, reason);
    Ok(updated)
}
