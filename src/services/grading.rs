// src/services/grading.rs

use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::attempt::{Attempt, OverrideGradeRequest, Response},
    models::question::{AnswerKey, AnswerPayload, QuestionKind},
    state::AppState,
};

/// Letter grade from a percentage.
pub fn letter_grade(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A"
    } else if percentage >= 75.0 {
        "B"
    } else if percentage >= 60.0 {
        "C"
    } else if percentage >= 45.0 {
        "D"
    } else {
        "F"
    }
}

/// Deterministic scoring for objective question kinds.
///
/// Returns `Ok(None)` for manual kinds (descriptive/coding/file), and
/// `(is_correct, awarded_marks)` otherwise. A key/answer shape that has no
/// scoring rule fails closed instead of silently scoring zero.
pub fn score_objective(
    kind: QuestionKind,
    key: &AnswerKey,
    answer: &AnswerPayload,
    marks: f64,
) -> Result<Option<(bool, f64)>, AppError> {
    if !kind.is_objective() {
        return Ok(None);
    }

    let is_correct = match (key, answer) {
        (AnswerKey::SingleChoice { correct }, AnswerPayload::SingleChoice { selected }) => {
            correct == selected
        }
        (AnswerKey::MultiChoice { correct }, AnswerPayload::MultiChoice { selected }) => {
            // Order-insensitive set equality.
            let mut want: Vec<&str> = correct.iter().map(String::as_str).collect();
            let mut got: Vec<&str> = selected.iter().map(String::as_str).collect();
            want.sort_unstable();
            want.dedup();
            got.sort_unstable();
            got.dedup();
            want == got
        }
        (AnswerKey::TrueFalse { correct }, AnswerPayload::TrueFalse { value }) => correct == value,
        (AnswerKey::FillBlank { accepted }, AnswerPayload::Text { content }) => {
            let given = content.trim();
            accepted.iter().any(|a| a.trim().eq_ignore_ascii_case(given))
        }
        (AnswerKey::Numeric { value, tolerance }, AnswerPayload::Numeric { value: given }) => {
            (given - value).abs() <= tolerance.max(0.0)
        }
        _ => {
            return Err(AppError::UnsupportedQuestionType(format!(
                "No scoring rule for kind {:?} with the stored key/answer shapes",
                kind
            )));
        }
    };

    Ok(Some((is_correct, if is_correct { marks } else { 0.0 })))
}

/// Appends a grade-audit row. Must run in the same transaction as, and
/// before, the live score mutation it records.
async fn record_grade_change(
    conn: &mut PgConnection,
    response_id: Uuid,
    changed_by: Option<Uuid>,
    action: &str,
    old_marks: Option<f64>,
    new_marks: f64,
    reason: Option<&str>,
    feedback: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO grading_audit_logs
             (id, response_id, changed_by, action, old_marks, new_marks, reason, feedback)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(Uuid::new_v4())
    .bind(response_id)
    .bind(changed_by)
    .bind(action)
    .bind(old_marks)
    .bind(new_marks)
    .bind(reason)
    .bind(feedback)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Recomputes the attempt's aggregate from its response rows. The letter
/// grade is only assigned once every response is graded; until then the
/// total is provisional.
async fn refresh_attempt_aggregate(
    conn: &mut PgConnection,
    attempt_id: Uuid,
    max_possible_score: f64,
) -> Result<(), AppError> {
    let (total_score, ungraded): (f64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(awarded_marks), 0), COUNT(*) FILTER (WHERE NOT is_graded)
         FROM responses WHERE attempt_id = $1",
    )
    .bind(attempt_id)
    .fetch_one(&mut *conn)
    .await?;

    let percentage = if max_possible_score > 0.0 {
        total_score / max_possible_score * 100.0
    } else {
        0.0
    };
    let all_graded = ungraded == 0;
    let grade = all_graded.then(|| letter_grade(percentage));

    sqlx::query(
        "UPDATE attempts
         SET total_score = $2, percentage = $3, grade = $4, is_graded = $5,
             graded_at = CASE WHEN $5 AND graded_at IS NULL THEN now() ELSE graded_at END,
             updated_at = now()
         WHERE id = $1",
    )
    .bind(attempt_id)
    .bind(total_score)
    .bind(percentage)
    .bind(grade)
    .bind(all_graded)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct GradableRow {
    id: Uuid,
    awarded_marks: f64,
    is_graded: bool,
    answer: Json<AnswerPayload>,
    kind: QuestionKind,
    marks: f64,
    answer_key: Json<AnswerKey>,
}

/// Turns a submitted attempt's responses into scores.
///
/// Objective responses are graded deterministically; manual kinds stay
/// ungraded with zero marks pending a human pass. Idempotent: already
/// graded responses are left alone and the aggregate is recomputed from
/// the rows, so re-running after a mid-flight failure is safe.
pub async fn reconcile(pool: &PgPool, attempt_id: Uuid) -> Result<(), AppError> {
    let attempt = sqlx::query_as::<_, Attempt>("SELECT * FROM attempts WHERE id = $1")
        .bind(attempt_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt_id)))?;
    if !attempt.is_submitted {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    let rows: Vec<GradableRow> = sqlx::query_as(
        "SELECT r.id, r.awarded_marks, r.is_graded, r.answer, q.kind, q.marks, q.answer_key
         FROM responses r
         JOIN exam_questions q ON q.id = r.exam_question_id
         WHERE r.attempt_id = $1
         ORDER BY q.order_index
         FOR UPDATE OF r",
    )
    .bind(attempt_id)
    .fetch_all(&mut *tx)
    .await?;

    for row in rows.iter().filter(|r| !r.is_graded) {
        let Some((is_correct, awarded)) =
            score_objective(row.kind, &row.answer_key, &row.answer, row.marks)?
        else {
            continue;
        };

        record_grade_change(
            &mut tx,
            row.id,
            None,
            "auto_graded",
            Some(row.awarded_marks),
            awarded,
            None,
            None,
        )
        .await?;
        sqlx::query(
            "UPDATE responses SET awarded_marks = $2, is_correct = $3, is_graded = true
             WHERE id = $1",
        )
        .bind(row.id)
        .bind(awarded)
        .bind(is_correct)
        .execute(&mut *tx)
        .await?;
    }

    refresh_attempt_aggregate(&mut tx, attempt_id, attempt.max_possible_score).await?;
    tx.commit().await?;

    tracing::info!("attempt {} reconciled", attempt_id);
    Ok(())
}

/// Human override of a response's awarded marks. The grade-audit row is
/// appended before the live score mutation, in the same transaction; a
/// score change without its ledger entry cannot be committed.
pub async fn override_response(
    state: &AppState,
    response_id: Uuid,
    actor: Uuid,
    req: &OverrideGradeRequest,
) -> Result<Response, AppError> {
    #[derive(Debug, sqlx::FromRow)]
    struct OverrideTarget {
        id: Uuid,
        awarded_marks: f64,
        attempt_id: Uuid,
        question_marks: f64,
        is_submitted: bool,
        max_possible_score: f64,
    }

    let mut tx = state.pool.begin().await?;
    let target: OverrideTarget = sqlx::query_as(
        "SELECT r.id, r.awarded_marks, r.attempt_id,
                q.marks AS question_marks, a.is_submitted, a.max_possible_score
         FROM responses r
         JOIN exam_questions q ON q.id = r.exam_question_id
         JOIN attempts a ON a.id = r.attempt_id
         WHERE r.id = $1
         FOR UPDATE OF r",
    )
    .bind(response_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Response {} not found", response_id)))?;

    if !target.is_submitted {
        return Err(AppError::InvalidTransition(
            "Cannot grade a response on an unsubmitted attempt".to_string(),
        ));
    }
    if req.marks < 0.0 || req.marks > target.question_marks {
        return Err(AppError::BadRequest(format!(
            "Awarded marks must be between 0 and {}",
            target.question_marks
        )));
    }

    record_grade_change(
        &mut tx,
        target.id,
        Some(actor),
        "teacher_override",
        Some(target.awarded_marks),
        req.marks,
        req.reason.as_deref(),
        req.feedback.as_deref(),
    )
    .await?;

    let response = sqlx::query_as::<_, Response>(
        "UPDATE responses
         SET awarded_marks = $2, is_graded = true, teacher_override = true,
             teacher_feedback = COALESCE($3, teacher_feedback)
         WHERE id = $1
         RETURNING *",
    )
    .bind(target.id)
    .bind(req.marks)
    .bind(req.feedback.as_deref())
    .fetch_one(&mut *tx)
    .await?;

    refresh_attempt_aggregate(&mut tx, target.attempt_id, target.max_possible_score).await?;
    tx.commit().await?;

    tracing::info!(
        "response {} overridden by {}: {} -> {}",
        response_id,
        actor,
        target.awarded_marks,
        req.marks
    );
    Ok(response)
}

/// Gate for `publish_results`: every attempt must be graded, and no attempt
/// may claim to be graded while one of its responses is not.
pub async fn ensure_results_publishable(pool: &PgPool, exam_id: Uuid) -> Result<(), AppError> {
    let (ungraded_attempts,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM attempts WHERE exam_id = $1 AND NOT is_graded")
            .bind(exam_id)
            .fetch_one(pool)
            .await?;
    if ungraded_attempts > 0 {
        return Err(AppError::InvalidTransition(format!(
            "{} attempts are not fully graded",
            ungraded_attempts
        )));
    }

    let (inconsistent,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM attempts a
         WHERE a.exam_id = $1 AND a.is_graded
           AND EXISTS (SELECT 1 FROM responses r WHERE r.attempt_id = a.id AND NOT r.is_graded)",
    )
    .bind(exam_id)
    .fetch_one(pool)
    .await?;
    if inconsistent > 0 {
        return Err(AppError::InconsistentGradingState(format!(
            "{} attempts are marked graded while a response remains ungraded",
            inconsistent
        )));
    }

    Ok(())
}
