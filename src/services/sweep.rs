// src/services/sweep.rs

use std::time::Duration;

use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::attempt::SubmitReason,
    services::{lifecycle, session},
    state::AppState,
};

/// Background timer enforcement loop.
///
/// Runs until the process exits. Safe to run from multiple process
/// instances without leader election: `submit` is idempotent and `end`
/// uses an optimistic status guard, so redundant sweeps are no-ops.
pub async fn run(state: AppState) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.sweep_interval_seconds.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if let Err(e) = sweep_once(&state).await {
            tracing::warn!("timer sweep failed, will retry next tick: {}", e);
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepStats {
    pub forced_submits: usize,
    pub auto_ended_exams: usize,
}

#[derive(FromRow)]
struct OverdueAttempt {
    id: Uuid,
}

#[derive(FromRow)]
struct FinishedExam {
    id: Uuid,
}

/// One pass: force-submit attempts past their deadline, then end started
/// exams whose window has passed and whose attempts are all in.
pub async fn sweep_once(state: &AppState) -> Result<SweepStats, AppError> {
    let mut stats = SweepStats::default();

    // The buffer absorbs autosave latency so a last-second answer still
    // lands before the forced submit.
    let overdue: Vec<OverdueAttempt> = sqlx::query_as(
        "SELECT a.id
         FROM attempts a
         JOIN exams e ON e.id = a.exam_id
         WHERE NOT a.is_submitted
           AND a.started_at
               + make_interval(mins => e.duration_minutes::int)
               + make_interval(secs => $1) < now()",
    )
    .bind(state.config.exam_timeout_buffer_seconds as f64)
    .fetch_all(&state.pool)
    .await?;

    for attempt in overdue {
        match session::submit(state, attempt.id, SubmitReason::Timeout, None).await {
            Ok(outcome) if outcome.newly_submitted => {
                tracing::info!("attempt {} force-submitted by timer sweep", attempt.id);
                stats.forced_submits += 1;
            }
            Ok(_) => {}
            // Retried on the next sweep.
            Err(e) => tracing::warn!("forced submit of attempt {} failed: {}", attempt.id, e),
        }
    }

    let finished: Vec<FinishedExam> = sqlx::query_as(
        "SELECT e.id
         FROM exams e
         WHERE e.status = 'started'
           AND e.locked_at IS NULL
           AND e.end_at IS NOT NULL AND e.end_at < now()
           AND NOT EXISTS (
               SELECT 1 FROM attempts a WHERE a.exam_id = e.id AND NOT a.is_submitted
           )",
    )
    .fetch_all(&state.pool)
    .await?;

    for exam in finished {
        match lifecycle::end(state, exam.id, None).await {
            Ok(_) => {
                tracing::info!("exam {} auto-ended by timer sweep", exam.id);
                stats.auto_ended_exams += 1;
            }
            Err(e) => tracing::warn!("auto-end of exam {} failed: {}", exam.id, e),
        }
    }

    Ok(stats)
}
