// src/routes.rs

use axum::{
    Json, Router,
    http::Method,
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{attempt, exam, grading, proctor, ws},
    state::AppState,
    utils::jwt::{auth_middleware, staff_middleware},
};

/// Assembles the main application router.
///
/// * All /api routes require a verified principal; staff-only groups get a
///   second role-checking layer.
/// * The WebSocket endpoint authenticates itself via query token.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let exam_staff_routes = Router::new()
        .route(
            "/{id}/questions",
            get(exam::list_questions).post(exam::attach_question),
        )
        .route("/{id}/attempts", get(exam::list_attempts))
        .route("/{id}/publish", post(exam::publish_exam))
        .route("/{id}/start", post(exam::start_exam))
        .route("/{id}/end", post(exam::end_exam))
        .route("/{id}/results", post(exam::publish_results_exam))
        .route("/{id}/lock", post(exam::lock_exam))
        .layer(middleware::from_fn(staff_middleware));

    let exam_routes = Router::new()
        .route("/", get(exam::list_exams).post(exam::create_exam))
        .route("/{id}", get(exam::get_exam))
        .route("/{id}/join", post(attempt::join))
        .merge(exam_staff_routes);

    let attempt_routes = Router::new()
        .route("/{id}", get(attempt::get_attempt))
        .route("/{id}/questions", get(attempt::list_questions))
        .route("/{id}/responses", put(attempt::autosave))
        .route("/{id}/submit", post(attempt::submit));

    let proctoring_staff_routes = Router::new()
        .route("/attempts/{id}/session", get(proctor::get_session))
        .route("/attempts/{id}/logs", get(proctor::list_logs))
        .route("/logs/{id}/review", post(proctor::review_log))
        .route("/exams/{id}/alerts", get(proctor::list_alerts))
        .route("/alerts/{id}/resolve", post(proctor::resolve_alert))
        .layer(middleware::from_fn(staff_middleware));

    let proctoring_routes = Router::new()
        .route("/events", post(proctor::record_violation))
        .merge(proctoring_staff_routes);

    let grading_routes = Router::new()
        .route("/responses/{id}/override", post(grading::override_grade))
        .route("/responses/{id}/audit", get(grading::list_audit))
        .layer(middleware::from_fn(staff_middleware));

    Router::new()
        .nest("/api/exams", exam_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/proctoring", proctoring_routes)
        .nest("/api/grading", grading_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        // Added after the auth layer: the channel verifies its own token.
        .route("/api/ws/{exam_id}", get(ws::exam_channel))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
