// tests/api_tests.rs
//
// HTTP integration tests. These need a running Postgres; they skip
// gracefully when DATABASE_URL is not set.

use std::sync::Arc;

use exam_backend::{
    config::{Config, RiskWeights},
    realtime::Dispatcher,
    routes,
    services::notify::LogNotifier,
    state::AppState,
    utils::jwt::sign_jwt,
};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

struct TestApp {
    address: String,
    client: reqwest::Client,
    config: Config,
}

impl TestApp {
    fn token(&self, role: &str) -> (Uuid, String) {
        let id = Uuid::new_v4();
        let token = sign_jwt(id, role, &self.config.jwt_secret, 600).expect("sign test token");
        (id, token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

/// Spawns the app on a random port. Returns None (test skipped) when no
/// database is configured in the environment.
async fn spawn_app() -> Option<TestApp> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping HTTP integration test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        default_join_window_seconds: 300,
        exam_timeout_buffer_seconds: 30,
        sweep_interval_seconds: 15,
        max_tab_switches: 5,
        suspicious_activity_threshold: 10,
        high_risk_alert_threshold: 75.0,
        risk_weights: RiskWeights::default(),
        realtime_queue_capacity: 16,
    };

    let state = AppState {
        pool,
        config: config.clone(),
        dispatcher: Arc::new(Dispatcher::new(config.realtime_queue_capacity)),
        notifier: Arc::new(LogNotifier),
    };

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(TestApp {
        address,
        client: reqwest::Client::new(),
        config,
    })
}

/// Creates a published-and-started exam with two objective questions and
/// returns its id.
async fn seed_started_exam(app: &TestApp, staff_token: &str, start_offset_seconds: i64) -> Uuid {
    let start_at = chrono::Utc::now() - chrono::Duration::seconds(start_offset_seconds);

    let exam: serde_json::Value = app
        .client
        .post(app.url("/api/exams"))
        .bearer_auth(staff_token)
        .json(&serde_json::json!({
            "course_id": Uuid::new_v4(),
            "title": "Operating Systems Quiz",
            "exam_type": "quiz",
            "duration_minutes": 30,
            "start_at": start_at,
            "join_window_seconds": 300
        }))
        .send()
        .await
        .expect("create exam")
        .json()
        .await
        .expect("exam json");
    let exam_id: Uuid = serde_json::from_value(exam["id"].clone()).unwrap();

    for (index, question) in [
        serde_json::json!({
            "order_index": 0,
            "marks": 10.0,
            "kind": "mcq",
            "question_text": "Which scheduler runs most often?",
            "answer_key": { "kind": "single_choice", "correct": "A" }
        }),
        serde_json::json!({
            "order_index": 1,
            "marks": 5.0,
            "kind": "true_false",
            "question_text": "A mutex is a counting semaphore.",
            "answer_key": { "kind": "true_false", "correct": false }
        }),
    ]
    .iter()
    .enumerate()
    {
        let resp = app
            .client
            .post(app.url(&format!("/api/exams/{}/questions", exam_id)))
            .bearer_auth(staff_token)
            .json(question)
            .send()
            .await
            .expect("attach question");
        assert_eq!(resp.status().as_u16(), 201, "question {} not created", index);
    }

    for action in ["publish", "start"] {
        let resp = app
            .client
            .post(app.url(&format!("/api/exams/{}/{}", exam_id, action)))
            .bearer_auth(staff_token)
            .send()
            .await
            .expect(action);
        assert_eq!(resp.status().as_u16(), 200, "{} failed", action);
    }

    exam_id
}

#[tokio::test]
async fn health_check_works_and_unknown_routes_404() {
    let Some(app) = spawn_app().await else { return };

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .client
        .get(app.url("/random_path_that_does_not_exist"))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn api_requires_a_principal_and_staff_routes_require_staff() {
    let Some(app) = spawn_app().await else { return };

    // No token at all
    let response = app
        .client
        .get(app.url("/api/exams"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 401);

    // Student hitting a staff route
    let (_, student_token) = app.token("student");
    let response = app
        .client
        .post(app.url(&format!("/api/exams/{}/publish", Uuid::new_v4())))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn publish_requires_questions() {
    let Some(app) = spawn_app().await else { return };
    let (_, staff_token) = app.token("teacher");

    let exam: serde_json::Value = app
        .client
        .post(app.url("/api/exams"))
        .bearer_auth(&staff_token)
        .json(&serde_json::json!({
            "course_id": Uuid::new_v4(),
            "title": "Empty Exam",
            "exam_type": "practice",
            "duration_minutes": 10
        }))
        .send()
        .await
        .expect("create exam")
        .json()
        .await
        .expect("exam json");

    let response = app
        .client
        .post(app.url(&format!("/api/exams/{}/publish", exam["id"].as_str().unwrap())))
        .bearer_auth(&staff_token)
        .send()
        .await
        .expect("publish");
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn join_window_closes_after_the_configured_interval() {
    let Some(app) = spawn_app().await else { return };
    let (_, staff_token) = app.token("teacher");
    let (_, student_token) = app.token("student");

    // Started 400s ago with a 300s window: too late.
    let exam_id = seed_started_exam(&app, &staff_token, 400).await;

    let response = app
        .client
        .post(app.url(&format!("/api/exams/{}/join", exam_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("join");
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "join_window_closed");
}

#[tokio::test]
async fn full_attempt_flow_with_grading_and_results() {
    let Some(app) = spawn_app().await else { return };
    let (_, staff_token) = app.token("teacher");
    let (_, student_token) = app.token("student");

    // Started 100s ago: inside the 300s window.
    let exam_id = seed_started_exam(&app, &staff_token, 100).await;

    // Join
    let join: serde_json::Value = app
        .client
        .post(app.url(&format!("/api/exams/{}/join", exam_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("join")
        .json()
        .await
        .expect("join json");
    assert_eq!(join["resumed"], false);
    let attempt_id = join["attempt"]["id"].as_str().unwrap().to_string();

    // A second join resumes the same attempt.
    let rejoin: serde_json::Value = app
        .client
        .post(app.url(&format!("/api/exams/{}/join", exam_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("rejoin")
        .json()
        .await
        .expect("rejoin json");
    assert_eq!(rejoin["resumed"], true);
    assert_eq!(rejoin["attempt"]["id"].as_str().unwrap(), attempt_id);

    // Fetch the paper (no answer keys served to students).
    let questions: Vec<serde_json::Value> = app
        .client
        .get(app.url(&format!("/api/attempts/{}/questions", attempt_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("questions")
        .json()
        .await
        .expect("questions json");
    assert_eq!(questions.len(), 2);
    assert!(questions[0].get("answer_key").is_none());

    // Autosave both answers (correct ones, per the seed).
    let mcq_id = questions[0]["id"].as_i64().unwrap();
    let tf_id = questions[1]["id"].as_i64().unwrap();

    let saved: serde_json::Value = app
        .client
        .put(app.url(&format!("/api/attempts/{}/responses", attempt_id)))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({
            "exam_question_id": mcq_id,
            "answer": { "kind": "single_choice", "selected": "A" }
        }))
        .send()
        .await
        .expect("autosave")
        .json()
        .await
        .expect("autosave json");

    // A stale writer observing an older timestamp is rejected.
    let stale = app
        .client
        .put(app.url(&format!("/api/attempts/{}/responses", attempt_id)))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({
            "exam_question_id": mcq_id,
            "answer": { "kind": "single_choice", "selected": "B" },
            "observed_saved_at": "2000-01-01T00:00:00Z"
        }))
        .send()
        .await
        .expect("stale autosave");
    assert_eq!(stale.status().as_u16(), 409);
    let stale_body: serde_json::Value = stale.json().await.unwrap();
    assert_eq!(stale_body["code"], "stale_write");

    // A fresh writer quoting the current timestamp succeeds.
    let resave = app
        .client
        .put(app.url(&format!("/api/attempts/{}/responses", attempt_id)))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({
            "exam_question_id": mcq_id,
            "answer": { "kind": "single_choice", "selected": "A" },
            "observed_saved_at": saved["saved_at"]
        }))
        .send()
        .await
        .expect("resave");
    assert_eq!(resave.status().as_u16(), 200);

    app.client
        .put(app.url(&format!("/api/attempts/{}/responses", attempt_id)))
        .bearer_auth(&student_token)
        .json(&serde_json::json!({
            "exam_question_id": tf_id,
            "answer": { "kind": "true_false", "value": false }
        }))
        .send()
        .await
        .expect("autosave tf");

    // Submit; a duplicate submit is a no-op, not an error.
    let submit: serde_json::Value = app
        .client
        .post(app.url(&format!("/api/attempts/{}/submit", attempt_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("submit")
        .json()
        .await
        .expect("submit json");
    assert_eq!(submit["newly_submitted"], true);
    assert_eq!(submit["auto_submitted"], false);

    let resubmit: serde_json::Value = app
        .client
        .post(app.url(&format!("/api/attempts/{}/submit", attempt_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("resubmit")
        .json()
        .await
        .expect("resubmit json");
    assert_eq!(resubmit["newly_submitted"], false);

    // Grading runs asynchronously after submit; poll briefly.
    let mut graded = serde_json::Value::Null;
    for _ in 0..50 {
        let snapshot: serde_json::Value = app
            .client
            .get(app.url(&format!("/api/attempts/{}", attempt_id)))
            .bearer_auth(&student_token)
            .send()
            .await
            .expect("attempt")
            .json()
            .await
            .expect("attempt json");
        if snapshot["attempt"]["is_graded"] == true {
            graded = snapshot;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(graded["attempt"]["is_graded"], true, "grading never completed");
    assert_eq!(graded["attempt"]["total_score"], 15.0);
    assert_eq!(graded["attempt"]["grade"], "A");

    // End the exam and publish results.
    for action in ["end", "results"] {
        let resp = app
            .client
            .post(app.url(&format!("/api/exams/{}/{}", exam_id, action)))
            .bearer_auth(&staff_token)
            .send()
            .await
            .expect(action);
        assert_eq!(resp.status().as_u16(), 200, "{} failed", action);
    }

    // Override one response and check the ledger kept both entries.
    let response_id = graded["responses"][0]["id"].as_str().unwrap();
    let overridden = app
        .client
        .post(app.url(&format!("/api/grading/responses/{}/override", response_id)))
        .bearer_auth(&staff_token)
        .json(&serde_json::json!({
            "marks": 5.0,
            "reason": "partial credit for reasoning"
        }))
        .send()
        .await
        .expect("override");
    assert_eq!(overridden.status().as_u16(), 200);

    let audit: Vec<serde_json::Value> = app
        .client
        .get(app.url(&format!("/api/grading/responses/{}/audit", response_id)))
        .bearer_auth(&staff_token)
        .send()
        .await
        .expect("audit")
        .json()
        .await
        .expect("audit json");
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0]["action"], "auto_graded");
    assert_eq!(audit[1]["action"], "teacher_override");
}

#[tokio::test]
async fn violations_accumulate_and_flag_the_attempt() {
    let Some(app) = spawn_app().await else { return };
    let (_, staff_token) = app.token("teacher");
    let (_, student_token) = app.token("student");

    let exam_id = seed_started_exam(&app, &staff_token, 10).await;

    let join: serde_json::Value = app
        .client
        .post(app.url(&format!("/api/exams/{}/join", exam_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .expect("join")
        .json()
        .await
        .expect("join json");
    let attempt_id = join["attempt"]["id"].as_str().unwrap().to_string();

    for _ in 0..6 {
        let resp = app
            .client
            .post(app.url("/api/proctoring/events"))
            .bearer_auth(&student_token)
            .json(&serde_json::json!({
                "attempt_id": attempt_id,
                "violation_type": "tab_switch",
                "severity": "low",
                "detection_method": "javascript",
                "confidence_score": 0.98
            }))
            .send()
            .await
            .expect("violation");
        assert_eq!(resp.status().as_u16(), 201);
    }

    let session: serde_json::Value = app
        .client
        .get(app.url(&format!("/api/proctoring/attempts/{}/session", attempt_id)))
        .bearer_auth(&staff_token)
        .send()
        .await
        .expect("session")
        .json()
        .await
        .expect("session json");
    assert_eq!(session["total_violations"], 6);
    assert_eq!(session["tab_switches"], 6);
    assert_eq!(session["risk_score"], 30.0);
    assert_eq!(session["manual_review_required"], true);

    let attempt: serde_json::Value = app
        .client
        .get(app.url(&format!("/api/attempts/{}", attempt_id)))
        .bearer_auth(&staff_token)
        .send()
        .await
        .expect("attempt")
        .json()
        .await
        .expect("attempt json");
    assert_eq!(attempt["attempt"]["flagged_for_review"], true);
    assert_eq!(attempt["attempt"]["violations_count"], 6);

    // Exactly one flag alert despite six events past the ceiling.
    let alerts: Vec<serde_json::Value> = app
        .client
        .get(app.url(&format!("/api/proctoring/exams/{}/alerts", exam_id)))
        .bearer_auth(&staff_token)
        .send()
        .await
        .expect("alerts")
        .json()
        .await
        .expect("alerts json");
    let flag_alerts = alerts
        .iter()
        .filter(|a| a["alert_type"] == "flagged_for_review")
        .count();
    assert_eq!(flag_alerts, 1);
}
