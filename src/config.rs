// src/config.rs

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

use crate::models::proctoring::{RiskLevel, ViolationType};

/// Runtime configuration, loaded once at startup.
///
/// Exam timing and anti-cheat policy knobs are environment-driven with
/// institutional defaults; the risk weight table is configuration, not code,
/// so a policy change does not require a rebuild.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,

    // Exam configuration
    pub default_join_window_seconds: i64,
    pub exam_timeout_buffer_seconds: i64,
    pub sweep_interval_seconds: u64,

    // Anti-cheat configuration
    pub max_tab_switches: i64,
    pub suspicious_activity_threshold: i64,
    pub high_risk_alert_threshold: f64,
    pub risk_weights: RiskWeights,

    // Realtime fan-out
    pub realtime_queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        Self {
            database_url,
            jwt_secret,
            jwt_expiration: env_or("JWT_EXPIRATION_SECONDS", 1800),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            default_join_window_seconds: env_or("DEFAULT_JOIN_WINDOW_SECONDS", 300),
            exam_timeout_buffer_seconds: env_or("EXAM_TIMEOUT_BUFFER_SECONDS", 30),
            sweep_interval_seconds: env_or("SWEEP_INTERVAL_SECONDS", 15),
            max_tab_switches: env_or("MAX_TAB_SWITCHES", 5),
            suspicious_activity_threshold: env_or("SUSPICIOUS_ACTIVITY_THRESHOLD", 10),
            high_risk_alert_threshold: env_or("HIGH_RISK_ALERT_THRESHOLD", 75.0),
            risk_weights: RiskWeights::default(),
            realtime_queue_capacity: env_or("REALTIME_QUEUE_CAPACITY", 64),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Per-category violation weights and severity multipliers.
///
/// A violation contributes `weight(category) * multiplier(severity)` to the
/// attempt's risk score, which is capped at `score_cap`.
#[derive(Debug, Clone)]
pub struct RiskWeights {
    pub tab_switch: f64,
    pub copy_paste: f64,
    pub right_click: f64,
    pub fullscreen_exit: f64,
    pub multiple_faces: f64,
    pub no_face_detected: f64,
    pub suspicious_movement: f64,
    pub external_device: f64,
    pub network_change: f64,
    pub browser_resize: f64,
    pub mobile_device_detected: f64,
    pub score_cap: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            tab_switch: 5.0,
            copy_paste: 8.0,
            right_click: 2.0,
            fullscreen_exit: 6.0,
            multiple_faces: 15.0,
            no_face_detected: 10.0,
            suspicious_movement: 8.0,
            external_device: 20.0,
            network_change: 4.0,
            browser_resize: 2.0,
            mobile_device_detected: 15.0,
            score_cap: 100.0,
        }
    }
}

impl RiskWeights {
    pub fn weight(&self, violation: ViolationType) -> f64 {
        match violation {
            ViolationType::TabSwitch => self.tab_switch,
            ViolationType::CopyPaste => self.copy_paste,
            ViolationType::RightClick => self.right_click,
            ViolationType::FullscreenExit => self.fullscreen_exit,
            ViolationType::MultipleFaces => self.multiple_faces,
            ViolationType::NoFaceDetected => self.no_face_detected,
            ViolationType::SuspiciousMovement => self.suspicious_movement,
            ViolationType::ExternalDevice => self.external_device,
            ViolationType::NetworkChange => self.network_change,
            ViolationType::BrowserResize => self.browser_resize,
            ViolationType::MobileDeviceDetected => self.mobile_device_detected,
        }
    }

    pub fn multiplier(&self, severity: RiskLevel) -> f64 {
        match severity {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 1.5,
            RiskLevel::High => 2.0,
            RiskLevel::Critical => 3.0,
        }
    }
}
