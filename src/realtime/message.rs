// src/realtime/message.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::exam::ExamStatus;
use crate::models::proctoring::{RiskLevel, ViolationType};

/// Outbound realtime payloads. Delivery is at-most-once per connection;
/// clients resynchronize via a pull request, never from the stream alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    HeartbeatAck {
        timestamp: i64,
    },
    AntiCheatAlert {
        student_id: Uuid,
        violation_type: ViolationType,
        severity: RiskLevel,
    },
    ExamStatusChanged {
        exam_id: Uuid,
        status: ExamStatus,
    },
}

/// Inbound messages from a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ExamHeartbeat {
        timestamp: i64,
    },
    AntiCheatEvent {
        attempt_id: Uuid,
        violation_type: ViolationType,
        severity: RiskLevel,
        #[serde(default)]
        exam_question_id: Option<i64>,
        #[serde(default)]
        detection_method: Option<String>,
        #[serde(default)]
        confidence_score: Option<f64>,
        #[serde(default)]
        event_data: Option<serde_json::Value>,
    },
}
