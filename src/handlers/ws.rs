// src/handlers/ws.rs

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::proctoring::RecordViolationRequest,
    realtime::{ClientMessage, WsMessage},
    services::proctor,
    state::AppState,
    utils::jwt::{Claims, verify_jwt},
};

/// Browsers cannot set headers on a WebSocket handshake, so the token
/// travels as a query parameter.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    token: String,
}

/// Realtime channel for one exam room. Students' monitors push heartbeats
/// and anti-cheat events; staff dashboards receive alerts and status
/// changes fanned out by the dispatcher.
pub async fn exam_channel(
    ws: WebSocketUpgrade,
    Path(exam_id): Path<Uuid>,
    Query(auth): Query<WsAuthQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let claims = verify_jwt(&auth.token, &state.config.jwt_secret)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, exam_id, claims)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, exam_id: Uuid, claims: Claims) {
    let mut subscription = state.dispatcher.subscribe(exam_id).await;

    loop {
        tokio::select! {
            outbound = subscription.receiver.recv() => {
                let Some(message) = outbound else { break };
                if send_json(&mut socket, &message).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                let Some(Ok(frame)) = inbound else { break };
                let Message::Text(text) = frame else { continue };
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::ExamHeartbeat { timestamp }) => {
                        let ack = WsMessage::HeartbeatAck { timestamp };
                        if send_json(&mut socket, &ack).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientMessage::AntiCheatEvent {
                        attempt_id,
                        violation_type,
                        severity,
                        exam_question_id,
                        detection_method,
                        confidence_score,
                        event_data,
                    }) => {
                        let request = RecordViolationRequest {
                            attempt_id,
                            violation_type,
                            severity,
                            exam_question_id,
                            detection_method,
                            confidence_score,
                            event_data,
                        };
                        // Ingestion failures never take down the channel.
                        if let Err(e) = proctor::record_violation(&state, &claims, request).await {
                            tracing::debug!("ws violation ingest rejected: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::debug!("unparseable ws message on exam {}: {}", exam_id, e);
                    }
                }
            }
        }
    }

    state
        .dispatcher
        .unsubscribe(exam_id, subscription.conn_id)
        .await;
    tracing::debug!("ws connection closed for exam {}", exam_id);
}

async fn send_json(socket: &mut WebSocket, message: &WsMessage) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("failed to serialize ws message: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(payload.into())).await
}
