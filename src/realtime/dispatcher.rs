// src/realtime/dispatcher.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::realtime::message::WsMessage;

/// A listener's handle on an exam room: the connection id (for later
/// unsubscribe) and the message stream to drain into the socket.
pub struct Subscription {
    pub conn_id: u64,
    pub receiver: mpsc::Receiver<WsMessage>,
}

/// Fan-out of session/alert events to connected listeners, keyed by exam.
///
/// Owned by `AppState` and passed to handlers; created at process start,
/// entries removed on disconnect. Each listener gets a bounded queue —
/// publish never blocks the caller, and a listener that cannot keep up is
/// dropped from the room rather than allowed to backpressure the engine.
pub struct Dispatcher {
    capacity: usize,
    next_conn_id: AtomicU64,
    rooms: RwLock<HashMap<Uuid, HashMap<u64, mpsc::Sender<WsMessage>>>>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_conn_id: AtomicU64::new(1),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a listener on an exam room.
    pub async fn subscribe(&self, exam_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        let mut rooms = self.rooms.write().await;
        rooms.entry(exam_id).or_default().insert(conn_id, tx);

        tracing::debug!("connection {} joined exam room {}", conn_id, exam_id);
        Subscription {
            conn_id,
            receiver: rx,
        }
    }

    /// Removes a listener; the room itself is dropped once empty.
    pub async fn unsubscribe(&self, exam_id: Uuid, conn_id: u64) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&exam_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.remove(&exam_id);
            }
        }
        tracing::debug!("connection {} left exam room {}", conn_id, exam_id);
    }

    /// Best-effort broadcast to every listener in an exam room.
    ///
    /// Returns the number of listeners the message was queued for. Listeners
    /// whose queue is full or whose receiver is gone are evicted here.
    pub async fn broadcast(&self, exam_id: Uuid, message: WsMessage) -> usize {
        let mut dead: Vec<u64> = Vec::new();
        let mut delivered = 0;

        {
            let rooms = self.rooms.read().await;
            let Some(room) = rooms.get(&exam_id) else {
                return 0;
            };
            for (conn_id, tx) in room {
                match tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => dead.push(*conn_id),
                }
            }
        }

        if !dead.is_empty() {
            let mut rooms = self.rooms.write().await;
            if let Some(room) = rooms.get_mut(&exam_id) {
                for conn_id in &dead {
                    room.remove(conn_id);
                    tracing::debug!(
                        "dropped slow or disconnected listener {} from exam room {}",
                        conn_id,
                        exam_id
                    );
                }
                if room.is_empty() {
                    rooms.remove(&exam_id);
                }
            }
        }

        delivered
    }

    /// Number of listeners currently in a room.
    pub async fn room_size(&self, exam_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&exam_id)
            .map_or(0, |room| room.len())
    }
}
