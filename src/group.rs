//! Per-room fan-out.
//!
//! A group is a [`broadcast`] channel keyed by room id. Sockets hold a
//! [`Subscription`] for as long as they are connected; dropping it leaves the
//! group, and the last subscriber to leave removes the group from the registry.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// A persisted chat message as delivered to sockets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEvent {
    pub message: String,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub message_id: i64,
    pub user_id: i64,
}

#[derive(Clone)]
pub struct Groups {
    inner: Arc<DashMap<i64, broadcast::Sender<ChatEvent>>>,
    capacity: usize,
}

impl Groups {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, room_id: i64) -> Subscription {
        let rx = self
            .inner
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        Subscription {
            room_id,
            rx,
            groups: self.clone(),
        }
    }

    /// Returns how many subscribers the event was handed to.
    pub fn publish(&self, room_id: i64, event: ChatEvent) -> usize {
        let sent = match self.inner.get(&room_id) {
            Some(tx) => tx.send(event).ok(),
            None => return 0,
        };

        sent.unwrap_or_else(|| {
            // two guards dropping together can both leave the entry behind
            self.inner
                .remove_if(&room_id, |_, tx| tx.receiver_count() == 0);
            0
        })
    }

    pub fn subscriber_count(&self, room_id: i64) -> usize {
        self.inner
            .get(&room_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    fn unsubscribe(&self, room_id: i64) {
        // the leaving receiver is still alive while this runs
        self.inner
            .remove_if(&room_id, |_, tx| tx.receiver_count() <= 1);
    }
}

pub struct Subscription {
    room_id: i64,
    rx: broadcast::Receiver<ChatEvent>,
    groups: Groups,
}

impl Subscription {
    pub fn room_id(&self) -> i64 {
        self.room_id
    }

    /// Events published but not yet received.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub async fn recv(&mut self) -> Result<ChatEvent, broadcast::error::RecvError> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.groups.unsubscribe(self.room_id);
    }
}
