//! In-memory queue and notifier.
//!
//! Used by the unit tests of both services and for running a handler locally
//! without AWS or Kafka. The queue models the parts of SQS semantics the
//! handlers depend on: delivered messages move to an in-flight set until they
//! are deleted, and [`MemoryQueue::expire_visibility`] makes undeleted
//! deliveries visible again.

use crate::notify::{NotificationEvent, Notifier, NotifyError};
use crate::queue::{MessageQueue, QueueError, QueueMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    deliveries: u64,
    visible: VecDeque<(String, String)>,
    in_flight: Vec<QueueMessage>,
    sent: Vec<String>,
}

/// In-memory message queue
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every body ever sent, in send order
    pub fn sent_bodies(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Number of messages waiting to be received
    pub fn visible_len(&self) -> usize {
        self.state.lock().visible.len()
    }

    /// Number of delivered but not yet deleted messages
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Simulate the visibility window elapsing: every undeleted delivery
    /// becomes receivable again.
    pub fn expire_visibility(&self) {
        let mut state = self.state.lock();
        let expired: Vec<QueueMessage> = state.in_flight.drain(..).collect();
        for message in expired.into_iter().rev() {
            state.visible.push_front((message.message_id, message.body));
        }
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, body: String) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let message_id = format!("msg-{}", state.next_id);
        state.sent.push(body.clone());
        state.visible.push_back((message_id, body));
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        _wait: Duration,
        _visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock();
        let count = max_messages.min(state.visible.len());
        let mut delivered = Vec::with_capacity(count);

        for _ in 0..count {
            let Some((message_id, body)) = state.visible.pop_front() else {
                break;
            };
            state.deliveries += 1;
            let receipt_handle = format!("{message_id}-r{}", state.deliveries);
            let message = QueueMessage::new(message_id, receipt_handle, body);
            state.in_flight.push(message.clone());
            delivered.push(message);
        }

        Ok(delivered)
    }

    async fn delete(&self, messages: &[QueueMessage]) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        for message in messages {
            let position = state
                .in_flight
                .iter()
                .position(|m| m.receipt_handle == message.receipt_handle)
                .ok_or_else(|| QueueError::Delete {
                    message_id: message.message_id.clone(),
                    message: "receipt handle is not in flight".to_string(),
                })?;
            state.in_flight.remove(position);
        }
        Ok(())
    }
}

/// In-memory notifier that records every published event
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    published: Mutex<Vec<NotificationEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<NotificationEvent> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.published.lock().push(event.clone());
        Ok(())
    }
}
