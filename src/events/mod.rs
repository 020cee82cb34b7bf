use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events published by the order workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderUpdated(Uuid),
    PaymentCompleted {
        order_id: Uuid,
        session_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
        session_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. Failures are reported to the
    /// caller but are never fatal to a request.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Create a connected sender/receiver pair.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Runs for the process
/// lifetime; external consumers (notifications, analytics) would hang
/// off this loop.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "event: order created");
            }
            Event::OrderUpdated(order_id) => {
                info!(order_id = %order_id, "event: order updated");
            }
            Event::PaymentCompleted {
                order_id,
                session_id,
            } => {
                info!(order_id = %order_id, session_id = %session_id, "event: payment completed");
            }
            Event::PaymentFailed {
                order_id,
                session_id,
            } => {
                warn!(order_id = %order_id, session_id = %session_id, "event: payment failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let (sender, mut rx) = channel(8);
        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_reports_error() {
        let (sender, rx) = channel(1);
        drop(rx);
        assert!(sender.send(Event::OrderUpdated(Uuid::new_v4())).await.is_err());
    }
}
