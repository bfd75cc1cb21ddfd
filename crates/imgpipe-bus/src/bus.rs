use crate::error::Result;
use async_trait::async_trait;
use imgpipe_core::{JobResultEvent, UserId};
use tokio::sync::mpsc;

/// One message received on a user channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub user_id: UserId,
    /// Serialized event, forwarded verbatim to client sockets
    pub payload: String,
}

/// Process-wide stream of deliveries for every user channel.
///
/// An `Err` item is terminal for the subscription; see
/// [`BusError::ReconnectExhausted`](crate::BusError::ReconnectExhausted).
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Result<Delivery>>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Delivery>>) -> Self {
        Self { rx }
    }

    /// Next delivery, or `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<Result<Delivery>> {
        self.rx.recv().await
    }
}

/// Message-channel abstraction over the cross-process transport.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    /// Publish `payload` on the channel for `user_id`
    async fn publish(&self, user_id: &UserId, payload: String) -> Result<()>;

    /// Listen on every user channel
    async fn subscribe(&self) -> Result<Subscription>;

    /// Serialize and publish a job result for `user_id`
    async fn publish_event(&self, user_id: &UserId, event: &JobResultEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.publish(user_id, payload).await
    }
}
