use crate::bus::{Delivery, FanoutBus, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use imgpipe_core::UserId;
use tokio::sync::{broadcast, mpsc};

const DEFAULT_CAPACITY: usize = 1024;

/// Single-process bus over a tokio broadcast channel.
///
/// Used when no Redis URL is configured and in tests. Every subscriber sees
/// every publish made after it subscribed.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: broadcast::Sender<Delivery>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FanoutBus for InMemoryBus {
    async fn publish(&self, user_id: &UserId, payload: String) -> Result<()> {
        let delivery = Delivery {
            user_id: user_id.clone(),
            payload,
        };
        // No subscribers means nobody to notify
        let receivers = self.tx.send(delivery).unwrap_or(0);
        tracing::trace!(user_id = %user_id, receivers, "Published event");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let mut source = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(self.capacity);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(delivery) => {
                        if tx.send(Ok(delivery)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgpipe_core::JobResultEvent;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::new();
        bus.publish(&UserId::new("42"), "{}".into()).await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_order_preserved() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe().await.unwrap();
        let user = UserId::new("42");

        for i in 0..5 {
            bus.publish(&user, i.to_string()).await.unwrap();
        }
        for i in 0..5 {
            let delivery = sub.recv().await.unwrap().unwrap();
            assert_eq!(delivery.user_id, user);
            assert_eq!(delivery.payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe().await.unwrap();
        let mut b = bus.subscribe().await.unwrap();

        let event = JobResultEvent::success("img-1".into(), "Image resized");
        bus.publish_event(&UserId::new("7"), &event).await.unwrap();

        for sub in [&mut a, &mut b] {
            let delivery = sub.recv().await.unwrap().unwrap();
            let decoded: JobResultEvent = serde_json::from_str(&delivery.payload).unwrap();
            assert_eq!(decoded, event);
        }
    }
}
