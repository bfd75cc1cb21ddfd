use crate::bus::{Delivery, FanoutBus, Subscription};
use crate::channel::{parse_user_channel, user_channel, USER_EVENTS_PATTERN};
use crate::error::{BusError, Result};
use crate::reconnect::ReconnectPolicy;
use async_trait::async_trait;
use futures_util::StreamExt;
use imgpipe_core::UserId;
use redis::{aio::PubSub, AsyncCommands, Client, Msg};
use tokio::sync::mpsc;

const SUBSCRIPTION_BUFFER: usize = 1024;

/// Redis pub/sub transport.
///
/// Publishes go out on a short-lived connection per call. A subscription
/// owns one dedicated connection pattern-subscribed to `user:*:events` and
/// reconnects on transport failure according to its [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct RedisBus {
    client: Client,
    reconnect: ReconnectPolicy,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            reconnect: ReconnectPolicy::default(),
        })
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    async fn open_pubsub(client: &Client) -> Result<PubSub> {
        let conn = client
            .get_async_connection()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .psubscribe(USER_EVENTS_PATTERN)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(pubsub)
    }

    fn decode(msg: &Msg) -> Option<Delivery> {
        let channel = msg.get_channel_name();
        let Some(user_id) = parse_user_channel(channel) else {
            tracing::warn!(channel, "Ignoring message on foreign channel");
            return None;
        };
        match msg.get_payload::<String>() {
            Ok(payload) => Some(Delivery { user_id, payload }),
            Err(e) => {
                tracing::warn!(channel, error = %e, "Ignoring undecodable message");
                None
            }
        }
    }

    async fn run_subscriber(
        client: Client,
        policy: ReconnectPolicy,
        mut pubsub: Option<PubSub>,
        tx: mpsc::Sender<Result<Delivery>>,
    ) {
        let mut retry = 0u32;

        loop {
            let connected = match pubsub.take() {
                Some(pubsub) => Ok(pubsub),
                None => Self::open_pubsub(&client).await,
            };

            match connected {
                Ok(pubsub) => {
                    if retry > 0 {
                        tracing::info!(retry, "Bus subscriber reconnected");
                    }
                    retry = 0;

                    let mut messages = pubsub.into_on_message();
                    while let Some(msg) = messages.next().await {
                        let Some(delivery) = Self::decode(&msg) else {
                            continue;
                        };
                        if tx.send(Ok(delivery)).await.is_err() {
                            return;
                        }
                    }
                    tracing::error!("Bus subscriber connection lost");
                }
                Err(e) => {
                    tracing::error!(error = %e, retry, "Bus subscriber reconnect failed");
                }
            }

            if tx.is_closed() {
                return;
            }

            match policy.delay(retry) {
                Some(delay) => {
                    retry += 1;
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        attempts = retry,
                        "Max bus reconnect attempts reached. Manual intervention required."
                    );
                    let _ = tx
                        .send(Err(BusError::ReconnectExhausted { attempts: retry }))
                        .await;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl FanoutBus for RedisBus {
    async fn publish(&self, user_id: &UserId, payload: String) -> Result<()> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let receivers: i64 = conn
            .publish(user_channel(user_id), payload)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        tracing::trace!(user_id = %user_id, receivers, "Published event");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let pubsub = Self::open_pubsub(&self.client).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        tokio::spawn(Self::run_subscriber(
            self.client.clone(),
            self.reconnect,
            Some(pubsub),
            tx,
        ));

        tracing::info!(pattern = USER_EVENTS_PATTERN, "Bus subscriber started");
        Ok(Subscription::new(rx))
    }
}
