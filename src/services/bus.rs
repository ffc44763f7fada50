use std::{future::Future, pin::Pin, time::Duration};

use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;

/// A message received from one of the subscribed channels.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Live subscription. The stream ends when the underlying connection is lost.
pub type BusStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },
    #[error("publish to {channel} not acknowledged within {timeout_ms} ms")]
    Timeout { channel: String, timeout_ms: u64 },
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Best-effort fan-out: no ordering between publishers, no delivery to
/// subscribers that are not connected at publish time.
pub trait Bus: Clone + Send + Sync + 'static {
    fn publish(
        &self,
        channel: &str,
        payload: String,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    fn subscribe(
        &self,
        channels: &[&str],
    ) -> impl Future<Output = Result<BusStream, BusError>> + Send;
}

/// Publishes and gives up once `timeout` elapses without an acknowledgement.
pub async fn publish_bounded<B: Bus>(
    bus: &B,
    channel: &str,
    payload: String,
    timeout: Duration,
) -> Result<(), BusError> {
    match tokio::time::timeout(timeout, bus.publish(channel, payload)).await {
        Ok(result) => result,
        Err(_) => Err(BusError::Timeout {
            channel: channel.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Redis pub/sub. Publishing goes through the shared multiplexed connection,
/// every subscription opens its own dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisBus {
    pub async fn connect(client: redis::Client) -> anyhow::Result<Self> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BusStream, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .map_err(|e| BusError::Subscribe(e.to_string()))?;
        }

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let message = msg.get_payload::<String>().ok().map(|payload| BusMessage {
                channel: msg.get_channel_name().to_string(),
                payload,
            });
            futures_util::future::ready(message)
        });

        Ok(Box::pin(stream))
    }
}
