//! NatsTransport - NATS 上の fire-and-forget transport
//!
//! Queue 名をそのまま subject として使い、`SendTask` の batch を
//! length-prefixed MessagePack frame で 1 message に詰めて publish します。
//! NATS core の pub/sub は永続化しないので、subscriber がいなければ task は消えます。

use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

use crate::domain::{wire, SendTask, TransportError};
use crate::ports::{PubSubTransport, RawMessages, TaskSender};

#[derive(Debug, Clone)]
pub struct NatsTransport {
    client: async_nats::Client,
}

impl NatsTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        info!(url, "connecting to NATS");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        info!("NATS connection established");
        Ok(Self { client })
    }

    /// Wrap an already-connected client.
    pub fn from_client(client: async_nats::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

#[async_trait]
impl TaskSender for NatsTransport {
    async fn send_tasks(
        &self,
        _project: &str,
        queue_name: &str,
        tasks: Vec<SendTask>,
    ) -> Result<(), TransportError> {
        let payload = wire::encode_frames(&tasks).map_err(|e| TransportError::Send(e.to_string()))?;
        self.client
            .publish(queue_name.to_string(), payload.into())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl PubSubTransport for NatsTransport {
    async fn subscribe(&self, channel: &str) -> Result<RawMessages, TransportError> {
        let subscriber = self
            .client
            .subscribe(channel.to_string())
            .await
            .map_err(|e| TransportError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(subscriber.map(|message| message.payload.to_vec()).boxed())
    }
}
