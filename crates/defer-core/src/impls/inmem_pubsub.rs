//! InMemoryPubSub - 開発用・テスト用の fire-and-forget transport
//!
//! # 学習ポイント
//! - tokio::sync::broadcast による fan-out
//! - `futures::stream::unfold` で receiver を Stream に変換
//! - DashMap で channel ごとの sender を lock なしで管理
//!
//! Subscriber がいない channel への publish は捨てられます（本物の pub/sub と同じ）。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::domain::{wire, SendTask, TransportError};
use crate::ports::{PubSubTransport, RawMessages, TaskSender};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Default)]
pub struct InMemoryPubSub {
    channels: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    subscribed: Arc<Notify>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish one raw message. Returns how many subscribers received it.
    pub fn publish(&self, channel: &str, message: Vec<u8>) -> usize {
        self.sender(channel).send(message).unwrap_or(0)
    }

    pub fn subscribers(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Wait until `channel` has at least one subscriber.
    pub async fn wait_for_subscriber(&self, channel: &str) {
        loop {
            let notified = self.subscribed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.subscribers(channel) > 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drop the channel; every subscription on it ends.
    pub fn close(&self, channel: &str) {
        self.channels.remove(channel);
    }
}

#[async_trait]
impl TaskSender for InMemoryPubSub {
    async fn send_tasks(
        &self,
        _project: &str,
        queue_name: &str,
        tasks: Vec<SendTask>,
    ) -> Result<(), TransportError> {
        let message = wire::encode_frames(&tasks).map_err(|e| TransportError::Send(e.to_string()))?;
        let delivered = self.publish(queue_name, message);
        tracing::debug!(channel = queue_name, tasks = tasks.len(), delivered, "published tasks");
        Ok(())
    }
}

#[async_trait]
impl PubSubTransport for InMemoryPubSub {
    async fn subscribe(&self, channel: &str) -> Result<RawMessages, TransportError> {
        let rx = self.sender(channel).subscribe();
        self.subscribed.notify_waiters();

        let channel = channel.to_string();
        let messages = futures::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %channel, skipped, "pub/sub subscriber lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(messages.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_framed_batch() {
        let pubsub = InMemoryPubSub::new();
        let mut messages = pubsub.subscribe("emails").await.unwrap();
        assert_eq!(pubsub.subscribers("emails"), 1);

        let tasks = vec![SendTask::new(vec![1]), SendTask::new(vec![2])];
        pubsub
            .send_tasks("acme", "emails", tasks.clone())
            .await
            .unwrap();

        let message = messages.next().await.unwrap();
        assert_eq!(wire::decode_frames(&message).unwrap(), tasks);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let pubsub = InMemoryPubSub::new();
        assert_eq!(pubsub.publish("nobody", vec![1]), 0);

        let mut messages = pubsub.subscribe("nobody").await.unwrap();
        assert_eq!(pubsub.publish("nobody", vec![2]), 1);
        assert_eq!(messages.next().await, Some(vec![2]));
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let pubsub = InMemoryPubSub::new();
        let mut messages = pubsub.subscribe("emails").await.unwrap();
        pubsub.close("emails");
        assert_eq!(messages.next().await, None);
    }
}
