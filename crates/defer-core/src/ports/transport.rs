//! Transport ports - queue service との接続
//!
//! 2 種類の transport があり、意図的に非対称です。
//!
//! # Streaming
//! - 双方向 stream を開き、`ListenRequest::Initial` を送ってから task を受信
//! - task ごとに `Ack{code, success}` を返す
//! - task code は server が採番
//!
//! # Pub/Sub (fire-and-forget)
//! - queue 名の channel を subscribe して生の message を受信
//! - 1 message に複数の `SendTask` が frame されている
//! - ack も retry もない
//!
//! 認証や接続の確立はここでは扱いません（既に接続済みの handle を受け取る）。

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::{ListenReply, ListenRequest, SendTask, TransportError};

/// TaskSender は task の batch を queue に送る
#[async_trait]
pub trait TaskSender: Send + Sync {
    async fn send_tasks(
        &self,
        project: &str,
        queue_name: &str,
        tasks: Vec<SendTask>,
    ) -> Result<(), TransportError>;
}

/// Outbound half of a listen stream. Shared by every in-flight task unit.
#[async_trait]
pub trait ListenSink: Send + Sync {
    async fn send(&self, request: ListenRequest) -> Result<(), TransportError>;
}

/// Inbound half of a listen stream. Owned by the receive loop.
#[async_trait]
pub trait ListenSource: Send {
    async fn recv(&mut self) -> Result<ListenReply, TransportError>;
}

/// One open bidirectional listen stream.
pub struct ListenStream {
    pub sink: Arc<dyn ListenSink>,
    pub source: Box<dyn ListenSource>,
}

#[async_trait]
pub trait StreamingTransport: TaskSender {
    async fn listen(&self) -> Result<ListenStream, TransportError>;
}

/// Raw pub/sub messages. The stream ends when the subscription closes.
pub type RawMessages = BoxStream<'static, Vec<u8>>;

#[async_trait]
pub trait PubSubTransport: TaskSender {
    async fn subscribe(&self, channel: &str) -> Result<RawMessages, TransportError>;
}
