//! Impls - transport の実装
//!
//! # 含まれる実装
//! - **InMemoryQueueServer**: 開発用・テスト用の streaming queue（ack あり）
//! - **InMemoryPubSub**: 開発用・テスト用の fire-and-forget channel
//! - **NatsTransport**: NATS core pub/sub を使う fire-and-forget transport

pub mod inmem_pubsub;
pub mod inmem_stream;
pub mod nats;

// 主要な型を再エクスポート
pub use self::inmem_pubsub::InMemoryPubSub;
pub use self::inmem_stream::InMemoryQueueServer;
pub use self::nats::NatsTransport;
