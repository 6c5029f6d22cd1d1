//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（queue service, pub/sub broker, error 集約サービス）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod error_reporter;
pub mod id_generator;
pub mod transport;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::error_reporter::{ErrorReporter, NoopReporter};
pub use self::id_generator::{CodeGenerator, SequentialCodes, UlidCodes};
pub use self::transport::{
    ListenSink, ListenSource, ListenStream, PubSubTransport, RawMessages, StreamingTransport,
    TaskSender,
};
