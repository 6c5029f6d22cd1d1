//! defer-core
//!
//! 遅延関数呼び出しのための building blocks。
//! 関数を登録し、型チェック付きで呼び出しを task に直列化し、
//! queue から受け取った task を handler で実行して ack します。
//!
//! # モジュール構成
//! - **domain**: wire 上のレコード（SendTask, Task, ListenRequest）、エラー、MessagePack framing
//! - **typed**: 型付き関数 API（ArgType, Handler, FunctionRegistry, Invocation codec）
//! - **ports**: 抽象化レイヤー（StreamingTransport, PubSubTransport, ErrorReporter, Clock）
//! - **app**: Connection / Queue、Listener（dispatch loop）、設定
//! - **impls**: 実装（in-memory transport, NATS）
//! - **observability**: tracing の初期化

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use crate::app::{Connection, DeferConfig, Listener, ListenerConfig, Queue};
pub use crate::domain::{DeferError, DispatchError, HandlerError, SendTask, Task};
pub use crate::typed::{Arg, ArgType, Context, Dynamic, Function, FunctionRegistry, Variadic};
