//! App - アプリケーション層
//!
//! このモジュールは、ports と typed を組み合わせて producer / consumer の
//! ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **Connection / Queue**: transport handle + project + queue 名
//! - **Listener**: dispatch loop（streaming / pub/sub の 2 variant と再接続）
//! - **handle_task**: payload の decode → handler 実行（panic isolation 付き）
//! - **DeferConfig**: 設定の読み込み

pub mod config;
pub mod dispatch;
mod group;
pub mod listener;
pub mod queue;

// 主要な型を再エクスポート
pub use self::config::{DeferConfig, ListenerConfig, LogFormat, TransportKind};
pub use self::dispatch::handle_task;
pub use self::listener::Listener;
pub use self::queue::{Connection, Queue, Transport};
