//! ErrorReporter port - handler 失敗の外部通知
//!
//! エラー集約サービスへの bridge。未設定なら NoopReporter を使います。

use async_trait::async_trait;

use crate::domain::DispatchError;
use crate::typed::Context;

/// ErrorReporter は handler の失敗を外部に通知
///
/// `ctx.task()` から code / project / queue を取れます。
/// 通知の失敗は呼び出し側に返さないこと（dispatch loop を止めない）。
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report_failure(&self, ctx: &Context, error: &DispatchError);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

#[async_trait]
impl ErrorReporter for NoopReporter {
    async fn report_failure(&self, _ctx: &Context, _error: &DispatchError) {}
}
