//! JoinGroup - 最初の transport error で全体を止める task group
//!
//! # 学習ポイント
//! - JoinSet で in-flight の task を追跡
//! - CancellationToken の child token で「この接続だけ」止める
//! - 最初のエラーだけを保存（後続のエラーは捨てる）

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domain::TransportError;

pub(crate) struct JoinGroup {
    token: CancellationToken,
    tasks: JoinSet<()>,
    first_error: Arc<Mutex<Option<TransportError>>>,
}

fn record(slot: &Mutex<Option<TransportError>>, err: TransportError) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(err);
    }
}

impl JoinGroup {
    /// The group is cancelled together with `parent`.
    pub(crate) fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            tasks: JoinSet::new(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run `unit` in the group. An error cancels the whole group.
    pub(crate) fn spawn<F>(&mut self, unit: F)
    where
        F: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let token = self.token.clone();
        let slot = self.first_error.clone();
        self.tasks.spawn(async move {
            if let Err(err) = unit.await {
                record(&slot, err);
                token.cancel();
            }
        });
    }

    /// Record `err` from the group's own loop and cancel.
    pub(crate) fn fail(&self, err: TransportError) {
        record(&self.first_error, err);
        self.token.cancel();
    }

    /// Collect finished units without waiting.
    pub(crate) fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "task unit aborted");
            }
        }
    }

    /// Wait for every unit, then return the first error.
    pub(crate) async fn wait(mut self) -> Result<(), TransportError> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "task unit aborted");
            }
        }
        self.token.cancel();
        let first = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
