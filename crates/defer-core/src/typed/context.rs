//! Context - handler の実行コンテキスト
//!
//! すべての handler の第 1 引数。deadline とキャンセルを運びます。
//! Framework は deadline を過ぎた handler を強制終了しないので、
//! 長い処理は `done()` / `is_done()` を見て自分で止まること。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::Task;

/// Delivery metadata of the task being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub code: String,
    pub project: String,
    pub queue_name: String,
    pub retry_count: u32,
    pub created: DateTime<Utc>,
}

impl From<&Task> for TaskInfo {
    fn from(task: &Task) -> Self {
        Self {
            code: task.code.clone(),
            project: task.project.clone(),
            queue_name: task.queue_name.clone(),
            retry_count: task.retry_count,
            created: task.created,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    task: Option<Arc<TaskInfo>>,
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    /// A context with no task, no deadline and its own cancellation token.
    pub fn background() -> Self {
        Self {
            task: None,
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// Context for one inbound task, cancelled with `parent` or after `timeout`.
    pub fn for_task(parent: &CancellationToken, task: &Task, timeout: Duration) -> Self {
        Self {
            task: Some(Arc::new(TaskInfo::from(task))),
            deadline: Some(Instant::now() + timeout),
            token: parent.child_token(),
        }
    }

    /// Derive a child context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            task: self.task.clone(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            token: self.token.child_token(),
        }
    }

    pub fn task(&self) -> Option<&TaskInfo> {
        self.task.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline_exceeded()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            code: "t1".to_string(),
            payload: Vec::new(),
            created: Utc::now(),
            retry_count: 2,
            project: "acme".to_string(),
            queue_name: "emails".to_string(),
            min_eta: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_done() {
        let parent = CancellationToken::new();
        let ctx = Context::for_task(&parent, &task(), Duration::from_secs(30));
        assert!(!ctx.is_done());

        ctx.done().await;
        assert!(ctx.deadline_exceeded());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let ctx = Context::for_task(&parent, &task(), Duration::from_secs(30));
        parent.cancel();
        ctx.done().await;
        assert!(ctx.is_done());
        assert!(!ctx.deadline_exceeded());
    }

    #[test]
    fn task_info_is_exposed() {
        let parent = CancellationToken::new();
        let ctx = Context::for_task(&parent, &task(), Duration::from_secs(1));
        let info = ctx.task().unwrap();
        assert_eq!(info.code, "t1");
        assert_eq!(info.project, "acme");
        assert_eq!(info.retry_count, 2);

        assert!(Context::background().task().is_none());
    }

    #[test]
    fn child_deadline_never_extends_parent() {
        let parent = CancellationToken::new();
        let ctx = Context::for_task(&parent, &task(), Duration::from_secs(1));
        let child = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), ctx.deadline());
    }
}
