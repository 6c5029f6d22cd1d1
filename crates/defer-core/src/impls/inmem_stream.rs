//! InMemoryQueueServer - 開発用・テスト用の streaming queue
//!
//! # 学習ポイント
//! - tokio::sync::Mutex + Notify による async な blocking recv
//! - `Notified::enable()` で「待機登録 → 状態確認 → await」の取りこぼしを防ぐ
//! - (project, queue) ごとの複数キューの管理
//!
//! 本物の queue service と同じく task code を採番し、ack を記録します。
//! `disconnect()` で全接続を切断でき、reconnect のテストに使えます。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::{Ack, ListenReply, ListenRequest, SendTask, Task, TransportError};
use crate::ports::{
    Clock, CodeGenerator, ListenSink, ListenSource, ListenStream, StreamingTransport,
    SystemClock, TaskSender, UlidCodes,
};

type QueueKey = (String, String);

#[derive(Default)]
struct State {
    queues: HashMap<QueueKey, VecDeque<Task>>,
    acks: Vec<Ack>,
    /// 接続 id → subscribe 済みのキュー（Initial 受信前は None）
    live: HashMap<u64, Option<QueueKey>>,
    opened: u64,
}

enum Next {
    Ready(Task),
    /// 次の task の min_eta までの待ち時間
    Wait(Option<Duration>),
}

impl State {
    fn take_ready(&mut self, key: &QueueKey, now: DateTime<Utc>) -> Next {
        let Some(queue) = self.queues.get_mut(key) else {
            return Next::Wait(None);
        };
        let ready = queue
            .iter()
            .position(|t| t.min_eta.is_none_or(|eta| eta <= now));
        if let Some(task) = ready.and_then(|i| queue.remove(i)) {
            return Next::Ready(task);
        }
        let wait = queue
            .iter()
            .filter_map(|t| t.min_eta)
            .min()
            .and_then(|eta| (eta - now).to_std().ok());
        Next::Wait(wait)
    }
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    codes: UlidCodes<SystemClock>,
    clock: SystemClock,
}

/// InMemoryQueueServer は開発用の streaming queue
///
/// # 使用例
/// ```ignore
/// let server = InMemoryQueueServer::new();
/// let conn = Connection::streaming("acme", Arc::new(server.clone()));
/// listener.handle(conn.queue("emails"));
///
/// server.wait_for_acks(1).await;
/// assert!(server.acks().await[0].success);
/// ```
#[derive(Clone)]
pub struct InMemoryQueueServer {
    inner: Arc<Inner>,
}

impl InMemoryQueueServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                codes: UlidCodes::new(SystemClock),
                clock: SystemClock,
            }),
        }
    }

    /// Drop every open connection; pending and future calls on them fail
    /// with `TransportError::Closed`.
    pub async fn disconnect(&self) {
        self.inner.state.lock().await.live.clear();
        self.inner.notify.notify_waiters();
    }

    pub async fn acks(&self) -> Vec<Ack> {
        self.inner.state.lock().await.acks.clone()
    }

    /// Wait until at least `n` acks have been recorded.
    pub async fn wait_for_acks(&self, n: usize) -> Vec<Ack> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock().await;
                if state.acks.len() >= n {
                    return state.acks.clone();
                }
            }
            notified.await;
        }
    }

    /// Number of listen streams opened so far.
    pub async fn connections(&self) -> u64 {
        self.inner.state.lock().await.opened
    }

    /// Wait until at least `n` listen streams have subscribed.
    pub async fn wait_for_connections(&self, n: u64) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock().await;
                let subscribed = state.live.values().filter(|key| key.is_some()).count();
                if state.opened >= n && subscribed > 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Tasks not yet delivered for a queue.
    pub async fn pending(&self, project: &str, queue_name: &str) -> usize {
        let key = (project.to_string(), queue_name.to_string());
        self.inner
            .state
            .lock()
            .await
            .queues
            .get(&key)
            .map_or(0, VecDeque::len)
    }
}

impl Default for InMemoryQueueServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskSender for InMemoryQueueServer {
    async fn send_tasks(
        &self,
        project: &str,
        queue_name: &str,
        tasks: Vec<SendTask>,
    ) -> Result<(), TransportError> {
        let key = (project.to_string(), queue_name.to_string());
        {
            let mut state = self.inner.state.lock().await;
            let queue = state.queues.entry(key).or_default();
            for task in tasks {
                queue.push_back(Task {
                    code: self.inner.codes.next_code(),
                    payload: task.payload,
                    created: self.inner.clock.now(),
                    retry_count: 0,
                    project: project.to_string(),
                    queue_name: queue_name.to_string(),
                    min_eta: task.min_eta,
                });
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl StreamingTransport for InMemoryQueueServer {
    async fn listen(&self) -> Result<ListenStream, TransportError> {
        let conn = {
            let mut state = self.inner.state.lock().await;
            state.opened += 1;
            let conn = state.opened;
            state.live.insert(conn, None);
            conn
        };
        tracing::debug!(conn, "in-memory listen stream opened");
        Ok(ListenStream {
            sink: Arc::new(MemorySink {
                inner: self.inner.clone(),
                conn,
            }),
            source: Box::new(MemorySource {
                inner: self.inner.clone(),
                conn,
            }),
        })
    }
}

struct MemorySink {
    inner: Arc<Inner>,
    conn: u64,
}

#[async_trait]
impl ListenSink for MemorySink {
    async fn send(&self, request: ListenRequest) -> Result<(), TransportError> {
        {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let Some(subscription) = state.live.get_mut(&self.conn) else {
                return Err(TransportError::Closed);
            };
            match request {
                ListenRequest::Initial(init) => {
                    *subscription = Some((init.project, init.queue_name));
                }
                ListenRequest::Ack(ack) => state.acks.push(ack),
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

struct MemorySource {
    inner: Arc<Inner>,
    conn: u64,
}

#[async_trait]
impl ListenSource for MemorySource {
    async fn recv(&mut self) -> Result<ListenReply, TransportError> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut state = self.inner.state.lock().await;
                let subscription = match state.live.get(&self.conn) {
                    Some(subscription) => subscription.clone(),
                    None => return Err(TransportError::Closed),
                };
                match subscription {
                    Some(key) => match state.take_ready(&key, self.inner.clock.now()) {
                        Next::Ready(task) => return Ok(ListenReply { task }),
                        Next::Wait(wait) => wait,
                    },
                    None => None,
                }
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}
