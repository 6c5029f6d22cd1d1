//! Listener - queue から task を受け取って実行する dispatch loop
//!
//! # フロー（streaming）
//! 1. `listen()` で stream を開き、`ListenRequest::Initial` を送る
//! 2. semaphore の permit を取ってから次の task を受信（満杯なら受信を止める）
//! 3. task ごとに unit を spawn: handler 実行 → 失敗ならログ + reporter → 必ず Ack
//! 4. 送受信のエラーで group を cancel し、in-flight の unit を待ってから返る
//!
//! # フロー（pub/sub）
//! 1. queue 名の channel を subscribe
//! 2. message を frame 分割して `SendTask` を取り出す
//! 3. `sim-N` の code を振って 1 件ずつ順番に実行（ack なし）
//!
//! どちらも loop を抜けたら固定の遅延の後に再接続します（上限なし、backoff なし）。

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::{wire, ListenRequest, Task, TransportError};
use crate::ports::{
    Clock, CodeGenerator, ErrorReporter, ListenStream, NoopReporter, PubSubTransport,
    SequentialCodes, StreamingTransport, SystemClock,
};
use crate::typed::{Context, FunctionRegistry};

use super::config::ListenerConfig;
use super::dispatch::handle_task;
use super::group::JoinGroup;
use super::queue::{Queue, Transport};

/// Listener は登録済みの関数を queue からの task で実行
///
/// # 使用例
/// ```ignore
/// let registry = Arc::new(registry); // ここで凍結
/// let listener = Listener::new(registry).with_reporter(Arc::new(MyReporter));
/// let handle = listener.handle(conn.queue("emails"));
///
/// // 終了時
/// listener.shutdown();
/// handle.await?;
/// ```
#[derive(Clone)]
pub struct Listener {
    registry: Arc<FunctionRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    config: ListenerConfig,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Listener {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            reporter: Arc::new(NoopReporter),
            config: ListenerConfig::default(),
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Stop every loop started by this listener. In-flight handlers see
    /// their context cancelled and are awaited; nothing is aborted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Listen to `queue` in the background, reconnecting forever until shutdown.
    pub fn handle(&self, queue: Queue) -> JoinHandle<()> {
        let listener = self.clone();
        tokio::spawn(async move { listener.run(queue).await })
    }

    /// Reconnect loop for one queue. Returns only after `shutdown()`.
    pub async fn run(&self, queue: Queue) {
        let delay = self.config.reconnect_delay();
        loop {
            let result = self.listen_queue(&queue).await;
            if self.shutdown.is_cancelled() {
                break;
            }
            match result {
                Err(e) => error!(
                    project = %queue.project(),
                    queue = %queue.name(),
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "error listening to queue, retrying"
                ),
                Ok(()) => info!(
                    project = %queue.project(),
                    queue = %queue.name(),
                    retry_in_ms = delay.as_millis() as u64,
                    "queue subscription ended, reconnecting"
                ),
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(project = %queue.project(), queue = %queue.name(), "listener stopped");
    }

    /// One connection attempt: returns when the connection ends.
    pub async fn listen_queue(&self, queue: &Queue) -> Result<(), TransportError> {
        match queue.connection().transport() {
            Transport::Streaming(t) => self.listen_stream(t.as_ref(), queue).await,
            Transport::PubSub(t) => self.listen_pubsub(t.as_ref(), queue).await,
        }
    }

    async fn listen_stream(
        &self,
        transport: &dyn StreamingTransport,
        queue: &Queue,
    ) -> Result<(), TransportError> {
        let ListenStream { sink, mut source } = transport.listen().await?;
        sink.send(ListenRequest::initial(queue.project(), queue.name()))
            .await?;
        info!(project = %queue.project(), queue = %queue.name(), "listening to queue");

        let mut group = JoinGroup::new(&self.shutdown);
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight));
        loop {
            group.reap();

            let permit = tokio::select! {
                _ = group.token().cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let reply = tokio::select! {
                _ = group.token().cancelled() => break,
                reply = source.recv() => reply,
            };
            let task = match reply {
                Ok(reply) => reply.task,
                Err(e) => {
                    group.fail(e);
                    break;
                }
            };

            let listener = self.clone();
            let sink = sink.clone();
            let parent = group.token().clone();
            group.spawn(async move {
                let _permit = permit;
                let ctx = Context::for_task(&parent, &task, listener.config.handler_timeout());
                let success = listener.process(ctx, &task).await;
                sink.send(ListenRequest::ack(task.code.clone(), success))
                    .await
                    .map_err(|e| TransportError::Ack {
                        code: task.code.clone(),
                        reason: e.to_string(),
                    })
            });
        }
        group.wait().await
    }

    async fn listen_pubsub(
        &self,
        transport: &dyn PubSubTransport,
        queue: &Queue,
    ) -> Result<(), TransportError> {
        let mut messages = transport.subscribe(queue.name()).await?;
        info!(project = %queue.project(), queue = %queue.name(), "subscribed to queue");

        let codes = SequentialCodes::new("sim");
        let token = self.shutdown.child_token();
        loop {
            let message = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                message = messages.next() => message,
            };
            let Some(message) = message else {
                return Ok(());
            };

            for sent in wire::decode_frames(&message)? {
                let task = Task {
                    code: codes.next_code(),
                    payload: sent.payload,
                    created: self.clock.now(),
                    retry_count: 0,
                    project: queue.project().to_string(),
                    queue_name: queue.name().to_string(),
                    min_eta: sent.min_eta,
                };
                let ctx = Context::for_task(&token, &task, self.config.handler_timeout());
                self.process(ctx, &task).await;
            }
        }
    }

    /// Run one task and report its outcome. Returns whether it succeeded.
    async fn process(&self, ctx: Context, task: &Task) -> bool {
        debug!(
            project = %task.project,
            queue = %task.queue_name,
            task = %task.code,
            retry_count = task.retry_count,
            "task received"
        );
        match handle_task(&self.registry, ctx.clone(), &task.payload).await {
            Ok(()) => {
                debug!(task = %task.code, "task done");
                true
            }
            Err(err) => {
                error!(
                    project = %task.project,
                    queue = %task.queue_name,
                    task = %task.code,
                    error = %err,
                    "task handler failed"
                );
                self.reporter.report_failure(&ctx, &err).await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::domain::{DispatchError, HandlerError, SendTask};
    use crate::impls::{InMemoryPubSub, InMemoryQueueServer};
    use crate::ports::{FixedClock, TaskSender};
    use crate::typed::Function;
    use crate::app::queue::Connection;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_config() -> ListenerConfig {
        ListenerConfig {
            handler_timeout_ms: 1_000,
            reconnect_delay_ms: 20,
            max_in_flight: 64,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[derive(Default)]
    struct RecordingReporter {
        failures: Mutex<Vec<(Option<String>, String)>>,
    }

    #[async_trait]
    impl ErrorReporter for RecordingReporter {
        async fn report_failure(&self, ctx: &Context, error: &DispatchError) {
            self.failures
                .lock()
                .unwrap()
                .push((ctx.task().map(|t| t.code.clone()), error.to_string()));
        }
    }

    /// `check(ctx, n)`: fails for negative `n`, records every call.
    fn register_check(registry: &mut FunctionRegistry, seen: Arc<Mutex<Vec<i32>>>) -> Function {
        registry.register("check", move |_ctx: Context, n: i32| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(n);
                if n < 0 {
                    return Err::<(), HandlerError>(format!("negative: {n}").into());
                }
                Ok(())
            }
        })
    }

    async fn send(f: &Function, queue: &Queue, values: &[i32]) {
        let tasks = values
            .iter()
            .map(|n| f.task(args![*n].unwrap()).unwrap())
            .collect();
        queue.send_tasks(tasks).await.unwrap();
    }

    #[tokio::test]
    async fn streaming_acks_success_and_failure_then_continues() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = FunctionRegistry::new();
        let check = register_check(&mut registry, seen.clone());

        let server = InMemoryQueueServer::new();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("checks");
        let reporter = Arc::new(RecordingReporter::default());
        let listener = Listener::new(Arc::new(registry))
            .with_config(fast_config())
            .with_reporter(reporter.clone());
        let handle = listener.handle(queue.clone());

        send(&check, &queue, &[1, -1, 2]).await;
        let acks = server.wait_for_acks(3).await;
        assert_eq!(acks.iter().filter(|a| a.success).count(), 2);
        assert_eq!(acks.iter().filter(|a| !a.success).count(), 1);

        let failures = reporter.failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        let failed_ack = acks.iter().find(|a| !a.success).unwrap();
        assert_eq!(failures[0].0.as_deref(), Some(failed_ack.code.as_str()));
        assert!(failures[0].1.contains("negative: -1"));

        // 失敗の後も受信は続く
        send(&check, &queue, &[3]).await;
        server.wait_for_acks(4).await;
        let mut values = seen.lock().unwrap().clone();
        values.sort();
        assert_eq!(values, vec![-1, 1, 2, 3]);

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn handler_receives_its_int_argument() {
        let got = Arc::new(Mutex::new(None));
        let sink = got.clone();
        let mut registry = FunctionRegistry::new();
        let f = registry.register("handler", move |_ctx: Context, n: i32| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = Some(n);
            }
        });

        let server = InMemoryQueueServer::new();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("q");
        let listener = Listener::new(Arc::new(registry)).with_config(fast_config());
        let handle = listener.handle(queue.clone());

        f.call(&queue, args![5i32].unwrap()).await.unwrap();
        let acks = server.wait_for_acks(1).await;
        assert!(acks[0].success);
        assert_eq!(*got.lock().unwrap(), Some(5));

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let mut registry = FunctionRegistry::new();
        let boom = registry.register("boom", |_ctx: Context, n: i32| async move {
            if n == 0 {
                panic!("zero");
            }
        });

        let server = InMemoryQueueServer::new();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("q");
        let listener = Listener::new(Arc::new(registry)).with_config(fast_config());
        let handle = listener.handle(queue.clone());

        send(&boom, &queue, &[0]).await;
        let acks = server.wait_for_acks(1).await;
        assert!(!acks[0].success);

        send(&boom, &queue, &[1]).await;
        let acks = server.wait_for_acks(2).await;
        assert!(acks[1].success);
        assert_eq!(server.connections().await, 1);

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_task_is_acked_as_failed() {
        let server = InMemoryQueueServer::new();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("q");
        let listener = Listener::new(Arc::new(FunctionRegistry::new())).with_config(fast_config());
        let handle = listener.handle(queue.clone());

        queue
            .send_tasks(vec![SendTask::new(vec![0xc1, 0x00])])
            .await
            .unwrap();
        let acks = server.wait_for_acks(1).await;
        assert!(!acks[0].success);

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_disconnect() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = FunctionRegistry::new();
        let check = register_check(&mut registry, seen.clone());

        let server = InMemoryQueueServer::new();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("q");
        let listener = Listener::new(Arc::new(registry)).with_config(fast_config());
        let handle = listener.handle(queue.clone());

        server.wait_for_connections(1).await;
        server.disconnect().await;
        server.wait_for_connections(2).await;

        send(&check, &queue, &[7]).await;
        let acks = server.wait_for_acks(1).await;
        assert!(acks[0].success);
        assert_eq!(*seen.lock().unwrap(), vec![7]);

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn in_flight_handlers_are_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = FunctionRegistry::new();
        let slow = {
            let running = running.clone();
            let peak = peak.clone();
            registry.register("slow", move |_ctx: Context, _n: i32| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
        };

        let server = InMemoryQueueServer::new();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("q");
        let listener = Listener::new(Arc::new(registry)).with_config(ListenerConfig {
            max_in_flight: 2,
            ..fast_config()
        });
        let handle = listener.handle(queue.clone());

        send(&slow, &queue, &[1, 2, 3, 4, 5, 6]).await;
        let acks = server.wait_for_acks(6).await;
        assert!(acks.iter().all(|a| a.success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn pubsub_runs_serially_with_sim_codes() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let mut registry = FunctionRegistry::new();
        let f = registry.register("record", move |ctx: Context, n: i32| {
            let sink = sink.clone();
            async move {
                let info = ctx.task().cloned().unwrap();
                sink.lock().unwrap().push((info.code, info.queue_name, info.created, n));
                if n == 2 {
                    return Err::<(), HandlerError>("two".into());
                }
                Ok(())
            }
        });

        let pubsub = InMemoryPubSub::new();
        let queue = Connection::pubsub("acme", Arc::new(pubsub.clone())).queue("jobs");
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let listener = Listener::new(Arc::new(registry))
            .with_config(fast_config())
            .with_clock(Arc::new(FixedClock::new(created)))
            .with_reporter(reporter.clone());
        let handle = listener.handle(queue.clone());
        pubsub.wait_for_subscriber("jobs").await;

        send(&f, &queue, &[1, 2, 3]).await;
        send(&f, &queue, &[4]).await;
        eventually(|| calls.lock().unwrap().len() == 4).await;

        let calls = calls.lock().unwrap().clone();
        let codes: Vec<_> = calls.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(codes, vec!["sim-1", "sim-2", "sim-3", "sim-4"]);
        let values: Vec<_> = calls.iter().map(|c| c.3).collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert!(calls.iter().all(|c| c.1 == "jobs" && c.2 == created));

        let failures = reporter.failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.as_deref(), Some("sim-2"));

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn pubsub_codes_restart_per_subscription() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let mut registry = FunctionRegistry::new();
        let f = registry.register("record", move |ctx: Context| {
            let sink = sink.clone();
            async move {
                let code = ctx.task().map(|t| t.code.clone()).unwrap_or_default();
                sink.lock().unwrap().push(code);
            }
        });

        let pubsub = InMemoryPubSub::new();
        let queue = Connection::pubsub("acme", Arc::new(pubsub.clone())).queue("jobs");
        let listener = Listener::new(Arc::new(registry)).with_config(fast_config());
        let handle = listener.handle(queue.clone());

        pubsub.wait_for_subscriber("jobs").await;
        f.call(&queue, Vec::new()).await.unwrap();
        eventually(|| calls.lock().unwrap().len() == 1).await;

        // subscription が切れたら再 subscribe して code は 1 から
        pubsub.close("jobs");
        pubsub.wait_for_subscriber("jobs").await;
        f.call(&queue, Vec::new()).await.unwrap();
        eventually(|| calls.lock().unwrap().len() == 2).await;

        assert_eq!(*calls.lock().unwrap(), vec!["sim-1", "sim-1"]);

        listener.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn bad_frame_restarts_the_subscription() {
        let pubsub = InMemoryPubSub::new();
        let queue = Connection::pubsub("acme", Arc::new(pubsub.clone())).queue("jobs");
        let listener = Listener::new(Arc::new(FunctionRegistry::new()));

        let listen = tokio::spawn({
            let listener = listener.clone();
            let queue = queue.clone();
            async move { listener.listen_queue(&queue).await }
        });
        pubsub.wait_for_subscriber("jobs").await;
        pubsub.publish("jobs", vec![0, 0]);

        let err = listen.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Frame(_)));
    }

    #[tokio::test]
    async fn shutdown_stops_a_waiting_listener() {
        let server = InMemoryQueueServer::new();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("q");
        let listener = Listener::new(Arc::new(FunctionRegistry::new()));
        let handle = listener.handle(queue);

        server.wait_for_connections(1).await;
        listener.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn streaming_tasks_keep_server_fields() {
        let info = Arc::new(Mutex::new(None));
        let sink = info.clone();
        let mut registry = FunctionRegistry::new();
        let f = registry.register("info", move |ctx: Context| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = ctx.task().cloned();
            }
        });

        let server = InMemoryQueueServer::new();
        server
            .send_tasks("acme", "q", vec![f.task(Vec::new()).unwrap()])
            .await
            .unwrap();
        let queue = Connection::streaming("acme", Arc::new(server.clone())).queue("q");
        let listener = Listener::new(Arc::new(registry)).with_config(fast_config());
        let handle = listener.handle(queue);

        let acks = server.wait_for_acks(1).await;
        let info = info.lock().unwrap().clone().unwrap();
        assert_eq!(info.code, acks[0].code);
        assert!(info.code.starts_with("task-"));
        assert_eq!(info.project, "acme");
        assert_eq!(info.queue_name, "q");

        listener.shutdown();
        handle.await.unwrap();
    }
}
