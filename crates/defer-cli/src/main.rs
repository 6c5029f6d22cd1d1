use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};
use tracing::info;

use defer_core::app::TransportKind;
use defer_core::impls::{InMemoryPubSub, InMemoryQueueServer, NatsTransport};
use defer_core::observability;
use defer_core::ports::ErrorReporter;
use defer_core::{
    ArgType, Connection, Context, DeferConfig, DispatchError, FunctionRegistry, HandlerError,
    Listener, Variadic, args,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Welcome {
    name: String,
    email: String,
}

impl ArgType for Welcome {
    fn type_name() -> String {
        "demo.Welcome".to_string()
    }
}

async fn send_welcome(ctx: Context, user: Welcome, tags: Variadic<String>) -> Result<(), HandlerError> {
    let code = ctx.task().map(|t| t.code.clone()).unwrap_or_default();
    info!(task = %code, name = %user.name, email = %user.email, tags = ?tags.0, "sending welcome mail");
    Ok(())
}

/// handler の失敗を数えるだけの reporter
#[derive(Default)]
struct CountingReporter {
    failures: AtomicUsize,
}

#[async_trait]
impl ErrorReporter for CountingReporter {
    async fn report_failure(&self, _ctx: &Context, _error: &DispatchError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    project: String,
    queue: String,
    transport: TransportKind,
    sent: usize,
    failures: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // (A) 設定と logging
    let path = std::env::args().nth(1);
    let config = DeferConfig::load(path.as_deref())?;
    observability::init(config.log_format);

    // (B) 関数を登録（start-up 中だけ可変、その後 Arc で凍結）
    let mut registry = FunctionRegistry::new();
    let welcome = registry.register("send_welcome", send_welcome);
    let remaining_failures = Arc::new(AtomicU32::new(2));
    let flaky = registry.register("flaky", move |_ctx: Context, attempt: i32| {
        let remaining_failures = remaining_failures.clone();
        async move {
            let left = remaining_failures.load(Ordering::Relaxed);
            if left > 0 {
                remaining_failures.fetch_sub(1, Ordering::Relaxed);
                return Err(format!("intentional failure (attempt={attempt}, left={left})"));
            }
            info!(attempt, "flaky task finally succeeded");
            Ok(())
        }
    });
    let registry = Arc::new(registry);

    // (C) transport を選ぶ
    let conn = match config.transport {
        TransportKind::Memory => {
            Connection::streaming(config.project.clone(), Arc::new(InMemoryQueueServer::new()))
        }
        TransportKind::MemoryPubsub => {
            Connection::pubsub(config.project.clone(), Arc::new(InMemoryPubSub::new()))
        }
        TransportKind::Nats => {
            let url = config.nats_url.as_deref().ok_or("nats_url is not set")?;
            Connection::pubsub(config.project.clone(), Arc::new(NatsTransport::connect(url).await?))
        }
    };
    let queue = conn.queue(config.queue.clone());

    // (D) listener を起動
    let reporter = Arc::new(CountingReporter::default());
    let listener = Listener::new(registry)
        .with_config(config.listener.clone())
        .with_reporter(reporter.clone());
    let handle = listener.handle(queue.clone());

    // pub/sub は subscribe 前の publish が捨てられるので少し待つ
    sleep(Duration::from_millis(200)).await;

    // (E) task を batch で投入
    let mut batch = vec![welcome.task(args![
        Welcome {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        },
        "beta".to_string(),
        "newsletter".to_string()
    ]?)?];
    for attempt in 1..=3i32 {
        batch.push(flaky.task(args![attempt]?)?);
    }
    let sent = batch.len();
    queue.send_tasks(batch).await?;
    info!(sent, "tasks sent");

    // (F) 少し動かしてから止める（Ctrl-C でも止まる）
    tokio::select! {
        _ = sleep(Duration::from_secs(2)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    listener.shutdown();
    handle.await?;

    let summary = Summary {
        project: config.project,
        queue: config.queue,
        transport: config.transport,
        sent,
        failures: reporter.failures.load(Ordering::Relaxed),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
