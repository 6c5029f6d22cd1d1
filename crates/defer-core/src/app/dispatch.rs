//! handle_task - 1 つの task の payload を decode して実行
//!
//! Listener の両 variant で共通。panic は catch して handler の失敗として扱います。
//! Deadline を過ぎても handler は止めず、終了後に警告だけ出します。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;

use crate::domain::DispatchError;
use crate::typed::{Context, FunctionRegistry};

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub async fn handle_task(
    registry: &FunctionRegistry,
    ctx: Context,
    payload: &[u8],
) -> Result<(), DispatchError> {
    let invocation = registry.decode(payload)?;
    let key = invocation.key.clone();
    let start = Instant::now();

    let result = AssertUnwindSafe(registry.dispatch(ctx.clone(), invocation))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(DispatchError::Panicked(panic_message(panic.as_ref()))));

    if ctx.deadline_exceeded() {
        tracing::warn!(
            func = %key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "handler ran past its deadline"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::domain::CodecError;
    use crate::typed::Invocation;
    use crate::domain::wire;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn runs_the_handler_with_its_argument() {
        let seen = Arc::new(AtomicI64::new(0));
        let sink = seen.clone();
        let mut registry = FunctionRegistry::new();
        let f = registry.register("record", move |_ctx: Context, n: i64| {
            let sink = sink.clone();
            async move { sink.store(n, Ordering::SeqCst) }
        });

        let task = f.task(args![5i64].unwrap()).unwrap();
        handle_task(&registry, Context::background(), &task.payload)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn panic_becomes_an_error() {
        let mut registry = FunctionRegistry::new();
        let f = registry.register("explode", |_ctx: Context| async {
            panic!("kaboom");
            #[allow(unreachable_code)]
            ()
        });

        let task = f.task(Vec::new()).unwrap();
        let err = handle_task(&registry, Context::background(), &task.payload)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Panicked(msg) if msg == "kaboom"));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_decode_error() {
        let registry = FunctionRegistry::new();
        let err = handle_task(&registry, Context::background(), b"\xc1")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Decode(CodecError::Decode(_))));
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let registry = FunctionRegistry::new();
        let payload = wire::encode(&Invocation {
            key: "elsewhere.rs:gone".to_string(),
            args: Vec::new(),
        })
        .unwrap();
        let err = handle_task(&registry, Context::background(), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn handler_sees_its_deadline() {
        let mut registry = FunctionRegistry::new();
        let f = registry.register("wait", |ctx: Context| async move {
            ctx.done().await;
            if ctx.deadline_exceeded() {
                Err("deadline exceeded")
            } else {
                Ok(())
            }
        });

        let task = crate::domain::Task {
            code: "t".to_string(),
            payload: f.task(Vec::new()).unwrap().payload,
            created: chrono::Utc::now(),
            retry_count: 0,
            project: "acme".to_string(),
            queue_name: "q".to_string(),
            min_eta: None,
        };
        let ctx = Context::for_task(&CancellationToken::new(), &task, Duration::from_millis(10));
        let err = handle_task(&registry, ctx, &task.payload).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(e) if e.to_string() == "deadline exceeded"));
    }
}
