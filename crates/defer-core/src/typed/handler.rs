//! Handler trait - 遅延実行される関数の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (`Handler<P>`) を closure / async fn に blanket impl
//! - Object-safe trait (`ErasedHandler`) による type erasure
//! - `macro_rules!` で arity ごとの impl を生成
//!
//! Handler は `Fn(Context, P1, ..., Pn) -> impl Future` の形をした関数です。
//! 戻り値は `()` か `Result<T, E>`（`E: Into<HandlerError>`）。

use std::future::{self, Future};
use std::marker::PhantomData;

use futures::future::BoxFuture;

use crate::domain::{DispatchError, HandlerError};

use super::arg::Arg;
use super::context::Context;
use super::signature::{Param, Signature};

/// Return values a handler may produce.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> Result<(), HandlerError>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<T, E> IntoHandlerResult for Result<T, E>
where
    E: Into<HandlerError>,
{
    fn into_handler_result(self) -> Result<(), HandlerError> {
        self.map(|_| ()).map_err(Into::into)
    }
}

/// Handler は引数リストを受け取って非同期に実行される関数
///
/// # 使用例
/// ```ignore
/// async fn send_welcome(ctx: Context, user: User, tags: Variadic<String>) -> Result<(), HandlerError> {
///     // ...
///     Ok(())
/// }
///
/// registry.register("send_welcome", send_welcome);
/// ```
///
/// `P` は parameter 型の tuple で、closure の型から推論されます。
pub trait Handler<P>: Send + Sync + 'static {
    fn signature() -> Signature;

    /// Decode `args` into the declared parameters and start the call.
    fn call(&self, ctx: Context, args: Vec<Arg>) -> BoxFuture<'static, Result<(), DispatchError>>;
}

fn rejected(err: DispatchError) -> BoxFuture<'static, Result<(), DispatchError>> {
    Box::pin(future::ready(Err(err)))
}

macro_rules! impl_handler {
    ($($P:ident),*) => {
        #[allow(non_snake_case, unused_mut)]
        impl<F, Fut, R, $($P,)*> Handler<($($P,)*)> for F
        where
            F: Fn(Context, $($P),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoHandlerResult,
            $($P: Param,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$(<$P as Param>::spec()),*])
            }

            fn call(
                &self,
                ctx: Context,
                args: Vec<Arg>,
            ) -> BoxFuture<'static, Result<(), DispatchError>> {
                let signature = <Self as Handler<($($P,)*)>>::signature();
                if let Err(e) = signature.check_arity(args.len()) {
                    return rejected(DispatchError::Arguments(e));
                }
                let mut args = args.into_iter();
                $(
                    let $P = match <$P as Param>::extract(&mut args) {
                        Ok(value) => value,
                        Err(e) => return rejected(DispatchError::Arguments(e)),
                    };
                )*
                let fut = (self)(ctx, $($P),*);
                Box::pin(async move {
                    fut.await
                        .into_handler_result()
                        .map_err(DispatchError::Handler)
                })
            }
        }
    };
}

impl_handler!();
impl_handler!(P1);
impl_handler!(P1, P2);
impl_handler!(P1, P2, P3);
impl_handler!(P1, P2, P3, P4);
impl_handler!(P1, P2, P3, P4, P5);
impl_handler!(P1, P2, P3, P4, P5, P6);
impl_handler!(P1, P2, P3, P4, P5, P6, P7);
impl_handler!(P1, P2, P3, P4, P5, P6, P7, P8);

/// ErasedHandler は object-safe な Handler の抽象化
///
/// `HandlerFn<H, P>` に包むことで `Arc<dyn ErasedHandler>` として
/// parameter 型の異なる handler を同じ map に格納できます。
pub(crate) trait ErasedHandler: Send + Sync {
    fn call(&self, ctx: Context, args: Vec<Arg>) -> BoxFuture<'static, Result<(), DispatchError>>;
}

pub(crate) struct HandlerFn<H, P> {
    handler: H,
    _marker: PhantomData<fn() -> P>,
}

impl<H, P> HandlerFn<H, P> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<H, P> ErasedHandler for HandlerFn<H, P>
where
    H: Handler<P>,
    P: 'static,
{
    fn call(&self, ctx: Context, args: Vec<Arg>) -> BoxFuture<'static, Result<(), DispatchError>> {
        Handler::call(&self.handler, ctx, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CodecError;
    use crate::typed::Variadic;
    use crate::args;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn signature_of<H: Handler<P>, P>(_: &H) -> Signature {
        H::signature()
    }

    #[tokio::test]
    async fn closure_receives_decoded_arguments() {
        let total = Arc::new(AtomicI64::new(0));
        let sink = total.clone();
        let handler = move |_ctx: Context, a: i64, b: i64| {
            let sink = sink.clone();
            async move {
                sink.store(a + b, Ordering::SeqCst);
            }
        };

        let args = args![2i64, 40i64].unwrap();
        Handler::call(&handler, Context::background(), args)
            .await
            .unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn handler_error_is_wrapped() {
        let handler = |_ctx: Context, name: String| async move {
            if name.is_empty() {
                Err("empty name")
            } else {
                Ok(name.len())
            }
        };

        let err = Handler::call(&handler, Context::background(), args!["".to_string()].unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler(e) if e.to_string() == "empty name"));

        Handler::call(&handler, Context::background(), args!["bob".to_string()].unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_arity_is_rejected_before_call() {
        let handler = |_ctx: Context, _n: i32| async {};
        let err = Handler::call(&handler, Context::background(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Arguments(CodecError::TooFewArguments { got: 0, want: 1 })
        ));
    }

    #[tokio::test]
    async fn variadic_tail_collects_rest() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |_ctx: Context, first: i32, rest: Variadic<i32>| {
            let sink = sink.clone();
            async move {
                let mut seen = sink.lock().unwrap();
                seen.push(first);
                seen.extend(rest.into_inner());
            }
        };

        let sig = signature_of(&handler);
        assert!(sig.is_variadic());
        assert_eq!(sig.required(), 1);

        Handler::call(&handler, Context::background(), args![1i32, 2i32, 3i32].unwrap())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn zero_argument_signature() {
        let handler = |_ctx: Context| async {};
        let sig = signature_of(&handler);
        assert!(sig.params().is_empty());
        assert!(!sig.is_variadic());
    }
}
