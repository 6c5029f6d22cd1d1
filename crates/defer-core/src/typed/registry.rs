//! FunctionRegistry - 遅延関数の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - `#[track_caller]` で呼び出し元のファイルを key に含める
//! - Arc による共有所有権（登録後は `Arc<FunctionRegistry>` で凍結）
//!
//! 登録時のエラーはその場では返さず、`Function` に保存して
//! 最初に task を作るときに返します（start-up で panic させないため）。

use std::collections::HashMap;
use std::panic::Location;
use std::sync::{Arc, OnceLock};

use crate::domain::{DeferError, DispatchError, RegistrationError, SendTask};

use super::arg::{Arg, ArgType};
use super::codec::{self, Invocation};
use super::context::Context;
use super::handler::{ErasedHandler, Handler, HandlerFn};
use super::signature::Signature;
use super::types::TypeTable;

struct FunctionEntry {
    key: String,
    name: String,
    file: String,
    signature: Signature,
    handler: Arc<dyn ErasedHandler>,
    error: OnceLock<RegistrationError>,
}

/// Handle to a registered function, used to build tasks.
#[derive(Clone)]
pub struct Function {
    entry: Arc<FunctionEntry>,
    types: Arc<TypeTable>,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("key", &self.entry.key)
            .field("signature", &self.entry.signature)
            .field("error", &self.entry.error.get())
            .finish()
    }
}

impl Function {
    /// `file:name`
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn file(&self) -> &str {
        &self.entry.file
    }

    pub fn signature(&self) -> &Signature {
        &self.entry.signature
    }

    /// Deferred registration error, if any.
    pub fn error(&self) -> Option<&RegistrationError> {
        self.entry.error.get()
    }

    /// Build a task that invokes this function with `args`.
    pub fn task(&self, args: Vec<Arg>) -> Result<SendTask, DeferError> {
        if let Some(err) = self.entry.error.get() {
            return Err(err.clone().into());
        }
        let payload = codec::encode(&self.entry.key, &self.entry.signature, &self.types, args)?;
        Ok(SendTask::new(payload))
    }
}

/// FunctionRegistry は遅延関数を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = FunctionRegistry::new();
/// let send_welcome = registry.register("send_welcome", send_welcome);
///
/// // producer 側
/// let task = send_welcome.task(args![user]?)?;
///
/// // consumer 側（登録後は Arc で共有）
/// let listener = Listener::new(Arc::new(registry));
/// ```
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionEntry>>,
    types: Arc<TypeTable>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. The key is `file:name` where `file`
    /// is the caller's source file.
    #[track_caller]
    pub fn register<H, P>(&mut self, name: &str, handler: H) -> Function
    where
        H: Handler<P>,
        P: 'static,
    {
        let file = Location::caller().file();
        self.insert(file, name, handler)
    }

    fn insert<H, P>(&mut self, file: &str, name: &str, handler: H) -> Function
    where
        H: Handler<P>,
        P: 'static,
    {
        let signature = H::signature();
        let entry = Arc::new(FunctionEntry {
            key: format!("{file}:{name}"),
            name: name.to_string(),
            file: file.to_string(),
            signature,
            handler: Arc::new(HandlerFn::new(handler)),
            error: OnceLock::new(),
        });
        let function = Function {
            entry: entry.clone(),
            types: self.types.clone(),
        };

        let invalid = if name.is_empty() {
            Some(RegistrationError::EmptyName)
        } else {
            entry.signature.validate().err()
        };
        if let Some(err) = invalid {
            tracing::warn!(key = %entry.key, error = %err, "invalid function registration");
            let _ = entry.error.set(err);
            return function;
        }

        for spec in entry.signature.params() {
            self.types.register_spec(spec);
        }

        if let Some(previous) = self.functions.insert(entry.key.clone(), entry.clone()) {
            tracing::warn!(key = %entry.key, "function registered twice");
            let _ = previous.error.set(RegistrationError::Duplicate {
                name: name.to_string(),
                file: file.to_string(),
            });
        } else {
            tracing::debug!(key = %entry.key, "function registered");
        }
        function
    }

    /// Register a concrete type passed through `Dynamic` parameters.
    pub fn register_type<T: ArgType>(&self) {
        self.types.register::<T>();
    }

    pub fn types(&self) -> &Arc<TypeTable> {
        &self.types
    }

    pub fn contains(&self, key: &str) -> bool {
        self.functions.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Invocation, DispatchError> {
        codec::decode(payload, &self.types).map_err(DispatchError::Decode)
    }

    /// Run the function named by `invocation.key`.
    pub async fn dispatch(&self, ctx: Context, invocation: Invocation) -> Result<(), DispatchError> {
        let entry = self
            .functions
            .get(&invocation.key)
            .ok_or_else(|| DispatchError::NotFound(invocation.key.clone()))?;
        entry.handler.call(ctx, invocation.args).await
    }
}
