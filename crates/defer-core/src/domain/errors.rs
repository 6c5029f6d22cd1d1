//! Errors - エラー型と分類
//!
//! Producer 側のエラー（registration / codec）は同期的に返り、
//! consumer 側のエラー（dispatch / transport）はログと reporter にだけ現れます。

use thiserror::Error;

/// Boxed error returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Problems found while registering a function.
///
/// These are stored on the function and surfaced the first time it is used to
/// build a task, so they must be cloneable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("multiple functions registered for {name} in {file}")]
    Duplicate { name: String, file: String },

    #[error("function name must not be empty")]
    EmptyName,

    #[error("variadic parameter must be the last parameter (found at position {0})")]
    VariadicNotLast(usize),
}

/// Argument marshalling failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("too few arguments to func: {got} < {want}")]
    TooFewArguments { got: usize, want: usize },

    #[error("too many arguments to func: {got} > {want}")]
    TooManyArguments { got: usize, want: usize },

    #[error("argument {index} has wrong type: {got} is not assignable to {want}")]
    TypeMismatch {
        index: usize,
        got: String,
        want: String,
    },

    #[error("argument {index} has wrong type: {want} is not nilable")]
    NotNilable { index: usize, want: String },

    #[error("value of type {got} cannot be read as {want}")]
    WrongType { got: String, want: String },

    #[error("type not registered: {0}")]
    UnregisteredType(String),

    #[error("no zero value for {0}")]
    NoZeroValue(String),

    #[error("missing argument for parameter of type {0}")]
    MissingArgument(String),

    #[error("frame of {0} bytes is too large")]
    FrameTooLarge(usize),

    #[error("cannot encode value: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("cannot decode value: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Failures while executing one inbound task.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot decode call: {0}")]
    Decode(#[source] CodecError),

    #[error("no func with key {0:?} found")]
    NotFound(String),

    #[error("cannot build arguments: {0}")]
    Arguments(#[source] CodecError),

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Failures talking to the queue service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("cannot send tasks: {0}")]
    Send(String),

    #[error("cannot listen to the queue: {0}")]
    Listen(String),

    #[error("cannot receive tasks: {0}")]
    Receive(String),

    #[error("cannot ack task {code}: {reason}")]
    Ack { code: String, reason: String },

    #[error("connection closed")]
    Closed,

    #[error("cannot subscribe to {channel}: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("cannot decode incoming task: {0}")]
    Frame(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum DeferError {
    #[error("defer: {0}")]
    Registration(#[from] RegistrationError),

    #[error("defer: {0}")]
    Codec(#[from] CodecError),

    #[error("defer: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("defer: {0}")]
    Transport(#[from] TransportError),

    #[error("defer: {0}")]
    Config(#[from] ConfigError),
}
