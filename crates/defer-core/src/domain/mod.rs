//! Domain model (wire records, errors, MessagePack framing).

pub mod errors;
pub mod task;
pub mod wire;

pub use self::errors::{
    CodecError, ConfigError, DeferError, DispatchError, HandlerError, RegistrationError,
    TransportError,
};
pub use self::task::{Ack, ListenInitial, ListenReply, ListenRequest, SendTask, Task};
