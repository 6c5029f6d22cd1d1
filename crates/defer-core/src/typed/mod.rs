//! Typed - 型付き関数呼び出し API
//!
//! 関数の登録、引数の型チェック付き直列化、呼び出しの復元と実行を担当します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Handler<P>` trait, `ArgType` trait, `Variadic<T>` - 型安全
//! - **内部（Erased）**: `ErasedHandler` trait + `Signature` - object-safe, type erasure

pub mod arg;
pub mod codec;
pub mod context;
pub mod handler;
pub mod registry;
pub mod signature;
pub mod types;

// 主要な trait/型 を再エクスポート
pub use self::arg::{Arg, ArgKind, ArgType, Dynamic, IntoArg, TypedValue, Variadic};
pub use self::codec::Invocation;
pub use self::context::{Context, TaskInfo};
pub use self::handler::{Handler, IntoHandlerResult};
pub use self::registry::{Function, FunctionRegistry};
pub use self::signature::{Param, ParamSpec, Signature};
pub use self::types::TypeTable;
