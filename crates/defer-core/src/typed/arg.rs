//! Arg - 型タグ付きの引数
//!
//! 引数はすべて `{type_name, data}` の tagged union として運ばれます。
//! `type_name` は `TypeTable` に登録された名前で解決されます。
//!
//! # 学習ポイント
//! - Associated functions で型ごとのメタ情報を提供（`type_name`, `kind`, `zero`）
//! - Blanket impl (`impl<T: ArgType> IntoArg for T`) とローカル型の impl の共存

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::wire;
use crate::domain::CodecError;

/// How a declared parameter treats nil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Plain value; nil is a type error.
    Value,
    /// Option / collection; nil decodes to the type's zero value.
    Nilable,
    /// Accepts any registered type (see [`Dynamic`]).
    Interface,
}

impl ArgKind {
    pub fn is_nilable(self) -> bool {
        !matches!(self, ArgKind::Value)
    }
}

/// A serialized value together with its type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedValue {
    type_name: String,
    data: Vec<u8>,

    /// Typed nil (e.g. `None::<T>`). Never on the wire: encode replaces it
    /// with [`Arg::Nil`].
    #[serde(skip)]
    nil: bool,
}

impl TypedValue {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn is_typed_nil(&self) -> bool {
        self.nil
    }
}

/// One argument of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arg {
    Nil,
    Value(TypedValue),
}

impl Arg {
    pub fn new<T: IntoArg>(value: T) -> Result<Self, CodecError> {
        value.into_arg()
    }

    pub fn nil() -> Self {
        Arg::Nil
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            Arg::Nil => None,
            Arg::Value(v) => Some(v.type_name()),
        }
    }

    /// True for a plain nil and for a typed nil.
    pub fn is_nil(&self) -> bool {
        match self {
            Arg::Nil => true,
            Arg::Value(v) => v.nil,
        }
    }

    pub fn decode<T: ArgType>(self) -> Result<T, CodecError> {
        T::decode_arg(self)
    }
}

/// Conversion into an [`Arg`]; implemented for every [`ArgType`] and for
/// `Arg` itself so that `args![5, Arg::nil()]` works.
pub trait IntoArg {
    fn into_arg(self) -> Result<Arg, CodecError>;
}

impl<T: ArgType> IntoArg for T {
    fn into_arg(self) -> Result<Arg, CodecError> {
        self.encode_arg()
    }
}

impl IntoArg for Arg {
    fn into_arg(self) -> Result<Arg, CodecError> {
        Ok(self)
    }
}

/// ArgType は引数として渡せる具体型
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Invoice {
///     id: u64,
/// }
///
/// impl ArgType for Invoice {
///     fn type_name() -> String {
///         "billing.Invoice".to_string()
///     }
/// }
/// ```
///
/// `type_name` は wire 上のタグなので、producer と consumer で一致させること。
pub trait ArgType: Serialize + DeserializeOwned + Send + 'static {
    fn type_name() -> String;

    fn kind() -> ArgKind {
        ArgKind::Value
    }

    /// Whether this value is a typed nil.
    fn is_nil(&self) -> bool {
        false
    }

    /// Value substituted when a nil arrives for this type.
    fn zero() -> Option<Self> {
        None
    }

    fn encode_arg(self) -> Result<Arg, CodecError> {
        let nil = self.is_nil();
        Ok(Arg::Value(TypedValue {
            type_name: Self::type_name(),
            data: wire::encode(&self)?,
            nil,
        }))
    }

    fn decode_arg(arg: Arg) -> Result<Self, CodecError> {
        match arg {
            Arg::Nil => Self::zero().ok_or_else(|| CodecError::NoZeroValue(Self::type_name())),
            Arg::Value(value) => {
                let want = Self::type_name();
                if value.type_name != want {
                    return Err(CodecError::WrongType {
                        got: value.type_name,
                        want,
                    });
                }
                wire::decode(&value.data)
            }
        }
    }
}

macro_rules! value_types {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl ArgType for $ty {
                fn type_name() -> String {
                    $name.to_string()
                }

                fn zero() -> Option<Self> {
                    Some(Default::default())
                }
            }
        )*
    };
}

value_types! {
    bool => "bool",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
    String => "string",
    DateTime<Utc> => "datetime",
}

impl<T: ArgType> ArgType for Option<T> {
    fn type_name() -> String {
        format!("Option<{}>", T::type_name())
    }

    fn kind() -> ArgKind {
        ArgKind::Nilable
    }

    fn is_nil(&self) -> bool {
        self.is_none()
    }

    fn zero() -> Option<Self> {
        Some(None)
    }
}

impl<T: ArgType> ArgType for Vec<T> {
    fn type_name() -> String {
        format!("Vec<{}>", T::type_name())
    }

    fn kind() -> ArgKind {
        ArgKind::Nilable
    }

    fn zero() -> Option<Self> {
        Some(Vec::new())
    }
}

impl<K, V> ArgType for HashMap<K, V>
where
    K: ArgType + Eq + Hash,
    V: ArgType,
{
    fn type_name() -> String {
        format!("HashMap<{}, {}>", K::type_name(), V::type_name())
    }

    fn kind() -> ArgKind {
        ArgKind::Nilable
    }

    fn zero() -> Option<Self> {
        Some(HashMap::new())
    }
}

impl<K, V> ArgType for BTreeMap<K, V>
where
    K: ArgType + Ord,
    V: ArgType,
{
    fn type_name() -> String {
        format!("BTreeMap<{}, {}>", K::type_name(), V::type_name())
    }

    fn kind() -> ArgKind {
        ArgKind::Nilable
    }

    fn zero() -> Option<Self> {
        Some(BTreeMap::new())
    }
}

/// A parameter that accepts a value of any registered type.
///
/// The concrete types passed through a `Dynamic` parameter are not registered
/// automatically; call `FunctionRegistry::register_type::<T>()` for each one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dynamic(Option<TypedValue>);

impl Dynamic {
    pub fn new<T: ArgType>(value: T) -> Result<Self, CodecError> {
        Self::decode_arg(value.encode_arg()?)
    }

    pub fn nil() -> Self {
        Dynamic(None)
    }

    pub fn type_name(&self) -> Option<&str> {
        self.0.as_ref().map(TypedValue::type_name)
    }

    pub fn downcast<T: ArgType>(&self) -> Result<T, CodecError> {
        match &self.0 {
            None => T::decode_arg(Arg::Nil),
            Some(value) => T::decode_arg(Arg::Value(value.clone())),
        }
    }
}

impl ArgType for Dynamic {
    fn type_name() -> String {
        "dynamic".to_string()
    }

    fn kind() -> ArgKind {
        ArgKind::Interface
    }

    fn is_nil(&self) -> bool {
        match &self.0 {
            None => true,
            Some(value) => value.nil,
        }
    }

    fn zero() -> Option<Self> {
        Some(Dynamic(None))
    }

    // 中身の具体型のタグをそのまま使う（interface に詰めた値と同じ扱い）
    fn encode_arg(self) -> Result<Arg, CodecError> {
        Ok(match self.0 {
            None => Arg::Nil,
            Some(value) => Arg::Value(value),
        })
    }

    fn decode_arg(arg: Arg) -> Result<Self, CodecError> {
        Ok(match arg {
            Arg::Nil => Dynamic(None),
            Arg::Value(value) => Dynamic(Some(value)),
        })
    }
}

/// Trailing parameter that collects every remaining argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> std::ops::Deref for Variadic<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```ignore
/// let args = args![5, "hello".to_string(), Arg::nil()]?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::result::Result::<::std::vec::Vec<$crate::typed::Arg>, $crate::domain::CodecError>::Ok(
            ::std::vec::Vec::new(),
        )
    };
    ($($value:expr),+ $(,)?) => {
        (|| -> ::std::result::Result<::std::vec::Vec<$crate::typed::Arg>, $crate::domain::CodecError> {
            ::std::result::Result::Ok(::std::vec![$($crate::typed::Arg::new($value)?),+])
        })()
    };
}
