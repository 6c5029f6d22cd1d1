//! Invocation codec - 関数呼び出しと bytes の相互変換
//!
//! # Encode フロー
//! 1. arity チェック（variadic なら固定部分以上、それ以外は完全一致）
//! 2. 位置ごとの型チェック（固定部分は宣言型、それ以降は variadic の要素型）。typed nil も対象
//! 3. nil チェック（nilable な宣言型だけ nil を受け付ける）
//! 4. typed nil を plain nil に正規化
//! 5. TypeTable 登録済みの型だけを MessagePack で直列化
//!
//! Decode は payload を信用して arity を再チェックしません。

use serde::{Deserialize, Serialize};

use crate::domain::{wire, CodecError};

use super::arg::{Arg, ArgKind};
use super::signature::Signature;
use super::types::TypeTable;

/// A serialized call: which function, with which arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub key: String,
    pub args: Vec<Arg>,
}

/// Validate `args` against `signature` and serialize the call.
pub fn encode(
    key: &str,
    signature: &Signature,
    types: &TypeTable,
    args: Vec<Arg>,
) -> Result<Vec<u8>, CodecError> {
    signature.check_arity(args.len())?;

    let mut checked = Vec::with_capacity(args.len());
    for (i, arg) in args.into_iter().enumerate() {
        // check_arity 済みなので param_at は必ず Some
        let Some(param) = signature.param_at(i) else {
            return Err(CodecError::TooManyArguments {
                got: i + 1,
                want: signature.required(),
            });
        };

        if let Arg::Value(value) = &arg {
            if param.kind != ArgKind::Interface && value.type_name() != param.type_name {
                return Err(CodecError::TypeMismatch {
                    index: i + 1,
                    got: value.type_name().to_string(),
                    want: param.type_name.clone(),
                });
            }
        }

        match arg {
            Arg::Value(value) if !value.is_typed_nil() => {
                types.ensure(value.type_name())?;
                checked.push(Arg::Value(value));
            }
            _ if param.kind.is_nilable() => checked.push(Arg::Nil),
            _ => {
                return Err(CodecError::NotNilable {
                    index: i + 1,
                    want: param.type_name.clone(),
                });
            }
        }
    }

    wire::encode(&Invocation {
        key: key.to_string(),
        args: checked,
    })
}

/// Deserialize a call. Every argument's type must be registered.
pub fn decode(bytes: &[u8], types: &TypeTable) -> Result<Invocation, CodecError> {
    let invocation: Invocation = wire::decode(bytes)?;
    for name in invocation.args.iter().filter_map(Arg::type_name) {
        types.ensure(name)?;
    }
    Ok(invocation)
}
