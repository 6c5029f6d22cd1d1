//! TypeTable - wire 上の型タグの登録簿
//!
//! 登録された型だけが encode / decode できます。
//! 関数登録時に parameter の型は自動で登録されますが、
//! `Dynamic` 経由で渡す具体型は明示的な登録が必要です。

use dashmap::DashSet;

use crate::domain::CodecError;

use super::arg::{ArgKind, ArgType};
use super::signature::ParamSpec;

#[derive(Debug, Default)]
pub struct TypeTable {
    names: DashSet<String>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`. Interface parameters carry no type of their own and are skipped.
    pub fn register<T: ArgType>(&self) {
        if T::kind() != ArgKind::Interface {
            self.names.insert(T::type_name());
        }
    }

    pub(crate) fn register_spec(&self, spec: &ParamSpec) {
        if spec.kind != ArgKind::Interface {
            self.names.insert(spec.type_name.clone());
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.names.contains(type_name)
    }

    pub(crate) fn ensure(&self, type_name: &str) -> Result<(), CodecError> {
        if self.contains(type_name) {
            Ok(())
        } else {
            Err(CodecError::UnregisteredType(type_name.to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
