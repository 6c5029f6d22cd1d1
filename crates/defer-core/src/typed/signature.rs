//! Signature - handler の引数記述子
//!
//! Handler の型から静的に作られ、encode 時の arity / 型チェックと
//! dispatch 時の引数復元の両方で同じ計算を使います。

use crate::domain::{CodecError, RegistrationError};

use super::arg::{Arg, ArgKind, ArgType, Variadic};

/// Declared type of one handler parameter (context excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    /// Type tag; for a variadic parameter this is the element type.
    pub type_name: String,
    pub kind: ArgKind,
    pub variadic: bool,
}

/// Ordered parameter list of a handler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    params: Vec<ParamSpec>,
}

impl Signature {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|p| p.variadic)
    }

    /// Number of arguments that must always be present.
    pub fn required(&self) -> usize {
        if self.is_variadic() {
            self.params.len() - 1
        } else {
            self.params.len()
        }
    }

    /// Declared parameter for the `i`-th argument (0-based, context excluded).
    /// Positions past the fixed prefix map to the variadic element.
    pub fn param_at(&self, i: usize) -> Option<&ParamSpec> {
        if i < self.required() {
            self.params.get(i)
        } else if self.is_variadic() {
            self.params.last()
        } else {
            None
        }
    }

    pub fn check_arity(&self, got: usize) -> Result<(), CodecError> {
        let want = self.required();
        if got < want {
            return Err(CodecError::TooFewArguments { got, want });
        }
        if !self.is_variadic() && got > want {
            return Err(CodecError::TooManyArguments { got, want });
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), RegistrationError> {
        let last = self.params.len().saturating_sub(1);
        match self.params.iter().position(|p| p.variadic) {
            Some(pos) if pos != last => Err(RegistrationError::VariadicNotLast(pos + 1)),
            _ => Ok(()),
        }
    }
}

/// A handler parameter: either a single [`ArgType`] or a trailing [`Variadic`].
pub trait Param: Send + Sized + 'static {
    fn spec() -> ParamSpec;

    /// Take this parameter's value(s) from the remaining arguments.
    fn extract(args: &mut std::vec::IntoIter<Arg>) -> Result<Self, CodecError>;
}

impl<T: ArgType> Param for T {
    fn spec() -> ParamSpec {
        ParamSpec {
            type_name: T::type_name(),
            kind: T::kind(),
            variadic: false,
        }
    }

    fn extract(args: &mut std::vec::IntoIter<Arg>) -> Result<Self, CodecError> {
        let arg = args
            .next()
            .ok_or_else(|| CodecError::MissingArgument(T::type_name()))?;
        T::decode_arg(arg)
    }
}

impl<T: ArgType> Param for Variadic<T> {
    fn spec() -> ParamSpec {
        ParamSpec {
            type_name: T::type_name(),
            kind: T::kind(),
            variadic: true,
        }
    }

    fn extract(args: &mut std::vec::IntoIter<Arg>) -> Result<Self, CodecError> {
        args.by_ref()
            .map(T::decode_arg)
            .collect::<Result<Vec<_>, _>>()
            .map(Variadic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fixed() -> Signature {
        Signature::new(vec![<i32 as Param>::spec(), <String as Param>::spec()])
    }

    fn variadic() -> Signature {
        Signature::new(vec![
            <i32 as Param>::spec(),
            <Variadic<String> as Param>::spec(),
        ])
    }

    #[rstest]
    #[case::exact(2, true)]
    #[case::too_few(1, false)]
    #[case::too_many(3, false)]
    fn fixed_arity(#[case] got: usize, #[case] ok: bool) {
        assert_eq!(fixed().check_arity(got).is_ok(), ok);
    }

    #[rstest]
    #[case::prefix_missing(0, false)]
    #[case::empty_tail(1, true)]
    #[case::long_tail(5, true)]
    fn variadic_arity(#[case] got: usize, #[case] ok: bool) {
        assert_eq!(variadic().check_arity(got).is_ok(), ok);
    }

    #[test]
    fn positions_past_prefix_use_element_type() {
        let sig = variadic();
        assert_eq!(sig.required(), 1);
        assert_eq!(sig.param_at(0).unwrap().type_name, "i32");
        assert_eq!(sig.param_at(1).unwrap().type_name, "string");
        assert_eq!(sig.param_at(7).unwrap().type_name, "string");
        assert!(fixed().param_at(2).is_none());
    }

    #[test]
    fn variadic_must_be_last() {
        let sig = Signature::new(vec![
            <Variadic<i32> as Param>::spec(),
            <String as Param>::spec(),
        ]);
        assert_eq!(sig.validate(), Err(RegistrationError::VariadicNotLast(1)));
        assert!(variadic().validate().is_ok());
    }

    #[test]
    fn variadic_extract_takes_the_rest() {
        let args = vec![
            Arg::new("a".to_string()).unwrap(),
            Arg::Nil,
            Arg::new("c".to_string()).unwrap(),
        ];
        let mut iter = args.into_iter();
        let tail = <Variadic<String> as Param>::extract(&mut iter).unwrap();
        assert_eq!(tail.into_inner(), vec!["a", "", "c"]);
        assert_eq!(iter.len(), 0);
    }
}
