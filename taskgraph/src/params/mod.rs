//! Typed parameter resolution.
//!
//! A task declares, for each parameter, an ordered list of [`Getter`]s (a
//! variable expression, a literal attribute, an upstream result, a default)
//! and a target type implementing [`PipelineParam`]. [`resolve_param`] tries
//! the getters in order and coerces the first value produced.
//!
//! Coercion is permissive across representations of the same value (every
//! integer width, stringified numbers and decimals all become a
//! [`DecimalParam`]) and strict about shape (a map never becomes a scalar).

mod collection;
mod getters;
mod object;
mod scalar;

pub use collection::{DecimalSliceParam, JsonPathParam, MapParam, SliceParam, StringSliceParam};
pub use getters::{
    input, inputs, json_with_var_exprs, non_empty_string, valid_duration, var_expr, Getter,
};

pub(crate) use getters::variable_references;
pub use object::ObjectParam;
pub use scalar::{
    BytesParam, DecimalParam, MaybeBoolParam, MaybeUint64Param, StringParam, Uint64Param,
    UrlParam,
};

use crate::errors::RunError;
use crate::vars::Value;

/// A parameter type that can be populated from a resolved [`Value`].
pub trait PipelineParam: Sized {
    /// Coerces a resolved value into this parameter type.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::BadInput`] if the value has an incompatible shape.
    fn unmarshal_param(value: Value) -> Result<Self, RunError>;
}

/// Resolves a parameter from an ordered list of getters.
///
/// The first getter that yields a value wins, and that value is coerced into
/// `P`; a coercion failure is returned as-is. A getter error does not stop the
/// search. If no getter yields a value, the last error other than
/// [`RunError::ParameterEmpty`] is returned, or `ParameterEmpty` if there was
/// none.
///
/// # Errors
///
/// See above.
pub fn resolve_param<P: PipelineParam>(getters: &[Getter<'_>]) -> Result<P, RunError> {
    let mut last_err = None;
    for getter in getters {
        match getter.get() {
            Ok(value) => return P::unmarshal_param(value),
            Err(err) if err.is_parameter_empty() => {}
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or(RunError::ParameterEmpty))
}

pub(crate) fn bad_input(expected: &str, got: &Value) -> RunError {
    RunError::BadInput(format!("expected {expected}, got {}", got.type_name()))
}
