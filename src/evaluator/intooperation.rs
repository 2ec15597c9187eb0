use crate::ast::{NumberType, Value};
use crate::evaluator::Environment;
use crate::{Arity, Error};
use std::rc::Rc;

// NOTE: This module is internal plumbing for the applier.
// It turns strongly-typed Rust functions into the erased
// `OperationFn` stored inside built-in procedure values, and derives
// each function's arity contract from its signature.
//
// External users register built-ins through the `Environment`
// methods in `evaluator.rs`.

/// Canonical erased built-in function type.
///
/// Built-ins receive ownership of their argument vector, enabling
/// implementations that consume or rearrange arguments if desired.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error>;

/// Erased built-in that also receives the environment it was called from
/// (`eval`, `apply`).
pub type EnvOperationFn = dyn Fn(Vec<Value>, &Environment) -> Result<Value, Error>;

// =====================================================================
// Argument conversion
// =====================================================================

/// Conversion of a single evaluated argument into a Rust parameter.
pub trait FromParam: Sized {
    fn from_arg(value: Value) -> Result<Self, Error>;
}

impl FromParam for Value {
    fn from_arg(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl FromParam for NumberType {
    fn from_arg(value: Value) -> Result<Self, Error> {
        match value {
            Value::Number(n) => Ok(n),
            other => Err(Error::TypeError(format!("expected number, got {other}"))),
        }
    }
}

impl FromParam for bool {
    fn from_arg(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(Error::TypeError(format!("expected boolean, got {other}"))),
        }
    }
}

impl FromParam for String {
    fn from_arg(value: Value) -> Result<Self, Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(Error::TypeError(format!("expected string, got {other}"))),
        }
    }
}

/// Convert the trailing arguments of a call into a rest parameter,
/// checking the element type of every one of them.
fn rest_from_args<T: FromParam>(args: impl Iterator<Item = Value>) -> Result<Vec<T>, Error> {
    args.map(T::from_arg).collect()
}

// =====================================================================
// Return-type adaptation
// =====================================================================

/// Normalizes built-in return types to the canonical
/// `Result<Value, Error>` expected by the applier.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

// =====================================================================
// Fixed-arity adapters
// =====================================================================

/// Conversion of a strongly-typed Rust function into a built-in,
/// parameterized by its argument tuple type.
pub trait IntoOperation<Args> {
    /// Arity contract implied by the function signature
    fn arity() -> Arity;
    fn into_operation(self) -> Rc<OperationFn>;
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + 'static,
    R: IntoValueResult,
{
    fn arity() -> Arity {
        Arity::Exact(0)
    }

    fn into_operation(self) -> Rc<OperationFn> {
        Rc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(Arity::Exact(0), args.len()));
            }
            (self)().into_value_result()
        })
    }
}

/// Implements `IntoOperation` for functions of a fixed number of
/// parameters. The argument count is checked up front, then each
/// argument is converted in order.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: Fn( $( $A ),+ ) -> R + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn arity() -> Arity {
                Arity::Exact($arity)
            }

            fn into_operation(self) -> Rc<OperationFn> {
                Rc::new(move |args: Vec<Value>| {
                    if args.len() != $arity {
                        return Err(Error::arity_error(Arity::Exact($arity), args.len()));
                    }
                    let mut args = args.into_iter();
                    $(
                        let $p = <$A as FromParam>::from_arg(args.next().unwrap_or_default())?;
                    )+
                    (self)( $( $p ),+ ).into_value_result()
                })
            }
        }
    };
}

impl_into_operation_for_arity!(1, p0: A1);
impl_into_operation_for_arity!(2, p0: A1, p1: A2);
impl_into_operation_for_arity!(3, p0: A1, p1: A2, p2: A3);

// =====================================================================
// Variadic adapters: fixed prefix followed by a typed rest parameter
// =====================================================================

/// Conversion of a Rust function whose last parameter is a `Vec<T>`
/// collecting all remaining arguments.
pub trait IntoVariadicOperation<Args> {
    /// Number of parameters before the rest parameter
    fn prefix_len() -> usize;
    fn into_variadic_operation(self) -> Rc<OperationFn>;
}

impl<F, R, T> IntoVariadicOperation<(Vec<T>,)> for F
where
    F: Fn(Vec<T>) -> R + 'static,
    T: FromParam,
    R: IntoValueResult,
{
    fn prefix_len() -> usize {
        0
    }

    fn into_variadic_operation(self) -> Rc<OperationFn> {
        Rc::new(move |args: Vec<Value>| {
            let rest = rest_from_args::<T>(args.into_iter())?;
            (self)(rest).into_value_result()
        })
    }
}

macro_rules! impl_into_variadic_operation_for_prefix {
    ($prefix:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, R, T, $( $A ),+> IntoVariadicOperation<( $( $A, )+ Vec<T>, )> for F
        where
            F: Fn( $( $A, )+ Vec<T> ) -> R + 'static,
            $( $A: FromParam, )+
            T: FromParam,
            R: IntoValueResult,
        {
            fn prefix_len() -> usize {
                $prefix
            }

            fn into_variadic_operation(self) -> Rc<OperationFn> {
                Rc::new(move |args: Vec<Value>| {
                    if args.len() < $prefix {
                        return Err(Error::arity_error(Arity::AtLeast($prefix), args.len()));
                    }
                    let mut args = args.into_iter();
                    $(
                        let $p = <$A as FromParam>::from_arg(args.next().unwrap_or_default())?;
                    )+
                    let rest = rest_from_args::<T>(args)?;
                    (self)( $( $p, )+ rest ).into_value_result()
                })
            }
        }
    };
}

impl_into_variadic_operation_for_prefix!(1, p0: A1);
impl_into_variadic_operation_for_prefix!(2, p0: A1, p1: A2);
