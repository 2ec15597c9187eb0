//! Built-in procedure registry.
//!
//! Every entry pairs a Scheme identifier with an arity contract and a host
//! function. [`crate::evaluator::create_global_env`] installs the whole registry
//! into a fresh root frame, so built-ins are ordinary bindings that programs may
//! shadow or redefine.
//!
//! ```scheme
//! (+ 1 2 3)              ; => 6
//! (cons 1 '(2 3))        ; => (1 2 3)
//! (apply max '(4 9 2))   ; => 9
//! (eval '(* 6 7))        ; => 42
//! ```
//!
//! ## Error Handling
//!
//! - **Type Safety**: numeric operations reject non-numbers (`(+ 1 "2")` errors)
//! - **Overflow Detection**: arithmetic detects and reports `i64` overflow
//! - **Arity Checking**: the applier validates the contract before the host
//!   function runs, and reports mismatches naming the built-in
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`NumberType`, `bool`,
//!    `String`, `Value`, or a trailing `Vec<T>` for the remaining arguments)
//!    returning `Result<T, Error>` for some `T: Into<Value>`
//! 2. **Add it to `get_builtin_ops`** with its Scheme identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use crate::ast::{BuiltinFn, NumberType, Value};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{self, Environment};
use crate::{Arity, Error};
use std::rc::Rc;

/// Definition of a built-in operation
#[derive(Clone)]
pub struct BuiltinOp {
    /// The Scheme identifier for this operation
    pub scheme_id: &'static str,
    /// Expected number of arguments
    pub arity: Arity,
    /// Host implementation
    pub func: BuiltinFn,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("scheme_id", &self.scheme_id)
            .field("arity", &self.arity)
            .field("needs_env", &matches!(self.func, BuiltinFn::WithEnv(_)))
            .finish()
    }
}

//
// Arithmetic
//

fn overflow(operation: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {operation}"))
}

fn builtin_add(nums: Vec<NumberType>) -> Result<NumberType, Error> {
    let mut sum: NumberType = 0;
    for n in nums {
        sum = sum.checked_add(n).ok_or_else(|| overflow("addition"))?;
    }
    Ok(sum)
}

fn builtin_sub(first: NumberType, rest: Vec<NumberType>) -> Result<NumberType, Error> {
    if rest.is_empty() {
        return first.checked_neg().ok_or_else(|| overflow("negation"));
    }

    let mut result = first;
    for n in rest {
        result = result
            .checked_sub(n)
            .ok_or_else(|| overflow("subtraction"))?;
    }
    Ok(result)
}

fn builtin_mul(nums: Vec<NumberType>) -> Result<NumberType, Error> {
    let mut product: NumberType = 1;
    for n in nums {
        product = product
            .checked_mul(n)
            .ok_or_else(|| overflow("multiplication"))?;
    }
    Ok(product)
}

fn nonzero_divisor(divisor: NumberType) -> Result<NumberType, Error> {
    if divisor == 0 {
        Err(Error::EvalError("Division by zero".into()))
    } else {
        Ok(divisor)
    }
}

fn builtin_quotient(dividend: NumberType, divisor: NumberType) -> Result<NumberType, Error> {
    dividend
        .checked_div(nonzero_divisor(divisor)?)
        .ok_or_else(|| overflow("division"))
}

/// Remainder with the sign of the dividend
fn builtin_remainder(dividend: NumberType, divisor: NumberType) -> Result<NumberType, Error> {
    dividend
        .checked_rem(nonzero_divisor(divisor)?)
        .ok_or_else(|| overflow("division"))
}

/// Remainder with the sign of the divisor
fn builtin_modulo(dividend: NumberType, divisor: NumberType) -> Result<NumberType, Error> {
    let divisor = nonzero_divisor(divisor)?;
    let remainder = dividend
        .checked_rem(divisor)
        .ok_or_else(|| overflow("division"))?;
    if remainder != 0 && (remainder < 0) != (divisor < 0) {
        Ok(remainder + divisor)
    } else {
        Ok(remainder)
    }
}

fn builtin_abs(n: NumberType) -> Result<NumberType, Error> {
    n.checked_abs().ok_or_else(|| overflow("abs"))
}

fn builtin_max(first: NumberType, rest: Vec<NumberType>) -> Result<NumberType, Error> {
    Ok(rest.into_iter().fold(first, NumberType::max))
}

fn builtin_min(first: NumberType, rest: Vec<NumberType>) -> Result<NumberType, Error> {
    Ok(rest.into_iter().fold(first, NumberType::min))
}

// Macro to generate chained numeric comparisons: all adjacent pairs must satisfy `$op`
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: Vec<NumberType>) -> Result<bool, Error> {
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return Ok(false);
                }
                prev = current;
            }
            Ok(true)
        }
    };
}

numeric_comparison!(builtin_eq, ==);
numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

//
// Logic and equivalence
//

fn builtin_not(value: Value) -> Result<bool, Error> {
    Ok(!value.is_true())
}

fn builtin_equal(first: Value, second: Value) -> Result<bool, Error> {
    Ok(first == second)
}

fn builtin_eq_identity(first: Value, second: Value) -> Result<bool, Error> {
    Ok(first.is_identical(&second))
}

//
// Pairs and lists
//

fn builtin_car(pair: Value) -> Result<Value, Error> {
    pair.car()
        .ok_or_else(|| Error::TypeError(format!("car: expected pair, got {pair}")))
}

fn builtin_cdr(pair: Value) -> Result<Value, Error> {
    pair.cdr()
        .ok_or_else(|| Error::TypeError(format!("cdr: expected pair, got {pair}")))
}

fn builtin_cons(first: Value, rest: Value) -> Result<Value, Error> {
    Ok(Value::cons(first, rest))
}

fn builtin_set_car(pair: Value, value: Value) -> Result<(), Error> {
    let Value::Pair(cell) = &pair else {
        return Err(Error::TypeError(format!("set-car!: expected pair, got {pair}")));
    };
    cell.borrow_mut().first = value;
    Ok(())
}

fn builtin_set_cdr(pair: Value, value: Value) -> Result<(), Error> {
    let Value::Pair(cell) = &pair else {
        return Err(Error::TypeError(format!("set-cdr!: expected pair, got {pair}")));
    };
    cell.borrow_mut().rest = value;
    Ok(())
}

fn builtin_list(items: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::list(items))
}

fn builtin_length(list: Value) -> Result<NumberType, Error> {
    let items = list
        .list_to_vec()
        .ok_or_else(|| Error::TypeError(format!("length: expected list, got {list}")))?;
    NumberType::try_from(items.len()).map_err(|_| overflow("length"))
}

/// Concatenate lists; the last argument becomes the shared tail of the result
fn builtin_append(lists: Vec<Value>) -> Result<Value, Error> {
    let Some((tail, init)) = lists.split_last() else {
        return Ok(Value::Nil);
    };
    let mut items = Vec::new();
    for list in init {
        let elements = list
            .list_to_vec()
            .ok_or_else(|| Error::TypeError(format!("append: expected list, got {list}")))?;
        items.extend(elements);
    }
    Ok(Value::list_with_tail(items, tail.clone()))
}

//
// Type predicates
//

fn builtin_null(value: Value) -> Result<bool, Error> {
    Ok(value.is_nil())
}

fn builtin_is_pair(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::Pair(_)))
}

fn builtin_is_list(value: Value) -> Result<bool, Error> {
    Ok(value.is_list())
}

fn builtin_is_number(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::Number(_)))
}

fn builtin_is_symbol(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::Symbol(_)))
}

fn builtin_is_string(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::String(_)))
}

fn builtin_is_boolean(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::Bool(_)))
}

fn builtin_is_procedure(value: Value) -> Result<bool, Error> {
    Ok(matches!(value, Value::Procedure(_)))
}

//
// Strings, output and errors
//

fn builtin_string_append(parts: Vec<String>) -> Result<String, Error> {
    Ok(parts.concat())
}

/// Text of a value as `display` shows it: strings without quotes
fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => format!("{other}"),
    }
}

fn builtin_display(value: Value) -> Result<(), Error> {
    print!("{}", display_text(&value));
    Ok(())
}

fn builtin_newline() -> Result<(), Error> {
    println!();
    Ok(())
}

fn builtin_error(args: Vec<Value>) -> Result<Value, Error> {
    let message = if args.is_empty() {
        "Error".to_owned()
    } else {
        args.iter().map(display_text).collect::<Vec<_>>().join(" ")
    };
    Err(Error::EvalError(message))
}

//
// Built-ins that need the calling environment
//

fn builtin_eval(args: Vec<Value>, env: &Environment) -> Result<Value, Error> {
    let expr = args.into_iter().next().unwrap_or_default();
    evaluator::evaluate(&expr, env)
}

fn builtin_apply(args: Vec<Value>, env: &Environment) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let procedure = args.next().unwrap_or_default();
    let arguments = args.next().unwrap_or_default();
    if !arguments.is_list() {
        return Err(Error::TypeError(format!(
            "apply: expected argument list, got {arguments}"
        )));
    }
    evaluator::apply(&procedure, arguments, env)
}

/// All built-in operations, in registration order.
///
/// Typed implementations are wired through the same adapter layer used for
/// custom built-in registration.
pub(crate) fn get_builtin_ops() -> Vec<BuiltinOp> {
    fn fixed<Args, F: IntoOperation<Args>>(f: F) -> BuiltinFn {
        BuiltinFn::Plain(f.into_operation())
    }

    fn variadic<Args, F: IntoVariadicOperation<Args>>(f: F) -> BuiltinFn {
        BuiltinFn::Plain(f.into_variadic_operation())
    }

    fn with_env(f: fn(Vec<Value>, &Environment) -> Result<Value, Error>) -> BuiltinFn {
        BuiltinFn::WithEnv(Rc::new(f))
    }

    fn plain(f: fn(Vec<Value>) -> Result<Value, Error>) -> BuiltinFn {
        let f: Rc<OperationFn> = Rc::new(f);
        BuiltinFn::Plain(f)
    }

    fn op(scheme_id: &'static str, arity: Arity, func: BuiltinFn) -> BuiltinOp {
        BuiltinOp {
            scheme_id,
            arity,
            func,
        }
    }

    type Nums = (Vec<NumberType>,);
    type FirstAndNums = (NumberType, Vec<NumberType>);
    type NumPair = (NumberType, NumberType);

    vec![
        // Arithmetic operations
        op("+", Arity::Any, variadic::<Nums, _>(builtin_add)),
        op("-", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_sub)),
        op("*", Arity::Any, variadic::<Nums, _>(builtin_mul)),
        op("quotient", Arity::Exact(2), fixed::<NumPair, _>(builtin_quotient)),
        op("remainder", Arity::Exact(2), fixed::<NumPair, _>(builtin_remainder)),
        op("modulo", Arity::Exact(2), fixed::<NumPair, _>(builtin_modulo)),
        op("abs", Arity::Exact(1), fixed::<(NumberType,), _>(builtin_abs)),
        op("max", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_max)),
        op("min", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_min)),
        // Comparison operations
        op("=", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_eq)),
        op("<", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_lt)),
        op(">", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_gt)),
        op("<=", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_le)),
        op(">=", Arity::AtLeast(1), variadic::<FirstAndNums, _>(builtin_ge)),
        // Logic and equivalence
        op("not", Arity::Exact(1), fixed::<(Value,), _>(builtin_not)),
        op("equal?", Arity::Exact(2), fixed::<(Value, Value), _>(builtin_equal)),
        op("eq?", Arity::Exact(2), fixed::<(Value, Value), _>(builtin_eq_identity)),
        // Pairs and lists
        op("car", Arity::Exact(1), fixed::<(Value,), _>(builtin_car)),
        op("cdr", Arity::Exact(1), fixed::<(Value,), _>(builtin_cdr)),
        op("cons", Arity::Exact(2), fixed::<(Value, Value), _>(builtin_cons)),
        op("set-car!", Arity::Exact(2), fixed::<(Value, Value), _>(builtin_set_car)),
        op("set-cdr!", Arity::Exact(2), fixed::<(Value, Value), _>(builtin_set_cdr)),
        op("list", Arity::Any, variadic::<(Vec<Value>,), _>(builtin_list)),
        op("length", Arity::Exact(1), fixed::<(Value,), _>(builtin_length)),
        op("append", Arity::Any, variadic::<(Vec<Value>,), _>(builtin_append)),
        // Type predicates
        op("null?", Arity::Exact(1), fixed::<(Value,), _>(builtin_null)),
        op("pair?", Arity::Exact(1), fixed::<(Value,), _>(builtin_is_pair)),
        op("list?", Arity::Exact(1), fixed::<(Value,), _>(builtin_is_list)),
        op("number?", Arity::Exact(1), fixed::<(Value,), _>(builtin_is_number)),
        op("symbol?", Arity::Exact(1), fixed::<(Value,), _>(builtin_is_symbol)),
        op("string?", Arity::Exact(1), fixed::<(Value,), _>(builtin_is_string)),
        op("boolean?", Arity::Exact(1), fixed::<(Value,), _>(builtin_is_boolean)),
        op("procedure?", Arity::Exact(1), fixed::<(Value,), _>(builtin_is_procedure)),
        // Strings and output
        op("string-append", Arity::Any, variadic::<(Vec<String>,), _>(builtin_string_append)),
        op("display", Arity::Exact(1), fixed::<(Value,), _>(builtin_display)),
        op("newline", Arity::Exact(0), fixed::<(), _>(builtin_newline)),
        // Error handling
        op("error", Arity::Any, plain(builtin_error)),
        // Evaluation
        op("eval", Arity::Exact(1), with_env(builtin_eval)),
        op("apply", Arity::Exact(2), with_env(builtin_apply)),
    ]
}
