//! Core value types for the interpreter. [`Value`] covers every Scheme datum:
//! atoms (numbers, symbols, strings, booleans), pairs chained into lists and
//! terminated by the empty list, the unspecified result, and procedure values.
//!
//! Pairs are shared and mutable: a [`Value::Pair`] is a reference-counted cell,
//! so cloning a list clones a handle, and `set-car!`/`set-cdr!` through one handle
//! are visible through every other. Ergonomic constructors ([`val`], [`sym`],
//! [`nil`], [`cons`]) are provided for building trees in code and tests.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::{EnvOperationFn, OperationFn};

/// Type alias for number values in interpreter
pub type NumberType = i64;

/// Allowed non-alphanumeric characters in symbol names
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&:^~.";

/// Check if a string is a valid symbol name
/// Valid: non-empty, no leading digit, no "-digit"/"+digit" prefix, not a lone ".",
/// alphanumeric + SYMBOL_SPECIAL_CHARS
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() || name == "." {
                return false;
            }

            if matches!(first_char, '-' | '+') && chars.next().is_some_and(|c| c.is_ascii_digit())
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// A cons cell. Chained through `rest`, pairs form lists.
#[derive(Clone)]
pub struct Pair {
    pub first: Value,
    pub rest: Value,
}

impl Drop for Pair {
    // Unlink the spine iteratively so freeing a long list does not recurse per cell
    fn drop(&mut self) {
        let mut rest = std::mem::take(&mut self.rest);
        while let Value::Pair(cell) = rest {
            rest = match Rc::try_unwrap(cell) {
                Ok(cell) => {
                    let mut pair = cell.into_inner();
                    std::mem::take(&mut pair.rest)
                }
                Err(_) => break,
            };
        }
    }
}

/// Parameter list of a user-defined procedure: fixed parameters plus an
/// optional collector that receives the remaining arguments as a list.
#[derive(Debug, Clone, PartialEq)]
pub struct Formals {
    pub params: Vec<Rc<str>>,
    pub rest: Option<Rc<str>>,
}

impl Formals {
    /// Validate a formals datum as written in `form`.
    ///
    /// Accepts `(a b c)`, `(a b . rest)` and a bare symbol `args`.
    pub(crate) fn from_value(formals: &Value, form: &'static str) -> Result<Self, Error> {
        let mut params: Vec<Rc<str>> = Vec::new();
        let mut current = formals.clone();
        let rest = loop {
            let next = match &current {
                Value::Nil => break None,
                Value::Symbol(name) => break Some(name.clone()),
                Value::Pair(pair) => {
                    let pair = pair.borrow();
                    match &pair.first {
                        Value::Symbol(name) => {
                            if params.contains(name) {
                                return Err(Error::DuplicateName(name.to_string()));
                            }
                            params.push(name.clone());
                        }
                        other => {
                            return Err(Error::malformed(
                                form,
                                format!("non-symbol parameter: {other}"),
                            ));
                        }
                    }
                    pair.rest.clone()
                }
                other => {
                    return Err(Error::malformed(
                        form,
                        format!("parameters must be a list, got: {other}"),
                    ));
                }
            };
            current = next;
        };

        if let Some(name) = &rest
            && params.contains(name)
        {
            return Err(Error::DuplicateName(name.to_string()));
        }

        Ok(Formals { params, rest })
    }

    pub fn arity(&self) -> crate::Arity {
        match self.rest {
            Some(_) => crate::Arity::AtLeast(self.params.len()),
            None => crate::Arity::Exact(self.params.len()),
        }
    }

    /// Rebuild the datum this parameter list was read from
    pub fn to_value(&self) -> Value {
        let tail = match &self.rest {
            Some(name) => Value::Symbol(name.clone()),
            None => Value::Nil,
        };
        Value::list_with_tail(
            self.params.iter().map(|p| Value::Symbol(p.clone())).collect(),
            tail,
        )
    }
}

/// Host side of a built-in: either a plain function of its arguments or one that
/// also receives the calling environment.
#[derive(Clone)]
pub enum BuiltinFn {
    Plain(Rc<OperationFn>),
    WithEnv(Rc<EnvOperationFn>),
}

/// A procedure implemented by the host
pub struct BuiltinProcedure {
    pub name: String,
    pub arity: crate::Arity,
    pub func: BuiltinFn,
}

impl BuiltinProcedure {
    pub fn needs_env(&self) -> bool {
        matches!(self.func, BuiltinFn::WithEnv(_))
    }
}

/// A lexically scoped procedure created by `lambda` or `define`
pub struct LambdaProcedure {
    pub formals: Formals,
    /// Proper list of body expressions
    pub body: Value,
    pub env: Environment,
}

/// A dynamically scoped procedure created by `mu`
pub struct MuProcedure {
    pub formals: Formals,
    pub body: Value,
}

/// The three procedure variants, dispatched by tag in the applier.
#[derive(Clone)]
pub enum Procedure {
    Builtin(Rc<BuiltinProcedure>),
    Lambda(Rc<LambdaProcedure>),
    Mu(Rc<MuProcedure>),
}

impl Procedure {
    fn ptr_eq(&self, other: &Procedure) -> bool {
        match (self, other) {
            (Procedure::Builtin(a), Procedure::Builtin(b)) => Rc::ptr_eq(a, b),
            (Procedure::Lambda(a), Procedure::Lambda(b)) => Rc::ptr_eq(a, b),
            (Procedure::Mu(a), Procedure::Mu(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Core value type in interpreter
///
/// To build a tree, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone, Default)]
pub enum Value {
    /// Numbers (integers only)
    Number(NumberType),
    /// Symbols (identifiers)
    Symbol(Rc<str>),
    /// String literals
    String(String),
    /// Boolean values
    Bool(bool),
    /// The empty list
    Nil,
    /// A shared, mutable cons cell
    Pair(Rc<RefCell<Pair>>),
    /// Built-in, lambda or mu procedure
    Procedure(Procedure),
    /// The no-value result (e.g. `if` without alternate)
    /// These values never equal themselves or any other value
    #[default]
    Unspecified,
}

impl Value {
    pub fn cons(first: Value, rest: Value) -> Value {
        Value::Pair(Rc::new(RefCell::new(Pair { first, rest })))
    }

    /// Build a list from `items` ending in `tail` (`Nil` for a proper list)
    pub fn list_with_tail(items: Vec<Value>, tail: Value) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::list_with_tail(items, Value::Nil)
    }

    /// Everything except `#f` counts as true
    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_symbol(&self, name: &str) -> bool {
        matches!(self, Value::Symbol(s) if &**s == name)
    }

    /// Self-evaluating values: everything except symbols and pairs
    pub fn is_self_evaluating(&self) -> bool {
        !matches!(self, Value::Symbol(_) | Value::Pair(_))
    }

    /// Collect the elements of a proper list, or `None` if `self` is not one
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut current = self.clone();
        loop {
            let next = match &current {
                Value::Nil => return Some(items),
                Value::Pair(pair) => {
                    let pair = pair.borrow();
                    items.push(pair.first.clone());
                    pair.rest.clone()
                }
                _ => return None,
            };
            current = next;
        }
    }

    /// True for a chain of pairs ending in the empty list
    pub fn is_list(&self) -> bool {
        let mut current = self.clone();
        loop {
            let next = match &current {
                Value::Nil => return true,
                Value::Pair(pair) => pair.borrow().rest.clone(),
                _ => return false,
            };
            current = next;
        }
    }

    /// First element of a pair
    pub fn car(&self) -> Option<Value> {
        match self {
            Value::Pair(pair) => Some(pair.borrow().first.clone()),
            _ => None,
        }
    }

    /// Rest of a pair
    pub fn cdr(&self) -> Option<Value> {
        match self {
            Value::Pair(pair) => Some(pair.borrow().rest.clone()),
            _ => None,
        }
    }

    /// Map `f` over the elements of a list, keeping any improper tail as is
    pub(crate) fn try_map<F>(&self, mut f: F) -> Result<Value, Error>
    where
        F: FnMut(&Value) -> Result<Value, Error>,
    {
        let mut items = Vec::new();
        let mut current = self.clone();
        let tail = loop {
            let next = match &current {
                Value::Pair(pair) => {
                    let (first, rest) = {
                        let pair = pair.borrow();
                        (pair.first.clone(), pair.rest.clone())
                    };
                    items.push(f(&first)?);
                    rest
                }
                other => break other.clone(),
            };
            current = next;
        };
        Ok(Value::list_with_tail(items, tail))
    }

    /// Identity comparison used by `eq?`: pairs and procedures by reference,
    /// atoms by value
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Procedure(a), Value::Procedure(b)) => a.ptr_eq(b),
            (Value::Pair(_), _) | (_, Value::Pair(_)) => false,
            _ => self == other,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Nil => write!(f, "Nil"),
            Value::Pair(_) => write!(f, "Pair{self}"),
            Value::Procedure(_) => write!(f, "Procedure({self})"),
            Value::Unspecified => write!(f, "Unspecified"),
        }
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pair({:?}, {:?})", self.first, self.rest)
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (keyword, formals, body) = match self {
            Procedure::Builtin(builtin) => {
                return write!(f, "#<builtin-function:{}>", builtin.name);
            }
            Procedure::Lambda(lambda) => ("lambda", &lambda.formals, &lambda.body),
            Procedure::Mu(mu) => ("mu", &mu.formals, &mu.body),
        };
        write!(f, "({keyword} {}", formals.to_value())?;
        for expr in body.list_to_vec().unwrap_or_default() {
            write!(f, " {expr}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Nil => write!(f, "()"),
            Value::Pair(_) => {
                write!(f, "(")?;
                let mut current = self.clone();
                // Follows `current` at half speed; meeting it means the spine is circular
                let mut trailing = self.clone();
                let mut count = 0usize;
                loop {
                    if count > 0 && current.is_identical(&trailing) {
                        write!(f, " ...")?;
                        break;
                    }
                    let next = match &current {
                        Value::Pair(pair) => {
                            let pair = pair.borrow();
                            if count > 0 {
                                write!(f, " ")?;
                            }
                            write!(f, "{}", pair.first)?;
                            pair.rest.clone()
                        }
                        Value::Nil => break,
                        tail => {
                            write!(f, " . {tail}")?;
                            break;
                        }
                    };
                    count += 1;
                    if count % 2 == 0 {
                        trailing = trailing.cdr().unwrap_or_default();
                    }
                    current = next;
                }
                write!(f, ")")
            }
            Value::Procedure(procedure) => write!(f, "{procedure}"),
            Value::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality. Lists are compared along their spine in a loop;
    /// only elements recurse.
    fn eq(&self, other: &Self) -> bool {
        let (Value::Pair(a), Value::Pair(b)) = (self, other) else {
            return self.atom_eq(other);
        };
        let (mut a, mut b) = (a.clone(), b.clone());
        loop {
            if Rc::ptr_eq(&a, &b) {
                return true;
            }
            let (next_a, next_b) = {
                let (left, right) = (a.borrow(), b.borrow());
                if left.first != right.first {
                    return false;
                }
                match (&left.rest, &right.rest) {
                    (Value::Pair(x), Value::Pair(y)) => (x.clone(), y.clone()),
                    (x, y) => return x.atom_eq(y),
                }
            };
            a = next_a;
            b = next_b;
        }
    }
}

impl Value {
    fn atom_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Procedure(a), Value::Procedure(b)) => a.ptr_eq(b),
            (Value::Unspecified, _) | (_, Value::Unspecified) => false, // Unspecified never equals anything
            _ => false,
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Unspecified
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(NumberType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(Rc::from(name.as_ref()))
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list
pub fn nil() -> Value {
    Value::Nil
}

/// Helper function for a single cons cell
pub fn cons(first: impl Into<Value>, rest: impl Into<Value>) -> Value {
    Value::cons(first.into(), rest.into())
}
