//! scheme-eval - evaluation core for a small Scheme dialect
//!
//! This crate evaluates Scheme expressions that have already been read into
//! [`ast::Value`] trees. It implements the language's operational semantics:
//! atoms, the special forms, and procedure application for three kinds of
//! procedures.
//!
//! ```scheme
//! (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))
//! (let ((x 1) (y 2)) (+ x y))
//! `(a ,(+ 1 2))                  ; => (a 3)
//! (define f (mu () x))           ; dynamically scoped: x is looked up at the call site
//! ```
//!
//! ## Procedures
//!
//! - **Built-in**: host functions registered in the global frame, see [`builtinops`]
//! - **Lexical** (`lambda`): resolve free names in the frame they were created in
//! - **Dynamic** (`mu`): resolve free names in the frame they are called from
//!
//! ## Tail calls
//!
//! Expressions in tail position are returned to the caller as deferred
//! evaluations and resolved in a loop, so self-recursive loops written in tail
//! form run in constant host stack.
//!
//! ## Modules
//!
//! - `ast`: values, pairs and procedure representations
//! - `evaluator`: frames, `evaluate`, `apply`, special forms
//! - `builtinops`: the built-in procedure library
//! - `scheme`: S-expression reader (feature `scheme`, on by default)

use std::fmt;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum depth of non-tail evaluation nesting.
/// Tail calls are resolved by the trampoline and do not count against this limit.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Number of arguments a procedure accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    /// Check an argument count, producing an unattributed `ArityMismatch`
    pub fn validate(&self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::ArityMismatch {
                procedure: None,
                expected: *self,
                got: count,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arity::Exact(1) => write!(f, "1 argument"),
            Arity::Exact(n) => write!(f, "{n} arguments"),
            Arity::AtLeast(n) => write!(f, "at least {n} arguments"),
            Arity::Range(min, max) => write!(f, "{min} to {max} arguments"),
            Arity::Any => write!(f, "any number of arguments"),
        }
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(String),
    #[error("MalformedExpression: malformed list: {0}")]
    MalformedExpression(String),
    #[error("UnboundName: unknown identifier: {0}")]
    UnboundName(String),
    #[error("NotApplicable: cannot call: {0}")]
    NotApplicable(String),
    #[error("ArityMismatch: {}expected {expected}, got {got}", procedure_prefix(.procedure))]
    ArityMismatch {
        procedure: Option<String>,
        expected: Arity,
        got: usize,
    },
    #[error("MalformedSpecialForm: {form}: {message}")]
    MalformedSpecialForm {
        form: &'static str,
        message: String,
    },
    #[error("MalformedBindings: bad bindings list in let form: {0}")]
    MalformedBindings(String),
    #[error("DuplicateName: duplicate symbol: {0}")]
    DuplicateName(String),
    #[error("MisplacedElse: else must be last")]
    MisplacedElse,
    #[error("UnquoteOutsideQuasiquote: unquote outside of quasiquote")]
    UnquoteOutsideQuasiquote,
    #[error("NonSymbolDefinitionTarget: non-symbol: {0}")]
    NonSymbolDefinitionTarget(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
}

fn procedure_prefix(procedure: &Option<String>) -> String {
    match procedure {
        Some(name) => format!("{name}: "),
        None => String::new(),
    }
}

impl Error {
    /// Create an ArityMismatch that names no procedure yet
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityMismatch {
            procedure: None,
            expected,
            got,
        }
    }

    /// Create a MalformedSpecialForm for the named form
    pub fn malformed(form: &'static str, message: impl Into<String>) -> Self {
        Error::MalformedSpecialForm {
            form,
            message: message.into(),
        }
    }

    /// Attach a procedure name to an arity error that does not carry one yet.
    /// Other errors pass through unchanged.
    pub fn for_procedure(self, name: impl fmt::Display) -> Self {
        match self {
            Error::ArityMismatch {
                procedure: None,
                expected,
                got,
            } => Error::ArityMismatch {
                procedure: Some(name.to_string()),
                expected,
                got,
            },
            other => other,
        }
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;

#[cfg(feature = "scheme")]
pub mod scheme;

pub use evaluator::{Environment, apply, create_global_env, eval_all, evaluate};
