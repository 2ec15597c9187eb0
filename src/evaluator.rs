use crate::ast::{BuiltinFn, BuiltinProcedure, Formals, Procedure, Value};
use crate::builtinops::get_builtin_ops;
use crate::{Arity, Error, MAX_EVAL_DEPTH};
use intooperation::{EnvOperationFn, IntoOperation, IntoVariadicOperation, OperationFn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub mod intooperation;
pub(crate) mod special_forms;

/// Remaining stack below which evaluation switches to a freshly allocated segment
const RED_ZONE: usize = 128 * 1024;

/// Size of each stack segment allocated for deep non-tail recursion
const STACK_PER_RECURSION: usize = 2 * 1024 * 1024;

struct Frame {
    bindings: HashMap<Rc<str>, Value>,
    parent: Option<Environment>,
}

impl Drop for Frame {
    // Dynamic calls chain each frame to its caller's, so a long `mu` loop leaves
    // a chain as long as the loop. Release it iteratively.
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(Environment(frame)) = parent {
            parent = match Rc::try_unwrap(frame) {
                Ok(frame) => frame.into_inner().parent.take(),
                Err(_) => None,
            };
        }
    }
}

/// Handle to a frame of variable bindings.
///
/// Cloning the handle shares the frame: a `define` through any clone is visible
/// to every procedure and child frame holding it.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Frame>>);

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Environment {
    // Frames routinely contain closures over themselves; print a summary only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.0.borrow();
        f.debug_struct("Environment")
            .field("bindings", &frame.bindings.len())
            .field("has_parent", &frame.parent.is_some())
            .finish()
    }
}

impl Environment {
    /// A root frame with no parent and no bindings
    pub fn new() -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: None,
        })))
    }

    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Bind `name` in this frame, replacing any existing binding here.
    pub fn define(&self, name: impl Into<Rc<str>>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Look `name` up in this frame and then its ancestors
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = self.clone();
        loop {
            let parent = {
                let inner = frame.0.borrow();
                if let Some(value) = inner.bindings.get(name) {
                    return Some(value.clone());
                }
                inner.parent.clone()
            };
            frame = parent?;
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnboundName(name.to_owned()))
    }

    /// Create a child frame binding `formals` to the elements of the Scheme list `args`.
    ///
    /// A rest collector receives the surplus arguments as a fresh list. Count
    /// mismatches produce an `ArityMismatch` that does not yet name a procedure.
    pub fn make_child_frame(&self, formals: &Formals, args: Value) -> Result<Environment, Error> {
        let values = args
            .list_to_vec()
            .ok_or_else(|| Error::MalformedExpression(format!("{args}")))?;
        formals.arity().validate(values.len())?;

        let child = Environment::with_parent(self);
        let mut values = values.into_iter();
        for param in &formals.params {
            child.define(param.clone(), values.next().unwrap_or_default());
        }
        if let Some(rest) = &formals.rest {
            child.define(rest.clone(), Value::list(values.collect()));
        }
        Ok(child)
    }

    fn define_builtin(&self, name: &str, arity: Arity, func: BuiltinFn) {
        self.define(
            name,
            Value::Procedure(Procedure::Builtin(Rc::new(BuiltinProcedure {
                name: name.to_owned(),
                arity,
                func,
            }))),
        );
    }

    /// Register a custom builtin working directly on evaluated arguments.
    ///
    /// # Example
    /// ```
    /// use scheme_eval::evaluator::create_global_env;
    /// use scheme_eval::ast::Value;
    /// use scheme_eval::{Arity, Error};
    ///
    /// fn count_args(args: Vec<Value>) -> Result<Value, Error> {
    ///     Ok(Value::Number(args.len() as i64))
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("count-args", Arity::Any, count_args);
    /// ```
    pub fn register_builtin_function<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    {
        let func: Rc<OperationFn> = Rc::new(func);
        self.define_builtin(name, arity, BuiltinFn::Plain(func));
    }

    /// Register a builtin that also receives the environment it is called from.
    pub fn register_env_builtin<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(Vec<Value>, &Environment) -> Result<Value, Error> + 'static,
    {
        let func: Rc<EnvOperationFn> = Rc::new(func);
        self.define_builtin(name, arity, BuiltinFn::WithEnv(func));
    }

    /// Register a strongly-typed Rust function as a builtin.
    ///
    /// The arity contract is derived from the signature, and each argument is
    /// converted with [`intooperation::FromParam`] (`i64`, `bool`, `String`, `Value`).
    /// The function returns `Result<R, Error>` for any `R: Into<Value>`.
    ///
    /// ```rust,ignore
    /// fn add(a: i64, b: i64) -> Result<i64, Error> { Ok(a + b) }
    /// env.register_builtin_operation::<_, (i64, i64)>("add", add);
    /// ```
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        let arity = F::arity();
        self.define_builtin(name, arity, BuiltinFn::Plain(func.into_operation()));
    }

    /// Register a typed builtin whose last parameter is a `Vec<T>` collecting the
    /// remaining arguments. `arity` is checked on every call, since the minimum
    /// and maximum argument counts are not always derivable from the signature.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args>,
    {
        self.define_builtin(name, arity, BuiltinFn::Plain(func.into_variadic_operation()));
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        if let Some(parent) = self.parent() {
            for (name, value) in parent.get_all_bindings() {
                bindings.insert(name, value);
            }
        }

        for (name, value) in &self.0.borrow().bindings {
            bindings.insert(name.to_string(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

/// Result of one evaluation step: either a final value, or an expression left
/// to evaluate in the given environment (a tail call).
pub(crate) enum Trampoline {
    Value(Value),
    Eval(Value, Environment),
}

/// Evaluate an expression (public API)
pub fn evaluate(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth(expr, env, 0)
}

/// Apply a procedure to a Scheme list of evaluated arguments (public API)
///
/// `env` is the calling environment: it is passed to builtins that need it and
/// becomes the parent frame of a `mu` procedure's body.
pub fn apply(procedure: &Value, args: Value, env: &Environment) -> Result<Value, Error> {
    let step = apply_step(procedure, args, env, 0)?;
    resolve(step, 0)
}

/// Evaluate each expression of a Scheme list in order and return the last value.
/// An empty list evaluates to `Unspecified`.
pub fn eval_all(expressions: &Value, env: &Environment) -> Result<Value, Error> {
    let step = eval_all_step(expressions, env, 0)?;
    resolve(step, 0)
}

/// Fully evaluate `expr`, guarding against runaway non-tail recursion
pub(crate) fn eval_with_depth(
    expr: &Value,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, || {
        let step = eval_step(expr, env, depth)?;
        resolve(step, depth)
    })
}

/// Run deferred evaluations until a final value is produced
fn resolve(mut step: Trampoline, depth: usize) -> Result<Value, Error> {
    loop {
        match step {
            Trampoline::Value(value) => return Ok(value),
            Trampoline::Eval(expr, env) => {
                tracing::trace!(expr = %expr, "tail call");
                step = eval_step(&expr, &env, depth)?;
            }
        }
    }
}

/// Evaluate an expression in tail position: compound expressions are handed back
/// to the caller's trampoline instead of being evaluated here.
pub(crate) fn eval_tail(
    expr: &Value,
    env: &Environment,
    depth: usize,
) -> Result<Trampoline, Error> {
    match expr {
        Value::Pair(_) => Ok(Trampoline::Eval(expr.clone(), env.clone())),
        _ => eval_step(expr, env, depth),
    }
}

/// One dispatch step: atoms, special forms and procedure application
fn eval_step(expr: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    match expr {
        Value::Symbol(name) => env.lookup(name).map(Trampoline::Value),

        Value::Pair(pair) => {
            if !expr.is_list() {
                return Err(Error::MalformedExpression(format!("{expr}")));
            }
            let (operator, operands) = {
                let pair = pair.borrow();
                (pair.first.clone(), pair.rest.clone())
            };

            if let Value::Symbol(name) = &operator
                && let Some(handler) = special_forms::find_special_form(name)
            {
                return handler(&operands, env, depth);
            }

            let procedure = eval_with_depth(&operator, env, depth + 1)?;
            let args = operands.try_map(|operand| eval_with_depth(operand, env, depth + 1))?;
            apply_step(&procedure, args, env, depth)
        }

        // Numbers, strings, booleans, the empty list, procedures and Unspecified
        _ => Ok(Trampoline::Value(expr.clone())),
    }
}

/// Apply a procedure, leaving the final body expression of user procedures
/// deferred for the trampoline
pub(crate) fn apply_step(
    procedure: &Value,
    args: Value,
    env: &Environment,
    depth: usize,
) -> Result<Trampoline, Error> {
    let Value::Procedure(procedure) = procedure else {
        return Err(Error::NotApplicable(format!("{procedure}")));
    };

    match procedure {
        Procedure::Builtin(builtin) => {
            let args = args
                .list_to_vec()
                .ok_or_else(|| Error::MalformedExpression(format!("{args}")))?;
            builtin
                .arity
                .validate(args.len())
                .map_err(|err| err.for_procedure(&builtin.name))?;
            tracing::trace!(builtin = %builtin.name, argc = args.len(), "apply builtin");

            let result = match &builtin.func {
                BuiltinFn::Plain(func) => func(args),
                BuiltinFn::WithEnv(func) => func(args, env),
            };
            result
                .map(Trampoline::Value)
                .map_err(|err| err.for_procedure(&builtin.name))
        }
        Procedure::Lambda(lambda) => {
            tracing::trace!(procedure = %procedure, "apply lambda");
            let frame = lambda
                .env
                .make_child_frame(&lambda.formals, args)
                .map_err(|err| err.for_procedure(procedure))?;
            eval_all_step(&lambda.body, &frame, depth)
        }
        Procedure::Mu(mu) => {
            tracing::trace!(procedure = %procedure, "apply mu");
            let frame = env
                .make_child_frame(&mu.formals, args)
                .map_err(|err| err.for_procedure(procedure))?;
            eval_all_step(&mu.body, &frame, depth)
        }
    }
}

/// Sequencing shared by `begin`, procedure bodies and `let` bodies.
/// The last expression is evaluated in tail position.
pub(crate) fn eval_all_step(
    expressions: &Value,
    env: &Environment,
    depth: usize,
) -> Result<Trampoline, Error> {
    let mut current = expressions.clone();
    loop {
        let (expr, rest) = match &current {
            Value::Nil => return Ok(Trampoline::Value(Value::Unspecified)),
            Value::Pair(pair) => {
                let pair = pair.borrow();
                (pair.first.clone(), pair.rest.clone())
            }
            _ => return Err(Error::MalformedExpression(format!("{expressions}"))),
        };
        if rest.is_nil() {
            return eval_tail(&expr, env, depth);
        }
        eval_with_depth(&expr, env, depth + 1)?;
        current = rest;
    }
}

/// Create a global environment with the built-in procedures
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    for builtin_op in get_builtin_ops() {
        env.define_builtin(builtin_op.scheme_id, builtin_op.arity, builtin_op.func);
    }
    env
}

#[cfg(all(test, feature = "scheme"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use crate::scheme::parse_scheme;
    use pretty_assertions::assert_eq;

    /// Test result variants for data-driven tests
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        AnyError,                    // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Setup expressions (define returns the defined symbol)
    macro_rules! test_setup {
        ($expr:expr, $name:expr) => {
            ($expr, EvalResult(sym($name)))
        };
    }

    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = match parse_scheme(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (evaluate(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => match (&actual, expected_val) {
                (Value::Unspecified, Value::Unspecified) => {}
                _ => assert_eq!(actual, *expected_val, "{test_id}: {input}"),
            },
            (Err(_), AnyError) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), AnyError) => {
                panic!("{test_id}: expected error for '{input}', got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: expected {expected_val:?} for '{input}', got error {err:?}");
            }
        }
    }

    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    fn eval_str(input: &str, env: &Environment) -> Result<Value, crate::Error> {
        evaluate(&parse_scheme(input).unwrap(), env)
    }

    #[test]
    fn test_environment_lookup_walks_parents() {
        let root = Environment::new();
        root.define("x", val(1));
        root.define("y", val(2));
        let child = Environment::with_parent(&root);
        child.define("x", val(10));

        assert_eq!(child.lookup("x").unwrap(), val(10));
        assert_eq!(child.lookup("y").unwrap(), val(2));
        assert_eq!(root.lookup("x").unwrap(), val(1));
        assert_eq!(
            child.lookup("z"),
            Err(crate::Error::UnboundName("z".into()))
        );
        assert_eq!(child.parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_make_child_frame() {
        let root = Environment::new();
        let formals = Formals {
            params: vec![Rc::from("a"), Rc::from("b")],
            rest: Some(Rc::from("more")),
        };
        let frame = root
            .make_child_frame(&formals, val([1, 2, 3, 4]))
            .unwrap();
        assert_eq!(frame.lookup("a").unwrap(), val(1));
        assert_eq!(frame.lookup("b").unwrap(), val(2));
        assert_eq!(frame.lookup("more").unwrap(), val([3, 4]));

        let frame = root.make_child_frame(&formals, val([1, 2])).unwrap();
        assert_eq!(frame.lookup("more").unwrap(), nil());

        assert!(matches!(
            root.make_child_frame(&formals, val([1])),
            Err(crate::Error::ArityMismatch { got: 1, .. })
        ));
    }

    #[test]
    fn test_define_visible_through_shared_handles() {
        let env = create_global_env();
        let alias = env.clone();
        alias.define("shared", val(7));
        assert_eq!(eval_str("shared", &env).unwrap(), val(7));
    }

    #[test]
    fn test_symbols_evaluate_to_bindings() {
        let root = Environment::new();
        root.define("answer", val(42));
        let nested = Environment::with_parent(&Environment::with_parent(&root));
        assert_eq!(evaluate(&sym("answer"), &nested).unwrap(), val(42));
        assert!(matches!(
            evaluate(&sym("question"), &nested),
            Err(crate::Error::UnboundName(_))
        ));
    }

    #[test]
    fn test_eval_all_sequencing() {
        let env = create_global_env();
        let result = eval_all(&nil(), &env).unwrap();
        assert!(matches!(result, Value::Unspecified));

        let body = parse_scheme("((define a 1) (define b (+ a 1)) (* b 10))").unwrap();
        assert_eq!(eval_all(&body, &env).unwrap(), val(20));
        assert_eq!(env.lookup("a").unwrap(), val(1));
    }

    #[test]
    fn test_apply_entry_point() {
        let env = create_global_env();
        let plus = env.lookup("+").unwrap();
        assert_eq!(apply(&plus, val([1, 2, 3]), &env).unwrap(), val(6));

        let square = eval_str("(lambda (x) (* x x))", &env).unwrap();
        assert_eq!(apply(&square, val([7]), &env).unwrap(), val(49));

        assert!(matches!(
            apply(&val(3), val([1]), &env),
            Err(crate::Error::NotApplicable(_))
        ));
    }

    #[test]
    fn test_builtin_arity_mismatch_names_procedure() {
        let env = create_global_env();
        match eval_str("(car)", &env) {
            Err(crate::Error::ArityMismatch {
                procedure: Some(name),
                expected: Arity::Exact(1),
                got: 0,
            }) => assert_eq!(name, "car"),
            other => panic!("expected ArityMismatch, got {other:?}"),
        }
        let message = format!("{}", eval_str("(cons 1)", &env).unwrap_err());
        assert!(message.contains("cons"), "{message}");
    }

    #[test]
    fn test_register_builtin_operation() {
        fn add(a: i64, b: i64) -> Result<i64, crate::Error> {
            Ok(a + b)
        }
        let env = create_global_env();
        env.register_builtin_operation::<_, (i64, i64)>("add2", add);
        assert_eq!(eval_str("(add2 7 5)", &env).unwrap(), val(12));
        match eval_str("(add2 7)", &env) {
            Err(crate::Error::ArityMismatch {
                procedure: Some(name),
                ..
            }) => assert_eq!(name, "add2"),
            other => panic!("expected ArityMismatch, got {other:?}"),
        }
        assert!(matches!(
            eval_str("(add2 7 \"x\")", &env),
            Err(crate::Error::TypeError(_))
        ));
    }

    #[test]
    fn test_register_variadic_builtin_operation() {
        fn weighted_sum(weight: i64, nums: Vec<i64>) -> Result<i64, crate::Error> {
            Ok(weight * nums.iter().sum::<i64>())
        }
        let env = create_global_env();
        env.register_variadic_builtin_operation::<_, (i64, Vec<i64>)>(
            "weighted-sum",
            Arity::AtLeast(2),
            weighted_sum,
        );
        assert_eq!(eval_str("(weighted-sum 2 1 2 3)", &env).unwrap(), val(12));
        assert!(matches!(
            eval_str("(weighted-sum 2)", &env),
            Err(crate::Error::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_register_env_builtin_receives_caller_frame() {
        let env = create_global_env();
        env.register_env_builtin("here", Arity::Exact(1), |args, env| {
            match args.first() {
                Some(Value::Symbol(name)) => env.lookup(name),
                _ => Err(crate::Error::TypeError("expected symbol".into())),
            }
        });
        assert_eq!(
            eval_str("(let ((local 5)) (here 'local))", &env).unwrap(),
            val(5)
        );
        assert!(matches!(
            eval_str("(here 'local)", &env),
            Err(crate::Error::UnboundName(_))
        ));
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("#t", success(true)),
            ("#f", success(false)),
            ("\"hello\"", success("hello")),
            ("()", success(nil())),
            // === MALFORMED EXPRESSIONS ===
            ("(+ 1 . 2)", SpecificError("MalformedExpression")),
            ("(1 2)", SpecificError("NotApplicable")),
            ("(\"f\")", SpecificError("NotApplicable")),
            // === QUOTE ===
            ("(quote hello)", success(sym("hello"))),
            ("(quote (1 2 3))", success([1, 2, 3])),
            ("'(+ 1 2)", success([sym("+"), val(1), val(2)])),
            ("'()", success(nil())),
            ("''x", success([sym("quote"), sym("x")])),
            ("(quote)", SpecificError("MalformedSpecialForm: quote")),
            ("(quote a b)", SpecificError("MalformedSpecialForm: quote")),
            // === IF ===
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if 0 1 2)", success(1)), // everything but #f is true
            ("(if '() 1 2)", success(1)),
            ("(if #f 1)", EvalResult(Value::Unspecified)),
            ("(if #t 1)", success(1)),
            ("(if #t)", SpecificError("MalformedSpecialForm: if")),
            ("(if #t 1 2 3)", SpecificError("MalformedSpecialForm: if")),
            ("(if #f (car '()) 3)", success(3)),
            // === AND / OR ===
            ("(and)", success(true)),
            ("(and 1 2 3)", success(3)),
            ("(and 1 #f 3)", success(false)),
            ("(and #f undefined-var)", success(false)),
            ("(and #f (car '()))", success(false)),
            ("(or)", success(false)),
            ("(or #f 2 3)", success(2)),
            ("(or #f #f)", success(false)),
            ("(or #t undefined-var)", success(true)),
            ("(or 5 (car '()))", success(5)),
            ("(or #f undefined-var)", SpecificError("UnboundName")),
            // === BEGIN ===
            ("(begin 1 2 3)", success(3)),
            ("(begin)", SpecificError("MalformedSpecialForm: begin")),
            // === LAMBDA / MU ===
            ("((lambda (x) (* x x)) 4)", success(16)),
            ("((lambda () 42))", success(42)),
            ("((lambda (x y) (+ x y)) 3 4)", success(7)),
            ("((lambda args args) 1 2 3)", success([1, 2, 3])),
            ("((lambda (a . rest) rest) 1 2 3)", success([2, 3])),
            ("((lambda (a . rest) rest) 1)", success(nil())),
            ("((lambda (x) x))", SpecificError("ArityMismatch")),
            ("((lambda (x) x) 1 2)", SpecificError("ArityMismatch")),
            ("((lambda (a . rest) a))", SpecificError("ArityMismatch")),
            ("(lambda (x x) x)", SpecificError("DuplicateName")),
            ("(lambda (1) 1)", SpecificError("MalformedSpecialForm: lambda")),
            ("(lambda (x))", SpecificError("MalformedSpecialForm: lambda")),
            ("((mu (x) (* x 2)) 21)", success(42)),
            ("(mu (x))", SpecificError("MalformedSpecialForm: mu")),
            ("((if #t + *) 2 3)", success(5)),
            // === COND ===
            ("(cond (#f 1) (#t 2))", success(2)),
            ("(cond (#f 1) (else 3))", success(3)),
            ("(cond ((+ 1 2)))", success(3)), // no body: the test value
            ("(cond (else))", success(true)),
            ("(cond (#f 1))", EvalResult(Value::Unspecified)),
            ("(cond)", EvalResult(Value::Unspecified)),
            ("(cond (#t 1 2 3))", success(3)),
            ("(cond (else 1) (#t 2))", SpecificError("MisplacedElse")),
            ("(cond ())", SpecificError("MalformedSpecialForm: cond")),
            ("(cond (#t 1) (car '()))", success(1)),
            // === LET ===
            ("(let ((x 1) (y 2)) (+ x y))", success(3)),
            ("(let () 5)", success(5)),
            ("(let ((x 1)) (define y 2) (+ x y))", success(3)),
            ("(let ((x 1) (y x)) y)", SpecificError("UnboundName")),
            ("(let ((x 1) (x 2)) x)", SpecificError("DuplicateName")),
            ("(let ((x)) x)", SpecificError("MalformedBindings")),
            ("(let ((x 1 2)) x)", SpecificError("MalformedBindings")),
            ("(let ((1 2)) 1)", SpecificError("MalformedBindings")),
            ("(let x 1)", SpecificError("MalformedBindings")),
            ("(let ((x 1)))", SpecificError("MalformedSpecialForm: let")),
            // === QUASIQUOTE ===
            ("`(a ,(+ 1 2))", success([sym("a"), val(3)])),
            ("`x", success(sym("x"))),
            ("`5", success(5)),
            ("`(1 (2 ,(+ 1 2)))", success(vec![val(1), val([2, 3])])),
            (
                "`(a `(b ,(+ 1 2)))",
                success(vec![
                    sym("a"),
                    val(vec![
                        sym("quasiquote"),
                        val(vec![
                            sym("b"),
                            val(vec![sym("unquote"), val(vec![sym("+"), val(1), val(2)])]),
                        ]),
                    ]),
                ]),
            ),
            ("`(a `(b ,,(+ 1 2)))", success(vec![
                sym("a"),
                val(vec![
                    sym("quasiquote"),
                    val(vec![sym("b"), val(vec![sym("unquote"), val(3)])]),
                ]),
            ])),
            ("`(1 . ,(+ 1 1))", success(crate::ast::cons(1, 2))),
            (",x", SpecificError("UnquoteOutsideQuasiquote")),
            ("(unquote 1)", SpecificError("UnquoteOutsideQuasiquote")),
            ("(quasiquote (a (unquote)))", SpecificError("MalformedSpecialForm: unquote")),
            ("(quasiquote)", SpecificError("MalformedSpecialForm: quasiquote")),
            // === DEFINE ===
            ("(define x 1)", success(sym("x"))),
            ("(define (f) 1)", success(sym("f"))),
            ("(define 3 4)", SpecificError("NonSymbolDefinitionTarget")),
            ("(define (3 x) 4)", SpecificError("NonSymbolDefinitionTarget")),
            ("(define \"s\" 4)", SpecificError("NonSymbolDefinitionTarget")),
            ("(define x)", SpecificError("MalformedSpecialForm: define")),
            ("(define x 1 2)", SpecificError("MalformedSpecialForm: define")),
            ("(define (f x))", SpecificError("MalformedSpecialForm: define")),
            // === ERRORS FROM BUILTINS ===
            ("undefined-var", SpecificError("UnboundName: unknown identifier: undefined-var")),
            ("(car '())", AnyError),
            ("(error \"boom\" 42)", SpecificError("boom 42")),
        ];

        run_comprehensive_tests(test_cases);

        let environment_test_cases = vec![
            // === DEFINE AND LOOKUP ===
            TestEnvironment(vec![
                test_setup!("(define x 42)", "x"),
                ("x", success(42)),
                ("(+ x 8)", success(50)),
                test_setup!("(define x 100)", "x"),
                ("x", success(100)),
                ("y", AnyError),
            ]),
            // === PROCEDURE DEFINITIONS ===
            TestEnvironment(vec![
                test_setup!("(define (square x) (* x x))", "square"),
                ("(square 5)", success(25)),
                test_setup!("(define (sum . nums) (apply + nums))", "sum"),
                ("(sum 1 2 3 4)", success(10)),
                test_setup!("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))", "fact"),
                ("(fact 10)", success(3_628_800)),
                test_setup!("(define (two-step) (define inner 5) (* inner 2))", "two-step"),
                ("(two-step)", success(10)),
                ("inner", SpecificError("UnboundName")),
            ]),
            // === MUTUAL RECURSION ===
            TestEnvironment(vec![
                test_setup!("(define (even? n) (if (= n 0) #t (odd? (- n 1))))", "even?"),
                test_setup!("(define (odd? n) (if (= n 0) #f (even? (- n 1))))", "odd?"),
                ("(even? 10)", success(true)),
                ("(odd? 7)", success(true)),
            ]),
            // === LEXICAL SCOPING ===
            TestEnvironment(vec![
                test_setup!("(define x 10)", "x"),
                test_setup!("(define (make-adder n) (lambda (x) (+ x n)))", "make-adder"),
                test_setup!("(define add5 (make-adder 5))", "add5"),
                ("(add5 3)", success(8)),
                test_setup!("(define y 100)", "y"),
                test_setup!("(define (g) y)", "g"),
                test_setup!("(define y 200)", "y"),
                // Frames are shared, so a redefinition in the captured frame is visible
                ("(g)", success(200)),
            ]),
            // === CLOSURES OVER LET FRAMES ===
            TestEnvironment(vec![
                test_setup!("(define f (let ((x 1)) (lambda () x)))", "f"),
                test_setup!("(define x 2)", "x"),
                ("(f)", success(1)),
            ]),
            // === DYNAMIC SCOPING ===
            TestEnvironment(vec![
                test_setup!("(define f (let ((x 1)) (mu () x)))", "f"),
                ("(f)", SpecificError("UnboundName")),
                ("(let ((x 3)) (f))", success(3)),
                test_setup!("(define x 2)", "x"),
                ("(f)", success(2)),
                test_setup!("(define (caller x) (f))", "caller"),
                ("(caller 9)", success(9)),
            ]),
            // === DEFINE INSIDE LET STAYS LOCAL ===
            TestEnvironment(vec![
                ("(let ((a 1)) (define b 2) (+ a b))", success(3)),
                ("b", SpecificError("UnboundName")),
            ]),
            // === HIGHER ORDER FUNCTIONS ===
            TestEnvironment(vec![
                test_setup!("(define (twice f x) (f (f x)))", "twice"),
                test_setup!("(define (inc x) (+ x 1))", "inc"),
                ("(twice inc 5)", success(7)),
                ("(twice (lambda (x) (* x 3)) 2)", success(18)),
            ]),
            // === QUASIQUOTE SEES THE CURRENT FRAME ===
            TestEnvironment(vec![
                test_setup!("(define n 4)", "n"),
                ("`(n is ,n)", success(vec![sym("n"), sym("is"), val(4)])),
                ("(let ((n 5)) `(,n ,(* n n)))", success([5, 25])),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_operands_evaluate_left_to_right() {
        let env = create_global_env();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        env.register_builtin_function("log!", Arity::Exact(1), move |args| {
            let item = args.into_iter().next().unwrap_or_default();
            sink.borrow_mut().push(item.clone());
            Ok(item)
        });
        assert_eq!(
            eval_str("(list (log! 1) (log! 2) (log! 3))", &env).unwrap(),
            val([1, 2, 3])
        );
        assert_eq!(*log.borrow(), vec![val(1), val(2), val(3)]);
    }

    #[test]
    fn test_operands_evaluated_once_in_and_or() {
        let env = create_global_env();
        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        env.register_builtin_function("tick!", Arity::Exact(1), move |args| {
            *counter.borrow_mut() += 1;
            Ok(args.into_iter().next().unwrap_or_default())
        });
        assert_eq!(eval_str("(or (tick! #f) (tick! 7))", &env).unwrap(), val(7));
        assert_eq!(*count.borrow(), 2);
        assert_eq!(eval_str("(and (tick! 1) (tick! #f) (tick! 3))", &env).unwrap(), val(false));
        assert_eq!(*count.borrow(), 4);
    }

    #[test]
    fn test_deep_tail_recursion() {
        let env = create_global_env();
        eval_str(
            "(define (count-up n acc) (if (= n 0) acc (count-up (- n 1) (+ acc 1))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(count-up 100000 0)", &env).unwrap(), val(100_000));

        // Tail position through cond, and/or, begin and let bodies
        eval_str(
            "(define (loop n) (cond ((= n 0) 'done) (else (let ((m (- n 1))) (begin (and #t (or #f (loop m))))))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(loop 50000)", &env).unwrap(), sym("done"));

        // Mutual tail recursion
        eval_str("(define (ping n) (if (= n 0) 'ping (pong (- n 1))))", &env).unwrap();
        eval_str("(define (pong n) (if (= n 0) 'pong (ping (- n 1))))", &env).unwrap();
        assert_eq!(eval_str("(ping 30001)", &env).unwrap(), sym("pong"));
    }

    #[test]
    fn test_deep_tail_recursion_in_mu() {
        let env = create_global_env();
        eval_str(
            "(define down (mu (n) (if (= n 0) 'bottom (down (- n 1)))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(down 10000)", &env).unwrap(), sym("bottom"));

        // Every call frame stays reachable from the next, so free names resolved
        // at the root cost a walk of the whole chain. Passing them in keeps each
        // lookup in the innermost frame.
        eval_str(
            "(define walk (mu (n self zero? dec) (if (zero? n) 'bottom (self (dec n) self zero? dec))))",
            &env,
        )
        .unwrap();
        let result = eval_str("(walk 200000 walk (lambda (n) (= n 0)) (lambda (n) (- n 1)))", &env);
        assert_eq!(result.unwrap(), sym("bottom"));
    }

    #[test]
    fn test_long_frame_chain_is_released() {
        let root = Environment::new();
        let mut env = root.clone();
        for _ in 0..500_000 {
            env = Environment::with_parent(&env);
        }
        assert_eq!(env.get("missing"), None);
        drop(env);
        root.define("x", val(1));
        assert_eq!(root.lookup("x").unwrap(), val(1));
    }

    #[test]
    fn test_evaluation_depth_limit() {
        let env = create_global_env();
        eval_str(
            "(define (deep n) (if (= n 0) 0 (+ 1 (deep (- n 1)))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(deep 1000)", &env).unwrap(), val(1000));
        let err = eval_str("(deep 100000)", &env).unwrap_err();
        assert!(format!("{err}").contains("depth"), "{err}");
    }
}
