//! Special forms: syntax whose operands are handed over unevaluated.
//!
//! Every handler receives the operand list of the form, the environment the
//! form appears in, and the current evaluation depth. Handlers evaluate what
//! they need through the evaluator and return the expression in tail position
//! (if any) as a deferred [`Trampoline::Eval`].

use super::{Environment, Trampoline, eval_all_step, eval_tail, eval_with_depth};
use crate::Error;
use crate::ast::{Formals, LambdaProcedure, MuProcedure, Procedure, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::LazyLock;

pub(crate) type SpecialForm = fn(&Value, &Environment, usize) -> Result<Trampoline, Error>;

/// Handlers keyed by the operator symbol that introduces them
static SPECIAL_FORMS: LazyLock<HashMap<&'static str, SpecialForm>> = LazyLock::new(|| {
    let forms: [(&'static str, SpecialForm); 12] = [
        ("and", eval_and),
        ("begin", eval_begin),
        ("cond", eval_cond),
        ("define", eval_define),
        ("if", eval_if),
        ("lambda", eval_lambda),
        ("let", eval_let),
        ("mu", eval_mu),
        ("or", eval_or),
        ("quasiquote", eval_quasiquote),
        ("quote", eval_quote),
        ("unquote", eval_unquote),
    ];
    forms.into_iter().collect()
});

pub(crate) fn find_special_form(name: &str) -> Option<SpecialForm> {
    SPECIAL_FORMS.get(name).copied()
}

/// Check the operand count of `form` and collect its operands
fn validate_form(
    operands: &Value,
    min: usize,
    max: Option<usize>,
    form: &'static str,
) -> Result<Vec<Value>, Error> {
    let parts = operands
        .list_to_vec()
        .ok_or_else(|| Error::malformed(form, format!("badly formed expression: {operands}")))?;
    if parts.len() < min {
        return Err(Error::malformed(form, format!("too few operands in form: {operands}")));
    }
    if let Some(max) = max
        && parts.len() > max
    {
        return Err(Error::malformed(form, format!("too many operands in form: {operands}")));
    }
    Ok(parts)
}

fn split(list: &Value) -> (Value, Value) {
    (list.car().unwrap_or_default(), list.cdr().unwrap_or_default())
}

fn eval_quote(operands: &Value, _env: &Environment, _depth: usize) -> Result<Trampoline, Error> {
    let parts = validate_form(operands, 1, Some(1), "quote")?;
    Ok(Trampoline::Value(parts.into_iter().next().unwrap_or_default()))
}

fn eval_define(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    validate_form(operands, 2, None, "define")?;
    let (target, rest) = split(operands);

    match &target {
        Value::Symbol(name) => {
            let parts = validate_form(operands, 2, Some(2), "define")?;
            let value = eval_with_depth(&parts[1], env, depth + 1)?;
            tracing::debug!(name = %name, "define");
            env.define(name.clone(), value);
            Ok(Trampoline::Value(target.clone()))
        }
        Value::Pair(_) => {
            let (name, formals) = match split(&target) {
                (Value::Symbol(name), formals) => (name, formals),
                (other, _) => return Err(Error::NonSymbolDefinitionTarget(format!("{other}"))),
            };
            let formals = Formals::from_value(&formals, "define")?;
            tracing::debug!(name = %name, params = formals.params.len(), "define procedure");
            let procedure = LambdaProcedure {
                formals,
                body: rest,
                env: env.clone(),
            };
            env.define(
                name.clone(),
                Value::Procedure(Procedure::Lambda(Rc::new(procedure))),
            );
            Ok(Trampoline::Value(Value::Symbol(name)))
        }
        other => Err(Error::NonSymbolDefinitionTarget(format!("{other}"))),
    }
}

fn eval_begin(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    validate_form(operands, 1, None, "begin")?;
    eval_all_step(operands, env, depth)
}

fn eval_lambda(operands: &Value, env: &Environment, _depth: usize) -> Result<Trampoline, Error> {
    validate_form(operands, 2, None, "lambda")?;
    let (formals, body) = split(operands);
    let formals = Formals::from_value(&formals, "lambda")?;
    Ok(Trampoline::Value(Value::Procedure(Procedure::Lambda(
        Rc::new(LambdaProcedure {
            formals,
            body,
            env: env.clone(),
        }),
    ))))
}

fn eval_mu(operands: &Value, _env: &Environment, _depth: usize) -> Result<Trampoline, Error> {
    validate_form(operands, 2, None, "mu")?;
    let (formals, body) = split(operands);
    let formals = Formals::from_value(&formals, "mu")?;
    Ok(Trampoline::Value(Value::Procedure(Procedure::Mu(Rc::new(
        MuProcedure { formals, body },
    )))))
}

fn eval_if(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    let parts = validate_form(operands, 2, Some(3), "if")?;
    if eval_with_depth(&parts[0], env, depth + 1)?.is_true() {
        eval_tail(&parts[1], env, depth)
    } else if let Some(alternative) = parts.get(2) {
        eval_tail(alternative, env, depth)
    } else {
        Ok(Trampoline::Value(Value::Unspecified))
    }
}

fn eval_and(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    let parts = validate_form(operands, 0, None, "and")?;
    let Some((last, init)) = parts.split_last() else {
        return Ok(Trampoline::Value(Value::Bool(true)));
    };
    for operand in init {
        let value = eval_with_depth(operand, env, depth + 1)?;
        if !value.is_true() {
            return Ok(Trampoline::Value(value));
        }
    }
    eval_tail(last, env, depth)
}

fn eval_or(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    let parts = validate_form(operands, 0, None, "or")?;
    let Some((last, init)) = parts.split_last() else {
        return Ok(Trampoline::Value(Value::Bool(false)));
    };
    for operand in init {
        let value = eval_with_depth(operand, env, depth + 1)?;
        if value.is_true() {
            return Ok(Trampoline::Value(value));
        }
    }
    eval_tail(last, env, depth)
}

fn eval_cond(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    let clauses = validate_form(operands, 0, None, "cond")?;
    let last_index = clauses.len().saturating_sub(1);

    for (index, clause) in clauses.iter().enumerate() {
        if !clause.is_list() || clause.is_nil() {
            return Err(Error::malformed("cond", format!("badly formed clause: {clause}")));
        }
        let (test, body) = split(clause);

        let test_value = if test.is_symbol("else") {
            if index != last_index {
                return Err(Error::MisplacedElse);
            }
            Value::Bool(true)
        } else {
            eval_with_depth(&test, env, depth + 1)?
        };

        if test_value.is_true() {
            if body.is_nil() {
                return Ok(Trampoline::Value(test_value));
            }
            return eval_all_step(&body, env, depth);
        }
    }
    Ok(Trampoline::Value(Value::Unspecified))
}

fn eval_let(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    validate_form(operands, 2, None, "let")?;
    let (bindings, body) = split(operands);
    let bindings = bindings
        .list_to_vec()
        .ok_or_else(|| Error::MalformedBindings(format!("{bindings}")))?;

    let mut names: Vec<Rc<str>> = Vec::with_capacity(bindings.len());
    let mut values = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        let (name, expr) = match binding.list_to_vec().as_deref() {
            Some([Value::Symbol(name), expr]) => (name.clone(), expr.clone()),
            _ => return Err(Error::MalformedBindings(format!("{binding}"))),
        };
        if names.contains(&name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        names.push(name);
        // Initialisers see the enclosing frame only
        values.push(eval_with_depth(&expr, env, depth + 1)?);
    }

    let frame = Environment::with_parent(env);
    for (name, value) in names.into_iter().zip(values) {
        frame.define(name, value);
    }
    eval_all_step(&body, &frame, depth)
}

fn eval_quasiquote(operands: &Value, env: &Environment, depth: usize) -> Result<Trampoline, Error> {
    let parts = validate_form(operands, 1, Some(1), "quasiquote")?;
    let template = parts.into_iter().next().unwrap_or_default();
    quasiquote_item(&template, env, 1, depth).map(Trampoline::Value)
}

fn eval_unquote(_operands: &Value, _env: &Environment, _depth: usize) -> Result<Trampoline, Error> {
    Err(Error::UnquoteOutsideQuasiquote)
}

/// Instantiate a quasiquoted template at nesting `level`
fn quasiquote_item(
    template: &Value,
    env: &Environment,
    level: usize,
    depth: usize,
) -> Result<Value, Error> {
    if !matches!(template, Value::Pair(_)) {
        return Ok(template.clone());
    }
    let (head, rest) = split(template);

    let level = if head.is_symbol("unquote") {
        let level = level - 1;
        if level == 0 {
            let parts = validate_form(&rest, 1, Some(1), "unquote")?;
            return eval_with_depth(&parts[0], env, depth + 1);
        }
        level
    } else if head.is_symbol("quasiquote") {
        level + 1
    } else {
        level
    };

    quasiquote_elements(template, env, level, depth)
}

fn quasiquote_elements(
    template: &Value,
    env: &Environment,
    level: usize,
    depth: usize,
) -> Result<Value, Error> {
    let mut items = Vec::new();
    let mut current = template.clone();
    let tail = loop {
        let Value::Pair(_) = current else {
            break current;
        };
        let (first, rest) = split(&current);
        items.push(quasiquote_item(&first, env, level, depth)?);
        // `(a . ,b)` reads as `(a unquote b)`: the tail is itself an unquote form
        if rest.car().is_some_and(|next| next.is_symbol("unquote")) {
            break quasiquote_item(&rest, env, level, depth)?;
        }
        current = rest;
    };
    Ok(Value::list_with_tail(items, tail))
}
