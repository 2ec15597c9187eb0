//! S-expression reader producing [`Value`] trees for the evaluator.
//!
//! Supports integers (decimal and `#x` hexadecimal), `#t`/`#f`, strings with
//! escapes, symbols, proper and dotted lists, `;` line comments, and the
//! abbreviations `'x`, `` `x `` and `,x` for `(quote x)`, `(quasiquote x)` and
//! `(unquote x)`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace1, not_line_ending},
    combinator::{cut, opt, recognize, value},
    error::ErrorKind,
    multi::many0,
    sequence::{pair, preceded, terminated},
};

use crate::Error;
use crate::MAX_PARSE_DEPTH;
use crate::ast::{NumberType, SYMBOL_SPECIAL_CHARS, Value, is_valid_symbol};

/// Convert nom parsing errors to user-friendly messages
fn parse_error_to_message(input: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::TooLarge => {
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})")
                }
                _ if position >= input.len() => "Unexpected end of input".into(),
                ErrorKind::Char => format!("Expected character at position {position}"),
                ErrorKind::Tag => format!("Unexpected token at position {position}"),
                _ => {
                    let remaining_chars: String = input[position..].chars().take(10).collect();
                    format!("Invalid syntax near '{remaining_chars}'")
                }
            }
        }
        nom::Err::Incomplete(_) => "Incomplete input".into(),
    }
}

fn error_at(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Line comment starting with `;`
fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), not_line_ending)).parse(input)
}

/// Skip whitespace and comments
fn ws(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, comment)))).parse(input)
}

/// Succeeds without consuming when an atom ends here
fn delimiter(input: &str) -> IResult<&str, ()> {
    match input.chars().next() {
        None => Ok((input, ())),
        Some(c) if c.is_whitespace() || "()\";'`,".contains(c) => Ok((input, ())),
        Some(_) => Err(error_at(input, ErrorKind::Verify)),
    }
}

/// Parse a number (integer only, supports decimal and hexadecimal)
fn parse_number(input: &str) -> IResult<&str, Value> {
    alt((parse_hexadecimal, parse_decimal)).parse(input)
}

fn parse_decimal(input: &str) -> IResult<&str, Value> {
    let (rest, number_str) = recognize(pair(
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)?;

    // Out-of-range literals are rejected here; symbol parsing rejects them too
    match number_str.parse::<NumberType>() {
        Ok(n) => Ok((rest, Value::Number(n))),
        Err(_) => Err(error_at(input, ErrorKind::Digit)),
    }
}

/// Parse a hexadecimal number (#x or #X prefix)
fn parse_hexadecimal(input: &str) -> IResult<&str, Value> {
    let (rest, _) = alt((tag("#x"), tag("#X"))).parse(input)?;
    let (rest, hex_digits) = take_while1(|c: char| c.is_ascii_hexdigit()).parse(rest)?;

    match NumberType::from_str_radix(hex_digits, 16) {
        Ok(n) => Ok((rest, Value::Number(n))),
        Err(_) => Err(error_at(input, ErrorKind::HexDigit)),
    }
}

/// Parse a boolean (#t, #f, #true, #false)
fn parse_bool(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Bool(true), tag("#true")),
        value(Value::Bool(false), tag("#false")),
        value(Value::Bool(true), tag("#t")),
        value(Value::Bool(false), tag("#f")),
    ))
    .parse(input)
}

/// Parse a symbol (identifier)
fn parse_symbol(input: &str) -> IResult<&str, Value> {
    let mut symbol_chars =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c));

    let (remaining, candidate) = symbol_chars.parse(input)?;

    if is_valid_symbol(candidate) {
        Ok((remaining, Value::Symbol(candidate.into())))
    } else {
        Err(error_at(input, ErrorKind::Alpha))
    }
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Value::String(text))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    // Unknown escape, or a backslash at the end of input
                    Some(_) | None => return Err(error_at(remaining, ErrorKind::Char)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            None => return Err(error_at(remaining, ErrorKind::Char)),
        }
    }
}

fn close_paren(input: &str) -> IResult<&str, char> {
    char(')').parse(input)
}

/// The `.` introducing the tail of a dotted list
fn dot(input: &str) -> IResult<&str, char> {
    terminated(char('.'), delimiter).parse(input)
}

/// Parse a proper or dotted list
fn parse_list(input: &str, depth: usize) -> IResult<&str, Value> {
    let (mut input, _) = char('(').parse(input)?;
    let mut items = Vec::new();

    loop {
        let (rest, ()) = ws(input)?;
        if let Ok((rest, _)) = close_paren(rest) {
            return Ok((rest, Value::list(items)));
        }
        if !items.is_empty()
            && let Ok((after_dot, _)) = dot(rest)
        {
            let (rest, tail) = cut(|input| parse_sexpr(input, depth + 1)).parse(after_dot)?;
            let (rest, ()) = ws(rest)?;
            let (rest, _) = cut(close_paren).parse(rest)?;
            return Ok((rest, Value::list_with_tail(items, tail)));
        }
        // Past the opening parenthesis there is nothing to backtrack to
        let (rest, item) = cut(|input| parse_sexpr(input, depth + 1)).parse(rest)?;
        items.push(item);
        input = rest;
    }
}

/// Parse `'x`, `` `x `` or `,x` into the equivalent two-element list
fn parse_abbreviation(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, keyword) = alt((
        value("quote", char('\'')),
        value("quasiquote", char('`')),
        value("unquote", char(',')),
    ))
    .parse(input)?;
    let (input, datum) = cut(|input| parse_sexpr(input, depth + 1)).parse(input)?;
    Ok((input, Value::list(vec![Value::Symbol(keyword.into()), datum])))
}

/// Parse one S-expression, skipping leading whitespace and comments
fn parse_sexpr(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    preceded(
        ws,
        alt((
            |input| parse_abbreviation(input, depth),
            |input| parse_list(input, depth),
            terminated(parse_number, delimiter),
            terminated(parse_bool, delimiter),
            parse_string,
            terminated(parse_symbol, delimiter),
        )),
    )
    .parse(input)
}

/// Parse a complete S-expression from input.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    match terminated(|input| parse_sexpr(input, 0), ws).parse(input) {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(Error::ParseError(format!(
            "Unexpected remaining input: '{remaining}'"
        ))),
        Err(e) => Err(Error::ParseError(parse_error_to_message(input, e))),
    }
}

/// Parse a sequence of S-expressions, such as the contents of a source file.
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    let mut expressions = Vec::new();
    let mut remaining = input;
    loop {
        let (rest, ()) =
            ws(remaining).map_err(|e| Error::ParseError(parse_error_to_message(input, e)))?;
        if rest.is_empty() {
            return Ok(expressions);
        }
        let (rest, expr) = parse_sexpr(rest, 0)
            .map_err(|e| Error::ParseError(parse_error_to_message(input, e)))?;
        expressions.push(expr);
        remaining = rest;
    }
}
