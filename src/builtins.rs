//! Functions callable from templates, by name, as filters (`x | f`) or as
//! methods (`x.f()`).
//!
//! The output functions (`emit`, `write`, `emit_value`, `emit_literal`) need
//! the render state and live in the executor.

use std::collections::BTreeMap;

use crate::{
    Value,
    error::EvalErrorKind,
    value::MAX_SEQUENCE_LEN,
};

type BuiltinResult = Result<Value, EvalErrorKind>;

fn argument_count(function: &str, expected: &str, found: usize) -> EvalErrorKind {
    EvalErrorKind::ArgumentCount {
        function: function.to_owned(),
        expected: expected.to_owned(),
        found,
    }
}

fn invalid_argument(function: &str, expected: &str, found: &Value) -> EvalErrorKind {
    EvalErrorKind::InvalidArgument {
        function: function.to_owned(),
        expected: expected.to_owned(),
        found: found.type_name().to_owned(),
    }
}

fn int_arg(function: &str, value: &Value) -> Result<i64, EvalErrorKind> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::None
        | Value::Bool(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::List(_)
        | Value::Map(_) => Err(invalid_argument(function, "an int", value)),
    }
}

fn str_arg<'v>(function: &str, value: &'v Value) -> Result<&'v str, EvalErrorKind> {
    value
        .as_str()
        .ok_or_else(|| invalid_argument(function, "a string", value))
}

fn map_arg<'v>(
    function: &str,
    value: &'v Value,
) -> Result<&'v BTreeMap<String, Value>, EvalErrorKind> {
    match value {
        Value::Map(map) => Ok(map),
        Value::None
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::List(_) => Err(invalid_argument(function, "a map", value)),
    }
}

/// Unpacks exactly one argument.
fn single<'v>(function: &str, args: &'v [Value]) -> Result<&'v Value, EvalErrorKind> {
    match args {
        [value] => Ok(value),
        _ => Err(argument_count(function, "1", args.len())),
    }
}

fn count(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// `range(end)`, `range(start, end)` or `range(start, end, step)`: the
/// integers from `start` up to but excluding `end`.
fn range(args: &[Value]) -> BuiltinResult {
    let int = |value| int_arg("range", value);
    let (start, end, step) = match args {
        [end] => (0, int(end)?, 1),
        [start, end] => (int(start)?, int(end)?, 1),
        [start, end, step] => (int(start)?, int(end)?, int(step)?),
        _ => return Err(argument_count("range", "1 to 3", args.len())),
    };
    if step == 0 {
        return Err(EvalErrorKind::InvalidArgument {
            function: "range".to_owned(),
            expected: "a non-zero step".to_owned(),
            found: "0".to_owned(),
        });
    }

    let len = if (step > 0 && start < end) || (step < 0 && start > end) {
        i128::from(end)
            .abs_diff(i128::from(start))
            .div_ceil(u128::from(step.unsigned_abs()))
    } else {
        0
    };
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_SEQUENCE_LEN)
        .ok_or_else(|| EvalErrorKind::Overflow {
            op: "range".to_owned(),
        })?;

    let mut items = Vec::with_capacity(len);
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        items.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::List(items))
}

fn len(args: &[Value]) -> BuiltinResult {
    let value = single("len", args)?;
    match value {
        Value::String(s) => Ok(count(s.chars().count())),
        Value::List(items) => Ok(count(items.len())),
        Value::Map(map) => Ok(count(map.len())),
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
            Err(invalid_argument("len", "a string, list or map", value))
        }
    }
}

/// Truncates toward zero; `None` when out of range or not finite.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "the bounds are checked before the cast"
)]
fn float_to_int(x: f64) -> Option<i64> {
    (x.is_finite() && x >= i64::MIN as f64 && x < i64::MAX as f64).then(|| x.trunc() as i64)
}

fn to_int(args: &[Value]) -> BuiltinResult {
    let value = single("int", args)?;
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(x) => float_to_int(*x)
            .map(Value::Int)
            .ok_or_else(|| invalid_argument("int", "a float in range", value)),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| invalid_argument("int", "a number", value)),
        Value::None | Value::List(_) | Value::Map(_) => {
            Err(invalid_argument("int", "a number", value))
        }
    }
}

fn to_float(args: &[Value]) -> BuiltinResult {
    let value = single("float", args)?;
    match value {
        Value::Int(_) | Value::Float(_) => value
            .as_float()
            .map(Value::Float)
            .ok_or_else(|| invalid_argument("float", "a number", value)),
        Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(*b)))),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| invalid_argument("float", "a number", value)),
        Value::None | Value::List(_) | Value::Map(_) => {
            Err(invalid_argument("float", "a number", value))
        }
    }
}

/// `join(list, sep)`; the separator may also come first, so both
/// `items | join(", ")` and `", ".join(items)` work.
fn join(args: &[Value]) -> BuiltinResult {
    let (items, separator) = match args {
        [Value::List(items)] => (items, ""),
        [Value::List(items), separator] | [separator, Value::List(items)] => {
            (items, str_arg("join", separator)?)
        }
        [value] | [value, _] => return Err(invalid_argument("join", "a list", value)),
        _ => return Err(argument_count("join", "1 or 2", args.len())),
    };
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    Ok(Value::String(parts.join(separator)))
}

/// `split(s)` splits on whitespace, `split(s, sep)` on `sep`.
fn split(args: &[Value]) -> BuiltinResult {
    let pieces: Vec<Value> = match args {
        [value] => str_arg("split", value)?
            .split_whitespace()
            .map(Value::from)
            .collect(),
        [value, separator] => {
            let separator_str = str_arg("split", separator)?;
            if separator_str.is_empty() {
                return Err(invalid_argument("split", "a non-empty separator", separator));
            }
            str_arg("split", value)?
                .split(separator_str)
                .map(Value::from)
                .collect()
        }
        _ => return Err(argument_count("split", "1 or 2", args.len())),
    };
    Ok(Value::List(pieces))
}

fn replace(args: &[Value]) -> BuiltinResult {
    let [value, from, to] = args else {
        return Err(argument_count("replace", "3", args.len()));
    };
    let from = str_arg("replace", from)?;
    if from.is_empty() {
        return Err(EvalErrorKind::InvalidArgument {
            function: "replace".to_owned(),
            expected: "a non-empty pattern".to_owned(),
            found: "empty string".to_owned(),
        });
    }
    Ok(Value::String(
        str_arg("replace", value)?.replace(from, str_arg("replace", to)?),
    ))
}

/// `default(value, fallback)`: `fallback` when `value` is `none`.
fn default(args: &[Value]) -> BuiltinResult {
    match args {
        [Value::None, fallback] => Ok(fallback.clone()),
        [value, _] => Ok(value.clone()),
        _ => Err(argument_count("default", "2", args.len())),
    }
}

/// Calls the built-in `function` with already evaluated arguments.
pub(crate) fn call(function: &str, args: &[Value]) -> BuiltinResult {
    match function {
        "range" => range(args),
        "len" => len(args),
        "str" => Ok(Value::String(single(function, args)?.to_string())),
        "int" => to_int(args),
        "float" => to_float(args),
        "upper" => Ok(Value::String(
            single(function, args)?.to_string().to_uppercase(),
        )),
        "lower" => Ok(Value::String(
            single(function, args)?.to_string().to_lowercase(),
        )),
        "trim" => Ok(Value::String(
            single(function, args)?.to_string().trim().to_owned(),
        )),
        "join" => join(args),
        "split" => split(args),
        "replace" => replace(args),
        "default" => default(args),
        "keys" => Ok(map_arg(function, single(function, args)?)?
            .keys()
            .map(|key| Value::String(key.clone()))
            .collect()),
        "values" => Ok(Value::List(
            map_arg(function, single(function, args)?)?
                .values()
                .cloned()
                .collect(),
        )),
        _ => Err(EvalErrorKind::UnknownFunction {
            function: function.to_owned(),
        }),
    }
}
