//! Implementations of the safe builtin functions and safe method calls.
//!
//! Every name here must also appear in [`super::SAFE_BUILTINS`] or
//! [`super::SAFE_METHOD_CALLS`] — the validator is the gate; this module is
//! the behavior behind the gate. `print` is handled directly by the
//! interpreter (it needs the stdout buffer) and is not dispatched here.

use std::cmp::Ordering;
use std::rc::Rc;

use super::value::Value;
use crate::error::WorkerError;

/// Dispatches a call to one of [`super::SAFE_BUILTINS`] (other than `print`).
///
/// # Errors
///
/// Returns [`WorkerError::SandboxViolation`] on arity/type mismatches.
pub fn call_builtin(name: &str, args: &[Value]) -> Result<Value, WorkerError> {
    match name {
        "len" => Ok(Value::Int(length_of(one_arg(name, args)?)? as i64)),
        "min" => reduce_extreme(name, args, Ordering::Less),
        "max" => reduce_extreme(name, args, Ordering::Greater),
        "sum" => sum(args),
        "sorted" => sorted(one_arg(name, args)?),
        "range" => range(args),
        "enumerate" => enumerate(one_arg(name, args)?),
        "str" => Ok(Value::str(args.first().map_or_else(String::new, Value::display))),
        "int" => to_int(args.first()),
        "float" => to_float(args.first()),
        "bool" => Ok(Value::Bool(args.first().is_some_and(Value::is_truthy))),
        "list" => Ok(Value::list(coerce_sequence(args.first())?)),
        "dict" => to_dict(args.first()),
        "set" => Ok(Value::set(dedupe(coerce_sequence(args.first())?))),
        "tuple" => Ok(Value::Tuple(Rc::new(coerce_sequence(args.first())?))),
        "abs" => abs(one_arg(name, args)?),
        "any" => Ok(Value::Bool(coerce_sequence(args.first())?.iter().any(Value::is_truthy))),
        "all" => Ok(Value::Bool(coerce_sequence(args.first())?.iter().all(Value::is_truthy))),
        other => Err(WorkerError::sandbox(format!("call not allowed: {other}"))),
    }
}

/// Dispatches a method call to one of [`super::SAFE_METHOD_CALLS`].
///
/// # Errors
///
/// Returns [`WorkerError::SandboxViolation`] on arity/type mismatches or
/// when `receiver`'s type has no such method in this sandbox.
pub fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, WorkerError> {
    match receiver {
        Value::Str(s) => string_method(s, method, args),
        Value::List(items) => list_method(items, method, args),
        Value::Dict(pairs) => dict_method(pairs, method, args),
        Value::Set(items) => set_method(items, method, args),
        other => Err(WorkerError::sandbox(format!(
            "'{}' object has no method '{}'",
            other.type_name(),
            method
        ))),
    }
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, WorkerError> {
    args.first()
        .ok_or_else(|| WorkerError::sandbox(format!("{name}() requires an argument")))
}

fn length_of(value: &Value) -> Result<usize, WorkerError> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Dict(pairs) => Ok(pairs.borrow().len()),
        Value::Set(items) => Ok(items.borrow().len()),
        other => Err(WorkerError::sandbox(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

fn coerce_sequence(value: Option<&Value>) -> Result<Vec<Value>, WorkerError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::List(items)) => Ok(items.borrow().clone()),
        Some(Value::Tuple(items)) => Ok((**items).clone()),
        Some(Value::Set(items)) => Ok(items.borrow().clone()),
        Some(Value::Str(s)) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Some(Value::Dict(pairs)) => Ok(pairs.borrow().iter().map(|(k, _)| k.clone()).collect()),
        Some(other) => Err(WorkerError::sandbox(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn dedupe(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.iter().any(|v| v.values_equal(&item)) {
            out.push(item);
        }
    }
    out
}

fn reduce_extreme(name: &str, args: &[Value], want: Ordering) -> Result<Value, WorkerError> {
    let items = if args.len() == 1 {
        coerce_sequence(args.first())?
    } else {
        args.to_vec()
    };
    items
        .into_iter()
        .try_fold(None::<Value>, |best, current| match best {
            None => Ok(Some(current)),
            Some(best) => {
                let cmp = current.compare(&best)?;
                if cmp == want {
                    Ok(Some(current))
                } else {
                    Ok(Some(best))
                }
            }
        })?
        .ok_or_else(|| WorkerError::sandbox(format!("{name}() arg is an empty sequence")))
}

fn sum(args: &[Value]) -> Result<Value, WorkerError> {
    let items = coerce_sequence(args.first())?;
    let start = args.get(1).cloned().unwrap_or(Value::Int(0));
    items.iter().try_fold(start, numeric_add)
}

fn numeric_add(acc: Value, item: &Value) -> Result<Value, WorkerError> {
    if !acc.is_numeric() || !item.is_numeric() {
        return Err(WorkerError::sandbox(format!(
            "unsupported operand type for sum(): '{}'",
            item.type_name()
        )));
    }
    if acc.is_float_like() || item.is_float_like() {
        Ok(Value::Float(acc.as_f64()? + item.as_f64()?))
    } else {
        Ok(Value::Int(acc.as_int()? + item.as_int()?))
    }
}

fn sorted(value: &Value) -> Result<Value, WorkerError> {
    let mut items = coerce_sequence(Some(value))?;
    let mut error = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(order) => order,
        Err(e) => {
            error.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = error {
        return Err(e);
    }
    Ok(Value::list(items))
}

fn range(args: &[Value]) -> Result<Value, WorkerError> {
    let (start, stop, step) = match args {
        [stop] => (0, stop.as_int()?, 1),
        [start, stop] => (start.as_int()?, stop.as_int()?, 1),
        [start, stop, step] => (start.as_int()?, stop.as_int()?, step.as_int()?),
        _ => return Err(WorkerError::sandbox("range() expects 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(WorkerError::sandbox("range() step must not be zero"));
    }
    let mut out = Vec::new();
    let mut current = start;
    if step > 0 {
        while current < stop {
            out.push(Value::Int(current));
            current += step;
        }
    } else {
        while current > stop {
            out.push(Value::Int(current));
            current += step;
        }
    }
    Ok(Value::list(out))
}

fn enumerate(value: &Value) -> Result<Value, WorkerError> {
    let items = coerce_sequence(Some(value))?;
    Ok(Value::list(
        items
            .into_iter()
            .enumerate()
            .map(|(i, v)| Value::Tuple(Rc::new(vec![Value::Int(i as i64), v])))
            .collect(),
    ))
}

fn to_int(value: Option<&Value>) -> Result<Value, WorkerError> {
    match value {
        None => Ok(Value::Int(0)),
        Some(Value::Int(n)) => Ok(Value::Int(*n)),
        Some(Value::Float(f)) => Ok(Value::Int(*f as i64)),
        Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        Some(Value::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| WorkerError::sandbox(format!("invalid literal for int(): '{s}'"))),
        Some(other) => Err(WorkerError::sandbox(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: Option<&Value>) -> Result<Value, WorkerError> {
    match value {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| WorkerError::sandbox(format!("could not convert string to float: '{s}'"))),
        Some(other) => Ok(Value::Float(other.as_f64()?)),
    }
}

fn to_dict(value: Option<&Value>) -> Result<Value, WorkerError> {
    match value {
        None => Ok(Value::dict(Vec::new())),
        Some(Value::Dict(pairs)) => Ok(Value::dict(pairs.borrow().clone())),
        Some(other) => Err(WorkerError::sandbox(format!(
            "cannot build dict from '{}'",
            other.type_name()
        ))),
    }
}

fn abs(value: &Value) -> Result<Value, WorkerError> {
    match value {
        Value::Int(n) => Ok(Value::Int(n.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(WorkerError::sandbox(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn string_method(s: &Rc<String>, method: &str, args: &[Value]) -> Result<Value, WorkerError> {
    match method {
        "strip" => Ok(Value::str(s.trim().to_string())),
        "lstrip" => Ok(Value::str(s.trim_start().to_string())),
        "rstrip" => Ok(Value::str(s.trim_end().to_string())),
        "lower" => Ok(Value::str(s.to_lowercase())),
        "upper" => Ok(Value::str(s.to_uppercase())),
        "split" => {
            let parts: Vec<Value> = match args.first() {
                Some(sep) => s.split(sep.as_str()?.as_str()).map(|p| Value::str(p.to_string())).collect(),
                None => s.split_whitespace().map(|p| Value::str(p.to_string())).collect(),
            };
            Ok(Value::list(parts))
        }
        "splitlines" => Ok(Value::list(s.lines().map(|l| Value::str(l.to_string())).collect())),
        "join" => {
            let items = coerce_sequence(args.first())?;
            let mut rendered = Vec::with_capacity(items.len());
            for item in &items {
                rendered.push(item.as_str()?.as_str().to_string());
            }
            Ok(Value::str(rendered.join(s.as_str())))
        }
        "replace" => {
            let from = one_arg("replace", args)?.as_str()?;
            let to = args.get(1).map(|v| v.as_str()).transpose()?.unwrap_or_default();
            Ok(Value::str(s.replace(from.as_str(), to.as_str())))
        }
        "startswith" => Ok(Value::Bool(s.starts_with(one_arg("startswith", args)?.as_str()?.as_str()))),
        "endswith" => Ok(Value::Bool(s.ends_with(one_arg("endswith", args)?.as_str()?.as_str()))),
        "count" => {
            let needle = one_arg("count", args)?.as_str()?;
            Ok(Value::Int(s.matches(needle.as_str()).count() as i64))
        }
        "index" => {
            let needle = one_arg("index", args)?.as_str()?;
            s.find(needle.as_str())
                .map(|byte_idx| Value::Int(s[..byte_idx].chars().count() as i64))
                .ok_or_else(|| WorkerError::sandbox("substring not found"))
        }
        "format" => {
            let mut rendered = s.as_str().to_string();
            for arg in args {
                rendered = rendered.replacen("{}", &arg.display(), 1);
            }
            Ok(Value::str(rendered))
        }
        other => Err(WorkerError::sandbox(format!("str has no method '{other}'"))),
    }
}

fn list_method(
    items: &Rc<std::cell::RefCell<Vec<Value>>>,
    method: &str,
    args: &[Value],
) -> Result<Value, WorkerError> {
    match method {
        "append" => {
            items.borrow_mut().push(one_arg("append", args)?.clone());
            Ok(Value::None)
        }
        "extend" => {
            items.borrow_mut().extend(coerce_sequence(args.first())?);
            Ok(Value::None)
        }
        "insert" => {
            let index = one_arg("insert", args)?.as_int()?;
            let value = args.get(1).cloned().unwrap_or(Value::None);
            let mut items = items.borrow_mut();
            let idx = (index.max(0) as usize).min(items.len());
            items.insert(idx, value);
            Ok(Value::None)
        }
        "pop" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(WorkerError::sandbox("pop from empty list"));
            }
            let index = match args.first() {
                Some(v) => {
                    let i = v.as_int()?;
                    if i < 0 {
                        (items.len() as i64 + i) as usize
                    } else {
                        i as usize
                    }
                }
                None => items.len() - 1,
            };
            if index >= items.len() {
                return Err(WorkerError::sandbox("pop index out of range"));
            }
            Ok(items.remove(index))
        }
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(items.borrow().clone())),
        "count" => {
            let needle = one_arg("count", args)?;
            Ok(Value::Int(
                items.borrow().iter().filter(|v| v.values_equal(needle)).count() as i64
            ))
        }
        "index" => {
            let needle = one_arg("index", args)?;
            items
                .borrow()
                .iter()
                .position(|v| v.values_equal(needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| WorkerError::sandbox("value not found in list"))
        }
        "sort" => {
            let mut error = None;
            items.borrow_mut().sort_by(|a, b| match a.compare(b) {
                Ok(order) => order,
                Err(e) => {
                    error.get_or_insert(e);
                    Ordering::Equal
                }
            });
            if let Some(e) = error {
                return Err(e);
            }
            Ok(Value::None)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        other => Err(WorkerError::sandbox(format!("list has no method '{other}'"))),
    }
}

fn dict_method(
    pairs: &Rc<std::cell::RefCell<Vec<(Value, Value)>>>,
    method: &str,
    args: &[Value],
) -> Result<Value, WorkerError> {
    match method {
        "get" => {
            let key = one_arg("get", args)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            Ok(pairs
                .borrow()
                .iter()
                .find(|(k, _)| k.values_equal(key))
                .map_or(default, |(_, v)| v.clone()))
        }
        "keys" => Ok(Value::list(pairs.borrow().iter().map(|(k, _)| k.clone()).collect())),
        "values" => Ok(Value::list(pairs.borrow().iter().map(|(_, v)| v.clone()).collect())),
        "items" => Ok(Value::list(
            pairs
                .borrow()
                .iter()
                .map(|(k, v)| Value::Tuple(Rc::new(vec![k.clone(), v.clone()])))
                .collect(),
        )),
        "update" => {
            let other = coerce_dict_pairs(args.first())?;
            let mut pairs = pairs.borrow_mut();
            for (k, v) in other {
                if let Some(entry) = pairs.iter_mut().find(|(ek, _)| ek.values_equal(&k)) {
                    entry.1 = v;
                } else {
                    pairs.push((k, v));
                }
            }
            Ok(Value::None)
        }
        "setdefault" => {
            let key = one_arg("setdefault", args)?.clone();
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let mut pairs = pairs.borrow_mut();
            if let Some((_, v)) = pairs.iter().find(|(k, _)| k.values_equal(&key)) {
                Ok(v.clone())
            } else {
                pairs.push((key, default.clone()));
                Ok(default)
            }
        }
        "pop" => {
            let key = one_arg("pop", args)?;
            let mut pairs = pairs.borrow_mut();
            if let Some(pos) = pairs.iter().position(|(k, _)| k.values_equal(key)) {
                Ok(pairs.remove(pos).1)
            } else if let Some(default) = args.get(1) {
                Ok(default.clone())
            } else {
                Err(WorkerError::sandbox("key not found"))
            }
        }
        "clear" => {
            pairs.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(pairs.borrow().clone())),
        other => Err(WorkerError::sandbox(format!("dict has no method '{other}'"))),
    }
}

fn coerce_dict_pairs(value: Option<&Value>) -> Result<Vec<(Value, Value)>, WorkerError> {
    match value {
        Some(Value::Dict(pairs)) => Ok(pairs.borrow().clone()),
        Some(other) => Err(WorkerError::sandbox(format!(
            "cannot update dict from '{}'",
            other.type_name()
        ))),
        None => Ok(Vec::new()),
    }
}

fn set_method(
    items: &Rc<std::cell::RefCell<Vec<Value>>>,
    method: &str,
    args: &[Value],
) -> Result<Value, WorkerError> {
    match method {
        "add" => {
            let value = one_arg("add", args)?.clone();
            let mut items = items.borrow_mut();
            if !items.iter().any(|v| v.values_equal(&value)) {
                items.push(value);
            }
            Ok(Value::None)
        }
        "update" => {
            let incoming = coerce_sequence(args.first())?;
            let mut items = items.borrow_mut();
            for value in incoming {
                if !items.iter().any(|v| v.values_equal(&value)) {
                    items.push(value);
                }
            }
            Ok(Value::None)
        }
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::set(items.borrow().clone())),
        other => Err(WorkerError::sandbox(format!("set has no method '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_of_list() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call_builtin("len", &[list]).unwrap_or_else(|e| panic!("{e}")), Value::Int(2));
    }

    #[test]
    fn test_sorted_of_ints() {
        let list = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        let result = call_builtin("sorted", &[list]).unwrap_or_else(|e| panic!("{e}"));
        if let Value::List(items) = result {
            let rendered: Vec<i64> = items.borrow().iter().map(|v| v.as_int().unwrap_or(0)).collect();
            assert_eq!(rendered, vec![1, 2, 3]);
        } else {
            panic!("expected list");
        }
    }

    #[test]
    fn test_range_with_stop_only() {
        let result = call_builtin("range", &[Value::Int(3)]).unwrap_or_else(|e| panic!("{e}"));
        if let Value::List(items) = result {
            assert_eq!(items.borrow().len(), 3);
        } else {
            panic!("expected list");
        }
    }

    #[test]
    fn test_string_split_and_join() {
        let split = call_builtin("str", &[Value::str("a,b,c")]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(split, Value::str("a,b,c"));
        let joined = call_method(&Value::str("-"), "join", &[Value::list(vec![Value::str("a"), Value::str("b")])])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(joined, Value::str("a-b"));
    }

    #[test]
    fn test_list_append_mutates_in_place() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            call_method(&list.clone(), "append", &[Value::Int(2)]).unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(items.borrow().len(), 2);
        }
    }
}
