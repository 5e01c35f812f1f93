//! Runtime value representation for the tree-walking interpreter.
//!
//! Lists, dicts, and sets are reference-counted interior-mutable
//! containers so in-place method calls (`append`, `update`, `sort`, ...)
//! observe the same underlying storage as every other binding that
//! aliases them, matching Python's reference semantics. Tuples are
//! immutable and held by value.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::WorkerError;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<String>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    /// Insertion-ordered to match Python `dict` iteration semantics.
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Set(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Rc::new(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(pairs)))
    }

    pub fn set(items: Vec<Value>) -> Self {
        Value::Set(Rc::new(RefCell::new(items)))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(pairs) => !pairs.borrow().is_empty(),
            Value::Set(items) => !items.borrow().is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
        }
    }

    pub fn as_str(&self) -> Result<Rc<String>, WorkerError> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            other => Err(WorkerError::sandbox(format!(
                "expected str, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_int(&self) -> Result<i64, WorkerError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(WorkerError::sandbox(format!(
                "expected int, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_f64(&self) -> Result<f64, WorkerError> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(WorkerError::sandbox(format!(
                "expected number, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    pub fn is_float_like(&self) -> bool {
        matches!(self, Value::Float(_))
    }

    /// Python-style display: used for `print`, `str()`, and f-string
    /// interpolation.
    pub fn display(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.as_str().to_string(),
            Value::List(items) => {
                let rendered: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Tuple(items) => {
                let rendered: Vec<String> = items.iter().map(Value::repr).collect();
                if rendered.len() == 1 {
                    format!("({},)", rendered[0])
                } else {
                    format!("({})", rendered.join(", "))
                }
            }
            Value::Dict(pairs) => {
                let rendered: Vec<String> = pairs
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::Set(items) => {
                let rendered: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("{{{}}}", rendered.join(", "))
            }
        }
    }

    /// `repr()`-style rendering, used for nested container elements
    /// (strings get quoted).
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.display(),
        }
    }

    pub fn values_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.values_equal(y))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.values_equal(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.values_equal(k2) && v.values_equal(v2))
                    })
            }
            (Value::Set(a), Value::Set(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.values_equal(y)))
            }
            _ => false,
        }
    }

    pub fn compare(&self, other: &Value) -> Result<std::cmp::Ordering, WorkerError> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => a
                .as_f64()?
                .partial_cmp(&b.as_f64()?)
                .ok_or_else(|| WorkerError::sandbox("cannot order NaN")),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => Err(WorkerError::sandbox(format!(
                "cannot compare {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(Value::Bool(true).display(), "True");
        assert_eq!(Value::Int(42).display(), "42");
        assert_eq!(Value::Float(3.0).display(), "3.0");
        assert_eq!(Value::str("hi").display(), "hi");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::str("a")]).display(),
            "[1, 'a']"
        );
    }

    #[test]
    fn test_values_equal_numeric_coercion() {
        assert!(Value::Int(2).values_equal(&Value::Float(2.0)));
        assert!(!Value::Int(2).values_equal(&Value::Float(2.1)));
    }

    #[test]
    fn test_list_aliasing_through_rc() {
        let list = Value::list(vec![Value::Int(1)]);
        let alias = list.clone();
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        if let Value::List(items) = &alias {
            assert_eq!(items.borrow().len(), 2);
        } else {
            panic!("expected list");
        }
    }
}
