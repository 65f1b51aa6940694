//! The runtime value model.

use core::fmt;
use std::rc::Rc;

use bytecode::Prototype;

use crate::hook::Hook;
use crate::interpreter::RuntimeError;
use crate::table::TableRef;

/// A native function callable from bytecode. Receives the argument block
/// and produces its results; faults surface as [`RuntimeError`]s.
pub type NativeFn = fn(&[Value]) -> Result<Vec<Value>, RuntimeError>;

/// A tagged runtime value.
///
/// Nil, booleans and numbers copy and compare by value. Strings, tables
/// and functions are heap references; tables and functions compare by
/// identity, strings by content (interning is a collaborator concern, so
/// content equality stands in for interned identity).
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
}

#[derive(Debug, Clone)]
pub enum FunctionRef {
    Closure(Rc<Closure>),
    Native(NativeFn),
}

/// A prototype instantiated with its captured hooks.
#[derive(Debug)]
pub struct Closure {
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<Hook>,
}

impl Value {
    /// Nil and false are falsy; everything else, including 0 and the
    /// empty string, is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }

    /// Numeric view for arithmetic: numbers pass through, strings parse
    /// when the whole token (modulo surrounding whitespace) is a number.
    pub fn coerce_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// String view for concatenation: strings pass through, numbers
    /// format with integer shortening.
    pub fn coerce_str(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.to_string()),
            Value::Number(n) => Some(number_to_string(*n)),
            _ => None,
        }
    }
}

/// Integral values print without a fractional part.
pub fn number_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FunctionRef::Closure(a), FunctionRef::Closure(b)) => Rc::ptr_eq(a, b),
            (FunctionRef::Native(a), FunctionRef::Native(b)) => {
                std::ptr::fn_addr_eq(*a, *b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::Str(s) => write!(f, "{s}"),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(FunctionRef::Closure(c)) => {
                write!(f, "function: fn{}", c.proto.id)
            }
            Value::Function(FunctionRef::Native(n)) => {
                write!(f, "function: native {:p}", *n as *const ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::Str("".into()).is_truthy());
    }

    #[test]
    fn string_parses_as_number_only_when_whole() {
        assert_eq!(Value::Str("3".into()).coerce_number(), Some(3.0));
        assert_eq!(Value::Str(" 2.5 ".into()).coerce_number(), Some(2.5));
        assert_eq!(Value::Str("-10".into()).coerce_number(), Some(-10.0));
        assert_eq!(Value::Str("3x".into()).coerce_number(), None);
        assert_eq!(Value::Str("x".into()).coerce_number(), None);
        assert_eq!(Value::Str("1 2".into()).coerce_number(), None);
        assert_eq!(Value::Bool(true).coerce_number(), None);
    }

    #[test]
    fn numbers_format_with_integer_shortening() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(-2.0), "-2");
        assert_eq!(number_to_string(2.5), "2.5");
    }

    #[test]
    fn tables_compare_by_identity() {
        let a = crate::table::new_table_ref();
        let b = crate::table::new_table_ref();
        assert_eq!(Value::Table(a.clone()), Value::Table(a.clone()));
        assert_ne!(Value::Table(a), Value::Table(b));
    }

    #[test]
    fn strings_compare_by_content() {
        assert_eq!(Value::Str("abc".into()), Value::Str("abc".into()));
        assert_ne!(Value::Str("abc".into()), Value::Str("abd".into()));
    }
}
