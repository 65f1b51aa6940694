//! Table and global storage collaborator.
//!
//! The interpreter never indexes tables directly; it goes through
//! [`TableStore`], which owns the global namespace and raises the
//! indexing faults. [`HashTables`] is the provided hash-map-backed
//! implementation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::interpreter::RuntimeError;
use crate::value::{FunctionRef, Value};

pub type TableRef = Rc<RefCell<Table>>;

pub fn new_table_ref() -> TableRef {
    Rc::new(RefCell::new(Table::default()))
}

#[derive(Debug, Default)]
pub struct Table {
    entries: HashMap<TableKey, Value>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A table key: any value except Nil and NaN. Reference keys hash and
/// compare by identity and keep their referent alive.
#[derive(Debug, Clone)]
pub enum TableKey {
    Bool(bool),
    /// Normalized bit pattern of a non-NaN number (-0.0 folds into 0.0).
    Number(u64),
    Str(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
}

impl TableKey {
    /// Classify a value as a key, raising the indexing faults for Nil
    /// and NaN keys.
    pub fn from_value(value: &Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Nil => Err(RuntimeError::NilIndex),
            Value::Bool(b) => Ok(TableKey::Bool(*b)),
            Value::Number(n) if n.is_nan() => Err(RuntimeError::IllegalIndex {
                got: "NaN".to_string(),
            }),
            Value::Number(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                Ok(TableKey::Number(n.to_bits()))
            }
            Value::Str(s) => Ok(TableKey::Str(Rc::clone(s))),
            Value::Table(t) => Ok(TableKey::Table(Rc::clone(t))),
            Value::Function(f) => Ok(TableKey::Function(f.clone())),
        }
    }

    fn identity(&self) -> usize {
        match self {
            TableKey::Table(t) => Rc::as_ptr(t) as *const () as usize,
            TableKey::Function(FunctionRef::Closure(c)) => Rc::as_ptr(c) as usize,
            TableKey::Function(FunctionRef::Native(n)) => *n as usize,
            _ => 0,
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Bool(a), TableKey::Bool(b)) => a == b,
            (TableKey::Number(a), TableKey::Number(b)) => a == b,
            (TableKey::Str(a), TableKey::Str(b)) => a == b,
            (TableKey::Table(_), TableKey::Table(_))
            | (TableKey::Function(_), TableKey::Function(_)) => {
                self.identity() == other.identity()
            }
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            TableKey::Bool(b) => b.hash(state),
            TableKey::Number(bits) => bits.hash(state),
            TableKey::Str(s) => s.hash(state),
            TableKey::Table(_) | TableKey::Function(_) => {
                self.identity().hash(state)
            }
        }
    }
}

/// The storage interface the interpreter drives.
pub trait TableStore {
    /// Allocate a fresh empty table value.
    fn new_table(&mut self) -> Value;

    /// `table[key]`, Nil when absent. Indexing a non-table faults.
    fn get(&self, table: &Value, key: &Value) -> Result<Value, RuntimeError>;

    /// `table[key] = value`. Assigning Nil removes the entry.
    fn set(&mut self, table: &Value, key: &Value, value: Value) -> Result<(), RuntimeError>;

    /// The table backing the global namespace.
    fn globals(&self) -> Value;
}

/// Hash-map-backed tables with `Rc` handles.
#[derive(Debug)]
pub struct HashTables {
    globals: TableRef,
}

impl HashTables {
    pub fn new() -> Self {
        Self {
            globals: new_table_ref(),
        }
    }
}

impl Default for HashTables {
    fn default() -> Self {
        Self::new()
    }
}

fn as_table(value: &Value) -> Result<&TableRef, RuntimeError> {
    match value {
        Value::Table(t) => Ok(t),
        Value::Nil => Err(RuntimeError::NilIndex),
        other => Err(RuntimeError::IllegalIndex {
            got: other.type_name().to_string(),
        }),
    }
}

impl TableStore for HashTables {
    fn new_table(&mut self) -> Value {
        Value::Table(new_table_ref())
    }

    fn get(&self, table: &Value, key: &Value) -> Result<Value, RuntimeError> {
        let table = as_table(table)?;
        let key = TableKey::from_value(key)?;
        Ok(table
            .borrow()
            .entries
            .get(&key)
            .cloned()
            .unwrap_or(Value::Nil))
    }

    fn set(&mut self, table: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
        let table = as_table(table)?;
        let key = TableKey::from_value(key)?;
        if matches!(value, Value::Nil) {
            table.borrow_mut().entries.remove(&key);
        } else {
            table.borrow_mut().entries.insert(key, value);
        }
        Ok(())
    }

    fn globals(&self) -> Value {
        Value::Table(Rc::clone(&self.globals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_round_trip() {
        let mut tables = HashTables::new();
        let t = tables.new_table();
        let key = Value::Str("k".into());
        assert_eq!(tables.get(&t, &key).unwrap(), Value::Nil);
        tables.set(&t, &key, Value::Number(7.0)).unwrap();
        assert_eq!(tables.get(&t, &key).unwrap(), Value::Number(7.0));
    }

    #[test]
    fn assigning_nil_removes() {
        let mut tables = HashTables::new();
        let t = tables.new_table();
        let key = Value::Number(1.0);
        tables.set(&t, &key, Value::Bool(true)).unwrap();
        tables.set(&t, &key, Value::Nil).unwrap();
        match &t {
            Value::Table(t) => assert!(t.borrow().is_empty()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn indexing_nil_faults() {
        let tables = HashTables::new();
        let err = tables.get(&Value::Nil, &Value::Number(1.0)).unwrap_err();
        assert!(matches!(err, RuntimeError::NilIndex));
    }

    #[test]
    fn indexing_number_faults() {
        let tables = HashTables::new();
        let err = tables
            .get(&Value::Number(5.0), &Value::Number(1.0))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalIndex { .. }));
    }

    #[test]
    fn nil_key_faults() {
        let mut tables = HashTables::new();
        let t = tables.new_table();
        let err = tables.set(&t, &Value::Nil, Value::Bool(true)).unwrap_err();
        assert!(matches!(err, RuntimeError::NilIndex));
    }

    #[test]
    fn nan_key_faults() {
        let tables = HashTables::new();
        let t = tables.globals();
        let err = tables.get(&t, &Value::Number(f64::NAN)).unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalIndex { .. }));
    }

    #[test]
    fn negative_zero_key_folds_into_zero() {
        let mut tables = HashTables::new();
        let t = tables.new_table();
        tables
            .set(&t, &Value::Number(0.0), Value::Str("z".into()))
            .unwrap();
        assert_eq!(
            tables.get(&t, &Value::Number(-0.0)).unwrap(),
            Value::Str("z".into())
        );
    }
}
