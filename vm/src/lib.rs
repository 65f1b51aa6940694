//! Stack-based host embedding around the interpreter: values cross the
//! boundary through a transfer stack, faults come back as [`RuntimeError`]
//! plus a descriptive error value.

pub mod frame;
pub mod hook;
pub mod interpreter;
pub mod table;
pub mod value;

pub use interpreter::RuntimeError;
pub use table::{HashTables, TableStore};
pub use value::{Closure, FunctionRef, NativeFn, Value};

use std::rc::Rc;

use bytecode::ProtoRegistry;

pub struct Vm {
    pub(crate) protos: ProtoRegistry,
    pub(crate) tables: Box<dyn TableStore>,
    stack: Vec<Value>,
    last_error: Option<Value>,
    pub(crate) next_frame_id: u64,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_tables(Box::new(HashTables::new()))
    }

    /// Swap in a custom table backend, e.g. one that journals writes.
    pub fn with_tables(tables: Box<dyn TableStore>) -> Self {
        Self {
            protos: ProtoRegistry::default(),
            tables,
            stack: Vec::new(),
            last_error: None,
            next_frame_id: 0,
        }
    }

    pub fn load_protos(&mut self, protos: ProtoRegistry) {
        self.protos = protos;
    }

    pub fn push_value(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn push_nil(&mut self) {
        self.stack.push(Value::Nil);
    }

    pub fn push_bool(&mut self, b: bool) {
        self.stack.push(Value::Bool(b));
    }

    pub fn push_number(&mut self, n: f64) {
        self.stack.push(Value::Number(n));
    }

    pub fn push_str(&mut self, s: &str) {
        self.stack.push(Value::Str(s.into()));
    }

    /// Instantiate a loaded prototype as a callable value. Only works for
    /// prototypes that capture nothing; anything else needs a creating
    /// frame and must be built by `MakeClosure`.
    pub fn push_closure(&mut self, proto: u32) {
        let proto = self
            .protos
            .get(proto)
            .unwrap_or_else(|| panic!("unknown prototype fn{proto}"));
        assert!(
            proto.upvalues.is_empty(),
            "fn{} captures upvalues and cannot be instantiated by the host",
            proto.id
        );
        let closure = Closure {
            proto: Rc::clone(proto),
            upvalues: Vec::new(),
        };
        self.stack
            .push(Value::Function(FunctionRef::Closure(Rc::new(closure))));
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    pub fn get(&self, pos: usize) -> Option<&Value> {
        self.stack.get(pos)
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let globals = self.tables.globals();
        self.tables.set(&globals, &Value::Str(name.into()), value)
    }

    pub fn get_global(&self, name: &str) -> Result<Value, RuntimeError> {
        let globals = self.tables.globals();
        self.tables.get(&globals, &Value::Str(name.into()))
    }

    pub fn register_native(&mut self, name: &str, f: NativeFn) -> Result<(), RuntimeError> {
        self.set_global(name, Value::Function(FunctionRef::Native(f)))
    }

    /// Call the value sitting below `argc` arguments on the transfer
    /// stack. On success the callee and arguments are replaced by the
    /// results and their count is returned; `retc == 0` keeps however
    /// many the callee produced. On fault the error value is recorded
    /// and the consumed values stay consumed.
    pub fn call(&mut self, argc: usize, retc: usize) -> Result<usize, RuntimeError> {
        let base = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .unwrap_or_else(|| panic!("call with only {} stack values", self.stack.len()));
        let args = self.stack.split_off(base + 1);
        let callee = self.stack.pop().unwrap_or(Value::Nil);

        match interpreter::call_value(self, callee, args, retc) {
            Ok(results) => {
                let n = results.len();
                self.stack.extend(results);
                Ok(n)
            }
            Err(err) => {
                self.last_error = Some(err.to_value());
                Err(err)
            }
        }
    }

    pub fn last_error(&self) -> Option<&Value> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Value> {
        self.last_error.take()
    }
}

/// Argument-count guard for native functions.
pub fn check_args(args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() < expected {
        return Err(RuntimeError::NotEnoughArgs {
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_stack_push_pop() {
        let mut vm = Vm::new();
        vm.push_number(4.0);
        vm.push_str("hello");
        vm.push_bool(true);
        vm.push_nil();
        assert_eq!(vm.stack_len(), 4);
        assert_eq!(vm.pop(), Some(Value::Nil));
        assert_eq!(vm.pop(), Some(Value::Bool(true)));
        assert_eq!(vm.get(0), Some(&Value::Number(4.0)));
        assert_eq!(vm.get(7), None);
    }

    #[test]
    fn globals_roundtrip_through_host() {
        let mut vm = Vm::new();
        vm.set_global("answer", Value::Number(42.0)).unwrap();
        assert_eq!(vm.get_global("answer").unwrap(), Value::Number(42.0));
        assert_eq!(vm.get_global("missing").unwrap(), Value::Nil);
    }

    #[test]
    fn native_called_directly_from_host() {
        fn double(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
            check_args(args, 1)?;
            match args[0] {
                Value::Number(n) => Ok(vec![Value::Number(n * 2.0)]),
                _ => Err(RuntimeError::InvalidOperand {
                    op: "double",
                    got: args[0].type_name(),
                }),
            }
        }
        let mut vm = Vm::new();
        vm.register_native("double", double).unwrap();
        let f = vm.get_global("double").unwrap();
        vm.push_value(f);
        vm.push_number(21.0);
        let n = vm.call(1, 1).unwrap();
        assert_eq!(n, 1);
        assert_eq!(vm.pop(), Some(Value::Number(42.0)));
    }

    #[test]
    fn native_argument_guard_faults() {
        fn needs_two(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
            check_args(args, 2)?;
            Ok(vec![])
        }
        let mut vm = Vm::new();
        vm.register_native("needs_two", needs_two).unwrap();
        let f = vm.get_global("needs_two").unwrap();
        vm.push_value(f);
        vm.push_number(1.0);
        let err = vm.call(1, 0).unwrap_err();
        assert_eq!(err, RuntimeError::NotEnoughArgs { expected: 2, got: 1 });
        assert!(vm.last_error().is_some());
        assert!(vm.take_error().is_some());
        assert!(vm.last_error().is_none());
    }

    #[test]
    fn calling_a_number_faults() {
        let mut vm = Vm::new();
        vm.push_number(7.0);
        let err = vm.call(0, 0).unwrap_err();
        assert_eq!(err, RuntimeError::CallNonFunction { got: "number" });
        assert_eq!(
            vm.last_error(),
            Some(&Value::Str("attempt to call a number value".into()))
        );
    }
}
