//! Activation records.

use std::rc::Rc;

use bytecode::Prototype;

use crate::hook::Hook;
use crate::value::Value;

/// Per-frame execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Executing instructions.
    Run,
    /// A return occurred; the payload is the produced value count.
    End(usize),
    /// A fault occurred; the return is suppressed.
    Error,
}

/// One function activation: its value stack (parameters in the lowest
/// slots, the vector length is the stack pointer), hook table, vararg
/// region and calling-convention state. Created by a call, destroyed as
/// soon as its return values are delivered.
#[derive(Debug)]
pub struct Frame {
    /// Identity used by attached hooks to name their owning frame.
    pub id: u64,
    /// The function value being executed.
    pub func: Value,
    pub proto: Rc<Prototype>,
    /// Byte instruction pointer into `proto.code`.
    pub ip: usize,
    pub stack: Vec<Value>,
    pub hooks: Vec<Hook>,
    /// Arguments beyond the declared parameters.
    pub varargs: Vec<Value>,
    /// The caller's requested return count; 0 means free (keep all).
    pub retc: usize,
    /// Values already on the stack from an inner free return or a
    /// vararg splat, spliced into the next call/return/table splat.
    pub pending: usize,
    pub status: Status,
    /// Descriptive value for the fault that put this frame in
    /// [`Status::Error`].
    pub error: Option<Value>,
}

impl Frame {
    /// Bind `args` to a new activation: missing parameters are
    /// Nil-padded, surplus arguments become the vararg region.
    pub fn activate(
        id: u64,
        func: Value,
        proto: Rc<Prototype>,
        mut args: Vec<Value>,
        retc: usize,
    ) -> Self {
        let params = proto.params as usize;
        let varargs = if args.len() > params {
            args.split_off(params)
        } else {
            Vec::new()
        };
        args.resize(params, Value::Nil);

        let hook_max = proto.hook_max as usize;
        Frame {
            id,
            func,
            proto,
            ip: 0,
            stack: args,
            hooks: Vec::with_capacity(hook_max),
            varargs,
            retc,
            pending: 0,
            status: Status::Run,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::Assembler;

    fn proto_with_params(params: u16) -> Rc<Prototype> {
        let mut asm = Assembler::new();
        asm.begin_function();
        asm.set_params(params);
        asm.code().return_(0);
        asm.end_function();
        let registry = asm.finish();
        Rc::clone(registry.get(0).unwrap())
    }

    #[test]
    fn missing_arguments_pad_with_nil() {
        let frame = Frame::activate(
            1,
            Value::Nil,
            proto_with_params(3),
            vec![Value::Number(1.0)],
            0,
        );
        assert_eq!(
            frame.stack,
            vec![Value::Number(1.0), Value::Nil, Value::Nil]
        );
        assert!(frame.varargs.is_empty());
    }

    #[test]
    fn surplus_arguments_become_varargs() {
        let args: Vec<Value> = (0..5).map(|i| Value::Number(i as f64)).collect();
        let frame = Frame::activate(1, Value::Nil, proto_with_params(3), args, 0);
        assert_eq!(frame.stack.len(), 3);
        assert_eq!(
            frame.varargs,
            vec![Value::Number(3.0), Value::Number(4.0)]
        );
    }
}
