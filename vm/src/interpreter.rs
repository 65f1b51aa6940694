//! The fetch-decode-execute loop.

use core::fmt;
use std::rc::Rc;

use bytecode::{BytecodeDecoder, Constant, Instruction, UpvalueDesc};
use log::{debug, trace};

use crate::Vm;
use crate::frame::{Frame, Status};
use crate::hook::Hook;
use crate::value::{Closure, FunctionRef, Value};

const MAX_FRAMES: usize = 1024;

/// A recoverable semantic fault. Recovery happens at the interpreter-loop
/// boundary: the faulting frame stops, the host observes the error, and
/// nothing unwinds past that on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    CallNonFunction { got: &'static str },
    NotEnoughArgs { expected: usize, got: usize },
    InvalidOperand { op: &'static str, got: &'static str },
    InvalidComparison { lhs: &'static str, rhs: &'static str },
    IllegalIndex { got: String },
    NilIndex,
    StackOverflow,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::CallNonFunction { got } => {
                write!(f, "attempt to call a {got} value")
            }
            RuntimeError::NotEnoughArgs { expected, got } => {
                write!(f, "not enough arguments: expected {expected}, got {got}")
            }
            RuntimeError::InvalidOperand { op, got } => {
                write!(f, "invalid operand of type {got} to '{op}'")
            }
            RuntimeError::InvalidComparison { lhs, rhs } => {
                write!(f, "attempt to compare {lhs} with {rhs}")
            }
            RuntimeError::IllegalIndex { got } => {
                write!(f, "attempt to index a {got} value")
            }
            RuntimeError::NilIndex => write!(f, "attempt to index nil"),
            RuntimeError::StackOverflow => write!(f, "call stack overflow"),
        }
    }
}

impl RuntimeError {
    /// The descriptive value stored in the faulting frame's error slot
    /// and surfaced through the host API.
    pub fn to_value(&self) -> Value {
        Value::Str(self.to_string().into())
    }
}

struct InterpreterState {
    frames: Vec<Frame>,
    next_id: u64,
}

impl InterpreterState {
    /// Frame ids continue from `first_id` so no id is ever reused across
    /// top-level calls; a detached closure can never alias a later frame.
    fn new(first_id: u64) -> Self {
        Self {
            frames: Vec::new(),
            next_id: first_id,
        }
    }

    fn push_frame(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
        retc: usize,
    ) -> Result<(), RuntimeError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        let id = self.next_id;
        self.next_id += 1;
        let proto = Rc::clone(&closure.proto);
        trace!("call fn{} argc={} retc={}", proto.id, args.len(), retc);
        let func = Value::Function(FunctionRef::Closure(closure));
        self.frames.push(Frame::activate(id, func, proto, args, retc));
        Ok(())
    }
}

/// Invoke `callee` with `args`, requesting `retc` results (0 = all).
pub(crate) fn call_value(
    vm: &mut Vm,
    callee: Value,
    args: Vec<Value>,
    retc: usize,
) -> Result<Vec<Value>, RuntimeError> {
    match callee {
        Value::Function(FunctionRef::Closure(closure)) => {
            let mut state = InterpreterState::new(vm.next_frame_id);
            state.push_frame(closure, args, retc)?;
            let result = run(vm, &mut state);
            vm.next_frame_id = state.next_id;
            result
        }
        Value::Function(FunctionRef::Native(native)) => {
            let results = native(&args)?;
            Ok(adjust_results(results, retc))
        }
        other => Err(RuntimeError::CallNonFunction {
            got: other.type_name(),
        }),
    }
}

/// Truncate or Nil-pad `results` to a positive request; 0 keeps all.
fn adjust_results(mut results: Vec<Value>, retc: usize) -> Vec<Value> {
    if retc > 0 {
        results.resize(retc, Value::Nil);
    }
    results
}

fn run(vm: &mut Vm, state: &mut InterpreterState) -> Result<Vec<Value>, RuntimeError> {
    loop {
        let idx = state.frames.len() - 1;
        let instr = {
            let frame = &mut state.frames[idx];
            let (instr, next_ip) = decode_at(&frame.proto.code, frame.ip);
            frame.ip = next_ip;
            instr
        };

        if let Err(err) = dispatch(vm, state, idx, instr) {
            {
                let frame = &mut state.frames[idx];
                frame.status = Status::Error;
                frame.error = Some(err.to_value());
                debug!("fault in fn{} at {}: {err}", frame.proto.id, frame.ip);
            }
            unwind(state);
            return Err(err);
        }

        let status = state.frames[idx].status;
        if let Status::End(produced) = status {
            if let Some(results) = finish_frame(state, produced) {
                return Ok(results);
            }
        }
    }
}

fn decode_at(code: &[u8], pos: usize) -> (Instruction, usize) {
    let mut decoder = BytecodeDecoder::new(&code[pos..]);
    let instr = decoder
        .decode_next()
        .unwrap_or_else(|| panic!("instruction pointer {pos} past end of code"));
    (instr, pos + decoder.offset())
}

fn dispatch(
    vm: &mut Vm,
    state: &mut InterpreterState,
    idx: usize,
    instr: Instruction,
) -> Result<(), RuntimeError> {
    match instr {
        Instruction::Constant { idx: cidx } => {
            let frame = &mut state.frames[idx];
            let value = match frame.proto.constants.get(cidx as usize) {
                Some(Constant::Number(n)) => Value::Number(*n),
                Some(Constant::Str(s)) => Value::Str(Rc::from(s.as_str())),
                None => panic!("constant #{cidx} out of range in fn{}", frame.proto.id),
            };
            frame.stack.push(value);
        }
        Instruction::PushNil => state.frames[idx].stack.push(Value::Nil),
        Instruction::PushTrue => state.frames[idx].stack.push(Value::Bool(true)),
        Instruction::PushFalse => state.frames[idx].stack.push(Value::Bool(false)),

        Instruction::LoadLocal { slot } => {
            let frame = &mut state.frames[idx];
            let value = frame.stack[slot as usize].clone();
            frame.stack.push(value);
        }
        Instruction::StoreLocal { slot } => {
            let frame = &mut state.frames[idx];
            let value = pop(frame);
            frame.stack[slot as usize] = value;
        }
        Instruction::BackLoad { depth } => {
            let frame = &mut state.frames[idx];
            let value = frame.stack[frame.stack.len() - 1 - depth as usize].clone();
            frame.stack.push(value);
        }
        Instruction::BackStore { depth } => {
            let frame = &mut state.frames[idx];
            let value = pop(frame);
            let at = frame.stack.len() - 1 - depth as usize;
            frame.stack[at] = value;
        }
        Instruction::Pop { count } => {
            let frame = &mut state.frames[idx];
            let keep = frame.stack.len() - count as usize;
            frame.stack.truncate(keep);
        }

        Instruction::Add => arith(&mut state.frames[idx], "add", |a, b| a + b)?,
        Instruction::Sub => arith(&mut state.frames[idx], "sub", |a, b| a - b)?,
        Instruction::Mul => arith(&mut state.frames[idx], "mul", |a, b| a * b)?,
        Instruction::Div => arith(&mut state.frames[idx], "div", |a, b| a / b)?,
        Instruction::Neg => {
            let frame = &mut state.frames[idx];
            let value = pop(frame);
            let n = coerce(&value, "neg")?;
            frame.stack.push(Value::Number(-n));
        }
        Instruction::Not => {
            let frame = &mut state.frames[idx];
            let value = pop(frame);
            frame.stack.push(Value::Bool(!value.is_truthy()));
        }
        Instruction::Concat => {
            let frame = &mut state.frames[idx];
            let rhs = pop(frame);
            let lhs = pop(frame);
            let a = lhs.coerce_str().ok_or(RuntimeError::InvalidOperand {
                op: "concat",
                got: lhs.type_name(),
            })?;
            let b = rhs.coerce_str().ok_or(RuntimeError::InvalidOperand {
                op: "concat",
                got: rhs.type_name(),
            })?;
            frame.stack.push(Value::Str(format!("{a}{b}").into()));
        }

        Instruction::Lt => compare(&mut state.frames[idx], Cmp::Lt)?,
        Instruction::Le => compare(&mut state.frames[idx], Cmp::Le)?,
        Instruction::Gt => compare(&mut state.frames[idx], Cmp::Gt)?,
        Instruction::Ge => compare(&mut state.frames[idx], Cmp::Ge)?,
        Instruction::Eq => {
            let frame = &mut state.frames[idx];
            let rhs = pop(frame);
            let lhs = pop(frame);
            frame.stack.push(Value::Bool(lhs == rhs));
        }
        Instruction::Ne => {
            let frame = &mut state.frames[idx];
            let rhs = pop(frame);
            let lhs = pop(frame);
            frame.stack.push(Value::Bool(lhs != rhs));
        }

        Instruction::NewTable => {
            let table = vm.tables.new_table();
            state.frames[idx].stack.push(table);
        }
        Instruction::TableGet => {
            let frame = &mut state.frames[idx];
            let key = pop(frame);
            let table = pop(frame);
            let value = vm.tables.get(&table, &key)?;
            state.frames[idx].stack.push(value);
        }
        Instruction::TableSet => {
            let frame = &mut state.frames[idx];
            let value = pop(frame);
            let key = pop(frame);
            let table = pop(frame);
            vm.tables.set(&table, &key, value)?;
        }
        Instruction::TableList { start } => {
            let (table, values) = {
                let frame = &mut state.frames[idx];
                frame.pending = 0;
                let values = frame.stack.split_off(start as usize);
                let table = frame
                    .stack
                    .last()
                    .cloned()
                    .unwrap_or_else(|| panic!("TableList without a table below s{start}"));
                (table, values)
            };
            for (i, value) in values.into_iter().enumerate() {
                vm.tables.set(&table, &Value::Number((i + 1) as f64), value)?;
            }
        }

        Instruction::GetGlobal => {
            let key = pop(&mut state.frames[idx]);
            let globals = vm.tables.globals();
            let value = vm.tables.get(&globals, &key)?;
            state.frames[idx].stack.push(value);
        }
        Instruction::SetGlobal => {
            let frame = &mut state.frames[idx];
            let value = pop(frame);
            let key = pop(frame);
            let globals = vm.tables.globals();
            vm.tables.set(&globals, &key, value)?;
        }

        Instruction::Jump { target } => {
            state.frames[idx].ip = target as usize;
        }
        Instruction::JumpIfFalse { target } => {
            let frame = &mut state.frames[idx];
            let cond = pop(frame);
            if !cond.is_truthy() {
                frame.ip = target as usize;
            }
        }

        Instruction::OpenHook { slot } => {
            let frame = &mut state.frames[idx];
            let hook = Hook::attached(frame.id, slot as usize);
            frame.hooks.push(hook);
        }
        Instruction::CloseHook => {
            let frame = &mut state.frames[idx];
            let hook = frame
                .hooks
                .pop()
                .unwrap_or_else(|| panic!("CloseHook with no open hook"));
            close_hook(frame, &hook);
        }
        Instruction::LoadUpvalue { idx: uidx } => {
            let hook = upvalue_hook(&state.frames[idx], uidx);
            let value = hook_read(&state.frames, &hook);
            state.frames[idx].stack.push(value);
        }
        Instruction::StoreUpvalue { idx: uidx } => {
            let value = pop(&mut state.frames[idx]);
            let hook = upvalue_hook(&state.frames[idx], uidx);
            hook_write(&mut state.frames, &hook, value);
        }
        Instruction::MakeClosure { proto } => {
            make_closure(vm, state, idx, proto);
        }

        Instruction::Vararg { count } => {
            let frame = &mut state.frames[idx];
            if count == 0 {
                let extras = frame.varargs.clone();
                frame.pending = extras.len();
                frame.stack.extend(extras);
            } else {
                for i in 0..count as usize {
                    let value = frame.varargs.get(i).cloned().unwrap_or(Value::Nil);
                    frame.stack.push(value);
                }
            }
        }
        Instruction::Call { argc, retc } => {
            do_call(vm, state, idx, argc as usize, retc as usize)?;
        }
        Instruction::Return { count } => {
            let frame = &mut state.frames[idx];
            let produced = count as usize + frame.pending;
            frame.pending = 0;
            frame.status = Status::End(produced);
        }
    }
    Ok(())
}

fn pop(frame: &mut Frame) -> Value {
    frame
        .stack
        .pop()
        .unwrap_or_else(|| panic!("operand stack underflow in fn{}", frame.proto.id))
}

fn coerce(value: &Value, op: &'static str) -> Result<f64, RuntimeError> {
    value.coerce_number().ok_or(RuntimeError::InvalidOperand {
        op,
        got: value.type_name(),
    })
}

fn arith(
    frame: &mut Frame,
    op: &'static str,
    apply: fn(f64, f64) -> f64,
) -> Result<(), RuntimeError> {
    let rhs = pop(frame);
    let lhs = pop(frame);
    let a = coerce(&lhs, op)?;
    let b = coerce(&rhs, op)?;
    frame.stack.push(Value::Number(apply(a, b)));
    Ok(())
}

#[derive(Clone, Copy)]
enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
}

fn compare(frame: &mut Frame, cmp: Cmp) -> Result<(), RuntimeError> {
    let rhs = pop(frame);
    let lhs = pop(frame);
    let result = match (&lhs, &rhs) {
        (Value::Number(a), Value::Number(b)) => match cmp {
            Cmp::Lt => a < b,
            Cmp::Le => a <= b,
            Cmp::Gt => a > b,
            Cmp::Ge => a >= b,
        },
        (Value::Str(a), Value::Str(b)) => match cmp {
            Cmp::Lt => a < b,
            Cmp::Le => a <= b,
            Cmp::Gt => a > b,
            Cmp::Ge => a >= b,
        },
        _ => {
            return Err(RuntimeError::InvalidComparison {
                lhs: lhs.type_name(),
                rhs: rhs.type_name(),
            });
        }
    };
    frame.stack.push(Value::Bool(result));
    Ok(())
}

fn current_closure(frame: &Frame) -> &Rc<Closure> {
    match &frame.func {
        Value::Function(FunctionRef::Closure(closure)) => closure,
        other => panic!("frame function is a {}, not a closure", other.type_name()),
    }
}

fn upvalue_hook(frame: &Frame, idx: u16) -> Hook {
    current_closure(frame).upvalues[idx as usize].clone()
}

/// Resolve one upvalue descriptor against the creating frame: the frame's
/// own hook table when it is the owner, otherwise the identical descriptor
/// inherited through the frame's closure (guaranteed present by the
/// assembler's re-export).
fn resolve_hook(frame: &Frame, desc: &UpvalueDesc) -> Hook {
    if desc.owner == frame.proto.id {
        frame
            .hooks
            .get(desc.hook as usize)
            .cloned()
            .unwrap_or_else(|| {
                panic!("hook {} not open in fn{}", desc.hook, frame.proto.id)
            })
    } else {
        let pos = frame
            .proto
            .upvalues
            .iter()
            .position(|d| d == desc)
            .unwrap_or_else(|| {
                panic!(
                    "fn{} cannot resolve upvalue of fn{}",
                    frame.proto.id, desc.owner
                )
            });
        current_closure(frame).upvalues[pos].clone()
    }
}

fn make_closure(vm: &Vm, state: &mut InterpreterState, idx: usize, proto_id: u16) {
    let proto = vm
        .protos
        .get(proto_id as u32)
        .unwrap_or_else(|| panic!("unknown prototype fn{proto_id}"));
    let proto = Rc::clone(proto);
    let frame = &state.frames[idx];
    let upvalues = proto
        .upvalues
        .iter()
        .map(|desc| resolve_hook(frame, desc))
        .collect();
    let closure = Value::Function(FunctionRef::Closure(Rc::new(Closure {
        proto,
        upvalues,
    })));
    state.frames[idx].stack.push(closure);
}

fn hook_read(frames: &[Frame], hook: &Hook) -> Value {
    match hook.attachment() {
        None => hook.detached_value().unwrap_or(Value::Nil),
        Some((fid, slot)) => {
            let frame = frames
                .iter()
                .rev()
                .find(|f| f.id == fid)
                .unwrap_or_else(|| panic!("hook aliases dead frame {fid}"));
            frame.stack.get(slot).cloned().unwrap_or(Value::Nil)
        }
    }
}

fn hook_write(frames: &mut [Frame], hook: &Hook, value: Value) {
    match hook.attachment() {
        None => {
            hook.set_detached(value);
        }
        Some((fid, slot)) => {
            let frame = frames
                .iter_mut()
                .rev()
                .find(|f| f.id == fid)
                .unwrap_or_else(|| panic!("hook aliases dead frame {fid}"));
            frame.stack[slot] = value;
        }
    }
}

/// Snapshot the aliased slot into the hook and detach it.
fn close_hook(frame: &Frame, hook: &Hook) {
    match hook.attachment() {
        Some((fid, slot)) => {
            debug_assert_eq!(fid, frame.id, "hook closed by a foreign frame");
            let value = frame.stack.get(slot).cloned().unwrap_or(Value::Nil);
            hook.detach(value);
        }
        None => panic!("CloseHook on an already detached hook"),
    }
}

fn do_call(
    vm: &mut Vm,
    state: &mut InterpreterState,
    idx: usize,
    argc: usize,
    retc: usize,
) -> Result<(), RuntimeError> {
    let (callee, args) = {
        let frame = &mut state.frames[idx];
        let total = argc + frame.pending;
        frame.pending = 0;
        let base = frame
            .stack
            .len()
            .checked_sub(total + 1)
            .unwrap_or_else(|| panic!("call underflows the stack in fn{}", frame.proto.id));
        let args = frame.stack.split_off(base + 1);
        let callee = frame.stack.pop().unwrap_or(Value::Nil);
        (callee, args)
    };

    match callee {
        Value::Function(FunctionRef::Closure(closure)) => {
            state.push_frame(closure, args, retc)
        }
        Value::Function(FunctionRef::Native(native)) => {
            let results = native(&args)?;
            deliver(&mut state.frames[idx], results, retc);
            Ok(())
        }
        other => Err(RuntimeError::CallNonFunction {
            got: other.type_name(),
        }),
    }
}

/// Push a callee's results onto the caller's stack, per the caller's
/// request: 0 keeps everything and marks it pending for splicing, a
/// positive count truncates or Nil-pads.
fn deliver(caller: &mut Frame, results: Vec<Value>, retc: usize) {
    let results = adjust_results(results, retc);
    if retc == 0 {
        caller.pending = results.len();
    }
    caller.stack.extend(results);
}

/// Detach whatever hooks remain open, pop the finished frame and deliver
/// its values. Returns the final results once no caller remains.
/// Fault teardown: every live frame still holds attached hooks, and all of
/// them must detach before their frames are dropped. Innermost first, same
/// order a cascade of returns would take.
fn unwind(state: &mut InterpreterState) {
    while let Some(mut frame) = state.frames.pop() {
        while let Some(hook) = frame.hooks.pop() {
            if hook.attachment().is_some() {
                close_hook(&frame, &hook);
            }
        }
    }
}

fn finish_frame(state: &mut InterpreterState, produced: usize) -> Option<Vec<Value>> {
    let Some(mut callee) = state.frames.pop() else {
        unreachable!("finish_frame on empty frame stack")
    };

    // Scope teardown: detach strictly before the frame is destroyed.
    while let Some(hook) = callee.hooks.pop() {
        if hook.attachment().is_some() {
            close_hook(&callee, &hook);
        }
    }

    let start = callee
        .stack
        .len()
        .checked_sub(produced)
        .unwrap_or_else(|| panic!("fn{} returns more values than it has", callee.proto.id));
    let results = callee.stack.split_off(start);
    trace!("return fn{} produced={} retc={}", callee.proto.id, produced, callee.retc);

    match state.frames.last_mut() {
        Some(caller) => {
            deliver(caller, results, callee.retc);
            None
        }
        None => Some(adjust_results(results, callee.retc)),
    }
}
