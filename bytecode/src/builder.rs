use crate::op::Op;

/// A forward jump whose target has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`] and
/// [`BytecodeBuilder::jump_if_false`]. Resolve it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug)]
pub struct Label {
    /// Position of the u16 target bytes in the buffer.
    operand_pos: usize,
}

/// Builds a bytecode byte sequence.
///
/// Operands encode as 1 byte when the value fits, 2 bytes little-endian
/// otherwise, with the width recorded in the leading instruction byte.
/// Jump targets are always reserved at 2 bytes so [`bind`](Self::bind)
/// and [`patch`](Self::patch) can rewrite them in place.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn needs_wide(value: u16) -> bool {
        value > u8::MAX as u16
    }

    fn emit_operand(&mut self, value: u16, wide: bool) {
        if wide {
            self.buf.extend_from_slice(&value.to_le_bytes());
        } else {
            self.buf.push(value as u8);
        }
    }

    fn emit_plain(&mut self, op: Op) {
        debug_assert_eq!(op.operand_count(), 0);
        self.buf.push(op as u8);
    }

    fn emit_one(&mut self, op: Op, value: u16) {
        let wide = op.forces_wide() || Self::needs_wide(value);
        self.buf.push(op.pack(wide, false));
        self.emit_operand(value, wide);
    }

    fn emit_two(&mut self, op: Op, a: u16, b: u16) {
        let wide0 = Self::needs_wide(a);
        let wide1 = Self::needs_wide(b);
        self.buf.push(op.pack(wide0, wide1));
        self.emit_operand(a, wide0);
        self.emit_operand(b, wide1);
    }

    // ── loads and stores ───────────────────────────────────────────

    /// `Constant <idx>`: push a constant pool entry.
    pub fn load_constant(&mut self, idx: u16) {
        self.emit_one(Op::Constant, idx);
    }

    /// `MakeClosure <proto>`: instantiate a closure from a prototype id.
    pub fn make_closure(&mut self, proto: u16) {
        self.emit_one(Op::MakeClosure, proto);
    }

    /// `LoadLocal <slot>`: push a frame slot.
    pub fn load_local(&mut self, slot: u16) {
        self.emit_one(Op::LoadLocal, slot);
    }

    /// `StoreLocal <slot>`: pop into a frame slot.
    pub fn store_local(&mut self, slot: u16) {
        self.emit_one(Op::StoreLocal, slot);
    }

    /// `BackLoad <depth>`: push the value `depth` below the top.
    pub fn back_load(&mut self, depth: u16) {
        self.emit_one(Op::BackLoad, depth);
    }

    /// `BackStore <depth>`: pop into the slot `depth` below the new top.
    pub fn back_store(&mut self, depth: u16) {
        self.emit_one(Op::BackStore, depth);
    }

    /// `LoadUpvalue <idx>`: push an upvalue through its hook.
    pub fn load_upvalue(&mut self, idx: u16) {
        self.emit_one(Op::LoadUpvalue, idx);
    }

    /// `StoreUpvalue <idx>`: pop into an upvalue through its hook.
    pub fn store_upvalue(&mut self, idx: u16) {
        self.emit_one(Op::StoreUpvalue, idx);
    }

    /// `OpenHook <slot>`: open a hook aliasing a frame slot.
    pub fn open_hook(&mut self, slot: u16) {
        self.emit_one(Op::OpenHook, slot);
    }

    /// `CloseHook`: detach the most recently opened hook.
    pub fn close_hook(&mut self) {
        self.emit_plain(Op::CloseHook);
    }

    /// `Pop <count>`: drop values from the top of stack.
    pub fn pop(&mut self, count: u16) {
        self.emit_one(Op::Pop, count);
    }

    // ── literals ───────────────────────────────────────────────────

    pub fn push_nil(&mut self) {
        self.emit_plain(Op::PushNil);
    }

    pub fn push_true(&mut self) {
        self.emit_plain(Op::PushTrue);
    }

    pub fn push_false(&mut self) {
        self.emit_plain(Op::PushFalse);
    }

    // ── arithmetic and comparison ──────────────────────────────────

    pub fn add(&mut self) {
        self.emit_plain(Op::Add);
    }

    pub fn sub(&mut self) {
        self.emit_plain(Op::Sub);
    }

    pub fn mul(&mut self) {
        self.emit_plain(Op::Mul);
    }

    pub fn div(&mut self) {
        self.emit_plain(Op::Div);
    }

    pub fn concat(&mut self) {
        self.emit_plain(Op::Concat);
    }

    pub fn neg(&mut self) {
        self.emit_plain(Op::Neg);
    }

    pub fn not(&mut self) {
        self.emit_plain(Op::Not);
    }

    pub fn lt(&mut self) {
        self.emit_plain(Op::Lt);
    }

    pub fn le(&mut self) {
        self.emit_plain(Op::Le);
    }

    pub fn gt(&mut self) {
        self.emit_plain(Op::Gt);
    }

    pub fn ge(&mut self) {
        self.emit_plain(Op::Ge);
    }

    pub fn eq(&mut self) {
        self.emit_plain(Op::Eq);
    }

    pub fn ne(&mut self) {
        self.emit_plain(Op::Ne);
    }

    // ── tables and globals ─────────────────────────────────────────

    pub fn new_table(&mut self) {
        self.emit_plain(Op::NewTable);
    }

    pub fn table_get(&mut self) {
        self.emit_plain(Op::TableGet);
    }

    pub fn table_set(&mut self) {
        self.emit_plain(Op::TableSet);
    }

    /// `TableList <start>`: splat stack values from `start` into the
    /// table below them.
    pub fn table_list(&mut self, start: u16) {
        self.emit_one(Op::TableList, start);
    }

    pub fn get_global(&mut self) {
        self.emit_plain(Op::GetGlobal);
    }

    pub fn set_global(&mut self) {
        self.emit_plain(Op::SetGlobal);
    }

    // ── control flow ───────────────────────────────────────────────

    /// Emit an unconditional forward jump. Returns a [`Label`] that must
    /// be resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self) -> Label {
        self.emit_jump_placeholder(Op::Jump)
    }

    /// Emit a conditional forward jump (falsy). Returns a [`Label`].
    pub fn jump_if_false(&mut self) -> Label {
        self.emit_jump_placeholder(Op::JumpIfFalse)
    }

    /// Emit an unconditional jump to a known target (a byte offset
    /// obtained from [`current_offset`](Self::current_offset)).
    pub fn jump_to(&mut self, target: usize) {
        debug_assert!(
            target <= u16::MAX as usize,
            "jump target {target} outside the addressable range"
        );
        self.emit_one(Op::Jump, target as u16);
    }

    /// Emit a conditional jump (falsy) to a known target.
    pub fn jump_if_false_to(&mut self, target: usize) {
        debug_assert!(
            target <= u16::MAX as usize,
            "jump target {target} outside the addressable range"
        );
        self.emit_one(Op::JumpIfFalse, target as u16);
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        debug_assert!(
            target <= u16::MAX as usize,
            "bind target {target} outside the addressable range"
        );
        self.buf[label.operand_pos..label.operand_pos + 2]
            .copy_from_slice(&(target as u16).to_le_bytes());
    }

    /// Rewrite the jump target at `operand_pos` with a new value.
    ///
    /// Only jump operands are rewritable: each is the sole operand of
    /// its instruction and always wide, so the packed byte sits right
    /// before the slot. Anything else panics.
    pub fn patch(&mut self, operand_pos: usize, value: u16) {
        let packed = self.buf[operand_pos - 1];
        let id = (packed >> 2) & 0x1f;
        assert!(
            packed & 0x80 != 0
                && packed & 0x01 != 0
                && (id == Op::Jump as u8 || id == Op::JumpIfFalse as u8),
            "patch on a non-jump operand slot at {operand_pos}"
        );
        self.buf[operand_pos..operand_pos + 2]
            .copy_from_slice(&value.to_le_bytes());
    }

    fn emit_jump_placeholder(&mut self, op: Op) -> Label {
        self.buf.push(op.pack(true, false));
        let operand_pos = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_le_bytes()); // placeholder
        Label { operand_pos }
    }

    // ── calls ──────────────────────────────────────────────────────

    /// `Call <argc> <retc>`: call with independent width flags per
    /// operand. `retc` 0 requests all results (free return).
    pub fn call(&mut self, argc: u16, retc: u16) {
        self.emit_two(Op::Call, argc, retc);
    }

    /// `Return <count>`.
    pub fn return_(&mut self, count: u16) {
        self.emit_one(Op::Return, count);
    }

    /// `Vararg <count>`: 0 pushes every extra argument.
    pub fn vararg(&mut self, count: u16) {
        self.emit_one(Op::Vararg, count);
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
