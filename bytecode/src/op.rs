/// Bytecode opcodes.
///
/// The first byte of an instruction packs the opcode together with its
/// operand-width flags. A clear high bit means the byte is a bare
/// zero-operand opcode. A set high bit means the opcode carries operands:
/// the opcode id sits in bits 2..7, bit 0 flags a 2-byte little-endian
/// first operand and bit 1 flags a 2-byte second operand (only
/// [`Call`](Op::Call) has two, with independent flags).
///
/// Wide encoding is selected automatically when an operand value is ≥ 256.
/// Jump targets are always encoded wide so they stay patchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Load a constant pool entry.
    /// Operands: `idx`
    Constant = 0,

    /// Instantiate a closure from a registered prototype, resolving its
    /// upvalue descriptors against the current frame.
    /// Operands: `proto`
    MakeClosure,

    /// Push the value of a frame slot.
    /// Operands: `slot`
    LoadLocal,

    /// Pop the top of stack into a frame slot.
    /// Operands: `slot`
    StoreLocal,

    /// Push the value `depth` slots below the top of stack.
    /// Operands: `depth`
    BackLoad,

    /// Pop the top of stack into the slot `depth` below the new top.
    /// Operands: `depth`
    BackStore,

    /// Push the value of an upvalue, reading through its hook.
    /// Operands: `idx`
    LoadUpvalue,

    /// Pop the top of stack into an upvalue, writing through its hook.
    /// Operands: `idx`
    StoreUpvalue,

    /// Open a hook aliasing the given frame slot.
    /// Operands: `slot`
    OpenHook,

    /// Unconditional jump to an absolute byte offset. Always wide.
    /// Operands: `target`
    Jump,

    /// Jump to an absolute byte offset if the popped value is falsy.
    /// Always wide.
    /// Operands: `target`
    JumpIfFalse,

    /// Return `count` explicitly pushed values plus any pending splice.
    /// Operands: `count`
    Return,

    /// Push vararg values: `count` of them Nil-padded, or all of them
    /// (marking a pending splice) when `count` is 0.
    /// Operands: `count`
    Vararg,

    /// Drop `count` values from the top of stack.
    /// Operands: `count`
    Pop,

    /// Append every stack value from slot `start` upward into the table
    /// sitting just below `start`, as elements 1..n.
    /// Operands: `start`
    TableList,

    /// Call the value below the argument block with `argc` arguments
    /// (plus any pending splice), requesting `retc` results (0 = all).
    /// Operands: `argc`, `retc`
    Call,

    Add = 16,
    Sub,
    Mul,
    Div,
    Concat,
    Neg,
    Not,

    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,

    /// Push a fresh empty table.
    NewTable,
    /// Pop key and table, push `table[key]`.
    TableGet,
    /// Pop value, key and table, store `table[key] = value`.
    TableSet,

    /// Pop a key, push the global bound to it (Nil when unbound).
    GetGlobal,
    /// Pop value then key, bind the global.
    SetGlobal,

    PushNil,
    PushTrue,
    PushFalse,

    /// Close the most recently opened hook, detaching it with a snapshot
    /// of its aliased slot.
    CloseHook,
}

/// Operand-carrying opcode ids must fit in bits 2..7 of the packed byte.
const MAX_OPERAND_OP: u8 = 15;

impl Op {
    pub const COUNT: usize = Op::CloseHook as usize + 1;

    /// Number of operands this opcode carries (0, 1 or 2).
    pub const fn operand_count(self) -> usize {
        match self {
            Op::Call => 2,
            op if (op as u8) <= MAX_OPERAND_OP => 1,
            _ => 0,
        }
    }

    /// Whether this opcode's first operand is always encoded wide
    /// (jump targets must stay patchable).
    pub const fn forces_wide(self) -> bool {
        matches!(self, Op::Jump | Op::JumpIfFalse)
    }

    /// Pack this opcode and its operand width flags into the leading
    /// instruction byte.
    pub(crate) fn pack(self, wide0: bool, wide1: bool) -> u8 {
        debug_assert!(self.operand_count() > 0, "pack on zero-operand {self:?}");
        0x80 | ((self as u8) << 2) | (wide0 as u8) | ((wide1 as u8) << 1)
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
