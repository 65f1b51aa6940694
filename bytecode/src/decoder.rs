use crate::instruction::Instruction;
use crate::op::Op;

/// Decodes a bytecode byte slice into [`Instruction`]s.
///
/// Decoding is the exact left inverse of [`BytecodeBuilder`]: for any
/// instruction the builder emits, the decoder reproduces it and consumes
/// exactly the emitted bytes. Malformed bytecode (an unknown opcode byte
/// or a truncated stream) is not a recoverable condition and panics.
///
/// [`BytecodeBuilder`]: crate::BytecodeBuilder
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `None` at end-of-stream.
    #[inline(always)]
    pub fn decode_next(&mut self) -> Option<Instruction> {
        if self.is_at_end() {
            return None;
        }
        Some(self.decode())
    }

    #[inline(always)]
    fn decode(&mut self) -> Instruction {
        let byte = self.read_u8();

        if byte & 0x80 == 0 {
            let op = Op::try_from(byte)
                .unwrap_or_else(|b| panic!("invalid opcode byte 0x{b:02x}"));
            return Self::plain(op);
        }

        let op = Op::try_from((byte >> 2) & 0x1f)
            .unwrap_or_else(|b| panic!("invalid opcode byte 0x{byte:02x} (id {b})"));
        let wide0 = byte & 0x01 != 0;
        let wide1 = byte & 0x02 != 0;

        match op {
            Op::Constant => Instruction::Constant { idx: self.read_operand(wide0) },
            Op::MakeClosure => Instruction::MakeClosure { proto: self.read_operand(wide0) },
            Op::LoadLocal => Instruction::LoadLocal { slot: self.read_operand(wide0) },
            Op::StoreLocal => Instruction::StoreLocal { slot: self.read_operand(wide0) },
            Op::BackLoad => Instruction::BackLoad { depth: self.read_operand(wide0) },
            Op::BackStore => Instruction::BackStore { depth: self.read_operand(wide0) },
            Op::LoadUpvalue => Instruction::LoadUpvalue { idx: self.read_operand(wide0) },
            Op::StoreUpvalue => Instruction::StoreUpvalue { idx: self.read_operand(wide0) },
            Op::OpenHook => Instruction::OpenHook { slot: self.read_operand(wide0) },
            Op::Jump => Instruction::Jump { target: self.read_operand(wide0) },
            Op::JumpIfFalse => Instruction::JumpIfFalse { target: self.read_operand(wide0) },
            Op::Return => Instruction::Return { count: self.read_operand(wide0) },
            Op::Vararg => Instruction::Vararg { count: self.read_operand(wide0) },
            Op::Pop => Instruction::Pop { count: self.read_operand(wide0) },
            Op::TableList => Instruction::TableList { start: self.read_operand(wide0) },
            Op::Call => {
                let argc = self.read_operand(wide0);
                let retc = self.read_operand(wide1);
                Instruction::Call { argc, retc }
            }
            other => panic!("opcode {other:?} encoded with operand flags"),
        }
    }

    fn plain(op: Op) -> Instruction {
        match op {
            Op::Add => Instruction::Add,
            Op::Sub => Instruction::Sub,
            Op::Mul => Instruction::Mul,
            Op::Div => Instruction::Div,
            Op::Concat => Instruction::Concat,
            Op::Neg => Instruction::Neg,
            Op::Not => Instruction::Not,
            Op::Lt => Instruction::Lt,
            Op::Le => Instruction::Le,
            Op::Gt => Instruction::Gt,
            Op::Ge => Instruction::Ge,
            Op::Eq => Instruction::Eq,
            Op::Ne => Instruction::Ne,
            Op::NewTable => Instruction::NewTable,
            Op::TableGet => Instruction::TableGet,
            Op::TableSet => Instruction::TableSet,
            Op::GetGlobal => Instruction::GetGlobal,
            Op::SetGlobal => Instruction::SetGlobal,
            Op::PushNil => Instruction::PushNil,
            Op::PushTrue => Instruction::PushTrue,
            Op::PushFalse => Instruction::PushFalse,
            Op::CloseHook => Instruction::CloseHook,
            other => panic!("opcode {other:?} encoded without its operands"),
        }
    }

    #[inline(always)]
    fn read_u8(&mut self) -> u8 {
        let v = self.bytes[self.pos];
        self.pos += 1;
        v
    }

    #[inline(always)]
    fn read_operand(&mut self, wide: bool) -> u16 {
        if wide {
            let v = u16::from_le_bytes([
                self.bytes[self.pos],
                self.bytes[self.pos + 1],
            ]);
            self.pos += 2;
            v
        } else {
            self.read_u8() as u16
        }
    }
}

impl<'a> Iterator for BytecodeDecoder<'a> {
    type Item = Instruction;

    #[inline(always)]
    fn next(&mut self) -> Option<Instruction> {
        self.decode_next()
    }
}
