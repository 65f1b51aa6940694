mod builder;
mod decoder;
mod instruction;
mod op;

pub mod image;
pub mod prototype;

pub use builder::{BytecodeBuilder, Label};
pub use image::{load_image, save_image};
pub use decoder::BytecodeDecoder;
pub use instruction::Instruction;
pub use op::Op;
pub use prototype::{Assembler, Constant, ProtoRegistry, Prototype, UpvalueDesc};

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes).collect()
    }

    #[test]
    fn round_trip_narrow() {
        let mut b = BytecodeBuilder::new();
        b.load_constant(42);
        b.make_closure(3);
        b.load_local(5);
        b.store_local(10);
        b.back_load(0);
        b.back_store(2);
        b.load_upvalue(1);
        b.store_upvalue(1);
        b.open_hook(4);
        b.close_hook();
        b.call(2, 1);
        b.return_(1);
        b.vararg(0);
        b.pop(3);
        b.table_list(2);

        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::Constant { idx: 42 },
            Instruction::MakeClosure { proto: 3 },
            Instruction::LoadLocal { slot: 5 },
            Instruction::StoreLocal { slot: 10 },
            Instruction::BackLoad { depth: 0 },
            Instruction::BackStore { depth: 2 },
            Instruction::LoadUpvalue { idx: 1 },
            Instruction::StoreUpvalue { idx: 1 },
            Instruction::OpenHook { slot: 4 },
            Instruction::CloseHook,
            Instruction::Call { argc: 2, retc: 1 },
            Instruction::Return { count: 1 },
            Instruction::Vararg { count: 0 },
            Instruction::Pop { count: 3 },
            Instruction::TableList { start: 2 },
        ]);
    }

    #[test]
    fn round_trip_wide() {
        let mut b = BytecodeBuilder::new();
        b.load_constant(300);
        b.load_local(1000);
        b.store_local(65535);
        b.make_closure(4096);

        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::Constant { idx: 300 },
            Instruction::LoadLocal { slot: 1000 },
            Instruction::StoreLocal { slot: 65535 },
            Instruction::MakeClosure { proto: 4096 },
        ]);
    }

    #[test]
    fn round_trip_zero_operand() {
        let mut b = BytecodeBuilder::new();
        b.add();
        b.sub();
        b.mul();
        b.div();
        b.concat();
        b.neg();
        b.not();
        b.lt();
        b.le();
        b.gt();
        b.ge();
        b.eq();
        b.ne();
        b.new_table();
        b.table_get();
        b.table_set();
        b.get_global();
        b.set_global();
        b.push_nil();
        b.push_true();
        b.push_false();

        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::Add,
            Instruction::Sub,
            Instruction::Mul,
            Instruction::Div,
            Instruction::Concat,
            Instruction::Neg,
            Instruction::Not,
            Instruction::Lt,
            Instruction::Le,
            Instruction::Gt,
            Instruction::Ge,
            Instruction::Eq,
            Instruction::Ne,
            Instruction::NewTable,
            Instruction::TableGet,
            Instruction::TableSet,
            Instruction::GetGlobal,
            Instruction::SetGlobal,
            Instruction::PushNil,
            Instruction::PushTrue,
            Instruction::PushFalse,
        ]);
    }

    #[test]
    fn const_300_takes_three_bytes() {
        let mut b = BytecodeBuilder::new();
        b.load_constant(300);
        assert_eq!(b.as_bytes().len(), 3);

        let mut dec = BytecodeDecoder::new(b.as_bytes());
        assert_eq!(dec.decode_next(), Some(Instruction::Constant { idx: 300 }));
        assert_eq!(dec.offset(), 3);
        assert!(dec.is_at_end());
    }

    #[test]
    fn narrow_boundary_at_255() {
        let mut b = BytecodeBuilder::new();
        b.load_local(255);
        assert_eq!(b.as_bytes().len(), 2);

        let mut b = BytecodeBuilder::new();
        b.load_local(256);
        assert_eq!(b.as_bytes().len(), 3);
    }

    #[test]
    fn call_width_flags_are_independent() {
        let mut b = BytecodeBuilder::new();
        b.call(2, 300);
        b.call(300, 2);
        b.call(1, 1);
        b.call(400, 500);
        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::Call { argc: 2, retc: 300 },
            Instruction::Call { argc: 300, retc: 2 },
            Instruction::Call { argc: 1, retc: 1 },
            Instruction::Call { argc: 400, retc: 500 },
        ]);
        // narrow+wide, wide+narrow, narrow+narrow, wide+wide
        assert_eq!(b.as_bytes().len(), 4 + 4 + 3 + 5);
    }

    #[test]
    fn jump_targets_always_wide() {
        let mut b = BytecodeBuilder::new();
        b.jump_to(3);
        b.jump_if_false_to(0);
        assert_eq!(b.as_bytes().len(), 6);
        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::Jump { target: 3 },
            Instruction::JumpIfFalse { target: 0 },
        ]);
    }

    #[test]
    fn forward_jump_binds_to_current_offset() {
        let mut b = BytecodeBuilder::new();
        b.push_true();
        let label = b.jump_if_false();
        b.load_constant(1);
        let end = b.current_offset() as u16;
        b.bind(label);
        b.return_(1);

        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::PushTrue,
            Instruction::JumpIfFalse { target: end },
            Instruction::Constant { idx: 1 },
            Instruction::Return { count: 1 },
        ]);
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        let top = b.current_offset();
        b.load_local(0);
        b.jump_to(top);
        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::LoadLocal { slot: 0 },
            Instruction::Jump { target: 0 },
        ]);
    }

    #[test]
    fn patch_rewrites_wide_operand() {
        let mut b = BytecodeBuilder::new();
        let label = b.jump();
        b.bind(label);
        b.patch(1, 777);
        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::Jump { target: 777 },
        ]);
    }

    #[test]
    #[should_panic(expected = "non-jump operand")]
    fn patch_rejects_narrow_operand() {
        let mut b = BytecodeBuilder::new();
        b.load_local(5);
        b.patch(1, 777);
    }

    #[test]
    #[should_panic(expected = "non-jump operand")]
    fn patch_rejects_a_call_operand() {
        // Call <argc> <retc> with a wide second operand: the byte in
        // front of that slot is the argc payload, not the packed byte.
        let mut b = BytecodeBuilder::new();
        b.call(1, 300);
        b.patch(2, 777);
    }

    #[test]
    #[should_panic(expected = "addressable range")]
    fn jump_past_the_addressable_range_is_fatal() {
        let mut b = BytecodeBuilder::new();
        b.jump_to(u16::MAX as usize + 1);
    }

    #[test]
    #[should_panic(expected = "addressable range")]
    fn bind_past_the_addressable_range_is_fatal() {
        let mut b = BytecodeBuilder::new();
        let label = b.jump();
        for _ in 0..=u16::MAX as usize {
            b.pop(1);
        }
        b.bind(label);
    }

    #[test]
    #[should_panic(expected = "invalid opcode")]
    fn unknown_opcode_is_fatal() {
        let bytes = [0x7f];
        let _ = decode_all(&bytes);
    }

    #[test]
    fn display_instructions() {
        assert_eq!(Instruction::Constant { idx: 3 }.to_string(), "Constant #3");
        assert_eq!(
            Instruction::MakeClosure { proto: 2 }.to_string(),
            "MakeClosure fn2"
        );
        assert_eq!(
            Instruction::Call { argc: 2, retc: 0 }.to_string(),
            "Call 2 0"
        );
        assert_eq!(Instruction::Jump { target: 12 }.to_string(), "Jump @12");
        assert_eq!(Instruction::Add.to_string(), "Add");
    }
}
