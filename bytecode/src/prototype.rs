//! Function prototypes and the nested assembler that builds them.

use std::rc::Rc;

use crate::builder::BytecodeBuilder;

/// A load-time constant. The constant pool stays independent of the
/// runtime value representation.
#[derive(Debug, Clone)]
pub enum Constant {
    Number(f64),
    Str(String),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

/// Identifies a captured variable's origin: which prototype owns it,
/// which stack slot it lives in there, and which slot of the owner's
/// hook table represents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub owner: u32,
    pub slot: u16,
    pub hook: u16,
}

/// The compiled, immutable representation of one function.
#[derive(Debug)]
pub struct Prototype {
    /// Numeric identity, the index in the [`ProtoRegistry`].
    pub id: u32,
    /// Number of declared parameters.
    pub params: u16,
    /// Maximum number of simultaneously open hooks.
    pub hook_max: u16,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalueDesc>,
    pub code: Vec<u8>,
}

/// Finalized prototypes, indexed by id.
#[derive(Debug, Default)]
pub struct ProtoRegistry {
    protos: Vec<Rc<Prototype>>,
}

impl ProtoRegistry {
    pub fn from_protos(protos: Vec<Rc<Prototype>>) -> Self {
        Self { protos }
    }

    pub fn get(&self, id: u32) -> Option<&Rc<Prototype>> {
        self.protos.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.protos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Prototype>> {
        self.protos.iter()
    }
}

/// One function under assembly.
struct FunctionBuilder {
    id: u32,
    code: BytecodeBuilder,
    constants: Vec<Constant>,
    upvalues: Vec<UpvalueDesc>,
    params: u16,
    hook_max: u16,
}

/// Drives nested, recursive prototype assembly.
///
/// The code emitter opens one builder per function literal with
/// [`begin_function`](Self::begin_function); nested literals push further
/// builders onto an explicit stack. [`end_function`](Self::end_function)
/// finalizes the innermost builder into an immutable [`Prototype`],
/// registers it under its reserved id, and re-exports into the enclosing
/// builder every upvalue descriptor the enclosing function cannot resolve
/// from its own hook table. Closure creation at run time then resolves
/// captures in O(nesting depth) without re-walking the call stack.
pub struct Assembler {
    protos: Vec<Option<Rc<Prototype>>>,
    stack: Vec<FunctionBuilder>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            protos: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Open a new function under assembly and reserve its prototype id.
    pub fn begin_function(&mut self) -> u32 {
        let id = self.protos.len() as u32;
        self.protos.push(None);
        self.stack.push(FunctionBuilder {
            id,
            code: BytecodeBuilder::new(),
            constants: Vec::new(),
            upvalues: Vec::new(),
            params: 0,
            hook_max: 0,
        });
        id
    }

    /// The bytecode builder of the innermost open function.
    pub fn code(&mut self) -> &mut BytecodeBuilder {
        &mut self.current().code
    }

    /// Add a constant to the innermost pool, deduplicating, and return
    /// its index.
    pub fn add_constant(&mut self, constant: Constant) -> u16 {
        let pool = &mut self.current().constants;
        if let Some(idx) = pool.iter().position(|c| *c == constant) {
            return idx as u16;
        }
        let idx = pool.len() as u16;
        pool.push(constant);
        idx
    }

    /// Add an upvalue descriptor to the innermost function, deduplicating,
    /// and return its index.
    pub fn add_upvalue(&mut self, desc: UpvalueDesc) -> u16 {
        Self::push_upvalue(&mut self.current().upvalues, desc)
    }

    pub fn set_params(&mut self, params: u16) {
        self.current().params = params;
    }

    pub fn set_hook_max(&mut self, hook_max: u16) {
        self.current().hook_max = hook_max;
    }

    /// Finalize the innermost function into a registered [`Prototype`]
    /// and return its id.
    pub fn end_function(&mut self) -> u32 {
        let fb = self
            .stack
            .pop()
            .unwrap_or_else(|| panic!("end_function without begin_function"));

        // Re-export descriptors the parent cannot resolve directly, so a
        // grandchild capture is reachable from every intermediate level.
        if let Some(parent) = self.stack.last_mut() {
            for desc in &fb.upvalues {
                if desc.owner != parent.id {
                    Self::push_upvalue(&mut parent.upvalues, *desc);
                }
            }
        }

        let id = fb.id;
        self.protos[id as usize] = Some(Rc::new(Prototype {
            id,
            params: fb.params,
            hook_max: fb.hook_max,
            constants: fb.constants,
            upvalues: fb.upvalues,
            code: fb.code.into_bytes(),
        }));
        id
    }

    /// Finish assembly, yielding the registry of all finalized prototypes.
    pub fn finish(self) -> ProtoRegistry {
        assert!(
            self.stack.is_empty(),
            "finish with {} unfinalized function(s)",
            self.stack.len()
        );
        let protos = self
            .protos
            .into_iter()
            .map(|p| p.unwrap_or_else(|| unreachable!("reserved id never finalized")))
            .collect();
        ProtoRegistry::from_protos(protos)
    }

    fn current(&mut self) -> &mut FunctionBuilder {
        self.stack
            .last_mut()
            .unwrap_or_else(|| panic!("no function under assembly"))
    }

    fn push_upvalue(upvalues: &mut Vec<UpvalueDesc>, desc: UpvalueDesc) -> u16 {
        if let Some(idx) = upvalues.iter().position(|d| *d == desc) {
            return idx as u16;
        }
        let idx = upvalues.len() as u16;
        upvalues.push(desc);
        idx
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_deduplicate() {
        let mut asm = Assembler::new();
        asm.begin_function();
        let a = asm.add_constant(Constant::Number(1.0));
        let b = asm.add_constant(Constant::Str("x".into()));
        let c = asm.add_constant(Constant::Number(1.0));
        assert_eq!(a, c);
        assert_ne!(a, b);
        asm.code().return_(0);
        asm.end_function();
        let registry = asm.finish();
        assert_eq!(registry.get(0).unwrap().constants.len(), 2);
    }

    #[test]
    fn ids_reserved_in_begin_order() {
        let mut asm = Assembler::new();
        let outer = asm.begin_function();
        let inner = asm.begin_function();
        assert_eq!((outer, inner), (0, 1));
        assert_eq!(asm.end_function(), inner);
        assert_eq!(asm.end_function(), outer);
        assert_eq!(asm.finish().len(), 2);
    }

    #[test]
    fn grandchild_capture_re_exported_to_middle_only() {
        let mut asm = Assembler::new();
        let outer = asm.begin_function();
        let middle = asm.begin_function();
        asm.begin_function();
        let desc = UpvalueDesc {
            owner: outer,
            slot: 0,
            hook: 0,
        };
        asm.add_upvalue(desc);
        asm.code().return_(0);
        asm.end_function();
        asm.code().return_(0);
        asm.end_function();
        asm.code().return_(0);
        asm.end_function();

        let registry = asm.finish();
        // The middle function inherited the descriptor it has to forward.
        assert_eq!(registry.get(middle).unwrap().upvalues, vec![desc]);
        // The outer function resolves it from its own hook table instead.
        assert!(registry.get(outer).unwrap().upvalues.is_empty());
    }

    #[test]
    #[should_panic(expected = "unfinalized")]
    fn finish_rejects_open_function() {
        let mut asm = Assembler::new();
        asm.begin_function();
        asm.finish();
    }
}
