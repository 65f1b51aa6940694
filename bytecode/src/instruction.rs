use core::fmt;

/// A decoded instruction with all operands widened to `u16`,
/// regardless of whether the encoded form was narrow or wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Constant {
        idx: u16,
    },
    MakeClosure {
        proto: u16,
    },
    LoadLocal {
        slot: u16,
    },
    StoreLocal {
        slot: u16,
    },
    BackLoad {
        depth: u16,
    },
    BackStore {
        depth: u16,
    },
    LoadUpvalue {
        idx: u16,
    },
    StoreUpvalue {
        idx: u16,
    },
    OpenHook {
        slot: u16,
    },
    Jump {
        target: u16,
    },
    JumpIfFalse {
        target: u16,
    },
    Return {
        count: u16,
    },
    Vararg {
        count: u16,
    },
    Pop {
        count: u16,
    },
    TableList {
        start: u16,
    },
    Call {
        argc: u16,
        retc: u16,
    },
    Add,
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
    NewTable,
    TableGet,
    TableSet,
    GetGlobal,
    SetGlobal,
    PushNil,
    PushTrue,
    PushFalse,
    CloseHook,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { idx } => write!(f, "Constant #{idx}"),
            Self::MakeClosure { proto } => write!(f, "MakeClosure fn{proto}"),
            Self::LoadLocal { slot } => write!(f, "LoadLocal s{slot}"),
            Self::StoreLocal { slot } => write!(f, "StoreLocal s{slot}"),
            Self::BackLoad { depth } => write!(f, "BackLoad -{depth}"),
            Self::BackStore { depth } => write!(f, "BackStore -{depth}"),
            Self::LoadUpvalue { idx } => write!(f, "LoadUpvalue u{idx}"),
            Self::StoreUpvalue { idx } => write!(f, "StoreUpvalue u{idx}"),
            Self::OpenHook { slot } => write!(f, "OpenHook s{slot}"),
            Self::Jump { target } => write!(f, "Jump @{target}"),
            Self::JumpIfFalse { target } => write!(f, "JumpIfFalse @{target}"),
            Self::Return { count } => write!(f, "Return {count}"),
            Self::Vararg { count } => write!(f, "Vararg {count}"),
            Self::Pop { count } => write!(f, "Pop {count}"),
            Self::TableList { start } => write!(f, "TableList s{start}"),
            Self::Call { argc, retc } => write!(f, "Call {argc} {retc}"),
            Self::Add => write!(f, "Add"),
            Self::Sub => write!(f, "Sub"),
            Self::Mul => write!(f, "Mul"),
            Self::Div => write!(f, "Div"),
            Self::Concat => write!(f, "Concat"),
            Self::Neg => write!(f, "Neg"),
            Self::Not => write!(f, "Not"),
            Self::Lt => write!(f, "Lt"),
            Self::Le => write!(f, "Le"),
            Self::Gt => write!(f, "Gt"),
            Self::Ge => write!(f, "Ge"),
            Self::Eq => write!(f, "Eq"),
            Self::Ne => write!(f, "Ne"),
            Self::NewTable => write!(f, "NewTable"),
            Self::TableGet => write!(f, "TableGet"),
            Self::TableSet => write!(f, "TableSet"),
            Self::GetGlobal => write!(f, "GetGlobal"),
            Self::SetGlobal => write!(f, "SetGlobal"),
            Self::PushNil => write!(f, "PushNil"),
            Self::PushTrue => write!(f, "PushTrue"),
            Self::PushFalse => write!(f, "PushFalse"),
            Self::CloseHook => write!(f, "CloseHook"),
        }
    }
}
