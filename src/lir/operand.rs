//! LIR operands: virtual registers before allocation, concrete locations after.

use crate::core::register_file::AsmReg;
use crate::ir::StampKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualReg(pub u32);

impl VirtualReg {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VirtualReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Role of an operand within one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandMode {
    /// Written by the instruction.
    Def,
    /// Read at the start of the instruction; its storage may be reused for a def.
    Use,
    /// Read and must stay intact until the instruction has completely finished.
    Alive,
    /// Scratch storage clobbered by the instruction.
    Temp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Virtual(VirtualReg, StampKind),
    Register(AsmReg, StampKind),
    /// Frame slot at `[rbp + offset]`.
    StackSlot(i32, StampKind),
    Immediate(i64),
}

/// Storage a concrete value occupies, ignoring its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Register(AsmReg),
    StackSlot(i32),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(reg) => write!(f, "{reg}"),
            Location::StackSlot(offset) => write!(f, "stack[{offset}]"),
        }
    }
}

impl Value {
    pub fn is_virtual(&self) -> bool {
        matches!(self, Value::Virtual(..))
    }

    pub fn is_concrete(&self) -> bool {
        !self.is_virtual()
    }

    /// Kind of the value; immediates are 64-bit.
    pub fn kind(&self) -> StampKind {
        match *self {
            Value::Virtual(_, kind) | Value::Register(_, kind) | Value::StackSlot(_, kind) => kind,
            Value::Immediate(_) => StampKind::Int64,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match *self {
            Value::Register(reg, _) => Some(Location::Register(reg)),
            Value::StackSlot(offset, _) => Some(Location::StackSlot(offset)),
            Value::Virtual(..) | Value::Immediate(_) => None,
        }
    }

    pub fn as_register(&self) -> Option<AsmReg> {
        match *self {
            Value::Register(reg, _) => Some(reg),
            _ => None,
        }
    }

    pub fn as_immediate(&self) -> Option<i64> {
        match *self {
            Value::Immediate(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Virtual(vreg, kind) => write!(f, "{vreg}:{}", kind.name()),
            Value::Register(reg, kind) => write!(f, "{reg}:{}", kind.name()),
            Value::StackSlot(offset, kind) => write!(f, "stack[{offset}]:{}", kind.name()),
            Value::Immediate(value) => write!(f, "#{value}"),
        }
    }
}
