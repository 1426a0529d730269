//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - Instruction encoding on top of the label [`Assembler`](crate::asm::Assembler), using iced-x86
//! - The branch patcher for forward references
//! - LIR instructions and the lowering/allocation backend
//! - System V calling convention

pub mod backend;
pub mod calling_convention;
pub mod encoder;
pub mod lir_ops;
pub mod patcher;

pub use backend::X64Backend;
pub use calling_convention::{CCInfo, SysVAssigner};
pub use encoder::{AluOp, Condition, OperandSize, X64Encoder};
pub use patcher::X64JumpPatcher;

use crate::core::register_file::AsmReg;

pub const RAX: AsmReg = AsmReg::gp(0);
pub const RCX: AsmReg = AsmReg::gp(1);
pub const RDX: AsmReg = AsmReg::gp(2);
pub const RBX: AsmReg = AsmReg::gp(3);
pub const RSP: AsmReg = AsmReg::gp(4);
pub const RBP: AsmReg = AsmReg::gp(5);
pub const RSI: AsmReg = AsmReg::gp(6);
pub const RDI: AsmReg = AsmReg::gp(7);
pub const R8: AsmReg = AsmReg::gp(8);
pub const R9: AsmReg = AsmReg::gp(9);
pub const R10: AsmReg = AsmReg::gp(10);
pub const R11: AsmReg = AsmReg::gp(11);
pub const R12: AsmReg = AsmReg::gp(12);
pub const R13: AsmReg = AsmReg::gp(13);
pub const R14: AsmReg = AsmReg::gp(14);
pub const R15: AsmReg = AsmReg::gp(15);

const GP_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

/// Assembly name of a 64-bit general purpose register.
pub fn register_name(reg: AsmReg) -> Option<&'static str> {
    if reg.bank != 0 {
        return None;
    }
    GP_NAMES.get(reg.id as usize).copied()
}
