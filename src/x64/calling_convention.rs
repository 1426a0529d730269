// This module implements the integer part of the System V AMD64 calling convention used by
// compiled graphs. Graph parameters are integers or pointers, so every argument lives in the
// general purpose bank: the first six are passed in RDI, RSI, RDX, RCX, R8 and R9 and the
// rest on the caller's stack in 8-byte slots, which the callee addresses above its saved
// frame pointer and return address. The return value is placed in RAX. RBX and R12-R15 are
// callee-saved, so a function that allocates them must save and restore them around its body.

//! System V x86-64 calling convention for integer arguments.

use super::{R12, R13, R14, R15, R8, R9, RAX, RBX, RCX, RDI, RDX, RSI, RSP, RBP};
use crate::core::register_file::{AsmReg, RegBitSet, GP_BANK};
use crate::ir::StampKind;

/// Distance from the frame pointer to the first stack argument
/// (saved RBP plus return address).
pub const STACK_ARGS_OFFSET: i32 = 16;

/// Where the calling convention puts one argument or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CCAssignment {
    pub kind: StampKind,
    /// Assigned register (if any).
    pub reg: Option<AsmReg>,
    /// Frame-pointer relative offset (if passed on the stack).
    pub stack_off: Option<i32>,
}

impl CCAssignment {
    pub fn new(kind: StampKind) -> Self {
        Self {
            kind,
            reg: None,
            stack_off: None,
        }
    }
}

/// Information about a calling convention.
#[derive(Debug, Clone)]
pub struct CCInfo {
    /// Registers available for allocation.
    pub allocatable_regs: RegBitSet,
    /// Registers that must be preserved by callee.
    pub callee_saved_regs: RegBitSet,
    /// Registers used for argument passing.
    pub arg_regs: RegBitSet,
}

/// Trait for calling convention argument assignment.
pub trait CCAssigner {
    fn get_ccinfo(&self) -> &CCInfo;

    fn assign_arg(&mut self, arg: &mut CCAssignment);

    fn assign_ret(&mut self, ret: &mut CCAssignment);

    /// Reset state for a new function.
    fn reset(&mut self);

    /// Bytes of caller stack used by the arguments assigned so far.
    fn get_stack_size(&self) -> u32;
}

/// System V x86-64 calling convention assigner.
pub struct SysVAssigner {
    cc_info: CCInfo,
    gp_cnt: usize,
    stack: u32,
}

impl Default for SysVAssigner {
    fn default() -> Self {
        let mut allocatable = RegBitSet::new();
        for id in 0..16 {
            let reg = AsmReg::new(GP_BANK, id);
            if reg != RSP && reg != RBP {
                allocatable.set(reg);
            }
        }
        let cc_info = CCInfo {
            allocatable_regs: allocatable,
            callee_saved_regs: RegBitSet::from_regs(&Self::CALLEE_SAVED),
            arg_regs: RegBitSet::from_regs(&Self::GP_ARG_REGS),
        };
        Self {
            cc_info,
            gp_cnt: 0,
            stack: 0,
        }
    }
}

impl SysVAssigner {
    pub const GP_ARG_REGS: [AsmReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

    pub const CALLEE_SAVED: [AsmReg; 5] = [RBX, R12, R13, R14, R15];

    pub const RET_REG: AsmReg = RAX;

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of GP argument registers used so far.
    pub fn gp_used(&self) -> usize {
        self.gp_cnt
    }

    pub fn is_callee_saved(&self, reg: AsmReg) -> bool {
        self.cc_info.callee_saved_regs.contains(reg)
    }
}

impl CCAssigner for SysVAssigner {
    fn get_ccinfo(&self) -> &CCInfo {
        &self.cc_info
    }

    fn assign_arg(&mut self, arg: &mut CCAssignment) {
        if let Some(&reg) = Self::GP_ARG_REGS.get(self.gp_cnt) {
            arg.reg = Some(reg);
            self.gp_cnt += 1;
        } else {
            // Each stack slot is 8 bytes, whatever the argument width.
            arg.stack_off = Some(STACK_ARGS_OFFSET + self.stack as i32);
            self.stack += 8;
        }
    }

    fn assign_ret(&mut self, ret: &mut CCAssignment) {
        ret.reg = Some(Self::RET_REG);
    }

    fn reset(&mut self) {
        self.gp_cnt = 0;
        self.stack = 0;
    }

    fn get_stack_size(&self) -> u32 {
        self.stack
    }
}
