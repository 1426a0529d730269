// This module provides x86-64 instruction encoding for the kelp backend. X64Encoder owns the
// label Assembler (and through it the code Buffer) and converts AsmReg register references
// into machine code. Ordinary instructions are built with iced-x86's CodeAssembler: each call
// assembles the single instruction at the current buffer position and appends the bytes to the
// Buffer, so the Buffer is the only home of emitted code. Branches to kelp labels are encoded
// by hand so the label protocol can patch them: a branch to a bound label gets its final
// displacement immediately (the two-byte short form when it fits), a branch to an unbound label
// emits the rel32 form with a zero displacement and records the site with the assembler, which
// rewrites it through X64JumpPatcher when the label is bound. The encoder supports 32-bit and
// 64-bit variants of moves, ALU operations and comparisons, memory operands with base, index
// and displacement, condition materialisation with SETcc, jump-table entries, NOP alignment
// padding and the System V style frame prologue/epilogue.

//! x86-64 instruction encoding using iced-x86 on top of the label assembler.

use super::patcher::{X64JumpPatcher, JUMP_TABLE_MARKER};
use super::{RBP, RSP};
use crate::asm::{Assembler, Buffer, ByteOrder, LabelId};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::AsmReg;
use crate::ir::StampKind;
use crate::lir::LirAssembler;
use iced_x86::code_asm::*;
use iced_x86::IcedError;

/// Width of an integer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSize {
    S32,
    S64,
}

impl OperandSize {
    pub fn of(kind: StampKind) -> CompileResult<Self> {
        match kind {
            StampKind::Int32 => Ok(OperandSize::S32),
            StampKind::Int64 | StampKind::Pointer => Ok(OperandSize::S64),
            StampKind::Void => Err(CompileError::Encoding {
                reason: "void values have no register size".to_string(),
            }),
        }
    }
}

/// Two-operand integer operations of the form `dst = dst op src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Imul,
    Cmp,
}

/// x86 condition codes, numbered as in the Jcc/SETcc encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Condition {
    Overflow = 0x0,
    NoOverflow = 0x1,
    Below = 0x2,
    AboveEqual = 0x3,
    Equal = 0x4,
    NotEqual = 0x5,
    BelowEqual = 0x6,
    Above = 0x7,
    Sign = 0x8,
    NoSign = 0x9,
    Parity = 0xA,
    NoParity = 0xB,
    Less = 0xC,
    GreaterEqual = 0xD,
    LessEqual = 0xE,
    Greater = 0xF,
}

impl Condition {
    const ALL: [Condition; 16] = [
        Condition::Overflow,
        Condition::NoOverflow,
        Condition::Below,
        Condition::AboveEqual,
        Condition::Equal,
        Condition::NotEqual,
        Condition::BelowEqual,
        Condition::Above,
        Condition::Sign,
        Condition::NoSign,
        Condition::Parity,
        Condition::NoParity,
        Condition::Less,
        Condition::GreaterEqual,
        Condition::LessEqual,
        Condition::Greater,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// The condition that holds exactly when `self` does not.
    pub fn negate(self) -> Condition {
        Self::ALL[(self.code() ^ 1) as usize]
    }
}

const GP64_REGS: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi,
    r8, r9, r10, r11, r12, r13, r14, r15,
];

const GP32_REGS: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi,
    r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];

const GP8_REGS: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil,
    r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];

fn lookup<T: Copy>(table: &[T; 16], reg: AsmReg) -> CompileResult<T> {
    if reg.bank != 0 {
        return Err(CompileError::Encoding {
            reason: format!("{reg} is not a general purpose register"),
        });
    }
    table.get(reg.id as usize).copied().ok_or_else(|| CompileError::Encoding {
        reason: format!("no x86-64 register {reg}"),
    })
}

fn gp64(reg: AsmReg) -> CompileResult<AsmRegister64> {
    lookup(&GP64_REGS, reg)
}

fn gp32(reg: AsmReg) -> CompileResult<AsmRegister32> {
    lookup(&GP32_REGS, reg)
}

fn gp8(reg: AsmReg) -> CompileResult<AsmRegister8> {
    lookup(&GP8_REGS, reg)
}

fn mem(size: OperandSize, base: AsmRegister64, displacement: i32) -> AsmMemoryOperand {
    match size {
        OperandSize::S32 => dword_ptr(base + displacement),
        OperandSize::S64 => qword_ptr(base + displacement),
    }
}

fn imm32(value: i64) -> CompileResult<i32> {
    i32::try_from(value).map_err(|_| CompileError::Encoding {
        reason: format!("immediate {value} does not fit in 32 bits"),
    })
}

/// x86-64 instruction encoder writing into a label-aware [`Assembler`].
pub struct X64Encoder {
    asm: Assembler<X64JumpPatcher>,
    /// Holds the instruction being encoded until it is flushed to the buffer.
    scratch: CodeAssembler,
}

impl X64Encoder {
    pub fn new(buffer: Buffer) -> CompileResult<Self> {
        if buffer.byte_order() != ByteOrder::Little {
            return Err(CompileError::Encoding {
                reason: "x86-64 code must be little-endian".to_string(),
            });
        }
        Ok(Self {
            asm: Assembler::new(buffer, X64JumpPatcher),
            scratch: CodeAssembler::new(64)?,
        })
    }

    pub fn with_capacity(capacity: usize) -> CompileResult<Self> {
        Self::new(Buffer::new(capacity, ByteOrder::Little))
    }

    pub fn position(&self) -> usize {
        self.asm.position()
    }

    pub fn assembler(&self) -> &Assembler<X64JumpPatcher> {
        &self.asm
    }

    pub fn assembler_mut(&mut self) -> &mut Assembler<X64JumpPatcher> {
        &mut self.asm
    }

    /// Bytes emitted so far.
    pub fn code(&self) -> &[u8] {
        self.asm.buffer().bytes()
    }

    /// Encode whatever `build` adds to the scratch assembler at the current
    /// position and append it to the buffer.
    fn emit_with(
        &mut self,
        build: impl FnOnce(&mut CodeAssembler) -> Result<(), IcedError>,
    ) -> CompileResult<()> {
        self.scratch.reset();
        build(&mut self.scratch)?;
        let position = self.asm.position() as u64;
        let bytes = self.scratch.assemble(position)?;
        self.scratch.reset();
        self.asm.buffer_mut().emit_bytes(&bytes)
    }

    // ==== Labels and branches ====

    pub fn create_label(&mut self, name: &str) -> LabelId {
        self.asm.create_label(name)
    }

    /// Bind `label` at the current position, patching pending branches.
    pub fn bind(&mut self, label: LabelId) -> CompileResult<()> {
        self.asm.bind_here(label)
    }

    fn bound_target(&self, label: LabelId) -> CompileResult<Option<i64>> {
        if self.asm.is_bound(label)? {
            Ok(Some(self.asm.label_position(label)? as i64))
        } else {
            Ok(None)
        }
    }

    /// Emit `short_opcode rel8` or `near_opcode rel32` towards `label`.
    fn emit_branch(&mut self, short_opcode: &[u8], near_opcode: &[u8], label: LabelId) -> CompileResult<()> {
        let site = self.asm.position();
        match self.bound_target(label)? {
            Some(target) => {
                let short_displacement = target - (site + short_opcode.len() + 1) as i64;
                if let Ok(rel8) = i8::try_from(short_displacement) {
                    let buffer = self.asm.buffer_mut();
                    buffer.emit_bytes(short_opcode)?;
                    return buffer.emit_byte(rel8 as u8);
                }
                let displacement = target - (site + near_opcode.len() + 4) as i64;
                let rel32 = i32::try_from(displacement)
                    .map_err(|_| CompileError::BranchTargetOutOfBounds { site, displacement })?;
                let buffer = self.asm.buffer_mut();
                buffer.emit_bytes(near_opcode)?;
                buffer.emit_int(rel32)
            }
            None => {
                let buffer = self.asm.buffer_mut();
                buffer.emit_bytes(near_opcode)?;
                buffer.emit_int(0)?;
                self.asm.add_patch_at(label, site)
            }
        }
    }

    pub fn jmp(&mut self, label: LabelId) -> CompileResult<()> {
        self.emit_branch(&[0xEB], &[0xE9], label)
    }

    pub fn jcc(&mut self, condition: Condition, label: LabelId) -> CompileResult<()> {
        let cc = condition.code();
        self.emit_branch(&[0x70 | cc], &[0x0F, 0x80 | cc], label)
    }

    /// Two-byte `jmp rel8` to a label bound later within 127 bytes.
    pub fn jmp_short(&mut self, label: LabelId) -> CompileResult<()> {
        if self.asm.is_bound(label)? {
            return self.jmp(label);
        }
        let site = self.asm.position();
        self.asm.buffer_mut().emit_bytes(&[0xEB, 0x00])?;
        self.asm.add_patch_at(label, site)
    }

    /// Emit a 4-byte jump-table entry holding `label - table_base`.
    pub fn emit_jump_table_entry(&mut self, table_base: usize, label: LabelId) -> CompileResult<()> {
        let site = self.asm.position();
        if let Some(target) = self.bound_target(label)? {
            let displacement = target - table_base as i64;
            let value = i32::try_from(displacement)
                .map_err(|_| CompileError::BranchTargetOutOfBounds { site, displacement })?;
            return self.asm.buffer_mut().emit_int(value);
        }
        let offset = site
            .checked_sub(table_base)
            .and_then(|o| u16::try_from(o).ok())
            .ok_or_else(|| CompileError::Encoding {
                reason: format!("jump table entry at {site} is too far from its base {table_base}"),
            })?;
        let buffer = self.asm.buffer_mut();
        buffer.emit_byte(JUMP_TABLE_MARKER)?;
        buffer.emit_short(offset as i16)?;
        buffer.emit_byte(0)?;
        self.asm.add_patch_at(label, site)
    }

    /// Pad with NOPs up to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> CompileResult<()> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(CompileError::Encoding {
                reason: format!("alignment {alignment} is not a power of two"),
            });
        }
        let padding = (alignment - self.asm.position() % alignment) % alignment;
        let buffer = self.asm.buffer_mut();
        for _ in 0..padding {
            buffer.emit_byte(0x90)?;
        }
        Ok(())
    }

    // ==== Moves ====

    pub fn mov_rr(&mut self, size: OperandSize, dst: AsmReg, src: AsmReg) -> CompileResult<()> {
        match size {
            OperandSize::S64 => {
                let (d, s) = (gp64(dst)?, gp64(src)?);
                self.emit_with(|a| a.mov(d, s))
            }
            OperandSize::S32 => {
                let (d, s) = (gp32(dst)?, gp32(src)?);
                self.emit_with(|a| a.mov(d, s))
            }
        }
    }

    pub fn mov_ri(&mut self, size: OperandSize, dst: AsmReg, imm: i64) -> CompileResult<()> {
        match size {
            OperandSize::S64 => {
                let d = gp64(dst)?;
                self.emit_with(|a| a.mov(d, imm))
            }
            OperandSize::S32 => {
                let d = gp32(dst)?;
                self.emit_with(|a| a.mov(d, imm as i32))
            }
        }
    }

    /// Load `[base + displacement]` into `dst`.
    pub fn load(&mut self, size: OperandSize, dst: AsmReg, base: AsmReg, displacement: i32) -> CompileResult<()> {
        let operand = mem(size, gp64(base)?, displacement);
        match size {
            OperandSize::S64 => {
                let d = gp64(dst)?;
                self.emit_with(|a| a.mov(d, operand))
            }
            OperandSize::S32 => {
                let d = gp32(dst)?;
                self.emit_with(|a| a.mov(d, operand))
            }
        }
    }

    /// Store `src` to `[base + displacement]`.
    pub fn store(&mut self, size: OperandSize, base: AsmReg, displacement: i32, src: AsmReg) -> CompileResult<()> {
        let operand = mem(size, gp64(base)?, displacement);
        match size {
            OperandSize::S64 => {
                let s = gp64(src)?;
                self.emit_with(|a| a.mov(operand, s))
            }
            OperandSize::S32 => {
                let s = gp32(src)?;
                self.emit_with(|a| a.mov(operand, s))
            }
        }
    }

    /// Store a sign-extended 32-bit immediate to `[base + displacement]`.
    pub fn store_imm(&mut self, size: OperandSize, base: AsmReg, displacement: i32, imm: i64) -> CompileResult<()> {
        let operand = mem(size, gp64(base)?, displacement);
        let value = imm32(imm)?;
        self.emit_with(|a| a.mov(operand, value))
    }

    pub fn lea(&mut self, dst: AsmReg, base: AsmReg, displacement: i32) -> CompileResult<()> {
        let (d, b) = (gp64(dst)?, gp64(base)?);
        self.emit_with(|a| a.lea(d, qword_ptr(b + displacement)))
    }

    /// `lea dst, [base + index]`.
    pub fn lea_indexed(&mut self, dst: AsmReg, base: AsmReg, index: AsmReg) -> CompileResult<()> {
        let (d, b, i) = (gp64(dst)?, gp64(base)?, gp64(index)?);
        self.emit_with(|a| a.lea(d, qword_ptr(b + i)))
    }

    /// Zero-extending byte load `movzx dst32, byte [base + index]`.
    pub fn movzx_byte(&mut self, dst: AsmReg, base: AsmReg, index: AsmReg) -> CompileResult<()> {
        let (d, b, i) = (gp32(dst)?, gp64(base)?, gp64(index)?);
        self.emit_with(|a| a.movzx(d, byte_ptr(b + i)))
    }

    /// Sign-extend a 32-bit register into a 64-bit one.
    pub fn movsxd(&mut self, dst: AsmReg, src: AsmReg) -> CompileResult<()> {
        let (d, s) = (gp64(dst)?, gp32(src)?);
        self.emit_with(|a| a.movsxd(d, s))
    }

    /// `cmp byte [base + index], src8`.
    pub fn cmp_byte_mem(&mut self, base: AsmReg, index: AsmReg, src: AsmReg) -> CompileResult<()> {
        let (b, i, s) = (gp64(base)?, gp64(index)?, gp8(src)?);
        self.emit_with(|a| a.cmp(byte_ptr(b + i), s))
    }

    // ==== Arithmetic ====

    pub fn alu_rr(&mut self, op: AluOp, size: OperandSize, dst: AsmReg, src: AsmReg) -> CompileResult<()> {
        match size {
            OperandSize::S64 => {
                let (d, s) = (gp64(dst)?, gp64(src)?);
                self.emit_with(|a| match op {
                    AluOp::Add => a.add(d, s),
                    AluOp::Sub => a.sub(d, s),
                    AluOp::And => a.and(d, s),
                    AluOp::Or => a.or(d, s),
                    AluOp::Xor => a.xor(d, s),
                    AluOp::Imul => a.imul_2(d, s),
                    AluOp::Cmp => a.cmp(d, s),
                })
            }
            OperandSize::S32 => {
                let (d, s) = (gp32(dst)?, gp32(src)?);
                self.emit_with(|a| match op {
                    AluOp::Add => a.add(d, s),
                    AluOp::Sub => a.sub(d, s),
                    AluOp::And => a.and(d, s),
                    AluOp::Or => a.or(d, s),
                    AluOp::Xor => a.xor(d, s),
                    AluOp::Imul => a.imul_2(d, s),
                    AluOp::Cmp => a.cmp(d, s),
                })
            }
        }
    }

    pub fn alu_ri(&mut self, op: AluOp, size: OperandSize, dst: AsmReg, imm: i64) -> CompileResult<()> {
        let value = imm32(imm)?;
        match size {
            OperandSize::S64 => {
                let d = gp64(dst)?;
                self.emit_with(|a| match op {
                    AluOp::Add => a.add(d, value),
                    AluOp::Sub => a.sub(d, value),
                    AluOp::And => a.and(d, value),
                    AluOp::Or => a.or(d, value),
                    AluOp::Xor => a.xor(d, value),
                    AluOp::Imul => a.imul_3(d, d, value),
                    AluOp::Cmp => a.cmp(d, value),
                })
            }
            OperandSize::S32 => {
                let d = gp32(dst)?;
                self.emit_with(|a| match op {
                    AluOp::Add => a.add(d, value),
                    AluOp::Sub => a.sub(d, value),
                    AluOp::And => a.and(d, value),
                    AluOp::Or => a.or(d, value),
                    AluOp::Xor => a.xor(d, value),
                    AluOp::Imul => a.imul_3(d, d, value),
                    AluOp::Cmp => a.cmp(d, value),
                })
            }
        }
    }

    pub fn neg(&mut self, size: OperandSize, reg: AsmReg) -> CompileResult<()> {
        match size {
            OperandSize::S64 => {
                let r = gp64(reg)?;
                self.emit_with(|a| a.neg(r))
            }
            OperandSize::S32 => {
                let r = gp32(reg)?;
                self.emit_with(|a| a.neg(r))
            }
        }
    }

    pub fn not(&mut self, size: OperandSize, reg: AsmReg) -> CompileResult<()> {
        match size {
            OperandSize::S64 => {
                let r = gp64(reg)?;
                self.emit_with(|a| a.not(r))
            }
            OperandSize::S32 => {
                let r = gp32(reg)?;
                self.emit_with(|a| a.not(r))
            }
        }
    }

    /// One-operand signed multiply: `rdx:rax = rax * src`.
    pub fn imul_wide(&mut self, size: OperandSize, src: AsmReg) -> CompileResult<()> {
        match size {
            OperandSize::S64 => {
                let s = gp64(src)?;
                self.emit_with(|a| a.imul(s))
            }
            OperandSize::S32 => {
                let s = gp32(src)?;
                self.emit_with(|a| a.imul(s))
            }
        }
    }

    /// Set the low byte of `dst` to 1 if `condition` holds, else 0.
    pub fn setcc(&mut self, condition: Condition, dst: AsmReg) -> CompileResult<()> {
        let d = gp8(dst)?;
        self.emit_with(|a| match condition {
            Condition::Overflow => a.seto(d),
            Condition::NoOverflow => a.setno(d),
            Condition::Below => a.setb(d),
            Condition::AboveEqual => a.setae(d),
            Condition::Equal => a.sete(d),
            Condition::NotEqual => a.setne(d),
            Condition::BelowEqual => a.setbe(d),
            Condition::Above => a.seta(d),
            Condition::Sign => a.sets(d),
            Condition::NoSign => a.setns(d),
            Condition::Parity => a.setp(d),
            Condition::NoParity => a.setnp(d),
            Condition::Less => a.setl(d),
            Condition::GreaterEqual => a.setge(d),
            Condition::LessEqual => a.setle(d),
            Condition::Greater => a.setg(d),
        })
    }

    // ==== Stack and frame ====

    pub fn push(&mut self, reg: AsmReg) -> CompileResult<()> {
        let r = gp64(reg)?;
        self.emit_with(|a| a.push(r))
    }

    pub fn pop(&mut self, reg: AsmReg) -> CompileResult<()> {
        let r = gp64(reg)?;
        self.emit_with(|a| a.pop(r))
    }

    pub fn ret(&mut self) -> CompileResult<()> {
        self.emit_with(|a| a.ret())
    }

    pub fn nop(&mut self) -> CompileResult<()> {
        self.emit_with(|a| a.nop())
    }

    /// `push rbp; mov rbp, rsp; sub rsp, frame_size`.
    pub fn emit_prologue(&mut self, frame_size: u32) -> CompileResult<()> {
        self.push(RBP)?;
        self.mov_rr(OperandSize::S64, RBP, RSP)?;
        if frame_size > 0 {
            self.alu_ri(AluOp::Sub, OperandSize::S64, RSP, frame_size as i64)?;
        }
        Ok(())
    }

    /// `mov rsp, rbp; pop rbp; ret`.
    pub fn emit_epilogue(&mut self) -> CompileResult<()> {
        self.mov_rr(OperandSize::S64, RSP, RBP)?;
        self.pop(RBP)?;
        self.ret()
    }

    /// Check that no branch waits for an unbound label and take the code.
    pub fn finish(&mut self, trim: bool) -> CompileResult<Vec<u8>> {
        self.asm.finish(trim)
    }
}

impl LirAssembler for X64Encoder {
    fn create_label(&mut self, name: &str) -> LabelId {
        X64Encoder::create_label(self, name)
    }

    fn labels_bound(&self) -> usize {
        self.asm.labels_bound()
    }

    fn patches_applied(&self) -> usize {
        self.asm.patches_applied()
    }

    fn finish(&mut self, trim: bool) -> CompileResult<Vec<u8>> {
        X64Encoder::finish(self, trim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::{RAX, RCX, RDX};
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn decode(code: &[u8]) -> Vec<iced_x86::Instruction> {
        let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode());
        }
        out
    }

    #[test]
    fn test_basic_instructions() {
        let mut encoder = X64Encoder::with_capacity(16).unwrap();
        encoder.mov_rr(OperandSize::S64, RAX, RCX).unwrap();
        encoder.alu_rr(AluOp::Add, OperandSize::S64, RAX, RDX).unwrap();
        encoder.mov_ri(OperandSize::S32, RAX, 42).unwrap();
        encoder.ret().unwrap();

        let code = encoder.finish(true).unwrap();
        let mnemonics: Vec<_> = decode(&code).iter().map(|i| i.mnemonic()).collect();
        assert_eq!(
            mnemonics,
            vec![Mnemonic::Mov, Mnemonic::Add, Mnemonic::Mov, Mnemonic::Ret]
        );
    }

    #[test]
    fn test_forward_jump_is_patched() {
        let mut encoder = X64Encoder::with_capacity(64).unwrap();
        let target = encoder.create_label("target");
        encoder.nop().unwrap();
        let site = encoder.position();
        encoder.jmp(target).unwrap();
        encoder.nop().unwrap();
        encoder.nop().unwrap();
        let bound_at = encoder.position();
        encoder.bind(target).unwrap();
        encoder.ret().unwrap();

        let code = encoder.finish(true).unwrap();
        assert_eq!(code[site], 0xE9);
        let rel = i32::from_le_bytes(code[site + 1..site + 5].try_into().unwrap());
        assert_eq!(rel as i64, bound_at as i64 - (site as i64 + 5));
        let jump = decode(&code)[1];
        assert_eq!(jump.mnemonic(), Mnemonic::Jmp);
        assert_eq!(jump.near_branch64(), bound_at as u64);
    }

    #[test]
    fn test_backward_branch_uses_short_form() {
        let mut encoder = X64Encoder::with_capacity(64).unwrap();
        let top = encoder.create_label("top");
        encoder.bind(top).unwrap();
        encoder.alu_ri(AluOp::Sub, OperandSize::S32, RCX, 1).unwrap();
        encoder.jcc(Condition::NotEqual, top).unwrap();

        let code = encoder.finish(true).unwrap();
        let instructions = decode(&code);
        let branch = instructions.last().unwrap();
        assert_eq!(branch.mnemonic(), Mnemonic::Jne);
        assert_eq!(branch.len(), 2);
        assert_eq!(branch.near_branch64(), 0);
    }

    #[test]
    fn test_forward_jcc_is_near() {
        let mut encoder = X64Encoder::with_capacity(64).unwrap();
        let out = encoder.create_label("out");
        encoder.alu_rr(AluOp::Cmp, OperandSize::S64, RAX, RCX).unwrap();
        encoder.jcc(Condition::Less, out).unwrap();
        encoder.mov_ri(OperandSize::S64, RAX, 1).unwrap();
        encoder.bind(out).unwrap();
        encoder.ret().unwrap();
        let ret_at = encoder.position() - 1;

        let code = encoder.finish(true).unwrap();
        let branch = decode(&code)[1];
        assert_eq!(branch.mnemonic(), Mnemonic::Jl);
        assert_eq!(branch.len(), 6);
        assert_eq!(branch.near_branch64(), ret_at as u64);
    }

    #[test]
    fn test_unbound_label_fails_finish() {
        let mut encoder = X64Encoder::with_capacity(16).unwrap();
        let nowhere = encoder.create_label("nowhere");
        encoder.jmp(nowhere).unwrap();
        assert!(matches!(
            encoder.finish(true),
            Err(CompileError::LabelUnbound { label, .. }) if label == nowhere
        ));
    }

    #[test]
    fn test_short_forward_jump_out_of_range() {
        let mut encoder = X64Encoder::with_capacity(16).unwrap();
        let far = encoder.create_label("far");
        encoder.jmp_short(far).unwrap();
        for _ in 0..200 {
            encoder.nop().unwrap();
        }
        assert!(matches!(
            encoder.bind(far),
            Err(CompileError::BranchTargetOutOfBounds { site: 0, .. })
        ));
    }

    #[test]
    fn test_align_and_jump_table() {
        let mut encoder = X64Encoder::with_capacity(16).unwrap();
        encoder.ret().unwrap();
        encoder.align(8).unwrap();
        assert_eq!(encoder.position(), 8);

        let base = encoder.position();
        let case = encoder.create_label("case");
        encoder.emit_jump_table_entry(base, case).unwrap();
        encoder.emit_jump_table_entry(base, case).unwrap();
        encoder.bind(case).unwrap();
        encoder.ret().unwrap();

        let code = encoder.finish(true).unwrap();
        assert_eq!(&code[1..8], &[0x90; 7]);
        assert_eq!(i32::from_le_bytes(code[8..12].try_into().unwrap()), 8);
        assert_eq!(i32::from_le_bytes(code[12..16].try_into().unwrap()), 8);
    }

    #[test]
    fn test_prologue_epilogue() {
        let mut encoder = X64Encoder::with_capacity(16).unwrap();
        encoder.emit_prologue(32).unwrap();
        encoder.emit_epilogue().unwrap();
        let code = encoder.finish(true).unwrap();
        let mnemonics: Vec<_> = decode(&code).iter().map(|i| i.mnemonic()).collect();
        assert_eq!(
            mnemonics,
            vec![
                Mnemonic::Push,
                Mnemonic::Mov,
                Mnemonic::Sub,
                Mnemonic::Mov,
                Mnemonic::Pop,
                Mnemonic::Ret
            ]
        );
    }

    #[test]
    fn test_condition_negate() {
        assert_eq!(Condition::Less.negate(), Condition::GreaterEqual);
        assert_eq!(Condition::Equal.negate(), Condition::NotEqual);
        assert_eq!(Condition::Above.negate(), Condition::BelowEqual);
    }

    #[test]
    fn test_big_endian_buffer_rejected() {
        assert!(X64Encoder::new(Buffer::new(8, ByteOrder::Big)).is_err());
    }
}
