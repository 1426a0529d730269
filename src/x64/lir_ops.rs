// x86-64 LIR instructions. Each op reports its operands with their roles and, once every
// operand is a concrete register, stack slot or immediate, expands into one or more machine
// instructions through X64Encoder. Two-address arithmetic copies the first input into the
// result before applying the second, so the second input is alive: it must not share the
// result's register. Multiply-high goes through the fixed RAX/RDX pair of the one-operand
// IMUL, which the op declares as temps. BlockCompareOp is a byte-compare loop whose inputs
// are alive across the whole loop while its index and scratch temps change on every
// iteration. PrologueOp and ReturnOp bracket a function with the frame set-up and the
// save/restore of the callee-saved registers picked by the allocator.

//! LIR instruction set for x86-64.

use super::encoder::{AluOp, Condition, OperandSize, X64Encoder};
use super::{RAX, RBP, RDX};
use crate::asm::LabelId;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::AsmReg;
use crate::ir::StampKind;
use crate::lir::{LirInstruction, OperandMode, Value};

fn register(value: &Value, instruction: &str) -> CompileResult<AsmReg> {
    value.as_register().ok_or_else(|| CompileError::Encoding {
        reason: format!("{instruction} needs a register, got {value}"),
    })
}

/// Bring `src` into `dst`; a no-op if it already lives there.
fn load_into(masm: &mut X64Encoder, size: OperandSize, dst: AsmReg, src: &Value) -> CompileResult<()> {
    match *src {
        Value::Register(reg, _) if reg == dst => Ok(()),
        Value::Register(reg, _) => masm.mov_rr(size, dst, reg),
        Value::Immediate(imm) => masm.mov_ri(size, dst, imm),
        Value::StackSlot(offset, _) => masm.load(size, dst, RBP, offset),
        Value::Virtual(..) => Err(CompileError::Encoding {
            reason: format!("{src} was never allocated"),
        }),
    }
}

/// `masm.op dst, src` for a register or 32-bit immediate `src`.
fn alu_value(masm: &mut X64Encoder, op: AluOp, size: OperandSize, dst: AsmReg, src: &Value) -> CompileResult<()> {
    match *src {
        Value::Register(reg, _) => masm.alu_rr(op, size, dst, reg),
        Value::Immediate(imm) => masm.alu_ri(op, size, dst, imm),
        _ => Err(CompileError::Encoding {
            reason: format!("{op:?} operand {src} must be a register or immediate"),
        }),
    }
}

/// Copy a value into a register or frame slot.
pub struct MoveOp {
    pub result: Value,
    pub input: Value,
}

impl LirInstruction<X64Encoder> for MoveOp {
    fn name(&self) -> &'static str {
        "move"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Use, &mut self.input);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let size = OperandSize::of(self.result.kind())?;
        match self.result {
            Value::Register(dst, _) => load_into(masm, size, dst, &self.input),
            Value::StackSlot(offset, _) => match self.input {
                Value::Register(src, _) => masm.store(size, RBP, offset, src),
                Value::Immediate(imm) => masm.store_imm(size, RBP, offset, imm),
                _ => Err(CompileError::Encoding {
                    reason: format!("cannot move {} to a stack slot directly", self.input),
                }),
            },
            _ => Err(CompileError::Encoding {
                reason: format!("move destination {} is not a location", self.result),
            }),
        }
    }
}

/// `result = x op y`.
pub struct BinaryOp {
    pub op: AluOp,
    pub result: Value,
    pub x: Value,
    pub y: Value,
}

impl LirInstruction<X64Encoder> for BinaryOp {
    fn name(&self) -> &'static str {
        match self.op {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
            AluOp::Imul => "mul",
            AluOp::Cmp => "cmp",
        }
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Use, &mut self.x);
        visitor(OperandMode::Alive, &mut self.y);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let size = OperandSize::of(self.result.kind())?;
        let dst = register(&self.result, self.name())?;
        load_into(masm, size, dst, &self.x)?;
        alu_value(masm, self.op, size, dst, &self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Neg,
    Not,
}

/// `result = -x` or `result = !x`.
pub struct UnaryOp {
    pub kind: UnaryKind,
    pub result: Value,
    pub x: Value,
}

impl LirInstruction<X64Encoder> for UnaryOp {
    fn name(&self) -> &'static str {
        match self.kind {
            UnaryKind::Neg => "neg",
            UnaryKind::Not => "not",
        }
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Use, &mut self.x);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let size = OperandSize::of(self.result.kind())?;
        let dst = register(&self.result, self.name())?;
        load_into(masm, size, dst, &self.x)?;
        match self.kind {
            UnaryKind::Neg => masm.neg(size, dst),
            UnaryKind::Not => masm.not(size, dst),
        }
    }
}

/// High half of the signed product `x * y`.
pub struct MulHighOp {
    pub result: Value,
    pub x: Value,
    pub y: Value,
    low: Value,
    high: Value,
}

impl MulHighOp {
    pub fn new(result: Value, x: Value, y: Value) -> Self {
        let kind = result.kind();
        Self {
            result,
            x,
            y,
            low: Value::Register(RAX, kind),
            high: Value::Register(RDX, kind),
        }
    }
}

impl LirInstruction<X64Encoder> for MulHighOp {
    fn name(&self) -> &'static str {
        "mulhi"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Use, &mut self.x);
        visitor(OperandMode::Alive, &mut self.y);
        visitor(OperandMode::Temp, &mut self.low);
        visitor(OperandMode::Temp, &mut self.high);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let size = OperandSize::of(self.result.kind())?;
        let dst = register(&self.result, self.name())?;
        let y = register(&self.y, self.name())?;
        load_into(masm, size, RAX, &self.x)?;
        masm.imul_wide(size, y)?;
        masm.mov_rr(size, dst, RDX)
    }
}

/// `result = (x cond y) ? 1 : 0` as a 32-bit value.
pub struct CompareOp {
    pub condition: Condition,
    pub result: Value,
    pub x: Value,
    pub y: Value,
}

impl LirInstruction<X64Encoder> for CompareOp {
    fn name(&self) -> &'static str {
        "compare"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Alive, &mut self.x);
        visitor(OperandMode::Alive, &mut self.y);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let dst = register(&self.result, self.name())?;
        let x = register(&self.x, self.name())?;
        let size = OperandSize::of(self.x.kind())?;
        // Cleared before the compare: xor clobbers the flags.
        masm.alu_rr(AluOp::Xor, OperandSize::S32, dst, dst)?;
        alu_value(masm, AluOp::Cmp, size, x, &self.y)?;
        masm.setcc(self.condition, dst)
    }
}

/// Branch to `on_true` if `x cond y`, otherwise to `on_false`.
pub struct CompareAndBranchOp {
    pub condition: Condition,
    pub x: Value,
    pub y: Value,
    pub on_true: LabelId,
    pub on_false: LabelId,
}

impl LirInstruction<X64Encoder> for CompareAndBranchOp {
    fn name(&self) -> &'static str {
        "compare_and_branch"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Use, &mut self.x);
        visitor(OperandMode::Use, &mut self.y);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let x = register(&self.x, self.name())?;
        let size = OperandSize::of(self.x.kind())?;
        alu_value(masm, AluOp::Cmp, size, x, &self.y)?;
        masm.jcc(self.condition, self.on_true)?;
        masm.jmp(self.on_false)
    }
}

pub struct JumpOp {
    pub target: LabelId,
}

impl LirInstruction<X64Encoder> for JumpOp {
    fn name(&self) -> &'static str {
        "jump"
    }

    fn visit_operands(&mut self, _visitor: &mut dyn FnMut(OperandMode, &mut Value)) {}

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        masm.jmp(self.target)
    }
}

/// Binds a label at the current position.
pub struct LabelOp {
    pub label: LabelId,
}

impl LirInstruction<X64Encoder> for LabelOp {
    fn name(&self) -> &'static str {
        "label"
    }

    fn visit_operands(&mut self, _visitor: &mut dyn FnMut(OperandMode, &mut Value)) {}

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        masm.bind(self.label)
    }
}

/// `result = [address]`.
pub struct LoadOp {
    pub result: Value,
    pub address: Value,
}

impl LirInstruction<X64Encoder> for LoadOp {
    fn name(&self) -> &'static str {
        "load"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Use, &mut self.address);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let size = OperandSize::of(self.result.kind())?;
        let dst = register(&self.result, self.name())?;
        let base = register(&self.address, self.name())?;
        masm.load(size, dst, base, 0)
    }
}

/// `[address] = value`.
pub struct StoreOp {
    pub address: Value,
    pub value: Value,
    pub kind: StampKind,
}

impl LirInstruction<X64Encoder> for StoreOp {
    fn name(&self) -> &'static str {
        "store"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Use, &mut self.address);
        visitor(OperandMode::Use, &mut self.value);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let size = OperandSize::of(self.kind)?;
        let base = register(&self.address, self.name())?;
        match self.value {
            Value::Immediate(imm) => masm.store_imm(size, base, 0, imm),
            _ => {
                let src = register(&self.value, self.name())?;
                masm.store(size, base, 0, src)
            }
        }
    }
}

/// `result = base + offset` for a 64-bit register or 32-bit immediate offset.
pub struct LeaOp {
    pub result: Value,
    pub base: Value,
    pub offset: Value,
}

impl LirInstruction<X64Encoder> for LeaOp {
    fn name(&self) -> &'static str {
        "lea"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Use, &mut self.base);
        visitor(OperandMode::Use, &mut self.offset);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let dst = register(&self.result, self.name())?;
        let base = register(&self.base, self.name())?;
        match self.offset {
            Value::Immediate(imm) => {
                let displacement = i32::try_from(imm).map_err(|_| CompileError::Encoding {
                    reason: format!("address offset {imm} does not fit in 32 bits"),
                })?;
                masm.lea(dst, base, displacement)
            }
            _ => {
                let index = register(&self.offset, self.name())?;
                masm.lea_indexed(dst, base, index)
            }
        }
    }
}

/// Sign-extend a 32-bit value to 64 bits.
pub struct SignExtendOp {
    pub result: Value,
    pub x: Value,
}

impl LirInstruction<X64Encoder> for SignExtendOp {
    fn name(&self) -> &'static str {
        "sext"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Use, &mut self.x);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let dst = register(&self.result, self.name())?;
        let src = register(&self.x, self.name())?;
        masm.movsxd(dst, src)
    }
}

/// `result = 1` if the `length` bytes at `a` and `b` are equal, else `0`.
pub struct BlockCompareOp {
    pub result: Value,
    pub a: Value,
    pub b: Value,
    pub length: Value,
    pub index: Value,
    pub scratch: Value,
}

impl LirInstruction<X64Encoder> for BlockCompareOp {
    fn name(&self) -> &'static str {
        "block_compare"
    }

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value)) {
        visitor(OperandMode::Def, &mut self.result);
        visitor(OperandMode::Alive, &mut self.a);
        visitor(OperandMode::Alive, &mut self.b);
        visitor(OperandMode::Alive, &mut self.length);
        visitor(OperandMode::Temp, &mut self.index);
        visitor(OperandMode::Temp, &mut self.scratch);
    }

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        let name = self.name();
        let result = register(&self.result, name)?;
        let a = register(&self.a, name)?;
        let b = register(&self.b, name)?;
        let length = register(&self.length, name)?;
        let index = register(&self.index, name)?;
        let scratch = register(&self.scratch, name)?;

        let head = masm.create_label("block_compare.head");
        let equal = masm.create_label("block_compare.equal");
        let differ = masm.create_label("block_compare.differ");
        let done = masm.create_label("block_compare.done");

        masm.alu_rr(AluOp::Xor, OperandSize::S32, index, index)?;
        masm.bind(head)?;
        masm.alu_rr(AluOp::Cmp, OperandSize::S64, index, length)?;
        masm.jcc(Condition::AboveEqual, equal)?;
        masm.movzx_byte(scratch, a, index)?;
        masm.cmp_byte_mem(b, index, scratch)?;
        masm.jcc(Condition::NotEqual, differ)?;
        masm.alu_ri(AluOp::Add, OperandSize::S64, index, 1)?;
        masm.jmp(head)?;
        masm.bind(equal)?;
        masm.mov_ri(OperandSize::S32, result, 1)?;
        masm.jmp(done)?;
        masm.bind(differ)?;
        masm.mov_ri(OperandSize::S32, result, 0)?;
        masm.bind(done)
    }
}

/// Frame set-up: `push rbp; mov rbp, rsp` and pushes of the saved registers.
pub struct PrologueOp {
    pub saved: Vec<AsmReg>,
}

impl LirInstruction<X64Encoder> for PrologueOp {
    fn name(&self) -> &'static str {
        "prologue"
    }

    fn visit_operands(&mut self, _visitor: &mut dyn FnMut(OperandMode, &mut Value)) {}

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        masm.emit_prologue(0)?;
        for &reg in &self.saved {
            masm.push(reg)?;
        }
        Ok(())
    }
}

/// Restores the saved registers and the frame, then returns.
pub struct ReturnOp {
    pub saved: Vec<AsmReg>,
}

impl LirInstruction<X64Encoder> for ReturnOp {
    fn name(&self) -> &'static str {
        "return"
    }

    fn visit_operands(&mut self, _visitor: &mut dyn FnMut(OperandMode, &mut Value)) {}

    fn emit_code(&self, masm: &mut X64Encoder) -> CompileResult<()> {
        for &reg in self.saved.iter().rev() {
            masm.pop(reg)?;
        }
        masm.emit_epilogue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::Lir;
    use crate::x64::{RBX, RCX, RDI, RSI, R10, R11};
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn mnemonics(code: &[u8]) -> Vec<Mnemonic> {
        let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode().mnemonic());
        }
        out
    }

    fn reg64(reg: AsmReg) -> Value {
        Value::Register(reg, StampKind::Int64)
    }

    #[test]
    fn test_binary_op_sequence() {
        let mut lir: Lir<X64Encoder> = Lir::new();
        lir.append(BinaryOp {
            op: AluOp::Add,
            result: reg64(RBX),
            x: reg64(RDI),
            y: Value::Immediate(5),
        });
        let mut masm = X64Encoder::with_capacity(32).unwrap();
        lir.emit(&mut masm).unwrap();
        let code = masm.finish(true).unwrap();
        assert_eq!(mnemonics(&code), vec![Mnemonic::Mov, Mnemonic::Add]);
    }

    #[test]
    fn test_binary_op_alive_operand_checked() {
        let mut lir: Lir<X64Encoder> = Lir::new();
        lir.append(BinaryOp {
            op: AluOp::Sub,
            result: reg64(RBX),
            x: reg64(RDI),
            y: reg64(RBX),
        });
        let mut masm = X64Encoder::with_capacity(32).unwrap();
        assert!(matches!(
            lir.emit(&mut masm),
            Err(CompileError::AliveOperandClobbered { instruction: "sub", .. })
        ));
    }

    #[test]
    fn test_mul_high_fixed_registers_are_temps() {
        let mut lir: Lir<X64Encoder> = Lir::new();
        lir.append(MulHighOp::new(reg64(RBX), reg64(RDI), reg64(RDX)));
        let mut masm = X64Encoder::with_capacity(32).unwrap();
        assert!(matches!(
            lir.emit(&mut masm),
            Err(CompileError::AliveOperandClobbered { instruction: "mulhi", .. })
        ));

        let mut lir: Lir<X64Encoder> = Lir::new();
        lir.append(MulHighOp::new(reg64(RBX), reg64(RDI), reg64(RSI)));
        let mut masm = X64Encoder::with_capacity(32).unwrap();
        lir.emit(&mut masm).unwrap();
        let code = masm.finish(true).unwrap();
        assert_eq!(mnemonics(&code), vec![Mnemonic::Mov, Mnemonic::Imul, Mnemonic::Mov]);
    }

    #[test]
    fn test_block_compare_loop() {
        let mut lir: Lir<X64Encoder> = Lir::new();
        let index = lir.new_vreg(StampKind::Int64);
        let scratch = lir.new_vreg(StampKind::Int32);
        lir.append(BlockCompareOp {
            result: Value::Register(RBX, StampKind::Int32),
            a: reg64(RDI),
            b: reg64(RSI),
            length: reg64(RDX),
            index,
            scratch,
        });
        lir.allocate(|vreg, kind| {
            let reg = if vreg.0 == 0 { R10 } else { R11 };
            Ok(Value::Register(reg, kind))
        })
        .unwrap();
        let mut masm = X64Encoder::with_capacity(64).unwrap();
        lir.emit(&mut masm).unwrap();
        let code = masm.finish(true).unwrap();
        let decoded = mnemonics(&code);
        assert_eq!(decoded.first(), Some(&Mnemonic::Xor));
        assert!(decoded.contains(&Mnemonic::Movzx));
        assert_eq!(decoded.iter().filter(|m| **m == Mnemonic::Jmp).count(), 2);
    }

    #[test]
    fn test_block_compare_temp_must_not_alias_inputs() {
        let mut lir: Lir<X64Encoder> = Lir::new();
        lir.append(BlockCompareOp {
            result: Value::Register(RBX, StampKind::Int32),
            a: reg64(RDI),
            b: reg64(RSI),
            length: reg64(RCX),
            index: reg64(RCX),
            scratch: Value::Register(R11, StampKind::Int32),
        });
        let mut masm = X64Encoder::with_capacity(64).unwrap();
        assert!(matches!(
            lir.emit(&mut masm),
            Err(CompileError::AliveOperandClobbered { instruction: "block_compare", .. })
        ));
    }

    #[test]
    fn test_frame_restores_saved_registers() {
        let mut lir: Lir<X64Encoder> = Lir::new();
        lir.append(PrologueOp { saved: vec![RBX, R10] });
        lir.append(ReturnOp { saved: vec![RBX, R10] });
        let mut masm = X64Encoder::with_capacity(32).unwrap();
        lir.emit(&mut masm).unwrap();
        let code = masm.finish(true).unwrap();

        let mut decoder = Decoder::with_ip(64, &code, 0, DecoderOptions::NONE);
        let mut pops = Vec::new();
        let mut decoded = Vec::new();
        while decoder.can_decode() {
            let instruction = decoder.decode();
            if instruction.mnemonic() == Mnemonic::Pop {
                pops.push(instruction.op0_register());
            }
            decoded.push(instruction.mnemonic());
        }
        assert_eq!(
            pops,
            vec![iced_x86::Register::R10, iced_x86::Register::RBX, iced_x86::Register::RBP]
        );
        assert_eq!(
            &decoded[decoded.len() - 3..],
            &[Mnemonic::Mov, Mnemonic::Pop, Mnemonic::Ret]
        );
    }
}
