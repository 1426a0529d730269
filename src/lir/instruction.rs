//! The operand/emission contract every LIR instruction implements.

use super::operand::{OperandMode, Value};
use crate::asm::LabelId;
use crate::core::error::CompileResult;

/// Machine assembler side of the LIR: label source and final code hand-off.
pub trait LirAssembler {
    fn create_label(&mut self, name: &str) -> LabelId;

    fn labels_bound(&self) -> usize;

    fn patches_applied(&self) -> usize;

    /// Check that every label a branch refers to is bound and take the code.
    fn finish(&mut self, trim: bool) -> CompileResult<Vec<u8>>;
}

/// One low-level instruction, parameterised over the machine assembler `M`.
///
/// `visit_operands` must report every operand exactly once with its role, in a
/// stable order. By the time `emit_code` runs, every operand holds a concrete
/// location and no alive operand shares storage with a def or temp, so an
/// instruction expanding to several machine instructions may write its defs
/// and temps early. A use may share storage with a def and must be read first.
pub trait LirInstruction<M>: Send {
    fn name(&self) -> &'static str;

    fn visit_operands(&mut self, visitor: &mut dyn FnMut(OperandMode, &mut Value));

    fn emit_code(&self, masm: &mut M) -> CompileResult<()>;
}
