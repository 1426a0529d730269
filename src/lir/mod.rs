// The lir module is the low-level instruction layer between lowering and machine code.
// Instructions declare their operands with a role (def, use, alive, temp) and emit
// themselves through an architecture assembler once a register allocator has replaced
// every virtual register with a register, stack slot or immediate.

//! Low-level IR: operands, the instruction contract and the instruction sequence.

pub mod instruction;
pub mod operand;
pub mod sequence;

pub use instruction::{LirAssembler, LirInstruction};
pub use operand::{Location, OperandMode, Value, VirtualReg};
pub use sequence::Lir;
