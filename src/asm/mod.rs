//! Machine-code emission infrastructure: the code [`Buffer`], forward
//! reference [labels](label) and the [`Assembler`] that binds them.

pub mod assembler;
pub mod buffer;
pub mod label;

pub use assembler::{Assembler, JumpPatcher, Rel32Patcher};
pub use buffer::{Buffer, ByteOrder};
pub use label::{LabelId, LabelState};
