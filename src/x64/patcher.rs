// Rewrites the placeholder left at an x86-64 branch site once the branch target is known.
// The patcher recognises the site by its first opcode byte: E8/E9 (call/jmp rel32), EB and
// 70..7F (jmp/jcc rel8), 0F 80..8F (jcc rel32) and 00, the marker of a 4-byte jump-table
// entry whose bytes 1..3 hold the distance back to the table base. Branch displacements are
// relative to the end of the instruction; a table entry becomes target minus table base. A
// displacement that does not fit the encoding's field is reported rather than truncated, and
// any other opcode byte is an invalid patch site.

//! x86-64 [`JumpPatcher`].

use crate::asm::{Buffer, ByteOrder, JumpPatcher};
use crate::core::error::{CompileError, CompileResult};

/// First byte of an unpatched jump-table entry.
pub const JUMP_TABLE_MARKER: u8 = 0x00;

#[derive(Debug, Clone, Copy, Default)]
pub struct X64JumpPatcher;

fn rel32(site: usize, displacement: i64) -> CompileResult<i32> {
    i32::try_from(displacement).map_err(|_| CompileError::BranchTargetOutOfBounds { site, displacement })
}

impl JumpPatcher for X64JumpPatcher {
    fn patch_jump_target(&self, buffer: &mut Buffer, branch: usize, target: usize) -> CompileResult<()> {
        if buffer.byte_order() != ByteOrder::Little {
            return Err(CompileError::Encoding {
                reason: "x86-64 code must be little-endian".to_string(),
            });
        }
        let target = target as i64;
        let site = branch as i64;
        let opcode = buffer.get_byte(branch)?;
        match opcode {
            JUMP_TABLE_MARKER => {
                let offset = buffer.get_short(branch + 1)? as u16 as i64;
                let displacement = target - (site - offset);
                buffer.emit_int_at(branch, rel32(branch, displacement)?)
            }
            0xE8 | 0xE9 => {
                let displacement = target - (site + 5);
                buffer.emit_int_at(branch + 1, rel32(branch, displacement)?)
            }
            0xEB | 0x70..=0x7F => {
                let displacement = target - (site + 2);
                let value = i8::try_from(displacement)
                    .map_err(|_| CompileError::BranchTargetOutOfBounds { site: branch, displacement })?;
                buffer.emit_byte_at(branch + 1, value as u8)
            }
            0x0F => {
                let second = buffer.get_byte(branch + 1)?;
                if second & 0xF0 != 0x80 {
                    return Err(CompileError::InvalidPatchSite { site: branch, opcode: second });
                }
                let displacement = target - (site + 6);
                buffer.emit_int_at(branch + 2, rel32(branch, displacement)?)
            }
            other => Err(CompileError::InvalidPatchSite { site: branch, opcode: other }),
        }
    }
}
