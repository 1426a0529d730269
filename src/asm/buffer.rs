// Growable byte store for machine code. The Buffer owns a zero-filled byte vector whose
// length is the current capacity, plus a write cursor that never exceeds it. Sequential
// emits write at the cursor and advance it; the *_at variants patch bytes at an arbitrary
// position and leave the cursor alone. Whenever a write needs more room the storage is
// reallocated to four times the required size and the old bytes are copied over, so
// earlier output and the cursor survive growth. Multi-byte values use the byte order fixed
// at construction. close() ends emission and hands out the bytes, optionally trimmed to the
// cursor; any write after that is refused.

//! Bounds-checked growable code buffer.

use crate::core::error::{CompileError, CompileResult};

/// Byte order of multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    position: usize,
    byte_order: ByteOrder,
    closed: bool,
}

impl Buffer {
    pub fn new(initial_capacity: usize, byte_order: ByteOrder) -> Self {
        Self {
            data: vec![0; initial_capacity],
            position: 0,
            byte_order,
            closed: false,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Move the cursor; `position` must lie within `[0, capacity]`.
    pub fn set_position(&mut self, position: usize) -> CompileResult<()> {
        if position > self.capacity() {
            return Err(CompileError::PositionOutOfRange {
                position,
                capacity: self.capacity(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Bytes emitted so far.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.position]
    }

    fn ensure_size(&mut self, required: usize) -> CompileResult<()> {
        if self.closed {
            return Err(CompileError::BufferClosed);
        }
        if required <= self.data.len() {
            return Ok(());
        }
        let new_len = required
            .checked_mul(4)
            .filter(|&len| len <= isize::MAX as usize)
            .ok_or(CompileError::BufferGrowth { requested: required })?;
        log::debug!("growing code buffer from {} to {} bytes", self.data.len(), new_len);
        self.data.resize(new_len, 0);
        Ok(())
    }

    fn write_at(&mut self, pos: usize, bytes: &[u8]) -> CompileResult<()> {
        let end = pos
            .checked_add(bytes.len())
            .ok_or(CompileError::BufferGrowth { requested: usize::MAX })?;
        self.ensure_size(end)?;
        self.data[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> CompileResult<()> {
        self.write_at(self.position, bytes)?;
        self.position += bytes.len();
        Ok(())
    }

    fn read_at<const N: usize>(&self, pos: usize) -> CompileResult<[u8; N]> {
        let out_of_range = CompileError::PositionOutOfRange {
            position: pos,
            capacity: self.capacity(),
        };
        let end = pos.checked_add(N).ok_or(out_of_range.clone())?;
        let slice = self.data.get(pos..end).ok_or(out_of_range.clone())?;
        slice.try_into().map_err(|_| out_of_range)
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) -> CompileResult<()> {
        self.emit(bytes)
    }

    pub fn emit_byte(&mut self, value: u8) -> CompileResult<()> {
        self.emit(&[value])
    }

    pub fn emit_short(&mut self, value: i16) -> CompileResult<()> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.emit(&bytes)
    }

    pub fn emit_int(&mut self, value: i32) -> CompileResult<()> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.emit(&bytes)
    }

    pub fn emit_long(&mut self, value: i64) -> CompileResult<()> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.emit(&bytes)
    }

    pub fn emit_byte_at(&mut self, pos: usize, value: u8) -> CompileResult<()> {
        self.write_at(pos, &[value])
    }

    pub fn emit_short_at(&mut self, pos: usize, value: i16) -> CompileResult<()> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write_at(pos, &bytes)
    }

    pub fn emit_int_at(&mut self, pos: usize, value: i32) -> CompileResult<()> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write_at(pos, &bytes)
    }

    pub fn emit_long_at(&mut self, pos: usize, value: i64) -> CompileResult<()> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write_at(pos, &bytes)
    }

    pub fn get_byte(&self, pos: usize) -> CompileResult<u8> {
        Ok(self.read_at::<1>(pos)?[0])
    }

    pub fn get_short(&self, pos: usize) -> CompileResult<i16> {
        let bytes = self.read_at::<2>(pos)?;
        Ok(match self.byte_order {
            ByteOrder::Little => i16::from_le_bytes(bytes),
            ByteOrder::Big => i16::from_be_bytes(bytes),
        })
    }

    pub fn get_int(&self, pos: usize) -> CompileResult<i32> {
        let bytes = self.read_at::<4>(pos)?;
        Ok(match self.byte_order {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        })
    }

    pub fn get_long(&self, pos: usize) -> CompileResult<i64> {
        let bytes = self.read_at::<8>(pos)?;
        Ok(match self.byte_order {
            ByteOrder::Little => i64::from_le_bytes(bytes),
            ByteOrder::Big => i64::from_be_bytes(bytes),
        })
    }

    /// End emission and take the code. With `trim` the result is cut to the
    /// cursor, otherwise it spans the whole capacity.
    pub fn close(&mut self, trim: bool) -> CompileResult<Vec<u8>> {
        if self.closed {
            return Err(CompileError::BufferClosed);
        }
        self.closed = true;
        let mut data = std::mem::take(&mut self.data);
        if trim {
            data.truncate(self.position);
        }
        log::debug!("closed code buffer with {} bytes", data.len());
        Ok(data)
    }

    /// Discard all contents and reopen the buffer.
    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
        self.position = 0;
        self.closed = false;
    }
}
