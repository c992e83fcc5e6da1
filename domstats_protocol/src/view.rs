//! Bounds-checked cursor over an untrusted byte buffer.
//!
//! Payload bytes come from files and foreign-domain pages that producers
//! rewrite at will. Every field access goes through [`ByteView`], so a
//! hostile or torn buffer can only produce [`ProtocolError::InvalidLengthField`],
//! never an out-of-bounds slice.

use crate::error::{ProtocolError, ProtocolResult};

/// Forward-only view over a borrowed buffer.
#[derive(Debug)]
pub struct ByteView<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteView<'a> {
    /// Wrap a buffer, starting at offset zero.
    pub fn new(buf: &'a [u8]) -> Self {
        ByteView { buf, pos: 0 }
    }

    /// Current offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume the next `len` bytes.
    pub fn take(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ProtocolError::InvalidLengthField {
                declared: usize::MAX,
                available: self.buf.len(),
            })?;
        if end > self.buf.len() {
            return Err(ProtocolError::InvalidLengthField {
                declared: end,
                available: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Consume a big-endian u32.
    pub fn read_u32_be(&mut self) -> ProtocolResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Consume a big-endian u64.
    pub fn read_u64_be(&mut self) -> ProtocolResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}
