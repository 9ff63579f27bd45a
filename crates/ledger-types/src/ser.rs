//! Fixed-layout byte readers and writers.
//!
//! Every persisted key and value in the store, and every block on the wire,
//! has a declared byte-exact layout. These helpers keep the encode and
//! decode sides symmetric without pulling a self-describing format into the
//! storage contract.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid {field} tag {value}")]
    InvalidTag { field: &'static str, value: u8 },
    #[error("trailing bytes after value")]
    TrailingBytes,
}

/// Cursor over an input buffer.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        if self.buf.len() < N {
            return Err(WireError::UnexpectedEof);
        }
        let (head, tail) = self.buf.split_at(N);
        self.buf = tail;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_u128_be(&mut self) -> Result<u128, WireError> {
        Ok(u128::from_be_bytes(self.read_array()?))
    }

    /// Asserts the buffer was consumed exactly.
    pub fn finish(self) -> Result<(), WireError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes)
        }
    }
}
