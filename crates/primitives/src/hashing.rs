//! Incremental Blake2b-256 hashing of block hashables.

use blake2::{
    digest::{Update, VariableOutput},
    Blake2bVar,
};

use crate::BlockHash;

/// Accumulates block hashables and produces the 256-bit block digest.
pub struct BlockHasher {
    inner: Blake2bVar,
}

impl BlockHasher {
    pub fn new() -> Self {
        Self {
            inner: Blake2bVar::new(32).expect("32 is a valid blake2b output length"),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn finish(self) -> BlockHash {
        let mut out = [0u8; 32];
        self.inner
            .finalize_variable(&mut out)
            .expect("output buffer matches digest length");
        BlockHash::from_bytes(out)
    }
}

impl Default for BlockHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlockHasher")
    }
}
