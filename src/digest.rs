//! Resumable SHA-256
//!
//! The object engine persists a digest snapshot next to every object chunk so
//! that appends resume hashing where the previous write stopped instead of
//! re-reading stored chunks. The high-level `Sha256` hasher keeps its state
//! private, so the streaming digest is assembled here from the crate's
//! exported compression primitive (`sha2::compress256`, behind the `compress`
//! feature) plus an explicit state type: the eight working words, the
//! unconsumed tail of the current 64-byte block, and the total consumed
//! length. Snapshots serialize to an opaque base64 string; the format is
//! internal and not part of any wire protocol.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::digest::generic_array::GenericArray;
use sha2::{compress256, Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 initialization vector (FIPS 180-4); `compress256` covers only the
/// round function
const H0: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Serialized digest state. `block` holds the unconsumed tail, so
/// `total_len % 64 == block.len()` always holds.
#[derive(Serialize, Deserialize)]
struct SavedState {
    h: [u32; 8],
    block: Vec<u8>,
    total_len: u64,
}

/// A streaming SHA-256 whose state can be captured and restored
#[derive(Debug, Clone)]
pub struct ResumableSha256 {
    h: [u32; 8],
    block: [u8; 64],
    block_len: usize,
    total_len: u64,
}

impl Default for ResumableSha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumableSha256 {
    pub fn new() -> Self {
        Self {
            h: H0,
            block: [0u8; 64],
            block_len: 0,
            total_len: 0,
        }
    }

    /// Feed bytes into the digest
    pub fn update(&mut self, mut data: &[u8]) {
        self.total_len = self.total_len.wrapping_add(data.len() as u64);

        if self.block_len > 0 {
            let take = (64 - self.block_len).min(data.len());
            self.block[self.block_len..self.block_len + take].copy_from_slice(&data[..take]);
            self.block_len += take;
            data = &data[take..];
            if self.block_len == 64 {
                let block = self.block;
                compress(&mut self.h, &block);
                self.block_len = 0;
            }
        }

        while data.len() >= 64 {
            let mut block = [0u8; 64];
            block.copy_from_slice(&data[..64]);
            compress(&mut self.h, &block);
            data = &data[64..];
        }

        if !data.is_empty() {
            self.block[..data.len()].copy_from_slice(data);
            self.block_len = data.len();
        }
    }

    /// Produce the digest of everything consumed so far.
    ///
    /// Non-consuming: padding runs on a copy, so the digest can keep
    /// accepting bytes afterwards.
    pub fn finalize(&self) -> [u8; 32] {
        let mut h = self.h;
        let mut block = [0u8; 64];
        block[..self.block_len].copy_from_slice(&self.block[..self.block_len]);

        let mut len = self.block_len;
        block[len] = 0x80;
        len += 1;

        if len > 56 {
            compress(&mut h, &block);
            block = [0u8; 64];
        }

        let bit_len = self.total_len.wrapping_mul(8);
        block[56..64].copy_from_slice(&bit_len.to_be_bytes());
        compress(&mut h, &block);

        let mut out = [0u8; 32];
        for (i, word) in h.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Digest of everything consumed so far, lowercase hex
    pub fn hex_digest(&self) -> String {
        hex::encode(self.finalize())
    }

    /// Capture the current state as an opaque base64 string
    pub fn state_text(&self) -> Result<String> {
        let state = SavedState {
            h: self.h,
            block: self.block[..self.block_len].to_vec(),
            total_len: self.total_len,
        };
        let encoded = bincode::serialize(&state)
            .map_err(|e| Error::DigestState(format!("serialize: {}", e)))?;
        Ok(BASE64.encode(encoded))
    }

    /// Restore a digest from a captured state
    pub fn from_state_text(text: &str) -> Result<Self> {
        let raw = BASE64
            .decode(text)
            .map_err(|e| Error::DigestState(format!("base64: {}", e)))?;
        let state: SavedState = bincode::deserialize(&raw)
            .map_err(|e| Error::DigestState(format!("deserialize: {}", e)))?;

        if state.block.len() >= 64 || state.total_len % 64 != state.block.len() as u64 {
            return Err(Error::DigestState("inconsistent block length".to_string()));
        }

        let mut block = [0u8; 64];
        block[..state.block.len()].copy_from_slice(&state.block);
        Ok(Self {
            h: state.h,
            block,
            block_len: state.block.len(),
            total_len: state.total_len,
        })
    }
}

/// One SHA-256 compression round over a 64-byte block
fn compress(h: &mut [u32; 8], block: &[u8; 64]) {
    let block = GenericArray::from_slice(block);
    compress256(h, std::slice::from_ref(block));
}

/// One-shot SHA-256, lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
