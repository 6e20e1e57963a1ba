//! Hash functions placing keys on the 32-bit ring.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::hash::Hasher;
use std::io::Cursor;
use twox_hash::XxHash64;

/// Size of the hash space: positions are `0..HASH_SPACE`.
pub const HASH_SPACE: u64 = 1 << 32;

/// Maps a key to a ring position.
pub trait HashFunction: Send + Sync + std::fmt::Debug {
    /// Algorithm name.
    fn name(&self) -> &'static str;

    /// Position of `key` on the ring.
    fn hash(&self, key: &[u8]) -> u32;
}

/// Built-in hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// MurmurHash3 x86 32-bit, seed 0.
    #[default]
    Murmur3,
    /// First four bytes of MD5, big-endian.
    Md5,
    /// First four bytes of SHA-256, big-endian.
    Sha256,
    /// Low 32 bits of XxHash64, seed 0.
    XxHash64,
}

impl HashFunction for HashAlgorithm {
    fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Murmur3 => "murmur3",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::XxHash64 => "xxhash64",
        }
    }

    fn hash(&self, key: &[u8]) -> u32 {
        match self {
            // Reading from an in-memory cursor cannot fail.
            HashAlgorithm::Murmur3 => murmur3::murmur3_32(&mut Cursor::new(key), 0).unwrap_or_default(),
            HashAlgorithm::Md5 => prefix_u32(&Md5::digest(key)),
            HashAlgorithm::Sha256 => prefix_u32(&Sha256::digest(key)),
            HashAlgorithm::XxHash64 => {
                let mut hasher = XxHash64::with_seed(0);
                hasher.write(key);
                hasher.finish() as u32
            }
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn prefix_u32(digest: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(bytes)
}

/// Hexadecimal midpoint of two ring positions, `floor((start + end) / 2)`.
///
/// Positions are at most 16 hex digits; the result is zero-padded to eight.
pub fn calculate_midpoint(start_hex: &str, end_hex: &str) -> crate::error::Result<String> {
    let start = parse_position(start_hex)?;
    let end = parse_position(end_hex)?;
    if start > end {
        return Err(crate::error::Error::InvalidHashRange(format!(
            "start {} is after end {}",
            start_hex, end_hex
        )));
    }
    let mid = start / 2 + end / 2 + (start % 2 + end % 2) / 2;
    Ok(format!("{:08x}", mid))
}

fn parse_position(hex: &str) -> crate::error::Result<u64> {
    let trimmed = hex.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16)
        .map_err(|_| crate::error::Error::InvalidHashRange(format!("not a hex position: {}", hex)))
}
