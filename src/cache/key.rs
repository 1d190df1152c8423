//! Cache Keys
//!
//! Deterministic key derivation from an owner identity and a tile
//! coordinate. Keys compare by value and carry a precomputed hash so that
//! shard routing and map lookups never rehash the identity blob.
//!
//! # Derivation
//!
//! - `idx = tile_y * num_tiles_x + tile_x`
//! - Owner with an identity blob: key bytes are `blob ++ idx.to_be_bytes()`
//! - Otherwise: `(identity_hash as u64) << 32 | (idx & 0xFFFF_FFFF)`
//!
//! Image keys use the same derivation without the index term.

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, Serializer};

use crate::raster::TileOwner;

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Finalizer spreading a packed key over all 64 bits
#[inline]
fn mix64(mut value: u64) -> u64 {
    value ^= value >> 33;
    value = value.wrapping_mul(0xff51afd7ed558ccd);
    value ^= value >> 33;
    value = value.wrapping_mul(0xc4ceb9fe1a85ec53);
    value ^ (value >> 33)
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum KeyRepr {
    Packed(u64),
    Blob(Bytes),
}

impl KeyRepr {
    fn route_hash(&self) -> u64 {
        match self {
            KeyRepr::Packed(v) => mix64(*v),
            KeyRepr::Blob(b) => fx_hash(b),
        }
    }
}

impl fmt::Display for KeyRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRepr::Packed(v) => write!(f, "{:016x}", v),
            KeyRepr::Blob(b) => {
                for byte in b.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Key of one cached tile, unique per (owner, tile coordinate)
#[derive(Clone, Debug, Eq)]
pub struct TileKey {
    hash: u64,
    repr: KeyRepr,
}

impl TileKey {
    /// Derive the key of tile `(tile_x, tile_y)` of `owner`
    pub fn derive(owner: &dyn TileOwner, tile_x: i32, tile_y: i32) -> Self {
        let idx = owner.tile_grid().linear_index(tile_x, tile_y);
        let repr = match owner.identity_blob() {
            Some(blob) => {
                let mut buf = BytesMut::with_capacity(blob.len() + 8);
                buf.put_slice(blob);
                buf.put_i64(idx);
                KeyRepr::Blob(buf.freeze())
            }
            None => {
                let high = (owner.identity_hash() as u64) << 32;
                KeyRepr::Packed(high | (idx as u64 & 0xFFFF_FFFF))
            }
        };
        Self {
            hash: repr.route_hash(),
            repr,
        }
    }

    /// Packed 64-bit value, if this key was built from an identity hash
    pub fn packed(&self) -> Option<u64> {
        match self.repr {
            KeyRepr::Packed(v) => Some(v),
            KeyRepr::Blob(_) => None,
        }
    }

    /// Precomputed hash, used for shard routing
    #[inline]
    pub fn route_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        self.hash == other.hash && self.repr == other.repr
    }
}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.repr.fmt(f)
    }
}

impl Serialize for TileKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Grouping key shared by every tile of one owner
#[derive(Clone, Debug, Eq)]
pub struct ImageKey {
    hash: u64,
    repr: KeyRepr,
}

impl ImageKey {
    /// Derive the grouping key of `owner`
    pub fn derive(owner: &dyn TileOwner) -> Self {
        let repr = match owner.identity_blob() {
            Some(blob) => KeyRepr::Blob(Bytes::copy_from_slice(blob)),
            None => KeyRepr::Packed(owner.identity_hash() as u64),
        };
        Self {
            hash: repr.route_hash(),
            repr,
        }
    }
}

impl PartialEq for ImageKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.repr == other.repr
    }
}

impl Hash for ImageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.repr.fmt(f)
    }
}

impl Serialize for ImageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
