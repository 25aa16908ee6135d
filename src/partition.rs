//! Hash partitioning of object identifiers onto tablets
//!
//! An encoded identifier is hashed with 64-bit FNV-1a, the hash is condensed
//! to 32 bits by keeping its even-position bits, and the condensed value is
//! reduced modulo the shard count. The mapping depends only on the encoded
//! bytes and the shard count, so it is stable across processes for as long as
//! the shard count stays the same.

use std::num::NonZeroU32;

/// FNV-1a 64-bit offset basis
pub const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Compute the 64-bit FNV-1a hash of `bytes`
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Pack the bits at even positions of `value` into a `u32`
///
/// Bit `2i` of the input becomes bit `i` of the output, so bit 62 lands in
/// the most significant position and bit 0 in the least.
#[inline]
pub fn condense_u64_even(value: u64) -> u32 {
    let mut condensed = 0u32;
    for i in (0..32).rev() {
        condensed = (condensed << 1) | ((value >> (i * 2)) & 1) as u32;
    }
    condensed
}

/// Map an encoded identifier onto a shard index in `[0, shard_count)`
#[inline]
pub fn partition_index(encoded: &[u8], shard_count: NonZeroU32) -> u32 {
    condense_u64_even(fnv1a_64(encoded)) % shard_count.get()
}
