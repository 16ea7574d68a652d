// Copyright 2025 the Corax Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Stable id-to-partition routing.
//!
//! Both hashes are part of the wire contract: every replica must route an
//! id to the same metadata partition, across brokers and releases, or
//! clients end up talking to a broker that never loaded their state. Do not
//! change either formula.

/// Routes a consumer group id to its metadata partition.
///
/// Murmur3 32-bit (seed 0) over the UTF-8 id, masked positive, then
/// sign-safe modulo by the partition count.
pub fn route_group(group_id: &str, num_partitions: i32) -> i32 {
    sign_safe_mod(murmur3_32(group_id.as_bytes()) & 0x7fff_ffff, num_partitions)
}

/// Routes a transactional id to its metadata partition.
///
/// The absolute value of the Java-compatible string hash, modulo the
/// partition count. `abs` is taken by masking the sign bit so that the
/// `i32::MIN` boundary keeps its historical bit pattern.
pub fn route_txn(transactional_id: &str, num_partitions: i32) -> i32 {
    (java_string_hash(transactional_id) & 0x7fff_ffff) % num_partitions
}

fn sign_safe_mod(dividend: i32, divisor: i32) -> i32 {
    let rem = dividend % divisor;
    if rem < 0 {
        rem + divisor
    } else {
        rem
    }
}

/// `String.hashCode` as the JVM computes it: `h = 31 * h + c` over UTF-16
/// code units, wrapping at 32 bits.
fn java_string_hash(s: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in s.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
    }
    hash
}

/// Murmur3, x86 32-bit variant, seed 0.
fn murmur3_32(data: &[u8]) -> i32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes(chunk.try_into().expect("chunk is 4 bytes"));
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    let mut k1: u32 = 0;
    if tail.len() >= 3 {
        k1 ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        k1 ^= u32::from(tail[0]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1 as i32
}
