/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// The size of a SHA-1 hash, which is always 20 bytes.
pub const SHA1_HASH_SIZE: usize = 20;
/// The size of a SHA-256 hash, which is always 32 bytes.
pub const SHA256_HASH_SIZE: usize = 32;
/// The size of the truncated HMAC-SHA256-160 used to authenticate AKE signatures.
pub const HMAC_SHA256_160_SIZE: usize = 20;

/// SHA-1 over the concatenation of `parts`.
pub fn sha1(parts: &[&[u8]]) -> [u8; SHA1_HASH_SIZE] {
    let mut hash = Sha1::new();
    for part in parts {
        Digest::update(&mut hash, part);
    }
    hash.finalize().into()
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; SHA256_HASH_SIZE] {
    let mut hash = Sha256::new();
    for part in parts {
        Digest::update(&mut hash, part);
    }
    hash.finalize().into()
}

pub fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; SHA1_HASH_SIZE] {
    let mut hm = Hmac::<Sha1>::new_from_slice(key).unwrap();
    hm.update(data);
    hm.finalize().into_bytes().into()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; SHA256_HASH_SIZE] {
    let mut hm = Hmac::<Sha256>::new_from_slice(key).unwrap();
    hm.update(data);
    hm.finalize().into_bytes().into()
}

/// HMAC-SHA256 truncated to its first 160 bits.
pub fn hmac_sha256_160(key: &[u8], data: &[u8]) -> [u8; HMAC_SHA256_160_SIZE] {
    let full = hmac_sha256(key, data);
    let mut out = [0u8; HMAC_SHA256_160_SIZE];
    out.copy_from_slice(&full[..HMAC_SHA256_160_SIZE]);
    out
}
