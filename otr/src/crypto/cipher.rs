/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

/// The specified size of an AES-128 key.
pub const AES_128_KEY_SIZE: usize = 16;
/// The specified size of an AES block, and so of the full counter block.
pub const AES_BLOCK_SIZE: usize = 16;
/// OTR only transmits the top half of the counter block, the bottom half always starts at zero.
pub const CTR_TOP_HALF_SIZE: usize = 8;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Encrypt or decrypt `data` in place with AES-128 in counter mode.
///
/// The initial counter block is `ctr_top || 0^64`, matching how OTR data messages and the
/// DH-Commit encryption of `g^x` use it.
pub fn aes128_ctr_in_place(key: &[u8; AES_128_KEY_SIZE], ctr_top: &[u8; CTR_TOP_HALF_SIZE], data: &mut [u8]) {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    iv[..CTR_TOP_HALF_SIZE].copy_from_slice(ctr_top);
    let mut cipher = Aes128Ctr::new(&(*key).into(), &iv.into());
    cipher.apply_keystream(data);
}

/// Allocating variant of `aes128_ctr_in_place`.
pub fn aes128_ctr(key: &[u8; AES_128_KEY_SIZE], ctr_top: &[u8; CTR_TOP_HALF_SIZE], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    aes128_ctr_in_place(key, ctr_top, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_mode_is_an_involution() {
        let key = [7u8; AES_128_KEY_SIZE];
        let ctr = [0, 0, 0, 0, 0, 0, 0, 1];
        let plain = b"attack at dawn, bring snacks".to_vec();
        let encrypted = aes128_ctr(&key, &ctr, &plain);
        assert_ne!(encrypted, plain);
        assert_eq!(aes128_ctr(&key, &ctr, &encrypted), plain);
    }

    #[test]
    fn distinct_counters_give_distinct_keystreams() {
        let key = [1u8; AES_128_KEY_SIZE];
        let zeros = [0u8; 32];
        let a = aes128_ctr(&key, &[0, 0, 0, 0, 0, 0, 0, 1], &zeros);
        let b = aes128_ctr(&key, &[0, 0, 0, 0, 0, 0, 0, 2], &zeros);
        assert_ne!(a, b);
    }
}
