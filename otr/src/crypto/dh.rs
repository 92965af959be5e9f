/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::sync::OnceLock;

use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::proto::{DH_GENERATOR, DH_MODULUS_HEX, DH_PRIVATE_KEY_SIZE};

/// The 1536-bit MODP group shared by the AKE, the data key ratchet and SMP.
pub struct DhGroup {
    pub modulus: BigUint,
    pub modulus_minus_two: BigUint,
    /// `(p - 1) / 2`, the order of the generator.
    pub order: BigUint,
    pub generator: BigUint,
}

/// Returns the process wide DH group parameters.
pub fn dh_group() -> &'static DhGroup {
    static GROUP: OnceLock<DhGroup> = OnceLock::new();
    GROUP.get_or_init(|| {
        let modulus = BigUint::parse_bytes(DH_MODULUS_HEX.as_bytes(), 16).unwrap();
        let one = BigUint::from(1u32);
        let two = BigUint::from(2u32);
        DhGroup {
            modulus_minus_two: &modulus - &two,
            order: (&modulus - &one) >> 1,
            generator: BigUint::from(DH_GENERATOR),
            modulus,
        }
    })
}

/// Check that `value` is a legal DH public value, `2 <= value <= p - 2`.
pub fn is_valid_dh_public(value: &BigUint) -> bool {
    let group = dh_group();
    *value >= BigUint::from(2u32) && *value <= group.modulus_minus_two
}

/// Uniformly draw `len` random bytes and interpret them as a big-endian integer.
pub fn random_biguint<R: RngCore + CryptoRng>(rng: &mut R, len: usize) -> BigUint {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    rng.fill_bytes(&mut bytes);
    BigUint::from_bytes_be(&bytes)
}

/// A Diffie-Hellman key pair in the MODP group.
#[derive(Clone)]
pub struct DhKeyPair {
    private: BigUint,
    public: BigUint,
}

impl DhKeyPair {
    /// Randomly generate a new key pair with a 320-bit private exponent.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let group = dh_group();
        let private = random_biguint(rng, DH_PRIVATE_KEY_SIZE);
        let public = group.generator.modpow(&private, &group.modulus);
        Self { private, public }
    }

    pub fn public_key(&self) -> &BigUint {
        &self.public
    }

    /// Compute the raw shared secret `remote^private mod p`.
    ///
    /// The caller must have checked `remote` with `is_valid_dh_public`.
    pub fn agree(&self, remote: &BigUint) -> BigUint {
        remote.modpow(&self.private, &dh_group().modulus)
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn both_sides_agree() {
        let a = DhKeyPair::generate(&mut OsRng);
        let b = DhKeyPair::generate(&mut OsRng);
        assert!(is_valid_dh_public(a.public_key()));
        assert!(is_valid_dh_public(b.public_key()));
        assert_eq!(a.agree(b.public_key()), b.agree(a.public_key()));
    }

    #[test]
    fn rejects_degenerate_public_values() {
        let group = dh_group();
        assert!(!is_valid_dh_public(&BigUint::from(0u32)));
        assert!(!is_valid_dh_public(&BigUint::from(1u32)));
        assert!(is_valid_dh_public(&BigUint::from(2u32)));
        assert!(is_valid_dh_public(&group.modulus_minus_two));
        assert!(!is_valid_dh_public(&(&group.modulus - 1u32)));
        assert!(!is_valid_dh_public(&group.modulus));
    }

    #[test]
    fn generator_has_prime_order() {
        let group = dh_group();
        assert_eq!(
            group.generator.modpow(&group.order, &group.modulus),
            BigUint::from(1u32)
        );
        assert_eq!(group.modulus.bits(), 1536);
    }
}
