/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use p384::ecdsa::signature::{Signer, Verifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::{CompressedPoint, PublicKey};
use rand_core::{CryptoRng, RngCore};

use crate::crypto::sha1;

/// The size in bytes of a P-384 public key when in compressed SEC1-encoded format.
pub const P384_PUBLIC_KEY_SIZE: usize = 49;
/// The size in bytes of a fixed width `r || s` P-384 ECDSA signature.
pub const P384_SIGNATURE_SIZE: usize = 96;
/// The size in bytes of a long-term key fingerprint.
pub const FINGERPRINT_SIZE: usize = 20;

/// A long-term NIST P-384 ECDSA public key, used to authenticate the AKE.
#[derive(Clone)]
pub struct LongTermPublicKey {
    verifying_key: VerifyingKey,
    bytes: [u8; P384_PUBLIC_KEY_SIZE],
}

impl LongTermPublicKey {
    /// Parse a SEC1 encoded public key.
    ///
    /// Returns `None` if `raw_key` is not a point on the P-384 curve.
    pub fn from_bytes(raw_key: &[u8]) -> Option<Self> {
        let public_key = PublicKey::from_sec1_bytes(raw_key).ok()?;
        Some(Self::from_public_key(&public_key))
    }

    fn from_public_key(public_key: &PublicKey) -> Self {
        let mut bytes = [0u8; P384_PUBLIC_KEY_SIZE];
        bytes.copy_from_slice(CompressedPoint::from(public_key).as_slice());
        Self { verifying_key: VerifyingKey::from(public_key), bytes }
    }

    /// The compressed SEC1 encoding of this key.
    pub fn to_bytes(&self) -> [u8; P384_PUBLIC_KEY_SIZE] {
        self.bytes
    }

    /// SHA-1 of the compressed SEC1 encoding.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_SIZE] {
        sha1(&[&self.bytes])
    }

    /// The fingerprint as upper case hex, the form shown to users for manual verification.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode_upper(self.fingerprint())
    }

    /// Verify a fixed width ECDSA signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(signature) => self.verifying_key.verify(message, &signature).is_ok(),
            Err(_) => false,
        }
    }
}

impl PartialEq for LongTermPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}
impl Eq for LongTermPublicKey {}

impl std::hash::Hash for LongTermPublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state)
    }
}

impl std::fmt::Debug for LongTermPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LongTermPublicKey").field(&self.fingerprint_hex()).finish()
    }
}

/// A long-term NIST P-384 ECDSA key pair.
///
/// The private key is zeroed when dropped.
pub struct LongTermKeyPair {
    signing_key: SigningKey,
    public_key: LongTermPublicKey,
}

impl LongTermKeyPair {
    /// Randomly generate a new key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_signing_key(SigningKey::random(rng))
    }

    /// Restore a key pair from its 48 byte secret scalar.
    pub fn from_secret_bytes(secret: &[u8]) -> Option<Self> {
        SigningKey::from_slice(secret).ok().map(Self::from_signing_key)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = LongTermPublicKey::from_public_key(&PublicKey::from(signing_key.verifying_key()));
        Self { signing_key, public_key }
    }

    pub fn public_key(&self) -> &LongTermPublicKey {
        &self.public_key
    }

    /// Produce a deterministic fixed width ECDSA signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; P384_SIGNATURE_SIZE] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; P384_SIGNATURE_SIZE];
        out.copy_from_slice(signature.to_bytes().as_slice());
        out
    }
}
