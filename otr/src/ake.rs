/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::*;
use crate::message::EncodedBody;
use crate::proto::*;
use crate::result::{fault, FaultType, ReceiveError};
use crate::serial::{mpi_bytes, OtrReader, OtrWriter};
use crate::LogEvent;

/// Keys derived from the AKE shared secret `s` as `SHA256(tag || MPI(s))`.
#[derive(Clone)]
pub(crate) struct AkeKeys {
    pub ssid: [u8; SSID_SIZE],
    c: Zeroizing<[u8; AES_KEY_SIZE]>,
    c_prime: Zeroizing<[u8; AES_KEY_SIZE]>,
    m1: Zeroizing<[u8; SHA256_HASH_SIZE]>,
    m2: Zeroizing<[u8; SHA256_HASH_SIZE]>,
    m1_prime: Zeroizing<[u8; SHA256_HASH_SIZE]>,
    m2_prime: Zeroizing<[u8; SHA256_HASH_SIZE]>,
}

impl AkeKeys {
    fn derive(secret: &BigUint) -> Self {
        let secret = Zeroizing::new(mpi_bytes(secret));
        let h2 = |tag: u8| Zeroizing::new(sha256(&[&[tag], secret.as_slice()]));
        let ssid_hash = h2(AKE_TAG_SSID);
        let c_hash = h2(AKE_TAG_C);
        let mut ssid = [0u8; SSID_SIZE];
        ssid.copy_from_slice(&ssid_hash[..SSID_SIZE]);
        let mut c = Zeroizing::new([0u8; AES_KEY_SIZE]);
        c.copy_from_slice(&c_hash[..AES_KEY_SIZE]);
        let mut c_prime = Zeroizing::new([0u8; AES_KEY_SIZE]);
        c_prime.copy_from_slice(&c_hash[AES_KEY_SIZE..]);
        Self {
            ssid,
            c,
            c_prime,
            m1: h2(AKE_TAG_M1),
            m2: h2(AKE_TAG_M2),
            m1_prime: h2(AKE_TAG_M1_PRIME),
            m2_prime: h2(AKE_TAG_M2_PRIME),
        }
    }
}

/// The in-flight handshake of one session instance.
///
/// The side that sends the DH-Commit moves through `AwaitingDhKey` and `AwaitingSig`, the side
/// that answers it through `AwaitingRevealSig`. Completion always returns to `None`.
#[derive(Clone, Default)]
pub(crate) enum AuthState {
    #[default]
    None,
    AwaitingDhKey {
        version: u16,
        our_dh: DhKeyPair,
        r: Zeroizing<[u8; AKE_R_SIZE]>,
        encrypted_gx: Vec<u8>,
        hashed_gx: [u8; SHA256_HASH_SIZE],
    },
    AwaitingRevealSig {
        version: u16,
        our_dh: DhKeyPair,
        their_encrypted_gx: Vec<u8>,
        their_hashed_gx: [u8; SHA256_HASH_SIZE],
    },
    AwaitingSig {
        version: u16,
        our_dh: DhKeyPair,
        their_gy: BigUint,
        keys: AkeKeys,
        reveal_signature: EncodedBody,
    },
}

impl AuthState {
    /// The protocol version of the handshake in progress.
    pub fn version(&self) -> Option<u16> {
        match self {
            AuthState::None => None,
            AuthState::AwaitingDhKey { version, .. }
            | AuthState::AwaitingRevealSig { version, .. }
            | AuthState::AwaitingSig { version, .. } => Some(*version),
        }
    }
}

/// Everything the data message layer needs from a finished AKE.
pub(crate) struct AkeResult {
    pub version: u16,
    pub our_dh: DhKeyPair,
    pub their_dh: BigUint,
    pub their_key_id: u32,
    pub their_public_key: LongTermPublicKey,
    pub ssid: [u8; SSID_SIZE],
}

/// The outcome of one AKE step. Nothing is applied to the instance until the reply was sent.
pub(crate) struct Transition {
    pub state: AuthState,
    pub reply: Option<EncodedBody>,
    pub completed: Option<AkeResult>,
    #[cfg_attr(not(feature = "logging"), allow(dead_code))]
    pub event: LogEvent<'static>,
}

impl Transition {
    fn reply(state: AuthState, reply: EncodedBody, event: LogEvent<'static>) -> Self {
        Self { state, reply: Some(reply), completed: None, event }
    }
}

/// `MAC(m, MPI ours || MPI theirs || PUBKEY || keyid)`, the value each side signs.
fn signed_value(
    m: &[u8; SHA256_HASH_SIZE],
    first: &BigUint,
    second: &BigUint,
    public_key: &LongTermPublicKey,
    key_id: u32,
) -> [u8; SHA256_HASH_SIZE] {
    let mut w = OtrWriter::new();
    w.mpi(first).mpi(second).public_key(public_key).int(key_id);
    hmac_sha256(m, w.as_bytes())
}

/// Build `AES_c(PUBKEY || keyid || SIG(M))` and its MAC under `m2`.
fn encrypt_signature(
    keypair: &LongTermKeyPair,
    key_id: u32,
    signed: &[u8],
    c: &[u8; AES_KEY_SIZE],
    m2: &[u8; SHA256_HASH_SIZE],
) -> (Vec<u8>, [u8; MAC_SIZE]) {
    let mut x = OtrWriter::new();
    x.public_key(keypair.public_key()).int(key_id).signature(&keypair.sign(signed));
    let encrypted = aes128_ctr(c, &[0u8; CTR_SIZE], x.as_bytes());
    let mut data = OtrWriter::new();
    data.data(&encrypted);
    let mac = hmac_sha256_160(m2, data.as_bytes());
    (encrypted, mac)
}

/// Check the MAC, then decrypt and parse `PUBKEY || keyid || SIG`.
fn decrypt_signature(
    encrypted: &[u8],
    mac: &[u8; MAC_SIZE],
    c: &[u8; AES_KEY_SIZE],
    m2: &[u8; SHA256_HASH_SIZE],
) -> Result<(LongTermPublicKey, u32, [u8; P384_SIGNATURE_SIZE]), ReceiveError> {
    let mut data = OtrWriter::new();
    data.data(encrypted);
    if !secure_eq(&hmac_sha256_160(m2, data.as_bytes()), mac) {
        return Err(fault!(FaultType::FailedAuth));
    }
    let x = aes128_ctr(c, &[0u8; CTR_SIZE], encrypted);
    let mut r = OtrReader::new(&x);
    let public_key = r.public_key()?;
    let key_id = r.int()?;
    let signature = r.signature()?;
    r.finish()?;
    if key_id == 0 {
        return Err(fault!(FaultType::InvalidMessage));
    }
    Ok((public_key, key_id, signature))
}

/// Begin a handshake by committing to a fresh `g^x`.
pub(crate) fn start<R: RngCore + CryptoRng>(version: u16, rng: &mut R) -> (AuthState, EncodedBody) {
    let our_dh = DhKeyPair::generate(rng);
    let mut r = Zeroizing::new([0u8; AKE_R_SIZE]);
    rng.fill_bytes(r.as_mut_slice());
    let gx = mpi_bytes(our_dh.public_key());
    let encrypted_gx = aes128_ctr(&r, &[0u8; CTR_SIZE], &gx);
    let hashed_gx = sha256(&[gx.as_slice()]);
    let commit = EncodedBody::DhCommit { encrypted_gx: encrypted_gx.clone(), hashed_gx };
    (AuthState::AwaitingDhKey { version, our_dh, r, encrypted_gx, hashed_gx }, commit)
}

/// Handle a DH-Commit in any state.
pub(crate) fn handle_dh_commit<R: RngCore + CryptoRng>(
    state: &AuthState,
    version: u16,
    encrypted_gx: &[u8],
    hashed_gx: &[u8; SHA256_HASH_SIZE],
    rng: &mut R,
) -> Transition {
    match state {
        AuthState::AwaitingDhKey { encrypted_gx: ours, hashed_gx: our_hash, .. } if our_hash[..] > hashed_gx[..] => {
            let commit = EncodedBody::DhCommit { encrypted_gx: ours.clone(), hashed_gx: *our_hash };
            return Transition::reply(state.clone(), commit, LogEvent::WonCommitRaceResentDhCommit);
        }
        AuthState::AwaitingRevealSig { version: current, our_dh, .. } if *current == version => {
            let state = AuthState::AwaitingRevealSig {
                version,
                our_dh: our_dh.clone(),
                their_encrypted_gx: encrypted_gx.to_vec(),
                their_hashed_gx: *hashed_gx,
            };
            let reply = EncodedBody::DhKey { gy: our_dh.public_key().clone() };
            return Transition::reply(state, reply, LogEvent::ReceivedDhCommitResentDhKey);
        }
        _ => {}
    }
    let event = if matches!(state, AuthState::AwaitingDhKey { .. }) {
        LogEvent::LostCommitRace
    } else {
        LogEvent::ReceivedDhCommitSentDhKey
    };
    let our_dh = DhKeyPair::generate(rng);
    let reply = EncodedBody::DhKey { gy: our_dh.public_key().clone() };
    let state = AuthState::AwaitingRevealSig {
        version,
        our_dh,
        their_encrypted_gx: encrypted_gx.to_vec(),
        their_hashed_gx: *hashed_gx,
    };
    Transition::reply(state, reply, event)
}

/// Handle a DH-Key. Only meaningful after we sent a DH-Commit.
pub(crate) fn handle_dh_key(
    state: &AuthState,
    gy: &BigUint,
    keypair: &LongTermKeyPair,
) -> Result<Transition, ReceiveError> {
    match state {
        AuthState::AwaitingDhKey { version, our_dh, r, .. } => {
            if !is_valid_dh_public(gy) {
                return Err(fault!(FaultType::IllegalDhValue));
            }
            let keys = AkeKeys::derive(&our_dh.agree(gy));
            let mb = signed_value(&keys.m1, our_dh.public_key(), gy, keypair.public_key(), INITIAL_KEY_ID);
            let (encrypted_signature, mac) = encrypt_signature(keypair, INITIAL_KEY_ID, &mb, &keys.c, &keys.m2);
            let reveal_signature = EncodedBody::RevealSignature { r: r.to_vec(), encrypted_signature, mac };
            let state = AuthState::AwaitingSig {
                version: *version,
                our_dh: our_dh.clone(),
                their_gy: gy.clone(),
                keys,
                reveal_signature: reveal_signature.clone(),
            };
            Ok(Transition::reply(state, reveal_signature, LogEvent::ReceivedDhKeySentRevealSignature))
        }
        AuthState::AwaitingSig { their_gy, reveal_signature, .. } if their_gy == gy => Ok(Transition::reply(
            state.clone(),
            reveal_signature.clone(),
            LogEvent::ReceivedDhKeyResentRevealSignature,
        )),
        _ => Err(fault!(FaultType::OutOfSequence)),
    }
}

/// Handle a Reveal-Signature: authenticate the peer and answer with our Signature.
pub(crate) fn handle_reveal_signature(
    state: &AuthState,
    r: &[u8],
    encrypted_signature: &[u8],
    mac: &[u8; MAC_SIZE],
    keypair: &LongTermKeyPair,
) -> Result<Transition, ReceiveError> {
    let AuthState::AwaitingRevealSig { version, our_dh, their_encrypted_gx, their_hashed_gx } = state else {
        return Err(fault!(FaultType::OutOfSequence));
    };
    let r: &[u8; AKE_R_SIZE] = r.try_into().map_err(|_| fault!(FaultType::InvalidMessage))?;
    let gx_bytes = aes128_ctr(r, &[0u8; CTR_SIZE], their_encrypted_gx);
    if !secure_eq(&sha256(&[gx_bytes.as_slice()]), their_hashed_gx) {
        return Err(fault!(FaultType::FailedAuth));
    }
    let mut reader = OtrReader::new(&gx_bytes);
    let gx = reader.mpi()?;
    reader.finish()?;
    if !is_valid_dh_public(&gx) {
        return Err(fault!(FaultType::IllegalDhValue));
    }
    let keys = AkeKeys::derive(&our_dh.agree(&gx));
    let (their_public_key, their_key_id, signature) =
        decrypt_signature(encrypted_signature, mac, &keys.c, &keys.m2)?;
    let mb = signed_value(&keys.m1, &gx, our_dh.public_key(), &their_public_key, their_key_id);
    if !their_public_key.verify(&mb, &signature) {
        return Err(fault!(FaultType::FailedAuth));
    }

    let ma = signed_value(&keys.m1_prime, our_dh.public_key(), &gx, keypair.public_key(), INITIAL_KEY_ID);
    let (encrypted_signature, mac) = encrypt_signature(keypair, INITIAL_KEY_ID, &ma, &keys.c_prime, &keys.m2_prime);
    Ok(Transition {
        state: AuthState::None,
        reply: Some(EncodedBody::Signature { encrypted_signature, mac }),
        completed: Some(AkeResult {
            version: *version,
            our_dh: our_dh.clone(),
            their_dh: gx,
            their_key_id,
            their_public_key,
            ssid: keys.ssid,
        }),
        event: LogEvent::ReceivedRevealSignatureSentSignature,
    })
}

/// Handle a Signature: authenticate the peer and finish the handshake.
pub(crate) fn handle_signature(
    state: &AuthState,
    encrypted_signature: &[u8],
    mac: &[u8; MAC_SIZE],
) -> Result<Transition, ReceiveError> {
    let AuthState::AwaitingSig { version, our_dh, their_gy, keys, .. } = state else {
        return Err(fault!(FaultType::OutOfSequence));
    };
    let (their_public_key, their_key_id, signature) =
        decrypt_signature(encrypted_signature, mac, &keys.c_prime, &keys.m2_prime)?;
    let ma = signed_value(&keys.m1_prime, their_gy, our_dh.public_key(), &their_public_key, their_key_id);
    if !their_public_key.verify(&ma, &signature) {
        return Err(fault!(FaultType::FailedAuth));
    }
    Ok(Transition {
        state: AuthState::None,
        reply: None,
        completed: Some(AkeResult {
            version: *version,
            our_dh: our_dh.clone(),
            their_dh: their_gy.clone(),
            their_key_id,
            their_public_key,
            ssid: keys.ssid,
        }),
        event: LogEvent::ReceivedSignature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    const V3: u16 = PROTOCOL_VERSION_3;

    struct Party {
        keypair: LongTermKeyPair,
        state: AuthState,
        result: Option<AkeResult>,
    }

    impl Party {
        fn new() -> Self {
            Self { keypair: LongTermKeyPair::generate(&mut OsRng), state: AuthState::None, result: None }
        }

        fn receive(&mut self, body: &EncodedBody) -> Result<Option<EncodedBody>, ReceiveError> {
            let transition = match body {
                EncodedBody::DhCommit { encrypted_gx, hashed_gx } => {
                    handle_dh_commit(&self.state, V3, encrypted_gx, hashed_gx, &mut OsRng)
                }
                EncodedBody::DhKey { gy } => handle_dh_key(&self.state, gy, &self.keypair)?,
                EncodedBody::RevealSignature { r, encrypted_signature, mac } => {
                    handle_reveal_signature(&self.state, r, encrypted_signature, mac, &self.keypair)?
                }
                EncodedBody::Signature { encrypted_signature, mac } => {
                    handle_signature(&self.state, encrypted_signature, mac)?
                }
                EncodedBody::Data(_) => unreachable!(),
            };
            self.state = transition.state;
            if transition.completed.is_some() {
                self.result = transition.completed;
            }
            Ok(transition.reply)
        }
    }

    fn assert_converged(a: &Party, b: &Party) {
        let ra = a.result.as_ref().unwrap();
        let rb = b.result.as_ref().unwrap();
        assert_eq!(ra.our_dh.agree(&ra.their_dh), rb.our_dh.agree(&rb.their_dh));
        assert_eq!(ra.ssid, rb.ssid);
        assert_eq!(&ra.their_public_key, b.keypair.public_key());
        assert_eq!(&rb.their_public_key, a.keypair.public_key());
        assert_eq!(ra.their_key_id, INITIAL_KEY_ID);
        assert!(matches!(a.state, AuthState::None) && matches!(b.state, AuthState::None));
    }

    #[test]
    fn straight_handshake_converges() {
        let mut bob = Party::new();
        let mut alice = Party::new();
        let (state, commit) = start(V3, &mut OsRng);
        bob.state = state;
        let dh_key = alice.receive(&commit).unwrap().unwrap();
        let reveal = bob.receive(&dh_key).unwrap().unwrap();
        let signature = alice.receive(&reveal).unwrap().unwrap();
        assert!(bob.receive(&signature).unwrap().is_none());
        assert_converged(&bob, &alice);
    }

    #[test]
    fn simultaneous_commits_converge() {
        let mut a = Party::new();
        let mut b = Party::new();
        let (state, a_commit) = start(V3, &mut OsRng);
        a.state = state;
        let (state, b_commit) = start(V3, &mut OsRng);
        b.state = state;

        let from_a = a.receive(&b_commit).unwrap().unwrap();
        let from_b = b.receive(&a_commit).unwrap().unwrap();
        // Exactly one side wins and resends its commit, the other answers with a DH-Key.
        let a_won = matches!(from_a, EncodedBody::DhCommit { .. });
        let b_won = matches!(from_b, EncodedBody::DhCommit { .. });
        assert!(a_won != b_won, "commit race must have exactly one winner");
        let (mut winner, mut loser, resent_commit, dh_key) =
            if a_won { (a, b, from_a, from_b) } else { (b, a, from_b, from_a) };
        assert!(matches!(dh_key, EncodedBody::DhKey { .. }));
        let reveal = winner.receive(&dh_key).unwrap().unwrap();
        // The loser sees the winner's commit again and resends the same DH-Key.
        let dh_key_again = loser.receive(&resent_commit).unwrap().unwrap();
        assert_eq!(dh_key_again, dh_key);
        // A duplicate DH-Key with the same g^y makes the winner resend the same Reveal-Signature.
        assert_eq!(winner.receive(&dh_key_again).unwrap().unwrap(), reveal);
        let signature = loser.receive(&reveal).unwrap().unwrap();
        assert!(winner.receive(&signature).unwrap().is_none());
        assert_converged(&winner, &loser);
    }

    #[test]
    fn changed_dh_key_is_ignored_while_awaiting_signature() {
        let mut bob = Party::new();
        let mut alice = Party::new();
        let (state, commit) = start(V3, &mut OsRng);
        bob.state = state;
        let dh_key = alice.receive(&commit).unwrap().unwrap();
        bob.receive(&dh_key).unwrap();
        let other = EncodedBody::DhKey { gy: DhKeyPair::generate(&mut OsRng).public_key().clone() };
        assert_eq!(bob.receive(&other).unwrap_err().fault(), Some(FaultType::OutOfSequence));
        assert!(matches!(bob.state, AuthState::AwaitingSig { .. }));
    }

    #[test]
    fn tampered_reveal_signature_is_dropped_without_state_change() {
        let mut bob = Party::new();
        let mut alice = Party::new();
        let (state, commit) = start(V3, &mut OsRng);
        bob.state = state;
        let dh_key = alice.receive(&commit).unwrap().unwrap();
        let reveal = bob.receive(&dh_key).unwrap().unwrap();
        let EncodedBody::RevealSignature { r, encrypted_signature, mac } = reveal.clone() else {
            panic!("expected a reveal signature");
        };

        let mut bad_sig = encrypted_signature.clone();
        bad_sig[3] ^= 1;
        let tampered = EncodedBody::RevealSignature { r: r.clone(), encrypted_signature: bad_sig, mac };
        assert_eq!(alice.receive(&tampered).unwrap_err().fault(), Some(FaultType::FailedAuth));

        let mut bad_r = r.clone();
        bad_r[0] ^= 1;
        let tampered = EncodedBody::RevealSignature { r: bad_r, encrypted_signature, mac };
        assert_eq!(alice.receive(&tampered).unwrap_err().fault(), Some(FaultType::FailedAuth));

        assert!(matches!(alice.state, AuthState::AwaitingRevealSig { .. }));
        let signature = alice.receive(&reveal).unwrap().unwrap();
        bob.receive(&signature).unwrap();
        assert_converged(&bob, &alice);
    }

    #[test]
    fn illegal_dh_values_are_rejected() {
        let bob = Party::new();
        let (state, _) = start(V3, &mut OsRng);
        for gy in [BigUint::from(1u32), dh_group().modulus.clone() - 1u32] {
            let e = handle_dh_key(&state, &gy, &bob.keypair).err().unwrap();
            assert_eq!(e.fault(), Some(FaultType::IllegalDhValue));
        }
    }

    #[test]
    fn unexpected_messages_are_out_of_sequence() {
        let bob = Party::new();
        let gy = DhKeyPair::generate(&mut OsRng).public_key().clone();
        let e = handle_dh_key(&AuthState::None, &gy, &bob.keypair).err().unwrap();
        assert_eq!(e.fault(), Some(FaultType::OutOfSequence));
        let e = handle_signature(&AuthState::None, &[0; 8], &[0; MAC_SIZE]).err().unwrap();
        assert_eq!(e.fault(), Some(FaultType::OutOfSequence));
    }
}
