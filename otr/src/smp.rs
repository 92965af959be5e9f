/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};

use crate::crypto::{dh_group, is_valid_dh_public, random_biguint, sha256, FINGERPRINT_SIZE};
use crate::proto::*;
use crate::serial::{mpi_bytes, OtrReader, OtrWriter};
use crate::tlv::Tlv;

/// Where the current exchange stands.
#[derive(Clone)]
enum Expect {
    One,
    /// The peer sent SMP1 and we are waiting for our user to supply the secret.
    Asked { g2a: BigUint, g3a: BigUint },
    Two { secret: BigUint, a2: BigUint, a3: BigUint },
    Three { g3a: BigUint, g2: BigUint, g3: BigUint, b3: BigUint, pb: BigUint, qb: BigUint },
    Four { g3b: BigUint, pa_pb: BigUint, qa_qb: BigUint, a3: BigUint },
}

/// The result of processing one SMP TLV.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SmpOutcome {
    /// The peer started SMP. Ask the user for the secret.
    SecretRequested { question: Option<String> },
    /// Send this TLV back and wait for the next step.
    Reply(Tlv),
    /// The exchange is over, `reply` is the last message if it is ours to send.
    Finished { reply: Option<Tlv>, verified: bool, approved: bool },
    /// The peer aborted.
    Aborted,
    /// The peer's proofs did not check out. The exchange was reset.
    Cheated,
    /// The TLV does not belong to the current step. Nothing changed.
    OutOfOrder,
}

/// One side of the Socialist Millionaire Protocol over the 1536-bit MODP group.
#[derive(Clone)]
pub(crate) struct SmpEngine {
    expect: Expect,
    /// The exchange was started with a question.
    approved: bool,
}

/// `SHA256(0x01 || initiator fingerprint || responder fingerprint || ssid || secret)`
pub(crate) fn combined_secret(
    initiator_fingerprint: &[u8; FINGERPRINT_SIZE],
    responder_fingerprint: &[u8; FINGERPRINT_SIZE],
    ssid: &[u8; SSID_SIZE],
    secret: &[u8],
) -> BigUint {
    BigUint::from_bytes_be(&sha256(&[
        &[SMP_SECRET_VERSION],
        &initiator_fingerprint[..],
        &responder_fingerprint[..],
        &ssid[..],
        secret,
    ]))
}

fn hash(version: u8, a: &BigUint, b: Option<&BigUint>) -> BigUint {
    let a = mpi_bytes(a);
    let b = b.map(mpi_bytes).unwrap_or_default();
    BigUint::from_bytes_be(&sha256(&[&[version], a.as_slice(), b.as_slice()]))
}

fn pow(base: &BigUint, exponent: &BigUint) -> BigUint {
    base.modpow(exponent, &dh_group().modulus)
}

fn g1(exponent: &BigUint) -> BigUint {
    pow(&dh_group().generator, exponent)
}

fn mul(a: &BigUint, b: &BigUint) -> BigUint {
    (a * b) % &dh_group().modulus
}

fn div(a: &BigUint, b: &BigUint) -> BigUint {
    let group = dh_group();
    mul(a, &b.modpow(&group.modulus_minus_two, &group.modulus))
}

/// `r - a * c mod q`
fn sub_mul_mod_q(r: &BigUint, a: &BigUint, c: &BigUint) -> BigUint {
    let q = &dh_group().order;
    (r % q + q - (a * c) % q) % q
}

fn is_valid_exponent(x: &BigUint) -> bool {
    *x >= BigUint::from(1u32) && *x < dh_group().order
}

fn random_exponent<R: RngCore + CryptoRng>(rng: &mut R) -> BigUint {
    random_biguint(rng, SMP_EXPONENT_SIZE)
}

/// Prove knowledge of `exponent` in `g1^exponent`: `(c, d)` with `c = h(version, g1^r)`.
fn prove<R: RngCore + CryptoRng>(version: u8, exponent: &BigUint, rng: &mut R) -> (BigUint, BigUint) {
    let r = random_exponent(rng);
    let c = hash(version, &g1(&r), None);
    let d = sub_mul_mod_q(&r, exponent, &c);
    (c, d)
}

fn check_proof(version: u8, public: &BigUint, c: &BigUint, d: &BigUint) -> bool {
    *c == hash(version, &mul(&g1(d), &pow(public, c)), None)
}

fn encode(tlv_type: u16, prefix: Option<&str>, mpis: &[BigUint]) -> Tlv {
    let mut w = OtrWriter::new();
    if let Some(question) = prefix {
        w.raw(question.as_bytes()).byte(0);
    }
    w.mpis(mpis);
    Tlv::new(tlv_type, w.into_bytes())
}

fn decode(value: &[u8], count: usize) -> Option<Vec<BigUint>> {
    let mut r = OtrReader::new(value);
    let mpis = r.mpis(count).ok()?;
    r.finish().ok()?;
    Some(mpis)
}

impl SmpEngine {
    pub fn new() -> Self {
        Self { expect: Expect::One, approved: false }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True once either side sent SMP1 and the exchange has not finished.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self.expect, Expect::One)
    }

    /// True while the peer's SMP1 waits for our answer.
    #[cfg(test)]
    pub fn is_asked(&self) -> bool {
        matches!(self.expect, Expect::Asked { .. })
    }

    /// Start an exchange, returning the SMP1 or SMP1Q TLV.
    pub fn initiate<R: RngCore + CryptoRng>(&mut self, question: Option<&str>, secret: BigUint, rng: &mut R) -> Tlv {
        let a2 = random_exponent(rng);
        let a3 = random_exponent(rng);
        let (c2, d2) = prove(1, &a2, rng);
        let (c3, d3) = prove(2, &a3, rng);
        let tlv_type = if question.is_some() { TLV_SMP1Q } else { TLV_SMP1 };
        let tlv = encode(tlv_type, question, &[g1(&a2), c2, d2, g1(&a3), c3, d3]);
        self.expect = Expect::Two { secret, a2, a3 };
        self.approved = question.is_some();
        tlv
    }

    /// Answer the peer's SMP1 with our secret. `None` if the peer did not ask.
    pub fn respond<R: RngCore + CryptoRng>(&mut self, secret: BigUint, rng: &mut R) -> Option<Tlv> {
        let Expect::Asked { g2a, g3a } = &self.expect else {
            return None;
        };
        let b2 = random_exponent(rng);
        let b3 = random_exponent(rng);
        let (c2, d2) = prove(3, &b2, rng);
        let (c3, d3) = prove(4, &b3, rng);
        let g2 = pow(g2a, &b2);
        let g3 = pow(g3a, &b3);

        let r4 = random_exponent(rng);
        let r5 = random_exponent(rng);
        let r6 = random_exponent(rng);
        let pb = pow(&g3, &r4);
        let qb = mul(&g1(&r4), &pow(&g2, &secret));
        let cp = hash(5, &pow(&g3, &r5), Some(&mul(&g1(&r5), &pow(&g2, &r6))));
        let d5 = sub_mul_mod_q(&r5, &r4, &cp);
        let d6 = sub_mul_mod_q(&r6, &secret, &cp);

        let tlv = encode(
            TLV_SMP2,
            None,
            &[g1(&b2), c2, d2, g1(&b3), c3, d3, pb.clone(), qb.clone(), cp, d5, d6],
        );
        self.expect = Expect::Three { g3a: g3a.clone(), g2, g3, b3, pb, qb };
        Some(tlv)
    }

    /// Reset and produce the TLV telling the peer we gave up.
    pub fn abort(&mut self) -> Tlv {
        self.reset();
        Tlv::empty(TLV_SMP_ABORT)
    }

    /// Advance the exchange with one SMP TLV from the peer.
    pub fn process<R: RngCore + CryptoRng>(&mut self, tlv: &Tlv, rng: &mut R) -> SmpOutcome {
        let outcome = match tlv.tlv_type {
            TLV_SMP_ABORT => {
                self.reset();
                return SmpOutcome::Aborted;
            }
            TLV_SMP1 | TLV_SMP1Q if matches!(self.expect, Expect::One | Expect::Asked { .. }) => self.step2a(tlv),
            TLV_SMP2 if matches!(self.expect, Expect::Two { .. }) => self.step3(&tlv.value, rng),
            TLV_SMP3 if matches!(self.expect, Expect::Three { .. }) => self.step4(&tlv.value, rng),
            TLV_SMP4 if matches!(self.expect, Expect::Four { .. }) => self.step5(&tlv.value),
            _ => return SmpOutcome::OutOfOrder,
        };
        match outcome {
            Some(outcome) => outcome,
            None => {
                self.reset();
                SmpOutcome::Cheated
            }
        }
    }

    fn step2a(&mut self, tlv: &Tlv) -> Option<SmpOutcome> {
        let (question, mpis) = if tlv.tlv_type == TLV_SMP1Q {
            let nul = tlv.value.iter().position(|b| *b == 0)?;
            let question = String::from_utf8_lossy(&tlv.value[..nul]).into_owned();
            (Some(question), &tlv.value[nul + 1..])
        } else {
            (None, &tlv.value[..])
        };
        let m = decode(mpis, SMP1_MPI_COUNT)?;
        let (g2a, c2, d2, g3a, c3, d3) = (&m[0], &m[1], &m[2], &m[3], &m[4], &m[5]);
        if !is_valid_dh_public(g2a) || !is_valid_dh_public(g3a) || !is_valid_exponent(d2) || !is_valid_exponent(d3) {
            return None;
        }
        if !check_proof(1, g2a, c2, d2) || !check_proof(2, g3a, c3, d3) {
            return None;
        }
        self.expect = Expect::Asked { g2a: g2a.clone(), g3a: g3a.clone() };
        self.approved = question.is_some();
        Some(SmpOutcome::SecretRequested { question })
    }

    fn step3<R: RngCore + CryptoRng>(&mut self, value: &[u8], rng: &mut R) -> Option<SmpOutcome> {
        let Expect::Two { secret, a2, a3 } = &self.expect else {
            return None;
        };
        let m = decode(value, SMP2_MPI_COUNT)?;
        let (g2b, c2, d2, g3b, c3, d3) = (&m[0], &m[1], &m[2], &m[3], &m[4], &m[5]);
        let (pb, qb, cp, d5, d6) = (&m[6], &m[7], &m[8], &m[9], &m[10]);
        if ![g2b, g3b, pb, qb].into_iter().all(is_valid_dh_public)
            || ![d2, d3, d5, d6].into_iter().all(is_valid_exponent)
        {
            return None;
        }
        if !check_proof(3, g2b, c2, d2) || !check_proof(4, g3b, c3, d3) {
            return None;
        }
        let g2 = pow(g2b, a2);
        let g3 = pow(g3b, a3);
        let expected_cp = hash(
            5,
            &mul(&pow(&g3, d5), &pow(pb, cp)),
            Some(&mul(&mul(&g1(d5), &pow(&g2, d6)), &pow(qb, cp))),
        );
        if *cp != expected_cp {
            return None;
        }

        let r4 = random_exponent(rng);
        let r5 = random_exponent(rng);
        let r6 = random_exponent(rng);
        let r7 = random_exponent(rng);
        let pa = pow(&g3, &r4);
        let qa = mul(&g1(&r4), &pow(&g2, secret));
        let cp = hash(6, &pow(&g3, &r5), Some(&mul(&g1(&r5), &pow(&g2, &r6))));
        let d5 = sub_mul_mod_q(&r5, &r4, &cp);
        let d6 = sub_mul_mod_q(&r6, secret, &cp);
        let qa_qb = div(&qa, qb);
        let ra = pow(&qa_qb, a3);
        let cr = hash(7, &g1(&r7), Some(&pow(&qa_qb, &r7)));
        let d7 = sub_mul_mod_q(&r7, a3, &cr);

        let pa_pb = div(&pa, pb);
        let tlv = encode(TLV_SMP3, None, &[pa, qa, cp, d5, d6, ra, cr, d7]);
        self.expect = Expect::Four { g3b: g3b.clone(), pa_pb, qa_qb, a3: a3.clone() };
        Some(SmpOutcome::Reply(tlv))
    }

    fn step4<R: RngCore + CryptoRng>(&mut self, value: &[u8], rng: &mut R) -> Option<SmpOutcome> {
        let Expect::Three { g3a, g2, g3, b3, pb, qb } = &self.expect else {
            return None;
        };
        let m = decode(value, SMP3_MPI_COUNT)?;
        let (pa, qa, cp, d5, d6, ra, cr, d7) = (&m[0], &m[1], &m[2], &m[3], &m[4], &m[5], &m[6], &m[7]);
        if ![pa, qa, ra].into_iter().all(is_valid_dh_public) || ![d5, d6, d7].into_iter().all(is_valid_exponent) {
            return None;
        }
        let expected_cp = hash(
            6,
            &mul(&pow(g3, d5), &pow(pa, cp)),
            Some(&mul(&mul(&g1(d5), &pow(g2, d6)), &pow(qa, cp))),
        );
        if *cp != expected_cp {
            return None;
        }
        let qa_qb = div(qa, qb);
        let expected_cr = hash(7, &mul(&g1(d7), &pow(g3a, cr)), Some(&mul(&pow(&qa_qb, d7), &pow(ra, cr))));
        if *cr != expected_cr {
            return None;
        }

        let r7 = random_exponent(rng);
        let rb = pow(&qa_qb, b3);
        let cr = hash(8, &g1(&r7), Some(&pow(&qa_qb, &r7)));
        let d7 = sub_mul_mod_q(&r7, b3, &cr);
        let verified = pow(ra, b3) == div(pa, pb);
        let approved = self.approved;
        self.reset();
        Some(SmpOutcome::Finished { reply: Some(encode(TLV_SMP4, None, &[rb, cr, d7])), verified, approved })
    }

    fn step5(&mut self, value: &[u8]) -> Option<SmpOutcome> {
        let Expect::Four { g3b, pa_pb, qa_qb, a3 } = &self.expect else {
            return None;
        };
        let m = decode(value, SMP4_MPI_COUNT)?;
        let (rb, cr, d7) = (&m[0], &m[1], &m[2]);
        if !is_valid_dh_public(rb) || !is_valid_exponent(d7) {
            return None;
        }
        let expected_cr = hash(8, &mul(&g1(d7), &pow(g3b, cr)), Some(&mul(&pow(qa_qb, d7), &pow(rb, cr))));
        if *cr != expected_cr {
            return None;
        }
        let verified = pow(rb, a3) == *pa_pb;
        let approved = self.approved;
        self.reset();
        Some(SmpOutcome::Finished { reply: None, verified, approved })
    }
}

impl Default for SmpEngine {
    fn default() -> Self {
        Self::new()
    }
}
