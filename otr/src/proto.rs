/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

/* Protocol versions */

pub const PROTOCOL_VERSION_1: u16 = 1;
pub const PROTOCOL_VERSION_2: u16 = 2;
pub const PROTOCOL_VERSION_3: u16 = 3;

/* Text framing */

/// Prefix shared by every OTR message that is not plain text.
pub(crate) const OTR_PREFIX: &str = "?OTR";
pub(crate) const ENCODED_PREFIX: &str = "?OTR:";
pub(crate) const ENCODED_SUFFIX: char = '.';
pub(crate) const ERROR_PREFIX: &str = "?OTR Error:";
pub(crate) const QUERY_V1: &str = "?OTR?";
pub(crate) const QUERY_VERSIONS_PREFIX: &str = "?OTRv";
pub(crate) const QUERY_V1_AND_VERSIONS_PREFIX: &str = "?OTR?v";

/* Whitespace tags */

pub(crate) const WHITESPACE_TAG_BASE: &str = "\x20\x09\x20\x20\x09\x09\x09\x09\x20\x09\x20\x09\x20\x09\x20\x20";
pub(crate) const WHITESPACE_TAG_V1: &str = "\x20\x09\x20\x09\x20\x20\x09\x20";
pub(crate) const WHITESPACE_TAG_V2: &str = "\x20\x20\x09\x09\x20\x20\x09\x20";
pub(crate) const WHITESPACE_TAG_V3: &str = "\x20\x20\x09\x09\x20\x20\x09\x09";
pub(crate) const WHITESPACE_TAG_VERSION_LEN: usize = 8;

/* Fragmentation constants */
/*
v3 fragment:  ?OTR|ssssssss|rrrrrrrr,kkkkk,nnnnn,<payload>,
v2 fragment:  ?OTR,kkkkk,nnnnn,<payload>,
*/
pub(crate) const FRAGMENT_PREFIX_V3: &str = "?OTR|";
pub(crate) const FRAGMENT_PREFIX_V2: &str = "?OTR,";
/// Exact size of the v3 fragment framing when indices are written with five digits.
pub const FRAGMENT_HEADER_OVERHEAD_V3: usize = 36;
/// Upper bound of the v2 fragment framing.
pub const FRAGMENT_HEADER_OVERHEAD_V2: usize = 18;
/// Hard ceiling on the number of fragments a single message may be split into.
pub const MAX_FRAGMENTS: usize = 65535;
/// Partially received messages held at once, one per sending instance.
pub(crate) const MAX_FRAGMENT_BUFFERS: usize = 8;

/* Message types */

pub(crate) const MSG_TYPE_DH_COMMIT: u8 = 0x02;
pub(crate) const MSG_TYPE_DATA: u8 = 0x03;
pub(crate) const MSG_TYPE_DH_KEY: u8 = 0x0a;
pub(crate) const MSG_TYPE_REVEAL_SIGNATURE: u8 = 0x11;
pub(crate) const MSG_TYPE_SIGNATURE: u8 = 0x12;

/// Data message flag asking the receiver not to complain if it cannot decrypt the message.
pub const FLAG_IGNORE_UNREADABLE: u8 = 0x01;

/* Field sizes */

pub(crate) const CTR_SIZE: usize = 8;
pub(crate) const MAC_SIZE: usize = 20;
pub(crate) const SSID_SIZE: usize = 8;
pub(crate) const AES_KEY_SIZE: usize = 16;
/// Size in bytes of the random key `r` used to commit to `g^x` in the DH-Commit message.
pub(crate) const AKE_R_SIZE: usize = AES_KEY_SIZE;

/* AKE key derivation: h2(b) = SHA256(b || MPI(s)) */

pub(crate) const AKE_TAG_SSID: u8 = 0x00;
pub(crate) const AKE_TAG_C: u8 = 0x01;
pub(crate) const AKE_TAG_M1: u8 = 0x02;
pub(crate) const AKE_TAG_M2: u8 = 0x03;
pub(crate) const AKE_TAG_M1_PRIME: u8 = 0x04;
pub(crate) const AKE_TAG_M2_PRIME: u8 = 0x05;

/* Data message key derivation: SHA1(byte || MPI(s)) */

pub(crate) const HIGH_SEND_BYTE: u8 = 0x01;
pub(crate) const HIGH_RECEIVE_BYTE: u8 = 0x02;
pub(crate) const LOW_SEND_BYTE: u8 = 0x02;
pub(crate) const LOW_RECEIVE_BYTE: u8 = 0x01;

/// Key id of the DH key pair used in the AKE. Every later key pair increments it.
pub(crate) const INITIAL_KEY_ID: u32 = 1;

/* TLV types */

pub const TLV_PADDING: u16 = 0;
pub const TLV_DISCONNECTED: u16 = 1;
pub const TLV_SMP1: u16 = 2;
pub const TLV_SMP2: u16 = 3;
pub const TLV_SMP3: u16 = 4;
pub const TLV_SMP4: u16 = 5;
pub const TLV_SMP_ABORT: u16 = 6;
pub const TLV_SMP1Q: u16 = 7;

/* SMP */

/// Version byte prefixed to the SMP combined secret.
pub(crate) const SMP_SECRET_VERSION: u8 = 1;
pub(crate) const SMP1_MPI_COUNT: usize = 6;
pub(crate) const SMP2_MPI_COUNT: usize = 11;
pub(crate) const SMP3_MPI_COUNT: usize = 8;
pub(crate) const SMP4_MPI_COUNT: usize = 3;

/* Long-term keys */

/// PUBKEY type for a compressed SEC1 NIST P-384 ECDSA key.
pub(crate) const PUBKEY_TYPE_P384: u16 = 0x0010;

/* DH group */

/// RFC 3526 1536-bit MODP group prime, shared by the AKE, the data key ratchet and SMP.
pub(crate) const DH_MODULUS_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
    C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
    83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF";
pub(crate) const DH_GENERATOR: u32 = 2;
/// Size in bytes of a freshly generated DH private exponent.
pub(crate) const DH_PRIVATE_KEY_SIZE: usize = 40;
/// Size in bytes of a freshly generated SMP exponent.
pub(crate) const SMP_EXPONENT_SIZE: usize = 192;
