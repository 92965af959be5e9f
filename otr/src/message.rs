/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use arrayvec::ArrayVec;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use num_bigint::BigUint;

use crate::crypto::SHA256_HASH_SIZE;
use crate::instance_tag::InstanceTag;
use crate::proto::*;
use crate::result::{fault, FaultType, ReceiveError};
use crate::serial::{OtrReader, OtrWriter};

/// The protocol versions advertised by a query message or whitespace tag, in the order given.
pub type Versions = ArrayVec<u16, 3>;

/// Any text that can arrive from, or be sent to, the peer once fragments are assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Message {
    /// Human readable text. `versions` is non-empty if a whitespace tag was found and stripped.
    Plaintext { text: String, versions: Versions },
    Query { versions: Versions },
    Error { text: String },
    Encoded(EncodedMessage),
}

/// A base64 armored binary protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncodedMessage {
    pub version: u16,
    /// Always zero for version 2.
    pub sender_tag: InstanceTag,
    /// Always zero for version 2.
    pub receiver_tag: InstanceTag,
    pub body: EncodedBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EncodedBody {
    DhCommit { encrypted_gx: Vec<u8>, hashed_gx: [u8; SHA256_HASH_SIZE] },
    DhKey { gy: BigUint },
    RevealSignature { r: Vec<u8>, encrypted_signature: Vec<u8>, mac: [u8; MAC_SIZE] },
    Signature { encrypted_signature: Vec<u8>, mac: [u8; MAC_SIZE] },
    Data(DataMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataMessage {
    pub flags: u8,
    pub sender_key_id: u32,
    pub recipient_key_id: u32,
    pub next_dh: BigUint,
    pub ctr: [u8; CTR_SIZE],
    pub encrypted: Vec<u8>,
    pub mac: [u8; MAC_SIZE],
    /// Concatenated 20 byte MAC keys we no longer use.
    pub old_mac_keys: Vec<u8>,
}

impl EncodedBody {
    pub fn message_type(&self) -> u8 {
        match self {
            EncodedBody::DhCommit { .. } => MSG_TYPE_DH_COMMIT,
            EncodedBody::DhKey { .. } => MSG_TYPE_DH_KEY,
            EncodedBody::RevealSignature { .. } => MSG_TYPE_REVEAL_SIGNATURE,
            EncodedBody::Signature { .. } => MSG_TYPE_SIGNATURE,
            EncodedBody::Data(_) => MSG_TYPE_DATA,
        }
    }
}

impl EncodedMessage {
    fn write_header(&self, w: &mut OtrWriter) {
        w.short(self.version).byte(self.body.message_type());
        if self.version >= PROTOCOL_VERSION_3 {
            w.int(self.sender_tag.value()).int(self.receiver_tag.value());
        }
    }

    /// Everything a data message's MAC covers: the header through the encrypted payload.
    ///
    /// Returns `None` for any other message type.
    pub fn authenticated_data(&self) -> Option<Vec<u8>> {
        match &self.body {
            EncodedBody::Data(data) => {
                let mut w = OtrWriter::new();
                self.write_header(&mut w);
                data.write_authenticated(&mut w);
                Some(w.into_bytes())
            }
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = OtrWriter::new();
        self.write_header(&mut w);
        match &self.body {
            EncodedBody::DhCommit { encrypted_gx, hashed_gx } => {
                w.data(encrypted_gx).data(hashed_gx);
            }
            EncodedBody::DhKey { gy } => {
                w.mpi(gy);
            }
            EncodedBody::RevealSignature { r, encrypted_signature, mac } => {
                w.data(r).data(encrypted_signature).mac(mac);
            }
            EncodedBody::Signature { encrypted_signature, mac } => {
                w.data(encrypted_signature).mac(mac);
            }
            EncodedBody::Data(data) => {
                data.write_authenticated(&mut w);
                w.mac(&data.mac).data(&data.old_mac_keys);
            }
        }
        w.into_bytes()
    }

    /// The `?OTR:<base64>.` wire form.
    pub fn encode(&self) -> String {
        format!("{}{}{}", ENCODED_PREFIX, BASE64.encode(self.to_bytes()), ENCODED_SUFFIX)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReceiveError> {
        let mut r = OtrReader::new(bytes);
        let version = r.short()?;
        if version != PROTOCOL_VERSION_2 && version != PROTOCOL_VERSION_3 {
            return Err(fault!(FaultType::PolicyViolation));
        }
        let message_type = r.byte()?;
        let (sender_tag, receiver_tag) = if version == PROTOCOL_VERSION_3 {
            let sender_tag = InstanceTag::from_raw(r.int()?);
            let receiver_tag = InstanceTag::from_raw(r.int()?);
            if sender_tag.is_zero() || !sender_tag.is_valid() || !receiver_tag.is_valid() {
                return Err(fault!(FaultType::InvalidInstanceTag));
            }
            (sender_tag, receiver_tag)
        } else {
            (InstanceTag::ZERO, InstanceTag::ZERO)
        };
        let body = match message_type {
            MSG_TYPE_DH_COMMIT => {
                let encrypted_gx = r.data()?.to_vec();
                let hashed_gx = r.data()?.try_into().map_err(|_| fault!(FaultType::InvalidMessage))?;
                EncodedBody::DhCommit { encrypted_gx, hashed_gx }
            }
            MSG_TYPE_DH_KEY => EncodedBody::DhKey { gy: r.mpi()? },
            MSG_TYPE_REVEAL_SIGNATURE => EncodedBody::RevealSignature {
                r: r.data()?.to_vec(),
                encrypted_signature: r.data()?.to_vec(),
                mac: r.mac()?,
            },
            MSG_TYPE_SIGNATURE => EncodedBody::Signature { encrypted_signature: r.data()?.to_vec(), mac: r.mac()? },
            MSG_TYPE_DATA => EncodedBody::Data(DataMessage {
                flags: r.byte()?,
                sender_key_id: r.int()?,
                recipient_key_id: r.int()?,
                next_dh: r.mpi()?,
                ctr: r.ctr()?,
                encrypted: r.data()?.to_vec(),
                mac: r.mac()?,
                old_mac_keys: r.data()?.to_vec(),
            }),
            _ => return Err(fault!(FaultType::InvalidMessage)),
        };
        r.finish()?;
        Ok(Self { version, sender_tag, receiver_tag, body })
    }

    /// Decode the `?OTR:<base64>.` wire form.
    pub fn decode(text: &str) -> Result<Self, ReceiveError> {
        let armored = text.strip_prefix(ENCODED_PREFIX).ok_or(fault!(FaultType::InvalidMessage))?;
        let end = armored.find(ENCODED_SUFFIX).ok_or(fault!(FaultType::InvalidMessage))?;
        let bytes = BASE64
            .decode(&armored[..end])
            .map_err(|_| fault!(FaultType::InvalidMessage))?;
        Self::from_bytes(&bytes)
    }
}

impl DataMessage {
    pub fn write_authenticated(&self, w: &mut OtrWriter) {
        w.byte(self.flags)
            .int(self.sender_key_id)
            .int(self.recipient_key_id)
            .mpi(&self.next_dh)
            .ctr(&self.ctr)
            .data(&self.encrypted);
    }
}

fn push_version(versions: &mut Versions, v: u16) {
    if !versions.contains(&v) && !versions.is_full() {
        versions.push(v);
    }
}

fn parse_version_digits(versions: &mut Versions, digits: &str) {
    for c in digits.chars().take_while(|c| *c != '?') {
        match c {
            '1' => push_version(versions, PROTOCOL_VERSION_1),
            '2' => push_version(versions, PROTOCOL_VERSION_2),
            '3' => push_version(versions, PROTOCOL_VERSION_3),
            _ => {}
        }
    }
}

/// Find and remove a whitespace tag, returning the remaining text and the versions it advertised.
fn strip_whitespace_tag(text: &str) -> Option<(String, Versions)> {
    let start = text.find(WHITESPACE_TAG_BASE)?;
    let mut versions = Versions::new();
    let mut end = start + WHITESPACE_TAG_BASE.len();
    while let Some(chunk) = text.get(end..end + WHITESPACE_TAG_VERSION_LEN) {
        match chunk {
            WHITESPACE_TAG_V1 => push_version(&mut versions, PROTOCOL_VERSION_1),
            WHITESPACE_TAG_V2 => push_version(&mut versions, PROTOCOL_VERSION_2),
            WHITESPACE_TAG_V3 => push_version(&mut versions, PROTOCOL_VERSION_3),
            _ => break,
        }
        end += WHITESPACE_TAG_VERSION_LEN;
    }
    let mut stripped = String::with_capacity(text.len());
    stripped.push_str(&text[..start]);
    stripped.push_str(&text[end..]);
    Some((stripped, versions))
}

impl Message {
    /// Classify assembled wire text. Plain text never fails to parse, only encoded messages can.
    pub fn parse(text: &str) -> Result<Message, ReceiveError> {
        if let Some(start) = text.find(OTR_PREFIX) {
            let otr = &text[start..];
            if otr.starts_with(ENCODED_PREFIX) {
                return EncodedMessage::decode(otr).map(Message::Encoded);
            }
            if let Some(error) = otr.strip_prefix(ERROR_PREFIX) {
                return Ok(Message::Error { text: error.trim_start().to_string() });
            }
            let mut versions = Versions::new();
            if let Some(rest) = otr.strip_prefix(QUERY_V1_AND_VERSIONS_PREFIX) {
                push_version(&mut versions, PROTOCOL_VERSION_1);
                parse_version_digits(&mut versions, rest);
                return Ok(Message::Query { versions });
            }
            if otr.starts_with(QUERY_V1) {
                push_version(&mut versions, PROTOCOL_VERSION_1);
                return Ok(Message::Query { versions });
            }
            if let Some(rest) = otr.strip_prefix(QUERY_VERSIONS_PREFIX) {
                parse_version_digits(&mut versions, rest);
                return Ok(Message::Query { versions });
            }
        }
        Ok(match strip_whitespace_tag(text) {
            Some((text, versions)) => Message::Plaintext { text, versions },
            None => Message::Plaintext { text: text.to_string(), versions: Versions::new() },
        })
    }
}

/// `?OTRv23?`, `?OTR?v2?` or `?OTR?` depending on the versions offered.
pub(crate) fn query_message(versions: &[u16]) -> String {
    let mut query = String::from(OTR_PREFIX);
    if versions.contains(&PROTOCOL_VERSION_1) {
        query.push('?');
    }
    let others: String = versions
        .iter()
        .filter(|v| **v != PROTOCOL_VERSION_1)
        .map(|v| v.to_string())
        .collect();
    if !others.is_empty() {
        query.push('v');
        query.push_str(&others);
        query.push('?');
    }
    query
}

pub(crate) fn error_message(text: &str) -> String {
    format!("{} {}", ERROR_PREFIX, text)
}

/// Append the whitespace tag advertising `versions` to `text`.
pub(crate) fn tag_plaintext(text: &str, versions: &[u16]) -> String {
    let mut tagged = String::with_capacity(text.len() + WHITESPACE_TAG_BASE.len() + 3 * WHITESPACE_TAG_VERSION_LEN);
    tagged.push_str(text);
    tagged.push_str(WHITESPACE_TAG_BASE);
    for v in versions {
        tagged.push_str(match *v {
            PROTOCOL_VERSION_1 => WHITESPACE_TAG_V1,
            PROTOCOL_VERSION_2 => WHITESPACE_TAG_V2,
            _ => WHITESPACE_TAG_V3,
        });
    }
    tagged
}
