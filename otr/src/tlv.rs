/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use crate::result::{fault, FaultType, ReceiveError, SendError};
use crate::serial::{OtrReader, OtrWriter};

/// A typed extension record carried after the text of a decrypted data message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tlv {
    pub tlv_type: u16,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(tlv_type: u16, value: Vec<u8>) -> Self {
        Self { tlv_type, value }
    }

    pub fn empty(tlv_type: u16) -> Self {
        Self { tlv_type, value: Vec::new() }
    }
}

/// Build a data message plaintext: the UTF-8 text, then, if there are any TLVs, a NUL byte
/// followed by `{type, length, value}` records.
pub(crate) fn encode_payload(text: &str, tlvs: &[Tlv]) -> Result<Vec<u8>, SendError> {
    if text.as_bytes().contains(&0) {
        return Err(SendError::NulInText);
    }
    let mut w = OtrWriter::new();
    w.raw(text.as_bytes());
    if !tlvs.is_empty() {
        w.byte(0);
        for tlv in tlvs {
            let len = u16::try_from(tlv.value.len()).map_err(|_| SendError::TlvTooLong(tlv.value.len()))?;
            w.short(tlv.tlv_type).short(len).raw(&tlv.value);
        }
    }
    Ok(w.into_bytes())
}

/// Split a decrypted data message plaintext into its text and TLVs.
pub(crate) fn decode_payload(payload: &[u8]) -> Result<(String, Vec<Tlv>), ReceiveError> {
    let (text, rest) = match payload.iter().position(|b| *b == 0) {
        Some(nul) => (&payload[..nul], &payload[nul + 1..]),
        None => (payload, &[][..]),
    };
    let mut tlvs = Vec::new();
    let mut r = OtrReader::new(rest);
    while !r.is_empty() {
        let tlv_type = r.short()?;
        let len = r.short()? as usize;
        tlvs.push(Tlv::new(tlv_type, r.raw(len)?.to_vec()));
    }
    let text = String::from_utf8(text.to_vec()).map_err(|_| fault!(FaultType::InvalidMessage))?;
    Ok((text, tlvs))
}
