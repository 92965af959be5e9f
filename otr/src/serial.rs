/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use num_bigint::BigUint;

use crate::crypto::{LongTermPublicKey, P384_SIGNATURE_SIZE};
use crate::proto::{CTR_SIZE, MAC_SIZE, PUBKEY_TYPE_P384};
use crate::result::{fault, FaultType, ReceiveError};

/// Serializes the OTR binary data types into a growable buffer.
#[derive(Default)]
pub(crate) struct OtrWriter {
    buf: Vec<u8>,
}

impl OtrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn byte(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn short(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn int(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Length prefixed opaque bytes.
    pub fn data(&mut self, v: &[u8]) -> &mut Self {
        self.int(v.len() as u32).raw(v)
    }

    /// Length prefixed big-endian integer without leading zero bytes. Zero has length 0.
    pub fn mpi(&mut self, v: &BigUint) -> &mut Self {
        if v.bits() == 0 {
            self.int(0)
        } else {
            self.data(&v.to_bytes_be())
        }
    }

    pub fn mpis(&mut self, v: &[BigUint]) -> &mut Self {
        self.int(v.len() as u32);
        for mpi in v {
            self.mpi(mpi);
        }
        self
    }

    pub fn ctr(&mut self, v: &[u8; CTR_SIZE]) -> &mut Self {
        self.raw(v)
    }

    pub fn mac(&mut self, v: &[u8; MAC_SIZE]) -> &mut Self {
        self.raw(v)
    }

    pub fn public_key(&mut self, v: &LongTermPublicKey) -> &mut Self {
        self.short(PUBKEY_TYPE_P384).data(&v.to_bytes())
    }

    pub fn signature(&mut self, v: &[u8; P384_SIGNATURE_SIZE]) -> &mut Self {
        self.raw(v)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Mirror of the MPI encoding used by `OtrWriter`, for callers that only need the bytes.
pub(crate) fn mpi_bytes(v: &BigUint) -> Vec<u8> {
    let mut w = OtrWriter::new();
    w.mpi(v);
    w.into_bytes()
}

/// Parses the OTR binary data types out of a borrowed buffer.
///
/// Every read fails with `InvalidMessage` on truncated or non-canonical input.
pub(crate) struct OtrReader<'a> {
    buf: &'a [u8],
}

impl<'a> OtrReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fail unless every byte was consumed.
    pub fn finish(&self) -> Result<(), ReceiveError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(fault!(FaultType::InvalidMessage))
        }
    }

    pub fn raw(&mut self, len: usize) -> Result<&'a [u8], ReceiveError> {
        if self.buf.len() < len {
            return Err(fault!(FaultType::InvalidMessage));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ReceiveError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.raw(N)?);
        Ok(out)
    }

    pub fn byte(&mut self) -> Result<u8, ReceiveError> {
        Ok(self.raw(1)?[0])
    }

    pub fn short(&mut self) -> Result<u16, ReceiveError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn int(&mut self) -> Result<u32, ReceiveError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn data(&mut self) -> Result<&'a [u8], ReceiveError> {
        let len = self.int()? as usize;
        self.raw(len)
    }

    pub fn mpi(&mut self) -> Result<BigUint, ReceiveError> {
        let bytes = self.data()?;
        if bytes.first() == Some(&0) {
            return Err(fault!(FaultType::InvalidMessage));
        }
        Ok(BigUint::from_bytes_be(bytes))
    }

    /// Reads an MPI list and requires exactly `count` entries.
    pub fn mpis(&mut self, count: usize) -> Result<Vec<BigUint>, ReceiveError> {
        if self.int()? as usize != count {
            return Err(fault!(FaultType::InvalidMessage));
        }
        (0..count).map(|_| self.mpi()).collect()
    }

    pub fn ctr(&mut self) -> Result<[u8; CTR_SIZE], ReceiveError> {
        self.array()
    }

    pub fn mac(&mut self) -> Result<[u8; MAC_SIZE], ReceiveError> {
        self.array()
    }

    pub fn public_key(&mut self) -> Result<LongTermPublicKey, ReceiveError> {
        if self.short()? != PUBKEY_TYPE_P384 {
            return Err(fault!(FaultType::InvalidMessage));
        }
        LongTermPublicKey::from_bytes(self.data()?).ok_or(fault!(FaultType::InvalidMessage))
    }

    pub fn signature(&mut self) -> Result<[u8; P384_SIGNATURE_SIZE], ReceiveError> {
        self.array()
    }
}
