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

use crate::crypto::{sha1, DhKeyPair};
use crate::proto::*;
use crate::serial::mpi_bytes;

pub(crate) const PREVIOUS: usize = 0;
pub(crate) const CURRENT: usize = 1;

struct LocalKey {
    id: u32,
    pair: DhKeyPair,
}

#[derive(Clone)]
struct RemoteKey {
    id: u32,
    public: BigUint,
}

struct DerivedKeys {
    send_aes: Zeroizing<[u8; AES_KEY_SIZE]>,
    receive_aes: Zeroizing<[u8; AES_KEY_SIZE]>,
    send_mac: Zeroizing<[u8; MAC_SIZE]>,
    receive_mac: Zeroizing<[u8; MAC_SIZE]>,
}

impl DerivedKeys {
    fn derive(local: &DhKeyPair, remote: &BigUint) -> Self {
        let secret = Zeroizing::new(mpi_bytes(&local.agree(remote)));
        let (send_byte, receive_byte) = if local.public_key() > remote {
            (HIGH_SEND_BYTE, HIGH_RECEIVE_BYTE)
        } else {
            (LOW_SEND_BYTE, LOW_RECEIVE_BYTE)
        };
        let aes_key = |byte: u8| {
            let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
            key.copy_from_slice(&sha1(&[&[byte], secret.as_slice()])[..AES_KEY_SIZE]);
            key
        };
        let send_aes = aes_key(send_byte);
        let receive_aes = aes_key(receive_byte);
        Self {
            send_mac: Zeroizing::new(sha1(&[send_aes.as_slice()])),
            receive_mac: Zeroizing::new(sha1(&[receive_aes.as_slice()])),
            send_aes,
            receive_aes,
        }
    }
}

/// One of the four local × remote key combinations.
#[derive(Default)]
struct KeyCell {
    /// Absent while the remote side of this cell has no key yet.
    keys: Option<DerivedKeys>,
    send_ctr: u64,
    receive_ctr: u64,
    receive_mac_used: bool,
}

/// Key material for one outgoing data message.
pub(crate) struct SendingKeys {
    pub sender_key_id: u32,
    pub recipient_key_id: u32,
    pub next_dh: BigUint,
    pub ctr: [u8; CTR_SIZE],
    pub aes: Zeroizing<[u8; AES_KEY_SIZE]>,
    pub mac: Zeroizing<[u8; MAC_SIZE]>,
}

/// Key material able to authenticate and decrypt one incoming data message.
pub(crate) struct ReceivingKeys {
    local: usize,
    remote: usize,
    pub last_ctr: u64,
    pub aes: Zeroizing<[u8; AES_KEY_SIZE]>,
    pub mac: Zeroizing<[u8; MAC_SIZE]>,
}

/// Key rotations caused by an accepted data message.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Rotation {
    pub local: Option<u32>,
    pub remote: Option<u32>,
}

/// The data message key ratchet: our two newest DH keys crossed with the peer's two newest.
///
/// Cells are indexed `[local][remote]` with `PREVIOUS` and `CURRENT`. Rotating an axis moves
/// the `CURRENT` cells to `PREVIOUS` along with their counters and drops the old `PREVIOUS`
/// cells, whose receive MAC keys are queued for revelation if they were ever used.
pub(crate) struct SessionKeyRing {
    local: [LocalKey; 2],
    remote: [Option<RemoteKey>; 2],
    cells: [[KeyCell; 2]; 2],
    old_mac_keys: Vec<u8>,
}

impl SessionKeyRing {
    /// Build the ring right after the AKE from our AKE key and the peer's AKE public key.
    pub fn new<R: RngCore + CryptoRng>(
        ake_key: DhKeyPair,
        remote_ake_public: BigUint,
        remote_key_id: u32,
        rng: &mut R,
    ) -> Self {
        let next = DhKeyPair::generate(rng);
        let mut ring = Self {
            local: [LocalKey { id: INITIAL_KEY_ID, pair: ake_key }, LocalKey { id: INITIAL_KEY_ID + 1, pair: next }],
            remote: [None, Some(RemoteKey { id: remote_key_id, public: remote_ake_public })],
            cells: Default::default(),
            old_mac_keys: Vec::new(),
        };
        ring.derive_cell(PREVIOUS, CURRENT);
        ring.derive_cell(CURRENT, CURRENT);
        ring
    }

    fn derive_cell(&mut self, local: usize, remote: usize) {
        self.cells[local][remote] = KeyCell {
            keys: self.remote[remote]
                .as_ref()
                .map(|r| DerivedKeys::derive(&self.local[local].pair, &r.public)),
            ..Default::default()
        };
    }

    fn retire(&mut self, cell: KeyCell) {
        if cell.receive_mac_used {
            if let Some(keys) = cell.keys {
                self.old_mac_keys.extend_from_slice(keys.receive_mac.as_slice());
            }
        }
    }

    /// Shift the local axis and generate a fresh current key.
    pub fn rotate_local<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> u32 {
        let id = self.local[CURRENT].id.wrapping_add(1);
        let previous = std::mem::replace(&mut self.local[CURRENT], LocalKey { id, pair: DhKeyPair::generate(rng) });
        self.local[PREVIOUS] = previous;
        let [previous_cells, current_cells] = &mut self.cells;
        let retired = std::mem::replace(previous_cells, std::mem::take(current_cells));
        for cell in retired {
            self.retire(cell);
        }
        self.derive_cell(CURRENT, PREVIOUS);
        self.derive_cell(CURRENT, CURRENT);
        id
    }

    /// Shift the remote axis and install the peer's next key as current.
    pub fn rotate_remote(&mut self, id: u32, public: BigUint) {
        self.remote[PREVIOUS] = self.remote[CURRENT].replace(RemoteKey { id, public });
        for local in [PREVIOUS, CURRENT] {
            let [previous, current] = &mut self.cells[local];
            let retired = std::mem::replace(previous, std::mem::take(current));
            self.retire(retired);
            self.derive_cell(local, CURRENT);
        }
    }

    #[cfg(test)]
    pub fn local_key_id(&self, slot: usize) -> u32 {
        self.local[slot].id
    }

    pub fn remote_key_id(&self, slot: usize) -> Option<u32> {
        self.remote[slot].as_ref().map(|r| r.id)
    }

    /// Keys for the next outgoing data message. Advances the send counter every call.
    pub fn sending_keys(&mut self) -> Option<SendingKeys> {
        let recipient_key_id = self.remote[CURRENT].as_ref()?.id;
        let cell = &mut self.cells[PREVIOUS][CURRENT];
        let keys = cell.keys.as_ref()?;
        cell.send_ctr += 1;
        Some(SendingKeys {
            sender_key_id: self.local[PREVIOUS].id,
            recipient_key_id,
            next_dh: self.local[CURRENT].pair.public_key().clone(),
            ctr: cell.send_ctr.to_be_bytes(),
            aes: keys.send_aes.clone(),
            mac: keys.send_mac.clone(),
        })
    }

    /// Find the cell a data message from key `sender_key_id` to our key `recipient_key_id` uses.
    pub fn receiving_keys(&self, sender_key_id: u32, recipient_key_id: u32) -> Option<ReceivingKeys> {
        let local = [PREVIOUS, CURRENT].into_iter().find(|l| self.local[*l].id == recipient_key_id)?;
        let remote = [PREVIOUS, CURRENT]
            .into_iter()
            .find(|r| self.remote[*r].as_ref().map_or(false, |k| k.id == sender_key_id))?;
        let cell = &self.cells[local][remote];
        let keys = cell.keys.as_ref()?;
        Some(ReceivingKeys {
            local,
            remote,
            last_ctr: cell.receive_ctr,
            aes: keys.receive_aes.clone(),
            mac: keys.receive_mac.clone(),
        })
    }

    /// Commit an authenticated data message: record its counter, mark its MAC key used and
    /// rotate whichever axes it acknowledged.
    ///
    /// `next_dh` must already have been checked to be a legal DH public value.
    pub fn accept<R: RngCore + CryptoRng>(
        &mut self,
        keys: &ReceivingKeys,
        ctr: u64,
        next_dh: &BigUint,
        rng: &mut R,
    ) -> Rotation {
        let cell = &mut self.cells[keys.local][keys.remote];
        cell.receive_ctr = ctr;
        cell.receive_mac_used = true;
        let mut rotation = Rotation::default();
        if keys.local == CURRENT {
            rotation.local = Some(self.rotate_local(rng));
        }
        if keys.remote == CURRENT {
            if let Some(id) = self.remote_key_id(CURRENT) {
                let id = id.wrapping_add(1);
                self.rotate_remote(id, next_dh.clone());
                rotation.remote = Some(id);
            }
        }
        rotation
    }

    /// Concatenated receive MAC keys that are retired and ready to be revealed.
    pub fn old_mac_keys(&self) -> &[u8] {
        &self.old_mac_keys
    }

    /// Forget revealed MAC keys once the message carrying them was sent.
    pub fn clear_old_mac_keys(&mut self) {
        self.old_mac_keys.clear();
    }
}
