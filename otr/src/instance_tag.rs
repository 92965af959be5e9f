/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::fmt;

use rand_core::{CryptoRng, RngCore};

/// A 32-bit identifier distinguishing one of a client's concurrently running OTR instances.
///
/// `0` is reserved as the "unknown" wildcard, every other value below `0x100` is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceTag(u32);

impl InstanceTag {
    /// The wildcard tag, used when the receiving instance is not yet known.
    pub const ZERO: InstanceTag = InstanceTag(0);
    /// The smallest tag a real instance may use.
    pub const SMALLEST_VALUE: u32 = 0x100;

    /// Wrap a raw value received from the wire. No validation is performed.
    pub const fn from_raw(value: u32) -> Self {
        InstanceTag(value)
    }

    /// Generate a random, valid instance tag.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let value = rng.next_u32();
            if value >= Self::SMALLEST_VALUE {
                return InstanceTag(value);
            }
        }
    }

    pub const fn value(&self) -> u32 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// True for the wildcard and for every tag a real instance is allowed to use.
    pub const fn is_valid(&self) -> bool {
        self.0 == 0 || self.0 >= Self::SMALLEST_VALUE
    }
}

impl fmt::Display for InstanceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
