/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
//#![warn(missing_docs, rust_2018_idioms)]
pub mod crypto;

mod ake;
mod assembler;
mod fragmenter;
mod instance;
mod instance_tag;
mod log_event;
mod message;
mod serial;
mod session;
mod session_keys;
mod smp;

pub mod application;
pub mod proto;
pub mod result;
pub mod tlv;

pub use crate::crypto::{LongTermKeyPair, LongTermPublicKey};
pub use crate::fragmenter::number_of_fragments;
pub use crate::instance::Instance;
pub use crate::instance_tag::InstanceTag;
pub use crate::log_event::*;
pub use crate::session::Session;
pub use crate::tlv::Tlv;
