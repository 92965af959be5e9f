/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::sync::Arc;

use crate::crypto::LongTermKeyPair;
use crate::instance_tag::InstanceTag;
use crate::message::Versions;
use crate::proto::{PROTOCOL_VERSION_1, PROTOCOL_VERSION_2, PROTOCOL_VERSION_3};
use crate::result::SessionEvent;

/// Names the conversation a session belongs to: which local account talks to which remote user
/// over which transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub account_id: String,
    pub user_id: String,
    pub protocol_name: String,
}

impl SessionId {
    pub fn new(account_id: impl Into<String>, user_id: impl Into<String>, protocol_name: impl Into<String>) -> Self {
        Self { account_id: account_id.into(), user_id: user_id.into(), protocol_name: protocol_name.into() }
    }
}

/// The per session OTR policy, supplied by the host every time the engine needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Policy {
    /// Whether to advertise version 1 in query messages and whitespace tags.
    /// Version 1 is never negotiated.
    pub allow_v1: bool,
    pub allow_v2: bool,
    pub allow_v3: bool,
    /// Refuse to send plaintext. Outgoing messages are queued until the session is encrypted.
    pub require_encryption: bool,
    /// Advertise OTR support by appending a whitespace tag to outgoing plaintext.
    pub send_whitespace_tag: bool,
    /// Start the AKE when a whitespace tagged plaintext message arrives.
    pub whitespace_start_ake: bool,
    /// Start the AKE when an OTR error message arrives.
    pub error_start_ake: bool,
}

impl Policy {
    /// Never start OTR on our own, but answer queries and tags.
    pub const MANUAL: Policy = Policy {
        allow_v1: false,
        allow_v2: true,
        allow_v3: true,
        require_encryption: false,
        send_whitespace_tag: false,
        whitespace_start_ake: false,
        error_start_ake: false,
    };
    /// Advertise OTR and start it as soon as the peer shows support.
    pub const OPPORTUNISTIC: Policy = Policy::new_default();
    /// Never send anything in the clear.
    pub const ALWAYS: Policy = Policy {
        allow_v1: false,
        allow_v2: true,
        allow_v3: true,
        require_encryption: true,
        send_whitespace_tag: false,
        whitespace_start_ake: true,
        error_start_ake: true,
    };
    /// OTR is off: messages pass through untouched.
    pub const NEVER: Policy = Policy {
        allow_v1: false,
        allow_v2: false,
        allow_v3: false,
        require_encryption: false,
        send_whitespace_tag: false,
        whitespace_start_ake: false,
        error_start_ake: false,
    };

    /// Versions 2 and 3, whitespace tagging and opportunistic start of the AKE.
    pub const fn new_default() -> Self {
        Self {
            allow_v1: false,
            allow_v2: true,
            allow_v3: true,
            require_encryption: false,
            send_whitespace_tag: true,
            whitespace_start_ake: true,
            error_start_ake: true,
        }
    }

    pub const fn allows(&self, version: u16) -> bool {
        match version {
            PROTOCOL_VERSION_1 => self.allow_v1,
            PROTOCOL_VERSION_2 => self.allow_v2,
            PROTOCOL_VERSION_3 => self.allow_v3,
            _ => false,
        }
    }

    /// The versions to advertise, lowest first.
    pub fn advertised_versions(&self) -> Versions {
        [PROTOCOL_VERSION_1, PROTOCOL_VERSION_2, PROTOCOL_VERSION_3]
            .into_iter()
            .filter(|v| self.allows(*v))
            .collect()
    }

    /// True if any version the engine can negotiate is allowed.
    pub const fn is_enabled(&self) -> bool {
        self.allow_v2 || self.allow_v3
    }

    /// The highest version both we and the peer support, if any.
    pub fn negotiate(&self, offered: &[u16]) -> Option<u16> {
        [PROTOCOL_VERSION_3, PROTOCOL_VERSION_2]
            .into_iter()
            .find(|v| self.allows(*v) && offered.contains(v))
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new_default()
    }
}

/// Transport limits for outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmenterInstructions {
    pub max_fragments_allowed: usize,
    /// Maximum size of a single fragment including its header.
    pub max_fragment_size: usize,
}

impl FragmenterInstructions {
    /// The transport accepts messages of any size.
    pub const UNLIMITED: FragmenterInstructions =
        FragmenterInstructions { max_fragments_allowed: usize::MAX, max_fragment_size: usize::MAX };

    pub const fn new(max_fragments_allowed: usize, max_fragment_size: usize) -> Self {
        Self { max_fragments_allowed, max_fragment_size }
    }
}

impl Default for FragmenterInstructions {
    fn default() -> Self {
        Self::UNLIMITED
    }
}

/// Trait to implement to integrate the OTR engine into a messaging client.
///
/// The host is handed to `Session::new` once and shared by every instance of that session.
/// All methods take `&self` and may be called from whichever thread is driving the session,
/// so implementations should use interior mutability.
pub trait Host: Send + Sync {
    /// Send `message` to the peer of `session` over the underlying transport.
    ///
    /// If this returns `Err` the operation that produced the message fails and no session state
    /// is committed, so it is safe to retry.
    fn inject_message(&self, session: &SessionId, message: &str) -> Result<(), std::io::Error>;

    /// The policy to apply to `session`. Called whenever a decision depends on it.
    fn session_policy(&self, session: &SessionId) -> Policy;

    /// The long-term identity key used to authenticate the AKE.
    fn local_key_pair(&self, session: &SessionId) -> Arc<LongTermKeyPair>;

    /// The transport limits for `session`.
    #[allow(unused)]
    fn fragmenter_instructions(&self, session: &SessionId) -> FragmenterInstructions {
        FragmenterInstructions::UNLIMITED
    }

    /// The peer started SMP. Prompt the user for the shared secret and answer through
    /// `Session::respond_smp`.
    fn ask_for_secret(&self, session: &SessionId, instance: InstanceTag, question: Option<&str>);

    /// Receives the events a user interface needs to reflect the state of the session.
    fn handle_event(&self, session: &SessionId, event: SessionEvent);

    /// Human readable text appended to query messages for clients without OTR support.
    #[allow(unused)]
    fn fallback_message(&self, session: &SessionId) -> String {
        String::from("I would like to start an Off-the-Record private conversation, but you do not have a plugin to support that.")
    }

    /// The text of the OTR error message sent when we receive a data message we cannot read.
    #[allow(unused)]
    fn reply_for_unreadable_message(&self, session: &SessionId) -> String {
        String::from("You sent me an unreadable encrypted message.")
    }

    /// Receives a stream of events that occur inside the engine.
    /// These are provided for debugging, logging or metrics purposes, and must be used for
    /// nothing else. Do not base protocol-level decisions upon the events passed to this function.
    #[cfg(feature = "logging")]
    #[allow(unused)]
    fn event_log(&self, session: &SessionId, event: crate::LogEvent<'_>) {}
}
