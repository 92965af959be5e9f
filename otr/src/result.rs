/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use thiserror::Error;

use crate::instance_tag::InstanceTag;

/// An error that can occur when splitting an outgoing message into fragments.
#[derive(Debug, Error, PartialEq, Eq, Clone, Hash)]
pub enum FragmentError {
    /// The session policy does not allow any protocol version that supports fragmentation.
    #[error("fragmentation is not allowed by the session policy")]
    NotAllowed,

    /// The fragment framing alone would fill the maximum fragment size.
    #[error("maximum fragment size {max_fragment_size} cannot carry any payload after {overhead} bytes of header")]
    SizeTooSmall { max_fragment_size: usize, overhead: usize },

    /// The message needs more fragments than the host, or the protocol, allows.
    #[error("message needs {needed} fragments but at most {allowed} are allowed")]
    TooManyFragments { needed: usize, allowed: usize },
}

/// An error that can occur when sending, or when starting, ending or driving a session.
///
/// None of these leave the session partially transitioned: state is only committed after the
/// host accepted every outgoing message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The outgoing message could not be fragmented to the host's transport limits.
    #[error(transparent)]
    Fragment(#[from] FragmentError),

    /// The session policy allows no protocol version this engine speaks.
    #[error("the session policy allows no supported protocol version")]
    NoVersionAllowed,

    /// The operation needs an encrypted session.
    #[error("the session is not encrypted")]
    NotEncrypted,

    /// The requested instance is not known to this session.
    #[error("no session instance with tag {0}")]
    UnknownInstance(InstanceTag),

    /// `respond_smp` was called but the peer never asked us anything.
    #[error("there is no SMP question to be answered")]
    SmpNotAsked,

    /// Data message text may not contain a NUL byte, it would be read back as the start of the TLVs.
    #[error("message text contains a NUL byte")]
    NulInText,

    /// A TLV value does not fit its 16 bit length field.
    #[error("TLV of {0} bytes is too long")]
    TlvTooLong(usize),

    /// The host failed to inject an outgoing message.
    #[error("failed to inject message: {0}")]
    Io(#[from] std::io::Error),
}

/// A type of fault that occurred because we received a bad message.
///
/// An unauthenticated peer can intentionally trigger any of these, so treat them as raw user
/// input: they are logged and the offending message is dropped without any reply.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum FaultType {
    /// A fragment header did not follow the fragment grammar.
    InvalidFragment,

    /// A fragment arrived out of order, or with a fragment count that changed mid stream.
    UnexpectedFragment,

    /// The message could not be decoded.
    InvalidMessage,

    /// An instance tag in the reserved range was used.
    InvalidInstanceTag,

    /// The message uses a protocol version the session policy does not allow.
    PolicyViolation,

    /// A hash, MAC or signature check failed.
    FailedAuth,

    /// A Diffie-Hellman public value was outside of `[2, p - 2]`.
    IllegalDhValue,

    /// A data message counter was repeated or went backwards.
    ExpiredCounter,

    /// A data message referenced key ids we no longer, or never did, hold.
    UnknownKeyId,

    /// The message is valid but not expected in the current state.
    OutOfSequence,

    /// An SMP message carried values that fail the zero-knowledge checks.
    SmpCheated,
}

/// An error that occurred during the receipt of a given message.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The peer sent us something bad. The message was dropped and no state was changed.
    #[error("byzantine fault: {error:?}")]
    ByzantineFault {
        /// The type of fault that has occurred. Be cautious if you choose to read this
        /// value, as an attacker has control over it.
        error: FaultType,
        /// The file of this implementation from which this error was generated.
        #[cfg(feature = "debug")]
        file: &'static str,
        /// The line number from which this error was generated.
        #[cfg(feature = "debug")]
        line: u32,
    },

    /// The message was addressed to a different instance of our client.
    #[error("message addressed to another instance")]
    UnknownInstance,

    /// A reply, such as the next AKE or SMP message, could not be sent.
    /// The message that triggered it was dropped and no AKE state was changed.
    #[error("failed to send reply: {0}")]
    Reply(#[from] SendError),
}

impl ReceiveError {
    /// The fault type, if this error is a byzantine fault.
    pub fn fault(&self) -> Option<FaultType> {
        match self {
            ReceiveError::ByzantineFault { error, .. } => Some(*error),
            _ => None,
        }
    }
}

macro_rules! fault {
    ($name:expr) => {
        $crate::result::ReceiveError::ByzantineFault {
            #[cfg(feature = "debug")]
            file: file!(),
            #[cfg(feature = "debug")]
            line: line!(),
            error: $name,
        }
    };
}
pub(crate) use fault;

/// The encryption status of one session instance.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default)]
pub enum SessionStatus {
    /// No keys are established, messages travel in the clear.
    #[default]
    Plaintext,
    /// The AKE completed and data messages are encrypted.
    Encrypted,
    /// The peer ended the encrypted session. Nothing is sent until the local user ends it too.
    Finished,
}

/// Something the host should know about. Delivered through `Host::handle_event`.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum SessionEvent {
    /// The status of the instance talking to the peer instance `instance` changed.
    /// The master instance reports `InstanceTag::ZERO`.
    StatusChanged { instance: InstanceTag, status: SessionStatus },
    /// The peer is logged in from more than one OTR capable client.
    MultipleInstancesDetected,
    /// The instance used for outgoing messages changed.
    OutgoingSessionChanged { instance: InstanceTag },
    /// A message was dropped because it was addressed to another of our instances.
    MessageForAnotherInstance,
    /// An encrypted message arrived that we cannot decrypt.
    UnreadableMessage { instance: InstanceTag },
    /// A plaintext message arrived while we expect encryption.
    UnencryptedMessage { text: String },
    /// The peer sent an OTR error message.
    ErrorMessage { text: String },
    /// A message was not sent because the peer already ended the encrypted session.
    FinishedSessionMessage { text: String },
    /// A message was queued until the session becomes encrypted.
    RequireEncryption { text: String },
    /// SMP succeeded. `approved` is true when the exchange carried a question.
    SmpVerified { instance: InstanceTag, fingerprint: String, approved: bool },
    /// SMP completed but the secrets differed.
    SmpUnverified { instance: InstanceTag, fingerprint: String },
    /// An SMP message could not be processed. `cheated` is set when its proofs did not verify.
    SmpError { instance: InstanceTag, tlv_type: u16, cheated: bool },
    /// The peer, or we, aborted SMP.
    SmpAborted { instance: InstanceTag },
}
