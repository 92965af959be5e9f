/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use crate::instance_tag::InstanceTag;
use crate::result::{ReceiveError, SendError};

/// OTR engine events that might be interesting to log or aggregate into metrics.
#[allow(missing_docs)]
#[derive(Debug)]
pub enum LogEvent<'a> {
    /// A fragment was buffered and more are awaited.
    ReceivedFragment,
    AssembledMessage,
    /// `(fragment count, message length)`
    SentFragments(usize, usize),
    DroppedMessage(&'a ReceiveError),
    /// An automatic reply could not be sent and the failure is not surfaced to the caller.
    SendFailed(&'a SendError),
    CreatedSlave(InstanceTag),
    SentQuery,
    ReceivedQuery,
    ReceivedWhitespaceTag,
    ReceivedErrorMessage,
    ReceivedDhCommitSentDhKey,
    ReceivedDhCommitResentDhKey,
    WonCommitRaceResentDhCommit,
    LostCommitRace,
    SentDhCommit,
    ReceivedDhKeySentRevealSignature,
    ReceivedDhKeyResentRevealSignature,
    ReceivedRevealSignatureSentSignature,
    ReceivedSignature,
    /// The AKE finished and the instance talking to this peer instance is now encrypted.
    AkeComplete(InstanceTag),
    /// New local key id.
    RotatedLocalKey(u32),
    /// New remote key id.
    RotatedRemoteKey(u32),
    SentDataMessage,
    ReceivedDataMessage,
    ReceivedDisconnect,
    /// TLV type of the SMP message just sent.
    SentSmp(u16),
    /// TLV type of the SMP message just processed.
    ReceivedSmp(u16),
    SmpComplete(bool),
    FlushedQueuedMessages(usize),
}
