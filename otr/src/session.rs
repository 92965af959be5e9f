/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use rand_core::OsRng;

use crate::ake::AuthState;
use crate::application::{Host, Policy, SessionId};
use crate::assembler::Assembler;
use crate::crypto::LongTermPublicKey;
use crate::instance::{Context, Instance};
use crate::instance_tag::InstanceTag;
use crate::message::{EncodedBody, Message};
use crate::proto::PROTOCOL_VERSION_3;
use crate::result::{fault, FaultType, ReceiveError, SendError, SessionEvent, SessionStatus};
use crate::tlv::Tlv;
#[cfg(feature = "logging")]
use crate::LogEvent;

/// Macro to turn off logging at compile time.
macro_rules! log {
    ($ctx:expr, $event:expr) => {
        #[cfg(feature = "logging")]
        $ctx.host.event_log($ctx.id, $event);
    };
}
pub(crate) use log;

pub(crate) type SlaveMap = RwLock<HashMap<InstanceTag, Arc<Mutex<Instance>>>>;

/// One OTR conversation with one remote user.
///
/// The master instance handles plaintext, queries and every v2 message. Each peer client that
/// sends us a v3 message gets its own slave instance, created on first contact.
///
/// Lock order is `outgoing -> slaves -> instance`, and at most one instance is locked at a time.
pub struct Session<H: Host> {
    host: Arc<H>,
    id: SessionId,
    our_tag: InstanceTag,
    master: Arc<Mutex<Instance>>,
    slaves: SlaveMap,
    /// Tag of the instance used for outgoing messages. `InstanceTag::ZERO` selects the master.
    outgoing: Mutex<InstanceTag>,
    assembler: Mutex<Assembler>,
}

impl<H: Host> Session<H> {
    /// Create a session with a freshly generated local instance tag.
    pub fn new(host: Arc<H>, id: SessionId) -> Self {
        Self::with_instance_tag(host, id, InstanceTag::random(&mut OsRng))
    }

    /// Create a session for a client that persists its instance tag across restarts.
    pub fn with_instance_tag(host: Arc<H>, id: SessionId, our_tag: InstanceTag) -> Self {
        Self {
            host,
            id,
            our_tag,
            master: Arc::new(Mutex::new(Instance::new_master())),
            slaves: RwLock::new(HashMap::new()),
            outgoing: Mutex::new(InstanceTag::ZERO),
            assembler: Mutex::new(Assembler::new(our_tag)),
        }
    }

    fn context(&self) -> Context<'_, H> {
        Context { host: &self.host, id: &self.id, our_tag: self.our_tag }
    }

    fn policy(&self) -> Policy {
        self.host.session_policy(&self.id)
    }

    fn instance(&self, tag: InstanceTag) -> Option<Arc<Mutex<Instance>>> {
        if tag.is_zero() {
            Some(self.master.clone())
        } else {
            self.slaves.read().unwrap().get(&tag).cloned()
        }
    }

    fn outgoing(&self) -> Result<Arc<Mutex<Instance>>, SendError> {
        let tag = *self.outgoing.lock().unwrap();
        self.instance(tag).ok_or(SendError::UnknownInstance(tag))
    }

    /// Find the slave for a peer instance or create it.
    fn find_or_create_slave(&self, ctx: &Context<'_, H>, tag: InstanceTag) -> Arc<Mutex<Instance>> {
        if let Some(slave) = self.slaves.read().unwrap().get(&tag) {
            return slave.clone();
        }
        let mut slaves = self.slaves.write().unwrap();
        if let Some(slave) = slaves.get(&tag) {
            return slave.clone();
        }
        let others = !slaves.is_empty();
        let slave = Arc::new(Mutex::new(Instance::new_slave(tag)));
        slaves.insert(tag, slave.clone());
        drop(slaves);

        log!(ctx, LogEvent::CreatedSlave(tag));
        if others {
            self.host.handle_event(&self.id, SessionEvent::MultipleInstancesDetected);
        }
        slave
    }

    /// Route a v3 message to the slave for its sender.
    ///
    /// The master may have sent a DH-Commit before the peer's instance tag was known. An idle
    /// slave takes over that handshake when the peer answers it with a DH-Key, or when the peer's
    /// own DH-Commit crossed ours and the commit race has to be decided.
    fn slave_for(&self, ctx: &Context<'_, H>, tag: InstanceTag, version: u16, body: &EncodedBody) -> Arc<Mutex<Instance>> {
        let slave = self.find_or_create_slave(ctx, tag);
        let is_dh_key = matches!(body, EncodedBody::DhKey { .. });
        let is_dh_commit = matches!(body, EncodedBody::DhCommit { .. });
        if is_dh_key || is_dh_commit {
            let master_auth = self.master.lock().unwrap().auth_state().clone();
            if matches!(master_auth, AuthState::AwaitingDhKey { .. }) && master_auth.version() == Some(version) {
                let mut slave = slave.lock().unwrap();
                let idle = match slave.auth_state() {
                    AuthState::None => true,
                    AuthState::AwaitingRevealSig { .. } => is_dh_key,
                    AuthState::AwaitingDhKey { .. } | AuthState::AwaitingSig { .. } => false,
                };
                if idle {
                    slave.set_auth_state(master_auth);
                }
            }
        }
        slave
    }

    /// Make a newly encrypted slave the outgoing instance unless the current one is encrypted.
    fn promote(&self, ctx: &Context<'_, H>, tag: InstanceTag, slave: &Arc<Mutex<Instance>>) -> Result<(), SendError> {
        let mut outgoing = self.outgoing.lock().unwrap();
        if *outgoing == tag {
            return Ok(());
        }
        let queued = match self.instance(*outgoing) {
            Some(current) => {
                let mut current = current.lock().unwrap();
                if current.status() == SessionStatus::Encrypted {
                    return Ok(());
                }
                current.take_queue()
            }
            None => Vec::new(),
        };
        *outgoing = tag;
        drop(outgoing);

        self.host.handle_event(&self.id, SessionEvent::OutgoingSessionChanged { instance: tag });
        if queued.is_empty() {
            Ok(())
        } else {
            slave.lock().unwrap().adopt_queue(ctx, queued)
        }
    }

    /// Turn one line received from the peer into what should be shown to the user.
    ///
    /// Returns `Ok(None)` when there is nothing to show: a fragment was buffered, a protocol
    /// message was consumed, or a bad message was dropped. Bad messages never surface as errors,
    /// they are reported through `Host::event_log`. An error means a reply could not be sent.
    pub fn transform_receiving(&self, text: &str) -> Result<Option<String>, ReceiveError> {
        let policy = self.policy();
        if !policy.is_enabled() {
            return Ok(Some(text.to_string()));
        }
        let ctx = self.context();
        match self.receive(&ctx, &policy, text) {
            Err(ReceiveError::UnknownInstance) => {
                self.host.handle_event(&self.id, SessionEvent::MessageForAnotherInstance);
                Ok(None)
            }
            Err(error @ ReceiveError::ByzantineFault { .. }) => {
                log!(ctx, LogEvent::DroppedMessage(&error));
                if error.fault() == Some(FaultType::InvalidInstanceTag) {
                    self.host.handle_event(&self.id, SessionEvent::MessageForAnotherInstance);
                }
                Ok(None)
            }
            result => result,
        }
    }

    #[cfg_attr(not(feature = "logging"), allow(unused_variables))]
    fn receive(&self, ctx: &Context<'_, H>, policy: &Policy, text: &str) -> Result<Option<String>, ReceiveError> {
        let is_fragment = Assembler::is_fragment(text);
        let Some(text) = self.assembler.lock().unwrap().accumulate(text)? else {
            log!(ctx, LogEvent::ReceivedFragment);
            return Ok(None);
        };
        if is_fragment {
            log!(ctx, LogEvent::AssembledMessage);
        }
        let message = Message::parse(&text)?;
        let instance = match &message {
            Message::Encoded(encoded) if encoded.version >= PROTOCOL_VERSION_3 => {
                if !policy.allows(encoded.version) {
                    return Err(fault!(FaultType::PolicyViolation));
                }
                if !encoded.receiver_tag.is_zero() && encoded.receiver_tag != self.our_tag {
                    return Err(ReceiveError::UnknownInstance);
                }
                // Only a DH-Commit can be sent before the peer knows our tag.
                let is_dh_commit = matches!(encoded.body, EncodedBody::DhCommit { .. });
                if encoded.receiver_tag.is_zero() && !is_dh_commit {
                    return Err(fault!(FaultType::InvalidInstanceTag));
                }
                self.slave_for(ctx, encoded.sender_tag, encoded.version, &encoded.body)
            }
            // Untagged plaintext belongs to whichever instance we are talking to.
            Message::Plaintext { .. } => self.outgoing().unwrap_or_else(|_| self.master.clone()),
            _ => self.master.clone(),
        };

        let (result, tag, was, status) = {
            let mut instance = instance.lock().unwrap();
            let was = instance.status();
            let result = instance.receive(ctx, policy, message);
            (result, instance.instance_tag(), was, instance.status())
        };
        if !tag.is_zero() && was != SessionStatus::Encrypted && status == SessionStatus::Encrypted {
            self.promote(ctx, tag, &instance)?;
        }
        result
    }

    /// Send a message through the outgoing instance. Depending on its status and the policy the
    /// text is encrypted, sent as plaintext, queued until encryption is up, or refused.
    pub fn send(&self, text: &str) -> Result<(), SendError> {
        self.send_with_tlvs(text, &[])
    }

    /// Like `send`, attaching TLV records to an encrypted message.
    pub fn send_with_tlvs(&self, text: &str, tlvs: &[Tlv]) -> Result<(), SendError> {
        let policy = self.policy();
        self.outgoing()?.lock().unwrap().send(&self.context(), &policy, text, tlvs)
    }

    /// Ask the peer to start an encrypted session.
    pub fn start(&self) -> Result<(), SendError> {
        let policy = self.policy();
        self.outgoing()?.lock().unwrap().start(&self.context(), &policy)
    }

    /// End the encrypted session of the outgoing instance and return it to plaintext.
    pub fn end(&self) -> Result<(), SendError> {
        self.outgoing()?.lock().unwrap().end(&self.context())
    }

    /// End the current session and immediately ask for a new one.
    pub fn refresh(&self) -> Result<(), SendError> {
        let instance = self.outgoing()?;
        let mut instance = instance.lock().unwrap();
        let ctx = self.context();
        instance.end(&ctx)?;
        instance.start(&ctx, &self.policy())
    }

    /// Start SMP, optionally with a question the peer's user should answer with `secret`.
    pub fn init_smp(&self, question: Option<&str>, secret: &[u8]) -> Result<(), SendError> {
        self.outgoing()?.lock().unwrap().init_smp(&self.context(), question, secret)
    }

    /// Answer an SMP request with our user's secret.
    pub fn respond_smp(&self, secret: &[u8]) -> Result<(), SendError> {
        self.outgoing()?.lock().unwrap().respond_smp(&self.context(), secret)
    }

    pub fn abort_smp(&self) -> Result<(), SendError> {
        self.outgoing()?.lock().unwrap().abort_smp(&self.context())
    }

    /// The tag of the instance used for outgoing messages. `InstanceTag::ZERO` is the master.
    pub fn outgoing_instance(&self) -> InstanceTag {
        *self.outgoing.lock().unwrap()
    }

    /// Select the instance used for outgoing messages.
    pub fn set_outgoing_instance(&self, tag: InstanceTag) -> Result<(), SendError> {
        if self.instance(tag).is_none() {
            return Err(SendError::UnknownInstance(tag));
        }
        let mut outgoing = self.outgoing.lock().unwrap();
        if *outgoing != tag {
            *outgoing = tag;
            drop(outgoing);
            self.host.handle_event(&self.id, SessionEvent::OutgoingSessionChanged { instance: tag });
        }
        Ok(())
    }

    /// Tags of every peer instance we have a slave for, in ascending order.
    pub fn instances(&self) -> Vec<InstanceTag> {
        let mut tags: Vec<InstanceTag> = self.slaves.read().unwrap().keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// The slave talking to peer instance `tag`, if one was created.
    pub fn slave(&self, tag: InstanceTag) -> Option<Arc<Mutex<Instance>>> {
        if tag.is_zero() {
            None
        } else {
            self.instance(tag)
        }
    }

    pub fn master(&self) -> Arc<Mutex<Instance>> {
        self.master.clone()
    }

    /// Status of the outgoing instance.
    pub fn status(&self) -> SessionStatus {
        self.outgoing()
            .map(|i| i.lock().unwrap().status())
            .unwrap_or_default()
    }

    pub fn remote_public_key(&self) -> Option<LongTermPublicKey> {
        self.outgoing().ok()?.lock().unwrap().remote_public_key().cloned()
    }

    pub fn local_fingerprint(&self) -> String {
        self.host.local_key_pair(&self.id).public_key().fingerprint_hex()
    }

    pub fn remote_fingerprint(&self) -> Option<String> {
        self.outgoing().ok()?.lock().unwrap().remote_fingerprint()
    }

    pub fn local_instance_tag(&self) -> InstanceTag {
        self.our_tag
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }
}
