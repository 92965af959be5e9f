/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::ake::{self, AkeResult, AuthState, Transition};
use crate::application::{Host, Policy, SessionId};
use crate::crypto::{aes128_ctr, hmac_sha1, is_valid_dh_public, secure_eq, LongTermPublicKey, FINGERPRINT_SIZE};
use crate::fragmenter::fragment;
use crate::instance_tag::InstanceTag;
use crate::message::*;
use crate::proto::*;
use crate::result::{fault, FaultType, ReceiveError, SendError, SessionEvent, SessionStatus};
use crate::session::log;
use crate::session_keys::SessionKeyRing;
use crate::smp::{combined_secret, SmpEngine, SmpOutcome};
use crate::tlv::{decode_payload, encode_payload, Tlv};
#[cfg(feature = "logging")]
use crate::LogEvent;

/// What an instance needs from its owning session for one operation.
pub(crate) struct Context<'a, H: Host> {
    pub host: &'a H,
    pub id: &'a SessionId,
    pub our_tag: InstanceTag,
}

/// The conversation with one instance of the peer's client.
///
/// The master instance handles queries, error messages and version 2 traffic, none of which
/// carry instance tags. Each slave is bound to one peer instance tag.
pub struct Instance {
    their_tag: InstanceTag,
    /// Version of the encrypted session. Always 3 for slaves.
    version: Option<u16>,
    status: SessionStatus,
    auth: AuthState,
    keys: Option<SessionKeyRing>,
    remote_public_key: Option<LongTermPublicKey>,
    ssid: Option<[u8; SSID_SIZE]>,
    smp: SmpEngine,
    /// Messages waiting for the session to become encrypted.
    queue: Vec<String>,
    /// The peer sent something OTR related, so whitespace tags are no longer needed.
    peer_speaks_otr: bool,
}

impl Instance {
    fn new(their_tag: InstanceTag, version: Option<u16>) -> Self {
        Self {
            their_tag,
            version,
            status: SessionStatus::Plaintext,
            auth: AuthState::None,
            keys: None,
            remote_public_key: None,
            ssid: None,
            smp: SmpEngine::new(),
            queue: Vec::new(),
            peer_speaks_otr: false,
        }
    }

    pub(crate) fn new_master() -> Self {
        Self::new(InstanceTag::ZERO, None)
    }

    pub(crate) fn new_slave(their_tag: InstanceTag) -> Self {
        Self::new(their_tag, Some(PROTOCOL_VERSION_3))
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The peer instance this instance talks to. `InstanceTag::ZERO` for the master.
    pub fn instance_tag(&self) -> InstanceTag {
        self.their_tag
    }

    /// The negotiated protocol version, once known.
    pub fn protocol_version(&self) -> Option<u16> {
        self.version
    }

    /// The peer's long-term key, as authenticated by the last AKE.
    pub fn remote_public_key(&self) -> Option<&LongTermPublicKey> {
        self.remote_public_key.as_ref()
    }

    pub fn remote_fingerprint(&self) -> Option<String> {
        self.remote_public_key.as_ref().map(LongTermPublicKey::fingerprint_hex)
    }

    pub fn is_smp_in_progress(&self) -> bool {
        self.smp.is_in_progress()
    }

    pub(crate) fn auth_state(&self) -> &AuthState {
        &self.auth
    }

    pub(crate) fn set_auth_state(&mut self, auth: AuthState) {
        self.auth = auth;
    }

    fn set_status<H: Host>(&mut self, ctx: &Context<'_, H>, status: SessionStatus) {
        if self.status != status {
            self.status = status;
            ctx.host
                .handle_event(ctx.id, SessionEvent::StatusChanged { instance: self.their_tag, status });
        }
    }

    fn forget_keys(&mut self) {
        self.keys = None;
        self.ssid = None;
        self.smp.reset();
    }

    /* Outgoing */

    fn envelope<H: Host>(&self, ctx: &Context<'_, H>, version: u16, body: EncodedBody) -> EncodedMessage {
        let (sender_tag, receiver_tag) = if version >= PROTOCOL_VERSION_3 {
            (ctx.our_tag, self.their_tag)
        } else {
            (InstanceTag::ZERO, InstanceTag::ZERO)
        };
        EncodedMessage { version, sender_tag, receiver_tag, body }
    }

    fn inject_encoded<H: Host>(&self, ctx: &Context<'_, H>, message: &EncodedMessage) -> Result<(), SendError> {
        let text = message.encode();
        let instructions = ctx.host.fragmenter_instructions(ctx.id);
        let fragments = fragment(&text, message.version, message.sender_tag, message.receiver_tag, &instructions)?;
        for f in &fragments {
            ctx.host.inject_message(ctx.id, f)?;
        }
        log!(ctx, LogEvent::SentFragments(fragments.len(), text.len()));
        Ok(())
    }

    fn inject_raw<H: Host>(&self, ctx: &Context<'_, H>, text: &str) -> Result<(), SendError> {
        ctx.host.inject_message(ctx.id, text)?;
        Ok(())
    }

    /// Encrypt and send one data message. The send counter advances even if injection fails.
    fn send_data<H: Host>(&mut self, ctx: &Context<'_, H>, text: &str, tlvs: &[Tlv], flags: u8) -> Result<(), SendError> {
        let version = self.version.ok_or(SendError::NotEncrypted)?;
        let payload = Zeroizing::new(encode_payload(text, tlvs)?);
        let keys = self.keys.as_mut().ok_or(SendError::NotEncrypted)?;
        let sending = keys.sending_keys().ok_or(SendError::NotEncrypted)?;
        let data = DataMessage {
            flags,
            sender_key_id: sending.sender_key_id,
            recipient_key_id: sending.recipient_key_id,
            next_dh: sending.next_dh,
            ctr: sending.ctr,
            encrypted: aes128_ctr(&sending.aes, &sending.ctr, &payload),
            mac: [0u8; MAC_SIZE],
            old_mac_keys: keys.old_mac_keys().to_vec(),
        };
        let mut message = self.envelope(ctx, version, EncodedBody::Data(data));
        let mac = message
            .authenticated_data()
            .map(|authenticated| hmac_sha1(sending.mac.as_slice(), &authenticated));
        if let (EncodedBody::Data(data), Some(mac)) = (&mut message.body, mac) {
            data.mac = mac;
        }
        self.inject_encoded(ctx, &message)?;

        if let Some(keys) = self.keys.as_mut() {
            keys.clear_old_mac_keys();
        }
        log!(ctx, LogEvent::SentDataMessage);
        Ok(())
    }

    fn send_smp<H: Host>(&mut self, ctx: &Context<'_, H>, tlvs: &[Tlv]) -> Result<(), SendError> {
        self.send_data(ctx, "", tlvs, FLAG_IGNORE_UNREADABLE)?;
        for tlv in tlvs {
            log!(ctx, LogEvent::SentSmp(tlv.tlv_type));
        }
        Ok(())
    }

    /// Ask the peer to start OTR by sending a query message.
    pub(crate) fn start<H: Host>(&mut self, ctx: &Context<'_, H>, policy: &Policy) -> Result<(), SendError> {
        if !policy.is_enabled() {
            return Err(SendError::NoVersionAllowed);
        }
        let query = query_message(&policy.advertised_versions());
        let fallback = ctx.host.fallback_message(ctx.id);
        if fallback.is_empty() {
            self.inject_raw(ctx, &query)?;
        } else {
            self.inject_raw(ctx, &format!("{} {}", query, fallback))?;
        }
        log!(ctx, LogEvent::SentQuery);
        Ok(())
    }

    fn start_ake<H: Host>(&mut self, ctx: &Context<'_, H>, version: u16) -> Result<(), SendError> {
        let (state, commit) = ake::start(version, &mut OsRng);
        let message = self.envelope(ctx, version, commit);
        self.inject_encoded(ctx, &message)?;
        self.auth = state;
        log!(ctx, LogEvent::SentDhCommit);
        Ok(())
    }

    /// End the encrypted session, telling the peer if it is still listening.
    pub(crate) fn end<H: Host>(&mut self, ctx: &Context<'_, H>) -> Result<(), SendError> {
        match self.status {
            SessionStatus::Encrypted => {
                self.send_data(ctx, "", &[Tlv::empty(TLV_DISCONNECTED)], FLAG_IGNORE_UNREADABLE)?;
            }
            SessionStatus::Finished => {}
            SessionStatus::Plaintext => return Ok(()),
        }
        self.forget_keys();
        self.auth = AuthState::None;
        self.set_status(ctx, SessionStatus::Plaintext);
        Ok(())
    }

    /// Send a user message according to the session status and policy.
    pub(crate) fn send<H: Host>(
        &mut self,
        ctx: &Context<'_, H>,
        policy: &Policy,
        text: &str,
        tlvs: &[Tlv],
    ) -> Result<(), SendError> {
        match self.status {
            SessionStatus::Plaintext if policy.require_encryption => {
                if text.contains('\0') {
                    return Err(SendError::NulInText);
                }
                self.start(ctx, policy)?;
                self.queue.push(text.to_string());
                ctx.host
                    .handle_event(ctx.id, SessionEvent::RequireEncryption { text: text.to_string() });
                Ok(())
            }
            SessionStatus::Plaintext => {
                if policy.is_enabled() && policy.send_whitespace_tag && !self.peer_speaks_otr {
                    self.inject_raw(ctx, &tag_plaintext(text, &policy.advertised_versions()))
                } else {
                    self.inject_raw(ctx, text)
                }
            }
            SessionStatus::Encrypted => self.send_data(ctx, text, tlvs, 0),
            SessionStatus::Finished => {
                ctx.host
                    .handle_event(ctx.id, SessionEvent::FinishedSessionMessage { text: text.to_string() });
                Ok(())
            }
        }
    }

    fn flush_queue<H: Host>(&mut self, ctx: &Context<'_, H>) -> Result<(), SendError> {
        let queued = std::mem::take(&mut self.queue);
        for (i, text) in queued.iter().enumerate() {
            if let Err(e) = self.send_data(ctx, text, &[], 0) {
                self.queue = queued[i..].to_vec();
                return Err(e);
            }
        }
        if !queued.is_empty() {
            log!(ctx, LogEvent::FlushedQueuedMessages(queued.len()));
        }
        Ok(())
    }

    /// Hand over messages still waiting for encryption, so another instance can send them.
    pub(crate) fn take_queue(&mut self) -> Vec<String> {
        std::mem::take(&mut self.queue)
    }

    /// Queue messages taken from another instance and send them if already encrypted.
    pub(crate) fn adopt_queue<H: Host>(&mut self, ctx: &Context<'_, H>, queued: Vec<String>) -> Result<(), SendError> {
        self.queue.extend(queued);
        if self.status == SessionStatus::Encrypted {
            self.flush_queue(ctx)
        } else {
            Ok(())
        }
    }

    /* SMP */

    fn fingerprints<H: Host>(&self, ctx: &Context<'_, H>) -> Result<([u8; FINGERPRINT_SIZE], [u8; FINGERPRINT_SIZE], [u8; SSID_SIZE]), SendError> {
        if self.status != SessionStatus::Encrypted {
            return Err(SendError::NotEncrypted);
        }
        let ours = ctx.host.local_key_pair(ctx.id).public_key().fingerprint();
        let theirs = self.remote_public_key.as_ref().ok_or(SendError::NotEncrypted)?.fingerprint();
        let ssid = self.ssid.ok_or(SendError::NotEncrypted)?;
        Ok((ours, theirs, ssid))
    }

    pub(crate) fn init_smp<H: Host>(
        &mut self,
        ctx: &Context<'_, H>,
        question: Option<&str>,
        secret: &[u8],
    ) -> Result<(), SendError> {
        let (ours, theirs, ssid) = self.fingerprints(ctx)?;
        let mut smp = self.smp.clone();
        let mut tlvs = Vec::with_capacity(2);
        if smp.is_in_progress() {
            tlvs.push(smp.abort());
        }
        tlvs.push(smp.initiate(question, combined_secret(&ours, &theirs, &ssid, secret), &mut OsRng));
        self.send_smp(ctx, &tlvs)?;
        self.smp = smp;
        Ok(())
    }

    pub(crate) fn respond_smp<H: Host>(&mut self, ctx: &Context<'_, H>, secret: &[u8]) -> Result<(), SendError> {
        let (ours, theirs, ssid) = self.fingerprints(ctx)?;
        let mut smp = self.smp.clone();
        let tlv = smp
            .respond(combined_secret(&theirs, &ours, &ssid, secret), &mut OsRng)
            .ok_or(SendError::SmpNotAsked)?;
        self.send_smp(ctx, &[tlv])?;
        self.smp = smp;
        Ok(())
    }

    pub(crate) fn abort_smp<H: Host>(&mut self, ctx: &Context<'_, H>) -> Result<(), SendError> {
        if !self.smp.is_in_progress() {
            return Ok(());
        }
        let mut smp = self.smp.clone();
        let tlv = smp.abort();
        if self.status == SessionStatus::Encrypted {
            self.send_smp(ctx, &[tlv])?;
        }
        self.smp = smp;
        ctx.host.handle_event(ctx.id, SessionEvent::SmpAborted { instance: self.their_tag });
        Ok(())
    }

    /* Incoming */

    /// Handle one assembled and parsed message from the peer.
    #[cfg_attr(not(feature = "logging"), allow(unused_variables))]
    pub(crate) fn receive<H: Host>(
        &mut self,
        ctx: &Context<'_, H>,
        policy: &Policy,
        message: Message,
    ) -> Result<Option<String>, ReceiveError> {
        match message {
            Message::Plaintext { text, versions } => Ok(self.receive_plaintext(ctx, policy, text, &versions)),
            Message::Query { versions } => {
                log!(ctx, LogEvent::ReceivedQuery);
                self.peer_speaks_otr = true;
                if let Some(version) = policy.negotiate(&versions) {
                    self.start_ake(ctx, version)?;
                }
                Ok(None)
            }
            Message::Error { text } => {
                log!(ctx, LogEvent::ReceivedErrorMessage);
                self.peer_speaks_otr = true;
                ctx.host.handle_event(ctx.id, SessionEvent::ErrorMessage { text });
                if policy.error_start_ake {
                    if let Err(e) = self.start(ctx, policy) {
                        log!(ctx, LogEvent::SendFailed(&e));
                    }
                }
                Ok(None)
            }
            Message::Encoded(message) => self.receive_encoded(ctx, policy, &message),
        }
    }

    #[cfg_attr(not(feature = "logging"), allow(unused_variables))]
    fn receive_plaintext<H: Host>(
        &mut self,
        ctx: &Context<'_, H>,
        policy: &Policy,
        text: String,
        versions: &[u16],
    ) -> Option<String> {
        if !versions.is_empty() {
            log!(ctx, LogEvent::ReceivedWhitespaceTag);
            self.peer_speaks_otr = true;
            if policy.whitespace_start_ake {
                if let Some(version) = policy.negotiate(versions) {
                    if let Err(e) = self.start_ake(ctx, version) {
                        log!(ctx, LogEvent::SendFailed(&e));
                    }
                }
            }
        }
        if self.status != SessionStatus::Plaintext || policy.require_encryption {
            ctx.host
                .handle_event(ctx.id, SessionEvent::UnencryptedMessage { text: text.clone() });
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn receive_encoded<H: Host>(
        &mut self,
        ctx: &Context<'_, H>,
        policy: &Policy,
        message: &EncodedMessage,
    ) -> Result<Option<String>, ReceiveError> {
        if !policy.allows(message.version) {
            return Err(fault!(FaultType::PolicyViolation));
        }
        self.peer_speaks_otr = true;
        let version = message.version;
        let transition = match &message.body {
            EncodedBody::DhCommit { encrypted_gx, hashed_gx } => {
                ake::handle_dh_commit(&self.auth, version, encrypted_gx, hashed_gx, &mut OsRng)
            }
            EncodedBody::DhKey { gy } => {
                ake::handle_dh_key(&self.auth, gy, &ctx.host.local_key_pair(ctx.id))?
            }
            EncodedBody::RevealSignature { r, encrypted_signature, mac } => ake::handle_reveal_signature(
                &self.auth,
                r,
                encrypted_signature,
                mac,
                &ctx.host.local_key_pair(ctx.id),
            )?,
            EncodedBody::Signature { encrypted_signature, mac } => {
                ake::handle_signature(&self.auth, encrypted_signature, mac)?
            }
            EncodedBody::Data(data) => return self.receive_data(ctx, message, data),
        };
        self.apply(ctx, version, transition)?;
        Ok(None)
    }

    /// Send the reply of an AKE step, then commit its state.
    fn apply<H: Host>(&mut self, ctx: &Context<'_, H>, version: u16, transition: Transition) -> Result<(), SendError> {
        if let Some(reply) = transition.reply {
            let message = self.envelope(ctx, version, reply);
            self.inject_encoded(ctx, &message)?;
        }
        log!(ctx, transition.event);
        self.auth = transition.state;
        if let Some(result) = transition.completed {
            self.go_encrypted(ctx, result)?;
        }
        Ok(())
    }

    fn go_encrypted<H: Host>(&mut self, ctx: &Context<'_, H>, result: AkeResult) -> Result<(), SendError> {
        self.keys = Some(SessionKeyRing::new(result.our_dh, result.their_dh, result.their_key_id, &mut OsRng));
        self.remote_public_key = Some(result.their_public_key);
        self.ssid = Some(result.ssid);
        self.version = Some(result.version);
        self.smp.reset();
        log!(ctx, LogEvent::AkeComplete(self.their_tag));
        self.set_status(ctx, SessionStatus::Encrypted);
        self.flush_queue(ctx)
    }

    fn unreadable<H: Host>(&mut self, ctx: &Context<'_, H>, flags: u8) -> Result<Option<String>, ReceiveError> {
        log!(ctx, LogEvent::DroppedMessage(&fault!(FaultType::UnknownKeyId)));
        if flags & FLAG_IGNORE_UNREADABLE == 0 {
            ctx.host
                .handle_event(ctx.id, SessionEvent::UnreadableMessage { instance: self.their_tag });
            let reply = error_message(&ctx.host.reply_for_unreadable_message(ctx.id));
            self.inject_raw(ctx, &reply)?;
        }
        Ok(None)
    }

    fn receive_data<H: Host>(
        &mut self,
        ctx: &Context<'_, H>,
        message: &EncodedMessage,
        data: &DataMessage,
    ) -> Result<Option<String>, ReceiveError> {
        let receiving = match (self.status, self.keys.as_ref()) {
            (SessionStatus::Encrypted, Some(keys)) => keys.receiving_keys(data.sender_key_id, data.recipient_key_id),
            _ => None,
        };
        let Some(receiving) = receiving else {
            return self.unreadable(ctx, data.flags);
        };
        let authenticated = message.authenticated_data().ok_or(fault!(FaultType::InvalidMessage))?;
        if !secure_eq(&hmac_sha1(receiving.mac.as_slice(), &authenticated), &data.mac) {
            return Err(fault!(FaultType::FailedAuth));
        }
        let ctr = u64::from_be_bytes(data.ctr);
        if ctr <= receiving.last_ctr {
            return Err(fault!(FaultType::ExpiredCounter));
        }
        if !is_valid_dh_public(&data.next_dh) {
            return Err(fault!(FaultType::IllegalDhValue));
        }
        let plaintext = Zeroizing::new(aes128_ctr(&receiving.aes, &data.ctr, &data.encrypted));
        let (text, tlvs) = decode_payload(&plaintext)?;

        if let Some(keys) = self.keys.as_mut() {
            let rotation = keys.accept(&receiving, ctr, &data.next_dh, &mut OsRng);
            log!(ctx, LogEvent::ReceivedDataMessage);
            if let Some(id) = rotation.local {
                log!(ctx, LogEvent::RotatedLocalKey(id));
            }
            if let Some(id) = rotation.remote {
                log!(ctx, LogEvent::RotatedRemoteKey(id));
            }
        }
        for tlv in &tlvs {
            self.receive_tlv(ctx, tlv)?;
        }
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    fn receive_tlv<H: Host>(&mut self, ctx: &Context<'_, H>, tlv: &Tlv) -> Result<(), SendError> {
        match tlv.tlv_type {
            TLV_DISCONNECTED => {
                log!(ctx, LogEvent::ReceivedDisconnect);
                self.forget_keys();
                self.set_status(ctx, SessionStatus::Finished);
                Ok(())
            }
            TLV_SMP1 | TLV_SMP2 | TLV_SMP3 | TLV_SMP4 | TLV_SMP_ABORT | TLV_SMP1Q => self.receive_smp(ctx, tlv),
            _ => Ok(()),
        }
    }

    fn receive_smp<H: Host>(&mut self, ctx: &Context<'_, H>, tlv: &Tlv) -> Result<(), SendError> {
        if self.status != SessionStatus::Encrypted {
            return Ok(());
        }
        log!(ctx, LogEvent::ReceivedSmp(tlv.tlv_type));
        let instance = self.their_tag;
        let mut smp = self.smp.clone();
        let event = match smp.process(tlv, &mut OsRng) {
            SmpOutcome::SecretRequested { question } => {
                self.smp = smp;
                ctx.host.ask_for_secret(ctx.id, instance, question.as_deref());
                return Ok(());
            }
            SmpOutcome::Reply(reply) => {
                self.send_smp(ctx, &[reply])?;
                self.smp = smp;
                return Ok(());
            }
            SmpOutcome::Finished { reply, verified, approved } => {
                if let Some(reply) = reply {
                    self.send_smp(ctx, &[reply])?;
                }
                self.smp = smp;
                log!(ctx, LogEvent::SmpComplete(verified));
                let fingerprint = self.remote_fingerprint().unwrap_or_default();
                if verified {
                    SessionEvent::SmpVerified { instance, fingerprint, approved }
                } else {
                    SessionEvent::SmpUnverified { instance, fingerprint }
                }
            }
            SmpOutcome::Aborted => {
                self.smp = smp;
                SessionEvent::SmpAborted { instance }
            }
            SmpOutcome::Cheated => {
                self.smp = smp;
                log!(ctx, LogEvent::DroppedMessage(&fault!(FaultType::SmpCheated)));
                SessionEvent::SmpError { instance, tlv_type: tlv.tlv_type, cheated: true }
            }
            SmpOutcome::OutOfOrder => SessionEvent::SmpError { instance, tlv_type: tlv.tlv_type, cheated: false },
        };
        ctx.host.handle_event(ctx.id, event);
        Ok(())
    }
}
