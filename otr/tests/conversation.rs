/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand_core::OsRng;

use otr::application::{FragmenterInstructions, Host, Policy, SessionId};
use otr::result::{SendError, SessionEvent, SessionStatus};
use otr::proto::TLV_SMP2;
use otr::{InstanceTag, LongTermKeyPair, Tlv};

struct TestHost {
    key_pair: Arc<LongTermKeyPair>,
    policy: Mutex<Policy>,
    instructions: Mutex<FragmenterInstructions>,
    outbox: Mutex<VecDeque<String>>,
    events: Mutex<Vec<SessionEvent>>,
    questions: Mutex<Vec<(InstanceTag, Option<String>)>>,
    fail_injection: AtomicBool,
}

impl TestHost {
    fn new(policy: Policy) -> Arc<Self> {
        Arc::new(Self {
            key_pair: Arc::new(LongTermKeyPair::generate(&mut OsRng)),
            policy: Mutex::new(policy),
            instructions: Mutex::new(FragmenterInstructions::UNLIMITED),
            outbox: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
            questions: Mutex::new(Vec::new()),
            fail_injection: AtomicBool::new(false),
        })
    }

    fn take_outbox(&self) -> Vec<String> {
        self.outbox.lock().unwrap().drain(..).collect()
    }

    fn take_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl Host for TestHost {
    fn inject_message(&self, _: &SessionId, message: &str) -> Result<(), std::io::Error> {
        if self.fail_injection.load(Ordering::Relaxed) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "transport down"));
        }
        self.outbox.lock().unwrap().push_back(message.to_string());
        Ok(())
    }

    fn session_policy(&self, _: &SessionId) -> Policy {
        *self.policy.lock().unwrap()
    }

    fn local_key_pair(&self, _: &SessionId) -> Arc<LongTermKeyPair> {
        self.key_pair.clone()
    }

    fn fragmenter_instructions(&self, _: &SessionId) -> FragmenterInstructions {
        *self.instructions.lock().unwrap()
    }

    fn ask_for_secret(&self, _: &SessionId, instance: InstanceTag, question: Option<&str>) {
        self.questions.lock().unwrap().push((instance, question.map(str::to_string)));
    }

    fn handle_event(&self, _: &SessionId, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

type Session = otr::Session<TestHost>;

fn session(name: &str, peer: &str, policy: Policy) -> Session {
    Session::new(TestHost::new(policy), SessionId::new(name, peer, "test"))
}

fn pair(policy: Policy) -> (Session, Session) {
    (session("alice", "bob", policy), session("bob", "alice", policy))
}

/// Deliver everything `from` sent to `to`. Returns false if there was nothing to deliver.
fn deliver(from: &Session, to: &Session, shown: &mut Vec<String>) -> bool {
    let pending = from.host().take_outbox();
    for message in &pending {
        if let Some(text) = to.transform_receiving(message).unwrap() {
            shown.push(text);
        }
    }
    !pending.is_empty()
}

/// Shuttle messages back and forth until both sides are quiet.
fn pump(alice: &Session, bob: &Session) -> (Vec<String>, Vec<String>) {
    let (mut to_alice, mut to_bob) = (Vec::new(), Vec::new());
    loop {
        let a = deliver(alice, bob, &mut to_bob);
        let b = deliver(bob, alice, &mut to_alice);
        if !a && !b {
            return (to_alice, to_bob);
        }
    }
}

fn encrypted_pair(policy: Policy) -> (Session, Session) {
    let (alice, bob) = pair(policy);
    alice.start().unwrap();
    pump(&alice, &bob);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);
    (alice, bob)
}

#[test]
fn v3_conversation_converges_on_slaves() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    assert_eq!(alice.outgoing_instance(), bob.local_instance_tag());
    assert_eq!(bob.outgoing_instance(), alice.local_instance_tag());
    assert_eq!(alice.instances(), vec![bob.local_instance_tag()]);
    assert_eq!(alice.remote_fingerprint(), Some(bob.local_fingerprint()));
    assert_eq!(bob.remote_fingerprint(), Some(alice.local_fingerprint()));
    assert_eq!(alice.remote_public_key().as_ref(), Some(bob.host().key_pair.public_key()));

    let slave = alice.slave(bob.local_instance_tag()).unwrap();
    assert_eq!(slave.lock().unwrap().protocol_version(), Some(3));
    assert!(alice.host().take_events().contains(&SessionEvent::OutgoingSessionChanged {
        instance: bob.local_instance_tag()
    }));

    alice.send("hello bob").unwrap();
    let wire = alice.host().outbox.lock().unwrap().front().cloned().unwrap();
    assert!(wire.starts_with("?OTR:") && !wire.contains("hello"));
    let (_, shown) = pump(&alice, &bob);
    assert_eq!(shown, vec!["hello bob".to_string()]);
}

#[test]
fn v2_conversation_converges_on_master() {
    let policy = Policy { allow_v3: false, ..Policy::new_default() };
    let (alice, bob) = encrypted_pair(policy);
    assert_eq!(alice.outgoing_instance(), InstanceTag::ZERO);
    assert!(alice.instances().is_empty());
    assert_eq!(alice.master().lock().unwrap().protocol_version(), Some(2));

    bob.send("over v2").unwrap();
    let (shown, _) = pump(&alice, &bob);
    assert_eq!(shown, vec!["over v2".to_string()]);
}

#[test]
fn both_sides_starting_at_once_converge() {
    let (alice, bob) = pair(Policy::new_default());
    alice.start().unwrap();
    bob.start().unwrap();
    pump(&alice, &bob);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);
    assert_eq!(alice.instances(), vec![bob.local_instance_tag()]);

    bob.send("we made it").unwrap();
    let (shown, _) = pump(&alice, &bob);
    assert_eq!(shown, vec!["we made it".to_string()]);
}

#[test]
fn crossing_whitespace_tags_converge() {
    let (alice, bob) = pair(Policy::new_default());
    alice.send("hi bob").unwrap();
    bob.send("hi alice").unwrap();
    let (to_alice, to_bob) = pump(&alice, &bob);
    assert_eq!(to_alice, vec!["hi alice".to_string()]);
    assert_eq!(to_bob, vec!["hi bob".to_string()]);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);
}

#[test]
fn v2_both_sides_starting_at_once_converge() {
    let policy = Policy { allow_v3: false, ..Policy::new_default() };
    let (alice, bob) = pair(policy);
    alice.start().unwrap();
    bob.start().unwrap();
    pump(&alice, &bob);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);
}

#[test]
fn many_rotations_in_both_directions() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    for i in 0..40 {
        let text = format!("message {}", i);
        if i % 3 == 0 {
            bob.send(&text).unwrap();
            let (shown, _) = pump(&alice, &bob);
            assert_eq!(shown, vec![text]);
        } else {
            alice.send(&text).unwrap();
            let (_, shown) = pump(&alice, &bob);
            assert_eq!(shown, vec![text]);
        }
    }
}

#[test]
fn replayed_data_message_is_dropped() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.send("once").unwrap();
    let wire = alice.host().take_outbox().pop().unwrap();
    assert_eq!(bob.transform_receiving(&wire).unwrap(), Some("once".to_string()));
    assert_eq!(bob.transform_receiving(&wire).unwrap(), None);
    assert!(bob.host().take_outbox().is_empty());
}

#[test]
fn whitespace_tag_starts_the_ake() {
    let (alice, bob) = pair(Policy::new_default());
    alice.send("hi").unwrap();
    let (_, shown) = pump(&alice, &bob);
    assert_eq!(shown, vec!["hi".to_string()]);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);

    alice.end().unwrap();
    pump(&alice, &bob);
    alice.send("plain again").unwrap();
    // The peer is known to speak OTR, so no more tags.
    assert_eq!(alice.host().take_outbox(), vec!["plain again".to_string()]);
}

#[test]
fn end_finishes_the_peer() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    bob.host().take_events();
    alice.end().unwrap();
    assert_eq!(alice.status(), SessionStatus::Plaintext);
    pump(&alice, &bob);
    assert_eq!(bob.status(), SessionStatus::Finished);
    assert!(bob.remote_public_key().is_some());

    bob.send("anyone there?").unwrap();
    assert!(bob.host().take_outbox().is_empty());
    assert!(bob.host().take_events().contains(&SessionEvent::FinishedSessionMessage {
        text: "anyone there?".to_string()
    }));

    bob.end().unwrap();
    assert_eq!(bob.status(), SessionStatus::Plaintext);
    assert!(bob.host().take_outbox().is_empty());
}

#[test]
fn refresh_negotiates_new_keys() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.refresh().unwrap();
    pump(&alice, &bob);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);
    bob.send("fresh").unwrap();
    let (shown, _) = pump(&alice, &bob);
    assert_eq!(shown, vec!["fresh".to_string()]);
}

#[test]
fn smp_with_question_verifies() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.host().take_events();
    bob.host().take_events();

    alice.init_smp(Some("where did we meet?"), b"the harbour").unwrap();
    pump(&alice, &bob);
    assert_eq!(
        bob.host().questions.lock().unwrap().as_slice(),
        &[(alice.local_instance_tag(), Some("where did we meet?".to_string()))]
    );
    bob.respond_smp(b"the harbour").unwrap();
    pump(&alice, &bob);

    assert!(alice.host().take_events().contains(&SessionEvent::SmpVerified {
        instance: bob.local_instance_tag(),
        fingerprint: bob.local_fingerprint(),
        approved: true,
    }));
    assert!(bob.host().take_events().contains(&SessionEvent::SmpVerified {
        instance: alice.local_instance_tag(),
        fingerprint: alice.local_fingerprint(),
        approved: true,
    }));
}

#[test]
fn smp_with_different_secrets_fails() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.init_smp(None, b"red").unwrap();
    pump(&alice, &bob);
    bob.respond_smp(b"blue").unwrap();
    pump(&alice, &bob);
    assert!(alice.host().take_events().contains(&SessionEvent::SmpUnverified {
        instance: bob.local_instance_tag(),
        fingerprint: bob.local_fingerprint(),
    }));
    assert!(matches!(bob.respond_smp(b"blue"), Err(SendError::SmpNotAsked)));
}

#[test]
fn smp_abort_reaches_the_peer() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.init_smp(None, b"red").unwrap();
    pump(&alice, &bob);
    bob.abort_smp().unwrap();
    pump(&alice, &bob);
    assert!(alice
        .host()
        .take_events()
        .contains(&SessionEvent::SmpAborted { instance: bob.local_instance_tag() }));
    assert!(matches!(bob.respond_smp(b"red"), Err(SendError::SmpNotAsked)));
}

#[test]
fn forged_smp_reply_is_reported_as_cheating() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.init_smp(None, b"red").unwrap();
    pump(&alice, &bob);
    alice.host().take_events();

    bob.send_with_tlvs("", &[Tlv::new(TLV_SMP2, vec![0, 0, 0, 1, 0, 0, 0, 1, 7])]).unwrap();
    pump(&alice, &bob);
    assert!(alice.host().take_events().contains(&SessionEvent::SmpError {
        instance: bob.local_instance_tag(),
        tlv_type: TLV_SMP2,
        cheated: true,
    }));
    assert!(!alice.slave(bob.local_instance_tag()).unwrap().lock().unwrap().is_smp_in_progress());
}

#[test]
fn smp_needs_encryption() {
    let (alice, _bob) = pair(Policy::new_default());
    assert!(matches!(alice.init_smp(None, b"x"), Err(SendError::NotEncrypted)));
}

#[test]
fn fragmented_ake_and_messages() {
    let (alice, bob) = pair(Policy::new_default());
    for host in [alice.host(), bob.host()] {
        *host.instructions.lock().unwrap() = FragmenterInstructions::new(usize::MAX, 100);
    }
    alice.start().unwrap();
    pump(&alice, &bob);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);

    let long = "long message ".repeat(40);
    alice.send(&long).unwrap();
    assert!(alice.host().outbox.lock().unwrap().iter().all(|f| f.len() <= 100 && f.starts_with("?OTR|")));
    let (_, shown) = pump(&alice, &bob);
    assert_eq!(shown, vec![long]);
}

#[test]
fn too_many_fragments_is_refused() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    *alice.host().instructions.lock().unwrap() = FragmenterInstructions::new(2, 60);
    assert!(matches!(alice.send(&"x".repeat(500)), Err(SendError::Fragment(_))));
    assert!(alice.host().take_outbox().is_empty());

    *alice.host().instructions.lock().unwrap() = FragmenterInstructions::UNLIMITED;
    alice.send("fits").unwrap();
    let (_, shown) = pump(&alice, &bob);
    assert_eq!(shown, vec!["fits".to_string()]);
}

#[test]
fn require_encryption_queues_until_encrypted() {
    let (alice, bob) = (session("alice", "bob", Policy::ALWAYS), session("bob", "alice", Policy::new_default()));
    alice.send("for your eyes only").unwrap();
    assert!(alice
        .host()
        .take_events()
        .contains(&SessionEvent::RequireEncryption { text: "for your eyes only".to_string() }));
    let query = alice.host().outbox.lock().unwrap().front().cloned().unwrap();
    assert!(query.starts_with("?OTRv23?"));

    let (_, shown) = pump(&alice, &bob);
    assert_eq!(shown, vec!["for your eyes only".to_string()]);
}

#[test]
fn failed_query_under_require_encryption_queues_nothing() {
    let (alice, bob) = (session("alice", "bob", Policy::ALWAYS), session("bob", "alice", Policy::new_default()));
    alice.host().fail_injection.store(true, Ordering::Relaxed);
    assert!(matches!(alice.send("secret"), Err(SendError::Io(_))));
    assert!(alice.host().take_events().is_empty());
    alice.host().fail_injection.store(false, Ordering::Relaxed);

    alice.send("secret").unwrap();
    let (_, shown) = pump(&alice, &bob);
    assert_eq!(shown, vec!["secret".to_string()]);
}

#[test]
fn unencodable_messages_are_refused() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    assert!(matches!(alice.send("a\0b"), Err(SendError::NulInText)));
    let oversized = Tlv::new(0x99, vec![1; 70000]);
    assert!(matches!(alice.send_with_tlvs("x", &[oversized]), Err(SendError::TlvTooLong(70000))));
    assert!(alice.host().take_outbox().is_empty());

    alice.send("still fine").unwrap();
    let (_, shown) = pump(&alice, &bob);
    assert_eq!(shown, vec!["still fine".to_string()]);
}

#[test]
fn chosen_outgoing_instance_survives_incoming_messages() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.set_outgoing_instance(InstanceTag::ZERO).unwrap();
    bob.send("hi").unwrap();
    let (shown, _) = pump(&alice, &bob);
    assert_eq!(shown, vec!["hi".to_string()]);
    assert_eq!(alice.outgoing_instance(), InstanceTag::ZERO);
    assert_eq!(alice.status(), SessionStatus::Plaintext);
}

#[test]
fn plaintext_while_encrypted_is_flagged() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    bob.host().take_events();
    assert_eq!(bob.transform_receiving("psst").unwrap(), Some("psst".to_string()));
    assert_eq!(
        bob.host().take_events(),
        vec![SessionEvent::UnencryptedMessage { text: "psst".to_string() }]
    );
    drop(alice);
}

#[test]
fn failed_injection_commits_nothing() {
    let (alice, bob) = pair(Policy::new_default());
    alice.host().fail_injection.store(true, Ordering::Relaxed);
    assert!(matches!(alice.start(), Err(SendError::Io(_))));
    alice.host().fail_injection.store(false, Ordering::Relaxed);

    alice.start().unwrap();
    let query = alice.host().take_outbox().pop().unwrap();
    bob.host().fail_injection.store(true, Ordering::Relaxed);
    assert!(bob.transform_receiving(&query).is_err());
    bob.host().fail_injection.store(false, Ordering::Relaxed);
    assert!(bob.transform_receiving(&query).unwrap().is_none());
    pump(&alice, &bob);
    assert_eq!(alice.status(), SessionStatus::Encrypted);
    assert_eq!(bob.status(), SessionStatus::Encrypted);
}

#[test]
fn unreadable_message_gets_an_error_reply() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    alice.send("lost").unwrap();
    let wire = alice.host().take_outbox().pop().unwrap();

    let forgetful = Session::with_instance_tag(
        TestHost::new(Policy::new_default()),
        SessionId::new("bob", "alice", "test"),
        bob.local_instance_tag(),
    );
    assert_eq!(forgetful.transform_receiving(&wire).unwrap(), None);
    assert!(forgetful
        .host()
        .take_events()
        .contains(&SessionEvent::UnreadableMessage { instance: alice.local_instance_tag() }));
    let reply = forgetful.host().take_outbox().pop().unwrap();
    assert!(reply.starts_with("?OTR Error:"));

    alice.host().take_events();
    assert_eq!(alice.transform_receiving(&reply).unwrap(), None);
    let events = alice.host().take_events();
    assert!(matches!(events.first(), Some(SessionEvent::ErrorMessage { .. })));
    // error_start_ake asks for a new session
    assert!(alice.host().take_outbox().pop().unwrap().starts_with("?OTRv23?"));
}

#[test]
fn repeated_dh_commit_reuses_one_slave() {
    let (alice, bob) = pair(Policy::new_default());
    alice.start().unwrap();
    deliver(&alice, &bob, &mut Vec::new());
    let commit = bob.host().take_outbox().pop().unwrap();

    assert_eq!(alice.transform_receiving(&commit).unwrap(), None);
    let first = alice.slave(bob.local_instance_tag()).unwrap();
    assert_eq!(alice.transform_receiving(&commit).unwrap(), None);
    let second = alice.slave(bob.local_instance_tag()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(alice.instances().len(), 1);
    assert!(!alice.host().take_events().contains(&SessionEvent::MultipleInstancesDetected));
}

#[test]
fn second_peer_instance_is_detected() {
    let alice = session("alice", "bob", Policy::new_default());
    let bob_phone = session("bob", "alice", Policy::new_default());
    let bob_laptop = session("bob", "alice", Policy::new_default());

    alice.start().unwrap();
    let query = alice.host().take_outbox().pop().unwrap();
    for bob in [&bob_phone, &bob_laptop] {
        bob.transform_receiving(&query).unwrap();
        deliver(bob, &alice, &mut Vec::new());
    }
    assert_eq!(alice.instances().len(), 2);
    assert!(alice.host().take_events().contains(&SessionEvent::MultipleInstancesDetected));

    // Each device gets the DH-Key addressed to it, the other one would be ignored.
    let dh_keys = alice.host().take_outbox();
    assert_eq!(dh_keys.len(), 2);
    assert_eq!(bob_phone.transform_receiving(&dh_keys[0]).unwrap(), None);
    assert_eq!(bob_laptop.transform_receiving(&dh_keys[0]).unwrap(), None);
    assert_eq!(bob_laptop.host().take_events(), vec![SessionEvent::MessageForAnotherInstance]);
    assert_eq!(bob_laptop.transform_receiving(&dh_keys[1]).unwrap(), None);

    pump(&alice, &bob_phone);
    pump(&alice, &bob_laptop);
    assert_eq!(bob_phone.status(), SessionStatus::Encrypted);
    assert_eq!(bob_laptop.status(), SessionStatus::Encrypted);
    // The first instance to finish the AKE keeps the outgoing slot.
    assert_eq!(alice.outgoing_instance(), bob_phone.local_instance_tag());

    alice.set_outgoing_instance(bob_laptop.local_instance_tag()).unwrap();
    alice.send("to the laptop").unwrap();
    let mut shown = Vec::new();
    deliver(&alice, &bob_laptop, &mut shown);
    assert_eq!(shown, vec!["to the laptop".to_string()]);

    let unknown = InstanceTag::from_raw(0x4242);
    assert!(matches!(alice.set_outgoing_instance(unknown), Err(SendError::UnknownInstance(_))));
}

#[test]
fn message_for_another_instance_is_ignored() {
    let (alice, bob) = encrypted_pair(Policy::new_default());
    let stranger = session("carol", "alice", Policy::new_default());
    alice.send("not for carol").unwrap();
    let wire = alice.host().take_outbox().pop().unwrap();
    assert_eq!(stranger.transform_receiving(&wire).unwrap(), None);
    assert_eq!(stranger.host().take_events(), vec![SessionEvent::MessageForAnotherInstance]);
    assert!(stranger.instances().is_empty());
    drop(bob);
}

#[test]
fn malformed_fragments_are_dropped() {
    let (alice, bob) = pair(Policy::new_default());
    let (from, to) = (bob.local_instance_tag(), alice.local_instance_tag());
    for bad in [
        format!("?OTR|{}|{},00001,00000,abc,", from, to),
        format!("?OTR|{}|{},00003,00002,abc,", from, to),
        format!("?OTR|{}|{},00001,00002,abc,x", from, to),
        format!("?OTR|{}|{},0000a,00002,abc,", from, to),
        format!("?OTR|{}|{},00002,00003,abc,", from, to),
    ] {
        assert_eq!(alice.transform_receiving(&bad).unwrap(), None);
    }
    assert!(alice.host().take_outbox().is_empty());
    assert_eq!(alice.status(), SessionStatus::Plaintext);
}

#[test]
fn garbage_encoded_message_is_dropped() {
    let (alice, _bob) = pair(Policy::new_default());
    assert_eq!(alice.transform_receiving("?OTR:AAMD!!!.").unwrap(), None);
    assert_eq!(alice.transform_receiving("?OTR:AAMK.").unwrap(), None);
    assert!(alice.host().take_outbox().is_empty());
}

#[test]
fn v1_only_query_is_not_answered() {
    let (alice, _bob) = pair(Policy::new_default());
    assert_eq!(alice.transform_receiving("?OTR?").unwrap(), None);
    assert!(alice.host().take_outbox().is_empty());
}

#[test]
fn disabled_policy_passes_everything_through() {
    let (alice, _bob) = pair(Policy::NEVER);
    assert_eq!(alice.transform_receiving("?OTRv23?").unwrap(), Some("?OTRv23?".to_string()));
    assert!(matches!(alice.start(), Err(SendError::NoVersionAllowed)));
    alice.send("plain").unwrap();
    assert_eq!(alice.host().take_outbox(), vec!["plain".to_string()]);
}

#[test]
fn reserved_instance_tag_is_reported() {
    let (alice, _bob) = pair(Policy::new_default());
    let bad = format!("?OTR|{:08x}|{},00001,00002,abc,", 0x42, alice.local_instance_tag());
    assert_eq!(alice.transform_receiving(&bad).unwrap(), None);
    assert_eq!(alice.host().take_events(), vec![SessionEvent::MessageForAnotherInstance]);
}
