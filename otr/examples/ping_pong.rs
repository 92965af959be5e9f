/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand_core::OsRng;

use otr::application::{FragmenterInstructions, Host, Policy, SessionId};
use otr::result::{SessionEvent, SessionStatus};
use otr::{InstanceTag, LongTermKeyPair};

const TEST_MAX_FRAGMENT_SIZE: usize = 140;
const ROUNDS: usize = 64;

struct TestHost {
    name: &'static str,
    key_pair: Arc<LongTermKeyPair>,
    out: Mutex<mpsc::SyncSender<String>>,
    secret: &'static [u8],
    asked: AtomicBool,
}

type Session = otr::Session<TestHost>;

#[allow(unused)]
impl Host for TestHost {
    fn inject_message(&self, session: &SessionId, message: &str) -> Result<(), std::io::Error> {
        self.out
            .lock()
            .unwrap()
            .send(message.to_string())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer hung up"))
    }

    fn session_policy(&self, session: &SessionId) -> Policy {
        Policy::new_default()
    }

    fn local_key_pair(&self, session: &SessionId) -> Arc<LongTermKeyPair> {
        self.key_pair.clone()
    }

    fn fragmenter_instructions(&self, session: &SessionId) -> FragmenterInstructions {
        FragmenterInstructions::new(usize::MAX, TEST_MAX_FRAGMENT_SIZE)
    }

    fn ask_for_secret(&self, session: &SessionId, instance: InstanceTag, question: Option<&str>) {
        println!("[{}] peer {} asks {:?}", self.name, instance, question);
        self.asked.store(true, Ordering::Relaxed);
    }

    fn handle_event(&self, session: &SessionId, event: SessionEvent) {
        println!("[{}] {:?}", self.name, event);
    }

    #[cfg(feature = "logging")]
    fn event_log(&self, session: &SessionId, event: otr::LogEvent<'_>) {
        println!(">[{}] {:?}", self.name, event);
    }
}

fn alice_main(run: &AtomicBool, alice: &Session, alice_in: mpsc::Receiver<String>) {
    alice.send("hello bob").unwrap();
    let mut pings = 0;
    let mut verifying = false;
    while run.load(Ordering::Relaxed) {
        let Ok(wire) = alice_in.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        match alice.transform_receiving(&wire) {
            Ok(Some(text)) => println!("[alice] received {:?}", text),
            Ok(None) => {}
            Err(e) => println!("[alice] ERROR {:?}", e),
        }
        if alice.status() != SessionStatus::Encrypted {
            continue;
        }
        if pings < ROUNDS {
            pings += 1;
            alice.send(&format!("ping {}", pings)).unwrap();
        } else if !verifying {
            verifying = true;
            alice.init_smp(Some("what is the password?"), alice.host().secret).unwrap();
        }
    }
}

fn bob_main(run: &AtomicBool, bob: &Session, bob_in: mpsc::Receiver<String>) {
    while run.load(Ordering::Relaxed) {
        let Ok(wire) = bob_in.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        match bob.transform_receiving(&wire) {
            Ok(Some(text)) => {
                println!("[bob] received {:?}", text);
                if let Some(n) = text.strip_prefix("ping ") {
                    bob.send(&format!("pong {}", n)).unwrap();
                }
            }
            Ok(None) => {}
            Err(e) => println!("[bob] ERROR {:?}", e),
        }
        if bob.host().asked.swap(false, Ordering::Relaxed) {
            bob.respond_smp(bob.host().secret).unwrap();
        }
    }
}

fn main() {
    let run = &AtomicBool::new(true);
    let (alice_out, bob_in) = mpsc::sync_channel::<String>(1024);
    let (bob_out, alice_in) = mpsc::sync_channel::<String>(1024);

    let alice = Session::new(
        Arc::new(TestHost {
            name: "alice",
            key_pair: Arc::new(LongTermKeyPair::generate(&mut OsRng)),
            out: Mutex::new(alice_out),
            secret: b"correct horse",
            asked: AtomicBool::new(false),
        }),
        SessionId::new("alice@example.org", "bob@example.org", "xmpp"),
    );
    let bob = Session::new(
        Arc::new(TestHost {
            name: "bob",
            key_pair: Arc::new(LongTermKeyPair::generate(&mut OsRng)),
            out: Mutex::new(bob_out),
            secret: b"correct horse",
            asked: AtomicBool::new(false),
        }),
        SessionId::new("bob@example.org", "alice@example.org", "xmpp"),
    );
    println!("[alice] fingerprint {}", alice.local_fingerprint());
    println!("[bob] fingerprint {}", bob.local_fingerprint());

    thread::scope(|ts| {
        ts.spawn(|| alice_main(run, &alice, alice_in));
        ts.spawn(|| bob_main(run, &bob, bob_in));

        thread::sleep(Duration::from_secs(10));
        run.store(false, Ordering::SeqCst);
    });
    println!("[alice] talking to {:?}", alice.remote_fingerprint());
}
