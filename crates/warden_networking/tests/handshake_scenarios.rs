//! # Handshake Scenarios
//!
//! End-to-end tests over real loopback sockets:
//!
//! 1. **Admission**: connecting peers verify and admit each other exactly once
//! 2. **Eviction**: an engine directive closes only the targeted connection
//! 3. **Kick**: removing the local user raises an event, closes nothing
//! 4. **Malformed registration**: protocol error, connection stays usable
//! 5. **Cancellation**: a verification result after disconnect is ignored
//! 6. **Fragmentation**: both framing policies under a split frame
//!
//! Run with: cargo test --package warden_networking --test handshake_scenarios

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use warden_networking::integration::{EngineDirective, PeerTarget};
use warden_networking::protocol::{encode_frame, Frame};
use warden_networking::{
    ClientPlatform, ClientType, ConnectionRole, FramingPolicy, MockAntiCheatEngine,
    MockIdentityVerifier, PeerHandle, PeerState, PeerTransport, RecordingEvents, RegistrationInfo,
    TransportConfig, TransportEvent, VerificationVerdict, VerifierPolicy,
};

// ============================================================================
// HARNESS
// ============================================================================

struct Node {
    transport: PeerTransport,
    verifier: MockIdentityVerifier,
    engine: MockAntiCheatEngine,
    events: RecordingEvents,
}

impl Node {
    fn new(user: &str, policy: VerifierPolicy) -> Self {
        Self::with_config(user, policy, TransportConfig::default())
    }

    fn with_config(user: &str, policy: VerifierPolicy, config: TransportConfig) -> Self {
        let verifier = MockIdentityVerifier::new(policy);
        let engine = MockAntiCheatEngine::new();
        let events = RecordingEvents::new();
        let transport = PeerTransport::new(
            config,
            RegistrationInfo::new(ClientPlatform::Windows, user, format!("{user}-jwt")),
            Box::new(verifier.clone()),
            Box::new(engine.clone()),
            Box::new(events.clone()),
        )
        .unwrap();
        Self {
            transport,
            verifier,
            engine,
            events,
        }
    }

    fn listen(&mut self) -> u16 {
        self.transport.start_listening(0).unwrap()
    }

    fn connect(&mut self, port: u16) -> PeerHandle {
        self.transport.connect_to_peer("127.0.0.1", port).unwrap()
    }

    /// Handle of the admitted peer with this identity.
    fn admitted_handle(&self, user: &str) -> PeerHandle {
        self.engine
            .admitted()
            .into_iter()
            .find(|request| request.product_user_id == user)
            .map(|request| request.handle)
            .unwrap()
    }

    fn saw(&self, event: &TransportEvent) -> bool {
        self.events.events().contains(event)
    }
}

/// Ticks every node until `done` holds or the deadline passes.
fn pump(nodes: &mut [&mut Node], mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        for node in nodes.iter_mut() {
            node.transport.tick();
        }
        if done() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// A few more ticks, so that anything that should NOT happen gets a chance to.
fn settle(nodes: &mut [&mut Node]) {
    for _ in 0..10 {
        for node in nodes.iter_mut() {
            node.transport.tick();
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn registration_bytes(user: &str) -> Vec<u8> {
    encode_frame(&Frame::RegistrationInfo(RegistrationInfo::new(
        ClientPlatform::Linux,
        user,
        "raw-jwt",
    )))
    .unwrap()
}

// ============================================================================
// SCENARIO A: ADMISSION
// ============================================================================

#[test]
fn test_connecting_peers_admit_each_other_once() {
    let mut a = Node::new("peer-a", VerifierPolicy::AcceptAll);
    let mut b = Node::new("peer-b", VerifierPolicy::AcceptAll);

    let port = b.listen();
    let b_on_a = a.connect(port);
    assert!(a.saw(&TransportEvent::PeerConnected {
        handle: b_on_a,
        role: ConnectionRole::Outgoing
    }));

    let (a_engine, b_engine) = (a.engine.clone(), b.engine.clone());
    assert!(pump(&mut [&mut a, &mut b], || {
        a_engine.admitted().len() == 1 && b_engine.admitted().len() == 1
    }));
    settle(&mut [&mut a, &mut b]);

    // B admitted A exactly once, on the incoming connection.
    let admitted = b.engine.admitted();
    assert_eq!(admitted.len(), 1);
    let a_on_b = admitted[0].handle;
    assert_eq!(b.transport.connected_peers(), vec![a_on_b]);
    assert_eq!(b.transport.peer_role(a_on_b), Some(ConnectionRole::Incoming));
    assert_eq!(admitted[0].product_user_id, "peer-a");
    assert_eq!(admitted[0].client_type, ClientType::ProtectedClient);
    assert_eq!(admitted[0].platform, ClientPlatform::Windows);
    assert_eq!(admitted[0].auth_timeout, Duration::from_secs(120));
    assert_eq!(admitted[0].ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));

    // B verified A's own token.
    let requests = b.verifier.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].identity_token, "peer-a-jwt");

    assert!(b.saw(&TransportEvent::PeerPendingRegistration {
        handle: a_on_b,
        product_user_id: "peer-a".into()
    }));
    assert!(matches!(
        b.transport.peer_state(a_on_b),
        Some(PeerState::Registered { product_user_id }) if product_user_id == "peer-a"
    ));

    // And the other direction.
    assert_eq!(a.admitted_handle("peer-b"), b_on_a);
    assert!(b.transport.pending_registrations().is_empty());
}

#[test]
fn test_opaque_traffic_after_admission() {
    let mut a = Node::new("peer-a", VerifierPolicy::AcceptAll);
    let mut b = Node::new("peer-b", VerifierPolicy::AcceptAll);
    let port = b.listen();
    let b_on_a = a.connect(port);

    let b_engine = b.engine.clone();
    assert!(pump(&mut [&mut a, &mut b], || b_engine.admitted().len() == 1));
    let a_on_b = b.admitted_handle("peer-a");

    a.transport.send_opaque(b_on_a, b"engine-payload").unwrap();
    assert!(pump(&mut [&mut a, &mut b], || !b_engine.messages().is_empty()));

    assert_eq!(b.engine.messages(), vec![(a_on_b, b"engine-payload".to_vec())]);
    assert!(b.saw(&TransportEvent::OpaqueMessage {
        handle: a_on_b,
        payload: b"engine-payload".to_vec()
    }));
}

// ============================================================================
// SCENARIO B: ENGINE EVICTS ONE PEER
// ============================================================================

#[test]
fn test_remove_peer_closes_only_that_connection() {
    let mut a = Node::new("peer-a", VerifierPolicy::AcceptAll);
    let mut b = Node::new("peer-b", VerifierPolicy::AcceptAll);
    let mut c = Node::new("peer-c", VerifierPolicy::AcceptAll);

    let port = b.listen();
    let b_on_a = a.connect(port);
    let b_on_c = c.connect(port);

    let b_engine = b.engine.clone();
    assert!(pump(&mut [&mut a, &mut b, &mut c], || b_engine.admitted().len() == 2));
    let a_on_b = b.admitted_handle("peer-a");
    let c_on_b = b.admitted_handle("peer-c");

    b.transport
        .directive_sender()
        .send(EngineDirective::RemovePeer {
            target: PeerTarget::Remote(a_on_b),
            reason: "integrity violation".into(),
        })
        .unwrap();

    let a_events = a.events.clone();
    assert!(pump(&mut [&mut a, &mut b, &mut c], || {
        a_events
            .events()
            .contains(&TransportEvent::PeerDisconnected { handle: b_on_a })
    }));
    settle(&mut [&mut a, &mut b, &mut c]);

    assert_eq!(b.transport.connected_peers(), vec![c_on_b]);
    assert_eq!(b.engine.evicted(), vec![a_on_b]);
    assert!(b.saw(&TransportEvent::PeerDisconnected { handle: a_on_b }));

    // C is untouched.
    assert_eq!(c.transport.connected_peers(), vec![b_on_c]);
    assert!(!c.saw(&TransportEvent::PeerDisconnected { handle: b_on_c }));
    assert!(c.transport.send_opaque(b_on_c, b"still here").is_ok());
}

// ============================================================================
// SCENARIO C: LOCAL USER KICKED
// ============================================================================

#[test]
fn test_remove_local_raises_kicked_and_closes_nothing() {
    let mut a = Node::new("peer-a", VerifierPolicy::AcceptAll);
    let mut b = Node::new("peer-b", VerifierPolicy::AcceptAll);
    let port = b.listen();
    a.connect(port);

    let b_engine = b.engine.clone();
    assert!(pump(&mut [&mut a, &mut b], || b_engine.admitted().len() == 1));

    b.transport
        .directive_sender()
        .send(EngineDirective::RemovePeer {
            target: PeerTarget::Local,
            reason: "banned".into(),
        })
        .unwrap();

    let b_events = b.events.clone();
    assert!(pump(&mut [&mut a, &mut b], || {
        b_events.events().contains(&TransportEvent::Kicked {
            reason: "banned".into()
        })
    }));
    settle(&mut [&mut a, &mut b]);

    assert_eq!(b.transport.connected_peers().len(), 1);
    assert_eq!(a.transport.connected_peers().len(), 1);
    assert!(b.engine.evicted().is_empty());
    assert!(b.transport.is_listening());
}

// ============================================================================
// SCENARIO D: MALFORMED REGISTRATION
// ============================================================================

#[test]
fn test_malformed_registration_keeps_connection_open() {
    let mut b = Node::new("peer-b", VerifierPolicy::Deferred);
    let port = b.listen();

    let mut raw = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let b_events = b.events.clone();
    assert!(pump(&mut [&mut b], || {
        b_events
            .events()
            .iter()
            .any(|event| matches!(event, TransportEvent::PeerConnected { .. }))
    }));

    // Missing final NUL.
    raw.write_all(&[2, 4, 0, 0, 0, 3, b'a', 0, b'x']).unwrap();

    let mut errors = 0;
    for _ in 0..400 {
        b.transport.tick();
        errors = b.transport.stats().protocol_errors;
        if errors > 0 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(errors, 1);

    let raw_on_b = b.transport.connected_peers();
    assert_eq!(raw_on_b.len(), 1);
    assert_eq!(b.transport.peer_state(raw_on_b[0]), Some(&PeerState::Unseen));
    assert!(b.transport.pending_registrations().is_empty());
    assert!(b.verifier.requests().is_empty());

    // The stream is still usable for a valid registration.
    raw.write_all(&registration_bytes("raw-peer")).unwrap();
    assert!(pump(&mut [&mut b], || {
        b_events.events().iter().any(|event| {
            matches!(event, TransportEvent::PeerPendingRegistration { product_user_id, .. }
                if product_user_id == "raw-peer")
        })
    }));
    assert_eq!(b.transport.pending_registrations().len(), 1);
    assert_eq!(b.verifier.deferred_count(), 1);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[test]
fn test_disconnect_cancels_pending_verification() {
    let mut a = Node::new("peer-a", VerifierPolicy::AcceptAll);
    let mut b = Node::new("peer-b", VerifierPolicy::Deferred);
    let port = b.listen();
    let b_on_a = a.connect(port);

    let b_verifier = b.verifier.clone();
    assert!(pump(&mut [&mut a, &mut b], || b_verifier.deferred_count() == 1));
    assert_eq!(b.transport.pending_registrations().len(), 1);

    a.transport.disconnect(b_on_a).unwrap();
    let b_events = b.events.clone();
    assert!(pump(&mut [&mut a, &mut b], || {
        b_events
            .events()
            .iter()
            .any(|event| matches!(event, TransportEvent::PeerDisconnected { .. }))
    }));
    assert!(b.transport.pending_registrations().is_empty());

    // The verifier answers late.
    assert!(b.verifier.resolve("peer-a", VerificationVerdict::Verified));
    settle(&mut [&mut a, &mut b]);

    assert!(b.engine.admitted().is_empty());
    assert!(b.engine.evicted().is_empty());
}

// ============================================================================
// FRAGMENTATION
// ============================================================================

fn send_split_registration(config: TransportConfig) -> Node {
    let mut b = Node::with_config("peer-b", VerifierPolicy::Deferred, config);
    let port = b.listen();
    let mut raw = TcpStream::connect(("127.0.0.1", port)).unwrap();
    raw.set_nodelay(true).unwrap();

    let bytes = registration_bytes("split-peer");
    let (head, tail) = bytes.split_at(bytes.len() - 3);

    raw.write_all(head).unwrap();
    let head_len = head.len() as u64;
    let mut received = 0;
    for _ in 0..400 {
        b.transport.tick();
        received = b.transport.stats().bytes_received;
        if received >= head_len {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(received, head_len);

    raw.write_all(tail).unwrap();
    let target = head_len + tail.len() as u64;
    for _ in 0..400 {
        b.transport.tick();
        if b.transport.stats().bytes_received >= target {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    settle(&mut [&mut b]);
    b
}

#[test]
fn test_split_frame_reassembled_by_default() {
    let b = send_split_registration(TransportConfig::default());

    assert_eq!(b.transport.stats().protocol_errors, 0);
    let pending = b.transport.pending_registrations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].product_user_id, "split-peer");
    assert_eq!(pending[0].platform, ClientPlatform::Linux);
}

#[test]
fn test_split_frame_dropped_under_discard_policy() {
    let config = TransportConfig {
        framing_policy: FramingPolicy::DiscardPartial,
        ..TransportConfig::default()
    };
    let b = send_split_registration(config);

    // Truncated frame, then a tail too short for a header.
    assert_eq!(b.transport.stats().protocol_errors, 2);
    assert!(b.transport.pending_registrations().is_empty());
    assert_eq!(b.transport.connected_peers().len(), 1);
}

// ============================================================================
// LISTENER
// ============================================================================

#[test]
fn test_second_listen_is_refused() {
    let mut b = Node::new("peer-b", VerifierPolicy::AcceptAll);
    let port = b.listen();

    assert!(b.transport.start_listening(0).is_err());
    assert_eq!(b.transport.local_port(), Some(port));

    // Another transport in the same process cannot take the port either.
    let mut other = Node::new("peer-x", VerifierPolicy::AcceptAll);
    assert!(other.transport.start_listening(port).is_err());

    b.transport.disconnect_all();
    assert!(!b.transport.is_listening());
    assert_eq!(other.transport.start_listening(port).unwrap(), port);
}
