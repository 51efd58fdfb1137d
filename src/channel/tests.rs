use rand::rngs::StdRng;
use rand::SeedableRng;

use super::*;
use crate::loopback::{pump, settle, LoopbackHost, ManualClock};
use crate::protocol::messages::HandshakeInitiation;
use crate::protocol::transport::REKEY_AFTER_MESSAGES;

type TestChannel = Channel<LoopbackHost>;

fn pair_with(
    start_ms: u32,
    tweak_a: impl FnOnce(&mut ChannelConfig),
    tweak_b: impl FnOnce(&mut ChannelConfig),
) -> (ManualClock, TestChannel, TestChannel) {
    let mut rng = StdRng::seed_from_u64(7);
    let alice = Arc::new(Identity::generate(&mut rng));
    let bob = Arc::new(Identity::generate(&mut rng));
    let clock = ManualClock::new(start_ms);

    let mut a_config = ChannelConfig::new(*bob.public_key());
    tweak_a(&mut a_config);
    let mut b_config = ChannelConfig::new(*alice.public_key());
    tweak_b(&mut b_config);

    let mut a = Channel::new(alice, a_config, LoopbackHost::new(clock.clone(), 1)).unwrap();
    let mut b = Channel::new(bob, b_config, LoopbackHost::new(clock.clone(), 2)).unwrap();
    a.init().unwrap();
    b.init().unwrap();
    (clock, a, b)
}

fn pair() -> (ManualClock, TestChannel, TestChannel) {
    pair_with(0, |_| {}, |_| {})
}

/// A connects, B accepts, A sends "hello" so both sides are established
fn establish(a: &mut TestChannel, b: &mut TestChannel) {
    b.accept().unwrap();
    a.connect().unwrap();
    assert_eq!(pump(a, b).unwrap(), 1);
    assert_eq!(pump(b, a).unwrap(), 1);
    assert_eq!(a.state(), ChannelState::Established);

    a.send(b"hello").unwrap();
    assert_eq!(pump(a, b).unwrap(), 1);
    assert_eq!(b.state(), ChannelState::Established);
}

fn ephemeral_of(datagram: &[u8]) -> [u8; 32] {
    assert_eq!(datagram.len(), HandshakeInitiation::SIZE);
    datagram[8..40].try_into().unwrap()
}

#[test]
fn test_handshake_and_data_exchange() {
    let (_clock, mut a, mut b) = pair();
    assert_eq!(a.state(), ChannelState::Initialized);

    b.accept().unwrap();
    assert_eq!(b.state(), ChannelState::Listening);

    a.connect().unwrap();
    assert_eq!(a.state(), ChannelState::Connecting);
    assert_eq!(a.ops().outbox.len(), 1);

    pump(&mut a, &mut b).unwrap();
    assert_eq!(b.handshake_phase(), HandshakePhase::ResponseSent);
    assert_eq!(b.state(), ChannelState::Listening);

    pump(&mut b, &mut a).unwrap();
    assert_eq!(a.state(), ChannelState::Established);

    let written = a.send(b"ping").unwrap();
    assert_eq!(written, TransportHeader::MIN_SIZE + 4);
    pump(&mut a, &mut b).unwrap();
    assert_eq!(b.ops().delivered, vec![b"ping".to_vec()]);
    assert_eq!(b.state(), ChannelState::Established);

    b.send(b"pong").unwrap();
    pump(&mut b, &mut a).unwrap();
    assert_eq!(a.ops().delivered, vec![b"pong".to_vec()]);

    let (sa, sb) = (a.sessions().current().unwrap(), b.sessions().current().unwrap());
    assert_eq!(sa.remote_index, sb.local_index);
    assert_eq!(sb.remote_index, sa.local_index);
    assert!(sa.is_initiator);
    assert!(!sb.is_initiator);

    // Each side asked the host about its peer exactly once
    assert_eq!(a.ops().peer_checks, 1);
    assert_eq!(b.ops().peer_checks, 1);
}

#[test]
fn test_replayed_packet_delivered_once() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);

    a.send(b"once").unwrap();
    let packet = a.ops_mut().outbox.pop_front().unwrap();

    b.handle_incoming(&packet).unwrap();
    b.handle_incoming(&packet).unwrap();
    assert_eq!(b.ops().delivered.len(), 2);
    assert_eq!(b.ops().delivered[1], b"once");
}

#[test]
fn test_reordered_packets_accepted() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);

    for payload in [b"one", b"two", b"six"] {
        a.send(payload).unwrap();
    }
    let packets: Vec<_> = a.ops_mut().outbox.drain(..).collect();

    for i in [2, 0, 1] {
        b.handle_incoming(&packets[i]).unwrap();
    }
    assert_eq!(
        b.ops().delivered[1..],
        [b"six".to_vec(), b"one".to_vec(), b"two".to_vec()]
    );
}

#[test]
fn test_tampered_packet_dropped() {
    let (_clock, mut a, mut b) = pair();
    b.accept().unwrap();
    a.connect().unwrap();
    pump(&mut a, &mut b).unwrap();
    pump(&mut b, &mut a).unwrap();

    a.send(b"confirm").unwrap();
    let packet = a.ops_mut().outbox.pop_front().unwrap();
    let mut forged = packet.clone();
    forged[TransportHeader::SIZE] ^= 0x01;

    // Forgery neither delivers nor confirms the pending session
    b.handle_incoming(&forged).unwrap();
    assert!(b.ops().delivered.is_empty());
    assert_eq!(b.handshake_phase(), HandshakePhase::ResponseSent);
    assert!(b.sessions().current().is_none());

    b.handle_incoming(&packet).unwrap();
    assert_eq!(b.ops().delivered, vec![b"confirm".to_vec()]);
    assert_eq!(b.state(), ChannelState::Established);
}

#[test]
fn test_handshake_retry_across_clock_wrap() {
    let (clock, mut a, mut b) = pair_with(u32::MAX - 1_000, |_| {}, |_| {});
    b.accept().unwrap();
    a.connect().unwrap();

    let first = a.ops_mut().outbox.pop_front().unwrap();
    let mut ephemerals = vec![ephemeral_of(&first)];

    let wait = a.ops().last_timeout().unwrap();
    assert!((5_000..=5_334).contains(&wait));

    let mut elapsed = 0u64;
    let mut failure = None;
    for _ in 0..40 {
        let wait = a.ops().last_timeout().unwrap();
        clock.advance(wait);
        elapsed += wait as u64;

        match a.trigger_timeout() {
            Ok(()) => {
                let retry = a.ops_mut().outbox.pop_front().unwrap();
                ephemerals.push(ephemeral_of(&retry));
                assert_eq!(a.state(), ChannelState::Connecting);
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    assert!(matches!(
        failure,
        Some(WgChanError::Protocol(ProtocolError::HandshakeTimeout { seconds: 90 }))
    ));
    assert_eq!(elapsed, 90_000);
    assert!(ephemerals.len() > 10);
    for (i, e) in ephemerals.iter().enumerate() {
        assert!(!ephemerals[i + 1..].contains(e), "ephemeral reused");
    }

    assert_eq!(a.state(), ChannelState::Closed);
    assert_eq!(a.handshake_phase(), HandshakePhase::Uninitialized);
    assert!(b.ops().outbox.is_empty());
}

#[test]
fn test_retransmitted_initiation_completes() {
    let (clock, mut a, mut b) = pair();
    b.accept().unwrap();
    a.connect().unwrap();
    a.ops_mut().outbox.clear();

    clock.advance(a.ops().last_timeout().unwrap());
    a.trigger_timeout().unwrap();
    settle(&mut a, &mut b).unwrap();
    assert_eq!(a.state(), ChannelState::Established);
}

#[test]
fn test_unanswered_response_abandoned_after_attempt_time() {
    let (clock, mut a, mut b) = pair();
    b.accept().unwrap();
    a.connect().unwrap();
    pump(&mut a, &mut b).unwrap();

    // Response lost on the way back
    b.ops_mut().outbox.clear();
    assert_eq!(b.handshake_phase(), HandshakePhase::ResponseSent);
    assert!(b.sessions().next().is_some());
    assert_eq!(b.ops().last_timeout(), Some(90_000));

    clock.advance(89_999);
    b.trigger_timeout().unwrap();
    assert_eq!(b.handshake_phase(), HandshakePhase::ResponseSent);

    clock.advance(1);
    b.trigger_timeout().unwrap();
    assert_eq!(b.handshake_phase(), HandshakePhase::Uninitialized);
    assert!(b.sessions().is_empty());
    assert_eq!(b.state(), ChannelState::Listening);
    assert!(b.ops().outbox.is_empty());

    // Still answers a fresh attempt
    a.reset();
    a.init().unwrap();
    a.connect().unwrap();
    settle(&mut a, &mut b).unwrap();
    assert_eq!(a.state(), ChannelState::Established);
    a.send(b"late").unwrap();
    pump(&mut a, &mut b).unwrap();
    assert_eq!(b.state(), ChannelState::Established);
    assert_eq!(b.ops().delivered, vec![b"late".to_vec()]);
}

#[test]
fn test_responder_rekey_timeout_keeps_current_session() {
    let (clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);
    let current = b.sessions().current().unwrap().local_index;

    // B answers a rekey, but the confirmation never arrives
    a.sessions_mut()
        .current_mut()
        .unwrap()
        .set_send_counter(REKEY_AFTER_MESSAGES - 1);
    a.send(b"x").unwrap();
    assert_eq!(a.state(), ChannelState::Rekeying);
    pump(&mut a, &mut b).unwrap();
    b.ops_mut().outbox.clear();
    assert_eq!(b.handshake_phase(), HandshakePhase::ResponseSent);
    assert!(b.sessions().next().is_some());

    clock.advance(90_000);
    b.trigger_timeout().unwrap();
    assert!(b.sessions().next().is_none());
    assert_eq!(b.handshake_phase(), HandshakePhase::Established);
    assert_eq!(b.sessions().current().unwrap().local_index, current);
}

#[test]
fn test_rekey_after_messages_keeps_old_session_readable() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);
    let old_index = a.sessions().current().unwrap().local_index;

    a.sessions_mut()
        .current_mut()
        .unwrap()
        .set_send_counter(REKEY_AFTER_MESSAGES - 1);
    a.send(b"x").unwrap();
    assert_eq!(a.state(), ChannelState::Rekeying);

    // Still encrypted under the old session, delayed in flight
    a.send(b"y").unwrap();
    let late = a.ops_mut().outbox.pop_back().unwrap();
    assert_eq!(a.ops().outbox.len(), 2);

    settle(&mut a, &mut b).unwrap();
    assert_eq!(a.state(), ChannelState::Established);
    assert_ne!(a.sessions().current().unwrap().local_index, old_index);
    assert_eq!(a.sessions().previous().unwrap().local_index, old_index);

    a.send(b"z").unwrap();
    pump(&mut a, &mut b).unwrap();
    assert!(b.sessions().previous().is_some());

    b.handle_incoming(&late).unwrap();
    assert_eq!(
        b.ops().delivered,
        vec![
            b"hello".to_vec(),
            b"x".to_vec(),
            b"z".to_vec(),
            b"y".to_vec()
        ]
    );
}

#[test]
fn test_rekey_after_time() {
    let (clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);
    let old_index = a.sessions().current().unwrap().local_index;
    assert_eq!(a.ops().last_timeout(), Some(120_000));

    clock.advance(120_000);
    a.trigger_timeout().unwrap();
    assert_eq!(a.state(), ChannelState::Rekeying);

    settle(&mut a, &mut b).unwrap();
    assert_eq!(a.state(), ChannelState::Established);
    assert_ne!(a.sessions().current().unwrap().local_index, old_index);

    a.send(b"fresh").unwrap();
    pump(&mut a, &mut b).unwrap();
    assert_eq!(
        a.sessions().current().unwrap().remote_index,
        b.sessions().current().unwrap().local_index
    );
    assert_eq!(b.ops().delivered.last().unwrap(), b"fresh");
}

#[test]
fn test_peer_rejected_by_responder() {
    let (clock, mut a, mut b) = pair();
    b.ops_mut().accept_peer = false;
    b.accept().unwrap();
    a.connect().unwrap();

    let mut failure = None;
    for _ in 0..40 {
        pump(&mut a, &mut b).unwrap();
        assert!(b.ops().outbox.is_empty());
        assert_eq!(b.handshake_phase(), HandshakePhase::Uninitialized);
        assert!(b.sessions().is_empty());

        clock.advance(a.ops().last_timeout().unwrap());
        if let Err(e) = a.trigger_timeout() {
            failure = Some(e);
            break;
        }
    }

    assert!(matches!(
        failure,
        Some(WgChanError::Protocol(ProtocolError::HandshakeTimeout { .. }))
    ));
    assert!(b.ops().peer_checks > 1);
    assert!(a.sessions().is_empty());
}

#[test]
fn test_peer_rejected_by_initiator() {
    let (_clock, mut a, mut b) = pair();
    a.ops_mut().accept_peer = false;
    b.accept().unwrap();
    a.connect().unwrap();
    settle(&mut a, &mut b).unwrap();

    assert_eq!(a.ops().peer_checks, 1);
    assert!(a.sessions().current().is_none());
    assert_eq!(a.state(), ChannelState::Connecting);
    assert!(matches!(
        a.send(b"nope"),
        Err(WgChanError::Channel(ChannelError::WrongState { .. }))
    ));
}

#[test]
fn test_lifecycle_errors() {
    let (_clock, mut a, _b) = pair();
    assert!(matches!(
        a.init(),
        Err(WgChanError::Channel(ChannelError::AlreadyInitialized))
    ));
    assert!(matches!(
        a.send(b"early"),
        Err(WgChanError::Channel(ChannelError::WrongState {
            operation: "send",
            state: "initialized"
        }))
    ));

    a.connect().unwrap();
    assert!(matches!(
        a.connect(),
        Err(WgChanError::Channel(ChannelError::WrongState { .. }))
    ));
    assert!(matches!(
        a.accept(),
        Err(WgChanError::Channel(ChannelError::WrongState { .. }))
    ));

    let oversized = vec![0u8; MAX_PAYLOAD + 1];
    assert!(matches!(
        a.send(&oversized),
        Err(WgChanError::Channel(ChannelError::InvalidArgument { .. }))
    ));
}

#[test]
fn test_uninitialized_channel() {
    let mut rng = StdRng::seed_from_u64(1);
    let me = Arc::new(Identity::generate(&mut rng));
    let peer = Identity::generate(&mut rng);
    let host = LoopbackHost::new(ManualClock::new(0), 3);
    let mut channel = Channel::new(me, ChannelConfig::new(*peer.public_key()), host).unwrap();

    assert_eq!(channel.state(), ChannelState::Created);
    for result in [
        channel.connect(),
        channel.accept(),
        channel.handle_incoming(&[4; 32]),
        channel.trigger_timeout(),
    ] {
        assert!(matches!(
            result,
            Err(WgChanError::Channel(ChannelError::NotInitialized))
        ));
    }
    assert!(channel.send(b"x").is_err());
    assert_eq!(channel.ops().init_calls, 0);
}

#[test]
fn test_zero_peer_key_rejected() {
    let mut rng = StdRng::seed_from_u64(1);
    let me = Arc::new(Identity::generate(&mut rng));
    let host = LoopbackHost::new(ManualClock::new(0), 3);
    assert!(matches!(
        Channel::new(me, ChannelConfig::new([0u8; 32]), host),
        Err(WgChanError::Channel(ChannelError::InvalidArgument { .. }))
    ));
}

#[test]
fn test_initiation_ignored_unless_accepting() {
    let (_clock, mut a, mut b) = pair();
    a.connect().unwrap();
    pump(&mut a, &mut b).unwrap();

    assert!(b.ops().outbox.is_empty());
    assert_eq!(b.ops().peer_checks, 0);
    assert_eq!(b.handshake_phase(), HandshakePhase::Uninitialized);
}

#[test]
fn test_simultaneous_connect() {
    let (_clock, mut a, mut b) = pair();
    a.connect().unwrap();
    b.connect().unwrap();
    settle(&mut a, &mut b).unwrap();

    let a_has = a.sessions().current().is_some();
    let b_has = b.sessions().current().is_some();
    assert!(a_has ^ b_has, "exactly one side completes as initiator");

    let (sender, receiver) = if a_has { (&mut a, &mut b) } else { (&mut b, &mut a) };
    assert_eq!(receiver.state(), ChannelState::Connecting);
    sender.send(b"tie").unwrap();
    pump(sender, receiver).unwrap();

    assert_eq!(a.state(), ChannelState::Established);
    assert_eq!(b.state(), ChannelState::Established);
    assert_eq!(
        a.sessions().current().unwrap().remote_index,
        b.sessions().current().unwrap().local_index
    );
}

#[test]
fn test_single_timeout_discipline() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);
    let calls = a.ops().timeouts.len();

    let mut junk_init = vec![1u8; HandshakeInitiation::SIZE];
    junk_init[1..4].fill(0);
    for junk in [&[][..], &[0xff][..], &[4u8; 40][..], &[2u8; 10][..], &junk_init[..]] {
        a.handle_incoming(junk).unwrap();
    }
    assert_eq!(a.ops().timeouts.len(), calls);
    assert!(a.ops().delivered.is_empty());

    // A spurious wake-up re-arms the same deadline exactly once
    a.trigger_timeout().unwrap();
    assert_eq!(a.ops().timeouts.len(), calls + 1);
    assert_eq!(a.ops().last_timeout(), Some(120_000));
    assert!(a.ops().outbox.is_empty());
}

#[test]
fn test_keepalive_after_receive() {
    let (clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);
    assert_eq!(b.ops().last_timeout(), Some(10_000));

    clock.advance(10_000);
    b.trigger_timeout().unwrap();
    let keepalive = b.ops().outbox.front().unwrap().clone();
    assert_eq!(keepalive.len(), TransportHeader::MIN_SIZE);

    pump(&mut b, &mut a).unwrap();
    assert_eq!(a.ops().delivered, vec![Vec::<u8>::new()]);

    // Nothing left to answer
    assert_eq!(b.ops().last_timeout(), Some(170_000));
}

#[test]
fn test_initiator_keepalive_confirms_session() {
    let (clock, mut a, mut b) = pair();
    b.accept().unwrap();
    a.connect().unwrap();
    settle(&mut a, &mut b).unwrap();
    assert_eq!(b.state(), ChannelState::Listening);
    assert_eq!(a.ops().last_timeout(), Some(10_000));

    clock.advance(10_000);
    a.trigger_timeout().unwrap();
    pump(&mut a, &mut b).unwrap();

    assert_eq!(b.state(), ChannelState::Established);
    assert_eq!(b.ops().delivered, vec![Vec::<u8>::new()]);
}

#[test]
fn test_persistent_keepalive() {
    let (clock, mut a, mut b) = pair_with(0, |c| c.persistent_keepalive = Some(25), |_| {});
    establish(&mut a, &mut b);
    assert_eq!(a.ops().last_timeout(), Some(25_000));

    clock.advance(25_000);
    a.trigger_timeout().unwrap();
    assert_eq!(a.ops().outbox.len(), 1);
    pump(&mut a, &mut b).unwrap();
    assert_eq!(b.ops().delivered.last().unwrap(), &Vec::<u8>::new());
    assert_eq!(a.ops().last_timeout(), Some(25_000));
}

#[test]
fn test_session_expiry_closes_channel() {
    let (clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);
    a.send(b"queued").unwrap();
    let stale = a.ops_mut().outbox.pop_front().unwrap();

    clock.advance(180_000);
    assert!(matches!(
        a.send(b"late"),
        Err(WgChanError::Protocol(ProtocolError::SessionExpired))
    ));
    assert_eq!(a.state(), ChannelState::Closed);
    assert!(a.sessions().is_empty());

    // The receiver drops traffic for its expired session too
    b.handle_incoming(&stale).unwrap();
    assert_eq!(b.ops().delivered.len(), 1);
    assert!(b.sessions().is_empty());

    // A closed channel can connect again
    a.connect().unwrap();
    settle(&mut a, &mut b).unwrap();
    assert_eq!(a.state(), ChannelState::Established);
}

#[test]
fn test_reset_and_reconnect() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);

    a.reset();
    assert_eq!(a.state(), ChannelState::Created);
    assert!(a.sessions().is_empty());
    assert!(a.buffer.is_empty());
    assert!(matches!(
        a.send(b"gone"),
        Err(WgChanError::Channel(ChannelError::NotInitialized))
    ));

    a.init().unwrap();
    assert_eq!(a.ops().init_calls, 2);
    a.connect().unwrap();
    settle(&mut a, &mut b).unwrap();
    assert_eq!(a.state(), ChannelState::Established);

    a.send(b"again").unwrap();
    pump(&mut a, &mut b).unwrap();
    assert_eq!(b.ops().delivered.last().unwrap(), b"again");
}

#[test]
fn test_staging_buffer_wiped_after_delivery() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);
    assert!(b.buffer.is_empty());
}

#[test]
fn test_host_send_failure() {
    let (clock, mut a, mut b) = pair();
    b.accept().unwrap();
    a.ops_mut().fail_sends = true;

    assert!(matches!(a.connect(), Err(WgChanError::Host(_))));
    assert_eq!(a.handshake_phase(), HandshakePhase::InitiationSent);

    // The attempt stays armed and retries once the host recovers
    a.ops_mut().fail_sends = false;
    clock.advance(a.ops().last_timeout().unwrap());
    a.trigger_timeout().unwrap();
    assert_eq!(a.ops().outbox.len(), 1);

    b.ops_mut().fail_sends = true;
    let initiation = a.ops_mut().outbox.pop_front().unwrap();
    assert!(matches!(
        b.handle_incoming(&initiation),
        Err(WgChanError::Host(_))
    ));
}

#[test]
fn test_cookie_reply_ignored() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);

    let mut cookie = [0u8; CookieReply::SIZE];
    cookie[0] = 3;
    a.handle_incoming(&cookie).unwrap();
    assert_eq!(a.state(), ChannelState::Established);
    assert!(a.ops().outbox.is_empty());
}

#[test]
fn test_padded_payloads() {
    let (_clock, mut a, mut b) =
        pair_with(0, |c| c.pad_payloads = true, |c| c.pad_payloads = true);
    establish(&mut a, &mut b);

    let delivered = &b.ops().delivered[0];
    assert_eq!(delivered.len(), 16);
    assert_eq!(&delivered[..5], b"hello");

    assert_eq!(a.send(b"abc").unwrap(), TransportHeader::MIN_SIZE + 16);
}

#[test]
fn test_preshared_key() {
    let psk = Some([7u8; 32]);
    let (_clock, mut a, mut b) =
        pair_with(0, |c| c.preshared_key = psk, |c| c.preshared_key = psk);
    establish(&mut a, &mut b);
}

#[test]
fn test_preshared_key_mismatch() {
    let (_clock, mut a, mut b) = pair_with(0, |c| c.preshared_key = Some([7u8; 32]), |_| {});
    b.accept().unwrap();
    a.connect().unwrap();
    settle(&mut a, &mut b).unwrap();

    assert_eq!(a.state(), ChannelState::Connecting);
    assert!(a.sessions().is_empty());
}

#[test]
fn test_config_helpers() {
    let mut config = ChannelConfig::new([9u8; 32]);
    assert_eq!(config.effective_psk(), None);
    config.preshared_key = Some([0u8; 32]);
    assert_eq!(config.effective_psk(), None);
    config.preshared_key = Some([1u8; 32]);
    assert_eq!(config.effective_psk(), Some([1u8; 32]));

    config.persistent_keepalive = Some(0);
    assert_eq!(config.persistent_keepalive_interval(), None);
    config.persistent_keepalive = Some(15);
    assert_eq!(
        config.persistent_keepalive_interval(),
        Some(Duration::from_secs(15))
    );

    let debug = format!("{:?}", config);
    assert!(debug.contains("(hidden)"));
    assert!(!debug.contains("[1, 1"));
}

#[test]
fn test_empty_payload_then_echo() {
    let (_clock, mut a, mut b) = pair();
    b.accept().unwrap();
    a.connect().unwrap();
    pump(&mut a, &mut b).unwrap();
    pump(&mut b, &mut a).unwrap();

    a.send(b"").unwrap();
    pump(&mut a, &mut b).unwrap();
    assert_eq!(b.ops().delivered, vec![Vec::<u8>::new()]);
    assert_eq!(a.state(), ChannelState::Established);
    assert_eq!(b.state(), ChannelState::Established);

    assert_eq!(a.send(b"hello").unwrap(), 16 + 16 + 5);
    pump(&mut a, &mut b).unwrap();

    let echoed = b.ops().delivered.last().unwrap().to_ascii_uppercase();
    assert_eq!(b.send(&echoed).unwrap(), 16 + 16 + 5);
    pump(&mut b, &mut a).unwrap();
    assert_eq!(a.ops().delivered, vec![b"HELLO".to_vec()]);
}

#[test]
fn test_transport_keys_mirror_and_counters_advance() {
    let (_clock, mut a, mut b) = pair();
    establish(&mut a, &mut b);

    let (ka, kb) = (
        a.sessions().current().unwrap().keys(),
        b.sessions().current().unwrap().keys(),
    );
    assert_eq!(ka.sending_key, kb.receiving_key);
    assert_eq!(ka.receiving_key, kb.sending_key);
    assert_ne!(ka.sending_key, ka.receiving_key);

    assert_eq!(a.sessions().current().unwrap().send_counter(), 1);
    for expected in 2..5 {
        a.send(b"tick").unwrap();
        assert_eq!(a.sessions().current().unwrap().send_counter(), expected);
    }
}
