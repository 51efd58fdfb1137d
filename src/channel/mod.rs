//! Single-peer WireGuard channel
//!
//! A [`Channel`] performs the Noise IKpsk2 handshake with one configured peer,
//! keeps its transport sessions and encrypts/decrypts application payloads.
//! All I/O, time and scheduling go through the host's [`ChannelOps`]
//! implementation, which the channel owns.
//!
//! # Calling discipline
//!
//! A channel is driven from one context at a time. Its methods never run
//! concurrently with each other, and the host callbacks `send` and
//! `handle_decrypted` must not call back into `send` or `handle_incoming` of
//! the same channel (the borrow checker enforces this for hosts that do not
//! smuggle the channel through interior mutability).
//!
//! The host keeps exactly one pending timer: every `set_timeout` call
//! replaces the previous one, and when it fires the host calls
//! [`Channel::trigger_timeout`].

mod timers;

#[cfg(test)]
mod tests;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{CryptoRng, Rng, RngCore};
use tai64::Tai64N;
use zeroize::Zeroize;

use crate::crypto::x25519;
use crate::error::{ChannelError, ProtocolError, Result, WgChanError};
use crate::identity::Identity;
use crate::protocol::handshake::{HandshakePhase, HandshakeState, Handshaker};
use crate::protocol::messages::{get_message_type, CookieReply, MessageType, TransportHeader};
use crate::protocol::session::{
    Session, SessionManager, Slot, KEEPALIVE_TIMEOUT, REKEY_ON_RECEIVE_AGE, REKEY_TIMEOUT,
    REKEY_TIMEOUT_JITTER_MAX_MS,
};
use crate::protocol::transport::MAX_PAYLOAD;

pub use timers::Clock;
use timers::Timers;

/// Host operations a channel calls out to
///
/// The implementing value doubles as the host context. It is owned by the
/// channel and reachable through [`Channel::ops`] / [`Channel::ops_mut`].
pub trait ChannelOps {
    /// Cryptographically secure generator for ephemerals, indices and jitter
    type Rng: RngCore + CryptoRng;

    /// Prepare I/O bindings; called once from [`Channel::init`]
    fn init(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Emit one encrypted datagram, returning the bytes written
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize>;

    /// Deliver a decrypted payload (empty for keepalives)
    fn handle_decrypted(&mut self, payload: &[u8]) -> io::Result<usize>;

    /// Monotonic milliseconds; wraparound is tolerated
    fn get_time_ms(&self) -> u32;

    /// Request a single wake-up `timeout_ms` from now, replacing any earlier one
    fn set_timeout(&mut self, timeout_ms: u32);

    /// Authorize the peer's static key before a session is installed
    fn check_peer_id(&mut self, peer_public: &[u8; 32]) -> bool;

    /// Randomness for ephemeral keys, session indices and retry jitter
    fn rng(&mut self) -> &mut Self::Rng;

    /// Current TAI64N time for handshake initiations
    fn timestamp(&mut self) -> Tai64N {
        Tai64N::now()
    }
}

/// Per-channel peer settings
#[derive(Clone)]
pub struct ChannelConfig {
    /// Expected static public key of the peer
    pub peer_public: [u8; 32],
    /// Optional preshared key; all zeros means none
    pub preshared_key: Option<[u8; 32]>,
    /// Send a keepalive whenever nothing was sent for this many seconds
    pub persistent_keepalive: Option<u16>,
    /// Zero-pad payloads to a multiple of 16 bytes before sealing
    pub pad_payloads: bool,
}

impl ChannelConfig {
    pub fn new(peer_public: [u8; 32]) -> Self {
        Self {
            peer_public,
            preshared_key: None,
            persistent_keepalive: None,
            pad_payloads: false,
        }
    }

    /// Preshared key to mix in, with the all-zero key treated as absent
    pub fn effective_psk(&self) -> Option<[u8; 32]> {
        self.preshared_key.filter(|psk| psk.iter().any(|&b| b != 0))
    }

    /// Persistent keepalive interval, if enabled (0 disables)
    pub fn persistent_keepalive_interval(&self) -> Option<Duration> {
        self.persistent_keepalive
            .filter(|&secs| secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("peer_public", &BASE64.encode(self.peer_public))
            .field("preshared_key", &self.effective_psk().map(|_| "(hidden)"))
            .field("persistent_keepalive", &self.persistent_keepalive)
            .field("pad_payloads", &self.pad_payloads)
            .finish()
    }
}

impl Drop for ChannelConfig {
    fn drop(&mut self) {
        if let Some(psk) = self.preshared_key.as_mut() {
            psk.zeroize();
        }
    }
}

/// Externally visible lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed, `init` not yet called
    Created,
    /// Initialized, neither connecting nor listening
    Initialized,
    /// Handshake in progress, no session yet
    Connecting,
    /// Waiting for the peer to initiate
    Listening,
    /// A confirmed session is available for sending
    Established,
    /// Established, with a replacement handshake in flight
    Rekeying,
    /// The last session expired or the handshake gave up
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Established => "established",
            Self::Rekeying => "rekeying",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the host asked the channel to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Connect,
    Listen,
}

/// WireGuard endpoint for exactly one peer
pub struct Channel<O: ChannelOps> {
    ops: O,
    config: ChannelConfig,
    handshaker: Handshaker,
    handshake: HandshakeState,
    sessions: SessionManager,
    timers: Timers,
    initialized: bool,
    mode: Mode,
    closed: bool,
    /// The last usable session hit a reject-after limit
    session_expired: bool,
    /// Staging buffer reused for every transport packet
    buffer: Vec<u8>,
}

impl<O: ChannelOps> Channel<O> {
    /// Create a channel for `identity` talking to `config.peer_public`
    ///
    /// `identity` may be shared by any number of channels.
    pub fn new(identity: Arc<Identity>, config: ChannelConfig, ops: O) -> Result<Self> {
        if !x25519::is_valid_public_key(&config.peer_public) {
            return Err(ChannelError::InvalidArgument {
                reason: "peer public key is all zeros".to_string(),
            }
            .into());
        }
        let handshaker = Handshaker::new(identity, config.peer_public, config.effective_psk())?;

        Ok(Self {
            ops,
            config,
            handshaker,
            handshake: HandshakeState::Uninitialized,
            sessions: SessionManager::new(),
            timers: Timers::default(),
            initialized: false,
            mode: Mode::Idle,
            closed: false,
            session_expired: false,
            buffer: Vec::with_capacity(TransportHeader::MIN_SIZE + MAX_PAYLOAD),
        })
    }

    /// Let the host prepare its bindings and start the channel clock
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(ChannelError::AlreadyInitialized.into());
        }
        self.ops.init()?;
        self.timers = Timers::new(Clock::new(self.ops.get_time_ms()));
        self.initialized = true;

        tracing::debug!(
            "Channel initialized for peer {}",
            BASE64.encode(&self.config.peer_public[..8])
        );
        Ok(())
    }

    /// Wipe all handshake and session state and return to `Created`
    ///
    /// The replay guard on received initiation timestamps survives a reset.
    pub fn reset(&mut self) {
        self.handshake = HandshakeState::Uninitialized;
        self.sessions.clear();
        self.buffer.zeroize();
        self.timers = Timers::default();
        self.initialized = false;
        self.mode = Mode::Idle;
        self.closed = false;
        self.session_expired = false;
        tracing::debug!("Channel reset");
    }

    /// Start a handshake with the peer
    ///
    /// If the host fails to send the initiation the error is returned, but
    /// the attempt stays armed and is retried on the next timeout.
    pub fn connect(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        if self.handshake.phase() != HandshakePhase::Uninitialized {
            return Err(self.wrong_state("connect"));
        }

        let now = self.now();
        self.mode = Mode::Connect;
        self.closed = false;
        tracing::info!(
            "Connecting to peer {}",
            BASE64.encode(&self.config.peer_public[..8])
        );

        let result = self.begin_handshake(now, None);
        self.reschedule(now);
        result
    }

    /// Arm the channel to answer the peer's next valid initiation
    pub fn accept(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        if self.handshake.phase() != HandshakePhase::Uninitialized {
            return Err(self.wrong_state("accept"));
        }

        self.mode = Mode::Listen;
        self.closed = false;
        tracing::info!(
            "Listening for peer {}",
            BASE64.encode(&self.config.peer_public[..8])
        );
        Ok(())
    }

    /// Encrypt `payload` and emit it through `ChannelOps::send`
    ///
    /// Returns the byte count reported by the host.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize> {
        self.ensure_initialized()?;
        if payload.len() > MAX_PAYLOAD {
            return Err(ChannelError::InvalidArgument {
                reason: format!(
                    "payload of {} bytes exceeds {} bytes",
                    payload.len(),
                    MAX_PAYLOAD
                ),
            }
            .into());
        }

        let now = self.now();
        self.expire_sessions(now);
        let result = self.send_transport(payload, now);
        self.reschedule(now);
        result
    }

    /// Process one datagram received from the peer
    ///
    /// Malformed, unauthenticated, replayed and unexpected datagrams are
    /// dropped without touching any state. Only host I/O failures and calls
    /// on an uninitialized channel are reported.
    pub fn handle_incoming(&mut self, datagram: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        let now = self.now();
        self.expire_sessions(now);

        let result = match get_message_type(datagram) {
            Ok(MessageType::HandshakeInitiation) => self.on_initiation(datagram, now),
            Ok(MessageType::HandshakeResponse) => self.on_response(datagram, now),
            Ok(MessageType::CookieReply) => self.on_cookie_reply(datagram),
            Ok(MessageType::TransportData) => self.on_transport(datagram, now),
            Err(err) => Err(err.into()),
        };
        self.reschedule(now);

        match result {
            Err(WgChanError::Host(err)) => Err(WgChanError::Host(err)),
            Err(err) => {
                tracing::trace!("Dropped {}-byte datagram: {}", datagram.len(), err);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        if !self.initialized {
            return ChannelState::Created;
        }
        let established = self.sessions.current().is_some();
        match (&self.handshake, established) {
            (HandshakeState::InitiationSent(_), true) => ChannelState::Rekeying,
            (_, true) => ChannelState::Established,
            (HandshakeState::InitiationSent(_), false) => ChannelState::Connecting,
            (HandshakeState::ResponseSent { .. }, false) if self.mode == Mode::Connect => {
                ChannelState::Connecting
            }
            (HandshakeState::ResponseSent { .. }, false) => ChannelState::Listening,
            _ if self.closed => ChannelState::Closed,
            _ if self.mode == Mode::Listen => ChannelState::Listening,
            _ => ChannelState::Initialized,
        }
    }

    /// Current handshake phase
    pub fn handshake_phase(&self) -> HandshakePhase {
        self.handshake.phase()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<Identity> {
        self.handshaker.identity()
    }

    /// The host operations / context
    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut O {
        &mut self.ops
    }

    #[cfg(test)]
    pub(crate) fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[cfg(test)]
    pub(crate) fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ChannelError::NotInitialized.into())
        }
    }

    fn wrong_state(&self, operation: &'static str) -> WgChanError {
        ChannelError::WrongState {
            operation,
            state: self.state().as_str(),
        }
        .into()
    }

    fn now(&mut self) -> Duration {
        let raw = self.ops.get_time_ms();
        self.timers.clock.advance(raw)
    }

    /// Draw a local index that no live session or pending handshake uses
    fn allocate_index(&mut self) -> u32 {
        loop {
            let index = self.ops.rng().next_u32();
            if !self.sessions.contains_index(index) && self.handshake.pending_index() != Some(index)
            {
                return index;
            }
        }
    }

    /// Emit a fresh initiation
    ///
    /// `attempt` carries (started_at, retries) when this is a retransmission
    /// of an ongoing attempt.
    fn begin_handshake(&mut self, now: Duration, attempt: Option<(Duration, u32)>) -> Result<()> {
        let local_index = self.allocate_index();
        let now_tai = self.ops.timestamp();
        let (mut sent, datagram) =
            self.handshaker
                .create_initiation(self.ops.rng(), now_tai, local_index, now)?;

        if let Some((started_at, retries)) = attempt {
            sent.started_at = started_at;
            sent.retries = retries;
        }
        let jitter = self.ops.rng().gen_range(0..=REKEY_TIMEOUT_JITTER_MAX_MS);
        sent.next_retry_at = now + REKEY_TIMEOUT + Duration::from_millis(jitter);

        self.handshake = HandshakeState::InitiationSent(sent);
        self.ops.send(&datagram)?;
        Ok(())
    }

    fn rekey_in_background(&mut self, now: Duration) {
        if matches!(self.handshake, HandshakeState::InitiationSent(_)) {
            return;
        }
        tracing::info!("Session needs rekey, initiating new handshake...");
        if let Err(e) = self.begin_handshake(now, None) {
            tracing::warn!("Rekey handshake failed: {}", e);
        }
    }

    fn send_transport(&mut self, payload: &[u8], now: Duration) -> Result<usize> {
        if self.sessions.current().is_none() {
            return Err(if self.session_expired {
                ProtocolError::SessionExpired.into()
            } else {
                self.wrong_state("send")
            });
        }

        let pad = self.config.pad_payloads;
        let Some(session) = self.sessions.current_mut() else {
            return Err(ProtocolError::SessionExpired.into());
        };
        if let Err(err) = session.encrypt(payload, pad, now, &mut self.buffer) {
            if matches!(err, WgChanError::Protocol(ProtocolError::SessionExpired)) {
                self.session_expired = true;
            }
            return Err(err);
        }
        let rekey = session.needs_rekey(now);

        let written = self.ops.send(&self.buffer)?;
        self.timers.last_sent = Some(now);
        self.timers.keepalive_at = None;

        if rekey {
            self.rekey_in_background(now);
        }
        Ok(written)
    }

    /// Send an empty transport packet on the current session
    fn send_keepalive(&mut self, now: Duration) -> Result<()> {
        let pad = self.config.pad_payloads;
        let Some(session) = self.sessions.current_mut() else {
            return Ok(());
        };
        if let Err(err) = session.encrypt(&[], pad, now, &mut self.buffer) {
            tracing::debug!("Skipping keepalive: {}", err);
            return Ok(());
        }

        self.ops.send(&self.buffer)?;
        self.timers.last_sent = Some(now);
        self.timers.keepalive_at = None;
        tracing::trace!("Sent keepalive");
        Ok(())
    }

    /// Drop sessions past reject-after-time and fix up the handshake phase
    fn expire_sessions(&mut self, now: Duration) {
        let expired = self.sessions.expire(now);
        if expired.is_empty() {
            return;
        }

        if expired.contains(&Slot::Current) {
            self.session_expired = true;
            self.timers.keepalive_at = None;
        }
        let settled = match self.handshake {
            HandshakeState::Established if self.sessions.current().is_none() => true,
            HandshakeState::ResponseSent { .. } if self.sessions.next().is_none() => true,
            _ => false,
        };
        if settled {
            self.handshake = if self.sessions.current().is_some() {
                HandshakeState::Established
            } else {
                HandshakeState::Uninitialized
            };
        }

        if self.sessions.is_empty()
            && self.handshake.phase() == HandshakePhase::Uninitialized
            && self.mode == Mode::Connect
        {
            tracing::info!("Channel closed: no usable session left");
            self.mode = Mode::Idle;
            self.closed = true;
        }
    }

    fn on_initiation(&mut self, datagram: &[u8], now: Duration) -> Result<()> {
        if self.mode == Mode::Idle && self.sessions.is_empty() {
            return Err(self.wrong_state("answer an initiation"));
        }

        let received = self.handshaker.consume_initiation(datagram)?;

        if let HandshakeState::InitiationSent(pending) = &self.handshake {
            if pending.ephemeral_public > received.remote_ephemeral {
                tracing::debug!("Simultaneous initiation, keeping ours");
                return Ok(());
            }
        }

        let peer = *self.handshaker.peer_static();
        if !self.ops.check_peer_id(&peer) {
            tracing::warn!("Peer {} rejected by host", BASE64.encode(&peer[..8]));
            return Err(ProtocolError::PeerRejected.into());
        }

        self.handshaker.accept_timestamp(received.timestamp);
        let local_index = self.allocate_index();
        let (keys, response) =
            self.handshaker
                .create_response(received, self.ops.rng(), local_index)?;

        self.sessions.install_next(Session::new(
            keys.local_index,
            keys.remote_index,
            keys.keys,
            false,
            now,
        ));
        self.handshake = HandshakeState::ResponseSent {
            local_index,
            started_at: now,
        };
        self.closed = false;

        tracing::info!(
            "Answered initiation from peer {} (session {})",
            BASE64.encode(&peer[..8]),
            local_index
        );
        self.ops.send(&response)?;
        Ok(())
    }

    fn on_response(&mut self, datagram: &[u8], now: Duration) -> Result<()> {
        let HandshakeState::InitiationSent(pending) = &self.handshake else {
            return Err(self.wrong_state("accept a response"));
        };
        let keys = self.handshaker.consume_response(pending, datagram)?;

        let peer = *self.handshaker.peer_static();
        if !self.ops.check_peer_id(&peer) {
            // The attempt keeps running and ends in a handshake timeout
            tracing::warn!("Peer {} rejected by host", BASE64.encode(&peer[..8]));
            return Err(ProtocolError::PeerRejected.into());
        }

        let local_index = keys.local_index;
        self.sessions.install_current(Session::new(
            keys.local_index,
            keys.remote_index,
            keys.keys,
            true,
            now,
        ));
        self.handshake = HandshakeState::Established;
        self.closed = false;
        self.session_expired = false;
        // Confirms the session to the responder if the application stays quiet
        self.timers.keepalive_at = Some(now + KEEPALIVE_TIMEOUT);

        tracing::info!(
            "Session {} established with peer {}",
            local_index,
            BASE64.encode(&peer[..8])
        );
        Ok(())
    }

    fn on_cookie_reply(&mut self, datagram: &[u8]) -> Result<()> {
        let reply = CookieReply::from_bytes(datagram)?;
        tracing::debug!(
            "Ignoring cookie reply for session {}",
            reply.receiver_index
        );
        Ok(())
    }

    fn on_transport(&mut self, datagram: &[u8], now: Duration) -> Result<()> {
        let (header, sealed) = TransportHeader::parse(datagram)?;
        let (slot, session) = self.sessions.find_by_index(header.receiver_index).ok_or(
            ProtocolError::UnknownReceiverIndex {
                index: header.receiver_index,
            },
        )?;

        session.decrypt(header.counter, sealed, now, &mut self.buffer)?;
        let rekey = slot == Slot::Current
            && session.is_initiator
            && session.age(now) >= REKEY_ON_RECEIVE_AGE;

        if slot == Slot::Next {
            self.sessions.promote_next();
            if matches!(
                self.handshake,
                HandshakeState::ResponseSent { .. } | HandshakeState::Uninitialized
            ) {
                self.handshake = HandshakeState::Established;
            }
            self.closed = false;
            self.session_expired = false;
            tracing::info!("Session {} confirmed by peer", header.receiver_index);
        }

        if self.buffer.is_empty() {
            tracing::trace!("Received keepalive on session {}", header.receiver_index);
        } else {
            self.timers
                .keepalive_at
                .get_or_insert(now + KEEPALIVE_TIMEOUT);
        }

        if rekey {
            self.rekey_in_background(now);
        }

        let delivered = self.ops.handle_decrypted(&self.buffer);
        self.buffer.zeroize();
        delivered?;
        Ok(())
    }
}

impl<O: ChannelOps> fmt::Debug for Channel<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state())
            .field("handshake", &self.handshake.phase())
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
