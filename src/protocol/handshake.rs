//! WireGuard handshake implementation
//!
//! Implements the Noise IKpsk2 handshake pattern for key exchange, for both
//! the initiator and the responder side of a single peer.
//!
//! ```text
//! Uninitialized --create_initiation--> InitiationSent --consume_response--> Established
//! Uninitialized --consume_initiation/create_response--> ResponseSent --first data--> Established
//! ```

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tai64::Tai64N;
use x25519_dalek::StaticSecret;
use zeroize::Zeroize;

use crate::crypto::noise::{self, SymmetricState, TransportKeys};
use crate::crypto::timestamp::{self, TimestampGenerator, TIMESTAMP_LEN};
use crate::crypto::x25519;
use crate::error::{CryptoError, ProtocolError, WgChanError};
use crate::identity::Identity;
use crate::protocol::messages::{HandshakeInitiation, HandshakeResponse};

/// An initiation we sent and are waiting to hear back about
pub struct InitiationSent {
    /// Index the response must be addressed to
    pub local_index: u32,
    ephemeral_private: StaticSecret,
    pub ephemeral_public: [u8; 32],
    noise: SymmetricState,
    /// When the current attempt (first transmission) started
    pub started_at: Duration,
    /// Scheduled retransmission time
    pub next_retry_at: Duration,
    /// Number of retransmissions so far
    pub retries: u32,
}

/// An authenticated initiation from the peer, not yet answered
pub struct InitiationReceived {
    pub remote_index: u32,
    pub remote_ephemeral: [u8; 32],
    pub timestamp: [u8; TIMESTAMP_LEN],
    noise: SymmetricState,
}

/// Keys and indices produced by a completed handshake
pub struct SessionKeys {
    pub local_index: u32,
    pub remote_index: u32,
    pub keys: TransportKeys,
}

/// Resting handshake phase of a channel
///
/// `InitiationReceived` and a consumed response are only ever transient
/// values inside one `handle_incoming` call, so they are not stored here.
pub enum HandshakeState {
    Uninitialized,
    InitiationSent(InitiationSent),
    /// Answered an initiation; the session waits for its first packet
    ResponseSent {
        local_index: u32,
        started_at: Duration,
    },
    Established,
}

/// Copyable view of [`HandshakeState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Uninitialized,
    InitiationSent,
    ResponseSent,
    Established,
}

impl HandshakeState {
    pub fn phase(&self) -> HandshakePhase {
        match self {
            Self::Uninitialized => HandshakePhase::Uninitialized,
            Self::InitiationSent(_) => HandshakePhase::InitiationSent,
            Self::ResponseSent { .. } => HandshakePhase::ResponseSent,
            Self::Established => HandshakePhase::Established,
        }
    }

    /// Local index claimed by an unfinished handshake, if any
    pub fn pending_index(&self) -> Option<u32> {
        match self {
            Self::InitiationSent(sent) => Some(sent.local_index),
            Self::ResponseSent { local_index, .. } => Some(*local_index),
            _ => None,
        }
    }
}

/// Long-term handshake material for one (identity, peer) pair
pub struct Handshaker {
    identity: Arc<Identity>,
    peer_static: [u8; 32],
    psk: [u8; 32],
    /// DH(our static, peer static), fixed for the channel's lifetime
    static_static: [u8; 32],
    /// MAC1 key for messages we send (keyed to the peer)
    mac1_key_peer: [u8; 32],
    /// MAC1 key for messages addressed to us
    mac1_key_local: [u8; 32],
    last_timestamp_received: Option<[u8; TIMESTAMP_LEN]>,
    timestamps: TimestampGenerator,
}

impl Handshaker {
    /// Precompute everything that only depends on the two static keys
    pub fn new(
        identity: Arc<Identity>,
        peer_static: [u8; 32],
        psk: Option<[u8; 32]>,
    ) -> Result<Self, WgChanError> {
        let static_static = x25519::dh(identity.secret(), &peer_static)
            .map_err(|_| CryptoError::WeakPublicKey)?;

        Ok(Self {
            peer_static,
            psk: psk.unwrap_or([0u8; 32]),
            static_static: *static_static.as_bytes(),
            mac1_key_peer: noise::mac1_key(&peer_static),
            mac1_key_local: noise::mac1_key(identity.public_key()),
            last_timestamp_received: None,
            timestamps: TimestampGenerator::new(),
            identity,
        })
    }

    /// Peer's static public key
    pub fn peer_static(&self) -> &[u8; 32] {
        &self.peer_static
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Build a fresh initiation with a new ephemeral key
    ///
    /// Returns the pending state together with the 148-byte datagram.
    pub fn create_initiation<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        now_tai: Tai64N,
        local_index: u32,
        now: Duration,
    ) -> Result<(InitiationSent, [u8; HandshakeInitiation::SIZE]), WgChanError> {
        let mut noise = SymmetricState::new(&self.peer_static);

        // e
        let (ephemeral_private, ephemeral_public) = x25519::generate_keypair(rng);
        noise.mix_ephemeral(&ephemeral_public);

        // es
        let shared_es = x25519::dh(&ephemeral_private, &self.peer_static)?;
        let mut key = noise.mix_key(shared_es.as_bytes());

        // s
        let encrypted_static: [u8; 48] = noise
            .encrypt_and_hash(&key, self.identity.public_key())?
            .try_into()
            .map_err(|_| CryptoError::Verification)?;

        // ss
        key = noise.mix_key(&self.static_static);

        // {t}
        let ts = self.timestamps.next(now_tai);
        let encrypted_timestamp: [u8; 28] = noise
            .encrypt_and_hash(&key, &ts)?
            .try_into()
            .map_err(|_| CryptoError::Verification)?;
        key.zeroize();

        let mut msg = HandshakeInitiation::new(
            local_index,
            ephemeral_public,
            encrypted_static,
            encrypted_timestamp,
        );
        let bytes = msg.seal(&self.mac1_key_peer);

        tracing::debug!(
            "Created initiation {} with ephemeral {}",
            local_index,
            BASE64.encode(&ephemeral_public[..8])
        );

        Ok((
            InitiationSent {
                local_index,
                ephemeral_private,
                ephemeral_public,
                noise,
                started_at: now,
                next_retry_at: now,
                retries: 0,
            },
            bytes,
        ))
    }

    /// Authenticate and decrypt an initiation addressed to us
    ///
    /// Does not record the timestamp; call [`Handshaker::accept_timestamp`]
    /// once the initiation is actually answered.
    pub fn consume_initiation(&self, bytes: &[u8]) -> Result<InitiationReceived, WgChanError> {
        let msg = HandshakeInitiation::from_bytes(bytes)?;
        crate::protocol::messages::verify_mac1(
            bytes,
            HandshakeInitiation::MAC1_OFFSET,
            &self.mac1_key_local,
        )?;

        let mut noise = SymmetricState::new(self.identity.public_key());

        // e
        noise.mix_ephemeral(&msg.ephemeral_public);

        // es
        let shared_es = x25519::dh(self.identity.secret(), &msg.ephemeral_public)?;
        let mut key = noise.mix_key(shared_es.as_bytes());

        // s
        let mut peer_static = noise.decrypt_and_hash(&key, &msg.encrypted_static)?;
        let pinned: bool = peer_static.as_slice().ct_eq(&self.peer_static[..]).into();
        peer_static.zeroize();
        if !pinned {
            return Err(ProtocolError::UnknownPeer.into());
        }

        // ss
        key = noise.mix_key(&self.static_static);

        // {t}
        let ts = noise.decrypt_and_hash(&key, &msg.encrypted_timestamp)?;
        key.zeroize();
        if !timestamp::is_valid(&ts) {
            return Err(CryptoError::Verification.into());
        }
        let mut timestamp = [0u8; TIMESTAMP_LEN];
        timestamp.copy_from_slice(&ts);

        if !timestamp::is_newer(&timestamp, self.last_timestamp_received.as_ref()) {
            return Err(ProtocolError::StaleTimestamp.into());
        }

        Ok(InitiationReceived {
            remote_index: msg.sender_index,
            remote_ephemeral: msg.ephemeral_public,
            timestamp,
            noise,
        })
    }

    /// Remember an answered initiation's timestamp so it cannot be replayed
    pub fn accept_timestamp(&mut self, timestamp: [u8; TIMESTAMP_LEN]) {
        self.last_timestamp_received = Some(timestamp);
    }

    /// Answer a consumed initiation
    ///
    /// Returns the responder's session keys and the 92-byte datagram.
    pub fn create_response<R: RngCore + CryptoRng>(
        &self,
        received: InitiationReceived,
        rng: &mut R,
        local_index: u32,
    ) -> Result<(SessionKeys, [u8; HandshakeResponse::SIZE]), WgChanError> {
        let InitiationReceived {
            remote_index,
            remote_ephemeral,
            mut noise,
            ..
        } = received;

        // e
        let (ephemeral_private, ephemeral_public) = x25519::generate_keypair(rng);
        noise.mix_ephemeral(&ephemeral_public);

        // ee
        let shared_ee = x25519::dh(&ephemeral_private, &remote_ephemeral)?;
        noise.mix_key(shared_ee.as_bytes());

        // se
        let shared_se = x25519::dh(&ephemeral_private, &self.peer_static)?;
        noise.mix_key(shared_se.as_bytes());

        // psk
        let mut key = noise.mix_key_and_hash(&self.psk);

        // {}
        let encrypted_nothing: [u8; 16] = noise
            .encrypt_and_hash(&key, &[])?
            .try_into()
            .map_err(|_| CryptoError::Verification)?;
        key.zeroize();

        let mut msg = HandshakeResponse::new(
            local_index,
            remote_index,
            ephemeral_public,
            encrypted_nothing,
        );
        let bytes = msg.seal(&self.mac1_key_peer);

        tracing::debug!(
            "Created response {} -> {} with ephemeral {}",
            local_index,
            remote_index,
            BASE64.encode(&ephemeral_public[..8])
        );

        Ok((
            SessionKeys {
                local_index,
                remote_index,
                keys: noise.split(false),
            },
            bytes,
        ))
    }

    /// Process the peer's response to our pending initiation
    ///
    /// `pending` is left untouched on failure so a forged response cannot
    /// disturb the handshake in flight.
    pub fn consume_response(
        &self,
        pending: &InitiationSent,
        bytes: &[u8],
    ) -> Result<SessionKeys, WgChanError> {
        let msg = HandshakeResponse::from_bytes(bytes)?;
        if msg.receiver_index != pending.local_index {
            return Err(ProtocolError::UnknownReceiverIndex {
                index: msg.receiver_index,
            }
            .into());
        }
        crate::protocol::messages::verify_mac1(
            bytes,
            HandshakeResponse::MAC1_OFFSET,
            &self.mac1_key_local,
        )?;

        let mut noise = pending.noise.clone();

        // e
        noise.mix_ephemeral(&msg.ephemeral_public);

        // ee
        let shared_ee = x25519::dh(&pending.ephemeral_private, &msg.ephemeral_public)?;
        noise.mix_key(shared_ee.as_bytes());

        // se
        let shared_se = x25519::dh(self.identity.secret(), &msg.ephemeral_public)?;
        noise.mix_key(shared_se.as_bytes());

        // psk
        let mut key = noise.mix_key_and_hash(&self.psk);

        // {}
        let decrypted = noise.decrypt_and_hash(&key, &msg.encrypted_nothing);
        key.zeroize();
        decrypted?;

        tracing::debug!(
            "Consumed response {} -> {}",
            msg.sender_index,
            pending.local_index
        );

        Ok(SessionKeys {
            local_index: pending.local_index,
            remote_index: msg.sender_index,
            keys: noise.split(true),
        })
    }
}

impl Drop for Handshaker {
    fn drop(&mut self) {
        self.psk.zeroize();
        self.static_static.zeroize();
    }
}
