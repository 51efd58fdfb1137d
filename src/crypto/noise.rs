//! Noise IKpsk2 symmetric state for WireGuard
//!
//! Implements the hash/chaining-key bookkeeping of the pattern
//! Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s. Message layout and DH ordering live
//! in `protocol::handshake`.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{aead, blake2s};
use crate::error::CryptoError;

/// Noise protocol construction string
pub const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";

/// WireGuard identifier string
pub const IDENTIFIER: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";

/// Label for MAC1 key derivation
pub const LABEL_MAC1: &[u8] = b"mac1----";

/// Hash length (also chaining key length)
pub const HASH_LEN: usize = 32;

/// Running (chaining key, hash) pair of an in-progress handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricState {
    /// Chaining key for key derivation
    pub chaining_key: [u8; HASH_LEN],
    /// Hash accumulator
    pub hash: [u8; HASH_LEN],
}

impl SymmetricState {
    /// Initialize the chaining key from the construction string
    pub fn initial_chain_key() -> [u8; HASH_LEN] {
        blake2s::hash(CONSTRUCTION)
    }

    /// Initialize the hash chain with the responder's static public key
    ///
    /// h = HASH(HASH(HASH(CONSTRUCTION) || IDENTIFIER) || responder_static_public)
    pub fn initial_hash(responder_static: &[u8; 32]) -> [u8; HASH_LEN] {
        let ck = Self::initial_chain_key();
        let h1 = blake2s::hash_two(&ck, IDENTIFIER);
        blake2s::hash_two(&h1, responder_static)
    }

    /// Start a handshake keyed to the responder's static public key
    ///
    /// Both roles call this with the *responder's* key: the initiator with
    /// its peer's, the responder with its own.
    pub fn new(responder_static: &[u8; 32]) -> Self {
        Self {
            chaining_key: Self::initial_chain_key(),
            hash: Self::initial_hash(responder_static),
        }
    }

    /// MixHash: h = HASH(h || data)
    pub fn mix_hash(&mut self, data: &[u8]) {
        self.hash = blake2s::hash_two(&self.hash, data);
    }

    /// Mix an ephemeral public key into both the hash and the chaining key
    ///
    /// h = HASH(h || e), ck = KDF1(ck, e)
    pub fn mix_ephemeral(&mut self, ephemeral_public: &[u8; 32]) {
        self.mix_hash(ephemeral_public);
        self.chaining_key = blake2s::kdf1(&self.chaining_key, ephemeral_public);
    }

    /// MixKey: (ck, k) = KDF2(ck, input_key_material)
    ///
    /// Updates chaining_key and returns the derived key
    pub fn mix_key(&mut self, input: &[u8]) -> [u8; 32] {
        let (new_ck, key) = blake2s::kdf2(&self.chaining_key, input);
        self.chaining_key = new_ck;
        key
    }

    /// MixKeyAndHash: (ck, temp_h, k) = KDF3(ck, psk)
    ///
    /// Updates chaining_key, mixes temp_h into hash, and returns the derived key.
    pub fn mix_key_and_hash(&mut self, psk: &[u8; 32]) -> [u8; 32] {
        let (new_ck, mut temp_h, key) = blake2s::kdf3(&self.chaining_key, psk);
        self.chaining_key = new_ck;
        self.mix_hash(&temp_h);
        temp_h.zeroize();
        key
    }

    /// EncryptAndHash: c = AEAD(k, 0, plaintext, h); h = HASH(h || c)
    pub fn encrypt_and_hash(
        &mut self,
        key: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = aead::seal(key, 0, plaintext, &self.hash)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// DecryptAndHash: p = AEAD-Open(k, 0, c, h); h = HASH(h || c)
    ///
    /// The hash is left untouched when authentication fails.
    pub fn decrypt_and_hash(
        &mut self,
        key: &[u8; 32],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let plaintext = aead::open(key, 0, ciphertext, &self.hash)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derive the transport keys, consuming the handshake state
    pub fn split(self, is_initiator: bool) -> TransportKeys {
        if is_initiator {
            TransportKeys::derive_initiator(&self.chaining_key)
        } else {
            TransportKeys::derive_responder(&self.chaining_key)
        }
    }
}

/// Transport keys derived from a completed handshake
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TransportKeys {
    pub sending_key: [u8; 32],
    pub receiving_key: [u8; 32],
}

impl TransportKeys {
    /// (initiator_send, initiator_recv) = KDF2(ck, "")
    pub fn derive_initiator(chaining_key: &[u8; 32]) -> Self {
        let (t_send, t_recv) = blake2s::kdf2(chaining_key, &[]);
        Self {
            sending_key: t_send,
            receiving_key: t_recv,
        }
    }

    /// Derive transport keys for responder (keys are swapped)
    pub fn derive_responder(chaining_key: &[u8; 32]) -> Self {
        let (t_recv, t_send) = blake2s::kdf2(chaining_key, &[]);
        Self {
            sending_key: t_send,
            receiving_key: t_recv,
        }
    }
}

/// Compute the MAC1 key for messages addressed to `receiver_public`
///
/// mac1_key = HASH(LABEL_MAC1 || receiver_public)
pub fn mac1_key(receiver_public: &[u8; 32]) -> [u8; 32] {
    blake2s::hash_two(LABEL_MAC1, receiver_public)
}
