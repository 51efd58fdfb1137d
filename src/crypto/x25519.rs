//! X25519 Diffie-Hellman key exchange for WireGuard
//!
//! Provides key generation and DH operations using Curve25519. Randomness is
//! always supplied by the caller so hosts without an OS RNG can plug in their
//! own generator.

use rand::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Key length for X25519 (both private and public keys are 32 bytes)
pub const KEY_LEN: usize = 32;

/// Apply the X25519 scalar clamping to a private key
pub fn clamp(mut private_key: [u8; KEY_LEN]) -> [u8; KEY_LEN] {
    private_key[0] &= 248;
    private_key[31] &= 127;
    private_key[31] |= 64;
    private_key
}

/// Build a secret from raw bytes, storing the clamped form
pub fn secret_from_bytes(private_key: &[u8; KEY_LEN]) -> StaticSecret {
    let mut clamped = clamp(*private_key);
    let secret = StaticSecret::from(clamped);
    clamped.zeroize();
    secret
}

/// Generate a new X25519 keypair
///
/// Returns (private_key, public_key)
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (StaticSecret, [u8; KEY_LEN]) {
    let mut bytes = [0u8; KEY_LEN];
    rng.fill_bytes(&mut bytes);
    let secret = secret_from_bytes(&bytes);
    bytes.zeroize();

    let public = public_key(&secret);
    (secret, public)
}

/// Derive public key from private key
pub fn public_key(private_key: &StaticSecret) -> [u8; KEY_LEN] {
    PublicKey::from(private_key).to_bytes()
}

/// Perform X25519 Diffie-Hellman key exchange
///
/// A result of all zeros means the peer supplied a low-order point; that
/// exchange contributes nothing secret and is rejected.
pub fn dh(
    private_key: &StaticSecret,
    public_key: &[u8; KEY_LEN],
) -> Result<SharedSecret, CryptoError> {
    let shared = private_key.diffie_hellman(&PublicKey::from(*public_key));
    if !shared.was_contributory() {
        return Err(CryptoError::Verification);
    }
    Ok(shared)
}

/// Check if a public key is usable as a long-term peer key
pub fn is_valid_public_key(key: &[u8; KEY_LEN]) -> bool {
    !key.iter().all(|&b| b == 0)
}
