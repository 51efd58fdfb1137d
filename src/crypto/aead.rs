//! AEAD encryption for WireGuard
//!
//! ChaCha20-Poly1305 with the WireGuard nonce layout. The allocating variants
//! serve the handshake; the in-place variants serve transport data so the
//! channel can reuse one staging buffer per packet.

use chacha20poly1305::{
    aead::{Aead, AeadInPlace, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce, Tag,
};

use crate::error::CryptoError;

/// Authentication tag length
pub const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305 key length
pub const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 12;

/// Build nonce: 4 zero bytes + 8 bytes counter (little-endian)
fn nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce_bytes
}

/// Encrypt plaintext, returning ciphertext || tag
pub fn seal(
    key: &[u8; KEY_LEN],
    counter: u64,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = nonce(counter);

    cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Verification)
}

/// Decrypt ciphertext || tag
pub fn open(
    key: &[u8; KEY_LEN],
    counter: u64,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Verification);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = nonce(counter);

    cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Verification)
}

/// Encrypt `buffer` in place (no AAD) and return the detached tag
pub fn seal_in_place(
    key: &[u8; KEY_LEN],
    counter: u64,
    buffer: &mut [u8],
) -> Result<[u8; TAG_LEN], CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = nonce(counter);

    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), &[], buffer)
        .map_err(|_| CryptoError::Verification)?;
    Ok(tag.into())
}

/// Decrypt `buffer` in place (no AAD) against a detached tag
///
/// On failure the buffer contents are unspecified and must be discarded.
pub fn open_in_place(
    key: &[u8; KEY_LEN],
    counter: u64,
    buffer: &mut [u8],
    tag: &[u8; TAG_LEN],
) -> Result<(), CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes = nonce(counter);

    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&nonce_bytes),
            &[],
            buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::Verification)
}
