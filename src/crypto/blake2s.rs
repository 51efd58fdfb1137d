//! BLAKE2s cryptographic primitives for WireGuard
//!
//! Implements BLAKE2s hash, keyed MAC, HMAC, and the HKDF construction used
//! by the Noise handshake.

use blake2::{
    digest::{consts::U16, generic_array::GenericArray, FixedOutput, Mac as MacTrait, Update},
    Blake2s256, Blake2sMac, Digest,
};
use hmac::SimpleHmac;

use crate::error::CryptoError;

/// Type alias for HMAC-BLAKE2s (RFC 2104 HMAC with BLAKE2s-256)
type HmacBlake2s = SimpleHmac<Blake2s256>;

/// Keyed BLAKE2s with a 16-byte output
type Blake2sMac128 = Blake2sMac<U16>;

/// Length of BLAKE2s-256 hash output
pub const HASH_LEN: usize = 32;

/// Length of BLAKE2s MAC output (16 bytes for WireGuard)
pub const MAC_LEN: usize = 16;

/// BLAKE2s-256 hash of a single input
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// BLAKE2s-256 hash of two concatenated inputs: HASH(a || b)
pub fn hash_two(a: &[u8], b: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    Digest::update(&mut hasher, a);
    Digest::update(&mut hasher, b);
    hasher.finalize().into()
}

/// BLAKE2s keyed MAC (16 bytes output) with 32-byte key
pub fn mac(key: &[u8; HASH_LEN], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = <Blake2sMac128 as MacTrait>::new(GenericArray::from_slice(key));
    MacTrait::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// Verify a 16-byte keyed MAC in constant time
pub fn verify_mac(key: &[u8; HASH_LEN], data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
    let mut mac = <Blake2sMac128 as MacTrait>::new(GenericArray::from_slice(key));
    MacTrait::update(&mut mac, data);
    mac.verify_slice(tag).map_err(|_| CryptoError::Verification)
}

/// HMAC-BLAKE2s using the standard RFC 2104 construction
///
/// WireGuard implementations use H((K ⊕ opad) || H((K ⊕ ipad) || M)) rather
/// than keyed BLAKE2s here.
pub fn hmac(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacBlake2s::new_from_slice(key).expect("HMAC accepts any key length");
    Update::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// HKDF over HMAC-BLAKE2s producing `N` chained 32-byte outputs
///
/// ```text
/// prk = HMAC(key, input)
/// T1  = HMAC(prk, 0x01)
/// Ti  = HMAC(prk, T(i-1) || i)
/// ```
pub fn hkdf<const N: usize>(key: &[u8; HASH_LEN], input: &[u8]) -> [[u8; HASH_LEN]; N] {
    debug_assert!((1..=3).contains(&N));

    let prk = hmac(key, input);
    let mut outputs = [[0u8; HASH_LEN]; N];
    let mut block = [0u8; HASH_LEN + 1];

    for (i, out) in outputs.iter_mut().enumerate() {
        let counter = (i + 1) as u8;
        *out = if i == 0 {
            hmac(&prk, &[counter])
        } else {
            block[HASH_LEN] = counter;
            hmac(&prk, &block)
        };
        block[..HASH_LEN].copy_from_slice(out);
    }

    outputs
}

/// KDF1: Single-output key derivation
pub fn kdf1(key: &[u8; HASH_LEN], input: &[u8]) -> [u8; HASH_LEN] {
    let [t1] = hkdf::<1>(key, input);
    t1
}

/// KDF2: Two-output key derivation
pub fn kdf2(key: &[u8; HASH_LEN], input: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    let [t1, t2] = hkdf::<2>(key, input);
    (t1, t2)
}

/// KDF3: Three-output key derivation
pub fn kdf3(
    key: &[u8; HASH_LEN],
    input: &[u8],
) -> ([u8; HASH_LEN], [u8; HASH_LEN], [u8; HASH_LEN]) {
    let [t1, t2, t3] = hkdf::<3>(key, input);
    (t1, t2, t3)
}
