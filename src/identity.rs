//! Long-term static identity of a channel endpoint
//!
//! An identity is created once and shared by reference with every channel
//! that speaks for it. The private scalar is stored clamped and is wiped when
//! the last reference drops.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{CryptoRng, RngCore};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::crypto::x25519;

/// Static X25519 keypair
pub struct Identity {
    private: StaticSecret,
    public: [u8; 32],
}

impl Identity {
    /// Generate a fresh keypair from the supplied CSPRNG
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let (private, public) = x25519::generate_keypair(rng);
        tracing::debug!("Generated identity {}", BASE64.encode(&public[..8]));
        Self { private, public }
    }

    /// Load an identity from a raw private key (clamped on the way in)
    pub fn from_private_bytes(private_key: &[u8; 32]) -> Self {
        let private = x25519::secret_from_bytes(private_key);
        let public = x25519::public_key(&private);
        Self { private, public }
    }

    /// Our static public key
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// Clamped private key bytes, for export (e.g. `wgchan genkey`)
    pub fn private_key_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.private.to_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.private
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public", &BASE64.encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Create a new identity, filling a fresh keypair from the host RNG
pub fn create_id<R: RngCore + CryptoRng>(rng: &mut R) -> Identity {
    Identity::generate(rng)
}
