//! Transport layer encryption for WireGuard
//!
//! Seals and opens type-4 data messages with ChaCha20-Poly1305 and tracks
//! received counters in a sliding replay window.

use std::fmt;

use crate::crypto::aead;
use crate::error::CryptoError;
use crate::protocol::messages::TransportHeader;

/// Start a new handshake once this many messages were sent on a session
pub const REKEY_AFTER_MESSAGES: u64 = 1 << 60;

/// Hard limit on messages per session
/// WireGuard whitepaper: REJECT_AFTER_MESSAGES = 2^64 - 2^13 - 1
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX - (1 << 13);

/// Largest application payload accepted by `send`
pub const MAX_PAYLOAD: usize = 65535;

/// Replay window size in packets
pub const REPLAY_WINDOW_SIZE: usize = 2048;

const WORDS: usize = REPLAY_WINDOW_SIZE / 64;

/// Round a payload length up to the next multiple of 16
pub fn padded_len(len: usize) -> usize {
    (len + 15) & !15
}

/// Build a complete transport message into `out`
///
/// `out` is cleared first and ends up holding
/// `header || ciphertext || tag`. With `pad`, the plaintext is zero-extended
/// to a 16-byte multiple before sealing.
pub fn seal_packet(
    key: &[u8; 32],
    counter: u64,
    receiver_index: u32,
    payload: &[u8],
    pad: bool,
    out: &mut Vec<u8>,
) -> Result<(), CryptoError> {
    let body_len = if pad {
        padded_len(payload.len())
    } else {
        payload.len()
    };

    out.clear();
    out.reserve(TransportHeader::MIN_SIZE + body_len);
    TransportHeader {
        receiver_index,
        counter,
    }
    .write_to(out);
    out.extend_from_slice(payload);
    out.resize(TransportHeader::SIZE + body_len, 0);

    let tag = aead::seal_in_place(key, counter, &mut out[TransportHeader::SIZE..])?;
    out.extend_from_slice(&tag);
    Ok(())
}

/// Decrypt `ciphertext || tag` into `out`
///
/// On failure `out` is cleared so no unauthenticated bytes linger.
pub fn open_packet(
    key: &[u8; 32],
    counter: u64,
    sealed: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), CryptoError> {
    if sealed.len() < aead::TAG_LEN {
        return Err(CryptoError::Verification);
    }
    let (body, tag) = sealed.split_at(sealed.len() - aead::TAG_LEN);
    let mut tag_bytes = [0u8; aead::TAG_LEN];
    tag_bytes.copy_from_slice(tag);

    out.clear();
    out.extend_from_slice(body);
    if let Err(err) = aead::open_in_place(key, counter, out, &tag_bytes) {
        out.clear();
        return Err(err);
    }
    Ok(())
}

/// Anti-replay window for tracking received packet counters
///
/// Tracks which counters have been received within the last
/// `REPLAY_WINDOW_SIZE`. Counters below the window or already seen inside it
/// are rejected. `check` never mutates; `accept` is called only after the
/// packet authenticated.
#[derive(Clone, PartialEq, Eq)]
pub struct ReplayWindow {
    /// Highest counter value seen
    highest: u64,
    /// Bit i corresponds to counter (highest - i)
    bitmap: [u64; WORDS],
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self {
            highest: 0,
            bitmap: [0; WORDS],
        }
    }

    /// Check if a counter is acceptable without updating the window
    pub fn check(&self, counter: u64) -> bool {
        if counter >= REJECT_AFTER_MESSAGES {
            return false;
        }
        if counter > self.highest {
            return true;
        }

        let diff = self.highest - counter;
        if diff >= REPLAY_WINDOW_SIZE as u64 {
            return false;
        }
        let (word, bit) = (diff as usize / 64, diff as usize % 64);
        self.bitmap[word] & (1u64 << bit) == 0
    }

    /// Record a counter as seen
    pub fn accept(&mut self, counter: u64) {
        if counter > self.highest {
            self.shift(counter - self.highest);
            self.highest = counter;
            self.bitmap[0] |= 1;
        } else {
            let diff = (self.highest - counter) as usize;
            if diff < REPLAY_WINDOW_SIZE {
                self.bitmap[diff / 64] |= 1u64 << (diff % 64);
            }
        }
    }

    /// Highest counter accepted so far
    pub fn highest(&self) -> u64 {
        self.highest
    }

    fn shift(&mut self, shift: u64) {
        if shift >= REPLAY_WINDOW_SIZE as u64 {
            self.bitmap = [0; WORDS];
            return;
        }
        let shift = shift as usize;
        let (word_shift, bit_shift) = (shift / 64, shift % 64);

        if word_shift > 0 {
            self.bitmap.copy_within(0..WORDS - word_shift, word_shift);
            self.bitmap[..word_shift].fill(0);
        }

        if bit_shift > 0 {
            let mut carry = 0u64;
            for word in self.bitmap.iter_mut() {
                let next_carry = *word >> (64 - bit_shift);
                *word = (*word << bit_shift) | carry;
                carry = next_carry;
            }
        }
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReplayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayWindow")
            .field("highest", &self.highest)
            .field("window_size", &REPLAY_WINDOW_SIZE)
            .finish()
    }
}
