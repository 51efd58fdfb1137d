//! TAI64N timestamps carried in handshake initiations
//!
//! TAI64N is 8 bytes of seconds (offset by 2^62) followed by 4 bytes of
//! nanoseconds, both big-endian, so byte order equals chronological order.

use tai64::Tai64N;

/// Encoded TAI64N length
pub const TIMESTAMP_LEN: usize = 12;

const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Issues strictly increasing timestamps for outgoing initiations
///
/// A host clock that stalls or steps backwards would otherwise make the
/// responder reject our next initiation as a replay.
#[derive(Debug, Default, Clone)]
pub struct TimestampGenerator {
    last: Option<[u8; TIMESTAMP_LEN]>,
}

impl TimestampGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `now` encoded, bumped past the previously issued value if needed
    pub fn next(&mut self, now: Tai64N) -> [u8; TIMESTAMP_LEN] {
        let mut bytes = now.to_bytes();
        if let Some(last) = self.last {
            if bytes <= last {
                bytes = successor(&last);
            }
        }
        self.last = Some(bytes);
        bytes
    }
}

/// Smallest TAI64N strictly greater than `ts` (one nanosecond later)
pub fn successor(ts: &[u8; TIMESTAMP_LEN]) -> [u8; TIMESTAMP_LEN] {
    let (secs, nanos) = split(ts);
    let (secs, nanos) = if nanos + 1 >= NANOS_PER_SECOND {
        (secs.wrapping_add(1), 0)
    } else {
        (secs, nanos + 1)
    };

    let mut out = [0u8; TIMESTAMP_LEN];
    out[..8].copy_from_slice(&secs.to_be_bytes());
    out[8..].copy_from_slice(&nanos.to_be_bytes());
    out
}

/// Check that decrypted bytes form a well-formed TAI64N value
pub fn is_valid(bytes: &[u8]) -> bool {
    Tai64N::from_slice(bytes).is_ok()
}

/// Strict "newer than" comparison for received timestamps
pub fn is_newer(candidate: &[u8; TIMESTAMP_LEN], last: Option<&[u8; TIMESTAMP_LEN]>) -> bool {
    match last {
        Some(last) => candidate > last,
        None => true,
    }
}

fn split(ts: &[u8; TIMESTAMP_LEN]) -> (u64, u32) {
    let mut secs = [0u8; 8];
    let mut nanos = [0u8; 4];
    secs.copy_from_slice(&ts[..8]);
    nanos.copy_from_slice(&ts[8..]);
    (u64::from_be_bytes(secs), u32::from_be_bytes(nanos))
}
