//! Session state management for WireGuard
//!
//! Tracks the transport sessions of one peer and their lifetimes. Times are
//! offsets from the channel's monotonic clock rather than `Instant`s, since
//! the host owns the clock.

use std::time::Duration;

use crate::crypto::noise::TransportKeys;
use crate::error::{ProtocolError, WgChanError};
use crate::protocol::transport::{
    open_packet, seal_packet, ReplayWindow, REJECT_AFTER_MESSAGES, REKEY_AFTER_MESSAGES,
};

/// Initiate rekey after a session reaches this age
pub const REKEY_AFTER_TIME: Duration = Duration::from_secs(120);

/// Reject packets from sessions older than this
pub const REJECT_AFTER_TIME: Duration = Duration::from_secs(180);

/// Give up on a handshake attempt after this long
pub const REKEY_ATTEMPT_TIME: Duration = Duration::from_secs(90);

/// Retransmit an unanswered initiation after this long (plus jitter)
pub const REKEY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound of the random jitter added to each retransmit, in ms
pub const REKEY_TIMEOUT_JITTER_MAX_MS: u64 = 334;

/// Keepalive timeout - send keepalive if we received but did not reply
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// An initiator starts a new handshake on receive once its session is this old
pub const REKEY_ON_RECEIVE_AGE: Duration = Duration::from_secs(
    REJECT_AFTER_TIME.as_secs() - KEEPALIVE_TIMEOUT.as_secs() - REKEY_TIMEOUT.as_secs(),
);

/// Transport session derived from one completed handshake
pub struct Session {
    /// Our local session index
    pub local_index: u32,
    /// Peer's session index
    pub remote_index: u32,
    keys: TransportKeys,
    send_counter: u64,
    replay_window: ReplayWindow,
    /// When the session was established
    pub created_at: Duration,
    /// Whether we started the handshake that produced this session
    pub is_initiator: bool,
}

impl Session {
    pub fn new(
        local_index: u32,
        remote_index: u32,
        keys: TransportKeys,
        is_initiator: bool,
        now: Duration,
    ) -> Self {
        Self {
            local_index,
            remote_index,
            keys,
            send_counter: 0,
            replay_window: ReplayWindow::new(),
            created_at: now,
            is_initiator,
        }
    }

    /// Get session age
    pub fn age(&self, now: Duration) -> Duration {
        now.saturating_sub(self.created_at)
    }

    /// Time at which this session stops being usable
    pub fn expires_at(&self) -> Duration {
        self.created_at + REJECT_AFTER_TIME
    }

    /// Check if this session is expired and should be rejected
    pub fn is_expired(&self, now: Duration) -> bool {
        self.age(now) >= REJECT_AFTER_TIME
    }

    /// Check if this session should trigger a new handshake after a send
    pub fn needs_rekey(&self, now: Duration) -> bool {
        self.send_counter >= REKEY_AFTER_MESSAGES
            || (self.is_initiator && self.age(now) >= REKEY_AFTER_TIME)
    }

    /// Counter the next outgoing packet will carry
    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }

    #[cfg(test)]
    pub(crate) fn set_send_counter(&mut self, counter: u64) {
        self.send_counter = counter;
    }

    pub fn keys(&self) -> &TransportKeys {
        &self.keys
    }

    /// Seal `payload` into `out` under the next counter
    pub fn encrypt(
        &mut self,
        payload: &[u8],
        pad: bool,
        now: Duration,
        out: &mut Vec<u8>,
    ) -> Result<(), WgChanError> {
        if self.send_counter >= REJECT_AFTER_MESSAGES || self.is_expired(now) {
            return Err(ProtocolError::SessionExpired.into());
        }

        let counter = self.send_counter;
        seal_packet(
            &self.keys.sending_key,
            counter,
            self.remote_index,
            payload,
            pad,
            out,
        )?;
        self.send_counter = counter + 1;
        Ok(())
    }

    /// Authenticate and decrypt a transport body into `out`
    ///
    /// The replay window only moves after the tag verified.
    pub fn decrypt(
        &mut self,
        counter: u64,
        sealed: &[u8],
        now: Duration,
        out: &mut Vec<u8>,
    ) -> Result<(), WgChanError> {
        if self.is_expired(now) {
            return Err(ProtocolError::SessionExpired.into());
        }
        if !self.replay_window.check(counter) {
            return Err(ProtocolError::ReplayDetected { counter }.into());
        }

        open_packet(&self.keys.receiving_key, counter, sealed, out)?;
        self.replay_window.accept(counter);
        Ok(())
    }

    /// Whether the key material has been wiped
    pub fn keys_zeroed(&self) -> bool {
        self.keys.sending_key.iter().all(|&b| b == 0)
            && self.keys.receiving_key.iter().all(|&b| b == 0)
    }

    /// Wipe both transport keys in place
    pub fn zeroize_keys(&mut self) {
        use zeroize::Zeroize;
        self.keys.zeroize();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_index", &self.local_index)
            .field("remote_index", &self.remote_index)
            .field("send_counter", &self.send_counter)
            .field("replay_window", &self.replay_window)
            .field("created_at", &self.created_at)
            .field("is_initiator", &self.is_initiator)
            .finish_non_exhaustive()
    }
}

/// Which slot a session was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Current,
    Previous,
    /// Responder-side session awaiting its first authenticated packet
    Next,
}

/// Current, previous and unconfirmed sessions of one peer
#[derive(Debug, Default)]
pub struct SessionManager {
    current: Option<Session>,
    previous: Option<Session>,
    next: Option<Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current session
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Get mutable reference to current session
    pub fn current_mut(&mut self) -> Option<&mut Session> {
        self.current.as_mut()
    }

    pub fn previous(&self) -> Option<&Session> {
        self.previous.as_ref()
    }

    pub fn next(&self) -> Option<&Session> {
        self.next.as_ref()
    }

    /// True when no session of any kind is held
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.previous.is_none() && self.next.is_none()
    }

    /// Install a confirmed session; the old current one is kept for decryption only
    pub fn install_current(&mut self, session: Session) {
        self.previous = self.current.take();
        self.current = Some(session);
        self.next = None;
    }

    /// Hold a responder session until the initiator proves it has the keys
    pub fn install_next(&mut self, session: Session) {
        self.next = Some(session);
    }

    /// Promote the unconfirmed session to current
    pub fn promote_next(&mut self) -> bool {
        match self.next.take() {
            Some(next) => {
                self.previous = self.current.take();
                self.current = Some(next);
                true
            }
            None => false,
        }
    }

    /// Find session by receiver index (for incoming packets)
    pub fn find_by_index(&mut self, index: u32) -> Option<(Slot, &mut Session)> {
        if let Some(session) = self.current.as_mut().filter(|s| s.local_index == index) {
            return Some((Slot::Current, session));
        }
        if let Some(session) = self.next.as_mut().filter(|s| s.local_index == index) {
            return Some((Slot::Next, session));
        }
        self.previous
            .as_mut()
            .filter(|s| s.local_index == index)
            .map(|s| (Slot::Previous, s))
    }

    /// Whether any held session uses `index` locally
    pub fn contains_index(&self, index: u32) -> bool {
        [&self.current, &self.previous, &self.next]
            .into_iter()
            .flatten()
            .any(|s| s.local_index == index)
    }

    /// Earliest reject-after-time deadline among held sessions
    pub fn earliest_expiry(&self) -> Option<Duration> {
        [&self.current, &self.previous, &self.next]
            .into_iter()
            .flatten()
            .map(Session::expires_at)
            .min()
    }

    /// Drop every session past reject-after-time, wiping its keys
    ///
    /// Returns the slots that were emptied.
    pub fn expire(&mut self, now: Duration) -> Vec<Slot> {
        let mut expired = Vec::new();
        for (slot, entry) in [
            (Slot::Current, &mut self.current),
            (Slot::Previous, &mut self.previous),
            (Slot::Next, &mut self.next),
        ] {
            if entry.as_ref().is_some_and(|s| s.is_expired(now)) {
                if let Some(mut session) = entry.take() {
                    session.zeroize_keys();
                    tracing::info!(
                        "Session {} expired after {:?}",
                        session.local_index,
                        session.age(now)
                    );
                }
                expired.push(slot);
            }
        }
        expired
    }

    /// Drop the unconfirmed responder session, wiping its keys
    pub fn discard_next(&mut self) -> bool {
        match self.next.take() {
            Some(mut next) => {
                next.zeroize_keys();
                true
            }
            None => false,
        }
    }

    /// Clear all sessions
    pub fn clear(&mut self) {
        self.current = None;
        self.previous = None;
        self.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;

    fn keys(send: u8, recv: u8) -> TransportKeys {
        TransportKeys {
            sending_key: [send; 32],
            receiving_key: [recv; 32],
        }
    }

    fn at(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(100, 200, keys(1, 2), true, at(0));

        assert_eq!(session.local_index, 100);
        assert_eq!(session.remote_index, 200);
        assert!(!session.is_expired(at(179)));
        assert!(session.is_expired(at(180)));
        assert!(!session.needs_rekey(at(119)));
        assert!(session.needs_rekey(at(120)));
    }

    #[test]
    fn test_responder_does_not_rekey_by_time() {
        let session = Session::new(1, 2, keys(1, 2), false, at(0));
        assert!(!session.needs_rekey(at(150)));
    }

    #[test]
    fn test_rekey_by_messages() {
        let mut session = Session::new(1, 2, keys(1, 2), false, at(0));
        session.set_send_counter(REKEY_AFTER_MESSAGES - 1);
        assert!(!session.needs_rekey(at(1)));

        let mut out = Vec::new();
        session.encrypt(b"x", false, at(1), &mut out).unwrap();
        assert!(session.needs_rekey(at(1)));
    }

    #[test]
    fn test_encrypt_decrypt_between_peers() {
        let mut alice = Session::new(1, 2, keys(1, 2), true, at(0));
        let mut bob = Session::new(2, 1, keys(2, 1), false, at(0));
        let mut wire = Vec::new();
        let mut plain = Vec::new();

        alice.encrypt(b"packet 1", false, at(1), &mut wire).unwrap();
        assert_eq!(alice.send_counter(), 1);

        bob.decrypt(0, &wire[16..], at(1), &mut plain).unwrap();
        assert_eq!(plain, b"packet 1");

        // Replay should be rejected
        assert!(matches!(
            bob.decrypt(0, &wire[16..], at(1), &mut plain),
            Err(WgChanError::Protocol(ProtocolError::ReplayDetected { counter: 0 }))
        ));
    }

    #[test]
    fn test_failed_decrypt_leaves_window() {
        let mut alice = Session::new(1, 2, keys(1, 2), true, at(0));
        let mut bob = Session::new(2, 1, keys(2, 1), false, at(0));
        let mut wire = Vec::new();
        let mut plain = Vec::new();

        alice.encrypt(b"data", false, at(0), &mut wire).unwrap();
        let mut forged = wire.clone();
        let last = forged.len() - 1;
        forged[last] ^= 1;

        assert!(matches!(
            bob.decrypt(0, &forged[16..], at(0), &mut plain),
            Err(WgChanError::Crypto(CryptoError::Verification))
        ));
        // The genuine packet with the same counter still gets through
        bob.decrypt(0, &wire[16..], at(0), &mut plain).unwrap();
    }

    #[test]
    fn test_reject_after_limits() {
        let mut session = Session::new(1, 2, keys(1, 2), true, at(0));
        let mut out = Vec::new();

        session.set_send_counter(REJECT_AFTER_MESSAGES);
        assert!(matches!(
            session.encrypt(b"", false, at(1), &mut out),
            Err(WgChanError::Protocol(ProtocolError::SessionExpired))
        ));

        let mut session = Session::new(1, 2, keys(1, 2), true, at(0));
        assert!(session.encrypt(b"", false, at(180), &mut out).is_err());
    }

    #[test]
    fn test_zeroize_keys() {
        let mut session = Session::new(1, 2, keys(1, 2), true, at(0));
        assert!(!session.keys_zeroed());
        session.zeroize_keys();
        assert!(session.keys_zeroed());
    }

    #[test]
    fn test_session_manager_rekey() {
        let mut manager = SessionManager::new();
        assert!(manager.is_empty());

        manager.install_current(Session::new(100, 200, keys(1, 2), true, at(0)));
        manager.install_current(Session::new(101, 201, keys(3, 4), true, at(10)));

        assert_eq!(manager.current().unwrap().local_index, 101);
        assert_eq!(manager.previous().unwrap().local_index, 100);
        assert_eq!(manager.find_by_index(100).unwrap().0, Slot::Previous);
        assert_eq!(manager.find_by_index(101).unwrap().0, Slot::Current);
        assert!(manager.find_by_index(102).is_none());
    }

    #[test]
    fn test_next_session_promotion() {
        let mut manager = SessionManager::new();
        manager.install_current(Session::new(1, 9, keys(1, 2), false, at(0)));
        manager.install_next(Session::new(2, 8, keys(3, 4), false, at(5)));

        assert_eq!(manager.current().unwrap().local_index, 1);
        assert_eq!(manager.find_by_index(2).unwrap().0, Slot::Next);
        assert!(manager.contains_index(2));

        assert!(manager.promote_next());
        assert_eq!(manager.current().unwrap().local_index, 2);
        assert_eq!(manager.previous().unwrap().local_index, 1);
        assert!(manager.next().is_none());
        assert!(!manager.promote_next());
    }

    #[test]
    fn test_expire() {
        let mut manager = SessionManager::new();
        manager.install_current(Session::new(1, 9, keys(1, 2), true, at(0)));
        manager.install_current(Session::new(2, 8, keys(3, 4), true, at(100)));

        assert_eq!(manager.earliest_expiry(), Some(at(180)));
        assert!(manager.expire(at(179)).is_empty());

        assert_eq!(manager.expire(at(180)), vec![Slot::Previous]);
        assert_eq!(manager.earliest_expiry(), Some(at(280)));

        assert_eq!(manager.expire(at(300)), vec![Slot::Current]);
        assert!(manager.is_empty());
        assert_eq!(manager.earliest_expiry(), None);
    }

    #[test]
    fn test_rekey_on_receive_age() {
        assert_eq!(REKEY_ON_RECEIVE_AGE, at(165));
    }
}
