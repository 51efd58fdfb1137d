//! Timer and rekey controller
//!
//! The host provides a single one-shot timer. The controller folds every
//! pending deadline (handshake retry and give-up on either side,
//! rekey-after-time, reject-after-time, keepalives) into the earliest one and
//! only calls
//! `set_timeout` when that earliest deadline changes.

use std::time::Duration;

use crate::error::{ProtocolError, Result, WgChanError};
use crate::protocol::handshake::HandshakeState;
use crate::protocol::session::{REKEY_AFTER_TIME, REKEY_ATTEMPT_TIME};

use super::{Channel, ChannelOps, Mode};

/// Channel-local monotonic clock built on the host's wrapping millisecond counter
///
/// Readings that went backwards (in wrapping arithmetic) are ignored, so the
/// clock never decreases.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    last_raw: u32,
    elapsed_ms: u64,
}

impl Clock {
    pub fn new(raw: u32) -> Self {
        Self {
            last_raw: raw,
            elapsed_ms: 0,
        }
    }

    /// Fold a fresh host reading into the clock and return the current offset
    pub fn advance(&mut self, raw: u32) -> Duration {
        let delta = raw.wrapping_sub(self.last_raw) as i32;
        if delta > 0 {
            self.elapsed_ms += delta as u64;
            self.last_raw = raw;
        }
        self.now()
    }

    /// Time since the channel was initialized
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

#[derive(Debug, Default)]
pub(super) struct Timers {
    pub(super) clock: Clock,
    /// Deadline last handed to `set_timeout`
    pub(super) armed: Option<Duration>,
    /// Passive keepalive owed for data we received
    pub(super) keepalive_at: Option<Duration>,
    pub(super) last_sent: Option<Duration>,
}

impl Timers {
    pub(super) fn new(clock: Clock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }
}

impl<O: ChannelOps> Channel<O> {
    /// Handle the host's timer firing
    ///
    /// Fires every event that is due and re-arms the timer. Returns
    /// `HandshakeTimeout` when a handshake attempt was abandoned, or the
    /// host's error if emitting a datagram failed.
    pub fn trigger_timeout(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.timers.armed = None;
        let now = self.now();
        self.expire_sessions(now);

        let mut outcome = Ok(());

        match &self.handshake {
            HandshakeState::InitiationSent(sent) => {
                let (started_at, retries, retry_at) =
                    (sent.started_at, sent.retries, sent.next_retry_at);
                if now >= started_at + REKEY_ATTEMPT_TIME {
                    self.abandon_handshake();
                    outcome = Err(handshake_timeout());
                } else if now >= retry_at {
                    tracing::debug!(
                        "Retransmitting handshake initiation (retry {})",
                        retries + 1
                    );
                    if let Err(e) = self.begin_handshake(now, Some((started_at, retries + 1))) {
                        outcome = Err(e);
                    }
                }
            }
            HandshakeState::ResponseSent { started_at, .. } => {
                if now >= *started_at + REKEY_ATTEMPT_TIME {
                    self.abandon_handshake();
                    // A listener keeps listening; only a failed connect is reported
                    if self.closed {
                        outcome = Err(handshake_timeout());
                    }
                }
            }
            _ => {}
        }

        if self.rekey_deadline().is_some_and(|at| now >= at) {
            self.rekey_in_background(now);
        }

        let keepalive_due = self.timers.keepalive_at.is_some_and(|at| now >= at)
            || self.persistent_keepalive_at().is_some_and(|at| now >= at);
        if keepalive_due {
            self.timers.keepalive_at = None;
            if let Err(e) = self.send_keepalive(now) {
                outcome = outcome.and(Err(e));
            }
        }

        self.reschedule(now);
        outcome
    }

    /// Give up on the handshake in flight, whichever side started it
    fn abandon_handshake(&mut self) {
        tracing::warn!(
            "Handshake timeout after {}s, giving up",
            REKEY_ATTEMPT_TIME.as_secs()
        );
        if self.sessions.discard_next() {
            tracing::debug!("Dropped unconfirmed responder session");
        }
        if self.sessions.current().is_some() {
            self.handshake = HandshakeState::Established;
            return;
        }

        self.handshake = HandshakeState::Uninitialized;
        if self.mode == Mode::Connect {
            self.mode = Mode::Idle;
            self.closed = true;
        }
    }

    /// Initiator sessions start a new handshake once they reach rekey-after-time
    fn rekey_deadline(&self) -> Option<Duration> {
        if matches!(self.handshake, HandshakeState::InitiationSent(_)) {
            return None;
        }
        self.sessions
            .current()
            .filter(|s| s.is_initiator)
            .map(|s| s.created_at + REKEY_AFTER_TIME)
    }

    fn persistent_keepalive_at(&self) -> Option<Duration> {
        let interval = self.config.persistent_keepalive_interval()?;
        let session = self.sessions.current()?;
        let since = self.timers.last_sent.unwrap_or(session.created_at);
        Some(since.max(session.created_at) + interval)
    }

    fn handshake_deadline(&self) -> Option<Duration> {
        match &self.handshake {
            HandshakeState::InitiationSent(sent) => {
                Some(sent.next_retry_at.min(sent.started_at + REKEY_ATTEMPT_TIME))
            }
            HandshakeState::ResponseSent { started_at, .. } => {
                Some(*started_at + REKEY_ATTEMPT_TIME)
            }
            _ => None,
        }
    }

    /// Earliest instant at which some timer event is due
    pub(super) fn next_deadline(&self) -> Option<Duration> {
        [
            self.handshake_deadline(),
            self.sessions.earliest_expiry(),
            self.rekey_deadline(),
            self.timers.keepalive_at,
            self.persistent_keepalive_at(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Re-arm the host timer if the earliest deadline moved
    pub(super) fn reschedule(&mut self, now: Duration) {
        let deadline = self.next_deadline();
        if deadline == self.timers.armed {
            return;
        }
        self.timers.armed = deadline;

        if let Some(at) = deadline {
            let ms = at.saturating_sub(now).as_millis();
            let ms = u32::try_from(ms).unwrap_or(u32::MAX);
            tracing::trace!("Next timeout in {} ms", ms);
            self.ops.set_timeout(ms);
        }
    }
}

fn handshake_timeout() -> WgChanError {
    ProtocolError::HandshakeTimeout {
        seconds: REKEY_ATTEMPT_TIME.as_secs(),
    }
    .into()
}
