//! In-memory host for driving channels without sockets
//!
//! [`LoopbackHost`] queues every emitted datagram and records delivered
//! payloads and requested timeouts. Two channels sharing a [`ManualClock`]
//! can be wired together with [`pump`] / [`settle`]. Used by the test suite
//! and the `selftest` command.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::channel::{Channel, ChannelOps};
use crate::error::Result;

/// Millisecond clock advanced by hand, shared between hosts
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<u32>>);

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self(Rc::new(Cell::new(start_ms)))
    }

    pub fn now(&self) -> u32 {
        self.0.get()
    }

    /// Move time forward, wrapping at `u32::MAX`
    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

/// Host that keeps everything in memory
#[derive(Debug)]
pub struct LoopbackHost {
    clock: ManualClock,
    rng: StdRng,
    /// Datagrams emitted by the channel, oldest first
    pub outbox: VecDeque<Vec<u8>>,
    /// Payloads handed to `handle_decrypted` (keepalives included, as empty vecs)
    pub delivered: Vec<Vec<u8>>,
    /// Every value passed to `set_timeout`
    pub timeouts: Vec<u32>,
    /// Answer for `check_peer_id`
    pub accept_peer: bool,
    pub peer_checks: usize,
    pub init_calls: usize,
    /// Make `send` fail with `BrokenPipe`
    pub fail_sends: bool,
}

impl LoopbackHost {
    pub fn new(clock: ManualClock, seed: u64) -> Self {
        Self {
            clock,
            rng: StdRng::seed_from_u64(seed),
            outbox: VecDeque::new(),
            delivered: Vec::new(),
            timeouts: Vec::new(),
            accept_peer: true,
            peer_checks: 0,
            init_calls: 0,
            fail_sends: false,
        }
    }

    /// Most recent timeout request
    pub fn last_timeout(&self) -> Option<u32> {
        self.timeouts.last().copied()
    }
}

impl ChannelOps for LoopbackHost {
    type Rng = StdRng;

    fn init(&mut self) -> io::Result<()> {
        self.init_calls += 1;
        Ok(())
    }

    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        if self.fail_sends {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback send disabled"));
        }
        self.outbox.push_back(datagram.to_vec());
        Ok(datagram.len())
    }

    fn handle_decrypted(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.delivered.push(payload.to_vec());
        Ok(payload.len())
    }

    fn get_time_ms(&self) -> u32 {
        self.clock.now()
    }

    fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeouts.push(timeout_ms);
    }

    fn check_peer_id(&mut self, _peer_public: &[u8; 32]) -> bool {
        self.peer_checks += 1;
        self.accept_peer
    }

    fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Deliver every datagram queued by `from` to `to`
///
/// Returns how many datagrams moved.
pub fn pump(from: &mut Channel<LoopbackHost>, to: &mut Channel<LoopbackHost>) -> Result<usize> {
    let mut moved = 0;
    while let Some(datagram) = from.ops_mut().outbox.pop_front() {
        to.handle_incoming(&datagram)?;
        moved += 1;
    }
    Ok(moved)
}

/// Pump both directions until the wire is quiet
pub fn settle(a: &mut Channel<LoopbackHost>, b: &mut Channel<LoopbackHost>) -> Result<usize> {
    let mut total = 0;
    loop {
        let moved = pump(a, b)? + pump(b, a)?;
        if moved == 0 {
            return Ok(total);
        }
        total += moved;
    }
}
