//! wgchan - Embeddable WireGuard channel endpoint
//!
//! A transport-agnostic implementation of one WireGuard peer-to-peer channel:
//! the Noise IKpsk2 handshake, ChaCha20-Poly1305 transport sessions with replay
//! protection, and the rekey/keepalive timers. The host supplies I/O, time,
//! randomness and a one-shot timer through [`ChannelOps`].
//!
//! # Features
//!
//! - WireGuard wire format (message types 1-4)
//! - Automatic rekey after time or message count
//! - Passive and persistent keepalives
//! - 2048-packet replay window
//! - Key material zeroized when sessions expire or the channel resets
//!
//! # Usage
//!
//! ```no_run
//! use wgchan::{Channel, WgChanConfig};
//! # fn host() -> wgchan::LoopbackHost { unimplemented!() }
//!
//! fn main() -> anyhow::Result<()> {
//!     let (identity, config) = WgChanConfig::from_file("wgchan.conf")?.into_parts();
//!     let mut channel = Channel::new(identity, config, host())?;
//!     channel.init()?;
//!     channel.connect()?;
//!     // feed datagrams with handle_incoming, call trigger_timeout when the timer fires
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod loopback;
pub mod protocol;

pub use channel::{Channel, ChannelConfig, ChannelOps, ChannelState};
pub use config::WgChanConfig;
pub use error::{ErrorKind, WgChanError};
pub use identity::{create_id, Identity};
pub use loopback::LoopbackHost;
