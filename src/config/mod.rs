//! Configuration parsing for wgchan
//!
//! Reads the `[Interface]` / `[Peer]` subset of WireGuard `.conf` files that
//! a single-peer channel needs.

mod parser;

pub use parser::WgChanConfig;
