//! WireGuard protocol implementation
//!
//! This module contains the core protocol components:
//! - Message wire formats
//! - Handshake logic (Noise IKpsk2)
//! - Transport encryption and replay protection
//! - Session management

pub mod handshake;
pub mod messages;
pub mod session;
pub mod transport;

pub use handshake::{HandshakePhase, HandshakeState, Handshaker, InitiationSent, SessionKeys};
pub use messages::{
    CookieReply, HandshakeInitiation, HandshakeResponse, MessageType, TransportHeader,
};
pub use session::{Session, SessionManager, Slot};
pub use transport::ReplayWindow;
