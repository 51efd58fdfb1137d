//! Error types for the wgchan channel endpoint

use thiserror::Error;

/// Main error type for wgchan
#[derive(Error, Debug)]
pub enum WgChanError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Misuse of the channel API
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A host operation (send, handle_decrypted, init) failed
    #[error("Host error: {0}")]
    Host(#[from] std::io::Error),
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid base64 key: {field}")]
    InvalidKey { field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
///
/// Every AEAD, MAC and DH failure collapses into `Verification` so callers
/// cannot branch on which check failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Cryptographic verification failed")]
    Verification,

    #[error("Public key is weak or of low order")]
    WeakPublicKey,
}

/// Protocol-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message type: {msg_type}")]
    InvalidMessageType { msg_type: u8 },

    #[error("Invalid message length: expected {expected}, got {got}")]
    InvalidMessageLength { expected: usize, got: usize },

    #[error("MAC verification failed")]
    MacVerificationFailed,

    #[error("Replay detected: counter {counter} already seen or too old")]
    ReplayDetected { counter: u64 },

    #[error("Stale handshake timestamp")]
    StaleTimestamp,

    #[error("Unknown receiver index: {index}")]
    UnknownReceiverIndex { index: u32 },

    #[error("Initiation from an unexpected static key")]
    UnknownPeer,

    #[error("Peer identity rejected by host")]
    PeerRejected,

    #[error("Handshake timeout after {seconds}s")]
    HandshakeTimeout { seconds: u64 },

    #[error("Session expired")]
    SessionExpired,
}

/// Errors caused by calling the channel API at the wrong time or with bad input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel not initialized")]
    NotInitialized,

    #[error("Channel already initialized")]
    AlreadyInitialized,

    #[error("Cannot {operation} while {state}")]
    WrongState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("No free channel slot")]
    Exhausted,
}

/// Coarse error classes reported to hosts
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument = -1,
    WrongState = -2,
    Verification = -3,
    Replay = -4,
    HandshakeTimeout = -5,
    SessionExpired = -6,
    Exhausted = -7,
    Host = -8,
}

impl WgChanError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::InvalidArgument,
            Self::Crypto(CryptoError::Verification) => ErrorKind::Verification,
            Self::Crypto(CryptoError::WeakPublicKey) => ErrorKind::InvalidArgument,

            Self::Protocol(ProtocolError::ReplayDetected { .. })
            | Self::Protocol(ProtocolError::StaleTimestamp) => ErrorKind::Replay,
            Self::Protocol(ProtocolError::HandshakeTimeout { .. }) => ErrorKind::HandshakeTimeout,
            Self::Protocol(ProtocolError::SessionExpired) => ErrorKind::SessionExpired,
            // Malformed and unauthenticated input is indistinguishable from a failed tag
            Self::Protocol(_) => ErrorKind::Verification,

            Self::Channel(ChannelError::InvalidArgument { .. }) => ErrorKind::InvalidArgument,
            Self::Channel(ChannelError::Exhausted) => ErrorKind::Exhausted,
            Self::Channel(_) => ErrorKind::WrongState,

            Self::Host(_) => ErrorKind::Host,
        }
    }

    /// Negative integer code for this error, for hosts with C-style error handling
    pub fn code(&self) -> i32 {
        self.kind() as i32
    }

    /// Check if the channel can keep operating after this error
    ///
    /// Bad configuration and unusable keys are fatal. Timeouts and expiry are
    /// recovered by a new `connect()` or by the peer's next initiation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_)
                | Self::Crypto(CryptoError::WeakPublicKey)
                | Self::Channel(ChannelError::InvalidArgument { .. })
        )
    }
}

/// Result type alias for wgchan operations
pub type Result<T> = std::result::Result<T, WgChanError>;
