//! WireGuard message wire formats
//!
//! Defines the packet structures for:
//! - Type 1: Handshake Initiation (148 bytes)
//! - Type 2: Handshake Response (92 bytes)
//! - Type 3: Cookie Reply (64 bytes)
//! - Type 4: Transport Data (variable)
//!
//! All integers are little-endian. Reserved bytes are written as zero and
//! ignored on receive. Handshake messages must match their size exactly.

use crate::crypto::blake2s;
use crate::error::ProtocolError;

/// WireGuard message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    HandshakeInitiation = 1,
    HandshakeResponse = 2,
    CookieReply = 3,
    TransportData = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HandshakeInitiation),
            2 => Ok(Self::HandshakeResponse),
            3 => Ok(Self::CookieReply),
            4 => Ok(Self::TransportData),
            _ => Err(ProtocolError::InvalidMessageType { msg_type: value }),
        }
    }
}

fn check_exact(data: &[u8], msg_type: MessageType, size: usize) -> Result<(), ProtocolError> {
    if data.len() != size {
        return Err(ProtocolError::InvalidMessageLength {
            expected: size,
            got: data.len(),
        });
    }
    if data[0] != msg_type as u8 {
        return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
    }
    Ok(())
}

/// Copy a fixed-size field; callers have already checked the length
fn field<const N: usize>(data: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[at..at + N]);
    out
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(field(data, at))
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(field(data, at))
}

/// Verify the MAC1 field located at `offset` against everything before it
pub fn verify_mac1(data: &[u8], offset: usize, mac1_key: &[u8; 32]) -> Result<(), ProtocolError> {
    if data.len() < offset + blake2s::MAC_LEN {
        return Err(ProtocolError::InvalidMessageLength {
            expected: offset + blake2s::MAC_LEN,
            got: data.len(),
        });
    }
    blake2s::verify_mac(
        mac1_key,
        &data[..offset],
        &data[offset..offset + blake2s::MAC_LEN],
    )
    .map_err(|_| ProtocolError::MacVerificationFailed)
}

/// Handshake Initiation message (148 bytes)
///
/// ```text
/// type(1) | reserved(3) | sender_index(4) | ephemeral_public(32) |
/// encrypted_static(48) | encrypted_timestamp(28) | mac1(16) | mac2(16)
/// ```
#[derive(Debug, Clone)]
pub struct HandshakeInitiation {
    pub sender_index: u32,
    pub ephemeral_public: [u8; 32],
    pub encrypted_static: [u8; 48], // 32 bytes static + 16 bytes tag
    pub encrypted_timestamp: [u8; 28], // 12 bytes TAI64N + 16 bytes tag
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeInitiation {
    /// Size of the handshake initiation message
    pub const SIZE: usize = 148;

    /// Offset of the mac1 field
    pub const MAC1_OFFSET: usize = 116;

    /// Create a new handshake initiation (MACs are zeroed until `seal`)
    pub fn new(
        sender_index: u32,
        ephemeral_public: [u8; 32],
        encrypted_static: [u8; 48],
        encrypted_timestamp: [u8; 28],
    ) -> Self {
        Self {
            sender_index,
            ephemeral_public,
            encrypted_static,
            encrypted_timestamp,
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0] = MessageType::HandshakeInitiation as u8;
        // buf[1..4] reserved (zeros)
        buf[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        buf[8..40].copy_from_slice(&self.ephemeral_public);
        buf[40..88].copy_from_slice(&self.encrypted_static);
        buf[88..116].copy_from_slice(&self.encrypted_timestamp);
        buf[116..132].copy_from_slice(&self.mac1);
        buf[132..148].copy_from_slice(&self.mac2);

        buf
    }

    /// Compute MAC1 under `mac1_key` and return the finished datagram
    ///
    /// MAC2 stays zero: no cookie is ever held.
    pub fn seal(&mut self, mac1_key: &[u8; 32]) -> [u8; Self::SIZE] {
        let mut buf = self.to_bytes();
        self.mac1 = blake2s::mac(mac1_key, &buf[..Self::MAC1_OFFSET]);
        buf[Self::MAC1_OFFSET..Self::MAC1_OFFSET + 16].copy_from_slice(&self.mac1);
        buf
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_exact(data, MessageType::HandshakeInitiation, Self::SIZE)?;

        Ok(Self {
            sender_index: read_u32(data, 4),
            ephemeral_public: field(data, 8),
            encrypted_static: field(data, 40),
            encrypted_timestamp: field(data, 88),
            mac1: field(data, 116),
            mac2: field(data, 132),
        })
    }
}

/// Handshake Response message (92 bytes)
///
/// ```text
/// type(1) | reserved(3) | sender_index(4) | receiver_index(4) |
/// ephemeral_public(32) | encrypted_nothing(16) | mac1(16) | mac2(16)
/// ```
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub sender_index: u32,
    pub receiver_index: u32,
    pub ephemeral_public: [u8; 32],
    pub encrypted_nothing: [u8; 16], // Just the auth tag
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

impl HandshakeResponse {
    /// Size of the handshake response message
    pub const SIZE: usize = 92;

    /// Offset of the mac1 field
    pub const MAC1_OFFSET: usize = 60;

    pub fn new(
        sender_index: u32,
        receiver_index: u32,
        ephemeral_public: [u8; 32],
        encrypted_nothing: [u8; 16],
    ) -> Self {
        Self {
            sender_index,
            receiver_index,
            ephemeral_public,
            encrypted_nothing,
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        buf[0] = MessageType::HandshakeResponse as u8;
        buf[4..8].copy_from_slice(&self.sender_index.to_le_bytes());
        buf[8..12].copy_from_slice(&self.receiver_index.to_le_bytes());
        buf[12..44].copy_from_slice(&self.ephemeral_public);
        buf[44..60].copy_from_slice(&self.encrypted_nothing);
        buf[60..76].copy_from_slice(&self.mac1);
        buf[76..92].copy_from_slice(&self.mac2);

        buf
    }

    /// Compute MAC1 under `mac1_key` and return the finished datagram
    pub fn seal(&mut self, mac1_key: &[u8; 32]) -> [u8; Self::SIZE] {
        let mut buf = self.to_bytes();
        self.mac1 = blake2s::mac(mac1_key, &buf[..Self::MAC1_OFFSET]);
        buf[Self::MAC1_OFFSET..Self::MAC1_OFFSET + 16].copy_from_slice(&self.mac1);
        buf
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_exact(data, MessageType::HandshakeResponse, Self::SIZE)?;

        Ok(Self {
            sender_index: read_u32(data, 4),
            receiver_index: read_u32(data, 8),
            ephemeral_public: field(data, 12),
            encrypted_nothing: field(data, 44),
            mac1: field(data, 60),
            mac2: field(data, 76),
        })
    }
}

/// Cookie Reply message (64 bytes)
///
/// ```text
/// type(1) | reserved(3) | receiver_index(4) | nonce(24) | encrypted_cookie(32)
/// ```
///
/// Parsed for logging only; cookies are never stored or used.
#[derive(Debug, Clone)]
pub struct CookieReply {
    pub receiver_index: u32,
    pub nonce: [u8; 24],
    pub encrypted_cookie: [u8; 32], // 16 bytes cookie + 16 bytes tag
}

impl CookieReply {
    /// Size of the cookie reply message
    pub const SIZE: usize = 64;

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_exact(data, MessageType::CookieReply, Self::SIZE)?;

        Ok(Self {
            receiver_index: read_u32(data, 4),
            nonce: field(data, 8),
            encrypted_cookie: field(data, 32),
        })
    }
}

/// Transport Data message header (16 bytes, followed by encrypted payload)
///
/// ```text
/// type(1) | reserved(3) | receiver_index(4) | counter(8) | encrypted_packet(n+16)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub receiver_index: u32,
    pub counter: u64,
}

impl TransportHeader {
    /// Size of the transport header (not including encrypted payload)
    pub const SIZE: usize = 16;

    /// Minimum size of a transport message (header + auth tag)
    pub const MIN_SIZE: usize = Self::SIZE + 16;

    /// Append the encoded header to `buf`
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(MessageType::TransportData as u8);
        buf.extend_from_slice(&[0, 0, 0]); // reserved
        buf.extend_from_slice(&self.receiver_index.to_le_bytes());
        buf.extend_from_slice(&self.counter.to_le_bytes());
    }

    /// Parse header from bytes, returning it with the encrypted remainder
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if data.len() < Self::MIN_SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::MIN_SIZE,
                got: data.len(),
            });
        }

        if data[0] != MessageType::TransportData as u8 {
            return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
        }

        let header = Self {
            receiver_index: read_u32(data, 4),
            counter: read_u64(data, 8),
        };
        Ok((header, &data[Self::SIZE..]))
    }
}

/// Get the message type from a packet
pub fn get_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    match data.first() {
        Some(&b) => MessageType::try_from(b),
        None => Err(ProtocolError::InvalidMessageLength {
            expected: 1,
            got: 0,
        }),
    }
}
