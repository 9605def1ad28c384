// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire message: component-routed payload with an 8-byte header.
//!
//! ```text
//! +------------------+------------------+--------------------+-----------+
//! | component_id u16 | message_type u16 | payload_size u32   | payload   |
//! +------------------+------------------+--------------------+-----------+
//!   all big-endian
//! ```

use std::fmt;
use std::sync::Arc;

use super::{COMPONENT_NETCOMM, MSG_HELLO, PROTOCOL_VERSION};
use crate::error::{Error, Result};

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub component_id: u16,
    pub message_type: u16,
    pub payload_size: u32,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.component_id.to_be_bytes());
        out[2..4].copy_from_slice(&self.message_type.to_be_bytes());
        out[4..8].copy_from_slice(&self.payload_size.to_be_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            component_id: u16::from_be_bytes([buf[0], buf[1]]),
            message_type: u16::from_be_bytes([buf[2], buf[3]]),
            payload_size: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Message exchanged with a remote peer.
///
/// The payload is shared, so cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    component_id: u16,
    message_type: u16,
    payload: Arc<[u8]>,
}

impl NetworkMessage {
    pub fn new(component_id: u16, message_type: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            component_id,
            message_type,
            payload: Arc::from(payload.into()),
        }
    }

    /// Message without payload.
    pub fn signal(component_id: u16, message_type: u16) -> Self {
        Self::new(component_id, message_type, Vec::new())
    }

    /// Session hello carrying our protocol version.
    pub fn hello() -> Self {
        Self::new(
            COMPONENT_NETCOMM,
            MSG_HELLO,
            PROTOCOL_VERSION.to_be_bytes().to_vec(),
        )
    }

    pub fn component_id(&self) -> u16 {
        self.component_id
    }

    pub fn message_type(&self) -> u16 {
        self.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            component_id: self.component_id,
            message_type: self.message_type,
            payload_size: self.payload.len() as u32,
        }
    }

    /// Encoded frame: header followed by payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.header().to_bytes());
        buf.extend_from_slice(&self.payload);
    }

    /// Protocol version announced by a hello, if this is one.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if the frame is not a well-formed hello.
    pub fn hello_version(&self) -> Result<u16> {
        if self.component_id != COMPONENT_NETCOMM || self.message_type != MSG_HELLO {
            return Err(Error::Protocol(format!(
                "expected hello, got component {} type {}",
                self.component_id, self.message_type
            )));
        }
        match *self.payload {
            [hi, lo] => Ok(u16::from_be_bytes([hi, lo])),
            _ => Err(Error::Protocol(format!(
                "hello payload has {} bytes, expected 2",
                self.payload.len()
            ))),
        }
    }
}

impl fmt::Debug for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMessage")
            .field("component_id", &self.component_id)
            .field("message_type", &self.message_type)
            .field("payload_size", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let msg = NetworkMessage::new(0x0102, 0x0304, b"abc".to_vec());
        let frame = msg.encode();
        assert_eq!(frame.len(), HEADER_SIZE + 3);
        assert_eq!(&frame[..8], &[0x01, 0x02, 0x03, 0x04, 0, 0, 0, 3]);
        assert_eq!(&frame[8..], b"abc");
    }

    #[test]
    fn test_hello_version() {
        assert_eq!(NetworkMessage::hello().hello_version().unwrap(), PROTOCOL_VERSION);
        assert!(matches!(
            NetworkMessage::signal(5, MSG_HELLO).hello_version(),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            NetworkMessage::new(COMPONENT_NETCOMM, MSG_HELLO, vec![1]).hello_version(),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_header_from_bytes() {
        let h = FrameHeader::from_bytes(&[0, 7, 0, 1, 0, 0, 1, 0]);
        assert_eq!(
            h,
            FrameHeader {
                component_id: 7,
                message_type: 1,
                payload_size: 256
            }
        );
    }
}
