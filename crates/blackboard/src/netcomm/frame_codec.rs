// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incremental decoder for [`NetworkMessage`] frames.
//!
//! TCP has no message boundaries, and the receiver reads with a timeout so it
//! can notice shutdown. A read may therefore stop anywhere inside a frame; the
//! codec keeps the partial state and resumes on the next call.

use std::io::{self, Read};

use super::message::{FrameHeader, NetworkMessage, HEADER_SIZE};
use crate::error::{Error, Result};

/// Internal state for incremental reading.
#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// Reading the 8-byte header
    ReadingHeader { bytes_read: usize },

    /// Reading the payload announced by `header`
    ReadingBody {
        header: FrameHeader,
        bytes_read: usize,
    },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::ReadingHeader { bytes_read: 0 }
    }
}

/// Frame decoder with partial-read state and statistics.
#[derive(Debug)]
pub struct FrameCodec {
    state: ReadState,
    header_buf: [u8; HEADER_SIZE],
    body: Vec<u8>,
    /// Maximum accepted payload size (anti-OOM protection)
    max_payload: usize,
    frames_decoded: u64,
    bytes_decoded: u64,
    frames_rejected: u64,
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: ReadState::default(),
            header_buf: [0u8; HEADER_SIZE],
            body: Vec::new(),
            max_payload,
            frames_decoded: 0,
            bytes_decoded: 0,
            frames_rejected: 0,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Payload bytes decoded (headers excluded).
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Frames rejected for exceeding `max_payload`.
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Reset the codec state (e.g., after connection reset).
    pub fn reset(&mut self) {
        self.state = ReadState::default();
        self.body.clear();
    }

    /// True while a frame is partially read.
    pub fn is_partial(&self) -> bool {
        match self.state {
            ReadState::ReadingHeader { bytes_read } => bytes_read > 0,
            ReadState::ReadingBody { .. } => true,
        }
    }

    /// Try to decode one complete message.
    ///
    /// Returns:
    /// - `Ok(Some(msg))` - a complete message was decoded
    /// - `Ok(None)` - the read timed out or would block; call again later
    /// - `Err(Error::PayloadTooLarge)` - the header announced an oversized frame
    /// - `Err(Error::Io)` - I/O error or end of stream
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Option<NetworkMessage>> {
        loop {
            match self.state {
                ReadState::ReadingHeader { bytes_read } => {
                    match reader.read(&mut self.header_buf[bytes_read..]) {
                        Ok(0) => {
                            let reason = if bytes_read == 0 {
                                "connection closed"
                            } else {
                                "incomplete frame header"
                            };
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, reason).into());
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < HEADER_SIZE {
                                self.state = ReadState::ReadingHeader { bytes_read: total };
                                continue;
                            }

                            let header = FrameHeader::from_bytes(&self.header_buf);
                            let size = header.payload_size as usize;
                            if size > self.max_payload {
                                self.frames_rejected += 1;
                                self.state = ReadState::default();
                                return Err(Error::PayloadTooLarge {
                                    size,
                                    max: self.max_payload,
                                });
                            }

                            self.body.clear();
                            self.body.resize(size, 0);
                            self.state = ReadState::ReadingBody {
                                header,
                                bytes_read: 0,
                            };
                            if size == 0 {
                                return Ok(Some(self.finish(header)));
                            }
                        }
                        Err(e) if is_retry_later(&e) => return Ok(None),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }

                ReadState::ReadingBody { header, bytes_read } => {
                    match reader.read(&mut self.body[bytes_read..]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "incomplete frame body",
                            )
                            .into());
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < self.body.len() {
                                self.state = ReadState::ReadingBody {
                                    header,
                                    bytes_read: total,
                                };
                                continue;
                            }
                            return Ok(Some(self.finish(header)));
                        }
                        Err(e) if is_retry_later(&e) => return Ok(None),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn finish(&mut self, header: FrameHeader) -> NetworkMessage {
        let payload = std::mem::take(&mut self.body);
        self.frames_decoded += 1;
        self.bytes_decoded += payload.len() as u64;
        self.state = ReadState::default();
        NetworkMessage::new(header.component_id, header.message_type, payload)
    }
}

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
fn is_retry_later(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader yielding scripted chunks, with `WouldBlock` between them.
    struct ChunkedReader {
        chunks: Vec<Vec<u8>>,
        next: usize,
        pending_block: bool,
    }

    impl ChunkedReader {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks,
                next: 0,
                pending_block: false,
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending_block {
                self.pending_block = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let Some(chunk) = self.chunks.get_mut(self.next) else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.next += 1;
                self.pending_block = true;
            }
            Ok(n)
        }
    }

    #[test]
    fn test_decode_simple() {
        let mut codec = FrameCodec::new(1024);
        let frame = NetworkMessage::new(3, 9, b"hello".to_vec()).encode();
        let msg = codec.decode(&mut Cursor::new(frame)).unwrap().unwrap();
        assert_eq!(msg.component_id(), 3);
        assert_eq!(msg.message_type(), 9);
        assert_eq!(msg.payload(), b"hello");
        assert_eq!(codec.frames_decoded(), 1);
        assert_eq!(codec.bytes_decoded(), 5);
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut codec = FrameCodec::new(1024);
        let frame = NetworkMessage::signal(1, 2).encode();
        let msg = codec.decode(&mut Cursor::new(frame)).unwrap().unwrap();
        assert_eq!(msg.payload_size(), 0);
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_decode_multiple() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = Vec::new();
        NetworkMessage::new(1, 1, b"first".to_vec()).encode_into(&mut buf);
        NetworkMessage::new(2, 1, b"second".to_vec()).encode_into(&mut buf);
        let mut cursor = Cursor::new(buf);

        assert_eq!(codec.decode(&mut cursor).unwrap().unwrap().component_id(), 1);
        assert_eq!(codec.decode(&mut cursor).unwrap().unwrap().payload(), b"second");
    }

    #[test]
    fn test_resume_across_would_block() {
        let frame = NetworkMessage::new(4, 2, b"split payload".to_vec()).encode();
        // Split inside the header and inside the body
        let chunks = vec![frame[..3].to_vec(), frame[3..11].to_vec(), frame[11..].to_vec()];
        let mut reader = ChunkedReader::new(chunks);
        let mut codec = FrameCodec::new(1024);

        assert!(codec.decode(&mut reader).unwrap().is_none());
        assert!(codec.is_partial());
        assert!(codec.decode(&mut reader).unwrap().is_none());
        let msg = codec.decode(&mut reader).unwrap().unwrap();
        assert_eq!(msg.payload(), b"split payload");
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_decode_too_large() {
        let mut codec = FrameCodec::new(4);
        let frame = NetworkMessage::new(1, 1, b"too long".to_vec()).encode();
        let err = codec.decode(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { size: 8, max: 4 }));
        assert_eq!(codec.frames_rejected(), 1);
    }

    #[test]
    fn test_eof_mid_frame() {
        let mut codec = FrameCodec::new(1024);
        let frame = NetworkMessage::new(1, 1, b"hello".to_vec()).encode();
        let err = codec.decode(&mut Cursor::new(&frame[..10])).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_reset() {
        let mut codec = FrameCodec::new(1024);
        let frame = NetworkMessage::new(1, 1, b"hello".to_vec()).encode();
        let mut reader = ChunkedReader::new(vec![frame[..4].to_vec()]);
        assert!(codec.decode(&mut reader).unwrap().is_none());
        assert!(codec.is_partial());
        codec.reset();
        assert!(!codec.is_partial());
    }
}
