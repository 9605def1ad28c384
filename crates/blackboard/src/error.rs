// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by the queue, interface, registry and network layers.
//!
//! Variants are grouped the way callers are expected to react to them:
//!
//! - **Contract violations** mean the caller broke a locking or ownership rule.
//!   They are never recoverable by retrying the same call.
//! - **Resource conflicts** are reported at the call site; the caller may retry
//!   with different parameters.
//! - **Transport failures** describe the state of a network session.

use std::fmt;
use std::io;

/// Errors returned by blackboard operations.
///
/// # Example
///
/// ```rust
/// use blackboard::interfaces::JoystickInterface;
/// use blackboard::{BlackBoard, Error};
///
/// let bb = BlackBoard::new();
/// let _writer = bb.open_for_writing::<JoystickInterface>("Joystick", "driver")?;
///
/// match bb.open_for_writing::<JoystickInterface>("Joystick", "intruder") {
///     Err(Error::WriterExists { .. }) => {}
///     other => panic!("unexpected: {:?}", other.map(|_| ())),
/// }
/// # Ok::<(), blackboard::Error>(())
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Contract violations
    // ========================================================================
    /// Message is already a member of a queue.
    AlreadyQueued,
    /// Cursor does not belong to the lock session it is used with.
    NotLocked,
    /// Cursor denotes the end position where an element was required.
    NullTarget,
    /// A handler already occupies this component id.
    HandlerAlreadyRegistered(u16),
    /// Operation requires the writer handle.
    NotWriter,
    /// The writer handle cannot enqueue messages to itself.
    WriterCannotEnqueue,
    /// Handle was already closed.
    InterfaceClosed,

    // ========================================================================
    // Resource conflicts
    // ========================================================================
    /// A writer handle is already open for this interface.
    WriterExists { type_name: String, id: String },
    /// Schema hash of the handle differs from the backing record.
    HashMismatch { type_name: String, id: String },
    /// Two handles are not of the same schema type.
    TypeMismatch { expected: String, found: String },
    /// Message enqueued on an interface that has no writer.
    NoWriter { type_name: String, id: String },
    /// Schema does not accept this message type.
    MessageRejected { interface: String, message: String },
    /// Unknown message or interface type name.
    UnknownType(String),
    /// Configured limit reached (e.g. maximum number of interfaces).
    ResourceLimitExceeded(String),

    // ========================================================================
    // Transport
    // ========================================================================
    /// Client is not connected.
    NotConnected,
    /// Client is already connecting or connected.
    AlreadyConnected,
    /// Connection died; the session must be re-established.
    ConnectionDead,
    /// `interrupt_connect()` aborted a pending connect.
    ConnectInterrupted,
    /// Handshake did not complete in time.
    ConnectTimeout,
    /// No message for the component arrived in time.
    WaitTimeout { component_id: u16 },
    /// Peer violated the wire protocol.
    Protocol(String),
    /// Payload exceeds the configured frame limit.
    PayloadTooLarge { size: usize, max: usize },
    /// I/O error with underlying cause.
    Io(io::Error),

    // ========================================================================
    // Configuration
    // ========================================================================
    /// Invalid configuration value.
    Config(String),
}

impl Error {
    /// True for errors caused by a broken locking or ownership rule.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::AlreadyQueued
                | Error::NotLocked
                | Error::NullTarget
                | Error::HandlerAlreadyRegistered(_)
                | Error::NotWriter
                | Error::WriterCannotEnqueue
                | Error::InterfaceClosed
        )
    }

    /// True for errors describing the state of a network session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::AlreadyConnected
                | Error::ConnectionDead
                | Error::ConnectInterrupted
                | Error::ConnectTimeout
                | Error::WaitTimeout { .. }
                | Error::Protocol(_)
                | Error::PayloadTooLarge { .. }
                | Error::Io(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Contract
            Error::AlreadyQueued => write!(f, "Message already enqueued in another message queue"),
            Error::NotLocked => write!(f, "Message queue must be locked for this operation"),
            Error::NullTarget => write!(f, "Cursor denotes the end element"),
            Error::HandlerAlreadyRegistered(cid) => {
                write!(f, "Handler already registered for component {}", cid)
            }
            Error::NotWriter => write!(f, "Operation requires the writer handle"),
            Error::WriterCannotEnqueue => {
                write!(f, "Writer handle cannot enqueue messages to itself")
            }
            Error::InterfaceClosed => write!(f, "Interface handle already closed"),
            // Resource
            Error::WriterExists { type_name, id } => {
                write!(f, "Writer already exists for {}::{}", type_name, id)
            }
            Error::HashMismatch { type_name, id } => {
                write!(f, "Schema hash mismatch for {}::{}", type_name, id)
            }
            Error::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Error::NoWriter { type_name, id } => {
                write!(f, "No writer exists for {}::{}", type_name, id)
            }
            Error::MessageRejected { interface, message } => {
                write!(f, "Message type {} not valid for {}", message, interface)
            }
            Error::UnknownType(name) => write!(f, "Unknown type: {}", name),
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            // Transport
            Error::NotConnected => write!(f, "Not connected"),
            Error::AlreadyConnected => write!(f, "Already connected or connecting"),
            Error::ConnectionDead => write!(f, "Connection died"),
            Error::ConnectInterrupted => write!(f, "Connect interrupted"),
            Error::ConnectTimeout => write!(f, "Connect timed out"),
            Error::WaitTimeout { component_id } => {
                write!(f, "Timed out waiting for component {}", component_id)
            }
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::PayloadTooLarge { size, max } => {
                write!(f, "Payload too large: {} bytes (max {})", size, max)
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
            // Config
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
