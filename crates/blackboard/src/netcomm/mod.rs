// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network client extending messages across a TCP stream.
//!
//! # Architecture
//!
//! ```text
//!                      NetworkClient
//!   enqueue() ---> [crossbeam channel] ---> sender thread ---> TCP
//!                                                              |
//!   handlers <--- dispatch by component id <--- receiver thread <-+
//!      |
//!      +--> wake(component_id) ---> enqueue_and_wait() / wait()
//! ```
//!
//! Frames are routed by their 16-bit component id. Component 0 is reserved
//! for the session itself (hello exchange).

mod client;
mod frame_codec;
mod handler;
mod message;

pub use client::{ClientStats, ConnectionState, NetworkClient};
pub use frame_codec::FrameCodec;
pub use handler::ClientHandler;
pub use message::{FrameHeader, NetworkMessage, HEADER_SIZE};

/// Component id reserved for session control frames.
pub const COMPONENT_NETCOMM: u16 = 0;

/// Session hello, payload is the `u16` protocol version.
pub const MSG_HELLO: u16 = 1;

/// Wire protocol version announced in the hello.
pub const PROTOCOL_VERSION: u16 = 2;
