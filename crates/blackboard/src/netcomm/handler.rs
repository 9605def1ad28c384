// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-component callbacks of a [`NetworkClient`](super::NetworkClient).

use super::NetworkMessage;
use crate::message::Message;

/// Receives traffic and session events for one component id.
///
/// Callbacks run on the client's receiver thread (or the thread calling
/// `disconnect`/`deregister_handler`) with no client lock held, so they may
/// call back into the client. `client_id` is the id given at construction.
pub trait ClientHandler: Send + Sync {
    /// A message for this component arrived.
    fn inbound_received(&self, msg: &Message<NetworkMessage>, client_id: Option<u32>);

    /// The handler was removed from the client.
    fn deregistered(&self, _client_id: Option<u32>) {}

    /// The hello exchange completed.
    fn connection_established(&self, _client_id: Option<u32>) {}

    /// An established session ended (I/O failure or `disconnect`).
    fn connection_died(&self, _client_id: Option<u32>) {}
}
