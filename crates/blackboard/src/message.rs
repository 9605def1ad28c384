// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted command messages.
//!
//! A [`Message`] is a cheap, cloneable handle. Cloning it is "taking a
//! reference"; the payload is released when the last handle (caller or queue)
//! is dropped.
//!
//! # Queue membership
//!
//! ```text
//!   marker == 0            marker == queue uid
//!  +-----------+  claim   +-----------------+
//!  | unqueued  | -------> |  in one queue   |
//!  +-----------+ <------- +-----------------+
//!                 release
//! ```
//!
//! Claiming is a compare-and-swap on the marker, so a message can never be a
//! member of two queues at once, even when two threads enqueue it concurrently.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Marker value of a message that is not a member of any queue.
pub const UNQUEUED: u64 = 0;

struct MessageInner<M> {
    payload: M,
    /// Uid of the owning queue, `UNQUEUED` when free.
    queue_marker: AtomicU64,
    /// Queue-local id assigned at enqueue time (0 = never enqueued).
    id: AtomicU32,
    /// Microseconds since the Unix epoch of the last enqueue (0 = never).
    enqueued_us: AtomicU64,
    sender: OnceLock<String>,
}

/// Shared handle to a queued command.
pub struct Message<M> {
    inner: Arc<MessageInner<M>>,
}

impl<M> Message<M> {
    /// Wrap a payload in a new, unqueued message.
    pub fn new(payload: M) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                payload,
                queue_marker: AtomicU64::new(UNQUEUED),
                id: AtomicU32::new(0),
                enqueued_us: AtomicU64::new(0),
                sender: OnceLock::new(),
            }),
        }
    }

    /// Wrap a payload and record the sender identity up front.
    pub fn with_sender(payload: M, sender: impl Into<String>) -> Self {
        let msg = Self::new(payload);
        msg.set_sender(sender);
        msg
    }

    /// Borrow the payload.
    #[inline]
    pub fn payload(&self) -> &M {
        &self.inner.payload
    }

    /// Id assigned by the last queue this message was enqueued in.
    ///
    /// Zero if the message was never enqueued.
    #[inline]
    pub fn id(&self) -> u32 {
        self.inner.id.load(Ordering::Acquire)
    }

    /// True while the message is a member of a queue.
    #[inline]
    pub fn is_queued(&self) -> bool {
        self.inner.queue_marker.load(Ordering::Acquire) != UNQUEUED
    }

    /// Uid of the owning queue, or [`UNQUEUED`].
    #[inline]
    pub fn queue_marker(&self) -> u64 {
        self.inner.queue_marker.load(Ordering::Acquire)
    }

    /// Number of live handles (queue entries included).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Identity of the component that sent this message, if recorded.
    pub fn sender(&self) -> Option<&str> {
        self.inner.sender.get().map(String::as_str)
    }

    /// Record the sender identity. Only the first call has an effect.
    pub fn set_sender(&self, sender: impl Into<String>) {
        let _ = self.inner.sender.set(sender.into());
    }

    /// Wall-clock time of the last enqueue.
    pub fn time_enqueued(&self) -> Option<SystemTime> {
        match self.inner.enqueued_us.load(Ordering::Acquire) {
            0 => None,
            us => Some(UNIX_EPOCH + Duration::from_micros(us)),
        }
    }

    /// True if both handles refer to the same message.
    #[inline]
    pub fn ptr_eq(&self, other: &Message<M>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Take membership for `queue_uid`.
    pub(crate) fn claim(&self, queue_uid: u64) -> Result<()> {
        self.inner
            .queue_marker
            .compare_exchange(UNQUEUED, queue_uid, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::AlreadyQueued)
    }

    /// Give up membership after a failed insert or on removal.
    pub(crate) fn release(&self) {
        self.inner.queue_marker.store(UNQUEUED, Ordering::Release);
    }

    /// Stamp id and enqueue time; called with the queue lock held.
    pub(crate) fn mark_enqueued(&self, id: u32) {
        self.inner.id.store(id, Ordering::Release);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1)
            .max(1);
        self.inner.enqueued_us.store(now, Ordering::Release);
    }
}

impl<M: Clone> Message<M> {
    /// Fresh, unqueued copy of this message's payload and sender.
    ///
    /// Used to re-submit a command while the original is still queued.
    pub fn duplicate(&self) -> Self {
        let copy = Self::new(self.inner.payload.clone());
        if let Some(sender) = self.sender() {
            copy.set_sender(sender);
        }
        copy
    }
}

impl<M> Clone for Message<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for Message<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id())
            .field("queued", &self.is_queued())
            .field("sender", &self.sender())
            .field("payload", &self.inner.payload)
            .finish()
    }
}
