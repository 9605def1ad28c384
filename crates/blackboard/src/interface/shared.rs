// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backing storage of one (type, id) interface instance.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::Schema;
use crate::error::Result;
use crate::message::Message;
use crate::message_queue::MessageQueue;

/// Published snapshot of an interface record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Record<D> {
    pub data: D,
    /// Incremented by every `write()`; 0 = never written.
    pub serial: u64,
    pub timestamp: Option<SystemTime>,
}

/// Shared record plus inbound queue, owned by the registry entry and by every
/// open handle.
pub(crate) struct SharedInterface<S: Schema> {
    record: RwLock<Record<S::Data>>,
    msgq: MessageQueue<S::Message>,
    writer_present: AtomicBool,
}

impl<S: Schema> SharedInterface<S> {
    pub(crate) fn new() -> Self {
        Self {
            record: RwLock::new(Record {
                data: S::Data::default(),
                serial: 0,
                timestamp: None,
            }),
            msgq: MessageQueue::new(),
            writer_present: AtomicBool::new(false),
        }
    }

    /// Consistent copy of the current record.
    pub(crate) fn snapshot(&self) -> Record<S::Data> {
        *self.record.read()
    }

    /// Replace the record as one atomic step. Returns the new serial and
    /// publish time.
    pub(crate) fn publish(&self, data: &S::Data) -> (u64, SystemTime) {
        let now = SystemTime::now();
        let mut record = self.record.write();
        record.data = *data;
        record.serial += 1;
        record.timestamp = Some(now);
        (record.serial, now)
    }

    pub(crate) fn serial(&self) -> u64 {
        self.record.read().serial
    }

    pub(crate) fn msgq(&self) -> &MessageQueue<S::Message> {
        &self.msgq
    }

    pub(crate) fn has_writer(&self) -> bool {
        self.writer_present.load(Ordering::Acquire)
    }

    /// Append `msg` stamped with `sender` if a writer is present.
    ///
    /// The check and the append happen under the queue lock, the same lock
    /// `detach_writer` holds while flushing. Returns `Ok(None)` without
    /// touching the message when no writer is open.
    pub(crate) fn enqueue_if_writer(&self, msg: &Message<S::Message>, sender: &str) -> Result<Option<u32>> {
        let mut queue = self.msgq.lock();
        if !self.has_writer() {
            return Ok(None);
        }
        msg.set_sender(sender);
        queue.push_back(msg).map(Some)
    }
}

/// Type-erased view the registry keeps of every instance.
pub(crate) trait ErasedShared: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn type_name(&self) -> &'static str;
    fn serial(&self) -> u64;
    fn timestamp(&self) -> Option<SystemTime>;
    fn attach_writer(&self);
    /// Clear the writer flag and flush pending messages as one step.
    fn detach_writer(&self) -> usize;
}

impl<S: Schema> ErasedShared for SharedInterface<S> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        S::TYPE_NAME
    }

    fn serial(&self) -> u64 {
        SharedInterface::serial(self)
    }

    fn timestamp(&self) -> Option<SystemTime> {
        self.record.read().timestamp
    }

    fn attach_writer(&self) {
        self.writer_present.store(true, Ordering::Release);
    }

    fn detach_writer(&self) -> usize {
        let mut queue = self.msgq.lock();
        self.writer_present.store(false, Ordering::Release);
        let dropped = queue.retain(|_| false);
        if dropped > 0 {
            log::debug!("[msgq] queue {} flushed {} message(s)", self.msgq.uid(), dropped);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{SwitchInterface, SwitchMessage};

    #[test]
    fn test_publish_returns_stored_timestamp() {
        let shared = SharedInterface::<SwitchInterface>::new();
        let data = shared.snapshot().data;
        let (serial, published) = shared.publish(&data);
        let record = shared.snapshot();
        assert_eq!(serial, 1);
        assert_eq!(record.serial, serial);
        assert_eq!(record.timestamp, Some(published));
    }

    #[test]
    fn test_enqueue_requires_writer() {
        let shared = SharedInterface::<SwitchInterface>::new();
        let msg = Message::new(SwitchMessage::EnableSwitch);
        assert!(shared.enqueue_if_writer(&msg, "ui").unwrap().is_none());
        assert!(!msg.is_queued());
        assert!(msg.sender().is_none());

        shared.attach_writer();
        assert_eq!(shared.enqueue_if_writer(&msg, "ui").unwrap(), Some(1));
        assert_eq!(msg.sender(), Some("ui"));

        assert_eq!(shared.detach_writer(), 1);
        assert!(!msg.is_queued());
        assert!(shared.msgq().is_empty());
        let late = Message::new(SwitchMessage::DisableSwitch);
        assert!(shared.enqueue_if_writer(&late, "ui").unwrap().is_none());
        assert!(shared.msgq().is_empty());
    }
}
