// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader/writer handles on a shared interface instance.
//!
//! Each handle keeps a local copy of the record. `read()` refreshes it from
//! the shared snapshot; `write()` (writer only) publishes it. Both are single
//! lock operations on the shared record, so a reader never observes a record
//! that is half old and half new.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use super::{FieldValue, InterfaceMessage, Schema, SchemaHash, SharedInterface};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::message_queue::MessageQueueGuard;
use crate::registry::{BlackBoard, InterfaceInfo};

/// Access mode of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    Read,
    Write,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => write!(f, "reader"),
            OpenMode::Write => write!(f, "writer"),
        }
    }
}

/// Handle on one (type, id) interface instance.
///
/// Dropping the handle closes it.
pub struct Interface<S: Schema> {
    shared: Arc<SharedInterface<S>>,
    registry: BlackBoard,
    handle_id: u64,
    mode: OpenMode,
    owner: String,
    id: String,
    data: S::Data,
    read_serial: u64,
    timestamp: Option<SystemTime>,
    closed: bool,
}

impl<S: Schema> Interface<S> {
    pub(crate) fn new(
        shared: Arc<SharedInterface<S>>,
        registry: BlackBoard,
        handle_id: u64,
        mode: OpenMode,
        owner: String,
        id: String,
    ) -> Self {
        let snapshot = shared.snapshot();
        Self {
            shared,
            registry,
            handle_id,
            mode,
            owner,
            id,
            data: snapshot.data,
            read_serial: snapshot.serial,
            timestamp: snapshot.timestamp,
            closed: false,
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn type_name(&self) -> &'static str {
        S::TYPE_NAME
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `"Type::id"`.
    pub fn uid(&self) -> String {
        format!("{}::{}", S::TYPE_NAME, self.id)
    }

    /// Registry-unique number of this handle.
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_writer(&self) -> bool {
        self.mode == OpenMode::Write
    }

    pub fn hash(&self) -> SchemaHash {
        S::hash()
    }

    // ========================================================================
    // Record access
    // ========================================================================

    /// Local copy of the record.
    pub fn data(&self) -> &S::Data {
        &self.data
    }

    /// Mutable local copy; changes become visible to others on `write()`.
    pub fn data_mut(&mut self) -> &mut S::Data {
        &mut self.data
    }

    pub fn set_data(&mut self, data: S::Data) {
        self.data = data;
    }

    /// Refresh the local copy from the shared record.
    pub fn read(&mut self) -> Result<()> {
        self.ensure_open()?;
        let snapshot = self.shared.snapshot();
        self.data = snapshot.data;
        self.read_serial = snapshot.serial;
        self.timestamp = snapshot.timestamp;
        Ok(())
    }

    /// Publish the local copy to the shared record.
    ///
    /// # Errors
    ///
    /// [`Error::NotWriter`] on a reader handle.
    pub fn write(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.is_writer() {
            return Err(Error::NotWriter);
        }
        let (serial, published) = self.shared.publish(&self.data);
        self.read_serial = serial;
        self.timestamp = Some(published);
        self.registry.notifier().notify();
        log::trace!("[blackboard] {} wrote serial {}", self.uid(), self.read_serial);
        Ok(())
    }

    /// True if a record newer than the last `read()`/`write()` was published.
    pub fn changed(&self) -> bool {
        self.shared.serial() != self.read_serial
    }

    /// Block until [`Interface::changed`] holds or `timeout` elapses.
    pub fn wait_changed(&self, timeout: Duration) -> bool {
        let notifier = self.registry.notifier();
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let seen = notifier.current();
            if self.changed() {
                return true;
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return false;
            }
            notifier.wait_past(seen, remaining);
        }
    }

    /// Publish time of the record last read or written by this handle.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Publish counter of the record last read or written by this handle.
    pub fn serial(&self) -> u64 {
        self.read_serial
    }

    /// Copy another handle's local record into this one.
    pub fn copy_values(&mut self, other: &Interface<S>) -> Result<()> {
        self.ensure_open()?;
        self.data = other.data;
        Ok(())
    }

    /// Copy from a type-erased handle.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] if `other` is not an `Interface<S>`.
    pub fn copy_values_from(&mut self, other: &dyn AnyInterface) -> Result<()> {
        match other.as_any().downcast_ref::<Interface<S>>() {
            Some(typed) => self.copy_values(typed),
            None => Err(Error::TypeMismatch {
                expected: S::TYPE_NAME.to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Schema fields paired with the local values.
    pub fn field_values(&self) -> Vec<(&'static str, FieldValue)> {
        S::fields()
            .iter()
            .map(|f| f.name)
            .zip(S::values(&self.data))
            .collect()
    }

    // ========================================================================
    // Registry bookkeeping
    // ========================================================================

    pub fn has_writer(&self) -> bool {
        self.shared.has_writer()
    }

    pub fn num_readers(&self) -> usize {
        self.info().map_or(0, |info| info.readers.len())
    }

    /// Owner of the writer handle, if one is open.
    pub fn writer(&self) -> Option<String> {
        self.info().and_then(|info| info.writer)
    }

    /// Owners of the open reader handles.
    pub fn readers(&self) -> Vec<String> {
        self.info().map(|info| info.readers).unwrap_or_default()
    }

    fn info(&self) -> Option<InterfaceInfo> {
        self.registry.info(S::TYPE_NAME, &self.id)
    }

    // ========================================================================
    // Message queue
    // ========================================================================

    /// Build a message by type name.
    pub fn create_message(&self, type_name: &str) -> Result<Message<S::Message>> {
        S::create_message(type_name).map(Message::new)
    }

    /// Send a command to the writer.
    ///
    /// Records this handle's owner as the message sender.
    ///
    /// # Errors
    ///
    /// - [`Error::WriterCannotEnqueue`] on the writer handle
    /// - [`Error::MessageRejected`] if the schema does not accept the message
    /// - [`Error::NoWriter`] if no writer is open
    /// - [`Error::AlreadyQueued`] if the message is a member of a queue
    pub fn msgq_enqueue(&self, msg: &Message<S::Message>) -> Result<u32> {
        self.ensure_open()?;
        if self.is_writer() {
            return Err(Error::WriterCannotEnqueue);
        }
        if !S::message_valid(msg.payload()) {
            log::debug!(
                "[blackboard] {} rejected message {}",
                self.uid(),
                msg.payload().type_name()
            );
            return Err(Error::MessageRejected {
                interface: S::TYPE_NAME.to_string(),
                message: msg.payload().type_name().to_string(),
            });
        }
        self.shared
            .enqueue_if_writer(msg, self.owner.as_str())?
            .ok_or_else(|| Error::NoWriter {
                type_name: S::TYPE_NAME.to_string(),
                id: self.id.clone(),
            })
    }

    /// Enqueue a fresh copy of `msg` and return the copy.
    pub fn msgq_enqueue_copy(&self, msg: &Message<S::Message>) -> Result<Message<S::Message>> {
        let copy = msg.duplicate();
        self.msgq_enqueue(&copy)?;
        Ok(copy)
    }

    pub fn msgq_first(&self) -> Result<Option<Message<S::Message>>> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().first())
    }

    pub fn msgq_pop(&self) -> Result<Option<Message<S::Message>>> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().pop())
    }

    pub fn msgq_empty(&self) -> Result<bool> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().is_empty())
    }

    pub fn msgq_size(&self) -> Result<usize> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().size())
    }

    pub fn msgq_flush(&self) -> Result<usize> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().flush())
    }

    pub fn msgq_remove(&self, msg: &Message<S::Message>) -> Result<bool> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().remove(msg))
    }

    pub fn msgq_remove_id(&self, id: u32) -> Result<bool> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().remove_id(id))
    }

    /// Lock the queue for batch processing.
    pub fn msgq_lock(&self) -> Result<MessageQueueGuard<'_, S::Message>> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().lock())
    }

    pub fn msgq_try_lock(&self) -> Result<Option<MessageQueueGuard<'_, S::Message>>> {
        self.ensure_writer()?;
        Ok(self.shared.msgq().try_lock())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the handle. Equivalent to dropping it.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.registry.release(S::TYPE_NAME, &self.id, self.handle_id);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InterfaceClosed);
        }
        Ok(())
    }

    fn ensure_writer(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.is_writer() {
            return Err(Error::NotWriter);
        }
        Ok(())
    }
}

impl<S: Schema> Drop for Interface<S> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<S: Schema> fmt::Debug for Interface<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("uid", &self.uid())
            .field("mode", &self.mode)
            .field("owner", &self.owner)
            .field("serial", &self.read_serial)
            .field("data", &self.data)
            .finish()
    }
}

// ============================================================================
// Type erasure
// ============================================================================

/// Object-safe view of any interface handle.
pub trait AnyInterface: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn id(&self) -> &str;
    fn owner(&self) -> &str;
    fn is_writer(&self) -> bool;
    fn hash(&self) -> SchemaHash;
    fn field_values(&self) -> Vec<(&'static str, FieldValue)>;
    fn as_any(&self) -> &dyn Any;
}

impl<S: Schema> AnyInterface for Interface<S> {
    fn type_name(&self) -> &'static str {
        S::TYPE_NAME
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn is_writer(&self) -> bool {
        self.mode == OpenMode::Write
    }

    fn hash(&self) -> SchemaHash {
        S::hash()
    }

    fn field_values(&self) -> Vec<(&'static str, FieldValue)> {
        Interface::field_values(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
