// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-interface FIFO of [`Message`]s.
//!
//! The queue offers two tiers of operations:
//!
//! - **Atomic** operations on [`MessageQueue`] (`enqueue`, `remove`,
//!   `remove_id`, `flush`, `size`, `first`, `pop`) take the queue mutex
//!   internally and release it before returning.
//! - **Batch** operations on [`MessageQueueGuard`] (cursor traversal,
//!   `insert_after`, `remove_at`, `retain`, ...) are only reachable through the
//!   guard returned by [`MessageQueue::lock`] or [`MessageQueue::try_lock`].
//!   Holding the guard is holding the lock.
//!
//! Do not call the atomic tier from a thread that holds the guard of the same
//! queue; the mutex is not reentrant. The guard offers `remove`/`remove_id` for
//! that case.
//!
//! # Cursors
//!
//! A [`Cursor`] is a plain position stamped with the queue identity and the
//! lock epoch it was created under. Every lock acquisition starts a new epoch,
//! so a cursor carried across an unlock is rejected with [`Error::NotLocked`]
//! instead of silently pointing at whatever now lives at that position.
//!
//! ```text
//! begin()                      end()
//!   |                            |
//!   v                            v
//! +----+    +----+    +----+
//! | #1 | -> | #2 | -> | #3 | -> (end)
//! +----+    +----+    +----+
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::message::Message;

/// Source of process-unique queue identities (0 is reserved for "unqueued").
static NEXT_QUEUE_UID: AtomicU64 = AtomicU64::new(1);

/// Allocate a membership marker value. Also used by the network client's
/// outbound queue.
pub(crate) fn next_queue_uid() -> u64 {
    NEXT_QUEUE_UID.fetch_add(1, Ordering::Relaxed)
}

struct Entry<M> {
    id: u32,
    msg: Message<M>,
}

struct QueueState<M> {
    entries: VecDeque<Entry<M>>,
    next_id: u32,
    epoch: u64,
}

impl<M> QueueState<M> {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
            epoch: 0,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        // 0 is the "never enqueued" id
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Insert an already claimed message at `index`.
    fn insert(&mut self, index: usize, msg: Message<M>) -> u32 {
        let id = self.allocate_id();
        msg.mark_enqueued(id);
        self.entries.insert(index, Entry { id, msg });
        id
    }

    fn take(&mut self, index: usize) -> Option<Message<M>> {
        self.entries.remove(index).map(|entry| {
            entry.msg.release();
            entry.msg
        })
    }

    fn position_of(&self, msg: &Message<M>) -> Option<usize> {
        self.entries.iter().position(|e| e.msg.ptr_eq(msg))
    }

    fn position_of_id(&self, id: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.msg.release();
        }
        count
    }
}

/// Thread-safe FIFO of messages owned by one interface.
pub struct MessageQueue<M> {
    uid: u64,
    state: Mutex<QueueState<M>>,
}

impl<M> MessageQueue<M> {
    /// Create an empty queue. Ids start at 1.
    pub fn new() -> Self {
        Self {
            uid: next_queue_uid(),
            state: Mutex::new(QueueState::new()),
        }
    }

    /// Process-unique identity, used as the membership marker of queued messages.
    #[inline]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Append a message at the tail.
    ///
    /// Returns the queue-local id assigned to the message.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyQueued`] if the message is a member of any queue.
    pub fn enqueue(&self, msg: &Message<M>) -> Result<u32> {
        msg.claim(self.uid)?;
        let mut state = self.state.lock();
        let tail = state.entries.len();
        Ok(state.insert(tail, msg.clone()))
    }

    /// Remove the given message. No-op if it is not in this queue.
    ///
    /// Returns true if the message was removed.
    pub fn remove(&self, msg: &Message<M>) -> bool {
        let mut state = self.state.lock();
        match state.position_of(msg) {
            Some(index) => state.take(index).is_some(),
            None => false,
        }
    }

    /// Remove the message with the given id. No-op if absent.
    pub fn remove_id(&self, id: u32) -> bool {
        let mut state = self.state.lock();
        match state.position_of_id(id) {
            Some(index) => state.take(index).is_some(),
            None => false,
        }
    }

    /// Remove and release every message.
    pub fn flush(&self) -> usize {
        let count = self.state.lock().clear();
        if count > 0 {
            log::debug!("[msgq] queue {} flushed {} message(s)", self.uid, count);
        }
        count
    }

    /// Number of queued messages at the instant of the call.
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True if no message is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Handle to the oldest message without removing it.
    pub fn first(&self) -> Option<Message<M>> {
        self.state.lock().entries.front().map(|e| e.msg.clone())
    }

    /// Remove and return the oldest message.
    pub fn pop(&self) -> Option<Message<M>> {
        self.state.lock().take(0)
    }

    /// Acquire the queue lock, blocking until it is free.
    pub fn lock(&self) -> MessageQueueGuard<'_, M> {
        let mut state = self.state.lock();
        state.epoch = state.epoch.wrapping_add(1);
        MessageQueueGuard {
            uid: self.uid,
            state,
        }
    }

    /// Acquire the queue lock if it is free.
    pub fn try_lock(&self) -> Option<MessageQueueGuard<'_, M>> {
        let mut state = self.state.try_lock()?;
        state.epoch = state.epoch.wrapping_add(1);
        Some(MessageQueueGuard {
            uid: self.uid,
            state,
        })
    }

    /// True if some thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Drop for MessageQueue<M> {
    fn drop(&mut self) {
        // Externally held handles become enqueueable again.
        self.state.get_mut().clear();
    }
}

impl<M> fmt::Debug for MessageQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("uid", &self.uid)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Position in a locked queue.
///
/// Only meaningful together with the guard it was obtained from. Equality
/// compares positions, not message contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cursor {
    queue_uid: u64,
    epoch: u64,
    pos: usize,
}

impl Cursor {
    /// Zero-based position in the queue.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Exclusive access to a [`MessageQueue`]; the lock is released on drop.
pub struct MessageQueueGuard<'a, M> {
    uid: u64,
    state: MutexGuard<'a, QueueState<M>>,
}

impl<'a, M> MessageQueueGuard<'a, M> {
    fn check(&self, cursor: Cursor) -> Result<()> {
        if cursor.queue_uid != self.uid || cursor.epoch != self.state.epoch {
            return Err(Error::NotLocked);
        }
        Ok(())
    }

    fn cursor_at(&self, pos: usize) -> Cursor {
        Cursor {
            queue_uid: self.uid,
            epoch: self.state.epoch,
            pos,
        }
    }

    /// Cursor on the oldest message (equals `end()` when empty).
    pub fn begin(&self) -> Cursor {
        self.cursor_at(0)
    }

    /// Cursor one past the newest message.
    pub fn end(&self) -> Cursor {
        self.cursor_at(self.state.entries.len())
    }

    /// True if the cursor denotes the end position.
    pub fn is_end(&self, cursor: Cursor) -> Result<bool> {
        self.check(cursor)?;
        Ok(cursor.pos >= self.state.entries.len())
    }

    /// Message at the cursor.
    ///
    /// # Errors
    ///
    /// [`Error::NotLocked`] for a cursor from another lock session,
    /// [`Error::NullTarget`] for the end cursor.
    pub fn get(&self, cursor: Cursor) -> Result<&Message<M>> {
        self.check(cursor)?;
        self.state
            .entries
            .get(cursor.pos)
            .map(|e| &e.msg)
            .ok_or(Error::NullTarget)
    }

    /// Queue-local id of the message at the cursor.
    pub fn id_at(&self, cursor: Cursor) -> Result<u32> {
        self.check(cursor)?;
        self.state
            .entries
            .get(cursor.pos)
            .map(|e| e.id)
            .ok_or(Error::NullTarget)
    }

    /// Step forward by one element; stays on `end()` once reached.
    pub fn next(&self, cursor: Cursor) -> Result<Cursor> {
        self.advance(cursor, 1)
    }

    /// Step forward by `n` elements, stopping early at `end()`.
    pub fn advance(&self, cursor: Cursor, n: usize) -> Result<Cursor> {
        self.check(cursor)?;
        let len = self.state.entries.len();
        Ok(self.cursor_at(cursor.pos.saturating_add(n).min(len)))
    }

    /// Insert `msg` immediately after the element at `cursor`.
    ///
    /// # Errors
    ///
    /// In order of precedence: [`Error::NotLocked`] for a foreign cursor,
    /// [`Error::NullTarget`] for the end cursor, [`Error::AlreadyQueued`] if
    /// the message is a member of any queue.
    pub fn insert_after(&mut self, cursor: Cursor, msg: &Message<M>) -> Result<u32> {
        self.check(cursor)?;
        if cursor.pos >= self.state.entries.len() {
            return Err(Error::NullTarget);
        }
        msg.claim(self.uid)?;
        Ok(self.state.insert(cursor.pos + 1, msg.clone()))
    }

    /// Append a message at the tail.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyQueued`] if the message is a member of any queue.
    pub fn push_back(&mut self, msg: &Message<M>) -> Result<u32> {
        msg.claim(self.uid)?;
        let tail = self.state.entries.len();
        Ok(self.state.insert(tail, msg.clone()))
    }

    /// Remove the element at `cursor` and return it.
    ///
    /// Afterwards the same cursor denotes the element that followed the
    /// removed one.
    pub fn remove_at(&mut self, cursor: Cursor) -> Result<Message<M>> {
        self.check(cursor)?;
        self.state.take(cursor.pos).ok_or(Error::NullTarget)
    }

    /// Remove the given message. No-op if absent.
    pub fn remove(&mut self, msg: &Message<M>) -> bool {
        match self.state.position_of(msg) {
            Some(index) => self.state.take(index).is_some(),
            None => false,
        }
    }

    /// Remove the message with the given id. No-op if absent.
    pub fn remove_id(&mut self, id: u32) -> bool {
        match self.state.position_of_id(id) {
            Some(index) => self.state.take(index).is_some(),
            None => false,
        }
    }

    /// Oldest message, if any.
    pub fn front(&self) -> Option<&Message<M>> {
        self.state.entries.front().map(|e| &e.msg)
    }

    /// Remove and return the oldest message.
    pub fn pop_front(&mut self) -> Option<Message<M>> {
        self.state.take(0)
    }

    /// Keep only messages for which `keep` returns true.
    ///
    /// Returns the number of removed messages. Order of the survivors is kept.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Message<M>) -> bool,
    {
        let before = self.state.entries.len();
        self.state.entries.retain(|entry| {
            let kept = keep(&entry.msg);
            if !kept {
                entry.msg.release();
            }
            kept
        });
        before - self.state.entries.len()
    }

    /// Iterate over queued messages in processing order.
    pub fn iter(&self) -> impl Iterator<Item = &Message<M>> + '_ {
        self.state.entries.iter().map(|e| &e.msg)
    }

    /// Ids of the queued messages in processing order.
    pub fn ids(&self) -> Vec<u32> {
        self.state.entries.iter().map(|e| e.id).collect()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    /// True if no message is queued.
    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// Release the lock. Equivalent to dropping the guard.
    pub fn unlock(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn filled(n: u32) -> (MessageQueue<u32>, Vec<Message<u32>>) {
        let q = MessageQueue::new();
        let msgs: Vec<_> = (1..=n).map(Message::new).collect();
        for m in &msgs {
            q.enqueue(m).unwrap();
        }
        (q, msgs)
    }

    #[test]
    fn test_enqueue_assigns_increasing_ids() {
        let q = MessageQueue::new();
        let a = Message::new("a");
        let b = Message::new("b");
        assert_eq!(q.enqueue(&a).unwrap(), 1);
        assert_eq!(q.enqueue(&b).unwrap(), 2);
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(a.queue_marker(), q.uid());
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn test_fifo_iteration() {
        let (q, _) = filled(5);
        let guard = q.lock();
        let payloads: Vec<u32> = guard.iter().map(|m| *m.payload()).collect();
        assert_eq!(payloads, vec![1, 2, 3, 4, 5]);

        let mut cur = guard.begin();
        let mut last = 0;
        while !guard.is_end(cur).unwrap() {
            let id = guard.id_at(cur).unwrap();
            assert!(id > last);
            last = id;
            cur = guard.next(cur).unwrap();
        }
        assert_eq!(cur, guard.end());
    }

    #[test]
    fn test_enqueue_holds_reference() {
        let q = MessageQueue::new();
        let msg = Message::new(1u8);
        q.enqueue(&msg).unwrap();
        assert_eq!(msg.ref_count(), 2);
        q.remove(&msg);
        assert_eq!(msg.ref_count(), 1);
        assert!(!msg.is_queued());
    }

    #[test]
    fn test_remove_missing_id_is_noop() {
        let (q, _) = filled(3);
        assert!(!q.remove_id(99));
        assert_eq!(q.size(), 3);
    }

    #[test]
    fn test_remove_unknown_message_is_noop() {
        let (q, _) = filled(2);
        assert!(!q.remove(&Message::new(1)));
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn test_already_queued_in_other_queue() {
        let a = MessageQueue::new();
        let b = MessageQueue::new();
        let msg = Message::new(7u32);
        a.enqueue(&msg).unwrap();

        assert!(matches!(b.enqueue(&msg), Err(Error::AlreadyQueued)));
        assert_eq!(b.size(), 0);
        assert!(matches!(a.enqueue(&msg), Err(Error::AlreadyQueued)));
        assert_eq!(a.size(), 1);
    }

    #[test]
    fn test_reenqueue_after_removal() {
        let a = MessageQueue::new();
        let b = MessageQueue::new();
        let msg = Message::new(7u32);
        a.enqueue(&msg).unwrap();
        assert!(a.remove(&msg));
        assert_eq!(b.enqueue(&msg).unwrap(), 1);
    }

    #[test]
    fn test_insert_after_end_is_null_target() {
        let (q, _) = filled(2);
        let mut guard = q.lock();
        let end = guard.end();
        let msg = Message::new(9);
        assert!(matches!(guard.insert_after(end, &msg), Err(Error::NullTarget)));
        assert!(!msg.is_queued());

        let empty: MessageQueue<u32> = MessageQueue::new();
        let mut guard = empty.lock();
        let end = guard.end();
        assert!(matches!(guard.insert_after(end, &msg), Err(Error::NullTarget)));
    }

    #[test]
    fn test_insert_after_middle() {
        let (q, _) = filled(3);
        let mut guard = q.lock();
        let first = guard.begin();
        let id = guard.insert_after(first, &Message::new(10)).unwrap();
        assert_eq!(id, 4);
        let payloads: Vec<u32> = guard.iter().map(|m| *m.payload()).collect();
        assert_eq!(payloads, vec![1, 10, 2, 3]);
        assert_eq!(guard.ids(), vec![1, 4, 2, 3]);
    }

    #[test]
    fn test_insert_after_tail() {
        let (q, _) = filled(2);
        let mut guard = q.lock();
        let last = guard.advance(guard.begin(), 1).unwrap();
        guard.insert_after(last, &Message::new(3)).unwrap();
        let tail = guard.advance(guard.begin(), 2).unwrap();
        assert_eq!(*guard.get(tail).unwrap().payload(), 3);
    }

    #[test]
    fn test_insert_after_already_queued() {
        let (q, msgs) = filled(2);
        let mut guard = q.lock();
        let first = guard.begin();
        assert!(matches!(
            guard.insert_after(first, &msgs[1]),
            Err(Error::AlreadyQueued)
        ));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_stale_cursor_not_locked() {
        let (q, _) = filled(2);
        let stale = {
            let guard = q.lock();
            guard.begin()
        };
        let mut guard = q.lock();
        assert!(matches!(guard.get(stale), Err(Error::NotLocked)));
        assert!(matches!(guard.next(stale), Err(Error::NotLocked)));
        assert!(matches!(
            guard.insert_after(stale, &Message::new(5)),
            Err(Error::NotLocked)
        ));
    }

    #[test]
    fn test_foreign_cursor_not_locked() {
        let (a, _) = filled(1);
        let (b, _) = filled(1);
        let ga = a.lock();
        let gb = b.lock();
        assert!(matches!(gb.get(ga.begin()), Err(Error::NotLocked)));
    }

    #[test]
    fn test_get_end_is_null_target() {
        let (q, _) = filled(1);
        let guard = q.lock();
        assert!(matches!(guard.get(guard.end()), Err(Error::NullTarget)));
    }

    #[test]
    fn test_advance_stops_at_end() {
        let (q, _) = filled(3);
        let guard = q.lock();
        let cur = guard.advance(guard.begin(), 10).unwrap();
        assert_eq!(cur, guard.end());
        assert_eq!(guard.next(cur).unwrap(), guard.end());
    }

    #[test]
    fn test_cursor_equality_is_positional() {
        let empty: MessageQueue<u8> = MessageQueue::new();
        let guard = empty.lock();
        assert_eq!(guard.begin(), guard.end());
    }

    #[test]
    fn test_remove_at_keeps_order_and_ids() {
        let (q, msgs) = filled(3);
        {
            let mut guard = q.lock();
            let second = guard.next(guard.begin()).unwrap();
            let removed = guard.remove_at(second).unwrap();
            assert!(removed.ptr_eq(&msgs[1]));
            assert_eq!(*guard.get(second).unwrap().payload(), 3);
            guard.unlock();
        }
        let guard = q.lock();
        assert_eq!(guard.ids(), vec![1, 3]);
        drop(guard);

        q.flush();
        assert_eq!(q.size(), 0);
        assert!(msgs.iter().all(|m| !m.is_queued()));
    }

    #[test]
    fn test_retain() {
        let (q, msgs) = filled(6);
        let removed = q.lock().retain(|m| m.payload() % 2 == 0);
        assert_eq!(removed, 3);
        assert_eq!(q.size(), 3);
        assert!(!msgs[0].is_queued());
        assert!(msgs[1].is_queued());
    }

    #[test]
    fn test_first_and_pop() {
        let (q, _) = filled(2);
        assert_eq!(*q.first().unwrap().payload(), 1);
        assert_eq!(q.size(), 2);
        let popped = q.pop().unwrap();
        assert_eq!(*popped.payload(), 1);
        assert!(!popped.is_queued());
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_flush() {
        let (q, _) = filled(3);
        q.flush();
        assert_eq!(q.enqueue(&Message::new(0)).unwrap(), 4);
    }

    #[test]
    fn test_try_lock_contended() {
        let q = Arc::new(MessageQueue::<u8>::new());
        let guard = q.lock();
        let q2 = Arc::clone(&q);
        let got = thread::spawn(move || q2.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!got);
        assert!(q.is_locked());
        drop(guard);
        assert!(q.try_lock().is_some());
    }

    #[test]
    fn test_drop_releases_messages() {
        let msg = Message::new(1u8);
        {
            let q = MessageQueue::new();
            q.enqueue(&msg).unwrap();
        }
        assert!(!msg.is_queued());
        assert_eq!(msg.ref_count(), 1);
    }
}
