// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide "some interface changed" notification.
//!
//! Every `write()` bumps a monotonic counter and wakes all sleepers. Waiters
//! remember the counter value they last saw and sleep until it moves, so a
//! notification that fires between "check" and "sleep" is never lost.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Monotonic change counter with blocking wait.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    counter: Mutex<u64>,
    condvar: Condvar,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change and wake every waiter.
    pub fn notify(&self) {
        let mut counter = self.counter.lock();
        *counter = counter.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Current counter value.
    pub fn current(&self) -> u64 {
        *self.counter.lock()
    }

    /// Block until the counter differs from `seen` or `timeout` elapses.
    ///
    /// Returns true if a change was observed.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut counter = self.counter.lock();
        while *counter == seen {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut counter, deadline).timed_out() {
                        return *counter != seen;
                    }
                }
                None => self.condvar.wait(&mut counter),
            }
        }
        true
    }
}
