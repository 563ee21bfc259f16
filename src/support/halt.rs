//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailsync.
//
// Mailsync is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailsync is distributed  in the hope that it will  be useful, but WITHOUT
// ANY WARRANTY; without even the  implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailsync. If not, see <http://www.gnu.org/licenses/>.

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
#[cfg(test)]
use std::sync::atomic::AtomicUsize;

/// The cooperative halt signal shared by the sync driver and the rollback
/// engine.
///
/// The flag is created at process start, handed to every engine as an
/// explicit `Arc`, and polled only at step boundaries. A long-running loop
/// that observes the flag finishes its current atomic unit and exits
/// cleanly; nothing is ever abandoned half-applied.
#[derive(Debug, Default)]
pub struct HaltFlag {
    halted: AtomicBool,
    /// When non-zero, the flag sets itself once this many further polls
    /// have been observed. Lets tests stop a loop at an exact step boundary.
    #[cfg(test)]
    trip_after: AtomicUsize,
}

impl HaltFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a cooperative halt.
    pub fn set(&self) {
        self.halted.store(true, SeqCst);
    }

    /// Clears the signal so that halted work can be resumed.
    pub fn clear(&self) {
        self.halted.store(false, SeqCst);
    }

    /// Polled by the driver and rollback engine after each atomic step.
    pub fn is_set(&self) -> bool {
        #[cfg(test)]
        if self.trip_after.load(SeqCst) > 0
            && 1 == self.trip_after.fetch_sub(1, SeqCst)
        {
            self.set();
        }

        self.halted.load(SeqCst)
    }

    /// Arranges for the flag to set itself upon the `n`th subsequent poll.
    #[cfg(test)]
    pub fn trip_after(&self, n: usize) {
        self.trip_after.store(n, SeqCst);
    }
}
