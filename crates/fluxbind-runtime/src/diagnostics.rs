#![forbid(unsafe_code)]

//! Bounded log of contained failures.
//!
//! Most binding failures never reach the caller: a bad property read makes a
//! node UNSET, an impossible reverse write is skipped. They are logged with
//! `tracing` and kept here so hosts and tests can inspect them.

use std::collections::VecDeque;

use fluxbind_core::BindError;

#[derive(Debug)]
pub(crate) struct Diagnostics {
    entries: VecDeque<BindError>,
    capacity: usize,
    total: u64,
}

impl Diagnostics {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    pub(crate) fn push(&mut self, err: BindError) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(err);
        self.total += 1;
    }

    pub(crate) fn snapshot(&self) -> Vec<BindError> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn take(&mut self) -> Vec<BindError> {
        self.entries.drain(..).collect()
    }

    /// Everything ever reported, including evicted entries.
    pub(crate) fn total(&self) -> u64 {
        self.total
    }
}
