// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Bookkeeping for locally submitted but unacknowledged operations.
//!
//! Every op submitted while attached is assigned a pending id from a single
//! monotonic counter. Key ops queue their ids per key (oldest first), clears
//! queue theirs in a dedicated list. Acknowledgements and resubmissions pop
//! from the front, rollbacks pop from the back; every pop states the id it
//! expects, and a mismatch signals a protocol bug that the kernel treats as
//! fatal.

use ahash::RandomState;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};

/// Ids of in-flight ops for one key, oldest first.
///
/// One or two unacknowledged writes per key is the overwhelmingly common
/// case, so the list stays inline until a burst grows it.
type PendingIds = SmallVec<[u64; 2]>;

/// A checked pop observed an id other than the one the caller expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingMismatch {
    pub expected: u64,
    /// The id actually at the queue position, if the queue was non-empty.
    pub found: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct PendingTracker {
    /// Incremented before every assignment; -1 means no id has been issued.
    counter: i64,
    keys: HashMap<String, PendingIds, RandomState>,
    clears: VecDeque<u64>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self {
            counter: -1,
            keys: HashMap::default(),
            clears: VecDeque::new(),
        }
    }

    /// Issues the next pending id. Ids strictly increase and never repeat
    /// within a kernel instance, even across rollbacks.
    pub fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter as u64
    }

    pub fn push_key(&mut self, key: &str, id: u64) {
        self.keys.entry(key.to_owned()).or_default().push(id);
    }

    pub fn push_clear(&mut self, id: u64) {
        self.clears.push_back(id);
    }

    pub fn pop_key_front(&mut self, key: &str, expected: u64) -> Result<(), PendingMismatch> {
        let Some(ids) = self.keys.get_mut(key) else {
            return Err(PendingMismatch {
                expected,
                found: None,
            });
        };
        let found = ids.first().copied();
        if found != Some(expected) {
            return Err(PendingMismatch { expected, found });
        }
        ids.remove(0);
        if ids.is_empty() {
            self.keys.remove(key);
        }
        Ok(())
    }

    pub fn pop_key_back(&mut self, key: &str, expected: u64) -> Result<(), PendingMismatch> {
        let Some(ids) = self.keys.get_mut(key) else {
            return Err(PendingMismatch {
                expected,
                found: None,
            });
        };
        let found = ids.last().copied();
        if found != Some(expected) {
            return Err(PendingMismatch { expected, found });
        }
        ids.pop();
        if ids.is_empty() {
            self.keys.remove(key);
        }
        Ok(())
    }

    pub fn pop_clear_front(&mut self, expected: u64) -> Result<(), PendingMismatch> {
        let found = self.clears.front().copied();
        if found != Some(expected) {
            return Err(PendingMismatch { expected, found });
        }
        self.clears.pop_front();
        Ok(())
    }

    pub fn pop_clear_back(&mut self, expected: u64) -> Result<(), PendingMismatch> {
        let found = self.clears.back().copied();
        if found != Some(expected) {
            return Err(PendingMismatch { expected, found });
        }
        self.clears.pop_back();
        Ok(())
    }

    pub fn has_pending_clear(&self) -> bool {
        !self.clears.is_empty()
    }

    pub fn first_pending_clear(&self) -> Option<u64> {
        self.clears.front().copied()
    }

    pub fn has_pending_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn has_pending_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn pending_ids_for(&self, key: &str) -> Option<&[u64]> {
        self.keys.get(key).map(|ids| ids.as_slice())
    }

    /// True when nothing is in flight. The id counter is deliberately not
    /// reset; issued ids stay burned.
    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.keys.is_empty() && self.clears.is_empty()
    }
}
