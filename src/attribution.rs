// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Attribution: which sequence number last wrote each key.
//!
//! The table is optional and only erected when the kernel is configured with
//! tracking enabled. It follows acknowledged state, not optimistic state:
//! entries move on sequenced acknowledgements and are wiped by acknowledged
//! clears. Snapshots carry the table inline with each entry, so hydration
//! restores it when both sides have tracking enabled.

use ahash::RandomState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Provenance of the write that established a key's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Attribution {
    /// Written by a sequenced op.
    Op {
        /// Sequence number the ordering service assigned to the write.
        seq: u64,
    },
}

impl Attribution {
    pub fn seq(&self) -> u64 {
        match self {
            Attribution::Op { seq } => *seq,
        }
    }
}

/// Key to attribution mapping, in the order entries were established.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AttributionTable {
    entries: IndexMap<String, Attribution, RandomState>,
}

impl AttributionTable {
    pub fn get(&self, key: &str) -> Option<Attribution> {
        self.entries.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Attribution)> {
        self.entries.iter().map(|(key, a)| (key.as_str(), *a))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn record(&mut self, key: &str, seq: u64) {
        self.entries
            .insert(key.to_owned(), Attribution::Op { seq });
    }

    pub(crate) fn set(&mut self, key: String, attribution: Attribution) {
        self.entries.insert(key, attribution);
    }

    pub(crate) fn remove(&mut self, key: &str) {
        self.entries.shift_remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_overwrite() {
        let mut table = AttributionTable::default();
        table.record("a", 4);
        table.record("a", 9);
        assert_eq!(table.get("a"), Some(Attribution::Op { seq: 9 }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let mut table = AttributionTable::default();
        table.record("a", 1);
        table.record("b", 2);
        table.remove("a");
        assert_eq!(table.get("a"), None);
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn wire_shape() {
        let json = serde_json::to_value(Attribution::Op { seq: 17 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "op", "seq": 17}));
        let back: Attribution = serde_json::from_value(json).unwrap();
        assert_eq!(back.seq(), 17);
    }
}
