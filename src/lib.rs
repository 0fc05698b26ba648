// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # seqmap: a sequencer-ordered replicated map kernel
//!
//! This crate implements the kernel of a replicated key-value map. Each
//! client holds a full in-memory replica; edits are issued as operations
//! (set, delete, clear), applied optimistically to the local store, handed to
//! a central ordering service, and reconciled against the authoritative
//! sequenced stream as it comes back. The model is last-writer-wins by
//! sequence number: there is no merge of value contents, only a total order
//! of whole-value writes.
//!
//! ## Pending reconciliation
//!
//! The hard part of optimistic application is deciding what to do with each
//! sequenced message while an unbounded number of this replica's own ops are
//! still in flight. The kernel keeps, per key, the queue of pending ids it
//! has issued, plus a queue of pending clears, and derives every decision
//! from them:
//!
//! - An acknowledgement of our own op drains the front of the matching
//!   queue. The store is untouched; it already reflects the op.
//! - A remote op for a key we have pending writes on is dropped. Our writes
//!   are later in the total order, so they win when they sequence.
//! - A remote op while one of our clears is pending is dropped entirely; the
//!   clear will erase everything that precedes it.
//! - A remote clear while we have pending key writes erases everything
//!   *except* those keys, which are re-established with their local values
//!   (the "clear except pending" rule).
//! - Anything else applies directly.
//!
//! Any acknowledgement that does not line up with the pending queues means
//! the replica and the stream have diverged; the kernel reports the
//! violation and poisons itself, and the transport is expected to close the
//! session.
//!
//! The kernel also supports the transport's recovery flows: [`rollback`]
//! reverts an unacknowledged local op in LIFO order, [`try_submit`] re-issues
//! an op after reconnection under a fresh pending id, and
//! [`try_apply_stashed`] replays an op that was persisted before it could be
//! sent.
//!
//! ## Example
//!
//! ```rust
//! use seqmap::{MapKernel, MapOp, MapValue, OpMetadata, SequencedMessage, Transport};
//! use std::{cell::RefCell, rc::Rc};
//!
//! // A transport that parks submitted ops for the host to deliver.
//! #[derive(Clone, Default)]
//! struct Outbox(Rc<RefCell<Vec<(MapOp, OpMetadata)>>>);
//!
//! impl Transport for Outbox {
//!     fn is_attached(&self) -> bool {
//!         true
//!     }
//!     fn submit(&mut self, op: MapOp, metadata: OpMetadata) {
//!         self.0.borrow_mut().push((op, metadata));
//!     }
//! }
//!
//! let outbox = Outbox::default();
//! let mut map = MapKernel::new(outbox.clone());
//!
//! // Optimistic local application: the write is visible immediately.
//! map.set("name", "alice")?;
//! assert_eq!(map.get("name"), Some(&MapValue::from("alice")));
//!
//! // A remote set for the same key arrives before our ack. It is dropped:
//! // our in-flight write is later in the total order and supersedes it.
//! let remote = SequencedMessage {
//!     contents: serde_json::json!({
//!         "type": "set", "key": "name", "value": {"type": "Plain", "value": "bob"},
//!     }),
//!     sequence_number: 10,
//!     client_id: "other".into(),
//!     client_sequence_number: 1,
//! };
//! map.try_process(&remote, false, None)?;
//! assert_eq!(map.get("name"), Some(&MapValue::from("alice")));
//!
//! // Our own op comes back sequenced and the pending bookkeeping drains.
//! let (op, metadata) = outbox.0.borrow_mut().remove(0);
//! let ack = SequencedMessage {
//!     contents: serde_json::to_value(&op)?,
//!     sequence_number: 11,
//!     client_id: "us".into(),
//!     client_sequence_number: 0,
//! };
//! map.try_process(&ack, true, Some(metadata))?;
//! assert_eq!(map.get("name"), Some(&MapValue::from("alice")));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Values, snapshots, attribution
//!
//! Values are either plain JSON payloads or handles to other replicated
//! objects; the [`value`] module wraps both behind [`MapValue`] and a
//! pluggable [`HandleResolver`]. [`MapKernel::serialize`] emits a compact
//! textual snapshot preserving insertion order, and [`MapKernel::populate`]
//! hydrates from it, accepting both the flat schema this crate writes and
//! the nested schema of the directory variant of this data structure. When
//! constructed with tracking enabled, the kernel additionally maintains an
//! [`attribution`] index recording which sequence number last wrote each
//! key.
//!
//! ## Range map
//!
//! The [`rangemap`] module carries an auxiliary primitive used alongside the
//! map: a sorted, merge-on-write interval index assigning values to runs of
//! integer keys.
//!
//! ## Scope
//!
//! The kernel is single-threaded and performs no I/O. Delivery, retry,
//! reconnection, persistence, and identity all belong to the host: the
//! kernel sees them only through the [`Transport`] and [`HandleResolver`]
//! seams and the sequenced messages the host feeds it.
//!
//! [`rollback`]: MapKernel::rollback
//! [`try_submit`]: MapKernel::try_submit
//! [`try_apply_stashed`]: MapKernel::try_apply_stashed
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

pub mod attribution;
mod events;
mod kernel;
mod pending;
pub mod rangemap;
pub mod snapshot;
pub mod value;

pub use attribution::{Attribution, AttributionTable};
pub use events::{ListenerHandle, ValueChanged};
pub use kernel::{
    Detached, InvalidKeyError, KernelError, KernelOptions, MapContents, MapKernel, MapOp,
    OpMetadata, SequencedMessage, Transport,
};
pub use rangemap::{RangeEntry, RangeMap, RangeQuery};
pub use snapshot::{SnapshotEntry, SnapshotError};
pub use value::{HandleResolver, MapValue, OpaqueHandles, SerializedValue, SharedRef, ValueError};
