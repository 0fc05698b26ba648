// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The map kernel: local state, pending reconciliation, and op processing.
//!
//! Every public mutation applies to the local store immediately and, while
//! the replica is attached, also hands an op to the [`Transport`] together
//! with opaque [`OpMetadata`] that comes back on acknowledgement, resubmit,
//! or rollback. Inbound sequenced traffic flows through
//! [`MapKernel::try_process`], where the pending tables decide whether a
//! message must be applied, dropped as an acknowledgement of our own work, or
//! dropped because in-flight local writes supersede it.
//!
//! The kernel is single-threaded and performs no I/O; the transport owns
//! delivery, retry, and reconnection. On a protocol-level inconsistency (an
//! acknowledgement that does not match the head of a pending queue, a local
//! op with no pending record, metadata of the wrong shape) the kernel poisons
//! itself: the failed call reports the violation and every later processing
//! call fails fast with [`KernelError::Poisoned`]. The transport is expected
//! to tear the session down at that point.

use crate::{
    attribution::{Attribution, AttributionTable},
    events::{EventRegistry, ListenerHandle, ValueChanged},
    pending::{PendingMismatch, PendingTracker},
    snapshot::{self, SnapshotEntry, SnapshotError},
    value::{HandleResolver, MapValue, OpaqueHandles, SerializedValue, ValueError},
};
use ahash::RandomState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The store shape: an insertion-ordered mapping from key to value.
pub type MapContents = IndexMap<String, MapValue, RandomState>;

/// A wire operation on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MapOp {
    /// Establish or overwrite the value at `key`.
    Set { key: String, value: SerializedValue },
    /// Remove the value at `key`.
    Delete { key: String },
    /// Erase the whole map.
    Clear,
}

impl MapOp {
    fn kind(&self) -> &'static str {
        match self {
            MapOp::Set { .. } => "set",
            MapOp::Delete { .. } => "delete",
            MapOp::Clear => "clear",
        }
    }

    /// Decodes op contents from the shared channel. `Ok(None)` when the type
    /// tag names an op this kernel does not implement (some other layer owns
    /// it); `Err` when a known op is malformed.
    fn from_contents(contents: &serde_json::Value) -> Result<Option<Self>, KernelError> {
        match contents.get("type").and_then(|t| t.as_str()) {
            Some("set" | "delete" | "clear") => serde_json::from_value(contents.clone())
                .map(Some)
                .map_err(|err| KernelError::MalformedOp(err.to_string())),
            _ => Ok(None),
        }
    }
}

/// A message as delivered by the ordering service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedMessage {
    /// The op, still in channel form; ops for other layers pass through
    /// [`MapKernel::try_process`] unhandled.
    pub contents: serde_json::Value,
    /// Total order position assigned by the sequencer.
    pub sequence_number: u64,
    /// The submitting client.
    pub client_id: String,
    /// The submitting client's own counter for this message.
    pub client_sequence_number: u64,
}

/// Metadata the kernel attaches to every locally submitted op.
///
/// The transport holds it opaquely and hands it back on acknowledgement
/// ([`MapKernel::try_process`] with `local = true`), on reconnection
/// ([`MapKernel::try_submit`]), and on [`MapKernel::rollback`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpMetadata {
    /// A set that introduced its key.
    Add { pending_id: u64 },
    /// A set over an existing value, or a delete.
    Edit {
        pending_id: u64,
        /// The value the key held before the op; absent for a delete of an
        /// absent key.
        previous_value: Option<MapValue>,
    },
    /// A clear, carrying the full prior contents for rollback.
    Clear {
        pending_id: u64,
        previous_map: Option<MapContents>,
    },
}

impl OpMetadata {
    pub fn pending_id(&self) -> u64 {
        match self {
            OpMetadata::Add { pending_id }
            | OpMetadata::Edit { pending_id, .. }
            | OpMetadata::Clear { pending_id, .. } => *pending_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            OpMetadata::Add { .. } => "add",
            OpMetadata::Edit { .. } => "edit",
            OpMetadata::Clear { .. } => "clear",
        }
    }
}

/// The kernel's seam to the delivery layer.
pub trait Transport {
    /// Whether this replica is attached to an ordering service. Detached
    /// replicas mutate locally without generating ops.
    fn is_attached(&self) -> bool;

    /// Hands an op and its metadata to the delivery layer.
    fn submit(&mut self, op: MapOp, metadata: OpMetadata);
}

/// Transport for a replica that is not attached to an ordering service.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl Transport for Detached {
    fn is_attached(&self) -> bool {
        false
    }

    fn submit(&mut self, _op: MapOp, _metadata: OpMetadata) {}
}

/// Error for a key that fails boundary validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidKeyError;

impl fmt::Display for InvalidKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("map keys must be non-empty")
    }
}

impl std::error::Error for InvalidKeyError {}

/// Errors surfaced by op processing.
///
/// The variants for which [`KernelError::is_fatal`] returns true poison the
/// kernel; they indicate the sequenced stream and the local pending tables
/// have diverged, which no amount of further processing can repair.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// An acknowledgement or resubmission did not match the expected end of a
    /// pending queue.
    PendingIdMismatch {
        expected: u64,
        found: Option<u64>,
    },
    /// A local key op was sequenced but nothing was pending for its key.
    NoPendingForLocalOp { key: String },
    /// A local key op issued after a clear was sequenced before it.
    LocalOpAfterPendingClear { id: u64, first_clear: u64 },
    /// Metadata of the wrong shape accompanied an op.
    MetadataMismatch {
        op: &'static str,
        metadata: &'static str,
    },
    /// A local op was delivered without its metadata.
    MissingMetadata,
    /// Op kind the kernel does not implement, where one was required.
    UnsupportedOp(String),
    /// A known op kind whose body did not decode.
    MalformedOp(String),
    /// A value payload the kernel cannot decode.
    Value(ValueError),
    /// The kernel saw an earlier fatal error and refuses further traffic.
    Poisoned,
}

impl KernelError {
    /// Whether this error leaves the kernel unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::PendingIdMismatch { .. }
                | KernelError::NoPendingForLocalOp { .. }
                | KernelError::LocalOpAfterPendingClear { .. }
                | KernelError::MetadataMismatch { .. }
                | KernelError::MissingMetadata
        )
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::PendingIdMismatch { expected, found } => match found {
                Some(found) => {
                    write!(f, "pending id mismatch: expected {expected}, found {found}")
                }
                None => write!(f, "pending id mismatch: expected {expected}, queue empty"),
            },
            KernelError::NoPendingForLocalOp { key } => {
                write!(f, "local op for key {key:?} has no pending record")
            }
            KernelError::LocalOpAfterPendingClear { id, first_clear } => write!(
                f,
                "local op {id} sequenced out of order with pending clear {first_clear}"
            ),
            KernelError::MetadataMismatch { op, metadata } => {
                write!(f, "{op} op delivered with {metadata} metadata")
            }
            KernelError::MissingMetadata => f.write_str("local op delivered without metadata"),
            KernelError::UnsupportedOp(kind) => write!(f, "unsupported op kind {kind:?}"),
            KernelError::MalformedOp(reason) => write!(f, "malformed op: {reason}"),
            KernelError::Value(err) => write!(f, "value: {err}"),
            KernelError::Poisoned => f.write_str("kernel poisoned by an earlier protocol error"),
        }
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KernelError::Value(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValueError> for KernelError {
    fn from(err: ValueError) -> Self {
        KernelError::Value(err)
    }
}

impl From<PendingMismatch> for KernelError {
    fn from(err: PendingMismatch) -> Self {
        KernelError::PendingIdMismatch {
            expected: err.expected,
            found: err.found,
        }
    }
}

/// Construction-time configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOptions {
    /// Track which sequence number last wrote each key.
    pub track_attribution: bool,
}

/// A replica of the map.
///
/// See the [crate docs](crate) for the replication model and an end-to-end
/// example.
pub struct MapKernel<T, R = OpaqueHandles> {
    store: MapContents,
    pending: PendingTracker,
    attribution: Option<AttributionTable>,
    events: EventRegistry,
    transport: T,
    resolver: R,
    poisoned: bool,
}

impl<T, R> fmt::Debug for MapKernel<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapKernel")
            .field("store", &self.store)
            .field("pending", &self.pending)
            .field("attribution", &self.attribution)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> MapKernel<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, OpaqueHandles, KernelOptions::default())
    }
}

impl<T: Transport, R: HandleResolver> MapKernel<T, R> {
    pub fn with_options(transport: T, resolver: R, options: KernelOptions) -> Self {
        Self {
            store: MapContents::default(),
            pending: PendingTracker::new(),
            attribution: options.track_attribution.then(AttributionTable::default),
            events: EventRegistry::default(),
            transport,
            resolver,
            poisoned: false,
        }
    }

    // ---- reads ----

    pub fn get(&self, key: &str) -> Option<&MapValue> {
        self.store.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Keys in insertion order. Overwriting a key does not move it; deleting
    /// and re-setting it does.
    pub fn keys(&self) -> impl ExactSizeIterator<Item = &str> {
        self.store.keys().map(String::as_str)
    }

    /// Values in key insertion order.
    pub fn values(&self) -> impl ExactSizeIterator<Item = &MapValue> {
        self.store.values()
    }

    /// Key-value pairs in insertion order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = (&str, &MapValue)> {
        self.store.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn for_each(&self, mut f: impl FnMut(&str, &MapValue)) {
        for (key, value) in &self.store {
            f(key, value);
        }
    }

    /// Attribution for one key. `None` when tracking is disabled or the key
    /// has no acknowledged write.
    pub fn attribution(&self, key: &str) -> Option<Attribution> {
        self.attribution.as_ref()?.get(key)
    }

    /// The whole attribution table; `None` when tracking is disabled.
    pub fn all_attribution(&self) -> Option<&AttributionTable> {
        self.attribution.as_ref()
    }

    /// Ids of in-flight local ops for `key`, oldest first.
    #[doc(hidden)]
    pub fn pending_ids_for(&self, key: &str) -> Option<&[u64]> {
        self.pending.pending_ids_for(key)
    }

    /// Whether a local clear is awaiting acknowledgement.
    #[doc(hidden)]
    pub fn has_pending_clear(&self) -> bool {
        self.pending.has_pending_clear()
    }

    // ---- events ----

    /// Subscribes to `valueChanged`; fired on every effective set or delete.
    pub fn on_value_changed(
        &mut self,
        listener: impl FnMut(&ValueChanged, bool) + 'static,
    ) -> ListenerHandle {
        self.events.on_value_changed(listener)
    }

    /// Subscribes to `clear`; fired on every wholesale erasure.
    pub fn on_clear(&mut self, listener: impl FnMut(bool) + 'static) -> ListenerHandle {
        self.events.on_clear(listener)
    }

    pub fn unsubscribe(&mut self, handle: ListenerHandle) -> bool {
        self.events.unsubscribe(handle)
    }

    // ---- local mutation ----

    /// Establishes or overwrites the value at `key`.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MapValue>,
    ) -> Result<(), InvalidKeyError> {
        let key = key.into();
        validate_key(&key)?;
        let value = value.into();
        let wire = value.to_wire(&self.resolver);
        let previous = self.set_core(key.clone(), value, true);
        if self.transport.is_attached() {
            let id = self.pending.next_id();
            self.pending.push_key(&key, id);
            let metadata = match previous {
                None => OpMetadata::Add { pending_id: id },
                Some(previous_value) => OpMetadata::Edit {
                    pending_id: id,
                    previous_value: Some(previous_value),
                },
            };
            self.transport.submit(MapOp::Set { key, value: wire }, metadata);
        }
        Ok(())
    }

    /// Removes `key`; reports whether it was present. The op is submitted
    /// either way so absent keys are still deleted on remote replicas.
    pub fn delete(&mut self, key: &str) -> Result<bool, InvalidKeyError> {
        validate_key(key)?;
        let previous_value = self.delete_core(key, true);
        let existed = previous_value.is_some();
        if self.transport.is_attached() {
            let id = self.pending.next_id();
            self.pending.push_key(key, id);
            self.transport.submit(
                MapOp::Delete {
                    key: key.to_owned(),
                },
                OpMetadata::Edit {
                    pending_id: id,
                    previous_value,
                },
            );
        }
        Ok(existed)
    }

    /// Erases the whole map. The submitted metadata carries a clone of the
    /// prior contents so the op can be rolled back.
    pub fn clear(&mut self) {
        let previous_map = self.transport.is_attached().then(|| self.store.clone());
        self.clear_core(true);
        if let Some(previous_map) = previous_map {
            let id = self.pending.next_id();
            self.pending.push_clear(id);
            self.transport.submit(
                MapOp::Clear,
                OpMetadata::Clear {
                    pending_id: id,
                    previous_map: Some(previous_map),
                },
            );
        }
    }

    // ---- sequenced traffic ----

    /// Applies one sequenced message. `local` marks acknowledgements of this
    /// replica's own ops, which must arrive with the metadata handed to the
    /// transport at submission.
    ///
    /// Returns `Ok(false)` without touching anything when the contents name
    /// an op kind the kernel does not implement.
    pub fn try_process(
        &mut self,
        message: &SequencedMessage,
        local: bool,
        metadata: Option<OpMetadata>,
    ) -> Result<bool, KernelError> {
        self.guard()?;
        let Some(op) = MapOp::from_contents(&message.contents)? else {
            return Ok(false);
        };
        let result = match &op {
            MapOp::Clear => self.process_clear(local, metadata),
            MapOp::Set { .. } | MapOp::Delete { .. } => {
                self.process_key_op(&op, message.sequence_number, local, metadata)
            }
        };
        self.seal(result).map(|()| true)
    }

    /// Re-submits an op after reconnection, rotating its pending id. The
    /// fresh metadata (same prior-value payload, new id) goes back to the
    /// transport. Returns `Ok(true)` for every op kind the kernel owns.
    pub fn try_submit(
        &mut self,
        op: &MapOp,
        metadata: OpMetadata,
    ) -> Result<bool, KernelError> {
        self.guard()?;
        let result = match op {
            MapOp::Set { key, .. } | MapOp::Delete { key } => {
                self.resubmit_key_op(op, key, metadata)
            }
            MapOp::Clear => self.resubmit_clear(metadata),
        };
        self.seal(result).map(|()| true)
    }

    /// Replays a stashed op as if it were newly issued locally: applies the
    /// effect, allocates a fresh pending id, and returns fresh metadata for
    /// the transport to submit with.
    pub fn try_apply_stashed(
        &mut self,
        contents: &serde_json::Value,
    ) -> Result<OpMetadata, KernelError> {
        self.guard()?;
        let Some(op) = MapOp::from_contents(contents)? else {
            let kind = contents
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing>");
            return Err(KernelError::UnsupportedOp(kind.to_owned()));
        };
        match op {
            MapOp::Set { key, value } => {
                let value = MapValue::from_wire(value, &self.resolver)?;
                let previous = self.set_core(key.clone(), value, true);
                let id = self.pending.next_id();
                self.pending.push_key(&key, id);
                Ok(match previous {
                    None => OpMetadata::Add { pending_id: id },
                    Some(previous_value) => OpMetadata::Edit {
                        pending_id: id,
                        previous_value: Some(previous_value),
                    },
                })
            }
            MapOp::Delete { key } => {
                let previous_value = self.delete_core(&key, true);
                let id = self.pending.next_id();
                self.pending.push_key(&key, id);
                Ok(OpMetadata::Edit {
                    pending_id: id,
                    previous_value,
                })
            }
            MapOp::Clear => {
                let previous_map = self.store.clone();
                self.clear_core(true);
                let id = self.pending.next_id();
                self.pending.push_clear(id);
                Ok(OpMetadata::Clear {
                    pending_id: id,
                    previous_map: Some(previous_map),
                })
            }
        }
    }

    /// Reverts one unacknowledged local op. Ops must be rolled back in
    /// reverse submission order; the matching pending id is popped from the
    /// tail of its queue.
    pub fn rollback(&mut self, op: &MapOp, metadata: OpMetadata) -> Result<(), KernelError> {
        self.guard()?;
        let result = self.rollback_inner(op, metadata);
        self.seal(result)
    }

    // ---- snapshots ----

    /// Emits the textual snapshot: a flat JSON object of key to wire value in
    /// insertion order, with attribution iff tracking is enabled.
    pub fn serialize(&self) -> Result<String, SnapshotError> {
        let mut entries = snapshot::SnapshotEntries::default();
        for (key, value) in &self.store {
            let wire = value.to_snapshot(&self.resolver);
            entries.insert(
                key.clone(),
                SnapshotEntry {
                    kind: wire.kind,
                    value: wire.value,
                    attribution: self.attribution.as_ref().and_then(|table| table.get(key)),
                },
            );
        }
        snapshot::encode(&entries)
    }

    /// Replaces the store with the contents of a snapshot (either schema the
    /// crate's [snapshot module](crate::snapshot) accepts). Attribution is
    /// restored when tracking is enabled and the snapshot carries it.
    pub fn populate(&mut self, text: &str) -> Result<(), SnapshotError> {
        let entries = snapshot::decode(text)?;
        // hydrate into fresh tables first so a malformed entry leaves the
        // kernel observably unchanged
        let mut store = MapContents::default();
        let mut attribution = self
            .attribution
            .as_ref()
            .map(|_| AttributionTable::default());
        for (key, entry) in entries {
            let value = MapValue::from_wire(
                SerializedValue {
                    kind: entry.kind,
                    value: entry.value,
                },
                &self.resolver,
            )
            .map_err(SnapshotError::Value)?;
            if let (Some(table), Some(a)) = (attribution.as_mut(), entry.attribution) {
                table.set(key.clone(), a);
            }
            store.insert(key, value);
        }
        self.store = store;
        self.attribution = attribution;
        Ok(())
    }

    // ---- internals ----

    fn guard(&self) -> Result<(), KernelError> {
        if self.poisoned {
            Err(KernelError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn seal(&mut self, result: Result<(), KernelError>) -> Result<(), KernelError> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.poisoned = true;
            }
        }
        result
    }

    fn set_core(&mut self, key: String, value: MapValue, local: bool) -> Option<MapValue> {
        let previous = self.store.insert(key.clone(), value);
        self.events.emit_value_changed(
            &ValueChanged {
                key,
                previous_value: previous.clone(),
            },
            local,
        );
        previous
    }

    fn delete_core(&mut self, key: &str, local: bool) -> Option<MapValue> {
        let previous = self.store.shift_remove(key);
        if let Some(previous_value) = &previous {
            self.events.emit_value_changed(
                &ValueChanged {
                    key: key.to_owned(),
                    previous_value: Some(previous_value.clone()),
                },
                local,
            );
        }
        previous
    }

    fn clear_core(&mut self, local: bool) {
        self.store.clear();
        self.events.emit_clear(local);
    }

    fn process_key_op(
        &mut self,
        op: &MapOp,
        seq: u64,
        local: bool,
        metadata: Option<OpMetadata>,
    ) -> Result<(), KernelError> {
        let key = match op {
            MapOp::Set { key, .. } | MapOp::Delete { key } => key.as_str(),
            MapOp::Clear => unreachable!("clear ops take the clear path"),
        };

        // An unacknowledged local clear shields the store from every key op:
        // whatever precedes the clear will be erased when the clear is
        // acknowledged, and whatever follows is already reflected locally.
        if let Some(first_clear) = self.pending.first_pending_clear() {
            if local {
                let id = key_metadata_id(metadata)?;
                if id >= first_clear {
                    return Err(KernelError::LocalOpAfterPendingClear { id, first_clear });
                }
                // the ack still drains its pending entry
                self.pending.pop_key_front(key, id)?;
            }
            return Ok(());
        }

        if self.pending.has_pending_key(key) {
            if local {
                let id = key_metadata_id(metadata)?;
                self.pending.pop_key_front(key, id)?;
                // the acknowledgement moves the attribution index even though
                // the store already reflects the op
                if let Some(attribution) = self.attribution.as_mut() {
                    match op {
                        MapOp::Set { .. } => attribution.record(key, seq),
                        _ => attribution.remove(key),
                    }
                }
            }
            // remote ops are shadowed: our pending writes win once sequenced
            return Ok(());
        }

        if local {
            return Err(KernelError::NoPendingForLocalOp {
                key: key.to_owned(),
            });
        }

        match op {
            MapOp::Set { key, value } => {
                let value = MapValue::from_wire(value.clone(), &self.resolver)?;
                self.set_core(key.clone(), value, false);
                if let Some(attribution) = self.attribution.as_mut() {
                    attribution.record(key, seq);
                }
            }
            MapOp::Delete { key } => {
                self.delete_core(key, false);
                if let Some(attribution) = self.attribution.as_mut() {
                    attribution.remove(key);
                }
            }
            MapOp::Clear => unreachable!("clear ops take the clear path"),
        }
        Ok(())
    }

    fn process_clear(
        &mut self,
        local: bool,
        metadata: Option<OpMetadata>,
    ) -> Result<(), KernelError> {
        if local {
            let pending_id = match metadata {
                Some(OpMetadata::Clear { pending_id, .. }) => pending_id,
                Some(other) => {
                    return Err(KernelError::MetadataMismatch {
                        op: "clear",
                        metadata: other.kind(),
                    });
                }
                None => return Err(KernelError::MissingMetadata),
            };
            self.pending.pop_clear_front(pending_id)?;
            if let Some(attribution) = self.attribution.as_mut() {
                attribution.clear();
            }
            return Ok(());
        }

        // the clear is acknowledged state, so the attribution index empties
        // on both remote paths
        if let Some(attribution) = self.attribution.as_mut() {
            attribution.clear();
        }
        if self.pending.has_pending_keys() {
            self.clear_except_pending();
        } else {
            self.clear_core(false);
        }
        Ok(())
    }

    /// A remote clear erases everything except keys this replica still has
    /// writes in flight for; their local values are re-established through
    /// the local set path so subscribers observe each restore. The pending
    /// writes themselves will sequence later and land normally.
    fn clear_except_pending(&mut self) {
        let survivors: Vec<(String, MapValue)> = self
            .store
            .iter()
            .filter(|(key, _)| self.pending.has_pending_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        // no clear event on this path; the restores speak for it
        self.store.clear();
        for (key, value) in survivors {
            self.set_core(key, value, true);
        }
    }

    fn resubmit_key_op(
        &mut self,
        op: &MapOp,
        key: &str,
        metadata: OpMetadata,
    ) -> Result<(), KernelError> {
        // rotate the pending id: the op keeps its place in line relative to
        // this key's other in-flight ops but goes back out under fresh
        // bookkeeping
        let fresh = match metadata {
            OpMetadata::Add { pending_id } => {
                self.pending.pop_key_front(key, pending_id)?;
                let id = self.pending.next_id();
                self.pending.push_key(key, id);
                OpMetadata::Add { pending_id: id }
            }
            OpMetadata::Edit {
                pending_id,
                previous_value,
            } => {
                self.pending.pop_key_front(key, pending_id)?;
                let id = self.pending.next_id();
                self.pending.push_key(key, id);
                OpMetadata::Edit {
                    pending_id: id,
                    previous_value,
                }
            }
            OpMetadata::Clear { .. } => {
                return Err(KernelError::MetadataMismatch {
                    op: op.kind(),
                    metadata: "clear",
                });
            }
        };
        self.transport.submit(op.clone(), fresh);
        Ok(())
    }

    fn resubmit_clear(&mut self, metadata: OpMetadata) -> Result<(), KernelError> {
        let metadata_kind = metadata.kind();
        let OpMetadata::Clear {
            pending_id,
            previous_map,
        } = metadata
        else {
            return Err(KernelError::MetadataMismatch {
                op: "clear",
                metadata: metadata_kind,
            });
        };
        self.pending.pop_clear_front(pending_id)?;
        let id = self.pending.next_id();
        self.pending.push_clear(id);
        self.transport.submit(
            MapOp::Clear,
            OpMetadata::Clear {
                pending_id: id,
                previous_map,
            },
        );
        Ok(())
    }

    fn rollback_inner(&mut self, op: &MapOp, metadata: OpMetadata) -> Result<(), KernelError> {
        let metadata_kind = metadata.kind();
        match (op, metadata) {
            (
                MapOp::Clear,
                OpMetadata::Clear {
                    pending_id,
                    previous_map,
                },
            ) => {
                let Some(previous_map) = previous_map else {
                    return Err(KernelError::MetadataMismatch {
                        op: "clear",
                        metadata: "clear without prior contents",
                    });
                };
                for (key, value) in previous_map {
                    self.set_core(key, value, true);
                }
                self.pending.pop_clear_back(pending_id)?;
                Ok(())
            }
            (MapOp::Set { key, .. }, OpMetadata::Add { pending_id }) => {
                self.delete_core(key, true);
                self.pending.pop_key_back(key, pending_id)?;
                Ok(())
            }
            (
                MapOp::Set { key, .. } | MapOp::Delete { key },
                OpMetadata::Edit {
                    pending_id,
                    previous_value,
                },
            ) => {
                match previous_value {
                    Some(value) => {
                        self.set_core(key.clone(), value, true);
                    }
                    None => {
                        self.delete_core(key, true);
                    }
                }
                self.pending.pop_key_back(key, pending_id)?;
                Ok(())
            }
            (op, _) => Err(KernelError::MetadataMismatch {
                op: op.kind(),
                metadata: metadata_kind,
            }),
        }
    }
}

fn validate_key(key: &str) -> Result<(), InvalidKeyError> {
    if key.is_empty() {
        Err(InvalidKeyError)
    } else {
        Ok(())
    }
}

fn key_metadata_id(metadata: Option<OpMetadata>) -> Result<u64, KernelError> {
    match metadata {
        Some(OpMetadata::Add { pending_id } | OpMetadata::Edit { pending_id, .. }) => {
            Ok(pending_id)
        }
        Some(OpMetadata::Clear { .. }) => Err(KernelError::MetadataMismatch {
            op: "set or delete",
            metadata: "clear",
        }),
        None => Err(KernelError::MissingMetadata),
    }
}
