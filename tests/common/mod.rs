// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Shared test harness: a transport that parks submitted ops for the test to
//! deliver, and builders for wire ops and sequenced envelopes.
#![allow(dead_code)]

use seqmap::{MapOp, MapValue, OpMetadata, OpaqueHandles, SequencedMessage, Transport};
use std::{cell::RefCell, collections::VecDeque, rc::Rc};

/// Transport that records everything the kernel submits.
///
/// Clones share the queue, so a test holds one clone and hands the other to
/// the kernel.
#[derive(Clone, Default)]
pub struct Queue {
    inner: Rc<RefCell<VecDeque<(MapOp, OpMetadata)>>>,
}

impl Queue {
    pub fn pop(&self) -> (MapOp, OpMetadata) {
        self.inner
            .borrow_mut()
            .pop_front()
            .expect("an op was submitted")
    }

    pub fn try_pop(&self) -> Option<(MapOp, OpMetadata)> {
        self.inner.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl Transport for Queue {
    fn is_attached(&self) -> bool {
        true
    }

    fn submit(&mut self, op: MapOp, metadata: OpMetadata) {
        self.inner.borrow_mut().push_back((op, metadata));
    }
}

/// Wraps an op in a sequenced envelope, as the ordering service would.
pub fn envelope(op: &MapOp, seq: u64, client: &str) -> SequencedMessage {
    SequencedMessage {
        contents: serde_json::to_value(op).expect("ops serialize"),
        sequence_number: seq,
        client_id: client.to_owned(),
        client_sequence_number: seq,
    }
}

pub fn set_op(key: &str, value: impl Into<MapValue>) -> MapOp {
    MapOp::Set {
        key: key.to_owned(),
        value: value.into().to_wire(&OpaqueHandles),
    }
}

pub fn delete_op(key: &str) -> MapOp {
    MapOp::Delete {
        key: key.to_owned(),
    }
}
