// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Resubmission after reconnection and replay of stashed ops.

mod common;

use common::{Queue, envelope};
use seqmap::{KernelError, MapKernel, MapOp, MapValue, OpMetadata};
use serde_json::json;

fn attached() -> (Queue, MapKernel<Queue>) {
    let outbox = Queue::default();
    let map = MapKernel::new(outbox.clone());
    (outbox, map)
}

#[test]
fn resubmit_rotates_the_pending_id() {
    let (outbox, mut map) = attached();
    // burn a few ids so the rotation is visible mid-sequence
    map.set("a", 1).unwrap();
    map.set("b", 2).unwrap();
    map.set("c", 3).unwrap();
    map.set("k", "v").unwrap();
    for _ in 0..3 {
        outbox.pop();
    }
    let (op, metadata) = outbox.pop();
    assert_eq!(metadata, OpMetadata::Add { pending_id: 3 });

    // the connection dropped; the transport re-offers the op
    assert!(map.try_submit(&op, metadata).unwrap());
    let (resubmitted, fresh) = outbox.pop();
    assert_eq!(resubmitted, op);
    assert_eq!(fresh, OpMetadata::Add { pending_id: 4 });
    assert_eq!(map.pending_ids_for("k"), Some(&[4][..]));

    // the acknowledgement arrives under the fresh id
    map.try_process(&envelope(&resubmitted, 9, "us"), true, Some(fresh))
        .unwrap();
    assert_eq!(map.pending_ids_for("k"), None);
    assert_eq!(map.get("k"), Some(&MapValue::from("v")));
}

#[test]
fn resubmit_keeps_the_captured_previous_value() {
    let (outbox, mut map) = attached();
    map.set("k", 1).unwrap();
    let (op, metadata) = outbox.pop();
    map.try_process(&envelope(&op, 1, "us"), true, Some(metadata))
        .unwrap();

    map.set("k", 2).unwrap();
    let (op, metadata) = outbox.pop();
    map.try_submit(&op, metadata).unwrap();
    let (_, fresh) = outbox.pop();
    assert!(matches!(
        fresh,
        OpMetadata::Edit { pending_id: 2, previous_value: Some(v) } if v == MapValue::from(1)
    ));
}

#[test]
fn resubmitting_several_ops_preserves_their_order() {
    let (outbox, mut map) = attached();
    map.set("k", 1).unwrap();
    map.set("k", 2).unwrap();
    let (op_first, metadata_first) = outbox.pop();
    let (op_second, metadata_second) = outbox.pop();
    assert_eq!(map.pending_ids_for("k"), Some(&[0, 1][..]));

    // the transport re-offers in submission order
    map.try_submit(&op_first, metadata_first).unwrap();
    map.try_submit(&op_second, metadata_second).unwrap();
    assert_eq!(map.pending_ids_for("k"), Some(&[2, 3][..]));

    let (_, fresh_first) = outbox.pop();
    let (_, fresh_second) = outbox.pop();
    assert_eq!(fresh_first.pending_id(), 2);
    assert_eq!(fresh_second.pending_id(), 3);
}

#[test]
fn resubmit_rotates_a_clear_with_its_prior_contents() {
    let (outbox, mut map) = attached();
    map.set("a", 1).unwrap();
    let (op, metadata) = outbox.pop();
    map.try_process(&envelope(&op, 1, "us"), true, Some(metadata))
        .unwrap();

    map.clear();
    let (clear, metadata) = outbox.pop();
    map.try_submit(&clear, metadata).unwrap();
    let (resubmitted, fresh) = outbox.pop();
    assert_eq!(resubmitted, MapOp::Clear);
    match fresh {
        OpMetadata::Clear {
            pending_id,
            previous_map: Some(previous_map),
        } => {
            assert_eq!(pending_id, 2);
            assert_eq!(previous_map.get("a"), Some(&MapValue::from(1)));
        }
        other => panic!("expected clear metadata, got {other:?}"),
    }
}

#[test]
fn resubmit_with_the_wrong_metadata_shape_is_fatal() {
    let (outbox, mut map) = attached();
    map.set("k", 1).unwrap();
    let (op, _metadata) = outbox.pop();

    let err = map
        .try_submit(
            &op,
            OpMetadata::Clear {
                pending_id: 0,
                previous_map: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, KernelError::MetadataMismatch { .. }));
}

#[test]
fn stashed_set_replays_as_a_fresh_local_op() {
    let (outbox, mut map) = attached();
    let metadata = map
        .try_apply_stashed(&json!({
            "type": "set", "key": "k", "value": {"type": "Plain", "value": 7},
        }))
        .unwrap();

    assert_eq!(metadata, OpMetadata::Add { pending_id: 0 });
    assert_eq!(map.get("k"), Some(&MapValue::from(7)));
    assert_eq!(map.pending_ids_for("k"), Some(&[0][..]));
    // replay only applies and re-books; submission stays with the host
    assert!(outbox.is_empty());

    // the host sends it and the ack drains normally
    let op = MapOp::Set {
        key: "k".to_owned(),
        value: MapValue::from(7).to_wire(&seqmap::OpaqueHandles),
    };
    map.try_process(&envelope(&op, 4, "us"), true, Some(metadata))
        .unwrap();
    assert_eq!(map.pending_ids_for("k"), None);
}

#[test]
fn stashed_set_over_existing_state_captures_the_previous_value() {
    let (outbox, mut map) = attached();
    map.set("k", 1).unwrap();
    let (op, metadata) = outbox.pop();
    map.try_process(&envelope(&op, 1, "us"), true, Some(metadata))
        .unwrap();

    let metadata = map
        .try_apply_stashed(&json!({
            "type": "set", "key": "k", "value": {"type": "Plain", "value": 2},
        }))
        .unwrap();
    assert!(matches!(
        metadata,
        OpMetadata::Edit { previous_value: Some(v), .. } if v == MapValue::from(1)
    ));
}

#[test]
fn stashed_clear_captures_the_prior_contents() {
    let (outbox, mut map) = attached();
    map.set("a", 1).unwrap();
    let (op, metadata) = outbox.pop();
    map.try_process(&envelope(&op, 1, "us"), true, Some(metadata))
        .unwrap();

    let metadata = map.try_apply_stashed(&json!({"type": "clear"})).unwrap();
    assert!(map.is_empty());
    match metadata {
        OpMetadata::Clear {
            previous_map: Some(previous_map),
            ..
        } => assert_eq!(previous_map.get("a"), Some(&MapValue::from(1))),
        other => panic!("expected clear metadata, got {other:?}"),
    }
}

#[test]
fn stashed_op_of_an_unknown_kind_is_rejected() {
    let (_outbox, mut map) = attached();
    let err = map
        .try_apply_stashed(&json!({"type": "act", "path": "/"}))
        .unwrap_err();
    assert_eq!(err, KernelError::UnsupportedOp("act".to_owned()));
    assert!(!err.is_fatal());
    assert!(map.is_empty());
}
