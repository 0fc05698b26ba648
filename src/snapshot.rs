// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Snapshot serialization for the map.
//!
//! The canonical snapshot is a flat JSON object mapping each key to
//! `{type, value[, attribution]}` in insertion order. Hydration additionally
//! accepts the nested `{storage: {...}, subdirectories: {...}, ci: {...}}`
//! schema written by the directory variant of this data structure; a small
//! normalizer lifts either shape into the canonical flat form before any
//! value is decoded, and only `storage` plus attribution is consumed from the
//! nested shape at this layer.

use crate::{attribution::Attribution, value::ValueError};
use ahash::RandomState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One key's slot in the flat snapshot schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Value kind tag, `"Plain"` or `"Shared"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The serialized payload.
    pub value: serde_json::Value,
    /// Present iff the writing replica tracked attribution for this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

/// Decoded snapshot contents, in the order the document listed them.
pub(crate) type SnapshotEntries = IndexMap<String, SnapshotEntry, RandomState>;

/// Error raised while producing or consuming a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// The snapshot text was not valid JSON or did not match either schema.
    Decode(String),
    /// An entry carried a value the kernel cannot hydrate.
    Value(ValueError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Decode(reason) => write!(f, "malformed snapshot: {reason}"),
            SnapshotError::Value(err) => write!(f, "snapshot value: {err}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Decode(_) => None,
            SnapshotError::Value(err) => Some(err),
        }
    }
}

pub(crate) fn encode(entries: &SnapshotEntries) -> Result<String, SnapshotError> {
    serde_json::to_string(entries).map_err(|err| SnapshotError::Decode(err.to_string()))
}

pub(crate) fn decode(text: &str) -> Result<SnapshotEntries, SnapshotError> {
    let root: serde_json::Value =
        serde_json::from_str(text).map_err(|err| SnapshotError::Decode(err.to_string()))?;
    let serde_json::Value::Object(root) = root else {
        return Err(SnapshotError::Decode("snapshot root must be an object".to_owned()));
    };

    let (flat, attribution_overlay) = match directory_storage(&root) {
        Some(storage) => (storage, root.get("attribution").and_then(|a| a.as_object())),
        None => (&root, None),
    };

    let mut entries = SnapshotEntries::default();
    for (key, value) in flat {
        let entry: SnapshotEntry = serde_json::from_value(value.clone())
            .map_err(|err| SnapshotError::Decode(format!("entry {key:?}: {err}")))?;
        entries.insert(key.clone(), entry);
    }

    // the nested schema may carry attribution out-of-line, keyed like storage
    if let Some(overlay) = attribution_overlay {
        for (key, value) in overlay {
            let attribution: Attribution = serde_json::from_value(value.clone())
                .map_err(|err| SnapshotError::Decode(format!("attribution {key:?}: {err}")))?;
            if let Some(entry) = entries.get_mut(key) {
                entry.attribution = Some(attribution);
            }
        }
    }

    Ok(entries)
}

/// Returns the `storage` sub-object when `root` is a nested directory-format
/// snapshot, and `None` when it is the flat schema.
fn directory_storage(
    root: &serde_json::Map<String, serde_json::Value>,
) -> Option<&serde_json::Map<String, serde_json::Value>> {
    let storage = root.get("storage")?.as_object()?;
    // every other top-level field must belong to the directory schema
    if !root
        .keys()
        .all(|k| matches!(k.as_str(), "storage" | "subdirectories" | "ci" | "attribution"))
    {
        return None;
    }
    // disambiguation: a flat map whose only key is literally "storage" holds
    // an entry object here, and entries always carry a string "type" tag --
    // a subdirectory storage object maps keys to objects instead
    if storage.get("type").is_some_and(|t| t.is_string()) {
        return None;
    }
    Some(storage)
}
