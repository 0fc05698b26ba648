// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Value encoding for the replicated map.
//!
//! User values are wrapped into a [`MapValue`] before they enter the store.
//! Two kinds exist on the wire: `Plain` payloads that round-trip through JSON
//! unchanged, and `Shared` payloads that describe a handle to another
//! replicated object. Shared handles are opaque to the kernel; they are
//! materialized through a [`HandleResolver`] on the inbound path and turned
//! back into descriptors on the outbound path.
//!
//! The wire and snapshot representation of both kinds is a [`SerializedValue`]
//! carrying a kind tag and a JSON payload. A kind tag the kernel does not
//! recognize fails the whole inbound operation.

use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) const KIND_PLAIN: &str = "Plain";
pub(crate) const KIND_SHARED: &str = "Shared";

/// A value held by the map.
///
/// `Plain` wraps any payload the JSON serializer can round-trip through text.
/// `Shared` references another replicated object through a [`SharedRef`].
#[derive(Debug, Clone, PartialEq)]
pub enum MapValue {
    /// A JSON-round-trippable payload.
    Plain(serde_json::Value),
    /// A handle to another replicated object.
    Shared(SharedRef),
}

/// A reference to another replicated object.
///
/// The kernel never dereferences these; resolution and binding belong to the
/// container runtime that owns the [`HandleResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRef {
    /// Resolver-relative address of the referenced object.
    pub url: String,
}

impl SharedRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// The wire and snapshot form of a [`MapValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedValue {
    /// Kind tag, either `"Plain"` or `"Shared"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The payload; a handle descriptor for the `Shared` kind.
    pub value: serde_json::Value,
}

/// Error produced when decoding a wire or snapshot value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueError {
    /// The value carried a kind tag this kernel does not recognize.
    UnknownKind(String),
    /// A shared-handle descriptor did not have a resolvable shape.
    MalformedHandle(serde_json::Value),
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::UnknownKind(kind) => write!(f, "unknown value kind {kind:?}"),
            ValueError::MalformedHandle(descriptor) => {
                write!(f, "malformed shared-handle descriptor {descriptor}")
            }
        }
    }
}

impl std::error::Error for ValueError {}

/// Materializes and describes shared-object handles.
///
/// The resolver is the seam to the external serializer: it owns the identity
/// that inbound handle descriptors resolve against. The kernel only calls it
/// for values of the `Shared` kind.
pub trait HandleResolver {
    /// Materializes a handle from its wire descriptor.
    fn resolve(&self, descriptor: &serde_json::Value) -> Result<SharedRef, ValueError>;

    /// Produces the wire descriptor for a handle.
    fn describe(&self, handle: &SharedRef) -> serde_json::Value;
}

/// A resolver that passes handle descriptors through untouched.
///
/// Suitable when the host keeps handles as plain addresses, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueHandles;

impl HandleResolver for OpaqueHandles {
    fn resolve(&self, descriptor: &serde_json::Value) -> Result<SharedRef, ValueError> {
        match descriptor {
            serde_json::Value::String(url) => Ok(SharedRef::new(url.clone())),
            serde_json::Value::Object(fields) => fields
                .get("url")
                .and_then(|url| url.as_str())
                .map(SharedRef::new)
                .ok_or_else(|| ValueError::MalformedHandle(descriptor.clone())),
            other => Err(ValueError::MalformedHandle(other.clone())),
        }
    }

    fn describe(&self, handle: &SharedRef) -> serde_json::Value {
        serde_json::json!({ "url": handle.url })
    }
}

impl MapValue {
    /// Decodes a wire value, materializing shared handles through `resolver`.
    pub fn from_wire<R>(wire: SerializedValue, resolver: &R) -> Result<Self, ValueError>
    where
        R: HandleResolver + ?Sized,
    {
        match wire.kind.as_str() {
            KIND_PLAIN => Ok(MapValue::Plain(wire.value)),
            KIND_SHARED => Ok(MapValue::Shared(resolver.resolve(&wire.value)?)),
            other => Err(ValueError::UnknownKind(other.to_owned())),
        }
    }

    /// Encodes this value for the wire.
    pub fn to_wire<R>(&self, resolver: &R) -> SerializedValue
    where
        R: HandleResolver + ?Sized,
    {
        match self {
            MapValue::Plain(value) => SerializedValue {
                kind: KIND_PLAIN.to_owned(),
                value: value.clone(),
            },
            MapValue::Shared(handle) => SerializedValue {
                kind: KIND_SHARED.to_owned(),
                value: resolver.describe(handle),
            },
        }
    }

    /// Encodes this value for a document snapshot.
    ///
    /// Snapshots use the wire shape; the two entry points exist because hosts
    /// may plug different resolvers into the two paths.
    pub fn to_snapshot<R>(&self, resolver: &R) -> SerializedValue
    where
        R: HandleResolver + ?Sized,
    {
        self.to_wire(resolver)
    }

    /// Returns the plain JSON payload, if this is a `Plain` value.
    pub fn as_plain(&self) -> Option<&serde_json::Value> {
        match self {
            MapValue::Plain(value) => Some(value),
            MapValue::Shared(_) => None,
        }
    }

    /// Returns the handle, if this is a `Shared` value.
    pub fn as_shared(&self) -> Option<&SharedRef> {
        match self {
            MapValue::Plain(_) => None,
            MapValue::Shared(handle) => Some(handle),
        }
    }
}

macro_rules! impl_from {
    (
        $(
            $source:ty
        ),* $(,)?
    ) => {
        $(
            impl From<$source> for MapValue {
                fn from(value: $source) -> Self {
                    MapValue::Plain(value.into())
                }
            }
        )*
    };
}
impl_from!(bool, u64, i64, f64, String, &str, serde_json::Value);
// unsuffixed integer literals infer to i32, so map.set("k", 7) needs this
impl_from!(i32);

impl From<SharedRef> for MapValue {
    fn from(handle: SharedRef) -> Self {
        MapValue::Shared(handle)
    }
}

macro_rules! impl_partial_eq {
    ({$($t:ty),+}) => {
        $(impl_partial_eq!($t);)+
    };

    ($t:ty) => {
        impl PartialEq<$t> for MapValue {
            fn eq(&self, other: &$t) -> bool {
                matches!(self, MapValue::Plain(value) if value == other)
            }
        }
    };
}
impl_partial_eq!({str, &str, bool, f64, u64, i64, i32});
