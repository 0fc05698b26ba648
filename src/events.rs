// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Event surface of the map kernel.
//!
//! Subscribers observe effective changes: a `valueChanged` for every set or
//! delete that altered the store (including the restores a remote clear
//! performs for keys shielded by pending local writes), and a `clear` for
//! every wholesale erasure. Each notification carries a `local` flag telling
//! the listener whether this replica authored the change.
//!
//! There is one listener list per event name. Subscribing returns a
//! [`ListenerHandle`]; the subscriber owns it and passes it back to
//! deregister. Listeners receive event data only, never the kernel itself,
//! and must not re-enter the kernel while a notification is being delivered.

use crate::value::MapValue;
use std::fmt;

/// Payload of a `valueChanged` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChanged {
    /// The key that was set or deleted.
    pub key: String,
    /// The value the key held before the change, if any.
    pub previous_value: Option<MapValue>,
}

/// Identifies one subscription. Returned on registration, consumed by
/// [`MapKernel::unsubscribe`](crate::MapKernel::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type ValueChangedFn = Box<dyn FnMut(&ValueChanged, bool)>;
type ClearFn = Box<dyn FnMut(bool)>;

#[derive(Default)]
pub(crate) struct EventRegistry {
    next_handle: u64,
    value_changed: Vec<(ListenerHandle, ValueChangedFn)>,
    cleared: Vec<(ListenerHandle, ClearFn)>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("value_changed", &self.value_changed.len())
            .field("cleared", &self.cleared.len())
            .finish()
    }
}

impl EventRegistry {
    fn fresh_handle(&mut self) -> ListenerHandle {
        self.next_handle += 1;
        ListenerHandle(self.next_handle)
    }

    pub fn on_value_changed(
        &mut self,
        listener: impl FnMut(&ValueChanged, bool) + 'static,
    ) -> ListenerHandle {
        let handle = self.fresh_handle();
        self.value_changed.push((handle, Box::new(listener)));
        handle
    }

    pub fn on_clear(&mut self, listener: impl FnMut(bool) + 'static) -> ListenerHandle {
        let handle = self.fresh_handle();
        self.cleared.push((handle, Box::new(listener)));
        handle
    }

    /// Removes the subscription behind `handle`. Returns false if it was
    /// already gone.
    pub fn unsubscribe(&mut self, handle: ListenerHandle) -> bool {
        let value_len = self.value_changed.len();
        self.value_changed.retain(|(h, _)| *h != handle);
        if self.value_changed.len() != value_len {
            return true;
        }
        let clear_len = self.cleared.len();
        self.cleared.retain(|(h, _)| *h != handle);
        self.cleared.len() != clear_len
    }

    pub fn emit_value_changed(&mut self, change: &ValueChanged, local: bool) {
        for (_, listener) in &mut self.value_changed {
            listener(change, local);
        }
    }

    pub fn emit_clear(&mut self, local: bool) {
        for (_, listener) in &mut self.cleared {
            listener(local);
        }
    }
}
