// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delta handler registration and dispatch.
//!
//! A delta is a server-originated message listing the properties in which
//! the shadow's `desired` state diverges from `reported`. Applications
//! react by registering handlers: either for a single property key or for
//! the whole `desired` object ([`DeltaKey::Root`]).
//!
//! The registry is add-only for the lifetime of a client. Handlers run in
//! registration order; the first handler returning a [`DeltaError`] stops
//! the walk, and the error is reported back to the server on the
//! `delta/rejected` topic.
//!
//! Dispatch holds the registry lock across handler calls so deltas are
//! processed one at a time. Handlers must not register further handlers
//! from inside a callback.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// Selects which part of a delta a handler receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeltaKey {
    /// The handler receives the whole `desired` object.
    Root,
    /// The handler receives the sub-object at this property key, and is
    /// skipped when the delta does not contain the key.
    Property(String),
}

impl DeltaKey {
    /// The sentinel key matching the whole `desired` object.
    #[must_use]
    pub const fn root() -> Self {
        Self::Root
    }

    /// Returns the property name, or `None` for the root key.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Root => None,
            Self::Property(name) => Some(name),
        }
    }
}

impl From<&str> for DeltaKey {
    fn from(name: &str) -> Self {
        Self::Property(name.to_string())
    }
}

impl From<String> for DeltaKey {
    fn from(name: String) -> Self {
        Self::Property(name)
    }
}

impl std::fmt::Display for DeltaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Property(name) => f.write_str(name),
        }
    }
}

/// An application-defined rejection of a delta.
///
/// Returned from a delta handler to refuse the proposed desired state.
/// The engine publishes `{requestId, code, message}` on the
/// `delta/rejected` topic and then drops the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaError {
    /// Machine-readable rejection code.
    pub code: String,
    /// Human-readable rejection message.
    pub message: String,
}

impl DeltaError {
    /// Creates a new delta rejection.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Callback invoked when a delta matches the handler's key.
pub(crate) type DeltaCallback = Arc<dyn Fn(&DeltaKey, &Value) -> Option<DeltaError> + Send + Sync>;

/// Ordered, add-only set of (key, handler) pairs.
pub(crate) struct DeltaRegistry {
    handlers: Mutex<Vec<(DeltaKey, DeltaCallback)>>,
    capacity: usize,
}

impl DeltaRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Appends a handler. Returns `false` when the registry is full.
    pub(crate) fn register(&self, key: DeltaKey, callback: DeltaCallback) -> bool {
        let mut handlers = self.handlers.lock();
        if handlers.len() >= self.capacity {
            return false;
        }
        handlers.push((key, callback));
        true
    }

    /// Walks the handlers in registration order for the given `desired`
    /// object, returning the first rejection.
    ///
    /// Keyed handlers whose property is absent from `desired` are skipped.
    /// The registry lock is held for the whole walk.
    pub(crate) fn dispatch(&self, desired: &Value) -> Option<DeltaError> {
        let handlers = self.handlers.lock();
        for (key, callback) in handlers.iter() {
            let error = match key {
                DeltaKey::Root => callback(key, desired),
                DeltaKey::Property(name) => match desired.get(name) {
                    Some(property) => callback(key, property),
                    None => None,
                },
            };
            if error.is_some() {
                return error;
            }
        }
        None
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl std::fmt::Debug for DeltaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaRegistry")
            .field("handlers", &self.handler_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    #[test]
    fn delta_key_from_str() {
        assert_eq!(DeltaKey::from("led"), DeltaKey::Property("led".to_string()));
        assert_eq!(DeltaKey::root().name(), None);
        assert_eq!(DeltaKey::from("led").name(), Some("led"));
    }

    #[test]
    fn delta_key_display() {
        assert_eq!(DeltaKey::root().to_string(), "root");
        assert_eq!(DeltaKey::from("led").to_string(), "led");
    }

    #[test]
    fn keyed_handler_receives_property() {
        let registry = DeltaRegistry::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        registry.register(
            DeltaKey::from("led"),
            Arc::new(move |key, value| {
                seen_clone.lock().push((key.clone(), value.clone()));
                None
            }),
        );

        let desired = json!({"led": "off", "fan": 3});
        assert!(registry.dispatch(&desired).is_none());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, DeltaKey::from("led"));
        assert_eq!(seen[0].1, json!("off"));
    }

    #[test]
    fn root_handler_receives_whole_desired() {
        let registry = DeltaRegistry::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        registry.register(
            DeltaKey::root(),
            Arc::new(move |_, value| {
                seen_clone.lock().push(value.clone());
                None
            }),
        );

        let desired = json!({"led": "off"});
        registry.dispatch(&desired);
        assert_eq!(seen.lock()[0], desired);
    }

    #[test]
    fn handler_skipped_when_key_absent() {
        let registry = DeltaRegistry::new(8);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        registry.register(
            DeltaKey::from("fan"),
            Arc::new(move |_, _| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                None
            }),
        );

        registry.dispatch(&json!({"led": "off"}));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = DeltaRegistry::new(8);
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order_clone = order.clone();
            registry.register(
                DeltaKey::root(),
                Arc::new(move |_, _| {
                    order_clone.lock().push(tag);
                    None
                }),
            );
        }

        registry.dispatch(&json!({}));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);

        // A second dispatch sees the same order.
        registry.dispatch(&json!({}));
        assert_eq!(*order.lock(), vec!["first", "second", "third", "first", "second", "third"]);
    }

    #[test]
    fn first_error_short_circuits() {
        let registry = DeltaRegistry::new(8);
        let late_counter = Arc::new(AtomicU32::new(0));
        let late_clone = late_counter.clone();

        registry.register(DeltaKey::root(), Arc::new(|_, _| None));
        registry.register(
            DeltaKey::root(),
            Arc::new(|_, _| Some(DeltaError::new("E_RANGE", "bad"))),
        );
        registry.register(
            DeltaKey::root(),
            Arc::new(move |_, _| {
                late_clone.fetch_add(1, Ordering::SeqCst);
                None
            }),
        );

        let error = registry.dispatch(&json!({})).unwrap();
        assert_eq!(error, DeltaError::new("E_RANGE", "bad"));
        assert_eq!(late_counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn register_full_registry_is_rejected() {
        let registry = DeltaRegistry::new(2);
        assert!(registry.register(DeltaKey::root(), Arc::new(|_, _| None)));
        assert!(registry.register(DeltaKey::from("a"), Arc::new(|_, _| None)));
        assert!(!registry.register(DeltaKey::from("b"), Arc::new(|_, _| None)));
        assert_eq!(registry.handler_count(), 2);
    }

    #[test]
    fn dispatch_with_no_handlers_is_quiet() {
        let registry = DeltaRegistry::new(2);
        assert!(registry.dispatch(&json!({"led": "on"})).is_none());
    }
}
