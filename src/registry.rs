// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process-wide client registry and the housekeeper task.
//!
//! All live clients are tracked in one registry so a single background
//! task can sweep every in-flight table for request timeouts. The
//! registry holds weak references: a client that is simply dropped (as
//! opposed to destroyed) is pruned on the next sweep and can never keep
//! the housekeeper touching dead state.
//!
//! [`init`] starts the housekeeper; [`fini`] stops it. The shutdown
//! signal is observed between sweep iterations, never mid-sweep.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::client::ClientInner;

/// Maximum number of live clients per process.
pub const MAX_CLIENTS: usize = 64;

/// Interval between housekeeper sweeps unless overridden via
/// [`init_with_interval`].
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed-capacity set of live clients.
pub(crate) struct ClientRegistry {
    clients: Mutex<Vec<Weak<ClientInner>>>,
    capacity: usize,
}

impl ClientRegistry {
    pub(crate) const fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Adds a client. Returns `false` when the registry is at capacity
    /// (counting only live clients; stale entries are pruned first).
    pub(crate) fn add(&self, client: Weak<ClientInner>) -> bool {
        let mut clients = self.clients.lock();
        clients.retain(|weak| weak.strong_count() > 0);
        if clients.len() >= self.capacity {
            return false;
        }
        clients.push(client);
        true
    }

    /// Removes a client. Returns `true` if it was registered.
    pub(crate) fn remove(&self, client: &Arc<ClientInner>) -> bool {
        let target = Arc::downgrade(client);
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|weak| !weak.ptr_eq(&target));
        before != clients.len()
    }

    /// Runs `f` for every live client, pruning dropped ones.
    ///
    /// The registry lock is held for the duration of the iteration, so
    /// `f` must be bounded and must not re-enter the registry.
    pub(crate) fn for_each(&self, f: impl Fn(&Arc<ClientInner>)) {
        let mut clients = self.clients.lock();
        clients.retain(|weak| weak.strong_count() > 0);
        for weak in clients.iter() {
            if let Some(client) = weak.upgrade() {
                f(&client);
            }
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.clients
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

static REGISTRY: ClientRegistry = ClientRegistry::with_capacity(MAX_CLIENTS);

pub(crate) fn register(client: Weak<ClientInner>) -> bool {
    REGISTRY.add(client)
}

pub(crate) fn deregister(client: &Arc<ClientInner>) -> bool {
    REGISTRY.remove(client)
}

struct Housekeeper {
    shutdown: watch::Sender<bool>,
}

static HOUSEKEEPER: Mutex<Option<Housekeeper>> = Mutex::new(None);

/// Initializes the library: starts the housekeeper task that sweeps every
/// client's in-flight table for request timeouts once per second.
///
/// Calling `init` again without an intervening [`fini`] logs a warning
/// and does nothing.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn init() {
    init_with_interval(DEFAULT_SWEEP_INTERVAL);
}

/// Like [`init`], with an explicit sweep interval.
///
/// A timed-out request is reported no sooner than its deadline and no
/// later than the deadline plus one sweep interval.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn init_with_interval(sweep_interval: Duration) {
    let mut guard = HOUSEKEEPER.lock();
    if guard.is_some() {
        tracing::warn!("already initialized");
        return;
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                () = tokio::time::sleep(sweep_interval) => {
                    REGISTRY.for_each(|client| client.sweep_in_flight(Instant::now()));
                }
            }
        }
        tracing::debug!("housekeeper stopped");
    });

    *guard = Some(Housekeeper {
        shutdown: shutdown_tx,
    });
    tracing::info!("initialized");
}

/// Tears the library down: signals the housekeeper to stop at the next
/// sweep boundary. A no-op when the library was never initialized.
///
/// Clients are not destroyed; their pending requests simply stop being
/// swept for timeouts.
pub fn fini() {
    let Some(housekeeper) = HOUSEKEEPER.lock().take() else {
        tracing::debug!("not initialized; nothing to clean up");
        return;
    };
    let _ = housekeeper.shutdown.send(true);
    tracing::info!("cleaned up");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use crate::config::ShadowConfig;
    use crate::transport::testing::MockTransport;

    fn test_client(name: &str) -> Arc<ClientInner> {
        ClientInner::for_tests(
            name,
            ShadowConfig::default(),
            Arc::new(MockTransport::default()),
            true,
        )
    }

    #[test]
    fn add_and_remove() {
        let registry = ClientRegistry::with_capacity(4);
        let client = test_client("dev1");

        assert!(registry.add(Arc::downgrade(&client)));
        assert_eq!(registry.live_count(), 1);

        assert!(registry.remove(&client));
        assert_eq!(registry.live_count(), 0);

        // Removing again reports not-found.
        assert!(!registry.remove(&client));
    }

    #[test]
    fn add_full_registry_is_rejected() {
        let registry = ClientRegistry::with_capacity(2);
        let a = test_client("a");
        let b = test_client("b");
        let c = test_client("c");

        assert!(registry.add(Arc::downgrade(&a)));
        assert!(registry.add(Arc::downgrade(&b)));
        assert!(!registry.add(Arc::downgrade(&c)));
    }

    #[test]
    fn dropped_clients_are_pruned() {
        let registry = ClientRegistry::with_capacity(2);
        {
            let transient = test_client("transient");
            registry.add(Arc::downgrade(&transient));
            assert_eq!(registry.live_count(), 1);
        }
        assert_eq!(registry.live_count(), 0);

        // Stale entries do not count against capacity.
        let a = test_client("a");
        let b = test_client("b");
        assert!(registry.add(Arc::downgrade(&a)));
        assert!(registry.add(Arc::downgrade(&b)));
    }

    #[test]
    fn for_each_visits_live_clients() {
        let registry = ClientRegistry::with_capacity(4);
        let a = test_client("a");
        let b = test_client("b");
        registry.add(Arc::downgrade(&a));
        registry.add(Arc::downgrade(&b));

        let visited = Arc::new(AtomicU32::new(0));
        let visited_clone = visited.clone();
        registry.for_each(move |_| {
            visited_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(visited.load(Ordering::SeqCst), 2);
    }

    // The housekeeper lifecycle shares process-global state, so all of it
    // is exercised in this single test.
    #[tokio::test(start_paused = true)]
    async fn housekeeper_sweeps_registered_clients() {
        let client = test_client("swept");
        assert!(register(Arc::downgrade(&client)));

        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        client
            .update(
                json!({"led": "on"}),
                Arc::new(move |_, _| {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_secs(1),
            )
            .unwrap();

        init();
        // A second init is a warning, not a second task.
        init();

        // Paused time: sleeps auto-advance, so a couple of sweep
        // intervals elapse here and reap the one-second request.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        fini();
        // fini is idempotent.
        fini();

        deregister(&client);
    }
}
