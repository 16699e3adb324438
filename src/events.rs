//! Observer events emitted by the coordinator.
//!
//! Observers are invoked synchronously on the thread that performed the
//! operation, in registration order. A panicking observer is isolated and
//! logged; it never interrupts the operation or corrupts coordinator state.
//!
//! ## Event Origin
//!
//! Events carry an [`EventOrigin`]: `Local` for operations performed through
//! this coordinator, `Remote` for reconciliation triggered by a backplane
//! message from another process.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// The operation ran through this coordinator.
    Local,
    /// The event reconciles a change published by another process.
    Remote,
}

/// Why a handle removed an entry on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// The entry's expiration elapsed.
    Expired,
    /// The handle evicted the entry (capacity or policy).
    Evicted,
}

/// A coordinator-level cache event.
#[derive(Debug, Clone)]
pub enum CacheEvent<V> {
    /// A create-if-absent succeeded.
    Add {
        key: String,
        region: Option<String>,
        origin: EventOrigin,
    },
    /// An upsert completed.
    Put {
        key: String,
        region: Option<String>,
        origin: EventOrigin,
    },
    /// A read found an item.
    Get {
        key: String,
        region: Option<String>,
        origin: EventOrigin,
    },
    /// An atomic update committed.
    Update {
        key: String,
        region: Option<String>,
        origin: EventOrigin,
    },
    /// A removal found an entry in at least one handle.
    Remove {
        key: String,
        region: Option<String>,
        origin: EventOrigin,
    },
    /// Every handle was cleared.
    Clear { origin: EventOrigin },
    /// One region was cleared on every handle.
    ClearRegion {
        region: String,
        origin: EventOrigin,
    },
    /// A handle removed an entry on its own (expiry, eviction).
    RemoveByHandle {
        key: String,
        region: Option<String>,
        reason: RemoveReason,
        /// 1-based level of the emitting handle (topmost handle is level 1).
        level: usize,
        value: Option<V>,
    },
}

impl<V> CacheEvent<V> {
    /// The key the event refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Add { key, .. }
            | CacheEvent::Put { key, .. }
            | CacheEvent::Get { key, .. }
            | CacheEvent::Update { key, .. }
            | CacheEvent::Remove { key, .. }
            | CacheEvent::RemoveByHandle { key, .. } => Some(key),
            CacheEvent::Clear { .. } | CacheEvent::ClearRegion { .. } => None,
        }
    }

    /// The event's origin. `RemoveByHandle` is always local.
    pub fn origin(&self) -> EventOrigin {
        match self {
            CacheEvent::Add { origin, .. }
            | CacheEvent::Put { origin, .. }
            | CacheEvent::Get { origin, .. }
            | CacheEvent::Update { origin, .. }
            | CacheEvent::Remove { origin, .. }
            | CacheEvent::Clear { origin }
            | CacheEvent::ClearRegion { origin, .. } => *origin,
            CacheEvent::RemoveByHandle { .. } => EventOrigin::Local,
        }
    }
}

/// Token returned by observer registration; pass to `remove_observer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<V> = Arc<dyn Fn(&CacheEvent<V>) + Send + Sync>;

/// Registered observers, invoked in registration order.
pub(crate) struct ObserverRegistry<V> {
    observers: RwLock<Vec<(ObserverId, Observer<V>)>>,
    next_id: AtomicU64,
}

impl<V> ObserverRegistry<V> {
    pub(crate) fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(
        &self,
        observer: impl Fn(&CacheEvent<V>) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Invokes every observer with the event. Panics are contained per
    /// observer so one faulty handler cannot take down the operation or
    /// starve the remaining observers.
    pub(crate) fn emit(&self, event: &CacheEvent<V>) {
        let snapshot: Vec<Observer<V>> = {
            let observers = self.observers.read();
            observers.iter().map(|(_, observer)| observer.clone()).collect()
        };
        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                warn!(key = event.key(), "cache event observer panicked");
            }
        }
    }
}
