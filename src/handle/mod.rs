//! Cache handle contract.
//!
//! A handle is one backend layer composed into the coordinator: an in-process
//! map, a process-wide cache, or a distributed store. The coordinator never
//! reaches into a handle's storage; everything goes through [`CacheHandle`].
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            │            TieredCache<V>                │
//!            │  read pipeline · write pipeline · update │
//!            └───────┬──────────────┬──────────────┬────┘
//!                    │              │              │
//!                    ▼              ▼              ▼
//!            ┌────────────┐  ┌────────────┐  ┌────────────┐
//!            │  H[0] top  │  │   H[1]     │  │ H[n-1] bot │
//!            │ CacheHandle│  │ CacheHandle│  │ CacheHandle│
//!            └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Ownership Model
//!
//! All operations take `&self` with interior mutability: handles are shared
//! across threads behind `Arc` and must be `Send + Sync`. Values cross the
//! boundary as owned [`CacheItem`] snapshots; references cannot outlive a
//! handle's internal locks.
//!
//! ## Base Obligations
//!
//! Beyond the operation surface, every handle must:
//!
//! - apply its configured default expiration to incoming items whose
//!   `uses_expiration_defaults` flag is set, before storage;
//! - report entries it removes on its own (expiry, capacity) through the
//!   registered remove listener so the coordinator can evict the layers
//!   above and notify observers;
//! - serialize its own `update` commits (lock for in-process storage,
//!   version check for distributed storage) and report the outcome as an
//!   [`UpdateOutcome`].

pub mod memory;

use crate::config::HandleConfig;
use crate::error::CacheResult;
use crate::events::RemoveReason;
use crate::item::CacheItem;
use crate::stats::StatsSnapshot;

/// An entry removal performed by the handle itself (not via the coordinator).
#[derive(Debug, Clone)]
pub struct HandleRemoveEvent<V> {
    /// Key of the removed entry.
    pub key: String,
    /// Region of the removed entry.
    pub region: Option<String>,
    /// Why the handle removed it.
    pub reason: RemoveReason,
    /// The removed value, when still available.
    pub value: Option<V>,
}

/// Callback invoked when a handle removes an entry on its own.
pub type RemoveListener<V> = Box<dyn Fn(HandleRemoveEvent<V>) + Send + Sync>;

/// Closure applied by [`CacheHandle::update`] to produce the next value.
///
/// Returning `None` aborts the update with
/// [`UpdateOutcome::FactoryReturnedNone`].
pub type UpdateFn<V> = dyn Fn(&V) -> Option<V>;

/// Outcome of a handle-level atomic update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome<V> {
    /// The new value was committed.
    Updated {
        /// The committed item.
        item: CacheItem<V>,
        /// Whether any optimistic retry was needed.
        conflict_occurred: bool,
        /// Number of attempts performed (1 = no conflict).
        tries: u32,
    },
    /// The key was not present (or had expired).
    KeyMissing,
    /// The retry budget ran out with an unresolved conflict.
    RetriesExhausted {
        /// Number of attempts performed.
        tries: u32,
    },
    /// The value closure returned `None`.
    FactoryReturnedNone,
}

/// One cache backend composed into the coordinator.
///
/// Implementations must be object safe: the coordinator stores handles as
/// `Arc<dyn CacheHandle<V>>` in configured order.
pub trait CacheHandle<V>: Send + Sync {
    /// The handle's configuration facet.
    fn config(&self) -> &HandleConfig;

    /// Point-in-time statistics for this handle.
    fn stats(&self) -> StatsSnapshot;

    /// Looks up a live item. Expired entries count as misses and may be
    /// dropped as a side effect.
    fn get_item(&self, key: &str, region: Option<&str>) -> CacheResult<Option<CacheItem<V>>>;

    /// Stores the item only if the key is absent. Returns whether it was
    /// stored; an existing live entry wins.
    fn add(&self, item: &CacheItem<V>) -> CacheResult<bool>;

    /// Stores the item unconditionally, replacing any existing entry.
    fn put(&self, item: &CacheItem<V>) -> CacheResult<()>;

    /// Removes the entry. Returns whether one was present.
    fn remove(&self, key: &str, region: Option<&str>) -> CacheResult<bool>;

    /// Whether a live entry exists, without touching access metadata.
    fn exists(&self, key: &str, region: Option<&str>) -> CacheResult<bool>;

    /// Number of stored entries (expired entries may still be counted until
    /// discovered).
    fn count(&self) -> usize;

    /// Removes every entry.
    fn clear(&self) -> CacheResult<()>;

    /// Removes every entry in `region`, leaving other regions and the global
    /// namespace untouched.
    fn clear_region(&self, region: &str) -> CacheResult<()>;

    /// Atomically applies `apply` to the current value, retrying on
    /// concurrent modification up to `max_retries` extra attempts.
    fn update(
        &self,
        key: &str,
        region: Option<&str>,
        apply: &UpdateFn<V>,
        max_retries: u32,
    ) -> CacheResult<UpdateOutcome<V>>;

    /// Registers the coordinator's listener for handle-initiated removals.
    /// A later registration replaces the earlier one.
    fn set_remove_listener(&self, listener: RemoveListener<V>);
}
