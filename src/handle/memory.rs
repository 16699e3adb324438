//! In-process memory handle.
//!
//! ## Key Components
//!
//! - `MemoryHandle`: thread-safe map-backed handle using a
//!   `parking_lot::RwLock` around an `FxHashMap`.
//! - Versioned entries: every committed write bumps a per-entry version so
//!   the optimistic update loop can detect concurrent modification without
//!   holding the map lock while user code runs.
//!
//! ## Expiry Discovery
//!
//! Expiration is evaluated lazily: a lookup that lands on an expired entry
//! drops it, counts a miss, and reports the removal through the registered
//! remove listener. There is no sweeper thread; an entry that is never read
//! again simply stays until a write or clear displaces it.
//!
//! ## Capacity
//!
//! A handle built with [`MemoryHandle::bounded`] holds at most `max_items`
//! entries. Storing a new key at the bound drops the least recently accessed
//! entry first and reports it through the remove listener as an eviction.
//! The other constructors are unbounded.
//!
//! ## Thread Safety
//!
//! All operations take `&self`. Lookups take the write lock because a hit
//! refreshes the entry's last-access instant (sliding expiration); the user's
//! update closure runs outside any lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::HandleConfig;
use crate::error::{CacheError, CacheResult};
use crate::events::RemoveReason;
use crate::handle::{CacheHandle, HandleRemoveEvent, RemoveListener, UpdateFn, UpdateOutcome};
use crate::item::{CacheItem, ExpirationMode};
use crate::stats::{HandleStats, StatsSnapshot};

/// Shortest expiration this handle can honor.
const RESOLUTION_FLOOR: Duration = Duration::from_millis(1);

/// Map key: `(region, key)`. `None` region is the global namespace.
type EntryKey = (Option<String>, String);

fn entry_key(key: &str, region: Option<&str>) -> EntryKey {
    (region.map(str::to_owned), key.to_owned())
}

#[derive(Debug)]
struct Entry<V> {
    item: CacheItem<V>,
    version: u64,
}

/// State captured by the update loop's snapshot phase.
enum Snapshot<V> {
    Missing,
    Expired,
    Live(V, u64),
}

/// Thread-safe in-process cache handle.
///
/// # Example
///
/// ```
/// use tierkit::handle::CacheHandle;
/// use tierkit::handle::memory::MemoryHandle;
/// use tierkit::item::CacheItem;
///
/// let handle = MemoryHandle::new("l1");
/// let item = CacheItem::new("k", "v").unwrap();
/// assert!(handle.add(&item).unwrap());
/// assert!(!handle.add(&item).unwrap()); // existing entry wins
/// assert_eq!(
///     handle.get_item("k", None).unwrap().map(|i| i.into_value()),
///     Some("v"),
/// );
/// ```
pub struct MemoryHandle<V> {
    config: HandleConfig,
    stats: HandleStats,
    map: RwLock<FxHashMap<EntryKey, Entry<V>>>,
    remove_listener: RwLock<Option<RemoveListener<V>>>,
    version_counter: AtomicU64,
    max_items: Option<usize>,
}

impl<V: Clone + Send + Sync + 'static> MemoryHandle<V> {
    /// Creates an unbounded handle with no expiration defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(HandleConfig::new(name))
    }

    /// Creates a handle holding at most `max_items` entries.
    ///
    /// Storing a new key at the bound drops the least recently accessed
    /// entry and reports it through the remove listener as an eviction.
    /// Replacing an existing key never evicts.
    pub fn bounded(name: impl Into<String>, max_items: usize) -> Self {
        let mut handle = Self::from_config(HandleConfig::new(name));
        handle.max_items = Some(max_items);
        handle
    }

    /// Creates a handle from a configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configured default expiration is
    /// itself `Default`, requires a timeout but has none, or lies below the
    /// handle's resolution floor.
    pub fn with_config(config: HandleConfig) -> CacheResult<Self> {
        if config.default_mode == ExpirationMode::Default {
            return Err(CacheError::invalid_argument(
                "a handle default expiration cannot be 'Default'",
            ));
        }
        if config.default_mode.requires_timeout() {
            check_floor(config.default_timeout)?;
        }
        Ok(Self::from_config(config))
    }

    fn from_config(config: HandleConfig) -> Self {
        Self {
            config,
            stats: HandleStats::new(),
            map: RwLock::new(FxHashMap::default()),
            remove_listener: RwLock::new(None),
            version_counter: AtomicU64::new(1),
            max_items: None,
        }
    }

    fn next_version(&self) -> u64 {
        self.version_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Applies this handle's expiration defaults when the item asks for them
    /// and validates the resulting timeout against the resolution floor.
    fn prepare(&self, item: &CacheItem<V>) -> CacheResult<CacheItem<V>> {
        let prepared = if item.uses_expiration_defaults() {
            item.with_applied_defaults(self.config.default_mode, self.config.default_timeout)
        } else {
            item.clone()
        };
        if prepared.expiration_mode().requires_timeout() {
            check_floor(prepared.expiration_timeout())?;
        }
        Ok(prepared)
    }

    fn notify_removed(&self, key: &str, region: Option<&str>, reason: RemoveReason, value: V) {
        let listener = self.remove_listener.read();
        if let Some(listener) = &*listener {
            listener(HandleRemoveEvent {
                key: key.to_owned(),
                region: region.map(str::to_owned),
                reason,
                value: Some(value),
            });
        }
    }

    /// Frees capacity for a new key by dropping least-recently-accessed
    /// entries. Returns the victims for listener notification after the
    /// lock is released. Linear victim scan; bounded handles are expected
    /// to stay small.
    fn make_room(
        &self,
        map: &mut FxHashMap<EntryKey, Entry<V>>,
        incoming: &EntryKey,
    ) -> Vec<(EntryKey, Entry<V>)> {
        let Some(max_items) = self.max_items else {
            return Vec::new();
        };
        if map.contains_key(incoming) {
            return Vec::new();
        }

        let mut victims = Vec::new();
        while map.len() >= max_items {
            let Some(victim_key) = map
                .iter()
                .min_by_key(|(_, entry)| entry.item.last_accessed_utc())
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            match map.remove(&victim_key) {
                Some(entry) => victims.push((victim_key, entry)),
                None => break,
            }
        }
        victims
    }

    fn notify_evicted(&self, victims: Vec<(EntryKey, Entry<V>)>) {
        for ((region, key), entry) in victims {
            self.notify_removed(
                &key,
                region.as_deref(),
                RemoveReason::Evicted,
                entry.item.into_value(),
            );
        }
    }

    /// Drops an expired entry and reports it. Returns the removed value.
    fn purge_expired(&self, key: &str, region: Option<&str>) -> Option<V> {
        let map_key = entry_key(key, region);
        let removed = {
            let mut map = self.map.write();
            let expired = matches!(map.get(&map_key), Some(entry) if entry.item.is_expired());
            if expired {
                map.remove(&map_key)
            } else {
                None
            }
        };
        removed.map(|entry| {
            let value = entry.item.into_value();
            self.notify_removed(key, region, RemoveReason::Expired, value.clone());
            value
        })
    }
}

fn check_floor(timeout: Duration) -> CacheResult<()> {
    if timeout < RESOLUTION_FLOOR {
        return Err(CacheError::invalid_argument(format!(
            "expiration timeout below {:?} is not supported by the memory handle",
            RESOLUTION_FLOOR,
        )));
    }
    Ok(())
}

impl<V: Clone + Send + Sync + 'static> CacheHandle<V> for MemoryHandle<V> {
    fn config(&self) -> &HandleConfig {
        &self.config
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.count() as u64)
    }

    fn get_item(&self, key: &str, region: Option<&str>) -> CacheResult<Option<CacheItem<V>>> {
        self.stats.inc_gets();
        let map_key = entry_key(key, region);

        let mut expired_value = None;
        let mut found = None;
        {
            let mut map = self.map.write();
            let expired = matches!(map.get(&map_key), Some(entry) if entry.item.is_expired());
            if expired {
                if let Some(entry) = map.remove(&map_key) {
                    expired_value = Some(entry.item.into_value());
                }
            } else if let Some(entry) = map.get_mut(&map_key) {
                entry.item.set_last_accessed(SystemTime::now());
                found = Some(entry.item.clone());
            }
        }

        if let Some(value) = expired_value {
            self.notify_removed(key, region, RemoveReason::Expired, value);
        }

        match found {
            Some(item) => {
                self.stats.inc_hits();
                Ok(Some(item))
            },
            None => {
                self.stats.inc_misses();
                Ok(None)
            },
        }
    }

    fn add(&self, item: &CacheItem<V>) -> CacheResult<bool> {
        self.stats.inc_adds();
        let prepared = self.prepare(item)?;
        let map_key = entry_key(item.key(), item.region());

        let evicted = {
            let mut map = self.map.write();
            let live = matches!(map.get(&map_key), Some(entry) if !entry.item.is_expired());
            if live {
                return Ok(false);
            }
            let evicted = self.make_room(&mut map, &map_key);
            map.insert(
                map_key,
                Entry {
                    item: prepared,
                    version: self.next_version(),
                },
            );
            evicted
        };
        self.notify_evicted(evicted);
        Ok(true)
    }

    fn put(&self, item: &CacheItem<V>) -> CacheResult<()> {
        self.stats.inc_puts();
        let prepared = self.prepare(item)?;
        let map_key = entry_key(item.key(), item.region());

        let evicted = {
            let mut map = self.map.write();
            let evicted = self.make_room(&mut map, &map_key);
            map.insert(
                map_key,
                Entry {
                    item: prepared,
                    version: self.next_version(),
                },
            );
            evicted
        };
        self.notify_evicted(evicted);
        Ok(())
    }

    fn remove(&self, key: &str, region: Option<&str>) -> CacheResult<bool> {
        let removed = self.map.write().remove(&entry_key(key, region)).is_some();
        if removed {
            self.stats.inc_removes();
        }
        Ok(removed)
    }

    fn exists(&self, key: &str, region: Option<&str>) -> CacheResult<bool> {
        let map = self.map.read();
        Ok(map
            .get(&entry_key(key, region))
            .is_some_and(|entry| !entry.item.is_expired()))
    }

    fn count(&self) -> usize {
        self.map.read().len()
    }

    fn clear(&self) -> CacheResult<()> {
        self.stats.inc_clears();
        self.map.write().clear();
        Ok(())
    }

    fn clear_region(&self, region: &str) -> CacheResult<()> {
        self.stats.inc_clear_regions();
        self.map
            .write()
            .retain(|(entry_region, _), _| entry_region.as_deref() != Some(region));
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        region: Option<&str>,
        apply: &UpdateFn<V>,
        max_retries: u32,
    ) -> CacheResult<UpdateOutcome<V>> {
        self.stats.inc_updates();
        let map_key = entry_key(key, region);

        let mut tries = 0u32;
        let mut conflict_occurred = false;
        loop {
            tries += 1;

            // Snapshot phase: no lock is held while the closure runs.
            let snapshot = {
                let map = self.map.read();
                match map.get(&map_key) {
                    None => Snapshot::Missing,
                    Some(entry) if entry.item.is_expired() => Snapshot::Expired,
                    Some(entry) => Snapshot::Live(entry.item.value().clone(), entry.version),
                }
            };
            let (current, observed_version) = match snapshot {
                Snapshot::Missing => return Ok(UpdateOutcome::KeyMissing),
                Snapshot::Expired => {
                    self.purge_expired(key, region);
                    return Ok(UpdateOutcome::KeyMissing);
                },
                Snapshot::Live(value, version) => (value, version),
            };

            let next = match apply(&current) {
                Some(value) => value,
                None => return Ok(UpdateOutcome::FactoryReturnedNone),
            };

            // Commit phase: version check detects writers that slipped in
            // between the snapshot and this lock acquisition.
            {
                let mut map = self.map.write();
                match map.get_mut(&map_key) {
                    None => return Ok(UpdateOutcome::KeyMissing),
                    Some(entry) if entry.version == observed_version => {
                        let item = entry.item.with_value(next);
                        entry.item = item.clone();
                        entry.version = self.next_version();
                        return Ok(UpdateOutcome::Updated {
                            item,
                            conflict_occurred,
                            tries,
                        });
                    },
                    Some(_) => {
                        conflict_occurred = true;
                        if tries > max_retries {
                            return Ok(UpdateOutcome::RetriesExhausted { tries });
                        }
                    },
                }
            }
        }
    }

    fn set_remove_listener(&self, listener: RemoveListener<V>) {
        *self.remove_listener.write() = Some(listener);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
