//! The multi-tier coordinator.
//!
//! [`TieredCache`] composes an ordered, non-empty list of handles into one
//! logical cache. Index 0 is the topmost (fastest) layer; the last index is
//! the bottommost, authoritative layer.
//!
//! ## Pipelines
//!
//! ```text
//! get:    H[0] → H[1] → … → hit at H[i]
//!         └─ promote the item into H[0..i-1] (via add; existing entries win)
//!
//! add:    write H[n-1], then evict key from every other handle
//! put:    write every handle (fan-out)
//! remove: remove on every handle, OR the results
//! update: optimistic loop on H[n-1], then reconcile per UpdateMode
//! ```
//!
//! After every write the coordinator publishes to the backplane (when one is
//! configured) and notifies local observers. Inbound backplane events evict
//! or clear the appropriate subset of handles; see the module docs on
//! [`crate::backplane`].
//!
//! ## Consistency
//!
//! No coordinator-wide lock spans multi-handle operations. Upper layers may
//! transiently disagree with the bottom layer; every write evicts stale upper
//! copies and every read-hit re-promotes, so layers converge without global
//! coordination. The bottom handle is the serialization point for updates.

mod update;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::backplane::{Backplane, BackplaneEvent, ChangeAction};
use crate::config::{CoordinatorConfig, UpdateMode};
use crate::error::{CacheError, CacheErrorKind, CacheResult};
use crate::events::{CacheEvent, EventOrigin, ObserverId, ObserverRegistry};
use crate::handle::{CacheHandle, HandleRemoveEvent};
use crate::item::{CacheItem, ExpirationMode};
use crate::stats::StatsSnapshot;

/// A multi-tier cache: an ordered stack of handles behind one key→value
/// surface, kept consistent by eviction, promotion, and backplane fan-out.
///
/// Cloning is cheap and shares the same underlying cache.
pub struct TieredCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> std::fmt::Debug for TieredCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache").finish_non_exhaustive()
    }
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct Inner<V> {
    config: CoordinatorConfig,
    handles: Vec<Arc<dyn CacheHandle<V>>>,
    observers: ObserverRegistry<V>,
    backplane: Option<Arc<dyn Backplane>>,
    disposed: AtomicBool,
}

impl<V: Clone + Send + Sync + 'static> TieredCache<V> {
    /// Assembles a coordinator from configured parts. Used by
    /// [`CoordinatorBuilder`](crate::builder::CoordinatorBuilder).
    pub(crate) fn assemble(
        config: CoordinatorConfig,
        handles: Vec<Arc<dyn CacheHandle<V>>>,
        backplane: Option<Arc<dyn Backplane>>,
    ) -> CacheResult<Self> {
        if handles.is_empty() {
            return Err(CacheError::invalid_state(
                "a cache requires at least one handle",
            ));
        }

        let inner = Arc::new(Inner {
            config,
            handles,
            observers: ObserverRegistry::new(),
            backplane,
            disposed: AtomicBool::new(false),
        });

        for (index, handle) in inner.handles.iter().enumerate() {
            let weak = Arc::downgrade(&inner);
            handle.set_remove_listener(Box::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_handle_remove(index, event);
                }
            }));
        }

        if let Some(backplane) = &inner.backplane {
            let sources: Vec<usize> = inner
                .handles
                .iter()
                .enumerate()
                .filter(|(_, handle)| handle.config().is_backplane_source)
                .map(|(index, _)| index)
                .collect();
            let source = match sources.as_slice() {
                [index] => *index,
                _ => {
                    return Err(CacheError::invalid_state(
                        "a backplane requires exactly one handle marked as its source",
                    ));
                },
            };

            // A change from a distributed source is already reflected in the
            // shared storage; only the other layers drop their copies. A
            // non-distributed source is a per-process store, so remote
            // changes and removes must drop on it as well.
            let excluding: Vec<usize> =
                (0..inner.handles.len()).filter(|index| *index != source).collect();
            let mut including = excluding.clone();
            if !inner.handles[source].config().is_distributed {
                including.push(source);
            }
            let change_set = if inner.handles[source].config().is_distributed {
                excluding
            } else {
                including.clone()
            };

            let weak = Arc::downgrade(&inner);
            backplane.subscribe(Box::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_backplane_event(event, &change_set, &including);
                }
            }));
        }

        Ok(Self { inner })
    }

    /// The coordinator's configured name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The coordinator's configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Number of composed handles.
    pub fn handle_count(&self) -> usize {
        self.inner.handles.len()
    }

    /// Per-handle statistics, in handle order.
    pub fn stats(&self) -> Vec<(String, StatsSnapshot)> {
        self.inner
            .handles
            .iter()
            .map(|handle| (handle.config().name.clone(), handle.stats()))
            .collect()
    }

    /// Registers an observer for cache events. Observers run synchronously
    /// on the operating thread, in registration order.
    pub fn on_event(
        &self,
        observer: impl Fn(&CacheEvent<V>) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.observers.register(observer)
    }

    /// Removes a registered observer. Returns whether it was present.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    /// Marks the cache disposed and detaches the backplane subscription.
    /// Every operation afterwards fails with a `Disposed` error. Idempotent;
    /// also performed when the last clone is dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    // -- reads --------------------------------------------------------------

    /// Returns the cached value for `(key, region)`.
    pub fn get(&self, key: &str, region: Option<&str>) -> CacheResult<Option<V>> {
        Ok(self.get_item(key, region)?.map(CacheItem::into_value))
    }

    /// Returns the cached item for `(key, region)`.
    ///
    /// Handles are probed top-down. A hit at layer `i` refreshes the item's
    /// last-access instant and promotes it into every layer above `i` with
    /// `add`, so a newer value concurrently written up there is not
    /// overwritten.
    pub fn get_item(&self, key: &str, region: Option<&str>) -> CacheResult<Option<CacheItem<V>>> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        validate_region(region)?;

        for (index, handle) in self.inner.handles.iter().enumerate() {
            let found = match handle.get_item(key, region) {
                Ok(found) => found,
                Err(error) => {
                    warn!(
                        cache = %self.inner.config.name,
                        handle = %handle.config().name,
                        %error,
                        "read failed; continuing down the stack",
                    );
                    None
                },
            };
            let Some(mut item) = found else { continue };

            item.set_last_accessed(SystemTime::now());
            for upper in &self.inner.handles[..index] {
                if let Err(error) = upper.add(&item) {
                    warn!(
                        cache = %self.inner.config.name,
                        handle = %upper.config().name,
                        %error,
                        "promotion failed",
                    );
                }
            }
            self.inner.observers.emit(&CacheEvent::Get {
                key: key.to_owned(),
                region: region.map(str::to_owned),
                origin: EventOrigin::Local,
            });
            return Ok(Some(item));
        }
        Ok(None)
    }

    /// Whether a live entry exists for `(key, region)` in any layer. Does not
    /// promote or touch access metadata.
    pub fn exists(&self, key: &str, region: Option<&str>) -> CacheResult<bool> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        validate_region(region)?;

        for handle in &self.inner.handles {
            match handle.exists(key, region) {
                Ok(true) => return Ok(true),
                Ok(false) => {},
                Err(error) => self.inner.log_swallowed(handle.as_ref(), &error, "exists failed")?,
            }
        }
        Ok(false)
    }

    // -- writes ---------------------------------------------------------------

    /// Stores the item only if the key is absent. Success is defined by the
    /// bottommost layer; all other layers are evicted either way, since they
    /// may hold a different version.
    pub fn add(&self, item: CacheItem<V>) -> CacheResult<bool> {
        self.inner.ensure_open()?;
        let handles = &self.inner.handles;
        let Some((bottom, uppers)) = handles.split_last() else {
            return Ok(false);
        };

        let added = match bottom.add(&item) {
            Ok(added) => added,
            Err(error) if error.kind() == CacheErrorKind::Backend => {
                warn!(
                    cache = %self.inner.config.name,
                    handle = %bottom.config().name,
                    %error,
                    "bottom-layer add failed",
                );
                false
            },
            Err(error) => return Err(error),
        };

        for upper in uppers {
            self.inner.evict_quietly(upper.as_ref(), item.key(), item.region());
        }

        if added {
            if let Some(backplane) = &self.inner.backplane {
                backplane.notify_change(item.key(), item.region(), ChangeAction::Add);
            }
            self.inner.observers.emit(&CacheEvent::Add {
                key: item.key().to_owned(),
                region: item.region().map(str::to_owned),
                origin: EventOrigin::Local,
            });
        }
        Ok(added)
    }

    /// Stores the item in every layer, replacing existing entries.
    pub fn put(&self, item: CacheItem<V>) -> CacheResult<()> {
        self.inner.ensure_open()?;

        for handle in &self.inner.handles {
            if let Err(error) = handle.put(&item) {
                self.inner.log_swallowed(handle.as_ref(), &error, "put failed")?;
            }
        }

        if let Some(backplane) = &self.inner.backplane {
            backplane.notify_change(item.key(), item.region(), ChangeAction::Put);
        }
        self.inner.observers.emit(&CacheEvent::Put {
            key: item.key().to_owned(),
            region: item.region().map(str::to_owned),
            origin: EventOrigin::Local,
        });
        Ok(())
    }

    /// Removes `(key, region)` from every layer. Returns whether any layer
    /// held an entry.
    pub fn remove(&self, key: &str, region: Option<&str>) -> CacheResult<bool> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        validate_region(region)?;

        let mut removed_any = false;
        for handle in &self.inner.handles {
            match handle.remove(key, region) {
                Ok(removed) => removed_any |= removed,
                Err(error) => self.inner.log_swallowed(handle.as_ref(), &error, "remove failed")?,
            }
        }

        if removed_any {
            if let Some(backplane) = &self.inner.backplane {
                backplane.notify_remove(key, region);
            }
            self.inner.observers.emit(&CacheEvent::Remove {
                key: key.to_owned(),
                region: region.map(str::to_owned),
                origin: EventOrigin::Local,
            });
        }
        Ok(removed_any)
    }

    /// Clears every layer.
    pub fn clear(&self) -> CacheResult<()> {
        self.inner.ensure_open()?;

        for handle in &self.inner.handles {
            if let Err(error) = handle.clear() {
                self.inner.log_swallowed(handle.as_ref(), &error, "clear failed")?;
            }
        }

        if let Some(backplane) = &self.inner.backplane {
            backplane.notify_clear();
        }
        self.inner.observers.emit(&CacheEvent::Clear {
            origin: EventOrigin::Local,
        });
        Ok(())
    }

    /// Clears one region on every layer.
    pub fn clear_region(&self, region: &str) -> CacheResult<()> {
        self.inner.ensure_open()?;
        validate_region(Some(region))?;

        for handle in &self.inner.handles {
            if let Err(error) = handle.clear_region(region) {
                self.inner
                    .log_swallowed(handle.as_ref(), &error, "clear_region failed")?;
            }
        }

        if let Some(backplane) = &self.inner.backplane {
            backplane.notify_clear_region(region);
        }
        self.inner.observers.emit(&CacheEvent::ClearRegion {
            region: region.to_owned(),
            origin: EventOrigin::Local,
        });
        Ok(())
    }

    // -- expiration ------------------------------------------------------------

    /// Rewrites the item's expiration configuration. A missing key is a
    /// no-op. The rewritten item is stored with `put`, so every layer picks
    /// up the new configuration.
    pub fn expire(
        &self,
        key: &str,
        region: Option<&str>,
        mode: ExpirationMode,
        timeout: Duration,
    ) -> CacheResult<()> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        validate_region(region)?;

        let Some(item) = self.get_item(key, region)? else {
            return Ok(());
        };
        let item = match mode {
            ExpirationMode::Absolute => item.with_absolute_expiration(timeout)?,
            ExpirationMode::Sliding => item.with_sliding_expiration(timeout)?,
            ExpirationMode::None => item.with_no_expiration(),
            ExpirationMode::Default => item.with_default_expiration(),
        };
        self.put(item)
    }

    /// Sets an absolute expiration at the given wall-clock deadline.
    pub fn expire_at(
        &self,
        key: &str,
        region: Option<&str>,
        deadline: SystemTime,
    ) -> CacheResult<()> {
        let timeout = deadline
            .duration_since(SystemTime::now())
            .map_err(|_| CacheError::invalid_argument("absolute expiration must lie in the future"))?;
        self.expire(key, region, ExpirationMode::Absolute, timeout)
    }

    /// Sets a sliding expiration measured from each access.
    pub fn expire_sliding(
        &self,
        key: &str,
        region: Option<&str>,
        timeout: Duration,
    ) -> CacheResult<()> {
        self.expire(key, region, ExpirationMode::Sliding, timeout)
    }

    /// Removes any expiration: the item never again expires by time.
    pub fn remove_expiration(&self, key: &str, region: Option<&str>) -> CacheResult<()> {
        self.expire(key, region, ExpirationMode::None, Duration::ZERO)
    }
}

impl<V: Clone + Send + Sync + 'static> Inner<V> {
    pub(crate) fn ensure_open(&self) -> CacheResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CacheError::disposed(&self.config.name));
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(backplane) = &self.backplane {
            backplane.close();
        }
    }

    /// Best-effort eviction used for reconciliation; failures are logged and
    /// never surface.
    pub(crate) fn evict_quietly(
        &self,
        handle: &dyn CacheHandle<V>,
        key: &str,
        region: Option<&str>,
    ) {
        if let Err(error) = handle.remove(key, region) {
            warn!(
                cache = %self.config.name,
                handle = %handle.config().name,
                %error,
                "eviction failed",
            );
        }
    }

    /// Evicts `(key, region)` from every handle except `except`.
    pub(crate) fn evict_from_other_handles(&self, except: usize, key: &str, region: Option<&str>) {
        for (index, handle) in self.handles.iter().enumerate() {
            if index != except {
                self.evict_quietly(handle.as_ref(), key, region);
            }
        }
    }

    /// Fan-out error policy: transient backend failures are logged and the
    /// operation continues with the remaining handles; anything else aborts.
    fn log_swallowed(
        &self,
        handle: &dyn CacheHandle<V>,
        error: &CacheError,
        what: &'static str,
    ) -> CacheResult<()> {
        if error.kind() == CacheErrorKind::Backend {
            warn!(
                cache = %self.config.name,
                handle = %handle.config().name,
                %error,
                "{what}; continuing with remaining handles",
            );
            Ok(())
        } else {
            Err(error.clone())
        }
    }

    /// Reaction to a handle removing an entry on its own (expiry, eviction).
    fn on_handle_remove(&self, index: usize, event: HandleRemoveEvent<V>) {
        if self.config.update_mode == UpdateMode::Up {
            for handle in &self.handles[..index] {
                self.evict_quietly(handle.as_ref(), &event.key, event.region.as_deref());
            }
        }
        self.observers.emit(&CacheEvent::RemoveByHandle {
            key: event.key,
            region: event.region,
            reason: event.reason,
            level: index + 1,
            value: event.value,
        });
    }

    /// Reaction to an event published by another coordinator instance.
    fn on_backplane_event(&self, event: BackplaneEvent, change_set: &[usize], including: &[usize]) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        match event {
            BackplaneEvent::Change {
                key,
                region,
                action,
            } => {
                for &index in change_set {
                    self.evict_quietly(self.handles[index].as_ref(), &key, region.as_deref());
                }
                let origin = EventOrigin::Remote;
                let event = match action {
                    ChangeAction::Add => CacheEvent::Add {
                        key,
                        region,
                        origin,
                    },
                    ChangeAction::Put => CacheEvent::Put {
                        key,
                        region,
                        origin,
                    },
                    ChangeAction::Update => CacheEvent::Update {
                        key,
                        region,
                        origin,
                    },
                };
                self.observers.emit(&event);
            },
            BackplaneEvent::Remove { key, region } => {
                for &index in including {
                    self.evict_quietly(self.handles[index].as_ref(), &key, region.as_deref());
                }
                self.observers.emit(&CacheEvent::Remove {
                    key,
                    region,
                    origin: EventOrigin::Remote,
                });
            },
            BackplaneEvent::Clear => {
                for &index in including {
                    if let Err(error) = self.handles[index].clear() {
                        warn!(
                            cache = %self.config.name,
                            handle = %self.handles[index].config().name,
                            %error,
                            "remote clear failed",
                        );
                    }
                }
                self.observers.emit(&CacheEvent::Clear {
                    origin: EventOrigin::Remote,
                });
            },
            BackplaneEvent::ClearRegion { region } => {
                for &index in including {
                    if let Err(error) = self.handles[index].clear_region(&region) {
                        warn!(
                            cache = %self.config.name,
                            handle = %self.handles[index].config().name,
                            %error,
                            "remote clear_region failed",
                        );
                    }
                }
                self.observers.emit(&CacheEvent::ClearRegion {
                    region,
                    origin: EventOrigin::Remote,
                });
            },
        }
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(backplane) = &self.backplane {
            backplane.close();
        }
        // Handles shut down in reverse construction order.
        while self.handles.pop().is_some() {}
    }
}

pub(crate) fn validate_key(key: &str) -> CacheResult<()> {
    if key.trim().is_empty() {
        return Err(CacheError::invalid_argument("key must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_region(region: Option<&str>) -> CacheResult<()> {
    if let Some(region) = region {
        if region.trim().is_empty() {
            return Err(CacheError::invalid_argument(
                "region must not be empty; omit it for the global namespace",
            ));
        }
    }
    Ok(())
}
