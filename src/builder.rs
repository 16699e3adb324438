//! Coordinator builder.
//!
//! Collects handles (in layer order), retry/update configuration, and an
//! optional backplane, then validates the whole arrangement in `build()`.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tierkit::builder::CoordinatorBuilder;
//! use tierkit::handle::memory::MemoryHandle;
//! use tierkit::item::CacheItem;
//!
//! let cache = CoordinatorBuilder::new("orders")
//!     .handle(Arc::new(MemoryHandle::new("l1")))
//!     .handle(Arc::new(MemoryHandle::new("l2")))
//!     .build()
//!     .unwrap();
//!
//! cache.add(CacheItem::new("k", 1).unwrap()).unwrap();
//! assert_eq!(cache.get("k", None).unwrap(), Some(1));
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::backplane::Backplane;
use crate::config::{CoordinatorConfig, UpdateMode};
use crate::coordinator::TieredCache;
use crate::error::{CacheError, CacheResult};
use crate::handle::CacheHandle;

/// Builder for [`TieredCache`].
///
/// Handles are layered in the order they are added: the first is the topmost
/// (fastest) layer, the last is the bottommost, authoritative one.
pub struct CoordinatorBuilder<V> {
    config: CoordinatorConfig,
    handles: Vec<Arc<dyn CacheHandle<V>>>,
    backplane: Option<Arc<dyn Backplane>>,
}

impl<V: Clone + Send + Sync + 'static> CoordinatorBuilder<V> {
    /// Creates a builder for a cache with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: CoordinatorConfig {
                name: name.into(),
                ..CoordinatorConfig::default()
            },
            handles: Vec::new(),
            backplane: None,
        }
    }

    /// Sets the retry budget for update and get-or-add loops.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Sets the pause between coordinator-level retry iterations.
    pub fn retry_timeout(mut self, retry_timeout: Duration) -> Self {
        self.config.retry_timeout = retry_timeout;
        self
    }

    /// Sets how layers above a committed change are reconciled.
    pub fn update_mode(mut self, update_mode: UpdateMode) -> Self {
        self.config.update_mode = update_mode;
        self
    }

    /// Appends a handle below the ones already added.
    pub fn handle<H: CacheHandle<V> + 'static>(mut self, handle: Arc<H>) -> Self {
        self.handles.push(handle);
        self
    }

    /// Attaches a backplane. Exactly one handle must be marked as the
    /// backplane source.
    pub fn backplane<B: Backplane + 'static>(mut self, backplane: Arc<B>) -> Self {
        self.backplane = Some(backplane);
        self
    }

    /// Validates the arrangement and assembles the coordinator.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if no handle was added, or a backplane is attached
    ///   without exactly one source handle.
    /// - `InvalidArgument` if two handles share a name.
    pub fn build(self) -> CacheResult<TieredCache<V>> {
        for (index, handle) in self.handles.iter().enumerate() {
            let name = &handle.config().name;
            if self.handles[..index]
                .iter()
                .any(|other| &other.config().name == name)
            {
                return Err(CacheError::invalid_argument(format!(
                    "duplicate handle name '{}'",
                    name,
                )));
            }
        }
        TieredCache::assemble(self.config, self.handles, self.backplane)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
