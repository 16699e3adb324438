//! Cache items and the expiration model.
//!
//! A [`CacheItem`] is an immutable snapshot of one cached entry: key, optional
//! region, value, and expiration configuration. Mutating operations never edit
//! an item in place; they produce a new item (the transformer methods below).
//!
//! ## Expiration Modes
//!
//! | Mode       | Meaning                                                    |
//! |------------|------------------------------------------------------------|
//! | `None`     | Never expires by time (explicitly requested).              |
//! | `Default`  | Inherit the storing handle's configured default.           |
//! | `Absolute` | Expires `timeout` after the creation instant.              |
//! | `Sliding`  | Expires `timeout` after the most recent access.            |
//!
//! `Default` is the construction default: an item built without an explicit
//! expiration carries `uses_expiration_defaults() == true`, and every handle
//! that stores it applies its own configured default at store time. An item
//! built with an explicit mode (including explicit `None`) keeps that mode
//! across all layers.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use tierkit::item::{CacheItem, ExpirationMode};
//!
//! let item = CacheItem::new("user:42", "payload")
//!     .unwrap()
//!     .with_sliding_expiration(Duration::from_secs(30))
//!     .unwrap();
//!
//! assert_eq!(item.expiration_mode(), ExpirationMode::Sliding);
//! assert!(!item.uses_expiration_defaults());
//! assert!(!item.is_expired());
//! ```

use std::time::{Duration, SystemTime};

use crate::error::{CacheError, CacheResult};

/// How an item's lifetime is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpirationMode {
    /// The item never expires by time.
    None,
    /// The item inherits the storing handle's default mode and timeout.
    Default,
    /// The item expires a fixed duration after its creation instant.
    Absolute,
    /// The item expires a fixed duration after its last access.
    Sliding,
}

impl ExpirationMode {
    /// Returns `true` for the modes that require a strictly positive timeout.
    #[inline]
    pub fn requires_timeout(self) -> bool {
        matches!(self, ExpirationMode::Absolute | ExpirationMode::Sliding)
    }
}

/// One cached entry: key, optional region, value, expiration configuration.
///
/// Items are value snapshots. The coordinator and handles clone them freely,
/// so `V` should be cheap to clone (wrap large payloads in `Arc`).
#[derive(Debug, Clone)]
pub struct CacheItem<V> {
    key: String,
    region: Option<String>,
    value: V,
    expiration_mode: ExpirationMode,
    expiration_timeout: Duration,
    created_utc: SystemTime,
    last_accessed_utc: SystemTime,
    uses_expiration_defaults: bool,
}

impl<V> CacheItem<V> {
    /// Creates an item in the global namespace with default expiration.
    ///
    /// The item carries `uses_expiration_defaults() == true`: each handle that
    /// stores it applies its own configured default.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `key` is empty or whitespace.
    pub fn new(key: impl Into<String>, value: V) -> CacheResult<Self> {
        Self::build(key.into(), None, value, None)
    }

    /// Creates an item inside a region with default expiration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `key` or `region` is empty or whitespace.
    pub fn with_region(
        key: impl Into<String>,
        region: impl Into<String>,
        value: V,
    ) -> CacheResult<Self> {
        Self::build(key.into(), Some(region.into()), value, None)
    }

    /// Creates an item with an explicit expiration configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the key is empty, or if `mode` is
    /// `Absolute`/`Sliding` with a zero timeout.
    pub fn with_expiration(
        key: impl Into<String>,
        value: V,
        mode: ExpirationMode,
        timeout: Duration,
    ) -> CacheResult<Self> {
        Self::build(key.into(), None, value, Some((mode, timeout)))
    }

    /// Creates a regioned item with an explicit expiration configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` on empty key/region, or on a zero timeout for
    /// `Absolute`/`Sliding`.
    pub fn with_region_and_expiration(
        key: impl Into<String>,
        region: impl Into<String>,
        value: V,
        mode: ExpirationMode,
        timeout: Duration,
    ) -> CacheResult<Self> {
        Self::build(key.into(), Some(region.into()), value, Some((mode, timeout)))
    }

    /// Creates an item for an optional region, with default expiration.
    ///
    /// Equivalent to [`new`](Self::new) when `region` is `None` and
    /// [`with_region`](Self::with_region) otherwise.
    pub fn from_parts(key: &str, region: Option<&str>, value: V) -> CacheResult<Self> {
        Self::build(key.to_owned(), region.map(str::to_owned), value, None)
    }

    fn build(
        key: String,
        region: Option<String>,
        value: V,
        expiration: Option<(ExpirationMode, Duration)>,
    ) -> CacheResult<Self> {
        if key.trim().is_empty() {
            return Err(CacheError::invalid_argument("key must not be empty"));
        }
        if let Some(region) = &region {
            if region.trim().is_empty() {
                return Err(CacheError::invalid_argument(
                    "region must not be empty; omit it for the global namespace",
                ));
            }
        }

        let (mode, timeout, uses_defaults) = match expiration {
            Some((mode, timeout)) => {
                validate_timeout(mode, timeout)?;
                (mode, timeout, mode == ExpirationMode::Default)
            },
            None => (ExpirationMode::Default, Duration::ZERO, true),
        };

        let now = SystemTime::now();
        Ok(Self {
            key,
            region,
            value,
            expiration_mode: mode,
            expiration_timeout: timeout,
            created_utc: now,
            last_accessed_utc: now,
            uses_expiration_defaults: uses_defaults,
        })
    }

    // -- accessors --------------------------------------------------------

    /// The item's key.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The item's region, or `None` for the global namespace.
    #[inline]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Borrows the cached value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the item and returns the cached value.
    #[inline]
    pub fn into_value(self) -> V {
        self.value
    }

    /// The item's expiration mode.
    #[inline]
    pub fn expiration_mode(&self) -> ExpirationMode {
        self.expiration_mode
    }

    /// The item's expiration timeout. Zero for `None`/`Default`.
    #[inline]
    pub fn expiration_timeout(&self) -> Duration {
        self.expiration_timeout
    }

    /// The instant this item (or its current absolute window) was created.
    #[inline]
    pub fn created_utc(&self) -> SystemTime {
        self.created_utc
    }

    /// The instant of the most recent successful read through the coordinator.
    #[inline]
    pub fn last_accessed_utc(&self) -> SystemTime {
        self.last_accessed_utc
    }

    /// `true` if the item was built without an explicit expiration and the
    /// storing handle's defaults apply.
    #[inline]
    pub fn uses_expiration_defaults(&self) -> bool {
        self.uses_expiration_defaults
    }

    /// Computes whether the item has expired at this instant.
    ///
    /// `Absolute` measures from the creation instant, `Sliding` from the last
    /// access; `None` and `Default` never expire by time. The boundary is
    /// inclusive: an item whose timeout has exactly elapsed is expired.
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now();
        match self.expiration_mode {
            ExpirationMode::Absolute => now
                .duration_since(self.created_utc)
                .map_or(false, |elapsed| elapsed >= self.expiration_timeout),
            ExpirationMode::Sliding => now
                .duration_since(self.last_accessed_utc)
                .map_or(false, |elapsed| elapsed >= self.expiration_timeout),
            ExpirationMode::None | ExpirationMode::Default => false,
        }
    }

    // -- transformers -----------------------------------------------------

    /// Returns a new item expiring `timeout` after *now*.
    ///
    /// The creation instant is reset so the new absolute window starts at the
    /// moment of re-expiration, not at the original creation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `timeout` is zero.
    pub fn with_absolute_expiration(&self, timeout: Duration) -> CacheResult<Self>
    where
        V: Clone,
    {
        validate_timeout(ExpirationMode::Absolute, timeout)?;
        Ok(self.reconfigured(ExpirationMode::Absolute, timeout, false))
    }

    /// Returns a new item expiring `timeout` after its most recent access.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `timeout` is zero.
    pub fn with_sliding_expiration(&self, timeout: Duration) -> CacheResult<Self>
    where
        V: Clone,
    {
        validate_timeout(ExpirationMode::Sliding, timeout)?;
        Ok(self.reconfigured(ExpirationMode::Sliding, timeout, false))
    }

    /// Returns a new item that never expires by time.
    ///
    /// This is the explicit "store forever" configuration; unlike
    /// [`with_default_expiration`](Self::with_default_expiration), handles
    /// will not override it with their defaults.
    pub fn with_no_expiration(&self) -> Self
    where
        V: Clone,
    {
        self.reconfigured(ExpirationMode::None, Duration::ZERO, false)
    }

    /// Returns a new item that re-inherits handle defaults at store time.
    pub fn with_default_expiration(&self) -> Self
    where
        V: Clone,
    {
        self.reconfigured(ExpirationMode::Default, Duration::ZERO, true)
    }

    /// Returns a new item carrying `value`, keeping key, region, and
    /// expiration configuration. Timestamps restart at *now*.
    pub fn with_value(&self, value: V) -> Self {
        let now = SystemTime::now();
        Self {
            key: self.key.clone(),
            region: self.region.clone(),
            value,
            expiration_mode: self.expiration_mode,
            expiration_timeout: self.expiration_timeout,
            created_utc: now,
            last_accessed_utc: now,
            uses_expiration_defaults: self.uses_expiration_defaults,
        }
    }

    /// Applies a storing handle's default expiration, keeping the
    /// inherit-defaults flag set so the next handle re-applies its own.
    pub(crate) fn with_applied_defaults(&self, mode: ExpirationMode, timeout: Duration) -> Self
    where
        V: Clone,
    {
        self.reconfigured(mode, timeout, true)
    }

    pub(crate) fn set_last_accessed(&mut self, at: SystemTime) {
        self.last_accessed_utc = at;
    }

    fn reconfigured(&self, mode: ExpirationMode, timeout: Duration, uses_defaults: bool) -> Self
    where
        V: Clone,
    {
        let now = SystemTime::now();
        Self {
            key: self.key.clone(),
            region: self.region.clone(),
            value: self.value.clone(),
            expiration_mode: mode,
            expiration_timeout: timeout,
            created_utc: now,
            last_accessed_utc: now,
            uses_expiration_defaults: uses_defaults,
        }
    }
}

fn validate_timeout(mode: ExpirationMode, timeout: Duration) -> CacheResult<()> {
    if mode.requires_timeout() && timeout.is_zero() {
        return Err(CacheError::invalid_argument(
            "absolute and sliding expiration require a timeout greater than zero",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
