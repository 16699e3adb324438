//! Atomic read-modify-write surfaces.
//!
//! All four operation families delegate their serialization to the
//! bottommost handle and reconcile the layers above afterwards:
//!
//! - `update` / `try_update`: one optimistic loop at the bottom, then evict
//!   the upper layers (update mode `Up`) so no stale version survives.
//! - `add_or_update`: race-tolerant upsert built from `add` + `try_update`;
//!   under concurrent inserts the first writer creates and the rest update,
//!   under concurrent deletes a writer may need to re-add.
//! - `get_or_add` / `try_get_or_add`: read-or-create with the value factory
//!   invoked **at most once per call**, even when the inner `add` loses a
//!   race and the loop retries.

use tracing::warn;

use crate::backplane::ChangeAction;
use crate::config::UpdateMode;
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, EventOrigin};
use crate::handle::{UpdateFn, UpdateOutcome};
use crate::item::CacheItem;

use super::{validate_key, validate_region, TieredCache};

/// Why an update did not commit. Strict surfaces convert these into
/// `InvalidState` errors; try-surfaces collapse them into `None`.
enum UpdateFailure {
    KeyMissing,
    RetriesExhausted,
    FactoryReturnedNone,
}

impl UpdateFailure {
    fn into_error(self) -> CacheError {
        match self {
            UpdateFailure::KeyMissing => CacheError::invalid_state("the key did not exist"),
            UpdateFailure::RetriesExhausted => {
                CacheError::invalid_state("too many retries; the update could not be completed")
            },
            UpdateFailure::FactoryReturnedNone => {
                CacheError::invalid_state("the value factory returned none")
            },
        }
    }
}

/// Outcome of the get-or-add loop before strict/try mapping.
enum GetOrAddOutcome<V> {
    Found(CacheItem<V>),
    FactoryReturnedNone,
    Exhausted,
}

impl<V: Clone + Send + Sync + 'static> TieredCache<V> {
    // -- update -----------------------------------------------------------

    /// Atomically applies `apply` to the current value, using the configured
    /// retry budget.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the key does not exist, the retry budget runs out,
    /// or `apply` returns `None`. Use [`try_update`](Self::try_update) for a
    /// non-failing variant.
    pub fn update(
        &self,
        key: &str,
        region: Option<&str>,
        apply: impl Fn(&V) -> Option<V> + 'static,
    ) -> CacheResult<V> {
        self.update_with_retries(key, region, apply, self.inner.config.max_retries)
    }

    /// [`update`](Self::update) with an explicit retry budget.
    pub fn update_with_retries(
        &self,
        key: &str,
        region: Option<&str>,
        apply: impl Fn(&V) -> Option<V> + 'static,
        max_retries: u32,
    ) -> CacheResult<V> {
        match self.update_internal(key, region, &apply, max_retries)? {
            Ok(value) => Ok(value),
            Err(failure) => Err(failure.into_error()),
        }
    }

    /// Non-failing update: returns `Ok(None)` when the key is missing, the
    /// retry budget runs out, or `apply` returns `None`.
    pub fn try_update(
        &self,
        key: &str,
        region: Option<&str>,
        apply: impl Fn(&V) -> Option<V> + 'static,
    ) -> CacheResult<Option<V>> {
        self.try_update_with_retries(key, region, apply, self.inner.config.max_retries)
    }

    /// [`try_update`](Self::try_update) with an explicit retry budget.
    pub fn try_update_with_retries(
        &self,
        key: &str,
        region: Option<&str>,
        apply: impl Fn(&V) -> Option<V> + 'static,
        max_retries: u32,
    ) -> CacheResult<Option<V>> {
        Ok(self
            .update_internal(key, region, &apply, max_retries)?
            .ok())
    }

    /// Core update pipeline: delegate to the bottom handle, reconcile the
    /// other layers per outcome, publish and notify on success.
    fn update_internal(
        &self,
        key: &str,
        region: Option<&str>,
        apply: &UpdateFn<V>,
        max_retries: u32,
    ) -> CacheResult<Result<V, UpdateFailure>> {
        self.inner.ensure_open()?;
        validate_key(key)?;
        validate_region(region)?;

        let handles = &self.inner.handles;
        let Some((bottom, uppers)) = handles.split_last() else {
            return Ok(Err(UpdateFailure::KeyMissing));
        };
        let bottom_index = handles.len() - 1;

        match bottom.update(key, region, apply, max_retries)? {
            UpdateOutcome::Updated { item, .. } => {
                if self.inner.config.update_mode == UpdateMode::Up {
                    for upper in uppers {
                        self.inner.evict_quietly(upper.as_ref(), key, region);
                    }
                }
                if let Some(backplane) = &self.inner.backplane {
                    backplane.notify_change(key, region, ChangeAction::Update);
                }
                self.inner.observers.emit(&CacheEvent::Update {
                    key: key.to_owned(),
                    region: region.map(str::to_owned),
                    origin: EventOrigin::Local,
                });
                Ok(Ok(item.into_value()))
            },
            UpdateOutcome::FactoryReturnedNone => {
                warn!(
                    cache = %self.inner.config.name,
                    key,
                    "value factory returned none during update",
                );
                Ok(Err(UpdateFailure::FactoryReturnedNone))
            },
            UpdateOutcome::RetriesExhausted { tries } => {
                // The layers may disagree about the key now; drop every copy
                // outside the serialization point.
                self.inner.evict_from_other_handles(bottom_index, key, region);
                warn!(
                    cache = %self.inner.config.name,
                    key,
                    tries,
                    "update exhausted its retry budget",
                );
                Ok(Err(UpdateFailure::RetriesExhausted))
            },
            UpdateOutcome::KeyMissing => {
                self.inner.evict_from_other_handles(bottom_index, key, region);
                Ok(Err(UpdateFailure::KeyMissing))
            },
        }
    }

    // -- add_or_update ----------------------------------------------------

    /// Adds the item, or updates the existing value with `apply` when the
    /// key is already present. Retries the add/update pair under races up to
    /// the configured retry budget; returns `Ok(None)` when the budget runs
    /// out.
    pub fn add_or_update(
        &self,
        item: CacheItem<V>,
        apply: impl Fn(&V) -> Option<V> + 'static,
    ) -> CacheResult<Option<V>> {
        self.add_or_update_with_retries(item, apply, self.inner.config.max_retries)
    }

    /// [`add_or_update`](Self::add_or_update) with an explicit retry budget.
    pub fn add_or_update_with_retries(
        &self,
        item: CacheItem<V>,
        apply: impl Fn(&V) -> Option<V> + 'static,
        max_retries: u32,
    ) -> CacheResult<Option<V>> {
        self.inner.ensure_open()?;

        for attempt in 0..=max_retries {
            if self.add(item.clone())? {
                return Ok(Some(item.into_value()));
            }
            // Somebody holds the key; update it. A concurrent delete between
            // the failed add and this update sends us around the loop again.
            if let Ok(value) =
                self.update_internal(item.key(), item.region(), &apply, max_retries)?
            {
                return Ok(Some(value));
            }
            self.pause_before_retry(attempt, max_retries);
        }
        Ok(None)
    }

    // -- get_or_add -------------------------------------------------------

    /// Returns the cached item, or creates it from `factory`.
    ///
    /// The factory is invoked at most once per call, even when the internal
    /// `add` loses a race and the loop retries; the retried iterations reuse
    /// the already-produced item or pick up the competing writer's value.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the factory returns `None` or the retry budget runs
    /// out without the item appearing.
    pub fn get_or_add<F>(
        &self,
        key: &str,
        region: Option<&str>,
        factory: F,
    ) -> CacheResult<CacheItem<V>>
    where
        F: FnOnce() -> Option<V>,
    {
        match self.get_or_add_internal(key, region, factory)? {
            GetOrAddOutcome::Found(item) => Ok(item),
            GetOrAddOutcome::FactoryReturnedNone => {
                Err(CacheError::invalid_state("the value factory returned none"))
            },
            GetOrAddOutcome::Exhausted => Err(CacheError::invalid_state(
                "could not get nor add the item within the retry budget",
            )),
        }
    }

    /// Non-failing variant of [`get_or_add`](Self::get_or_add): returns
    /// `Ok(None)` when the factory declines or the retry budget runs out.
    pub fn try_get_or_add<F>(
        &self,
        key: &str,
        region: Option<&str>,
        factory: F,
    ) -> CacheResult<Option<CacheItem<V>>>
    where
        F: FnOnce() -> Option<V>,
    {
        Ok(match self.get_or_add_internal(key, region, factory)? {
            GetOrAddOutcome::Found(item) => Some(item),
            GetOrAddOutcome::FactoryReturnedNone | GetOrAddOutcome::Exhausted => None,
        })
    }

    fn get_or_add_internal<F>(
        &self,
        key: &str,
        region: Option<&str>,
        factory: F,
    ) -> CacheResult<GetOrAddOutcome<V>>
    where
        F: FnOnce() -> Option<V>,
    {
        self.inner.ensure_open()?;
        validate_key(key)?;
        validate_region(region)?;

        // The factory lives outside the retry loop so it cannot fire twice.
        let mut factory = Some(factory);
        let mut created: Option<CacheItem<V>> = None;

        let max_retries = self.inner.config.max_retries;
        for attempt in 0..=max_retries {
            if let Some(item) = self.get_item(key, region)? {
                return Ok(GetOrAddOutcome::Found(item));
            }

            if created.is_none() {
                let Some(produce) = factory.take() else {
                    break;
                };
                match produce() {
                    Some(value) => {
                        created = Some(CacheItem::from_parts(key, region, value)?);
                    },
                    None => return Ok(GetOrAddOutcome::FactoryReturnedNone),
                }
            }

            if let Some(item) = &created {
                if self.add(item.clone())? {
                    return Ok(GetOrAddOutcome::Found(item.clone()));
                }
                // Another writer got there first; the next get should see
                // their value.
            }
            self.pause_before_retry(attempt, max_retries);
        }
        Ok(GetOrAddOutcome::Exhausted)
    }

    /// Pauses between retry iterations, skipping the pause after the final
    /// attempt.
    fn pause_before_retry(&self, attempt: u32, max_retries: u32) {
        let pause = self.inner.config.retry_timeout;
        if attempt < max_retries && !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
}
