//! Configuration for handles and the coordinator.
//!
//! Plain data structs; wiring happens through
//! [`CoordinatorBuilder`](crate::builder::CoordinatorBuilder).
//!
//! ## HandleConfig
//!
//! | Field                 | Default  | Description                              |
//! |-----------------------|----------|------------------------------------------|
//! | `name`                | —        | Diagnostic name, unique per coordinator  |
//! | `default_mode`        | `None`   | Expiration applied to inheriting items   |
//! | `default_timeout`     | `0`      | Timeout paired with `default_mode`       |
//! | `is_backplane_source` | `false`  | This handle's writes feed the backplane  |
//! | `is_distributed`      | `false`  | Storage is shared across processes       |
//!
//! ## CoordinatorConfig
//!
//! | Field           | Default | Description                                 |
//! |-----------------|---------|---------------------------------------------|
//! | `name`          | `cache` | Coordinator name used in errors and logs    |
//! | `max_retries`   | `50`    | Retry budget for update/get_or_add loops    |
//! | `retry_timeout` | `100ms` | Pause between coordinator retry iterations  |
//! | `update_mode`   | `Up`    | Eviction of layers above after a commit     |

use std::time::Duration;

use crate::item::ExpirationMode;

/// How layers above the serialization point are reconciled after a
/// successful update or a handle-internal removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Leave upper layers untouched; the next read reconciles them.
    None,
    /// Evict the key from every layer above the source of the change.
    #[default]
    Up,
}

/// Per-handle configuration.
///
/// `default_mode`/`default_timeout` are applied to every stored item whose
/// [`uses_expiration_defaults`](crate::item::CacheItem::uses_expiration_defaults)
/// flag is set. A handle default of `ExpirationMode::Default` is meaningless
/// and rejected at build time.
#[derive(Debug, Clone)]
pub struct HandleConfig {
    /// Diagnostic name for this handle.
    pub name: String,
    /// Expiration mode applied to items that inherit defaults.
    pub default_mode: ExpirationMode,
    /// Timeout paired with `default_mode`.
    pub default_timeout: Duration,
    /// Whether this handle's writes are the backplane's source of truth.
    pub is_backplane_source: bool,
    /// Whether the handle's storage is shared across processes.
    pub is_distributed: bool,
}

impl HandleConfig {
    /// Creates a configuration with no expiration defaults and all flags off.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_mode: ExpirationMode::None,
            default_timeout: Duration::ZERO,
            is_backplane_source: false,
            is_distributed: false,
        }
    }

    /// Sets the default expiration applied to inheriting items.
    pub fn with_defaults(mut self, mode: ExpirationMode, timeout: Duration) -> Self {
        self.default_mode = mode;
        self.default_timeout = timeout;
        self
    }

    /// Marks this handle as the backplane source.
    pub fn as_backplane_source(mut self) -> Self {
        self.is_backplane_source = true;
        self
    }

    /// Marks this handle's storage as cross-process.
    pub fn as_distributed(mut self) -> Self {
        self.is_distributed = true;
        self
    }
}

/// Coordinator-level configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Coordinator name used in errors and logs.
    pub name: String,
    /// Retry budget for the update and get-or-add loops.
    pub max_retries: u32,
    /// Pause between retry iterations of the coordinator-level loops
    /// (`add_or_update`, `get_or_add`). Zero disables the pause.
    pub retry_timeout: Duration,
    /// Reconciliation of upper layers after committed changes.
    pub update_mode: UpdateMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_owned(),
            max_retries: 50,
            retry_timeout: Duration::from_millis(100),
            update_mode: UpdateMode::Up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_config_defaults() {
        let config = HandleConfig::new("h1");
        assert_eq!(config.name, "h1");
        assert_eq!(config.default_mode, ExpirationMode::None);
        assert_eq!(config.default_timeout, Duration::ZERO);
        assert!(!config.is_backplane_source);
        assert!(!config.is_distributed);
    }

    #[test]
    fn handle_config_chaining() {
        let config = HandleConfig::new("h1")
            .with_defaults(ExpirationMode::Sliding, Duration::from_secs(60))
            .as_backplane_source()
            .as_distributed();
        assert_eq!(config.default_mode, ExpirationMode::Sliding);
        assert_eq!(config.default_timeout, Duration::from_secs(60));
        assert!(config.is_backplane_source);
        assert!(config.is_distributed);
    }

    #[test]
    fn coordinator_config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.name, "cache");
        assert_eq!(config.max_retries, 50);
        assert_eq!(config.retry_timeout, Duration::from_millis(100));
        assert_eq!(config.update_mode, UpdateMode::Up);
    }
}
