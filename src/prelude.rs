pub use crate::backplane::{
    Backplane, BackplaneEvent, BackplaneHub, ChangeAction, ChannelBackplane,
};
pub use crate::builder::CoordinatorBuilder;
pub use crate::config::{CoordinatorConfig, HandleConfig, UpdateMode};
pub use crate::coordinator::TieredCache;
pub use crate::error::{CacheError, CacheErrorKind, CacheResult};
pub use crate::events::{CacheEvent, EventOrigin, ObserverId, RemoveReason};
pub use crate::handle::memory::MemoryHandle;
pub use crate::handle::{CacheHandle, HandleRemoveEvent, UpdateOutcome};
pub use crate::item::{CacheItem, ExpirationMode};
pub use crate::stats::StatsSnapshot;
