//! Page cache consistency.
//!
//! - **Tracking**: [`ChangeTracker`] records what changed on each entity in a
//!   unit of work.
//! - **Resolution**: [`InvalidationResolver`] turns those records into the
//!   cached pages that must be regenerated, via a [`DependencyLookup`].
//! - **Storage**: [`CacheStorage`] is the page store the local generator fills.
//!
//! ## Configuration
//!
//! ```toml
//! [refresh]
//! concurrency = 3
//! batch_mode = false
//! queue = false
//! delay_seconds = 0
//! storage_limit = 1000
//! ```

mod config;
pub mod deps;
mod lock;
mod registry;
mod resolver;
mod store;
mod tracker;

pub use config::RefreshConfig;
pub(crate) use config::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY, clamp_concurrency};
pub(crate) use lock::{rw_read, rw_write};
pub use registry::{Dependency, DependencyRegistry};
pub use resolver::{DependencyLookup, InvalidationResolver, LookupError, PlanGroup, RefreshPlan};
pub use store::{CacheStorage, MemoryStorage, StorageError};
pub use tracker::{ChangeRecord, ChangeTracker};
