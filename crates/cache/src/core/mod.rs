//! The cache context
//!
//! A [`Cache`] owns everything the engine needs: the backing filesystem, the
//! capacity gate, the active-object index, the shared backing page caches,
//! the copier work queue and the culler. Nothing lives in globals, so any
//! number of caches can run side by side in one process.

pub mod internal;

mod builder;
mod cull;
mod operations;
mod types;

pub use builder::CacheBuilder;
pub use internal::StatsSnapshot;
pub use types::Cache;
pub(crate) use types::CacheInner;

/// Directory under the backing root holding live objects
pub const CACHE_DIR: &str = "cache";

/// Directory under the backing root where doomed entries are moved first
pub const GRAVEYARD_DIR: &str = "graveyard";

#[cfg(test)]
mod tests;
