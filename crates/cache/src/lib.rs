//! Local caching of network filesystem pages
//!
//! This crate keeps copies of netfs pages in files on a local backing
//! filesystem:
//! - Filename-safe encoding of opaque cache keys ([`key`])
//! - Admission control against free space and free inodes ([`space`])
//! - An object store with an active-object index ([`object`], [`Cache`])
//! - Page retrieval through backing-page monitors and a deferred copier
//!   ([`retrieval`])
//! - Page write-back, clamped to each object's declared size
//! - Background culling of unused objects ([`eviction`])
//!
//! The backing filesystem is reached through the [`backend::BackingFs`]
//! trait; [`backend::MemoryBackend`] is an in-memory implementation and
//! `DiskBackend` works on a real directory.

pub mod backend;
pub mod config;
pub mod core;
pub mod errors;
pub mod eviction;
pub mod key;
pub mod object;
pub mod page;
pub mod retrieval;
pub mod space;
pub mod workqueue;

pub use crate::core::{Cache, CacheBuilder, StatsSnapshot, CACHE_DIR, GRAVEYARD_DIR};
pub use config::{CacheConfig, CacheConfigBuilder, CacheConfigLoader, ConfigSource, Watermarks};
pub use errors::{CacheError, Error, RecoveryHint, Result};
pub use key::{encode_key, EncodedKey, KeyType};
pub use object::{AuxCheck, AuxValidator, CacheObject, ExactMatch};
pub use page::{Mapping, Page, PAGE_SHIFT, PAGE_SIZE};
pub use retrieval::{Completion, PagesOutcome, PagesStatus, ReadStatus, Retrieval};
