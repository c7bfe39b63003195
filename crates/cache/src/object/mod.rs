//! Cached objects and their on-disk bookkeeping
//!
//! A [`CacheObject`] is one cached item: an index directory or a data file in
//! the backing filesystem. Its backing entry is bound when the object is
//! constructed and never changes; replacing the entry means building a new
//! object.

mod aux;
mod index;

pub use aux::{decode_aux, encode_aux, AuxCheck, AuxValidator, ExactMatch, AUX_XATTR};
pub use index::ActiveIndex;

use crate::backend::{BackingFile, FileId};
use crate::key::KeyType;
use crate::page::Mapping;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const ACTIVE: u32 = 1 << 0;
const BURIED: u32 = 1 << 1;

/// The backing directory entry of an object
pub(crate) struct Backer {
    pub(crate) path: PathBuf,
    pub(crate) id: FileId,
    pub(crate) file: Option<Arc<dyn BackingFile>>,
    pub(crate) mapping: Option<Arc<Mapping>>,
}

pub struct CacheObject {
    debug_id: u64,
    object_type: KeyType,
    parent: Option<Arc<CacheObject>>,
    backer: Backer,
    is_new: bool,
    state: AtomicU32,
    usage: AtomicUsize,
    size: AtomicU64,
    store_limit: AtomicU64,
    aux: Mutex<Vec<u8>>,
}

impl fmt::Debug for CacheObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheObject")
            .field("debug_id", &self.debug_id)
            .field("type", &self.object_type)
            .field("path", &self.backer.path)
            .field("id", &self.backer.id)
            .field("active", &self.is_active())
            .field("buried", &self.is_buried())
            .field("usage", &self.usage())
            .field("new", &self.is_new)
            .finish()
    }
}

impl CacheObject {
    pub(crate) fn new(
        debug_id: u64,
        object_type: KeyType,
        parent: Option<Arc<CacheObject>>,
        backer: Backer,
        size: u64,
        is_new: bool,
        aux: Vec<u8>,
    ) -> Arc<Self> {
        Arc::new(Self {
            debug_id,
            object_type,
            parent,
            backer,
            is_new,
            state: AtomicU32::new(0),
            usage: AtomicUsize::new(1),
            size: AtomicU64::new(size),
            store_limit: AtomicU64::new(u64::MAX),
            aux: Mutex::new(aux),
        })
    }

    pub fn debug_id(&self) -> u64 {
        self.debug_id
    }

    pub fn object_type(&self) -> KeyType {
        self.object_type
    }

    pub fn parent(&self) -> Option<&Arc<CacheObject>> {
        self.parent.as_ref()
    }

    /// Path of the backing entry relative to the backing root
    pub fn path(&self) -> &Path {
        &self.backer.path
    }

    pub fn file_id(&self) -> FileId {
        self.backer.id
    }

    /// Whether the backing entry was created by the lookup that built this
    /// object rather than found on disk
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) & ACTIVE != 0
    }

    pub fn is_buried(&self) -> bool {
        self.state.load(Ordering::Acquire) & BURIED != 0
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    /// Size of the backing file as far as the cache knows
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Declared size of the object; nothing is stored beyond it
    pub fn store_limit(&self) -> u64 {
        self.store_limit.load(Ordering::Acquire)
    }

    /// Auxiliary data recorded for this object
    pub fn aux_data(&self) -> Vec<u8> {
        self.aux.lock().clone()
    }

    pub(crate) fn backing_file(&self) -> Option<&Arc<dyn BackingFile>> {
        self.backer.file.as_ref()
    }

    pub(crate) fn backing_mapping(&self) -> Option<&Arc<Mapping>> {
        self.backer.mapping.as_ref()
    }

    pub(crate) fn set_active(&self, active: bool) {
        if active {
            self.state.fetch_or(ACTIVE, Ordering::AcqRel);
        } else {
            self.state.fetch_and(!ACTIVE, Ordering::AcqRel);
        }
    }

    /// Mark the object as going away; returns false if it already was
    pub(crate) fn bury(&self) -> bool {
        self.state.fetch_or(BURIED, Ordering::AcqRel) & BURIED == 0
    }

    pub(crate) fn get(&self) -> usize {
        self.usage.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one usage reference, returning how many remain
    pub(crate) fn put(&self) -> usize {
        let mut current = self.usage.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return 0;
            }
            match self.usage.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - 1,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn grow_size(&self, end: u64) {
        self.size.fetch_max(end, Ordering::AcqRel);
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    pub(crate) fn set_store_limit(&self, limit: u64) {
        self.store_limit.store(limit, Ordering::Release);
    }

    pub(crate) fn set_aux_data(&self, aux: Vec<u8>) {
        *self.aux.lock() = aux;
    }
}
