//! Active-object index
//!
//! Every object in use is bound here under its backing file identity, so two
//! lookups that land on the same backing file share one in-memory object.

use super::CacheObject;
use crate::backend::FileId;
use crate::errors::{CacheError, RecoveryHint, Result};
use parking_lot::RwLock;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ActiveIndex {
    objects: RwLock<BTreeMap<FileId, Arc<CacheObject>>>,
}

impl ActiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `object`, or return the object already bound to its identity
    /// with an extra usage reference
    ///
    /// Fails with `Busy` if the identity belongs to an object being buried.
    pub fn bind(&self, object: Arc<CacheObject>) -> Result<Arc<CacheObject>> {
        let mut objects = self.objects.write();
        match objects.entry(object.file_id()) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.is_buried() {
                    return Err(CacheError::Busy {
                        path: existing.path().to_path_buf(),
                        recovery_hint: RecoveryHint::RetryLater,
                    });
                }
                existing.get();
                Ok(Arc::clone(existing))
            }
            Entry::Vacant(entry) => {
                object.set_active(true);
                entry.insert(Arc::clone(&object));
                tracing::debug!("Object {} bound as {:?}", object.debug_id(), object.file_id());
                Ok(object)
            }
        }
    }

    /// Remove `object` from the index if it is the one bound to its identity
    pub fn unbind(&self, object: &Arc<CacheObject>) -> bool {
        let mut objects = self.objects.write();
        match objects.get(&object.file_id()) {
            Some(bound) if Arc::ptr_eq(bound, object) => {
                objects.remove(&object.file_id());
                object.set_active(false);
                tracing::debug!("Object {} unbound", object.debug_id());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &FileId) -> Option<Arc<CacheObject>> {
        self.objects.read().get(id).cloned()
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.objects.read().contains_key(id)
    }

    /// Whether any bound object lives at `dir` or below it
    pub fn any_within(&self, dir: &Path) -> bool {
        self.objects
            .read()
            .values()
            .any(|object| object.path().starts_with(dir))
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
