//! Object lifecycle operations

use crate::backend::BackingFs;
use crate::config::CacheConfig;
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::object::CacheObject;
use crate::page::{PAGE_SHIFT, PAGE_SIZE};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::super::builder::CacheBuilder;
use super::super::internal::StatsSnapshot;
use super::super::types::{Cache, CacheInner};
use super::super::GRAVEYARD_DIR;
use super::utils::run_blocking;

impl Cache {
    /// Start binding a cache to `backend`
    pub fn builder(backend: Arc<dyn BackingFs>) -> CacheBuilder {
        CacheBuilder::new(backend)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner
            .stats
            .snapshot(self.inner.active.len(), self.inner.gate.is_culling())
    }

    pub fn is_dead(&self) -> bool {
        self.inner.is_dead()
    }

    /// Stop accepting new work; objects in use keep their backing files
    pub fn withdraw(&self) {
        self.inner.withdraw("withdrawn on request");
    }

    /// Number of objects bound in the active index, the root included
    pub fn active_objects(&self) -> usize {
        self.inner.active.len()
    }

    /// Ask the capacity gate whether `fnr` files and `bnr` pages still fit
    pub fn has_space(&self, fnr: u64, bnr: u64) -> Result<()> {
        self.inner.has_space(fnr, bnr)
    }

    /// Bind an object into the active index
    ///
    /// Returns the object already bound to the same backing file if there is
    /// one. A newly bound object pins its parent index.
    pub fn mark_active(&self, object: &Arc<CacheObject>) -> Result<Arc<CacheObject>> {
        self.inner.activate(Arc::clone(object))
    }

    /// Remove an object from the active index, releasing its parent
    pub fn mark_inactive(&self, object: &Arc<CacheObject>) -> bool {
        self.inner.deactivate(object)
    }

    /// Throw an object and its backing entry away
    pub async fn delete_object(&self, object: &Arc<CacheObject>) -> Result<()> {
        if Arc::ptr_eq(object, &self.inner.root) {
            return Err(CacheError::Busy {
                path: object.path().to_path_buf(),
                recovery_hint: RecoveryHint::FixCaller,
            });
        }
        if !object.bury() {
            return Ok(());
        }

        let path = object.path().to_path_buf();
        let target = path.clone();
        let result = run_blocking(&self.inner, "delete object", move |inner| {
            match inner.bury_path(&target) {
                Err(CacheError::NotFound { .. }) => Ok(()),
                other => other,
            }
        })
        .await;

        self.inner.deactivate(object);
        self.inner.cull_candidates.on_remove(&path);
        if let Some(mapping) = object.backing_mapping() {
            mapping.truncate(0);
        }
        self.inner.prune_mappings();
        tracing::debug!("Deleted object {} at {}", object.debug_id(), path.display());
        result
    }

    /// Drop the usage reference taken by a lookup
    ///
    /// When the last one goes the object leaves the active index and either
    /// becomes a cull candidate or, with `retire`, is deleted at once. An
    /// index stays active while any of its children is.
    pub async fn relinquish_object(&self, object: Arc<CacheObject>, retire: bool) -> Result<()> {
        if Arc::ptr_eq(&object, &self.inner.root) {
            return Ok(());
        }
        if object.put() > 0 {
            return Ok(());
        }

        if retire || object.is_buried() {
            return self.delete_object(&object).await;
        }

        if self.inner.deactivate(&object) {
            self.inner.add_cull_candidate(&object);
        }
        tracing::debug!("Relinquished object {}", object.debug_id());
        Ok(())
    }

    /// Apply a new declared size to an object
    ///
    /// Nothing is stored beyond the new size. The backing file is resized
    /// and cached backing pages past the unchanged part are dropped.
    pub async fn attr_changed(&self, object: &Arc<CacheObject>, new_size: u64) -> Result<()> {
        object.set_store_limit(new_size);

        let Some(file) = object.backing_file().cloned() else {
            return Ok(());
        };
        let old_size = object.size();
        if old_size == new_size {
            return Ok(());
        }

        let path = object.path().to_path_buf();
        run_blocking(&self.inner, "resize backing file", move |inner| {
            let page_mask = PAGE_SIZE as u64 - 1;
            if new_size > old_size && old_size & page_mask != 0 {
                // Zero the tail of the old last page before extending
                file.set_size(old_size & !page_mask)
                    .map_err(|e| inner.io_error(&path, "truncate backing file", e))?;
            }
            file.set_size(new_size)
                .map_err(|e| inner.io_error(&path, "resize backing file", e))
        })
        .await?;

        object.set_size(new_size);
        if let Some(mapping) = object.backing_mapping() {
            let dropped = mapping.truncate(old_size.min(new_size) >> PAGE_SHIFT);
            tracing::debug!(
                "Object {} resized {} -> {}, {} backing pages dropped",
                object.debug_id(),
                old_size,
                new_size,
                dropped
            );
        }
        Ok(())
    }

    /// Replace the auxiliary data stored with an object
    pub async fn update_aux(&self, object: &Arc<CacheObject>, aux: &[u8]) -> Result<()> {
        if self.inner.is_dead() {
            return Err(CacheError::no_buffers("cache is withdrawn"));
        }
        let path = object.path().to_path_buf();
        let key_type = object.object_type();
        let data = aux.to_vec();
        run_blocking(&self.inner, "update auxiliary data", move |inner| {
            inner.store_aux(&path, key_type, &data)
        })
        .await?;
        object.set_aux_data(aux.to_vec());
        Ok(())
    }
}

impl CacheInner {
    /// Bind `object`, pinning its parent for as long as it stays bound
    pub fn activate(&self, object: Arc<CacheObject>) -> Result<Arc<CacheObject>> {
        let parent = object.parent().cloned();
        if let Some(parent) = &parent {
            parent.get();
        }
        let bound = self.active.bind(Arc::clone(&object));
        let fresh = matches!(&bound, Ok(bound) if Arc::ptr_eq(bound, &object));
        if !fresh {
            if let Some(parent) = &parent {
                parent.put();
            }
        }
        bound
    }

    /// Unbind `object` and drop its pin on the parent
    ///
    /// An index left without users or bound children is unbound in turn and
    /// becomes a cull candidate.
    pub fn deactivate(&self, object: &Arc<CacheObject>) -> bool {
        if !self.active.unbind(object) {
            return false;
        }

        let mut child = Arc::clone(object);
        while let Some(parent) = child.parent().cloned() {
            if parent.put() > 0 || Arc::ptr_eq(&parent, &self.root) {
                break;
            }
            if !self.active.unbind(&parent) {
                break;
            }
            if !parent.is_buried() {
                self.add_cull_candidate(&parent);
            }
            tracing::debug!("Index object {} released by its last child", parent.debug_id());
            child = parent;
        }
        true
    }

    pub fn add_cull_candidate(&self, object: &CacheObject) {
        let pages = object.size().div_ceil(PAGE_SIZE as u64);
        self.cull_candidates.on_insert(object.path(), pages);
    }

    /// Move `path` into the graveyard and delete it from there
    pub fn bury_path(&self, path: &Path) -> Result<()> {
        let grave = Path::new(GRAVEYARD_DIR).join(Uuid::new_v4().simple().to_string());
        match self.backend.rename(path, &grave) {
            Ok(()) => {
                if let Err(e) = self.backend.remove(&grave) {
                    tracing::warn!("Cannot clear {} from the graveyard: {}", grave.display(), e);
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::NotFound {
                path: path.to_path_buf(),
                recovery_hint: RecoveryHint::FixCaller,
            }),
            Err(e) => {
                tracing::warn!("Cannot move {} to the graveyard: {}", path.display(), e);
                self.backend
                    .remove(path)
                    .map_err(|e| self.io_error(path, "remove backing entry", e))
            }
        }
    }
}
