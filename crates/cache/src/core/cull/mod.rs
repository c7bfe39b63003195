//! Culling of unused objects
//!
//! The culler sleeps until the capacity gate reports that free space has
//! dropped below a cull limit, or until the periodic tick if one is
//! configured, and then retires unused objects in least-recently-used order
//! until the gate is happy again.

use crate::backend::EntryKind;
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::page::PAGE_SIZE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::operations::utils::run_blocking;
use super::types::{Cache, CacheInner};
use super::CACHE_DIR;

/// Start the background culler
///
/// The task only holds a weak reference between passes, so dropping the last
/// `Cache` handle still tears the cache down.
pub(super) fn start_culler(inner: &Arc<CacheInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let signal = inner.gate.cull_signal();
    let cull_interval = inner.config.cull_interval();

    inner.runtime.spawn(async move {
        // A zero interval leaves only the pressure wake-up
        let mut interval = (cull_interval > Duration::ZERO).then(|| {
            let mut interval = tokio::time::interval(cull_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                _ = signal.notified() => {}
                _ = tick(&mut interval) => {}
            }

            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.is_dead() {
                continue;
            }
            if let Err(e) = inner.has_space(0, 0) {
                tracing::warn!("Cannot refresh free space: {}", e);
            }
            if !inner.gate.is_culling() {
                continue;
            }
            match cull_pass(&inner).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Culled {} objects", n),
                Err(e) => tracing::warn!("Culling failed: {}", e),
            }
        }
    })
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Retire up to one batch of cull candidates while culling is on
pub(super) async fn cull_pass(inner: &Arc<CacheInner>) -> Result<usize> {
    let mut culled = 0;
    let mut busy = Vec::new();

    while inner.gate.is_culling() && culled < inner.config.cull_batch {
        let Some(path) = inner.cull_candidates.next_eviction() else {
            tracing::debug!("Nothing left to cull");
            break;
        };
        inner.cull_candidates.on_remove(&path);

        let target = path.clone();
        match run_blocking(inner, "cull object", move |inner| inner.cull_path(&target)).await {
            Ok(()) => culled += 1,
            Err(CacheError::Busy { .. }) => busy.push(path),
            Err(CacheError::NotFound { .. }) => {}
            Err(e) => {
                tracing::warn!("Cannot cull {}: {}", path.display(), e);
                busy.push(path);
                break;
            }
        }

        inner.has_space(0, 0)?;
    }

    for path in busy {
        inner.cull_candidates.on_access(&path, 0);
    }
    inner.prune_mappings();
    Ok(culled)
}

/// Record every data file already on disk as a cull candidate
pub(super) async fn seed_cull_candidates(inner: &Arc<CacheInner>) -> Result<usize> {
    let files = run_blocking(inner, "scan cache", |inner| {
        let mut files = Vec::new();
        let mut dirs = vec![PathBuf::from(CACHE_DIR)];
        while let Some(dir) = dirs.pop() {
            let entries = inner
                .backend
                .read_dir(&dir)
                .map_err(|e| CacheError::io(&dir, "scan cache directory", e))?;
            for entry in entries {
                let path = dir.join(&entry.name);
                match entry.info.kind {
                    EntryKind::Directory => dirs.push(path),
                    EntryKind::File => files.push((path, entry.info.size)),
                }
            }
        }
        Ok(files)
    })
    .await?;

    for (path, size) in &files {
        inner.cull_candidates.on_insert(path, size.div_ceil(PAGE_SIZE as u64));
    }
    Ok(files.len())
}

impl CacheInner {
    /// Bury the entry at `path` unless an active object is using it or
    /// anything below it
    pub fn cull_path(&self, path: &Path) -> Result<()> {
        if path == Path::new(CACHE_DIR) || !path.starts_with(CACHE_DIR) {
            return Err(CacheError::Busy {
                path: path.to_path_buf(),
                recovery_hint: RecoveryHint::FixCaller,
            });
        }

        let info = self
            .backend
            .lookup(path)
            .map_err(|e| CacheError::io(path, "look up cull victim", e))?;
        let Some(info) = info else {
            return Err(CacheError::NotFound {
                path: path.to_path_buf(),
                recovery_hint: RecoveryHint::FixCaller,
            });
        };

        if self.active.contains(&info.id) || self.active.any_within(path) {
            return Err(CacheError::Busy {
                path: path.to_path_buf(),
                recovery_hint: RecoveryHint::RetryLater,
            });
        }

        self.bury_path(path)?;
        self.stats.record_cull();
        tracing::debug!("Culled {}", path.display());
        Ok(())
    }
}

impl Cache {
    /// Cull the entry at `path`, relative to the backing root
    ///
    /// Fails with `Busy` while an active object is bound to the entry or to
    /// anything inside it.
    pub async fn cull(&self, path: &Path) -> Result<()> {
        let target = path.to_path_buf();
        run_blocking(&self.inner, "cull object", move |inner| inner.cull_path(&target)).await?;
        self.inner.cull_candidates.on_remove(path);
        self.inner.prune_mappings();
        Ok(())
    }

    /// Run one culling pass now instead of waiting for the culler
    pub async fn cull_pass(&self) -> Result<usize> {
        cull_pass(&self.inner).await
    }

    pub fn is_culling(&self) -> bool {
        self.inner.gate.is_culling()
    }

    /// Number of unused objects waiting to be culled
    pub fn cull_candidates(&self) -> usize {
        self.inner.cull_candidates.len()
    }
}
