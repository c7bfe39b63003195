//! Cache builder and initialization

use crate::backend::{BackingFs, EntryInfo, EntryKind};
use crate::config::CacheConfig;
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::eviction::LruPolicy;
use crate::key::KeyType;
use crate::object::{ActiveIndex, AuxValidator, Backer, CacheObject, ExactMatch};
use crate::space::CapacityGate;
use crate::workqueue::WorkQueue;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::cull::{seed_cull_candidates, start_culler};
use super::internal::CacheStats;
use super::operations::utils::join_error;
use super::types::{Cache, CacheInner};
use super::{CACHE_DIR, GRAVEYARD_DIR};

/// Binds a cache to a backing filesystem
pub struct CacheBuilder {
    backend: Arc<dyn BackingFs>,
    config: CacheConfig,
    validator: Arc<dyn AuxValidator>,
}

impl CacheBuilder {
    pub(super) fn new(backend: Arc<dyn BackingFs>) -> Self {
        Self {
            backend,
            config: CacheConfig::default(),
            validator: Arc::new(ExactMatch),
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default byte-for-byte auxiliary data check
    pub fn aux_validator(mut self, validator: Arc<dyn AuxValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Prepare the on-disk layout and start the background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> Result<Cache> {
        let Self {
            backend,
            config,
            validator,
        } = self;

        config.validate()?;

        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                return Err(CacheError::Configuration {
                    message: format!("a cache needs a tokio runtime: {e}"),
                    recovery_hint: RecoveryHint::FixCaller,
                });
            }
        };

        let gate = CapacityGate::new(&config);
        let layout_backend = Arc::clone(&backend);
        let (root_info, stats) = tokio::task::spawn_blocking(move || {
            let root_info = ensure_dir(&*layout_backend, Path::new(CACHE_DIR))?;
            ensure_dir(&*layout_backend, Path::new(GRAVEYARD_DIR))?;
            empty_graveyard(&*layout_backend);
            let stats = layout_backend
                .statfs()
                .map_err(|e| CacheError::io("", "statfs", e))?;
            Ok::<_, CacheError>((root_info, stats))
        })
        .await
        .map_err(|e| join_error("prepare cache layout", e))??;

        let limits = gate.refresh_limits(&stats);
        tracing::info!(
            "Cache {} limits: files {}/{}/{}, pages {}/{}/{}",
            config.tag,
            limits.frun,
            limits.fcull,
            limits.fstop,
            limits.brun,
            limits.bcull,
            limits.bstop
        );
        if gate.check(&stats, 0, 0).is_err() {
            tracing::warn!("Backing filesystem is already below its stop limits");
        }

        let root = CacheObject::new(
            0,
            KeyType::Index,
            None,
            Backer {
                path: Path::new(CACHE_DIR).to_path_buf(),
                id: root_info.id,
                file: None,
                mapping: None,
            },
            0,
            false,
            Vec::new(),
        );
        let active = ActiveIndex::new();
        let root = active.bind(root)?;

        let (work_queue, workers) = WorkQueue::start(&runtime, config.copier_workers);

        let inner = Arc::new(CacheInner {
            backend,
            gate,
            active,
            in_flight: DashMap::new(),
            cull_candidates: Box::new(LruPolicy::new()),
            mappings: DashMap::new(),
            validator,
            work_queue,
            stats: CacheStats::default(),
            runtime,
            root,
            dead: AtomicBool::new(false),
            next_object_id: AtomicU64::new(1),
            next_op_id: AtomicU64::new(1),
            cull_handle: RwLock::new(None),
            worker_handles: RwLock::new(workers),
            config,
        });

        if inner.config.culling_enabled {
            let seeded = seed_cull_candidates(&inner).await?;
            tracing::debug!("Seeded {} cull candidates", seeded);
            *inner.cull_handle.write() = Some(start_culler(&inner));
        }

        tracing::info!("Cache {} bound", inner.config.tag);
        Ok(Cache { inner })
    }
}

fn ensure_dir(backend: &dyn BackingFs, path: &Path) -> Result<EntryInfo> {
    let existing = backend
        .lookup(path)
        .map_err(|e| CacheError::io(path, "look up cache directory", e))?;
    match existing {
        Some(info) if info.kind == EntryKind::Directory => Ok(info),
        Some(_) => Err(CacheError::Configuration {
            message: format!("{} exists and is not a directory", path.display()),
            recovery_hint: RecoveryHint::CheckPermissions {
                path: path.to_path_buf(),
            },
        }),
        None => backend.mkdir(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            operation: "create cache directory",
            source: e,
            recovery_hint: RecoveryHint::CheckPermissions {
                path: path.to_path_buf(),
            },
        }),
    }
}

/// Remove whatever a previous run left in the graveyard
fn empty_graveyard(backend: &dyn BackingFs) {
    let graveyard = Path::new(GRAVEYARD_DIR);
    let entries = match backend.read_dir(graveyard) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read graveyard: {}", e);
            return;
        }
    };
    for entry in entries {
        let path = graveyard.join(&entry.name);
        if let Err(e) = backend.remove(&path) {
            tracing::warn!("Cannot remove {}: {}", path.display(), e);
        }
    }
}
