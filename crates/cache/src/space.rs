//! Capacity gate
//!
//! Admission control against the backing filesystem's free inodes and free
//! blocks. Watermark percentages are turned into absolute limits whenever
//! the filesystem statistics are refreshed. Free blocks are counted in pages.
//!
//! Dropping below a cull limit switches culling on and wakes the culler;
//! dropping below a stop limit also refuses the request. Culling switches
//! off again once both counts are back above their run limits.

use crate::backend::{BackingFs, FsStats};
use crate::config::{CacheConfig, Watermarks};
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::page::PAGE_SHIFT;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Absolute thresholds: files in inodes, blocks in pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    pub frun: u64,
    pub fcull: u64,
    pub fstop: u64,
    pub brun: u64,
    pub bcull: u64,
    pub bstop: u64,
}

pub struct CapacityGate {
    files: Watermarks,
    blocks: Watermarks,
    limits: RwLock<Limits>,
    bshift: AtomicU32,
    culling: AtomicBool,
    cull_signal: Arc<Notify>,
}

impl std::fmt::Debug for CapacityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityGate")
            .field("limits", &self.limits())
            .field("culling", &self.is_culling())
            .finish()
    }
}

impl CapacityGate {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            files: config.files,
            blocks: config.blocks,
            limits: RwLock::new(Limits::default()),
            bshift: AtomicU32::new(0),
            culling: AtomicBool::new(false),
            cull_signal: Arc::new(Notify::new()),
        }
    }

    /// Recompute the absolute limits from fresh filesystem statistics
    pub fn refresh_limits(&self, stats: &FsStats) -> Limits {
        let bshift = if stats.block_size > 0 && (stats.block_size as usize) < crate::page::PAGE_SIZE {
            PAGE_SHIFT - stats.block_size.trailing_zeros()
        } else {
            0
        };
        self.bshift.store(bshift, Ordering::Release);

        let files = stats.files / 100;
        let blocks = (stats.blocks >> bshift) / 100;
        let limits = Limits {
            frun: files * u64::from(self.files.run),
            fcull: files * u64::from(self.files.cull),
            fstop: files * u64::from(self.files.stop),
            brun: blocks * u64::from(self.blocks.run),
            bcull: blocks * u64::from(self.blocks.cull),
            bstop: blocks * u64::from(self.blocks.stop),
        };
        *self.limits.write() = limits;

        tracing::debug!(
            "Capacity limits: files run={} cull={} stop={}, pages run={} cull={} stop={}",
            limits.frun,
            limits.fcull,
            limits.fstop,
            limits.brun,
            limits.bcull,
            limits.bstop
        );
        limits
    }

    pub fn limits(&self) -> Limits {
        *self.limits.read()
    }

    /// Replace the computed limits
    pub fn set_limits(&self, limits: Limits) {
        *self.limits.write() = limits;
    }

    pub fn is_culling(&self) -> bool {
        self.culling.load(Ordering::Acquire)
    }

    /// Check whether `fnr` more files and `bnr` more pages fit
    ///
    /// A request for nothing is always granted; it still refreshes the
    /// culling state.
    pub fn has_space(&self, fs: &dyn BackingFs, fnr: u64, bnr: u64) -> Result<()> {
        let empty_request = fnr == 0 && bnr == 0;
        let stats = match fs.statfs() {
            Ok(stats) => stats,
            Err(e) if empty_request => {
                tracing::warn!("statfs on backing filesystem failed: {}", e);
                return Ok(());
            }
            Err(e) => return Err(CacheError::io("", "statfs", e)),
        };

        let verdict = self.check(&stats, fnr, bnr);
        if empty_request {
            return Ok(());
        }
        verdict
    }

    /// Evaluate a request against an already fetched statistics snapshot
    pub fn check(&self, stats: &FsStats, fnr: u64, bnr: u64) -> Result<()> {
        let limits = self.limits();
        let bshift = self.bshift.load(Ordering::Acquire);
        let files_free = stats.files_free.saturating_sub(fnr);
        let pages_free = (stats.blocks_available >> bshift).saturating_sub(bnr);

        if files_free < limits.fstop || pages_free < limits.bstop {
            self.begin_cull();
            tracing::debug!(
                "Refusing space for {fnr} files, {bnr} pages: {files_free} files and {pages_free} pages would remain"
            );
            return Err(CacheError::NoBuffers {
                reason: "backing filesystem is below its stop limit",
                recovery_hint: RecoveryHint::RunEviction,
            });
        }

        if files_free < limits.fcull || pages_free < limits.bcull {
            self.begin_cull();
            return Ok(());
        }

        if self.is_culling()
            && files_free >= limits.frun
            && pages_free >= limits.brun
            && self.culling.swap(false, Ordering::AcqRel)
        {
            tracing::info!("Cease culling: free space back above the run limits");
        }
        Ok(())
    }

    fn begin_cull(&self) {
        if !self.culling.swap(true, Ordering::AcqRel) {
            tracing::info!("Begin culling: free space below the cull limit");
        }
        self.cull_signal.notify_one();
    }

    /// Handle on the culling wake-up, usable without holding the gate
    pub(crate) fn cull_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.cull_signal)
    }
}
