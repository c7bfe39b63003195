//! Internal statistics for the cache

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Internal cache statistics with atomic counters
pub struct CacheStats {
    pub lookups: AtomicU64,
    pub creates: AtomicU64,
    pub retrievals: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub nobufs: AtomicU64,
    pub writes: AtomicU64,
    pub bytes_written: AtomicU64,
    pub write_failures: AtomicU64,
    pub io_errors: AtomicU64,
    pub culled: AtomicU64,
    pub stats_since: SystemTime,
    started: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self {
            lookups: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            retrievals: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            nobufs: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            culled: AtomicU64::new(0),
            stats_since: SystemTime::now(),
            started: Instant::now(),
        }
    }
}

impl CacheStats {
    pub fn record_lookup(&self, created: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if created {
            self.creates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retrieval(&self) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nobufs(&self) {
        self.nobufs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, size: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an I/O error, returning the running total
    pub fn record_io_error(&self) -> u64 {
        self.io_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_cull(&self) {
        self.culled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self, active_objects: usize, culling: bool) -> StatsSnapshot {
        StatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            nobufs: self.nobufs.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            culled: self.culled.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            active_objects,
            culling,
            stats_since_unix: self
                .stats_since
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Point-in-time copy of the cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub creates: u64,
    pub retrievals: u64,
    pub hits: u64,
    pub misses: u64,
    pub nobufs: u64,
    pub writes: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
    pub io_errors: u64,
    pub culled: u64,
    pub hit_rate: f64,
    pub active_objects: usize,
    pub culling: bool,
    pub stats_since_unix: u64,
    pub uptime_secs: u64,
}
