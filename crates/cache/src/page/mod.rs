//! Page-cache model
//!
//! A [`Page`] is a page-sized buffer with a small set of state bits. The lock
//! bit doubles as the "I/O in progress" marker: a page is created locked,
//! filled, flagged uptodate or errored, then unlocked. Unlocking runs every
//! callback queued on the page's wait queue. Those callbacks run in the
//! unlocker's context and must not block.

mod mapping;

pub use mapping::Mapping;

use crate::errors::{CacheError, Result};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

const LOCKED: u32 = 1 << 0;
const UPTODATE: u32 = 1 << 1;
const ERROR: u32 = 1 << 2;
const CACHED: u32 = 1 << 3;

/// One-shot callback fired when a page is unlocked
pub(crate) type Waiter = Box<dyn FnOnce(&Arc<Page>) + Send>;

pub struct Page {
    index: u64,
    flags: AtomicU32,
    attached: AtomicBool,
    data: RwLock<Box<[u8]>>,
    waiters: Mutex<Vec<Waiter>>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("flags", &format_args!("{:#06b}", self.flags.load(Ordering::Acquire)))
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl Page {
    /// A zero-filled, unlocked page
    pub fn new(index: u64) -> Result<Arc<Self>> {
        Self::with_flags(index, 0)
    }

    /// A zero-filled page that the caller holds locked
    pub fn new_locked(index: u64) -> Result<Arc<Self>> {
        Self::with_flags(index, LOCKED)
    }

    fn with_flags(index: u64, flags: u32) -> Result<Arc<Self>> {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(PAGE_SIZE).is_err() {
            return Err(CacheError::out_of_memory(PAGE_SIZE));
        }
        buf.resize(PAGE_SIZE, 0);
        Ok(Arc::new(Self {
            index,
            flags: AtomicU32::new(flags),
            attached: AtomicBool::new(false),
            data: RwLock::new(buf.into_boxed_slice()),
            waiters: Mutex::new(Vec::new()),
        }))
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Byte offset of the page in its file
    pub fn offset(&self) -> u64 {
        self.index << PAGE_SHIFT
    }

    pub fn is_locked(&self) -> bool {
        self.flags.load(Ordering::Acquire) & LOCKED != 0
    }

    pub fn is_uptodate(&self) -> bool {
        self.flags.load(Ordering::Acquire) & UPTODATE != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags.load(Ordering::Acquire) & ERROR != 0
    }

    /// Whether the cache knows about this page: it was filled from the cache,
    /// or space was reserved so that a later write can store it
    pub fn is_cached(&self) -> bool {
        self.flags.load(Ordering::Acquire) & CACHED != 0
    }

    /// Whether the page still belongs to a mapping
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn set_uptodate(&self) {
        self.flags.fetch_or(UPTODATE, Ordering::AcqRel);
    }

    pub fn set_error(&self) {
        self.flags.fetch_or(ERROR, Ordering::AcqRel);
    }

    pub fn clear_error(&self) {
        self.flags.fetch_and(!ERROR, Ordering::AcqRel);
    }

    pub fn mark_cached(&self) {
        self.flags.fetch_or(CACHED, Ordering::AcqRel);
    }

    pub fn clear_cached(&self) {
        self.flags.fetch_and(!CACHED, Ordering::AcqRel);
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }

    /// Take the page lock without waiting
    pub fn try_lock(&self) -> bool {
        self.flags.fetch_or(LOCKED, Ordering::AcqRel) & LOCKED == 0
    }

    /// Release the page lock and run everything waiting for it
    pub fn unlock(self: &Arc<Self>) {
        self.flags.fetch_and(!LOCKED, Ordering::AcqRel);
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for waiter in waiters {
            waiter(self);
        }
    }

    /// Queue a callback for the next unlock
    ///
    /// A waiter added while the page is already unlocked only runs on the next
    /// unlock. Callers that may race with the unlock follow up with
    /// `try_lock` + `unlock` to make sure the waiter fires.
    pub(crate) fn add_waiter(&self, waiter: Waiter) {
        self.waiters.lock().push(waiter);
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    pub(crate) fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Overwrite the start of the page with `src`, zeroing the rest
    pub fn fill(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
        data[len..].fill(0);
    }

    /// Copy the whole content of `other` into this page
    pub fn copy_from(&self, other: &Page) {
        let src = other.data.read();
        self.data.write().copy_from_slice(&src);
    }
}

#[cfg(test)]
mod tests;
