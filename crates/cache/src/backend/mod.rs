//! Backing filesystem abstraction
//!
//! The engine never touches files directly. Everything goes through
//! [`BackingFs`] for namespace operations and [`BackingFile`] for the data
//! path, so the same code runs against a real directory ([`DiskBackend`]) or
//! the in-memory [`MemoryBackend`] used by tests.
//!
//! All paths are relative to the root of the backing store.

use std::io;
use std::path::Path;
use std::sync::Arc;

#[cfg(unix)]
mod disk;
mod memory;

#[cfg(unix)]
pub use disk::DiskBackend;
pub use memory::{MemoryBackend, MemoryFile};

/// Stable identity of a backing file (device and inode number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

/// Filesystem capacity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsStats {
    /// Fundamental block size in bytes
    pub block_size: u32,
    /// Total blocks
    pub blocks: u64,
    /// Blocks available to unprivileged users
    pub blocks_available: u64,
    /// Total inodes
    pub files: u64,
    /// Free inodes
    pub files_free: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// Result of a successful directory lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub id: FileId,
    pub kind: EntryKind,
    pub size: u64,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub info: EntryInfo,
}

/// Namespace and capacity operations on the backing filesystem
pub trait BackingFs: Send + Sync + 'static {
    /// Capacity of the filesystem holding the cache
    fn statfs(&self) -> io::Result<FsStats>;

    /// Look up an entry; `Ok(None)` when it does not exist
    fn lookup(&self, path: &Path) -> io::Result<Option<EntryInfo>>;

    /// Create a directory; fails with `AlreadyExists` if present
    fn mkdir(&self, path: &Path) -> io::Result<EntryInfo>;

    /// Create an empty regular file; fails with `AlreadyExists` if present
    fn create(&self, path: &Path) -> io::Result<EntryInfo>;

    /// Open a regular file for reading and writing
    fn open(&self, path: &Path) -> io::Result<Arc<dyn BackingFile>>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file or a whole directory tree
    fn remove(&self, path: &Path) -> io::Result<()>;

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Read an extended attribute; `Ok(None)` when it is not set
    fn get_xattr(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>>;

    fn set_xattr(&self, path: &Path, name: &str, value: &[u8]) -> io::Result<()>;
}

/// Data path of one open backing file
pub trait BackingFile: Send + Sync + 'static {
    fn id(&self) -> FileId;

    /// Block size of the filesystem the file lives on
    fn block_size(&self) -> u32;

    /// Map a logical block to a physical one; zero means the block is a hole
    fn map_block(&self, block: u64) -> io::Result<u64>;

    /// Fill `buf` with the page at `index`; bytes past EOF read as zero
    fn read_page(&self, index: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `data` at byte offset `pos`, returning the bytes written
    fn write_at(&self, pos: u64, data: &[u8]) -> io::Result<usize>;

    /// Current file size in bytes
    fn size(&self) -> io::Result<u64>;

    /// Truncate or sparsely extend the file
    fn set_size(&self, size: u64) -> io::Result<()>;
}
