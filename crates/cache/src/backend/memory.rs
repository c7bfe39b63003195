//! In-memory backing filesystem
//!
//! Sparse files, directories and extended attributes held in a map. Capacity
//! is modelled from the files and blocks actually in use so the culler sees
//! space come back when objects are removed. Faults can be injected and every
//! data-path call is counted.

use super::{BackingFile, BackingFs, DirEntry, EntryInfo, EntryKind, FileId, FsStats};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(1);

/// Counters and fault switches shared by the backend and its files
#[derive(Debug, Default)]
struct Shared {
    map_block_calls: AtomicU64,
    page_reads: AtomicU64,
    writes: AtomicU64,
    blocks_used: AtomicU64,
    fail_map: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    short_writes: AtomicBool,
}

/// Snapshot of the data-path calls made so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoCounts {
    pub map_block: u64,
    pub page_reads: u64,
    pub writes: u64,
}

impl IoCounts {
    pub fn total(&self) -> u64 {
        self.map_block + self.page_reads + self.writes
    }
}

#[derive(Debug, Default)]
struct FileState {
    size: u64,
    blocks: BTreeMap<u64, Box<[u8]>>,
}

/// A sparse in-memory file
#[derive(Debug)]
pub struct MemoryFile {
    id: FileId,
    block_size: u32,
    state: RwLock<FileState>,
    shared: Arc<Shared>,
}

impl MemoryFile {
    /// The file's bytes up to its size, holes read as zero
    pub fn contents(&self) -> Vec<u8> {
        let state = self.state.read();
        let mut out = vec![0u8; state.size as usize];
        let bs = self.block_size as usize;
        for (&block, data) in &state.blocks {
            let start = block as usize * bs;
            if start >= out.len() {
                break;
            }
            let end = (start + bs).min(out.len());
            out[start..end].copy_from_slice(&data[..end - start]);
        }
        out
    }

    /// Number of allocated blocks
    pub fn allocated_blocks(&self) -> usize {
        self.state.read().blocks.len()
    }

    fn store(&self, pos: u64, data: &[u8]) {
        let bs = u64::from(self.block_size);
        let mut state = self.state.write();
        let mut offset = 0usize;
        while offset < data.len() {
            let abs = pos + offset as u64;
            let block = abs / bs;
            let within = (abs % bs) as usize;
            let take = (bs as usize - within).min(data.len() - offset);
            let entry = state.blocks.entry(block).or_insert_with(|| {
                self.shared.blocks_used.fetch_add(1, Ordering::Relaxed);
                vec![0u8; bs as usize].into_boxed_slice()
            });
            entry[within..within + take].copy_from_slice(&data[offset..offset + take]);
            offset += take;
        }
        let end = pos + data.len() as u64;
        if end > state.size {
            state.size = end;
        }
    }

    fn release_blocks(&self) {
        let count = self.state.read().blocks.len() as u64;
        self.shared.blocks_used.fetch_sub(count, Ordering::Relaxed);
    }
}

impl BackingFile for MemoryFile {
    fn id(&self) -> FileId {
        self.id
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn map_block(&self, block: u64) -> io::Result<u64> {
        self.shared.map_block_calls.fetch_add(1, Ordering::Relaxed);
        if self.shared.fail_map.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected bmap failure"));
        }
        if self.state.read().blocks.contains_key(&block) {
            Ok(block + 1)
        } else {
            Ok(0)
        }
    }

    fn read_page(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        self.shared.page_reads.fetch_add(1, Ordering::Relaxed);
        if self.shared.fail_reads.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }

        buf.fill(0);
        let bs = u64::from(self.block_size);
        let start = index * buf.len() as u64;
        let state = self.state.read();
        let end = (start + buf.len() as u64).min(state.size);
        let mut abs = start;
        while abs < end {
            let block = abs / bs;
            let within = (abs % bs) as usize;
            let take = ((bs - within as u64).min(end - abs)) as usize;
            if let Some(data) = state.blocks.get(&block) {
                let at = (abs - start) as usize;
                buf[at..at + take].copy_from_slice(&data[within..within + take]);
            }
            abs += take as u64;
        }
        Ok(())
    }

    fn write_at(&self, pos: u64, data: &[u8]) -> io::Result<usize> {
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        if self.shared.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        let len = if self.shared.short_writes.load(Ordering::Relaxed) {
            data.len() / 2
        } else {
            data.len()
        };
        self.store(pos, &data[..len]);
        Ok(len)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.state.read().size)
    }

    fn set_size(&self, size: u64) -> io::Result<()> {
        let bs = u64::from(self.block_size);
        let mut state = self.state.write();
        let keep = size.div_ceil(bs);
        let dropped = state.blocks.split_off(&keep);
        self.shared
            .blocks_used
            .fetch_sub(dropped.len() as u64, Ordering::Relaxed);
        if size % bs != 0 {
            if let Some(last) = state.blocks.get_mut(&(size / bs)) {
                last[(size % bs) as usize..].fill(0);
            }
        }
        state.size = size;
        Ok(())
    }
}

#[derive(Debug)]
enum Node {
    Directory {
        id: FileId,
        xattrs: HashMap<String, Vec<u8>>,
    },
    File {
        file: Arc<MemoryFile>,
        xattrs: HashMap<String, Vec<u8>>,
    },
}

impl Node {
    fn info(&self) -> EntryInfo {
        match self {
            Self::Directory { id, .. } => EntryInfo {
                id: *id,
                kind: EntryKind::Directory,
                size: 0,
            },
            Self::File { file, .. } => EntryInfo {
                id: file.id,
                kind: EntryKind::File,
                size: file.state.read().size,
            },
        }
    }

    fn xattrs(&self) -> &HashMap<String, Vec<u8>> {
        match self {
            Self::Directory { xattrs, .. } | Self::File { xattrs, .. } => xattrs,
        }
    }

    fn xattrs_mut(&mut self) -> &mut HashMap<String, Vec<u8>> {
        match self {
            Self::Directory { xattrs, .. } | Self::File { xattrs, .. } => xattrs,
        }
    }
}

/// Backing filesystem living entirely in memory
#[derive(Debug)]
pub struct MemoryBackend {
    device: u64,
    block_size: u32,
    total_files: AtomicU64,
    total_blocks: AtomicU64,
    next_ino: AtomicU64,
    tree: RwLock<HashMap<PathBuf, Node>>,
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A backend with 4 KiB blocks and room for a million files and blocks
    pub fn new() -> Self {
        Self::with_block_size(4096)
    }

    pub fn with_block_size(block_size: u32) -> Self {
        let device = NEXT_DEVICE.fetch_add(1, Ordering::Relaxed);
        let mut tree = HashMap::new();
        tree.insert(
            PathBuf::new(),
            Node::Directory {
                id: FileId { dev: device, ino: 1 },
                xattrs: HashMap::new(),
            },
        );
        Self {
            device,
            block_size,
            total_files: AtomicU64::new(1 << 20),
            total_blocks: AtomicU64::new(1 << 20),
            next_ino: AtomicU64::new(2),
            tree: RwLock::new(tree),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Set the total number of inodes and blocks reported by `statfs`
    pub fn set_capacity(&self, files: u64, blocks: u64) {
        self.total_files.store(files, Ordering::Relaxed);
        self.total_blocks.store(blocks, Ordering::Relaxed);
    }

    pub fn set_fail_map(&self, fail: bool) {
        self.shared.fail_map.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Make every write store only half of its data
    pub fn set_short_writes(&self, short: bool) {
        self.shared.short_writes.store(short, Ordering::Relaxed);
    }

    pub fn io_counts(&self) -> IoCounts {
        IoCounts {
            map_block: self.shared.map_block_calls.load(Ordering::Relaxed),
            page_reads: self.shared.page_reads.load(Ordering::Relaxed),
            writes: self.shared.writes.load(Ordering::Relaxed),
        }
    }

    /// The file at `path`, if any
    pub fn file(&self, path: &Path) -> Option<Arc<MemoryFile>> {
        match self.tree.read().get(path) {
            Some(Node::File { file, .. }) => Some(Arc::clone(file)),
            _ => None,
        }
    }

    /// Number of entries below the root
    pub fn entry_count(&self) -> usize {
        self.tree.read().len() - 1
    }

    fn next_id(&self) -> FileId {
        FileId {
            dev: self.device,
            ino: self.next_ino.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn parent_is_dir(tree: &HashMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        match tree.get(parent) {
            Some(Node::Directory { .. }) => Ok(()),
            Some(Node::File { .. }) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", parent.display()),
            )),
            None => Err(not_found(parent)),
        }
    }

    fn insert(&self, path: &Path, node: Node) -> io::Result<EntryInfo> {
        let mut tree = self.tree.write();
        if tree.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        Self::parent_is_dir(&tree, path)?;
        let info = node.info();
        tree.insert(path.to_path_buf(), node);
        Ok(info)
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    )
}

impl BackingFs for MemoryBackend {
    fn statfs(&self) -> io::Result<FsStats> {
        let used_files = self.tree.read().len() as u64;
        let files = self.total_files.load(Ordering::Relaxed);
        let blocks = self.total_blocks.load(Ordering::Relaxed);
        let used_blocks = self.shared.blocks_used.load(Ordering::Relaxed);
        Ok(FsStats {
            block_size: self.block_size,
            blocks,
            blocks_available: blocks.saturating_sub(used_blocks),
            files,
            files_free: files.saturating_sub(used_files),
        })
    }

    fn lookup(&self, path: &Path) -> io::Result<Option<EntryInfo>> {
        Ok(self.tree.read().get(path).map(Node::info))
    }

    fn mkdir(&self, path: &Path) -> io::Result<EntryInfo> {
        self.insert(
            path,
            Node::Directory {
                id: self.next_id(),
                xattrs: HashMap::new(),
            },
        )
    }

    fn create(&self, path: &Path) -> io::Result<EntryInfo> {
        let file = Arc::new(MemoryFile {
            id: self.next_id(),
            block_size: self.block_size,
            state: RwLock::new(FileState::default()),
            shared: Arc::clone(&self.shared),
        });
        self.insert(
            path,
            Node::File {
                file,
                xattrs: HashMap::new(),
            },
        )
    }

    fn open(&self, path: &Path) -> io::Result<Arc<dyn BackingFile>> {
        match self.tree.read().get(path) {
            Some(Node::File { file, .. }) => Ok(Arc::clone(file) as Arc<dyn BackingFile>),
            Some(Node::Directory { .. }) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut tree = self.tree.write();
        if !tree.contains_key(from) {
            return Err(not_found(from));
        }
        if tree.contains_key(to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        Self::parent_is_dir(&tree, to)?;

        let moved: Vec<PathBuf> = tree
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = tree.remove(&old) {
                let rest = old.strip_prefix(from).unwrap_or_else(|_| Path::new(""));
                let new = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
                tree.insert(new, node);
            }
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if path.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove the root",
            ));
        }
        let mut tree = self.tree.write();
        if !tree.contains_key(path) {
            return Err(not_found(path));
        }
        let doomed: Vec<PathBuf> = tree
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(Node::File { file, .. }) = tree.remove(&p) {
                file.release_blocks();
            }
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let tree = self.tree.read();
        match tree.get(path) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} is not a directory", path.display()),
                ))
            }
            None => return Err(not_found(path)),
        }
        let mut entries: Vec<DirEntry> = tree
            .iter()
            .filter(|(p, _)| p.parent() == Some(path) && p.as_path() != path)
            .filter_map(|(p, node)| {
                let name = p.file_name()?.to_str()?.to_string();
                Some(DirEntry {
                    name,
                    info: node.info(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn get_xattr(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
        match self.tree.read().get(path) {
            Some(node) => Ok(node.xattrs().get(name).cloned()),
            None => Err(not_found(path)),
        }
    }

    fn set_xattr(&self, path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
        match self.tree.write().get_mut(path) {
            Some(node) => {
                node.xattrs_mut().insert(name.to_string(), value.to_vec());
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_file_holes() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("f")).unwrap();
        let file = fs.open(Path::new("f")).unwrap();

        file.write_at(8192, b"hello").unwrap();
        assert_eq!(file.map_block(0).unwrap(), 0);
        assert_ne!(file.map_block(2).unwrap(), 0);
        assert_eq!(file.size().unwrap(), 8197);

        let mut page = vec![0xaa; 4096];
        file.read_page(2, &mut page).unwrap();
        assert_eq!(&page[..5], b"hello");
        assert!(page[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_truncate_releases_blocks() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("f")).unwrap();
        let file = fs.open(Path::new("f")).unwrap();
        file.write_at(0, &vec![1u8; 3 * 4096]).unwrap();
        let before = fs.statfs().unwrap().blocks_available;

        file.set_size(4096 + 10).unwrap();
        assert_eq!(fs.statfs().unwrap().blocks_available, before + 1);
        assert_eq!(file.map_block(2).unwrap(), 0);

        let contents = fs.file(Path::new("f")).unwrap().contents();
        assert_eq!(contents.len(), 4106);
        assert!(contents.iter().all(|&b| b == 1));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let fs = MemoryBackend::new();
        fs.mkdir(Path::new("a")).unwrap();
        fs.mkdir(Path::new("a/b")).unwrap();
        fs.create(Path::new("a/b/c")).unwrap();
        fs.mkdir(Path::new("z")).unwrap();

        fs.rename(Path::new("a"), Path::new("z/a")).unwrap();
        assert!(fs.lookup(Path::new("a/b/c")).unwrap().is_none());
        assert!(fs.lookup(Path::new("z/a/b/c")).unwrap().is_some());

        fs.remove(Path::new("z")).unwrap();
        assert_eq!(fs.entry_count(), 0);
    }

    #[test]
    fn test_create_requires_parent() {
        let fs = MemoryBackend::new();
        let err = fs.create(Path::new("missing/f")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_xattrs() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("f")).unwrap();
        assert_eq!(fs.get_xattr(Path::new("f"), "x").unwrap(), None);
        fs.set_xattr(Path::new("f"), "x", b"v").unwrap();
        assert_eq!(fs.get_xattr(Path::new("f"), "x").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_fault_injection() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("f")).unwrap();
        let file = fs.open(Path::new("f")).unwrap();

        fs.set_short_writes(true);
        assert_eq!(file.write_at(0, &[1u8; 100]).unwrap(), 50);
        fs.set_short_writes(false);

        fs.set_fail_reads(true);
        let mut buf = vec![0u8; 4096];
        assert!(file.read_page(0, &mut buf).is_err());
        assert_eq!(fs.io_counts().page_reads, 1);
        assert_eq!(fs.io_counts().writes, 1);
    }
}
