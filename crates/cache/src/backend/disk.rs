//! Backing store on a real directory tree
//!
//! Holes are found with `SEEK_DATA` on Linux, capacity comes from `statvfs`,
//! and auxiliary data lives in `user.` extended attributes.

use super::{BackingFile, BackingFs, DirEntry, EntryInfo, EntryKind, FileId, FsStats};
use std::ffi::CString;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Backing filesystem rooted at a local directory
#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    /// Use `root` as the cache directory, creating it if needed
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

fn entry_info(meta: &Metadata) -> EntryInfo {
    EntryInfo {
        id: FileId {
            dev: meta.dev(),
            ino: meta.ino(),
        },
        kind: if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        size: meta.len(),
    }
}

/// Fundamental block size of a filesystem, not its preferred I/O size
fn fragment_size(stat: &libc::statvfs) -> u32 {
    if stat.f_frsize > 0 {
        stat.f_frsize as u32
    } else {
        stat.f_bsize as u32
    }
}

fn file_block_size(file: &File) -> io::Result<u32> {
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::fstatvfs(file.as_raw_fd(), &mut stat) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fragment_size(&stat))
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

impl BackingFs for DiskBackend {
    fn statfs(&self) -> io::Result<FsStats> {
        let path = c_path(&self.root)?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(FsStats {
            block_size: fragment_size(&stat),
            blocks: stat.f_blocks as u64,
            blocks_available: stat.f_bavail as u64,
            files: stat.f_files as u64,
            files_free: stat.f_favail as u64,
        })
    }

    fn lookup(&self, path: &Path) -> io::Result<Option<EntryInfo>> {
        match fs::symlink_metadata(self.abs(path)) {
            Ok(meta) => Ok(Some(entry_info(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn mkdir(&self, path: &Path) -> io::Result<EntryInfo> {
        let abs = self.abs(path);
        fs::create_dir(&abs)?;
        Ok(entry_info(&fs::symlink_metadata(&abs)?))
    }

    fn create(&self, path: &Path) -> io::Result<EntryInfo> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.abs(path))?;
        Ok(entry_info(&file.metadata()?))
    }

    fn open(&self, path: &Path) -> io::Result<Arc<dyn BackingFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.abs(path))?;
        let meta = file.metadata()?;
        let block_size = file_block_size(&file)?;
        Ok(Arc::new(DiskFile {
            id: entry_info(&meta).id,
            block_size,
            file,
        }))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(self.abs(from), self.abs(to))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let abs = self.abs(path);
        if fs::symlink_metadata(&abs)?.is_dir() {
            fs::remove_dir_all(abs)
        } else {
            fs::remove_file(abs)
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.abs(path))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let meta = entry.metadata()?;
            entries.push(DirEntry {
                name,
                info: entry_info(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    #[cfg(target_os = "linux")]
    fn get_xattr(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
        let path = c_path(&self.abs(path))?;
        let name = CString::new(format!("user.{name}"))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "xattr name contains NUL"))?;

        loop {
            let size = unsafe {
                libc::getxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0)
            };
            if size < 0 {
                let err = io::Error::last_os_error();
                return match err.raw_os_error() {
                    Some(libc::ENODATA) => Ok(None),
                    _ => Err(err),
                };
            }

            let mut buf = vec![0u8; size as usize];
            let read = unsafe {
                libc::getxattr(
                    path.as_ptr(),
                    name.as_ptr(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            };
            if read < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    // grew between the two calls
                    Some(libc::ERANGE) => continue,
                    Some(libc::ENODATA) => return Ok(None),
                    _ => return Err(err),
                }
            }
            buf.truncate(read as usize);
            return Ok(Some(buf));
        }
    }

    #[cfg(target_os = "linux")]
    fn set_xattr(&self, path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
        let path = c_path(&self.abs(path))?;
        let name = CString::new(format!("user.{name}"))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "xattr name contains NUL"))?;
        let ret = unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                0,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn get_xattr(&self, _path: &Path, _name: &str) -> io::Result<Option<Vec<u8>>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "extended attributes are only supported on Linux",
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn set_xattr(&self, _path: &Path, _name: &str, _value: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "extended attributes are only supported on Linux",
        ))
    }
}

/// An open regular file in the cache directory
#[derive(Debug)]
struct DiskFile {
    id: FileId,
    block_size: u32,
    file: File,
}

impl BackingFile for DiskFile {
    fn id(&self) -> FileId {
        self.id
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    #[cfg(target_os = "linux")]
    fn map_block(&self, block: u64) -> io::Result<u64> {
        let bs = u64::from(self.block_size);
        let offset = block * bs;
        let found = unsafe {
            libc::lseek(
                self.file.as_raw_fd(),
                offset as libc::off_t,
                libc::SEEK_DATA,
            )
        };
        if found < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                // no data at or after offset
                Some(libc::ENXIO) => Ok(0),
                _ => Err(err),
            };
        }
        if (found as u64) < offset + bs {
            Ok(block + 1)
        } else {
            Ok(0)
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn map_block(&self, block: u64) -> io::Result<u64> {
        let offset = block * u64::from(self.block_size);
        if offset < self.file.metadata()?.len() {
            Ok(block + 1)
        } else {
            Ok(0)
        }
    }

    fn read_page(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = index * buf.len() as u64;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], start + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_at(&self, pos: u64, data: &[u8]) -> io::Result<usize> {
        self.file.write_at(data, pos)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_size(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }
}
