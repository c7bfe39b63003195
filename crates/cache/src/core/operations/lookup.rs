//! Object lookup
//!
//! A lookup walks the encoded key under the parent index's directory,
//! creating what is missing, checks an existing entry's auxiliary data, and
//! binds the result in the active index. Lookups of one path are serialised,
//! and binding returns the object already in use for the same backing file,
//! so concurrent callers end up sharing one object.

use crate::backend::{EntryInfo, EntryKind};
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::key::{encode_key, EncodedKey, KeyType};
use crate::object::{decode_aux, encode_aux, AuxCheck, Backer, CacheObject, AUX_XATTR};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use super::super::types::{Cache, CacheInner};
use super::utils::run_blocking;

impl Cache {
    /// The top-level index every other object hangs off
    pub fn root(&self) -> Arc<CacheObject> {
        Arc::clone(&self.inner.root)
    }

    /// Backing path, relative to the backing root, that `raw_key` occupies
    /// under `parent`
    pub fn object_path(
        &self,
        parent: &CacheObject,
        raw_key: &[u8],
        key_type: KeyType,
    ) -> Result<PathBuf> {
        Ok(parent.path().join(encode_key(raw_key, key_type)?.to_path()))
    }

    /// Find or create the object for `raw_key` under `parent`
    ///
    /// An entry found on disk is only reused if its stored auxiliary data
    /// passes the validator against `aux`; otherwise it is buried and
    /// replaced. Each successful lookup holds one usage reference, released
    /// with [`Cache::relinquish_object`].
    pub async fn lookup_object(
        &self,
        parent: &Arc<CacheObject>,
        raw_key: &[u8],
        key_type: KeyType,
        aux: &[u8],
    ) -> Result<Arc<CacheObject>> {
        self.lookup(parent, raw_key, key_type, Some(aux.to_vec()))
            .await
    }

    /// Find the object for `raw_key` under `parent` without creating anything
    pub async fn lookup_existing(
        &self,
        parent: &Arc<CacheObject>,
        raw_key: &[u8],
        key_type: KeyType,
    ) -> Result<Arc<CacheObject>> {
        self.lookup(parent, raw_key, key_type, None).await
    }

    async fn lookup(
        &self,
        parent: &Arc<CacheObject>,
        raw_key: &[u8],
        key_type: KeyType,
        aux: Option<Vec<u8>>,
    ) -> Result<Arc<CacheObject>> {
        if self.inner.is_dead() {
            return Err(CacheError::no_buffers("cache is withdrawn"));
        }
        if parent.object_type() != KeyType::Index || !parent.is_active() || parent.is_buried() {
            return Err(CacheError::NotFound {
                path: parent.path().to_path_buf(),
                recovery_hint: RecoveryHint::FixCaller,
            });
        }

        let key = encode_key(raw_key, key_type)?;
        let path = parent.path().join(key.to_path());

        let lock = Arc::clone(self.inner.in_flight.entry(path.clone()).or_default().value());
        let _in_flight = InFlight {
            inner: &self.inner,
            path,
            guard: Some(lock.lock_owned().await),
        };

        let parent = Arc::clone(parent);
        run_blocking(&self.inner, "look up object", move |inner| {
            inner.walk_and_bind(&parent, &key, aux.as_deref())
        })
        .await
    }
}

/// Holds the lookup lock of one path and forgets the path once unused,
/// including when the lookup is dropped half way
struct InFlight<'a> {
    inner: &'a CacheInner,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.inner
            .in_flight
            .remove_if(&self.path, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl CacheInner {
    fn walk_and_bind(
        &self,
        parent: &Arc<CacheObject>,
        key: &EncodedKey,
        aux: Option<&[u8]>,
    ) -> Result<Arc<CacheObject>> {
        let create = aux.is_some();
        let segments: Vec<&str> = key.segments().collect();
        let Some((last, dirs)) = segments.split_last() else {
            return Err(CacheError::InvalidKey {
                length: key.as_bytes().len(),
                reason: "encoded key has no segments".to_string(),
                recovery_hint: RecoveryHint::FixCaller,
            });
        };

        let mut dir = parent.path().to_path_buf();
        for segment in dirs {
            dir.push(segment);
            self.walk_dir(&dir, create)?;
        }

        let path = dir.join(last);
        let kind = match key.key_type() {
            KeyType::Index => EntryKind::Directory,
            KeyType::DataFile | KeyType::Other => EntryKind::File,
        };

        let found = self
            .backend
            .lookup(&path)
            .map_err(|e| self.io_error(&path, "look up object", e))?;

        let existing = match found {
            Some(info) if info.kind == kind => match aux {
                Some(expected) => match self.check_aux(&path, key.key_type(), expected)? {
                    AuxCheck::Okay => Some(info),
                    AuxCheck::NeedsUpdate => {
                        self.store_aux(&path, key.key_type(), expected)?;
                        Some(info)
                    }
                    AuxCheck::Obsolete => {
                        tracing::debug!("Object at {} is out of date", path.display());
                        self.replace_entry(&path, &info)?;
                        None
                    }
                },
                None => Some(info),
            },
            Some(info) if create => {
                tracing::debug!("Object at {} has the wrong type", path.display());
                self.replace_entry(&path, &info)?;
                None
            }
            Some(_) | None => None,
        };

        let (info, is_new) = match existing {
            Some(info) => (info, false),
            None if create => (self.create_entry(&path, kind, key.key_type(), aux)?, true),
            None => {
                return Err(CacheError::NotFound {
                    path,
                    recovery_hint: RecoveryHint::FetchAndStore,
                })
            }
        };

        let (file, mapping, size) = match kind {
            EntryKind::File => {
                let file = self
                    .backend
                    .open(&path)
                    .map_err(|e| self.io_error(&path, "open backing file", e))?;
                let size = file
                    .size()
                    .map_err(|e| self.io_error(&path, "stat backing file", e))?;
                let mapping = self.backing_mapping(info.id);
                (Some(file), Some(mapping), size)
            }
            EntryKind::Directory => (None, None, info.size),
        };

        let stored_aux = match aux {
            Some(aux) => aux.to_vec(),
            None => self.read_aux(&path).unwrap_or_default(),
        };

        let object = CacheObject::new(
            self.next_object_id(),
            key.key_type(),
            Some(Arc::clone(parent)),
            Backer {
                path: path.clone(),
                id: info.id,
                file,
                mapping,
            },
            size,
            is_new,
            stored_aux,
        );

        let bound = self.activate(object)?;
        self.cull_candidates.on_remove(&path);
        self.stats.record_lookup(is_new);
        tracing::debug!(
            "Lookup {} -> object {}{}",
            path.display(),
            bound.debug_id(),
            if is_new { " (new)" } else { "" }
        );
        Ok(bound)
    }

    /// Make sure an intermediate directory exists
    fn walk_dir(&self, dir: &Path, create: bool) -> Result<()> {
        let found = self
            .backend
            .lookup(dir)
            .map_err(|e| self.io_error(dir, "look up directory", e))?;
        match found {
            Some(info) if info.kind == EntryKind::Directory => Ok(()),
            Some(info) if create => {
                self.replace_entry(dir, &info)?;
                self.make_dir(dir).map(|_| ())
            }
            None if create => self.make_dir(dir).map(|_| ()),
            Some(_) | None => Err(CacheError::NotFound {
                path: dir.to_path_buf(),
                recovery_hint: RecoveryHint::FetchAndStore,
            }),
        }
    }

    fn make_dir(&self, dir: &Path) -> Result<EntryInfo> {
        self.has_space(1, 0)?;
        match self.backend.mkdir(dir) {
            Ok(info) => Ok(info),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match self.backend.lookup(dir) {
                    Ok(Some(info)) if info.kind == EntryKind::Directory => Ok(info),
                    Ok(_) => Err(CacheError::Busy {
                        path: dir.to_path_buf(),
                        recovery_hint: RecoveryHint::RetryLater,
                    }),
                    Err(e) => Err(self.io_error(dir, "look up directory", e)),
                }
            }
            Err(e) => Err(self.io_error(dir, "create directory", e)),
        }
    }

    fn create_entry(
        &self,
        path: &Path,
        kind: EntryKind,
        key_type: KeyType,
        aux: Option<&[u8]>,
    ) -> Result<EntryInfo> {
        let info = match kind {
            EntryKind::Directory => self.make_dir(path)?,
            EntryKind::File => {
                self.has_space(1, 0)?;
                self.backend
                    .create(path)
                    .map_err(|e| self.io_error(path, "create backing file", e))?
            }
        };
        self.store_aux(path, key_type, aux.unwrap_or_default())?;
        Ok(info)
    }

    /// Move an entry out of the way, detaching any object still using it
    fn replace_entry(&self, path: &Path, info: &EntryInfo) -> Result<()> {
        if let Some(stale) = self.active.get(&info.id) {
            stale.bury();
            self.deactivate(&stale);
        }
        self.bury_path(path)
    }

    fn check_aux(&self, path: &Path, key_type: KeyType, expected: &[u8]) -> Result<AuxCheck> {
        let stored = self
            .backend
            .get_xattr(path, AUX_XATTR)
            .map_err(|e| self.io_error(path, "read auxiliary data", e))?;
        let verdict = match stored.as_deref().and_then(decode_aux) {
            Some((stored_type, payload)) if stored_type == key_type => {
                self.validator.check(key_type, payload, expected)
            }
            _ => AuxCheck::Obsolete,
        };
        Ok(verdict)
    }

    pub(in crate::core) fn store_aux(&self, path: &Path, key_type: KeyType, aux: &[u8]) -> Result<()> {
        let blob = encode_aux(key_type, aux)?;
        self.backend
            .set_xattr(path, AUX_XATTR, &blob)
            .map_err(|e| self.io_error(path, "write auxiliary data", e))
    }

    fn read_aux(&self, path: &Path) -> Option<Vec<u8>> {
        let blob = self.backend.get_xattr(path, AUX_XATTR).ok()??;
        decode_aux(&blob).map(|(_, payload)| payload.to_vec())
    }
}
