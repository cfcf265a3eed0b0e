use std::fmt;
use std::fs;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use serde_json::Value;
use crate::commons::error::CrlIoError;
use super::{Key, KeyValueError, StorageResult};

pub const LOCK_FILE_NAME: &str = "lockfile.lock";
pub const LOCK_FILE_DIR: &str = ".locks";
const GLOBAL_LOCK_SCOPE: &str = "_global";


//------------ Disk ----------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Disk {
    root: PathBuf,
    tmp: PathBuf,
}

impl Disk {
    /// Creates a disk based store for the given base path and namespace.
    ///
    /// Values live under `path/namespace`. New values are first written
    /// to a file in `path/tmp` and then moved into place, so that readers
    /// never see a partially written value.
    pub fn new(path: &str, namespace: &str) -> StorageResult<Self> {
        let root = PathBuf::from(path).join(namespace);
        let tmp = PathBuf::from(path).join("tmp");

        if !tmp.exists() {
            fs::create_dir_all(&tmp).map_err(|e| {
                KeyValueError::IoError(CrlIoError::new(
                    format!(
                        "Cannot create directory for tmp files: {}",
                        tmp.display()
                    ),
                    e,
                ))
            })?;
        }

        Ok(Disk { root, tmp })
    }

    fn key_path(&self, key: &Key) -> PathBuf {
        let mut path = self.root.clone();
        if let Some(scope) = key.scope() {
            path.push(scope);
        }
        path.push(key.name());
        path
    }

    fn scope_path(&self, scope: Option<&str>) -> PathBuf {
        match scope {
            Some(scope) => self.root.join(scope),
            None => self.root.clone(),
        }
    }

    pub(super) fn lock_scope(
        &self, scope: Option<&str>
    ) -> StorageResult<FileLock> {
        FileLock::create(
            self.root
                .join(LOCK_FILE_DIR)
                .join(scope.unwrap_or(GLOBAL_LOCK_SCOPE)),
        )
    }
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local://{}", self.root.display())
    }
}

impl Disk {
    pub fn is_empty(&self) -> StorageResult<bool> {
        if let Ok(entries) = self.root.read_dir() {
            for e in entries.into_iter().flatten() {
                if !e.path().ends_with(LOCK_FILE_DIR) {
                    return Ok(false);
                }
            }
        }
        // non existent dir counts as empty
        Ok(true)
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        Ok(self.key_path(key).exists())
    }

    pub fn get(&self, key: &Key) -> StorageResult<Option<Value>> {
        let path = self.key_path(key);
        if path.exists() {
            let value = fs::read_to_string(&path).map_err(|e| {
                KeyValueError::IoError(CrlIoError::new(
                    format!("cannot read file: {}", path.display()),
                    e,
                ))
            })?;
            Ok(Some(serde_json::from_str(&value)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_keys(&self, scope: Option<&str>) -> StorageResult<Vec<Key>> {
        let dir = self.scope_path(scope);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut keys = vec![];
        for path in list_entries(&dir)? {
            if path.is_dir() {
                continue;
            }
            let name = file_name(&path)?;
            let key = match scope {
                Some(scope) => Key::new_scoped(scope, &name)?,
                None => Key::new_global(&name)?,
            };
            keys.push(key);
        }
        Ok(keys)
    }

    pub fn list_scopes(&self) -> StorageResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut scopes = vec![];
        for path in list_entries(&self.root)? {
            if path.is_dir()
                && !path.ends_with(LOCK_FILE_DIR)
                && !list_entries(&path)?.is_empty()
            {
                scopes.push(file_name(&path)?);
            }
        }
        Ok(scopes)
    }
}

impl Disk {
    /// Stores a value on disk. We always write the entire value into
    /// a tempfile first, to ensure that it is written completely, before
    /// renaming it to the actual file for the key.
    pub fn store(&self, key: &Key, value: Value) -> StorageResult<()> {
        if key.scope() == Some(LOCK_FILE_DIR) {
            return Err(KeyValueError::InvalidSegment(key.to_string()));
        }

        let path = self.key_path(key);
        let dir = self.scope_path(key.scope());

        if !dir.try_exists().unwrap_or_default() {
            fs::create_dir_all(&dir).map_err(|e| {
                KeyValueError::IoError(CrlIoError::new(
                    format!("cannot create dir for path: {}", dir.display()),
                    e,
                ))
            })?;
        }

        let tmp_file = tempfile::NamedTempFile::new_in(&self.tmp).map_err(|e| {
            KeyValueError::IoError(CrlIoError::new(
                format!(
                    "Issue writing tmp file for key: {key}. Check \
                     permissions and space on disk."
                ),
                e,
            ))
        })?;

        fs::write(&tmp_file, format!("{value:#}").as_bytes()).map_err(|e| {
            KeyValueError::IoError(CrlIoError::new(
                format!(
                    "Issue writing tmp file: {} for key: {}. Check \
                     permissions and space on disk.",
                    tmp_file.as_ref().display(),
                    key
                ),
                e,
            ))
        })?;

        // An existing file at the target path is replaced.
        tmp_file.persist(&path).map_err(|e| {
            KeyValueError::IoError(CrlIoError::new(
                format!(
                    "Cannot rename temp file {} to {}.",
                    e.file.path().display(),
                    path.display()
                ),
                e.error,
            ))
        })?;

        Ok(())
    }

    pub fn delete(&self, key: &Key) -> StorageResult<()> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(())
        }

        fs::remove_file(&path).map_err(|e| {
            KeyValueError::IoError(CrlIoError::new(
                format!("cannot remove file: {}", path.display()),
                e,
            ))
        })?;

        if let Some(scope) = key.scope() {
            remove_dir_if_empty(&self.scope_path(Some(scope)));
        }
        Ok(())
    }

    pub fn delete_scope(&self, scope: &str) -> StorageResult<()> {
        let path = self.scope_path(Some(scope));
        if !path.exists() {
            return Ok(())
        }

        fs::remove_dir_all(&path).map_err(|e| {
            KeyValueError::IoError(CrlIoError::new(
                format!("cannot remove dir for {}", path.display()),
                e,
            ))
        })?;
        Ok(())
    }
}


//------------ FileLock ------------------------------------------------------

/// An advisory lock on a file below the `.locks` directory.
#[derive(Debug)]
pub(super) struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    fn create(path: PathBuf) -> StorageResult<Self> {
        let lock_path = path.join(LOCK_FILE_NAME);
        if !path.try_exists().unwrap_or_default() {
            fs::create_dir_all(&path).map_err(|e| {
                KeyValueError::IoError(CrlIoError::new(
                    format!(
                        "cannot create dir for lockfile {}",
                        lock_path.display()
                    ),
                    e,
                ))
            })?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                KeyValueError::IoError(CrlIoError::new(
                    format!(
                        "failed to open lock file '{}'", lock_path.display()
                    ),
                    e,
                ))
            })?;

        Ok(FileLock { lock: fd_lock::RwLock::new(lock_file) })
    }

    pub(super) fn write(
        &mut self
    ) -> StorageResult<fd_lock::RwLockWriteGuard<'_, File>> {
        self.lock.write().map_err(|e| {
            KeyValueError::Other(format!("Cannot get file lock: {e}"))
        })
    }
}


//------------ Helpers -------------------------------------------------------

fn list_entries(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut res = vec![];
    for entry in fs::read_dir(dir).map_err(|e| {
        KeyValueError::IoError(CrlIoError::new(
            format!("cannot read dir {}", dir.display()),
            e,
        ))
    })? {
        let path = entry
            .map_err(|e| {
                KeyValueError::IoError(CrlIoError::new(
                    format!("cannot read entry in dir {}", dir.display()),
                    e,
                ))
            })?
            .path();
        res.push(path);
    }
    Ok(res)
}

fn file_name(path: &Path) -> StorageResult<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            KeyValueError::Other(format!(
                "cannot get file name from path: {}",
                path.display()
            ))
        })
}

fn remove_dir_if_empty(path: &Path) {
    // Fails for non-empty directories, which is what we want.
    let _ = fs::remove_dir(path);
}
