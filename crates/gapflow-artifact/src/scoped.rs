//! Path-scoped, crash-safe filesystem access
//!
//! A [`ScopedDir`] confines every read and write to one root directory.
//! Writes go through a temp file in the destination directory followed by an
//! atomic rename, so readers observe either the old or the new content and
//! never a partial file.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Default ceiling for a single read: 100 MiB.
pub const DEFAULT_MAX_READ_BYTES: u64 = 100 * 1024 * 1024;

const BACKUP_SUFFIX: &str = "bak";
const TEMP_PREFIX: &str = ".tmp-";

/// Filesystem access confined to a single root directory
#[derive(Debug, Clone)]
pub struct ScopedDir {
    root: PathBuf,
    max_read_bytes: u64,
    backups: bool,
}

impl ScopedDir {
    /// Scope access to `root`. Relative roots resolve against the current
    /// working directory.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: normalize_lexically(&absolutize(root.as_ref())),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            backups: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_max_read_bytes(mut self, limit: u64) -> Self {
        self.max_read_bytes = limit;
        self
    }

    /// Skip the `.bak` copy on overwrite. Used for workspace files, where the
    /// snapshot already holds the previous content.
    #[inline]
    #[must_use]
    pub fn without_backups(mut self) -> Self {
        self.backups = false;
        self
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    #[must_use]
    pub fn max_read_bytes(&self) -> u64 {
        self.max_read_bytes
    }

    /// Resolve `path` (relative to the root, or absolute) and verify it stays
    /// inside the root, both lexically and after following any symlinks in
    /// the portion of the path that already exists.
    ///
    /// # Errors
    /// Returns [`StoreError::PathTraversal`] if the path escapes the root
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, StoreError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize_lexically(&joined);

        if !resolved.starts_with(&self.root) {
            return Err(self.traversal(&resolved));
        }
        if let Some(real) = canonical_prefix(&resolved) {
            let real_root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
            if !real.starts_with(&real_root) {
                return Err(self.traversal(&resolved));
            }
        }
        Ok(resolved)
    }

    /// True if `path` resolves inside the root and exists
    #[must_use]
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Atomically replace `path` with `data`.
    ///
    /// The previous content, if any, is copied to `<name>.bak` on a best-effort
    /// basis before the rename. When the rename fails the temp file is
    /// removed and the previous file is left untouched.
    ///
    /// # Errors
    /// Containment, permission, or I/O failure
    pub fn write_bytes_atomic(&self, path: impl AsRef<Path>, data: &[u8]) -> Result<PathBuf, StoreError> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| StoreError::write(&target, io::Error::new(io::ErrorKind::InvalidInput, "no parent directory")))?;
        fs::create_dir_all(parent).map_err(|e| StoreError::write(parent, e))?;

        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| StoreError::write(&target, e))?;
        {
            let mut file = temp.as_file();
            file.write_all(data).map_err(|e| StoreError::write(&target, e))?;
            file.sync_all().map_err(|e| StoreError::write(&target, e))?;
        }

        if self.backups && target.is_file() {
            let backup = backup_path(&target);
            if let Err(e) = fs::copy(&target, &backup) {
                tracing::warn!(path = %target.display(), err = %e, "failed to back up previous artifact");
            }
        }

        // On failure the returned NamedTempFile is dropped, which deletes it.
        temp.persist(&target)
            .map_err(|e| StoreError::write(&target, e.error))?;
        tracing::debug!(path = %target.display(), bytes = data.len(), "atomic write");
        Ok(target)
    }

    /// # Errors
    /// See [`ScopedDir::write_bytes_atomic`]
    #[inline]
    pub fn write_text_atomic(&self, path: impl AsRef<Path>, text: &str) -> Result<PathBuf, StoreError> {
        self.write_bytes_atomic(path, text.as_bytes())
    }

    /// Serialize `value` as pretty JSON and write it atomically
    ///
    /// # Errors
    /// Encoding failure or any error of [`ScopedDir::write_bytes_atomic`]
    pub fn write_json_atomic<T: Serialize + ?Sized>(&self, path: impl AsRef<Path>, value: &T) -> Result<PathBuf, StoreError> {
        let path = path.as_ref();
        let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        bytes.push(b'\n');
        self.write_bytes_atomic(path, &bytes)
    }

    /// Read a file after containment and size checks
    ///
    /// # Errors
    /// Containment failure, `NotFound`, `TooLarge`, or I/O failure
    pub fn read_bytes_safe(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, StoreError> {
        let target = self.resolve(path)?;
        let meta = fs::metadata(&target).map_err(|e| StoreError::read(&target, e))?;
        if meta.len() > self.max_read_bytes {
            return Err(StoreError::TooLarge {
                path: target,
                size: meta.len(),
                limit: self.max_read_bytes,
            });
        }
        let file = fs::File::open(&target).map_err(|e| StoreError::read(&target, e))?;
        // The file may grow between stat and read; never buffer past the limit.
        let mut buf = Vec::with_capacity(usize::try_from(meta.len()).unwrap_or(0));
        file.take(self.max_read_bytes.saturating_add(1))
            .read_to_end(&mut buf)
            .map_err(|e| StoreError::read(&target, e))?;
        if buf.len() as u64 > self.max_read_bytes {
            return Err(StoreError::TooLarge {
                path: target,
                size: buf.len() as u64,
                limit: self.max_read_bytes,
            });
        }
        Ok(buf)
    }

    /// # Errors
    /// See [`ScopedDir::read_bytes_safe`]; non-UTF-8 content is a read failure
    pub fn read_text_safe(&self, path: impl AsRef<Path>) -> Result<String, StoreError> {
        let path = path.as_ref();
        let bytes = self.read_bytes_safe(path)?;
        String::from_utf8(bytes).map_err(|e| StoreError::Read {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })
    }

    /// Read and decode JSON. Syntax errors surface as
    /// [`StoreError::InvalidJson`], distinct from read failures.
    ///
    /// # Errors
    /// See [`ScopedDir::read_bytes_safe`] and [`StoreError::decode`]
    pub fn read_json_safe<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> Result<T, StoreError> {
        let path = path.as_ref();
        let bytes = self.read_bytes_safe(path)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::decode(path, e))
    }

    /// Remove a file. Returns `false` if it did not exist.
    ///
    /// # Errors
    /// Containment or I/O failure
    pub fn remove_file(&self, path: impl AsRef<Path>) -> Result<bool, StoreError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::write(&target, e)),
        }
    }

    /// Create a directory (and parents) inside the root
    ///
    /// # Errors
    /// Containment or I/O failure
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<PathBuf, StoreError> {
        let target = self.resolve(path)?;
        fs::create_dir_all(&target).map_err(|e| StoreError::write(&target, e))?;
        Ok(target)
    }

    /// Remove a directory tree. Returns `false` if it did not exist.
    ///
    /// # Errors
    /// Containment or I/O failure
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> Result<bool, StoreError> {
        let target = self.resolve(path)?;
        match fs::remove_dir_all(&target) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::write(&target, e)),
        }
    }

    /// Names of the entries of a directory, sorted. A missing directory
    /// lists as empty.
    ///
    /// # Errors
    /// Containment or I/O failure
    pub fn list_dir(&self, path: impl AsRef<Path>) -> Result<Vec<String>, StoreError> {
        let target = self.resolve(path)?;
        let entries = match fs::read_dir(&target) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::read(&target, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::read(&target, e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn traversal(&self, path: &Path) -> StoreError {
        tracing::error!(path = %path.display(), root = %self.root.display(), "path traversal rejected");
        StoreError::PathTraversal {
            path: path.to_path_buf(),
            root: self.root.clone(),
        }
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor of `path`, re-appending the
/// components that do not exist yet.
fn canonical_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut rest = Vec::new();
    loop {
        if let Ok(real) = fs::canonicalize(existing) {
            let mut out = real;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return Some(out);
        }
        rest.push(existing.file_name()?.to_os_string());
        existing = existing.parent()?;
    }
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scoped() -> (tempfile::TempDir, ScopedDir) {
        let dir = tempfile::tempdir().unwrap();
        let scoped = ScopedDir::new(dir.path());
        (dir, scoped)
    }

    #[test]
    fn write_then_read_text() {
        let (_dir, scoped) = scoped();
        scoped.write_text_atomic("a/b/c.txt", "hello").unwrap();
        assert_eq!(scoped.read_text_safe("a/b/c.txt").unwrap(), "hello");
    }

    #[test]
    fn overwrite_keeps_backup_of_previous_content() {
        let (dir, scoped) = scoped();
        scoped.write_text_atomic("x.json", "one").unwrap();
        scoped.write_text_atomic("x.json", "two").unwrap();
        assert_eq!(scoped.read_text_safe("x.json").unwrap(), "two");
        assert_eq!(fs::read_to_string(dir.path().join("x.json.bak")).unwrap(), "one");
    }

    #[test]
    fn backups_can_be_disabled() {
        let (dir, scoped) = scoped();
        let scoped = scoped.without_backups();
        scoped.write_text_atomic("src/a.ts", "one").unwrap();
        scoped.write_text_atomic("src/a.ts", "two").unwrap();
        assert_eq!(scoped.read_text_safe("src/a.ts").unwrap(), "two");
        assert!(!dir.path().join("src/a.ts.bak").exists());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let (_dir, scoped) = scoped();
        scoped.write_text_atomic("x.txt", "data").unwrap();
        let names = scoped.list_dir(".").unwrap();
        assert_eq!(names, vec!["x.txt".to_string()]);
        assert!(names.iter().all(|n| !n.starts_with(TEMP_PREFIX)), "{names:?}");
    }

    #[test]
    fn rejects_parent_escape() {
        let (_dir, scoped) = scoped();
        let err = scoped.write_text_atomic("../escape.txt", "x").unwrap_err();
        assert!(matches!(err, StoreError::PathTraversal { .. }));
        let err = scoped.read_text_safe("a/../../escape.txt").unwrap_err();
        assert!(matches!(err, StoreError::PathTraversal { .. }));
    }

    #[test]
    fn rejects_absolute_path_outside_root() {
        let (_dir, scoped) = scoped();
        let other = tempfile::tempdir().unwrap();
        let err = scoped
            .write_text_atomic(other.path().join("x.txt"), "x")
            .unwrap_err();
        assert!(matches!(err, StoreError::PathTraversal { .. }));
    }

    #[test]
    fn accepts_absolute_path_inside_root() {
        let (dir, scoped) = scoped();
        let inside = dir.path().join("inner/file.txt");
        scoped.write_text_atomic(&inside, "ok").unwrap();
        assert_eq!(fs::read_to_string(inside).unwrap(), "ok");
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (dir, scoped) = scoped();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let err = scoped.write_text_atomic("link/x.txt", "x").unwrap_err();
        assert!(matches!(err, StoreError::PathTraversal { .. }));
    }

    #[test]
    fn read_limit_is_enforced() {
        let (_dir, scoped) = scoped();
        let scoped = scoped.with_max_read_bytes(4);
        scoped.write_text_atomic("big.txt", "12345").unwrap();
        let err = scoped.read_text_safe("big.txt").unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { size: 5, limit: 4, .. }));
    }

    #[test]
    fn invalid_json_is_distinct_from_missing_file() {
        let (_dir, scoped) = scoped();
        scoped.write_text_atomic("bad.json", "{oops").unwrap();
        let err = scoped.read_json_safe::<serde_json::Value>("bad.json").unwrap_err();
        assert!(matches!(err, StoreError::InvalidJson { .. }));
        let err = scoped.read_json_safe::<serde_json::Value>("missing.json").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn remove_file_reports_presence() {
        let (_dir, scoped) = scoped();
        scoped.write_text_atomic("gone.txt", "x").unwrap();
        assert!(scoped.remove_file("gone.txt").unwrap());
        assert!(!scoped.remove_file("gone.txt").unwrap());
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
    }
}
