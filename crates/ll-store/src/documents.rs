//! Document store contract and the filesystem implementation.
//!
//! Documents are the durable source of truth for entity content: one
//! human-editable file per entity, addressed by a relative path with `/`
//! separators. The core treats content as an opaque parseable blob; any
//! process may edit files externally, and staleness is detected upstream
//! via mtime and content hash.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{Result, StoreError};

pub trait DocumentStore {
    fn read(&self, path: &str) -> Result<String>;
    fn write(&self, path: &str, content: &str) -> Result<()>;
    fn remove(&self, path: &str) -> Result<()>;
    fn exists(&self, path: &str) -> bool;
    /// Modification time in unix millis; `None` when the file is missing.
    fn mtime_ms(&self, path: &str) -> Result<Option<i64>>;
    /// Relative paths of all documents under `dir` (recursive) with the
    /// given extension, sorted.
    fn list(&self, dir: &str, ext: &str) -> Result<Vec<String>>;
}

/// Documents as plain files under a project root.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl DocumentStore for FsDocumentStore {
    fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path);
        match fs::read_to_string(&full) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound { what: "document", key: path.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, content)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound { what: "document", key: path.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn mtime_ms(&self, path: &str) -> Result<Option<i64>> {
        let full = self.resolve(path);
        let meta = match fs::metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mtime = meta.modified()?;
        let ms = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(Some(ms))
    }

    fn list(&self, dir: &str, ext: &str) -> Result<Vec<String>> {
        let base = self.resolve(dir);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        walk(&base, &self.root, ext, &mut out)?;
        out.sort();
        Ok(out)
    }
}

fn walk(dir: &Path, root: &Path, ext: &str, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, root, ext, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(ext)
            && let Ok(rel) = path.strip_prefix(root)
        {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
