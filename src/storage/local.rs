//! Filesystem object store
//!
//! Objects live under a root directory at their relative path. Writes go to a
//! temporary file first and are then published:
//!
//! 1. Write content to a uniquely named `.tmp` sibling
//! 2. `sync_all()` to flush to disk
//! 3. Publish with `rename` (overwrite) or `hard_link` (create-only)
//!
//! `hard_link` fails when the destination exists, which gives write-once
//! semantics for `if_generation_match = 0`. Other preconditions are not
//! enforced by this backend.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ObjectStat, ObjectStore, Preconditions, StoreError, StoreResult, WriteResult};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `root`, creating the directory and removing
    /// temp files left behind by interrupted writes
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let cleaned = cleanup_temp_files(&root)?;
        if cleaned > 0 {
            tracing::info!(root = %root.display(), cleaned, "Removed leftover temp files");
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::Backend(format!("invalid object path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn write(
        &self,
        path: &str,
        body: Vec<u8>,
        preconditions: Preconditions,
    ) -> StoreResult<WriteResult> {
        let target = self.resolve(path)?;
        let create_only = preconditions.if_generation_match == Some(0);
        let name = path.to_string();

        run_blocking(move || {
            let published = if create_only {
                atomic_create(&target, &body)?
            } else {
                atomic_write(&target, &body)?;
                true
            };
            if !published {
                return Err(StoreError::PreconditionFailed(name));
            }
            let stat = stat_file(&target, &name)?;
            Ok(WriteResult {
                generation: stat.generation,
                metageneration: stat.metageneration,
            })
        })
        .await
    }

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, path: &str) -> StoreResult<ObjectStat> {
        let target = self.resolve(path)?;
        let name = path.to_string();
        run_blocking(move || stat_file(&target, &name)).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        run_blocking(move || {
            let start = match prefix.rsplit_once('/') {
                Some((dir, _)) => root.join(dir),
                None => root.clone(),
            };

            let mut names = Vec::new();
            if start.is_dir() {
                collect_files(&root, &start, &mut names)?;
            }
            names.retain(|n| n.starts_with(&prefix));
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn delete(&self, path: &str, _preconditions: Preconditions) -> StoreResult<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
}

fn temp_path_for(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", file_name, std::process::id(), n))
}

fn write_temp(path: &Path, content: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_path_for(path);
    let mut file = File::create(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(temp_path)
}

/// Atomically replace the content of `path`
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp_path = write_temp(path, content)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

/// Atomically create `path`; returns `false` if it already exists
pub(crate) fn atomic_create(path: &Path, content: &[u8]) -> io::Result<bool> {
    let temp_path = write_temp(path, content)?;
    let linked = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove `.tmp` files left behind by interrupted writes
pub(crate) fn cleanup_temp_files(dir: &Path) -> io::Result<usize> {
    let mut cleaned = 0;
    if !dir.is_dir() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            cleaned += cleanup_temp_files(&path)?;
        } else if is_temp_file(&path) {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().map(|e| e == "tmp").unwrap_or(false)
        && path
            .file_name()
            .map(|f| f.to_string_lossy().starts_with('.'))
            .unwrap_or(false)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if !is_temp_file(&path) {
            if let Ok(relative) = path.strip_prefix(root) {
                let name: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(name.join("/"));
            }
        }
    }
    Ok(())
}

fn stat_file(path: &Path, name: &str) -> StoreResult<ObjectStat> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(name.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let modified = meta.modified()?;
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    Ok(ObjectStat {
        // Generation 0 is reserved for "absent"
        generation: nanos.max(1),
        metageneration: 1,
        size: meta.len(),
        updated_at: DateTime::<Utc>::from(modified),
    })
}
