//! Byte-level storage layer over URI-like paths.
//!
//! The [`Store`] handle offers get/put/copy/remove/link primitives used by
//! every other pyramerge crate. Two backends exist:
//! - [`Store::file`] maps `file://` URIs and bare paths onto the local
//!   filesystem, implementing `link` as a symlink;
//! - [`Store::memory`] keeps everything in a process-local map, for tests
//!   and dry runs.
//!
//! Mixing backends inside one job is not supported: a job's descriptors,
//! slabs, and work directory all go through the one injected `Store`.

pub mod uri;

use std::collections::HashMap;
use std::sync::Mutex;

use md5::{Digest, Md5};
use pyramerge_shared::{PyramergeError, Result};
use tracing::debug;

/// Storage handle. Cheap to share by reference across a whole job.
pub enum Store {
    File(FileStore),
    Memory(MemoryStore),
}

impl Store {
    /// Local-filesystem backend.
    pub fn file() -> Self {
        Self::File(FileStore)
    }

    /// In-memory backend for tests and dry runs.
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::default())
    }

    /// Read the full content of `path`.
    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            Self::File(s) => s.get(path).await,
            Self::Memory(s) => s.get(path),
        }
    }

    /// Read `path` as UTF-8 text.
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let bytes = self.get(path).await?;
        String::from_utf8(bytes)
            .map_err(|_| PyramergeError::Storage(format!("{path} is not valid UTF-8")))
    }

    /// Write `content` at `path`, creating parent trays as needed.
    pub async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        match self {
            Self::File(s) => s.put(path, content).await,
            Self::Memory(s) => s.put(path, content),
        }
    }

    /// Write text at `path`.
    pub async fn put_text(&self, path: &str, content: &str) -> Result<()> {
        self.put(path, content.as_bytes()).await
    }

    /// Copy `src` to `dst`. When `md5` is given, the copied bytes are
    /// verified against it and a mismatch is an error.
    pub async fn copy(&self, src: &str, dst: &str, md5: Option<&str>) -> Result<()> {
        let bytes = self.get(src).await?;
        if let Some(expected) = md5 {
            let actual = md5_hex(&bytes);
            if actual != expected {
                return Err(PyramergeError::Storage(format!(
                    "md5 mismatch copying {src}: expected {expected}, got {actual}"
                )));
            }
        }
        self.put(dst, &bytes).await
    }

    /// Remove `path`. Removing an absent path is not an error.
    pub async fn remove(&self, path: &str) -> Result<()> {
        match self {
            Self::File(s) => s.remove(path).await,
            Self::Memory(s) => s.remove(path),
        }
    }

    /// Whether `path` exists.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self {
            Self::File(s) => s.exists(path).await,
            Self::Memory(s) => Ok(s.exists(path)),
        }
    }

    /// Size of `path` in bytes, following links.
    pub async fn size(&self, path: &str) -> Result<u64> {
        match self {
            Self::File(s) => s.size(path).await,
            Self::Memory(s) => s.size(path),
        }
    }

    /// Make `link` an alias of `target`, replacing any existing `link`.
    pub async fn link(&self, target: &str, link: &str) -> Result<()> {
        debug!(target, link, "linking slab");
        match self {
            Self::File(s) => s.link(target, link).await,
            Self::Memory(s) => s.link(target, link),
        }
    }

    /// If `path` is a link, return its target.
    pub async fn link_target(&self, path: &str) -> Result<Option<String>> {
        match self {
            Self::File(s) => s.link_target(path).await,
            Self::Memory(s) => Ok(s.link_target(path)),
        }
    }

    /// Create the parent tray of `path` when the backend needs one.
    pub async fn ensure_parent(&self, path: &str) -> Result<()> {
        match self {
            Self::File(s) => s.ensure_parent(path).await,
            Self::Memory(_) => Ok(()),
        }
    }
}

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// Local-filesystem backend.
pub struct FileStore;

impl FileStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let local = uri::local_path(path);
        tokio::fs::read(local)
            .await
            .map_err(|e| PyramergeError::io(local, e))
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        self.ensure_parent(path).await?;
        let local = uri::local_path(path);
        tokio::fs::write(local, content)
            .await
            .map_err(|e| PyramergeError::io(local, e))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let local = uri::local_path(path);
        match tokio::fs::remove_file(local).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PyramergeError::io(local, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let local = uri::local_path(path);
        Ok(tokio::fs::try_exists(local).await.unwrap_or(false))
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let local = uri::local_path(path);
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| PyramergeError::io(local, e))?;
        Ok(meta.len())
    }

    async fn link(&self, target: &str, link: &str) -> Result<()> {
        self.ensure_parent(link).await?;
        let link_local = uri::local_path(link).to_string();
        let target_local = uri::local_path(target).to_string();
        self.remove(link).await?;
        tokio::fs::symlink(&target_local, &link_local)
            .await
            .map_err(|e| PyramergeError::io(link_local, e))
    }

    async fn link_target(&self, path: &str) -> Result<Option<String>> {
        let local = uri::local_path(path);
        match tokio::fs::read_link(local).await {
            Ok(target) => Ok(Some(target.to_string_lossy().into_owned())),
            Err(_) => Ok(None),
        }
    }

    async fn ensure_parent(&self, path: &str) -> Result<()> {
        let (tray, _) = uri::split_tray(uri::local_path(path));
        if tray.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(tray)
            .await
            .map_err(|e| PyramergeError::io(tray, e))
    }
}

// ---------------------------------------------------------------------------
// Memory backend
// ---------------------------------------------------------------------------

enum Entry {
    Bytes(Vec<u8>),
    Link(String),
}

/// In-memory backend keyed by the full path string.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        let resolved = match entries.get(path) {
            Some(Entry::Link(target)) => entries.get(target.as_str()),
            other => other,
        };
        match resolved {
            Some(Entry::Bytes(bytes)) => Ok(bytes.clone()),
            _ => Err(PyramergeError::Storage(format!("{path} does not exist"))),
        }
    }

    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), Entry::Bytes(content.to_vec()));
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    fn size(&self, path: &str) -> Result<u64> {
        Ok(self.get(path)?.len() as u64)
    }

    fn link(&self, target: &str, link: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(link.to_string(), Entry::Link(target.to_string()));
        Ok(())
    }

    fn link_target(&self, path: &str) -> Option<String> {
        match self.entries.lock().unwrap().get(path) {
            Some(Entry::Link(target)) => Some(target.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_put_get_roundtrip() {
        let store = Store::memory();
        store.put_text("mem://a/b.txt", "hello").await.unwrap();
        assert!(store.exists("mem://a/b.txt").await.unwrap());
        assert_eq!(store.get_text("mem://a/b.txt").await.unwrap(), "hello");
        assert_eq!(store.size("mem://a/b.txt").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn memory_copy_verifies_md5() {
        let store = Store::memory();
        store.put_text("src", "payload").await.unwrap();

        let good = md5_hex(b"payload");
        store.copy("src", "dst", Some(&good)).await.unwrap();
        assert_eq!(store.get_text("dst").await.unwrap(), "payload");

        let err = store
            .copy("src", "dst2", Some("0000deadbeef"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("md5 mismatch"));
        assert!(!store.exists("dst2").await.unwrap());
    }

    #[tokio::test]
    async fn memory_link_resolves_and_replaces() {
        let store = Store::memory();
        store.put_text("real", "content").await.unwrap();
        store.put_text("alias", "stale").await.unwrap();

        store.link("real", "alias").await.unwrap();
        assert_eq!(store.get_text("alias").await.unwrap(), "content");
        assert_eq!(
            store.link_target("alias").await.unwrap(),
            Some("real".to_string())
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = Store::memory();
        store.put_text("x", "1").await.unwrap();
        store.remove("x").await.unwrap();
        store.remove("x").await.unwrap();
        assert!(!store.exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn file_backend_roundtrip() {
        let dir = std::env::temp_dir().join(format!("pyramerge-test-{}", uuid::Uuid::now_v7()));
        let root = format!("file://{}", dir.display());
        let store = Store::file();

        let path = format!("{root}/tray/a.txt");
        store.put_text(&path, "on disk").await.unwrap();
        assert_eq!(store.get_text(&path).await.unwrap(), "on disk");

        let link = format!("{root}/tray/b.txt");
        store.link(&path, &link).await.unwrap();
        assert_eq!(store.get_text(&link).await.unwrap(), "on disk");
        assert!(store.link_target(&link).await.unwrap().is_some());

        store.remove(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
