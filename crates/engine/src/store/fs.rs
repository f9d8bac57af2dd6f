//! Filesystem-backed object store.
//!
//! Keys map to files below a root directory (`a/b/c.json` → `<root>/a/b/c.json`).
//! Writes go to a hidden temp file first and are renamed into place, so a
//! reader never observes a half-written object.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use super::object_store::{ObjectStore, StoreError};

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.ends_with('/') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect(&path, out)?;
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{file_name}.{}{TEMP_SUFFIX}", Uuid::now_v7()));

        fs::write(&temp, body)?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        self.collect(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("jobs/1/results.json", b"{\"a\":1}").unwrap();
        assert_eq!(
            store.get("jobs/1/results.json").unwrap().unwrap(),
            b"{\"a\":1}"
        );
        assert!(store.get("jobs/1/missing.json").unwrap().is_none());
    }

    #[test]
    fn list_returns_sorted_keys_without_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("frames/frame.0000001.jpg", b"b").unwrap();
        store.put("frames/frame.0000000.jpg", b"a").unwrap();
        store.put("other/x.json", b"{}").unwrap();
        fs::write(dir.path().join("frames/.frame.0000002.jpg.abc.tmp"), b"").unwrap();

        assert_eq!(
            store.list("frames/").unwrap(),
            vec!["frames/frame.0000000.jpg", "frames/frame.0000001.jpg"]
        );
    }

    #[test]
    fn listing_a_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("not-created"));
        assert!(store.list("").unwrap().is_empty());
    }

    #[test]
    fn escaping_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        assert!(matches!(store.put("../escape.json", b""), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.get("/etc/passwd"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.put("dir/", b""), Err(StoreError::InvalidKey(_))));
    }
}
