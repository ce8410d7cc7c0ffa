//! Uploaded asset storage (covers, avatars).

use crate::error::{AppError, Result};
use std::path::PathBuf;

/// File store rooted at the configured uploads directory.
///
/// Keys are flat file names; the public path served back to clients is
/// `/uploads/<key>`.
#[derive(Clone)]
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    /// Create a store, ensuring the directory exists.
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Write an asset and return its public path.
    pub fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        if !is_safe_key(key) {
            return Err(AppError::BadRequest("Invalid file name".to_string()));
        }

        std::fs::write(self.dir.join(key), bytes)?;
        Ok(format!("/uploads/{}", key))
    }

    /// Resolve a key to its on-disk path, rejecting traversal.
    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        if !is_safe_key(key) {
            return Err(AppError::BadRequest("Invalid file name".to_string()));
        }
        Ok(self.dir.join(key))
    }

    /// Delete every asset whose name starts with the prefix, returning how
    /// many were removed. Used when a book or user goes away.
    pub fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if name.starts_with(prefix) && entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// Flat names only: no separators, no dot-files.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_resolve() {
        let tmp = TempDir::new().unwrap();
        let store = AssetStore::new(tmp.path().join("uploads")).unwrap();

        let public = store.save("cover-abc.jpg", b"jpeg-bytes").unwrap();
        assert_eq!(public, "/uploads/cover-abc.jpg");

        let path = store.resolve("cover-abc.jpg").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg-bytes");
    }

    #[test]
    fn rejects_traversal_keys() {
        let tmp = TempDir::new().unwrap();
        let store = AssetStore::new(tmp.path().to_path_buf()).unwrap();

        assert!(store.save("../escape.jpg", b"x").is_err());
        assert!(store.resolve("a/b.jpg").is_err());
        assert!(store.resolve(".hidden").is_err());
    }

    #[test]
    fn delete_prefix_removes_matching_files() {
        let tmp = TempDir::new().unwrap();
        let store = AssetStore::new(tmp.path().to_path_buf()).unwrap();

        store.save("book-1-cover.jpg", b"a").unwrap();
        store.save("book-1-cover.png", b"b").unwrap();
        store.save("book-2-cover.jpg", b"c").unwrap();

        assert_eq!(store.delete_prefix("book-1-").unwrap(), 2);
        assert!(store.resolve("book-2-cover.jpg").unwrap().exists());
    }
}
