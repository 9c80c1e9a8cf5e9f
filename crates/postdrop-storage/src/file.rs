//! File storage abstraction for extracted attachments

use crate::models::AttachmentRef;
use async_trait::async_trait;
use postdrop_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store a file and return its path
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Read a file
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if a file exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file size
    async fn size(&self, path: &str) -> Result<u64>;
}

/// Local filesystem storage
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance rooted at the given path
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Root directory of this store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get full path for a relative path, with path traversal protection
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let mut file = fs::File::create(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;

        file.write_all(data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;

        debug!(path = %path, size = data.len(), "Stored file");

        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;

        let mut file = fs::File::open(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to open file: {}", e)))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read file: {}", e)))?;

        Ok(data)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;

        fs::remove_file(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete file: {}", e)))?;

        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(full_path.exists())
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let full_path = self.full_path(path)?;

        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to get file metadata: {}", e)))?;

        Ok(metadata.len())
    }
}

/// Attachment file store
///
/// Writes decoded attachment bytes under a fixed root, named
/// `<unix-timestamp>-<original-filename>`. Concurrent writes sharing the same
/// second and filename overwrite each other; last writer wins.
pub struct AttachmentStore {
    storage: LocalStorage,
}

impl AttachmentStore {
    /// Create a new attachment store rooted at the given directory
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            storage: LocalStorage::from_path(root)?,
        })
    }

    /// Write one attachment and return its reference
    pub async fn store(
        &self,
        timestamp: i64,
        filename: &str,
        data: &[u8],
    ) -> Result<AttachmentRef> {
        let name = format!("{}-{}", timestamp, filename);
        self.storage.store(&name, data).await?;

        Ok(AttachmentRef {
            filename: filename.to_string(),
            path: self.storage.base_path().join(&name).display().to_string(),
            size: data.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::from_path(temp_dir.path()).unwrap();

        let data = b"Hello, World!";
        let path = storage.store("message.txt", data).await.unwrap();
        assert_eq!(path, "message.txt");

        assert!(storage.exists("message.txt").await.unwrap());
        assert!(!storage.exists("nonexistent.txt").await.unwrap());

        let read_data = storage.read("message.txt").await.unwrap();
        assert_eq!(read_data, data);

        let size = storage.size("message.txt").await.unwrap();
        assert_eq!(size, data.len() as u64);

        storage.delete("message.txt").await.unwrap();
        assert!(!storage.exists("message.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_traversal_prevention() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::from_path(temp_dir.path()).unwrap();

        assert!(storage.store("../../../etc/passwd", b"evil").await.is_err());
        assert!(storage.read("../../../etc/passwd").await.is_err());
        assert!(storage.delete("../../sensitive").await.is_err());
        assert!(storage.exists("../outside").await.is_err());

        assert!(storage.store("/etc/passwd", b"evil").await.is_err());
    }

    #[tokio::test]
    async fn test_attachment_naming() {
        let temp_dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(temp_dir.path()).unwrap();

        let data = b"%PDF-1.4 fake report";
        let attachment = store.store(1700000000, "report.pdf", data).await.unwrap();

        assert_eq!(attachment.filename, "report.pdf");
        assert_eq!(
            attachment.path,
            temp_dir
                .path()
                .join("1700000000-report.pdf")
                .display()
                .to_string()
        );
        assert_eq!(attachment.size, data.len() as i64);

        let on_disk = std::fs::read(temp_dir.path().join("1700000000-report.pdf")).unwrap();
        assert_eq!(on_disk, data);
    }

    #[tokio::test]
    async fn test_attachment_collision_last_writer_wins() {
        let temp_dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(temp_dir.path()).unwrap();

        store.store(1700000000, "a.txt", b"first").await.unwrap();
        let second = store.store(1700000000, "a.txt", b"second").await.unwrap();

        assert_eq!(second.size, 6);
        let on_disk = std::fs::read(temp_dir.path().join("1700000000-a.txt")).unwrap();
        assert_eq!(on_disk, b"second");
    }

    #[tokio::test]
    async fn test_attachment_rejects_traversal_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(temp_dir.path()).unwrap();

        assert!(store.store(1700000000, "../evil.sh", b"x").await.is_err());
    }
}
