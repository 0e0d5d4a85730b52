use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    require, FileReader, StorageBackend, StorageError, StorageOperator, StorageResult, StorageType,
};

/// Local filesystem storage rooted at `path`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorage {
    #[serde(default)]
    pub storage_id: Uuid,
    pub path: String,
}

impl LocalStorage {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            storage_id: Uuid::nil(),
            path: path.into(),
        }
    }

    pub fn update(&mut self, incoming: &LocalStorage) {
        self.path = incoming.path.clone();
    }

    fn base_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    fn file_path(&self, file_id: Uuid) -> PathBuf {
        self.base_path().join(file_id.to_string())
    }
}

#[async_trait]
impl StorageOperator for LocalStorage {
    async fn save_file(
        &self,
        _cancel: &CancellationToken,
        _encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        mut file: FileReader,
    ) -> StorageResult<()> {
        let base_path = self.base_path();
        fs::create_dir_all(&base_path).await?;
        let file_path = self.file_path(file_id);

        // Unique sibling temp file per write, renamed over the target once complete.
        // Dropping it on any error removes it.
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}_", file_id))
            .suffix(".tmp")
            .tempfile_in(&base_path)?;
        let mut out = fs::File::from_std(temp.reopen()?);
        let written = tokio::io::copy(&mut file, &mut out).await?;
        out.flush().await?;
        drop(out);

        temp.persist(&file_path).map_err(|e| e.error)?;

        tracing::debug!(path = %file_path.display(), bytes = written, "Saved file to local storage");
        Ok(())
    }

    async fn get_file(&self, _encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        let file_path = self.file_path(file_id);

        match fs::File::open(&file_path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(format!(
                "file {} not found in {}",
                file_id,
                self.path
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_file(&self, _encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        let file_path = self.file_path(file_id);

        match fs::remove_file(&file_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn test_connection(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        let base_path = self.base_path();
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| StorageError::connection(format!("cannot create {}: {}", self.path, e)))?;

        // Test by creating and deleting a test file
        let test_path = base_path.join(format!(".test_write_{}", Uuid::new_v4()));
        fs::write(&test_path, b"test")
            .await
            .map_err(|e| StorageError::connection(format!("{} is not writable: {}", self.path, e)))?;
        fs::remove_file(&test_path).await?;

        Ok(())
    }
}

impl StorageBackend for LocalStorage {
    fn backend_type(&self) -> StorageType {
        StorageType::Local
    }

    fn validate(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        require(&self.path, "local storage path is required")
    }

    fn hide_sensitive_data(&mut self) {}

    fn encrypt_sensitive_data(&mut self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::AesGcmFieldEncryptor;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_save_get_delete() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_string_lossy());
        let encryptor = AesGcmFieldEncryptor::generate().unwrap();
        let file_id = Uuid::new_v4();

        storage
            .save_file(&CancellationToken::new(), &encryptor, file_id, Box::new(&b"backup bytes"[..]))
            .await
            .unwrap();
        assert!(dir.path().join(file_id.to_string()).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let mut content = Vec::new();
        storage
            .get_file(&encryptor, file_id)
            .await
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        assert_eq!(content, b"backup bytes");

        storage.delete_file(&encryptor, file_id).await.unwrap();
        let missing = storage.get_file(&encryptor, file_id).await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));

        // deleting again is not an error
        storage.delete_file(&encryptor, file_id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_of_same_file_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_string_lossy());
        let encryptor = std::sync::Arc::new(AesGcmFieldEncryptor::generate().unwrap());
        let file_id = Uuid::new_v4();

        let first = vec![b'a'; 256 * 1024];
        let second = vec![b'b'; 256 * 1024];

        let handles: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|content| {
                let storage = storage.clone();
                let encryptor = encryptor.clone();
                tokio::spawn(async move {
                    storage
                        .save_file(
                            &CancellationToken::new(),
                            encryptor.as_ref(),
                            file_id,
                            Box::new(std::io::Cursor::new(content)),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut content = Vec::new();
        storage
            .get_file(encryptor.as_ref(), file_id)
            .await
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        assert!(content == first || content == second);

        // only the final file remains
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(file_id.to_string())]);
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_string_lossy());
        let encryptor = AesGcmFieldEncryptor::generate().unwrap();
        let file_id = Uuid::new_v4();

        let failing = failing_reader();
        let result = storage
            .save_file(&CancellationToken::new(), &encryptor, file_id, failing)
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn failing_reader() -> FileReader {
        struct Failing;
        impl tokio::io::AsyncRead for Failing {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("source closed")))
            }
        }
        Box::new(Failing)
    }

    #[tokio::test]
    async fn test_connection_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("backups");
        let storage = LocalStorage::new(root.to_string_lossy());
        let encryptor = AesGcmFieldEncryptor::generate().unwrap();

        storage.test_connection(&encryptor).await.unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_validate_requires_path() {
        let encryptor = AesGcmFieldEncryptor::generate().unwrap();
        assert!(LocalStorage::new("").validate(&encryptor).is_err());
        assert!(LocalStorage::new("/var/backups").validate(&encryptor).is_ok());
    }
}
