#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use backup_storages::encryption::{AesGcmFieldEncryptor, FieldEncryptor};
use backup_storages::storage::{
    FileReader, LegWriteMode, LocalStorage, ReplicationSettings, Storage, StorageError, StorageOperator,
    StorageRepository, StorageResult, StorageService, StorageVariant,
};

/// Test utilities shared by the integration suites
pub struct StorageTestUtils;

impl StorageTestUtils {
    pub fn encryptor() -> Arc<AesGcmFieldEncryptor> {
        Arc::new(AesGcmFieldEncryptor::generate().expect("Failed to generate key"))
    }

    pub fn replication(staging: &TempDir, write_mode: LegWriteMode) -> ReplicationSettings {
        ReplicationSettings::new(staging.path().join("staging")).with_write_mode(write_mode)
    }

    pub fn reader(data: &[u8]) -> FileReader {
        Box::new(std::io::Cursor::new(data.to_vec()))
    }

    pub async fn read_all(mut reader: FileReader) -> Vec<u8> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.expect("Failed to read content");
        content
    }

    pub fn local(workspace_id: Uuid, name: &str, dir: &std::path::Path) -> Storage {
        Storage::new(
            workspace_id,
            name,
            StorageVariant::Local(LocalStorage::new(dir.to_string_lossy())),
        )
    }

    pub async fn repository(dir: &TempDir) -> StorageRepository {
        let url = format!("sqlite://{}", dir.path().join("storages.db").display());
        StorageRepository::connect(&url)
            .await
            .expect("Failed to open repository")
    }

    pub async fn service(dir: &TempDir) -> StorageService {
        let repository = Self::repository(dir).await;
        let encryptor: Arc<dyn FieldEncryptor> = Self::encryptor();
        StorageService::new(
            repository,
            encryptor,
            Self::replication(dir, LegWriteMode::Sequential),
        )
    }
}

/// In-memory operator whose individual operations can be made to fail
#[derive(Default)]
pub struct FakeOperator {
    files: Mutex<HashMap<Uuid, Vec<u8>>>,
    pub fail_save: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_test: AtomicBool,
    pub save_attempted: AtomicBool,
}

impl FakeOperator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    pub fn contains(&self, file_id: Uuid) -> bool {
        self.files.lock().unwrap().contains_key(&file_id)
    }

    pub fn content(&self, file_id: Uuid) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(&file_id).cloned()
    }

    pub fn put(&self, file_id: Uuid, data: &[u8]) {
        self.files.lock().unwrap().insert(file_id, data.to_vec());
    }

    fn injected(operation: &str) -> StorageError {
        StorageError::backend(format!("injected {} failure", operation))
    }
}

#[async_trait]
impl StorageOperator for FakeOperator {
    async fn save_file(
        &self,
        _cancel: &CancellationToken,
        _encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        mut file: FileReader,
    ) -> StorageResult<()> {
        self.save_attempted.store(true, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(Self::injected("save"));
        }

        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;
        self.put(file_id, &data);
        Ok(())
    }

    async fn get_file(&self, _encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        let data = self
            .content(file_id)
            .ok_or_else(|| StorageError::not_found(format!("file {} not found", file_id)))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn delete_file(&self, _encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.files.lock().unwrap().remove(&file_id);
        Ok(())
    }

    async fn test_connection(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        if self.fail_test.load(Ordering::SeqCst) {
            return Err(Self::injected("connection"));
        }
        Ok(())
    }
}
