use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    FileReader, StorageBackend, StorageError, StorageOperator, StorageResult, StorageType,
};
use crate::storage::backends::{
    AzureBlobStorage, FtpStorage, GoogleDriveStorage, LocalStorage, MultiStorage, NasStorage,
    ReplicationSettings, S3Storage,
};

/// Lookup of persisted storages by id
#[async_trait]
pub trait StorageLookup: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StorageResult<Storage>;
}

/// Backend-specific configuration of a storage, exactly one per record
#[derive(Debug, Clone)]
pub enum StorageVariant {
    Local(LocalStorage),
    S3(S3Storage),
    GoogleDrive(GoogleDriveStorage),
    Nas(NasStorage),
    AzureBlob(AzureBlobStorage),
    Ftp(FtpStorage),
    Multi(MultiStorage),
}

impl StorageVariant {
    pub fn storage_type(&self) -> StorageType {
        self.backend().backend_type()
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        match self {
            StorageVariant::Local(s) => s,
            StorageVariant::S3(s) => s,
            StorageVariant::GoogleDrive(s) => s,
            StorageVariant::Nas(s) => s,
            StorageVariant::AzureBlob(s) => s,
            StorageVariant::Ftp(s) => s,
            StorageVariant::Multi(s) => s,
        }
    }

    pub fn backend_mut(&mut self) -> &mut dyn StorageBackend {
        match self {
            StorageVariant::Local(s) => s,
            StorageVariant::S3(s) => s,
            StorageVariant::GoogleDrive(s) => s,
            StorageVariant::Nas(s) => s,
            StorageVariant::AzureBlob(s) => s,
            StorageVariant::Ftp(s) => s,
            StorageVariant::Multi(s) => s,
        }
    }

    /// Owning storage id carried by the payload row
    pub fn storage_id(&self) -> Uuid {
        match self {
            StorageVariant::Local(s) => s.storage_id,
            StorageVariant::S3(s) => s.storage_id,
            StorageVariant::GoogleDrive(s) => s.storage_id,
            StorageVariant::Nas(s) => s.storage_id,
            StorageVariant::AzureBlob(s) => s.storage_id,
            StorageVariant::Ftp(s) => s.storage_id,
            StorageVariant::Multi(s) => s.storage_id,
        }
    }

    pub fn set_storage_id(&mut self, id: Uuid) {
        match self {
            StorageVariant::Local(s) => s.storage_id = id,
            StorageVariant::S3(s) => s.storage_id = id,
            StorageVariant::GoogleDrive(s) => s.storage_id = id,
            StorageVariant::Nas(s) => s.storage_id = id,
            StorageVariant::AzureBlob(s) => s.storage_id = id,
            StorageVariant::Ftp(s) => s.storage_id = id,
            StorageVariant::Multi(s) => s.storage_id = id,
        }
    }

    /// Merge `incoming` into this payload; a different kind replaces it
    pub fn update(&mut self, incoming: &StorageVariant) {
        match (self, incoming) {
            (StorageVariant::Local(current), StorageVariant::Local(new)) => current.update(new),
            (StorageVariant::S3(current), StorageVariant::S3(new)) => current.update(new),
            (StorageVariant::GoogleDrive(current), StorageVariant::GoogleDrive(new)) => current.update(new),
            (StorageVariant::Nas(current), StorageVariant::Nas(new)) => current.update(new),
            (StorageVariant::AzureBlob(current), StorageVariant::AzureBlob(new)) => current.update(new),
            (StorageVariant::Ftp(current), StorageVariant::Ftp(new)) => current.update(new),
            (StorageVariant::Multi(current), StorageVariant::Multi(new)) => current.update(new),
            (current, new) => {
                let storage_id = current.storage_id();
                *current = new.clone();
                current.set_storage_id(storage_id);
            }
        }
    }
}

#[async_trait]
impl StorageOperator for StorageVariant {
    async fn save_file(
        &self,
        cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        file: FileReader,
    ) -> StorageResult<()> {
        self.backend().save_file(cancel, encryptor, file_id, file).await
    }

    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        self.backend().get_file(encryptor, file_id).await
    }

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        self.backend().delete_file(encryptor, file_id).await
    }

    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        self.backend().test_connection(encryptor).await
    }
}

/// A configured backup destination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StorageRecord", into = "StorageRecord")]
pub struct Storage {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    /// Message of the last failed save or connection test, cleared on success
    pub last_save_error: Option<String>,
    pub variant: StorageVariant,
}

impl Storage {
    pub fn new(workspace_id: Uuid, name: impl Into<String>, variant: StorageVariant) -> Self {
        Self {
            id: Uuid::nil(),
            workspace_id,
            name: name.into(),
            last_save_error: None,
            variant,
        }
    }

    pub fn storage_type(&self) -> StorageType {
        self.variant.storage_type()
    }

    /// Set the storage id and the payload's reference to it
    pub fn assign_id(&mut self, id: Uuid) {
        self.id = id;
        self.variant.set_storage_id(id);
    }

    /// Save through the variant, recording the outcome on `last_save_error`
    pub async fn save_file(
        &mut self,
        cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        file: FileReader,
    ) -> StorageResult<()> {
        let result = self.variant.save_file(cancel, encryptor, file_id, file).await;
        self.record_outcome(&result);
        result
    }

    pub async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        self.variant.get_file(encryptor, file_id).await
    }

    pub async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        self.variant.delete_file(encryptor, file_id).await
    }

    pub async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        self.variant.test_connection(encryptor).await
    }

    pub fn validate(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        if self.name.trim().is_empty() {
            return Err(StorageError::validation("storage name is required"));
        }
        self.variant.backend().validate(encryptor)
    }

    pub fn hide_sensitive_data(&mut self) {
        self.variant.backend_mut().hide_sensitive_data();
    }

    pub fn encrypt_sensitive_data(&mut self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        self.variant.backend_mut().encrypt_sensitive_data(encryptor)
    }

    /// Merge user-editable fields; identity and workspace are kept
    pub fn update(&mut self, incoming: &Storage) {
        self.name = incoming.name.clone();
        self.variant.update(&incoming.variant);
    }

    /// Wire in the legs of a multi-storage; other kinds need nothing
    pub async fn resolve(&mut self, lookup: &dyn StorageLookup, settings: &ReplicationSettings) -> StorageResult<()> {
        match &mut self.variant {
            StorageVariant::Multi(multi) => multi.resolve(lookup, settings).await,
            _ => Ok(()),
        }
    }

    pub fn record_outcome<T>(&mut self, result: &StorageResult<T>) {
        self.last_save_error = result.as_ref().err().map(|e| e.to_string());
    }
}

/// Wire and row representation: a type tag plus one optional slot per kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub workspace_id: Uuid,
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    pub name: String,
    #[serde(default)]
    pub last_save_error: Option<String>,
    #[serde(default)]
    pub local_storage: Option<LocalStorage>,
    #[serde(default)]
    pub s3_storage: Option<S3Storage>,
    #[serde(default)]
    pub google_drive_storage: Option<GoogleDriveStorage>,
    #[serde(default)]
    pub nas_storage: Option<NasStorage>,
    #[serde(default)]
    pub azure_blob_storage: Option<AzureBlobStorage>,
    #[serde(default)]
    pub ftp_storage: Option<FtpStorage>,
    #[serde(default)]
    pub multi_storage: Option<MultiStorage>,
}

impl StorageRecord {
    fn populated_slots(&self) -> usize {
        [
            self.local_storage.is_some(),
            self.s3_storage.is_some(),
            self.google_drive_storage.is_some(),
            self.nas_storage.is_some(),
            self.azure_blob_storage.is_some(),
            self.ftp_storage.is_some(),
            self.multi_storage.is_some(),
        ]
        .into_iter()
        .filter(|populated| *populated)
        .count()
    }
}

impl TryFrom<StorageRecord> for Storage {
    type Error = StorageError;

    fn try_from(record: StorageRecord) -> Result<Self, Self::Error> {
        let mismatch = |detail: &str| StorageError::UnsupportedType {
            storage_type: format!("{} ({})", record.storage_type, detail),
        };

        match record.populated_slots() {
            0 => return Err(mismatch("no configuration")),
            1 => {}
            _ => return Err(mismatch("more than one configuration")),
        }

        let variant = match record.storage_type {
            StorageType::Local => record.local_storage.clone().map(StorageVariant::Local),
            StorageType::S3 => record.s3_storage.clone().map(StorageVariant::S3),
            StorageType::GoogleDrive => record.google_drive_storage.clone().map(StorageVariant::GoogleDrive),
            StorageType::Nas => record.nas_storage.clone().map(StorageVariant::Nas),
            StorageType::AzureBlob => record.azure_blob_storage.clone().map(StorageVariant::AzureBlob),
            StorageType::Ftp => record.ftp_storage.clone().map(StorageVariant::Ftp),
            StorageType::Multi => record.multi_storage.clone().map(StorageVariant::Multi),
        }
        .ok_or_else(|| mismatch("configuration of another type"))?;

        let mut storage = Storage {
            id: record.id,
            workspace_id: record.workspace_id,
            name: record.name,
            last_save_error: record.last_save_error,
            variant,
        };
        if !storage.id.is_nil() {
            storage.variant.set_storage_id(storage.id);
        }
        Ok(storage)
    }
}

impl From<Storage> for StorageRecord {
    fn from(storage: Storage) -> Self {
        let mut record = StorageRecord {
            id: storage.id,
            workspace_id: storage.workspace_id,
            storage_type: storage.variant.storage_type(),
            name: storage.name,
            last_save_error: storage.last_save_error,
            ..Default::default()
        };

        match storage.variant {
            StorageVariant::Local(s) => record.local_storage = Some(s),
            StorageVariant::S3(s) => record.s3_storage = Some(s),
            StorageVariant::GoogleDrive(s) => record.google_drive_storage = Some(s),
            StorageVariant::Nas(s) => record.nas_storage = Some(s),
            StorageVariant::AzureBlob(s) => record.azure_blob_storage = Some(s),
            StorageVariant::Ftp(s) => record.ftp_storage = Some(s),
            StorageVariant::Multi(s) => record.multi_storage = Some(s),
        }
        record
    }
}
