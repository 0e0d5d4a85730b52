use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::StorageSettings;
use crate::encryption::{AesGcmFieldEncryptor, FieldEncryptor};
use crate::log_storage_operation;
use crate::storage::backend::{FileReader, Leg, StorageError, StorageResult, StorageType};
use crate::storage::backends::ReplicationSettings;
use crate::storage::model::{Storage, StorageVariant};
use crate::storage::repository::StorageRepository;

/// Storage lifecycle and file operations on persisted storages
pub struct StorageService {
    repository: StorageRepository,
    encryptor: Arc<dyn FieldEncryptor>,
    replication: ReplicationSettings,
}

impl StorageService {
    pub fn new(
        repository: StorageRepository,
        encryptor: Arc<dyn FieldEncryptor>,
        replication: ReplicationSettings,
    ) -> Self {
        Self {
            repository,
            encryptor,
            replication,
        }
    }

    /// Open the catalogue and key file named by `settings`
    pub async fn from_settings(settings: &StorageSettings) -> StorageResult<Self> {
        let repository = StorageRepository::connect(&settings.database_url).await?;
        let encryptor = AesGcmFieldEncryptor::load_or_create(&settings.secret_key_path).await?;
        Ok(Self::new(repository, Arc::new(encryptor), settings.replication()))
    }

    pub fn repository(&self) -> &StorageRepository {
        &self.repository
    }

    pub fn encryptor(&self) -> &dyn FieldEncryptor {
        self.encryptor.as_ref()
    }

    /// Create or update a storage in `workspace_id`
    pub async fn save_storage(&self, workspace_id: Uuid, storage: Storage) -> StorageResult<Storage> {
        let is_update = !storage.id.is_nil();

        let mut target = if is_update {
            let mut existing = self.repository.find_by_id(storage.id).await?;
            if existing.workspace_id != workspace_id {
                return Err(StorageError::validation("storage does not belong to this workspace"));
            }
            existing.update(&storage);
            existing
        } else {
            let mut storage = storage;
            storage.workspace_id = workspace_id;
            storage
        };

        // secrets are encrypted before validation sees them
        target.encrypt_sensitive_data(self.encryptor())?;
        target.validate(self.encryptor())?;
        self.validate_multi_storage_references(&target).await?;

        let mut saved = self.repository.save(target).await?;

        let operation = if is_update { "storage_updated" } else { "storage_created" };
        log_storage_operation!(
            info,
            operation,
            saved.storage_type(),
            storage_id = saved.id,
            workspace_id = workspace_id,
            name = saved.name
        );

        saved.hide_sensitive_data();
        Ok(saved)
    }

    /// Load a storage for display, secrets blanked
    pub async fn get_storage(&self, id: Uuid) -> StorageResult<Storage> {
        let mut storage = self.repository.find_by_id(id).await?;
        storage.hide_sensitive_data();
        Ok(storage)
    }

    pub async fn get_storages(&self, workspace_id: Uuid) -> StorageResult<Vec<Storage>> {
        let mut storages = self.repository.find_by_workspace_id(workspace_id).await?;
        for storage in &mut storages {
            storage.hide_sensitive_data();
        }
        Ok(storages)
    }

    /// Load a storage ready for I/O; secrets stay encrypted, not blanked
    pub async fn get_storage_by_id(&self, id: Uuid) -> StorageResult<Storage> {
        let mut storage = self.repository.find_by_id(id).await?;
        storage.resolve(&self.repository, &self.replication).await?;
        Ok(storage)
    }

    pub async fn delete_storage(&self, id: Uuid) -> StorageResult<()> {
        let storage = self.repository.find_by_id(id).await?;
        self.repository.delete(&storage).await?;

        log_storage_operation!(
            info,
            "storage_deleted",
            storage.storage_type(),
            storage_id = storage.id,
            workspace_id = storage.workspace_id,
            name = storage.name
        );
        Ok(())
    }

    /// Live check of a saved storage; the outcome is stored on `last_save_error`
    pub async fn test_storage_connection(&self, id: Uuid) -> StorageResult<()> {
        let mut storage = self.get_storage_by_id(id).await?;

        let result = storage.test_connection(self.encryptor()).await;
        storage.record_outcome(&result);
        self.repository.save(storage).await?;

        if let Err(e) = &result {
            tracing::warn!(storage_id = %id, error = %e, "Storage connection test failed");
        }
        result
    }

    /// Live check of an unsaved configuration, or of a saved one with pending edits
    pub async fn test_storage_connection_direct(&self, storage: Storage) -> StorageResult<()> {
        let mut target = if storage.id.is_nil() {
            storage
        } else {
            let mut existing = self.repository.find_by_id(storage.id).await?;
            if existing.workspace_id != storage.workspace_id {
                return Err(StorageError::validation("storage does not belong to this workspace"));
            }
            existing.update(&storage);
            existing.validate(self.encryptor())?;
            existing
        };

        target.resolve(&self.repository, &self.replication).await?;
        target.test_connection(self.encryptor()).await
    }

    pub async fn save_file(
        &self,
        cancel: &CancellationToken,
        storage_id: Uuid,
        file_id: Uuid,
        file: FileReader,
    ) -> StorageResult<()> {
        let mut storage = self.get_storage_by_id(storage_id).await?;
        let storage_type = storage.storage_type();

        let result = storage.save_file(cancel, self.encryptor(), file_id, file).await;

        match &result {
            Ok(()) => {
                log_storage_operation!(debug, "file_saved", storage_type, storage_id = storage_id, file_id = file_id);
            }
            Err(e) => {
                log_storage_operation!(
                    warn,
                    "file_save_failed",
                    storage_type,
                    storage_id = storage_id,
                    file_id = file_id,
                    error = e
                );
            }
        }

        if let Err(persist_err) = self.repository.save(storage).await {
            tracing::error!(storage_id = %storage_id, error = %persist_err, "Failed to record save outcome");
            result?;
            return Err(persist_err);
        }
        result
    }

    pub async fn get_file(&self, storage_id: Uuid, file_id: Uuid) -> StorageResult<FileReader> {
        let storage = self.get_storage_by_id(storage_id).await?;
        storage.get_file(self.encryptor(), file_id).await
    }

    pub async fn delete_file(&self, storage_id: Uuid, file_id: Uuid) -> StorageResult<()> {
        let storage = self.get_storage_by_id(storage_id).await?;
        storage.delete_file(self.encryptor(), file_id).await?;

        log_storage_operation!(debug, "file_deleted", storage.storage_type(), storage_id = storage_id, file_id = file_id);
        Ok(())
    }

    /// Multi-storage legs must exist, be single storages and share the workspace
    pub async fn validate_multi_storage_references(&self, storage: &Storage) -> StorageResult<()> {
        let StorageVariant::Multi(multi) = &storage.variant else {
            return Ok(());
        };

        if multi.primary_id == multi.secondary_id {
            return Err(StorageError::validation("primary and secondary storage must be different"));
        }

        for (leg, id) in [(Leg::Primary, multi.primary_id), (Leg::Secondary, multi.secondary_id)] {
            if id == storage.id {
                return Err(StorageError::validation(format!("{} storage cannot be the multi-storage itself", leg)));
            }

            let referenced = self.repository.find_by_id(id).await.map_err(|e| match e {
                StorageError::NotFound { .. } => StorageError::not_found(format!("{} storage {} not found", leg, id)),
                other => other,
            })?;

            if referenced.storage_type() == StorageType::Multi {
                return Err(StorageError::validation(format!("{} storage cannot be a multi-storage", leg)));
            }
            if referenced.workspace_id != storage.workspace_id {
                return Err(StorageError::validation(format!(
                    "{} storage must belong to the same workspace",
                    leg
                )));
            }
        }

        Ok(())
    }

    /// Remove every storage of a workspace that is about to be deleted
    pub async fn on_before_workspace_deletion(&self, workspace_id: Uuid) -> StorageResult<()> {
        let storages = self.repository.find_by_workspace_id(workspace_id).await?;

        for storage in &storages {
            self.repository.delete(storage).await.map_err(|e| StorageError::Persistence {
                message: format!("failed to delete storage {}: {}", storage.id, e),
            })?;
        }

        tracing::info!(workspace_id = %workspace_id, count = storages.len(), "Deleted workspace storages");
        Ok(())
    }
}
