//! Replicating storage composed of two other storages.
//!
//! Writes are spooled to a staging file and written to the primary, then the
//! secondary. Reads fail over from primary to secondary. Deletes are best effort
//! and succeed when either leg succeeds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    FileReader, Leg, StorageBackend, StorageError, StorageOperator, StorageResult, StorageType,
};
use crate::storage::model::StorageLookup;

/// How a replicated write reaches its two legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegWriteMode {
    /// Primary first; the secondary is only written after the primary succeeded
    #[default]
    Sequential,
    /// Both legs at once from separate staged handles
    Concurrent,
}

impl std::str::FromStr for LegWriteMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(LegWriteMode::Sequential),
            "concurrent" | "parallel" => Ok(LegWriteMode::Concurrent),
            other => Err(StorageError::validation(format!("unknown leg write mode: {}", other))),
        }
    }
}

/// Runtime configuration injected into every resolved multi-storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSettings {
    pub staging_dir: PathBuf,
    pub write_mode: LegWriteMode,
}

impl ReplicationSettings {
    /// Settings staging under `staging_dir` with the default write mode
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            write_mode: LegWriteMode::default(),
        }
    }

    pub fn with_write_mode(mut self, write_mode: LegWriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }
}

/// Resolved operator handles, never persisted
#[derive(Clone)]
struct ReplicationLegs {
    primary: Arc<dyn StorageOperator>,
    secondary: Arc<dyn StorageOperator>,
    settings: ReplicationSettings,
}

/// Storage that replicates to a primary and a secondary storage
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiStorage {
    #[serde(default)]
    pub storage_id: Uuid,
    pub primary_id: Uuid,
    pub secondary_id: Uuid,
    #[serde(skip)]
    legs: Option<ReplicationLegs>,
}

impl fmt::Debug for MultiStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiStorage")
            .field("storage_id", &self.storage_id)
            .field("primary_id", &self.primary_id)
            .field("secondary_id", &self.secondary_id)
            .field("resolved", &self.legs.is_some())
            .finish()
    }
}

impl MultiStorage {
    pub fn new(primary_id: Uuid, secondary_id: Uuid) -> Self {
        Self {
            storage_id: Uuid::nil(),
            primary_id,
            secondary_id,
            legs: None,
        }
    }

    pub fn update(&mut self, incoming: &MultiStorage) {
        self.primary_id = incoming.primary_id;
        self.secondary_id = incoming.secondary_id;
        // references changed, previously resolved legs are stale
        self.legs = None;
    }

    pub fn is_resolved(&self) -> bool {
        self.legs.is_some()
    }

    /// Attach already-built leg operators
    pub fn set_storages(
        &mut self,
        primary: Arc<dyn StorageOperator>,
        secondary: Arc<dyn StorageOperator>,
        settings: ReplicationSettings,
    ) {
        self.legs = Some(ReplicationLegs {
            primary,
            secondary,
            settings,
        });
    }

    /// Load both referenced storages and wire them in as legs
    pub async fn resolve(&mut self, lookup: &dyn StorageLookup, settings: &ReplicationSettings) -> StorageResult<()> {
        let primary = lookup.find_by_id(self.primary_id).await.map_err(|e| StorageError::LegFailed {
            leg: Leg::Primary,
            operation: "resolve",
            source: Box::new(e),
        })?;
        let secondary = lookup.find_by_id(self.secondary_id).await.map_err(|e| StorageError::LegFailed {
            leg: Leg::Secondary,
            operation: "resolve",
            source: Box::new(e),
        })?;

        for (leg, storage) in [(Leg::Primary, &primary), (Leg::Secondary, &secondary)] {
            if storage.storage_type() == StorageType::Multi {
                return Err(StorageError::validation(format!(
                    "{} storage {} is itself a multi-storage",
                    leg, storage.id
                )));
            }
        }

        self.set_storages(
            Arc::new(primary.variant),
            Arc::new(secondary.variant),
            settings.clone(),
        );
        Ok(())
    }

    fn legs(&self) -> StorageResult<&ReplicationLegs> {
        self.legs.as_ref().ok_or(StorageError::NotInitialized)
    }

    fn leg_failed(leg: Leg, operation: &'static str, err: StorageError) -> StorageError {
        StorageError::LegFailed {
            leg,
            operation,
            source: Box::new(err),
        }
    }

    fn partial(leg: Leg, operation: &'static str, err: StorageError) -> StorageError {
        StorageError::PartialReplication {
            leg,
            operation,
            source: Box::new(err),
        }
    }
}

#[async_trait]
impl StorageOperator for MultiStorage {
    async fn save_file(
        &self,
        cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        mut file: FileReader,
    ) -> StorageResult<()> {
        let legs = self.legs()?;

        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        // Input is single pass, spool it so each leg gets its own reader
        tokio::fs::create_dir_all(&legs.settings.staging_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("multi_{}_", file_id))
            .tempfile_in(&legs.settings.staging_dir)?;

        let mut spool = File::from_std(staging.reopen()?);
        let staged_bytes = tokio::io::copy(&mut file, &mut spool).await?;
        spool.flush().await?;
        drop(spool);

        tracing::debug!(
            file_id = %file_id,
            bytes = staged_bytes,
            staging = %staging.path().display(),
            "Staged file for replication"
        );

        match legs.settings.write_mode {
            LegWriteMode::Sequential => {
                let primary_reader: FileReader = Box::new(File::from_std(staging.reopen()?));
                legs.primary
                    .save_file(cancel, encryptor, file_id, primary_reader)
                    .await
                    .map_err(|e| Self::leg_failed(Leg::Primary, "save file to", e))?;

                let secondary_reader: FileReader = Box::new(File::from_std(staging.reopen()?));
                legs.secondary
                    .save_file(cancel, encryptor, file_id, secondary_reader)
                    .await
                    .map_err(|e| Self::partial(Leg::Secondary, "save file to", e))?;
            }
            LegWriteMode::Concurrent => {
                let primary_reader: FileReader = Box::new(File::from_std(staging.reopen()?));
                let secondary_reader: FileReader = Box::new(File::from_std(staging.reopen()?));

                let (primary, secondary) = futures::join!(
                    legs.primary.save_file(cancel, encryptor, file_id, primary_reader),
                    legs.secondary.save_file(cancel, encryptor, file_id, secondary_reader),
                );

                primary.map_err(|e| Self::leg_failed(Leg::Primary, "save file to", e))?;
                secondary.map_err(|e| Self::partial(Leg::Secondary, "save file to", e))?;
            }
        }

        // staging file is removed when `staging` drops
        Ok(())
    }

    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        let legs = self.legs()?;

        let primary_err = match legs.primary.get_file(encryptor, file_id).await {
            Ok(reader) => return Ok(reader),
            Err(e) => e,
        };

        tracing::warn!(file_id = %file_id, error = %primary_err, "Primary read failed, falling back to secondary");

        match legs.secondary.get_file(encryptor, file_id).await {
            Ok(reader) => Ok(reader),
            Err(secondary_err) => Err(StorageError::AllLegsFailed {
                operation: "get file from",
                primary: Box::new(primary_err),
                secondary: Box::new(secondary_err),
            }),
        }
    }

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        let legs = self.legs()?;

        let primary = legs.primary.delete_file(encryptor, file_id).await;
        let secondary = legs.secondary.delete_file(encryptor, file_id).await;

        match (primary, secondary) {
            (Err(primary), Err(secondary)) => Err(StorageError::AllLegsFailed {
                operation: "delete file from",
                primary: Box::new(primary),
                secondary: Box::new(secondary),
            }),
            (Err(e), Ok(())) => {
                tracing::warn!(file_id = %file_id, leg = %Leg::Primary, error = %e, "Delete failed on one leg");
                Ok(())
            }
            (Ok(()), Err(e)) => {
                tracing::warn!(file_id = %file_id, leg = %Leg::Secondary, error = %e, "Delete failed on one leg");
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        let legs = self.legs()?;

        legs.primary
            .test_connection(encryptor)
            .await
            .map_err(|e| Self::leg_failed(Leg::Primary, "connect to", e))?;
        legs.secondary
            .test_connection(encryptor)
            .await
            .map_err(|e| Self::partial(Leg::Secondary, "connect to", e))?;

        Ok(())
    }
}

impl StorageBackend for MultiStorage {
    fn backend_type(&self) -> StorageType {
        StorageType::Multi
    }

    fn validate(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        if self.primary_id.is_nil() {
            return Err(StorageError::validation("primary storage is required"));
        }
        if self.secondary_id.is_nil() {
            return Err(StorageError::validation("secondary storage is required"));
        }
        if self.primary_id == self.secondary_id {
            return Err(StorageError::validation("primary and secondary storage must be different"));
        }
        Ok(())
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

    #[test]
    fn test_validate_references() {
        let encryptor = AesGcmFieldEncryptor::generate().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(MultiStorage::new(a, b).validate(&encryptor).is_ok());
        assert!(MultiStorage::new(Uuid::nil(), b).validate(&encryptor).is_err());
        assert!(MultiStorage::new(a, Uuid::nil()).validate(&encryptor).is_err());
        assert!(MultiStorage::new(a, a).validate(&encryptor).is_err());
    }

    #[tokio::test]
    async fn test_unresolved_io_is_not_initialized() {
        let encryptor = AesGcmFieldEncryptor::generate().unwrap();
        let multi = MultiStorage::new(Uuid::new_v4(), Uuid::new_v4());
        let file_id = Uuid::new_v4();

        let save = multi
            .save_file(&CancellationToken::new(), &encryptor, file_id, Box::new(&b"x"[..]))
            .await;
        assert!(matches!(save, Err(StorageError::NotInitialized)));
        assert!(matches!(multi.get_file(&encryptor, file_id).await, Err(StorageError::NotInitialized)));
        assert!(matches!(multi.delete_file(&encryptor, file_id).await, Err(StorageError::NotInitialized)));
        assert!(matches!(multi.test_connection(&encryptor).await, Err(StorageError::NotInitialized)));
    }

    #[test]
    fn test_resolved_legs_are_not_serialized() {
        let multi = MultiStorage::new(Uuid::new_v4(), Uuid::new_v4());
        let json = serde_json::to_value(&multi).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 3);
        assert!(json.get("primaryId").is_some());
        assert!(json.get("secondaryId").is_some());
    }

    #[test]
    fn test_write_mode_parsing() {
        assert_eq!("Sequential".parse::<LegWriteMode>().unwrap(), LegWriteMode::Sequential);
        assert_eq!("concurrent".parse::<LegWriteMode>().unwrap(), LegWriteMode::Concurrent);
        assert!("sideways".parse::<LegWriteMode>().is_err());
        assert_eq!(LegWriteMode::default(), LegWriteMode::Sequential);
    }
}
