use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::{EncryptionError, FieldEncryptor};

/// Storage backend kinds supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum StorageType {
    #[default]
    Local,
    S3,
    GoogleDrive,
    Nas,
    AzureBlob,
    Ftp,
    Multi,
}

impl StorageType {
    /// Name used on the wire and in the `type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "LOCAL",
            StorageType::S3 => "S3",
            StorageType::GoogleDrive => "GOOGLE_DRIVE",
            StorageType::Nas => "NAS",
            StorageType::AzureBlob => "AZURE_BLOB",
            StorageType::Ftp => "FTP",
            StorageType::Multi => "MULTI",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageType::Local),
            "s3" => Ok(StorageType::S3),
            "google_drive" | "googledrive" | "google-drive" | "gdrive" => Ok(StorageType::GoogleDrive),
            "nas" | "smb" => Ok(StorageType::Nas),
            "azure_blob" | "azureblob" | "azure-blob" | "azure" => Ok(StorageType::AzureBlob),
            "ftp" => Ok(StorageType::Ftp),
            "multi" => Ok(StorageType::Multi),
            _ => Err(StorageError::UnsupportedType {
                storage_type: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for StorageType {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One side of a multi-storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Primary,
    Secondary,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Primary => f.write_str("primary"),
            Leg::Secondary => f.write_str("secondary"),
        }
    }
}

/// Errors specific to storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("persistence error: {message}")]
    Persistence { message: String },

    #[error("failed to {operation} {leg} storage: {source}")]
    LegFailed {
        leg: Leg,
        operation: &'static str,
        source: Box<StorageError>,
    },

    #[error("partial replication: failed to {operation} {leg} storage after the other storage succeeded: {source}")]
    PartialReplication {
        leg: Leg,
        operation: &'static str,
        source: Box<StorageError>,
    },

    #[error("failed to {operation} both storages: primary: {primary}, secondary: {secondary}")]
    AllLegsFailed {
        operation: &'static str,
        primary: Box<StorageError>,
        secondary: Box<StorageError>,
    },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("unsupported storage type: {storage_type}")]
    UnsupportedType { storage_type: String },

    #[error("multi-storage not properly initialized")]
    NotInitialized,

    #[error("operation cancelled")]
    Cancelled,

    #[error("encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {message}")]
    Backend { message: String },
}

impl StorageError {
    pub fn validation(message: impl Into<String>) -> Self {
        StorageError::Validation { message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        StorageError::Connection { message: message.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        StorageError::NotFound { message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound {
                message: "row not found".to_string(),
            },
            other => StorageError::Persistence {
                message: other.to_string(),
            },
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Content stream handed to and returned from backends. Input is not seekable.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// File I/O capabilities of a storage destination
#[async_trait]
pub trait StorageOperator: Send + Sync {
    /// Store `file` under `file_id`
    async fn save_file(
        &self,
        cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        file: FileReader,
    ) -> StorageResult<()>;

    /// Open the content stored under `file_id`
    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader>;

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()>;

    /// Live check against the destination
    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()>;
}

/// Full capability contract of a variant payload
pub trait StorageBackend: StorageOperator {
    fn backend_type(&self) -> StorageType;

    /// Required-field check, no network I/O
    fn validate(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()>;

    /// Blank secret fields before the record leaves the trust boundary
    fn hide_sensitive_data(&mut self);

    /// Replace plaintext secrets with their encrypted form
    fn encrypt_sensitive_data(&mut self, encryptor: &dyn FieldEncryptor) -> StorageResult<()>;
}

pub(crate) fn require(value: &str, message: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::validation(message));
    }
    Ok(())
}

/// Merge a secret field: a blank incoming value keeps the stored one
pub(crate) fn merge_secret(current: &mut String, incoming: &str) {
    if !incoming.is_empty() {
        *current = incoming.to_string();
    }
}

pub(crate) fn encrypt_field(value: &mut String, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
    if !value.is_empty() {
        *value = encryptor.encrypt(value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_round_trips_through_wire_name() {
        for kind in [
            StorageType::Local,
            StorageType::S3,
            StorageType::GoogleDrive,
            StorageType::Nas,
            StorageType::AzureBlob,
            StorageType::Ftp,
            StorageType::Multi,
        ] {
            let parsed: StorageType = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_storage_type_deserializes_aliases_in_any_case() {
        for (json, expected) in [
            ("\"local\"", StorageType::Local),
            ("\"GOOGLE_DRIVE\"", StorageType::GoogleDrive),
            ("\"gdrive\"", StorageType::GoogleDrive),
            ("\"Azure\"", StorageType::AzureBlob),
            ("\"smb\"", StorageType::Nas),
        ] {
            let parsed: StorageType = serde_json::from_str(json).unwrap();
            assert_eq!(parsed, expected, "{}", json);
        }

        let err = serde_json::from_str::<StorageType>("\"dropbox\"").unwrap_err();
        assert!(err.to_string().contains("dropbox"));
    }

    #[test]
    fn test_unknown_storage_type_is_unsupported() {
        let err = "DROPBOX".parse::<StorageType>().unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedType { .. }));
    }

    #[test]
    fn test_merge_secret_keeps_stored_value_for_blank_input() {
        let mut secret = "enc:abc".to_string();
        merge_secret(&mut secret, "");
        assert_eq!(secret, "enc:abc");
        merge_secret(&mut secret, "new");
        assert_eq!(secret, "new");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StorageError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }
}
