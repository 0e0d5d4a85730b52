//! # backup-storages - Pluggable destinations for backup artifacts
//!
//! Every configured destination is a [`Storage`]: a named, workspace-owned record
//! holding exactly one backend configuration ([`StorageVariant`]). All backends
//! share one capability contract ([`StorageOperator`] and [`StorageBackend`]) for
//! saving, reading and deleting files, live connection checks, and the lifecycle
//! of their secret fields.
//!
//! ## Backends
//!
//! - **Local**: a directory on the local filesystem
//! - **S3**: AWS S3 and compatible object stores (MinIO, R2)
//! - **Google Drive**: a Drive account reached through OAuth
//! - **NAS**: an SMB share (requires the `nas` feature)
//! - **Azure Blob**: a blob container
//! - **FTP**: an FTP or explicit FTPS server
//! - **Multi**: replication across two other storages with read failover
//!
//! ## Quick Start
//!
//! ```no_run
//! use backup_storages::config::StorageSettings;
//! use backup_storages::storage::{LocalStorage, Storage, StorageService, StorageVariant};
//! use tokio_util::sync::CancellationToken;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = StorageSettings::load_with_env_overrides("storage.json")?;
//!     let service = StorageService::from_settings(&settings).await?;
//!
//!     let workspace_id = Uuid::new_v4();
//!     let storage = service
//!         .save_storage(
//!             workspace_id,
//!             Storage::new(workspace_id, "nightly", StorageVariant::Local(LocalStorage::new("/var/backups"))),
//!         )
//!         .await?;
//!
//!     let file_id = Uuid::new_v4();
//!     service
//!         .save_file(&CancellationToken::new(), storage.id, file_id, Box::new(&b"dump"[..]))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`storage`] - Backends, the storage record, persistence and the service layer
//! - [`encryption`] - Field encryption for backend credentials
//! - [`config`] - Configuration loading with environment overrides
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod encryption;
pub mod logging;
pub mod storage;

pub use config::StorageSettings;
pub use encryption::{AesGcmFieldEncryptor, EncryptionError, FieldEncryptor};
pub use storage::{
    Storage, StorageBackend, StorageError, StorageOperator, StorageRepository, StorageResult, StorageService,
    StorageType, StorageVariant,
};
