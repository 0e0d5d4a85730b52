pub mod backend;
pub mod backends;
pub mod model;
pub mod repository;
pub mod service;

pub use backend::{FileReader, Leg, StorageBackend, StorageError, StorageOperator, StorageResult, StorageType};
pub use backends::{
    AzureAuthMethod, AzureBlobStorage, FtpStorage, GoogleDriveStorage, LegWriteMode, LocalStorage, MultiStorage,
    NasStorage, ReplicationSettings, S3Storage,
};
pub use model::{Storage, StorageLookup, StorageRecord, StorageVariant};
pub use repository::StorageRepository;
pub use service::StorageService;
