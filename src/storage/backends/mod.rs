pub mod local;
pub mod s3;
pub mod google_drive;
pub mod nas;
pub mod azure_blob;
pub mod ftp;
pub mod multi;

pub use local::LocalStorage;
pub use s3::S3Storage;
pub use google_drive::GoogleDriveStorage;
pub use nas::NasStorage;
pub use azure_blob::{AzureAuthMethod, AzureBlobStorage};
pub use ftp::FtpStorage;
pub use multi::{LegWriteMode, MultiStorage, ReplicationSettings};
