use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    encrypt_field, merge_secret, require, FileReader, StorageBackend, StorageError, StorageOperator,
    StorageResult, StorageType,
};

fn default_smb_port() -> u16 {
    445
}

/// SMB share on a network-attached storage device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NasStorage {
    #[serde(default)]
    pub storage_id: Uuid,
    pub host: String,
    #[serde(default = "default_smb_port")]
    pub port: u16,
    pub share: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Require SMB3 transport encryption
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub domain: String,
    /// Directory inside the share
    #[serde(default)]
    pub path: String,
}

impl Default for NasStorage {
    fn default() -> Self {
        Self {
            storage_id: Uuid::nil(),
            host: String::new(),
            port: default_smb_port(),
            share: String::new(),
            username: String::new(),
            password: String::new(),
            use_ssl: false,
            domain: String::new(),
            path: String::new(),
        }
    }
}

impl NasStorage {
    pub fn update(&mut self, incoming: &NasStorage) {
        self.host = incoming.host.clone();
        self.port = incoming.port;
        self.share = incoming.share.clone();
        self.username = incoming.username.clone();
        self.use_ssl = incoming.use_ssl;
        self.domain = incoming.domain.clone();
        self.path = incoming.path.clone();
        merge_secret(&mut self.password, &incoming.password);
    }

    fn directory(&self) -> String {
        let trimmed = self.path.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    fn remote_path(&self, file_id: Uuid) -> String {
        format!("{}/{}", self.directory().trim_end_matches('/'), file_id)
    }

    async fn blocking<T, F>(&self, encryptor: &dyn FieldEncryptor, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(NasStorage, String) -> StorageResult<T> + Send + 'static,
    {
        let password = encryptor.decrypt(&self.password)?;
        let config = self.clone();

        tokio::task::spawn_blocking(move || op(config, password))
            .await
            .map_err(|e| StorageError::backend(format!("NAS task failed: {}", e)))?
    }
}

#[cfg(feature = "nas")]
mod smb {
    use std::io::{Cursor, Read};

    use pavao::{SmbClient, SmbCredentials, SmbEncryptionLevel, SmbError, SmbMode, SmbOpenOptions, SmbOptions};

    use super::NasStorage;
    use crate::storage::backend::{StorageError, StorageResult};

    fn map_smb_error(err: SmbError) -> StorageError {
        let message = err.to_string();
        if message.contains("No such file") || message.contains("ENOENT") {
            StorageError::not_found(format!("NAS file not found: {}", message))
        } else {
            StorageError::backend(format!("NAS operation failed: {}", message))
        }
    }

    pub(super) fn connect(config: &NasStorage, password: &str) -> StorageResult<SmbClient> {
        let mut credentials = SmbCredentials::default()
            .server(format!("smb://{}:{}", config.host, config.port))
            .share(format!("/{}", config.share.trim_matches('/')))
            .username(&config.username)
            .password(password);
        if !config.domain.is_empty() {
            credentials = credentials.workgroup(&config.domain);
        }

        let encryption = if config.use_ssl {
            SmbEncryptionLevel::Require
        } else {
            SmbEncryptionLevel::None
        };
        let options = SmbOptions::default()
            .one_share_per_server(true)
            .encryption_level(encryption);

        SmbClient::new(credentials, options)
            .map_err(|e| StorageError::connection(format!("NAS connect to {} failed: {}", config.host, e)))
    }

    fn ensure_directory(client: &SmbClient, directory: &str) -> StorageResult<()> {
        let mut current = String::new();
        for segment in directory.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if client.stat(current.as_str()).is_err() {
                client
                    .mkdir(current.as_str(), SmbMode::from(0o755))
                    .map_err(map_smb_error)?;
            }
        }
        Ok(())
    }

    pub(super) fn write(config: &NasStorage, password: &str, path: &str, reader: &mut impl Read) -> StorageResult<u64> {
        let client = connect(config, password)?;
        ensure_directory(&client, &config.directory())?;

        let mut remote = client
            .open_with(path, SmbOpenOptions::default().create(true).write(true).truncate(true))
            .map_err(map_smb_error)?;
        Ok(std::io::copy(reader, &mut remote)?)
    }

    pub(super) fn read(config: &NasStorage, password: &str, path: &str) -> StorageResult<Cursor<Vec<u8>>> {
        let client = connect(config, password)?;
        let mut remote = client
            .open_with(path, SmbOpenOptions::default().read(true))
            .map_err(map_smb_error)?;

        let mut data = Vec::new();
        remote.read_to_end(&mut data)?;
        Ok(Cursor::new(data))
    }

    pub(super) fn remove(config: &NasStorage, password: &str, path: &str) -> StorageResult<()> {
        let client = connect(config, password)?;
        client.unlink(path).map_err(map_smb_error)
    }

    pub(super) fn check_share(config: &NasStorage, password: &str) -> StorageResult<()> {
        let client = connect(config, password)?;
        ensure_directory(&client, &config.directory())
            .map_err(|e| StorageError::connection(format!("NAS share is not writable: {}", e)))?;
        client
            .list_dir(config.directory().as_str())
            .map(|_| ())
            .map_err(|e| StorageError::connection(format!("NAS listing failed: {}", e)))
    }
}

#[cfg(not(feature = "nas"))]
mod smb {
    use std::io::{Cursor, Read};

    use super::NasStorage;
    use crate::storage::backend::{StorageError, StorageResult};

    fn unavailable() -> StorageError {
        StorageError::connection("NAS support is not compiled in; rebuild with the `nas` feature")
    }

    pub(super) fn write(_: &NasStorage, _: &str, _: &str, _: &mut impl Read) -> StorageResult<u64> {
        Err(unavailable())
    }

    pub(super) fn read(_: &NasStorage, _: &str, _: &str) -> StorageResult<Cursor<Vec<u8>>> {
        Err(unavailable())
    }

    pub(super) fn remove(_: &NasStorage, _: &str, _: &str) -> StorageResult<()> {
        Err(unavailable())
    }

    pub(super) fn check_share(_: &NasStorage, _: &str) -> StorageResult<()> {
        Err(unavailable())
    }
}

#[async_trait]
impl StorageOperator for NasStorage {
    async fn save_file(
        &self,
        _cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        file: FileReader,
    ) -> StorageResult<()> {
        let mut reader = SyncIoBridge::new(file);
        let path = self.remote_path(file_id);

        let written = self
            .blocking(encryptor, move |config, password| smb::write(&config, &password, &path, &mut reader))
            .await?;

        tracing::debug!(host = %self.host, share = %self.share, file_id = %file_id, bytes = written, "Saved file to NAS");
        Ok(())
    }

    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        let path = self.remote_path(file_id);
        let data = self
            .blocking(encryptor, move |config, password| smb::read(&config, &password, &path))
            .await?;

        Ok(Box::new(data))
    }

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        let path = self.remote_path(file_id);
        let result = self
            .blocking(encryptor, move |config, password| smb::remove(&config, &password, &path))
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        self.blocking(encryptor, |config, password| smb::check_share(&config, &password))
            .await
    }
}

impl StorageBackend for NasStorage {
    fn backend_type(&self) -> StorageType {
        StorageType::Nas
    }

    fn validate(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        require(&self.host, "NAS host is required")?;
        require(&self.share, "NAS share is required")?;
        require(&self.username, "NAS username is required")?;
        require(&self.password, "NAS password is required")?;
        if self.port == 0 {
            return Err(StorageError::validation("NAS port must be greater than zero"));
        }
        Ok(())
    }

    fn hide_sensitive_data(&mut self) {
        self.password.clear();
    }

    fn encrypt_sensitive_data(&mut self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        encrypt_field(&mut self.password, encryptor)
    }
}
