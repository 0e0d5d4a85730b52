use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream, Status};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    encrypt_field, merge_secret, require, FileReader, StorageBackend, StorageError, StorageOperator,
    StorageResult, StorageType,
};

fn default_ftp_port() -> u16 {
    21
}

/// FTP or explicit FTPS server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpStorage {
    #[serde(default)]
    pub storage_id: Uuid,
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_ssl: bool,
    /// Remote directory, created on demand
    #[serde(default)]
    pub path: String,
}

impl Default for FtpStorage {
    fn default() -> Self {
        Self {
            storage_id: Uuid::nil(),
            host: String::new(),
            port: default_ftp_port(),
            username: String::new(),
            password: String::new(),
            use_ssl: false,
            path: String::new(),
        }
    }
}

impl FtpStorage {
    pub fn update(&mut self, incoming: &FtpStorage) {
        self.host = incoming.host.clone();
        self.port = incoming.port;
        self.username = incoming.username.clone();
        self.use_ssl = incoming.use_ssl;
        self.path = incoming.path.clone();
        merge_secret(&mut self.password, &incoming.password);
    }

    /// Open a logged-in binary session positioned in the storage directory
    fn open_session(&self, password: &str, create_dirs: bool) -> StorageResult<NativeTlsFtpStream> {
        let address = format!("{}:{}", self.host, self.port);
        let mut ftp = NativeTlsFtpStream::connect(&address)
            .map_err(|e| StorageError::connection(format!("FTP connect to {} failed: {}", address, e)))?;

        if self.use_ssl {
            let connector = TlsConnector::new()
                .map_err(|e| StorageError::connection(format!("TLS setup failed: {}", e)))?;
            ftp = ftp
                .into_secure(NativeTlsConnector::from(connector), &self.host)
                .map_err(|e| StorageError::connection(format!("FTPS negotiation failed: {}", e)))?;
        }

        let username = if self.username.is_empty() { "anonymous" } else { self.username.as_str() };
        ftp.login(username, password)
            .map_err(|e| StorageError::connection(format!("FTP login failed: {}", e)))?;
        ftp.transfer_type(FileType::Binary).map_err(Self::map_ftp_error)?;

        if self.path.starts_with('/') {
            ftp.cwd("/").map_err(Self::map_ftp_error)?;
        }
        for segment in self.path.split('/').filter(|s| !s.is_empty()) {
            if ftp.cwd(segment).is_err() {
                if !create_dirs {
                    return Err(StorageError::not_found(format!("FTP directory {} not found", self.path)));
                }
                ftp.mkdir(segment).map_err(Self::map_ftp_error)?;
                ftp.cwd(segment).map_err(Self::map_ftp_error)?;
            }
        }

        Ok(ftp)
    }

    fn map_ftp_error(err: FtpError) -> StorageError {
        match err {
            FtpError::UnexpectedResponse(ref response) if response.status == Status::FileUnavailable => {
                StorageError::not_found(format!("FTP file unavailable: {}", err))
            }
            FtpError::ConnectionError(_) => StorageError::connection(format!("FTP connection error: {}", err)),
            other => StorageError::backend(format!("FTP operation failed: {}", other)),
        }
    }

    /// Run a blocking FTP session off the async runtime
    async fn with_session<T, F>(&self, encryptor: &dyn FieldEncryptor, create_dirs: bool, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut NativeTlsFtpStream) -> StorageResult<T> + Send + 'static,
    {
        let password = encryptor.decrypt(&self.password)?;
        let config = self.clone();

        tokio::task::spawn_blocking(move || {
            let mut ftp = config.open_session(&password, create_dirs)?;
            let result = op(&mut ftp);
            let _ = ftp.quit();
            result
        })
        .await
        .map_err(|e| StorageError::backend(format!("FTP task failed: {}", e)))?
    }
}

#[async_trait]
impl StorageOperator for FtpStorage {
    async fn save_file(
        &self,
        _cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        file: FileReader,
    ) -> StorageResult<()> {
        let mut reader = SyncIoBridge::new(file);
        let name = file_id.to_string();

        let written = self
            .with_session(encryptor, true, move |ftp| {
                ftp.put_file(&name, &mut reader).map_err(Self::map_ftp_error)
            })
            .await?;

        tracing::debug!(host = %self.host, file_id = %file_id, bytes = written, "Uploaded file over FTP");
        Ok(())
    }

    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        let name = file_id.to_string();
        let buffer = self
            .with_session(encryptor, false, move |ftp| {
                ftp.retr_as_buffer(&name).map_err(Self::map_ftp_error)
            })
            .await?;

        Ok(Box::new(buffer))
    }

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        let name = file_id.to_string();
        let result = self
            .with_session(encryptor, false, move |ftp| ftp.rm(&name).map_err(Self::map_ftp_error))
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        self.with_session(encryptor, true, |ftp| {
            ftp.pwd()
                .map(|_| ())
                .map_err(|e| StorageError::connection(format!("FTP check failed: {}", e)))
        })
        .await
    }
}

impl StorageBackend for FtpStorage {
    fn backend_type(&self) -> StorageType {
        StorageType::Ftp
    }

    fn validate(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        require(&self.host, "FTP host is required")?;
        if self.port == 0 {
            return Err(StorageError::validation("FTP port must be greater than zero"));
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
