use async_trait::async_trait;
use azure_storage::{CloudLocation, ConnectionString, StorageCredentials};
use azure_storage_blobs::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    encrypt_field, merge_secret, require, FileReader, StorageBackend, StorageError, StorageOperator,
    StorageResult, StorageType,
};

/// How the Azure client authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AzureAuthMethod {
    #[default]
    ConnectionString,
    AccountKey,
}

/// Azure Blob Storage container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureBlobStorage {
    #[serde(default)]
    pub storage_id: Uuid,
    #[serde(default)]
    pub auth_method: AzureAuthMethod,
    #[serde(default)]
    pub connection_string: String,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub account_key: String,
    pub container_name: String,
    /// Custom blob endpoint, e.g. an Azurite emulator
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub prefix: String,
}

impl AzureBlobStorage {
    pub fn update(&mut self, incoming: &AzureBlobStorage) {
        self.auth_method = incoming.auth_method;
        self.account_name = incoming.account_name.clone();
        self.container_name = incoming.container_name.clone();
        self.endpoint = incoming.endpoint.clone();
        self.prefix = incoming.prefix.clone();
        merge_secret(&mut self.connection_string, &incoming.connection_string);
        merge_secret(&mut self.account_key, &incoming.account_key);
    }

    fn blob_name(&self, file_id: Uuid) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            file_id.to_string()
        } else {
            format!("{}/{}", prefix, file_id)
        }
    }

    fn container_client(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<ContainerClient> {
        let (account, credentials, endpoint) = match self.auth_method {
            AzureAuthMethod::ConnectionString => {
                let raw = encryptor.decrypt(&self.connection_string)?;
                let parsed = ConnectionString::new(&raw)
                    .map_err(|e| StorageError::connection(format!("invalid Azure connection string: {}", e)))?;
                let credentials = parsed
                    .storage_credentials()
                    .map_err(|e| StorageError::connection(format!("invalid Azure credentials: {}", e)))?;
                let account = parsed
                    .account_name
                    .map(str::to_string)
                    .unwrap_or_else(|| self.account_name.clone());
                let endpoint = parsed
                    .blob_endpoint
                    .map(str::to_string)
                    .unwrap_or_else(|| self.endpoint.clone());
                (account, credentials, endpoint)
            }
            AzureAuthMethod::AccountKey => {
                let key = encryptor.decrypt(&self.account_key)?;
                let credentials = StorageCredentials::access_key(self.account_name.clone(), key);
                (self.account_name.clone(), credentials, self.endpoint.clone())
            }
        };

        let builder = if endpoint.is_empty() {
            ClientBuilder::new(account, credentials)
        } else {
            ClientBuilder::with_location(
                CloudLocation::Custom {
                    account,
                    uri: endpoint.trim_end_matches('/').to_string(),
                },
                credentials,
            )
        };

        Ok(builder.container_client(self.container_name.clone()))
    }

    /// Convert Azure error to our storage error
    fn map_azure_error(err: azure_core::error::Error) -> StorageError {
        let err_str = err.to_string();

        if err_str.contains("404") || err_str.contains("BlobNotFound") {
            StorageError::not_found(format!("Azure blob not found: {}", err))
        } else if err_str.contains("401") || err_str.contains("403") || err_str.contains("AuthenticationFailed") {
            StorageError::connection(format!("Azure authentication failed: {}", err))
        } else {
            StorageError::backend(format!("Azure operation failed: {}", err))
        }
    }
}

#[async_trait]
impl StorageOperator for AzureBlobStorage {
    async fn save_file(
        &self,
        _cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        mut file: FileReader,
    ) -> StorageResult<()> {
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;

        let blob_client = self.container_client(encryptor)?.blob_client(self.blob_name(file_id));
        blob_client
            .put_block_blob(data)
            .content_type("application/octet-stream")
            .await
            .map_err(Self::map_azure_error)?;

        Ok(())
    }

    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        let blob_client = self.container_client(encryptor)?.blob_client(self.blob_name(file_id));
        let data = blob_client.get_content().await.map_err(Self::map_azure_error)?;

        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        let blob_client = self.container_client(encryptor)?.blob_client(self.blob_name(file_id));

        match blob_client.delete().await.map_err(Self::map_azure_error) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        let exists = self
            .container_client(encryptor)?
            .exists()
            .await
            .map_err(|e| StorageError::connection(format!("Azure container check failed: {}", e)))?;

        if !exists {
            return Err(StorageError::connection(format!(
                "Azure container {} does not exist",
                self.container_name
            )));
        }
        Ok(())
    }
}

impl StorageBackend for AzureBlobStorage {
    fn backend_type(&self) -> StorageType {
        StorageType::AzureBlob
    }

    fn validate(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        match self.auth_method {
            AzureAuthMethod::ConnectionString => {
                require(&self.connection_string, "Azure connection string is required")?;
            }
            AzureAuthMethod::AccountKey => {
                require(&self.account_name, "Azure account name is required")?;
                require(&self.account_key, "Azure account key is required")?;
            }
        }
        require(&self.container_name, "Azure container name is required")
    }

    fn hide_sensitive_data(&mut self) {
        self.connection_string.clear();
        self.account_key.clear();
    }

    fn encrypt_sensitive_data(&mut self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        encrypt_field(&mut self.connection_string, encryptor)?;
        encrypt_field(&mut self.account_key, encryptor)?;
        Ok(())
    }
}
