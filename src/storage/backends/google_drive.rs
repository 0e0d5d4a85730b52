use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    encrypt_field, merge_secret, require, FileReader, StorageBackend, StorageError, StorageOperator,
    StorageResult, StorageType,
};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const ABOUT_URL: &str = "https://www.googleapis.com/drive/v3/about";

/// Google Drive account reached through an OAuth client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleDriveStorage {
    #[serde(default)]
    pub storage_id: Uuid,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// OAuth token document as issued by Google; must hold a refresh token
    #[serde(default)]
    pub token_json: String,
}

#[derive(Debug, Deserialize)]
struct OAuthToken {
    #[serde(default)]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

impl GoogleDriveStorage {
    pub fn update(&mut self, incoming: &GoogleDriveStorage) {
        self.client_id = incoming.client_id.clone();
        merge_secret(&mut self.client_secret, &incoming.client_secret);
        merge_secret(&mut self.token_json, &incoming.token_json);
    }

    fn refresh_token(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<String> {
        let raw = encryptor.decrypt(&self.token_json)?;
        let token: OAuthToken = serde_json::from_str(&raw)
            .map_err(|e| StorageError::validation(format!("Google Drive token is not valid JSON: {}", e)))?;
        if token.refresh_token.is_empty() {
            return Err(StorageError::validation("Google Drive token has no refresh token"));
        }
        Ok(token.refresh_token)
    }

    /// Exchange the stored refresh token for a short-lived access token
    async fn access_token(&self, client: &Client, encryptor: &dyn FieldEncryptor) -> StorageResult<String> {
        let refresh_token = self.refresh_token(encryptor)?;
        let client_secret = encryptor.decrypt(&self.client_secret)?;

        let response = client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("Google OAuth request failed: {}", e)))?;

        let response = Self::check_response(response, "refresh access token").await?;
        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| StorageError::connection(format!("invalid Google OAuth response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn find_file(&self, client: &Client, access_token: &str, file_id: Uuid) -> StorageResult<Option<String>> {
        let query = format!("name = '{}' and trashed = false", file_id);
        let response = client
            .get(FILES_URL)
            .bearer_auth(access_token)
            .query(&[("q", query.as_str()), ("fields", "files(id)"), ("pageSize", "1")])
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let list: DriveFileList = Self::check_response(response, "list files")
            .await?
            .json()
            .await
            .map_err(Self::map_request_error)?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn check_response(response: Response, action: &str) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("Google Drive failed to {}: {} {}", action, status, body);
        Err(match status {
            StatusCode::NOT_FOUND => StorageError::not_found(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::connection(message),
            _ => StorageError::backend(message),
        })
    }

    fn map_request_error(err: reqwest::Error) -> StorageError {
        if err.is_connect() || err.is_timeout() {
            StorageError::connection(format!("Google Drive unreachable: {}", err))
        } else {
            StorageError::backend(format!("Google Drive request failed: {}", err))
        }
    }
}

#[async_trait]
impl StorageOperator for GoogleDriveStorage {
    async fn save_file(
        &self,
        _cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        mut file: FileReader,
    ) -> StorageResult<()> {
        let client = Client::new();
        let access_token = self.access_token(&client, encryptor).await?;

        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;

        // Overwrite in place when a file with this name already exists
        if let Some(existing) = self.find_file(&client, &access_token, file_id).await? {
            let response = client
                .patch(format!("{}/{}", UPLOAD_URL, existing))
                .bearer_auth(&access_token)
                .query(&[("uploadType", "media")])
                .body(data)
                .send()
                .await
                .map_err(Self::map_request_error)?;
            Self::check_response(response, "overwrite file").await?;
            return Ok(());
        }

        let response = client
            .post(UPLOAD_URL)
            .bearer_auth(&access_token)
            .query(&[("uploadType", "media"), ("fields", "id")])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(Self::map_request_error)?;
        let created: DriveFile = Self::check_response(response, "upload file")
            .await?
            .json()
            .await
            .map_err(Self::map_request_error)?;

        // Media uploads are untitled; name the file after its id so lookups find it
        let response = client
            .patch(format!("{}/{}", FILES_URL, created.id))
            .bearer_auth(&access_token)
            .json(&serde_json::json!({ "name": file_id.to_string() }))
            .send()
            .await
            .map_err(Self::map_request_error)?;
        Self::check_response(response, "name uploaded file").await?;

        Ok(())
    }

    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        let client = Client::new();
        let access_token = self.access_token(&client, encryptor).await?;

        let drive_id = self
            .find_file(&client, &access_token, file_id)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("file {} not found in Google Drive", file_id)))?;

        let response = client
            .get(format!("{}/{}", FILES_URL, drive_id))
            .bearer_auth(&access_token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(Self::map_request_error)?;
        let data = Self::check_response(response, "download file")
            .await?
            .bytes()
            .await
            .map_err(Self::map_request_error)?;

        Ok(Box::new(std::io::Cursor::new(data.to_vec())))
    }

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        let client = Client::new();
        let access_token = self.access_token(&client, encryptor).await?;

        let Some(drive_id) = self.find_file(&client, &access_token, file_id).await? else {
            return Ok(());
        };

        let response = client
            .delete(format!("{}/{}", FILES_URL, drive_id))
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(Self::map_request_error)?;
        Self::check_response(response, "delete file").await?;

        Ok(())
    }

    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        let client = Client::new();
        let access_token = self.access_token(&client, encryptor).await?;

        let response = client
            .get(ABOUT_URL)
            .bearer_auth(&access_token)
            .query(&[("fields", "user")])
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("Google Drive unreachable: {}", e)))?;
        Self::check_response(response, "read account")
            .await
            .map_err(|e| StorageError::connection(e.to_string()))?;

        Ok(())
    }
}

impl StorageBackend for GoogleDriveStorage {
    fn backend_type(&self) -> StorageType {
        StorageType::GoogleDrive
    }

    fn validate(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        require(&self.client_id, "Google Drive client ID is required")?;
        require(&self.client_secret, "Google Drive client secret is required")?;
        require(&self.token_json, "Google Drive token is required")?;
        self.refresh_token(encryptor).map(|_| ())
    }

    fn hide_sensitive_data(&mut self) {
        self.client_secret.clear();
        self.token_json.clear();
    }

    fn encrypt_sensitive_data(&mut self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        encrypt_field(&mut self.client_secret, encryptor)?;
        encrypt_field(&mut self.token_json, encryptor)?;
        Ok(())
    }
}
