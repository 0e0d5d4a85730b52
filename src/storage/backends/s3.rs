use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::encryption::FieldEncryptor;
use crate::storage::backend::{
    encrypt_field, merge_secret, require, FileReader, StorageBackend, StorageError, StorageOperator,
    StorageResult, StorageType,
};

/// Multipart part size; S3 requires at least 5 MiB for every part but the last
const PART_SIZE: usize = 16 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible object storage (AWS S3, MinIO, Cloudflare R2, ...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Storage {
    #[serde(default)]
    pub storage_id: Uuid,
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_region: String,
    #[serde(default)]
    pub s3_access_key: String,
    #[serde(default)]
    pub s3_secret_key: String,
    /// Custom endpoint; enables path-style addressing
    #[serde(default)]
    pub s3_endpoint: String,
    #[serde(default)]
    pub s3_prefix: String,
}

impl S3Storage {
    pub fn update(&mut self, incoming: &S3Storage) {
        self.s3_bucket = incoming.s3_bucket.clone();
        self.s3_region = incoming.s3_region.clone();
        self.s3_endpoint = incoming.s3_endpoint.clone();
        self.s3_prefix = incoming.s3_prefix.clone();
        merge_secret(&mut self.s3_access_key, &incoming.s3_access_key);
        merge_secret(&mut self.s3_secret_key, &incoming.s3_secret_key);
    }

    fn object_key(&self, file_id: Uuid) -> String {
        let prefix = self.s3_prefix.trim_matches('/');
        if prefix.is_empty() {
            file_id.to_string()
        } else {
            format!("{}/{}", prefix, file_id)
        }
    }

    async fn client(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<Client> {
        let access_key = encryptor.decrypt(&self.s3_access_key)?;
        let secret_key = encryptor.decrypt(&self.s3_secret_key)?;

        let region = if self.s3_region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            self.s3_region.clone()
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "backup-storages",
            ));

        // Set custom endpoint if provided (for MinIO, R2, etc.)
        if !self.s3_endpoint.is_empty() {
            loader = loader.endpoint_url(&self.s3_endpoint);
        }

        let shared_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
        if !self.s3_endpoint.is_empty() {
            s3_config = s3_config.force_path_style(true);
        }

        Ok(Client::from_conf(s3_config.build()))
    }

    /// Convert an S3 SDK error message to our storage error
    fn map_s3_error(err: &str) -> StorageError {
        if err.contains("NoSuchBucket") {
            StorageError::connection("S3 bucket does not exist")
        } else if err.contains("NoSuchKey") || err.contains("NotFound") {
            StorageError::not_found(format!("S3 object not found: {}", err))
        } else if err.contains("AccessDenied") || err.contains("InvalidAccessKeyId") || err.contains("SignatureDoesNotMatch") {
            StorageError::connection(format!("S3 authentication failed: {}", err))
        } else {
            StorageError::backend(format!("S3 operation failed: {}", err))
        }
    }

    async fn upload_parts(
        &self,
        client: &Client,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        file: &mut FileReader,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut part = first_part;
        let mut part_number = 1;

        loop {
            let uploaded = client
                .upload_part()
                .bucket(&self.s3_bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| Self::map_s3_error(&DisplayErrorContext(&e).to_string()))?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(uploaded.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            part = read_part(file).await?;
            if part.is_empty() {
                return Ok(parts);
            }
            part_number += 1;
        }
    }
}

async fn read_part(file: &mut FileReader) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(PART_SIZE);
    (&mut *file).take(PART_SIZE as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

#[async_trait]
impl StorageOperator for S3Storage {
    async fn save_file(
        &self,
        _cancel: &CancellationToken,
        encryptor: &dyn FieldEncryptor,
        file_id: Uuid,
        mut file: FileReader,
    ) -> StorageResult<()> {
        let client = self.client(encryptor).await?;
        let key = self.object_key(file_id);

        let first_part = read_part(&mut file).await?;
        if first_part.len() < PART_SIZE {
            client
                .put_object()
                .bucket(&self.s3_bucket)
                .key(&key)
                .body(ByteStream::from(first_part))
                .content_type("application/octet-stream")
                .send()
                .await
                .map_err(|e| Self::map_s3_error(&DisplayErrorContext(&e).to_string()))?;
            return Ok(());
        }

        let upload = client
            .create_multipart_upload()
            .bucket(&self.s3_bucket)
            .key(&key)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| Self::map_s3_error(&DisplayErrorContext(&e).to_string()))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StorageError::backend("S3 did not return a multipart upload id"))?
            .to_string();

        let parts = match self.upload_parts(&client, &key, &upload_id, first_part, &mut file).await {
            Ok(parts) => parts,
            Err(e) => {
                let _ = client
                    .abort_multipart_upload()
                    .bucket(&self.s3_bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                return Err(e);
            }
        };

        tracing::debug!(key = %key, parts = parts.len(), "Completing S3 multipart upload");

        client
            .complete_multipart_upload()
            .bucket(&self.s3_bucket)
            .key(&key)
            .upload_id(&upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| Self::map_s3_error(&DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn get_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<FileReader> {
        let client = self.client(encryptor).await?;

        let response = client
            .get_object()
            .bucket(&self.s3_bucket)
            .key(self.object_key(file_id))
            .send()
            .await
            .map_err(|e| Self::map_s3_error(&DisplayErrorContext(&e).to_string()))?;

        Ok(Box::new(Box::pin(response.body.into_async_read())))
    }

    async fn delete_file(&self, encryptor: &dyn FieldEncryptor, file_id: Uuid) -> StorageResult<()> {
        let client = self.client(encryptor).await?;

        // S3 delete succeeds even if the object doesn't exist
        client
            .delete_object()
            .bucket(&self.s3_bucket)
            .key(self.object_key(file_id))
            .send()
            .await
            .map_err(|e| Self::map_s3_error(&DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn test_connection(&self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        let client = self.client(encryptor).await?;

        client
            .head_bucket()
            .bucket(&self.s3_bucket)
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("S3 bucket check failed: {}", DisplayErrorContext(&e))))?;

        Ok(())
    }
}

impl StorageBackend for S3Storage {
    fn backend_type(&self) -> StorageType {
        StorageType::S3
    }

    fn validate(&self, _encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        require(&self.s3_bucket, "S3 bucket is required")?;
        require(&self.s3_access_key, "S3 access key is required")?;
        require(&self.s3_secret_key, "S3 secret key is required")?;
        Ok(())
    }

    fn hide_sensitive_data(&mut self) {
        self.s3_access_key.clear();
        self.s3_secret_key.clear();
    }

    fn encrypt_sensitive_data(&mut self, encryptor: &dyn FieldEncryptor) -> StorageResult<()> {
        encrypt_field(&mut self.s3_access_key, encryptor)?;
        encrypt_field(&mut self.s3_secret_key, encryptor)?;
        Ok(())
    }
}
