use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

use crate::storage::backend::{StorageError, StorageResult, StorageType};
use crate::storage::backends::{
    AzureAuthMethod, AzureBlobStorage, FtpStorage, GoogleDriveStorage, LocalStorage, MultiStorage,
    NasStorage, S3Storage,
};
use crate::storage::model::{Storage, StorageLookup, StorageRecord, StorageVariant};

const VARIANT_TABLES: [&str; 7] = [
    "local_storages",
    "s3_storages",
    "google_drive_storages",
    "nas_storages",
    "azure_blob_storages",
    "ftp_storages",
    "multi_storages",
];

/// SQLite persistence of storages and their backend configuration
#[derive(Clone)]
pub struct StorageRepository {
    pool: SqlitePool,
}

impl StorageRepository {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to an in-memory database sees its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Persistence {
                message: format!("failed to open {}: {}", database_url, e),
            })?;

        let repository = Self { pool };
        repository.init_schema().await?;

        tracing::info!(database_url = %database_url, "Storage repository ready");
        Ok(repository)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables if they don't exist
    pub async fn init_schema(&self) -> StorageResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS storages (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                type TEXT NOT NULL,
                name TEXT NOT NULL,
                last_save_error TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_storages_workspace_id ON storages (workspace_id)",
            r#"
            CREATE TABLE IF NOT EXISTS local_storages (
                storage_id TEXT PRIMARY KEY REFERENCES storages (id) ON DELETE CASCADE,
                path TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS s3_storages (
                storage_id TEXT PRIMARY KEY REFERENCES storages (id) ON DELETE CASCADE,
                s3_bucket TEXT NOT NULL,
                s3_region TEXT NOT NULL,
                s3_access_key TEXT NOT NULL,
                s3_secret_key TEXT NOT NULL,
                s3_endpoint TEXT NOT NULL,
                s3_prefix TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS google_drive_storages (
                storage_id TEXT PRIMARY KEY REFERENCES storages (id) ON DELETE CASCADE,
                client_id TEXT NOT NULL,
                client_secret TEXT NOT NULL,
                token_json TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS nas_storages (
                storage_id TEXT PRIMARY KEY REFERENCES storages (id) ON DELETE CASCADE,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                share TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                use_ssl BOOLEAN NOT NULL,
                domain TEXT NOT NULL,
                path TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS azure_blob_storages (
                storage_id TEXT PRIMARY KEY REFERENCES storages (id) ON DELETE CASCADE,
                auth_method TEXT NOT NULL,
                connection_string TEXT NOT NULL,
                account_name TEXT NOT NULL,
                account_key TEXT NOT NULL,
                container_name TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                prefix TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ftp_storages (
                storage_id TEXT PRIMARY KEY REFERENCES storages (id) ON DELETE CASCADE,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                use_ssl BOOLEAN NOT NULL,
                path TEXT NOT NULL
            )
            "#,
            // primary/secondary are plain references: deleting a leg is not blocked here
            r#"
            CREATE TABLE IF NOT EXISTS multi_storages (
                storage_id TEXT PRIMARY KEY REFERENCES storages (id) ON DELETE CASCADE,
                primary_id TEXT NOT NULL,
                secondary_id TEXT NOT NULL
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Insert or update the storage row and its single configuration row
    pub async fn save(&self, mut storage: Storage) -> StorageResult<Storage> {
        let id = if storage.id.is_nil() { Uuid::new_v4() } else { storage.id };
        storage.assign_id(id);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO storages (id, workspace_id, type, name, last_save_error)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                type = excluded.type,
                name = excluded.name,
                last_save_error = excluded.last_save_error
            "#,
        )
        .bind(id.to_string())
        .bind(storage.workspace_id.to_string())
        .bind(storage.storage_type().as_str())
        .bind(&storage.name)
        .bind(&storage.last_save_error)
        .execute(&mut *tx)
        .await?;

        // the type may have changed since the last save
        for table in VARIANT_TABLES {
            sqlx::query(&format!("DELETE FROM {} WHERE storage_id = ?", table))
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        insert_variant(&mut tx, &storage.variant).await?;

        tx.commit().await?;

        tracing::debug!(storage_id = %id, storage_type = %storage.storage_type(), "Saved storage");
        Ok(storage)
    }

    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Storage> {
        let row = sqlx::query("SELECT id, workspace_id, type, name, last_save_error FROM storages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("storage {} not found", id)))?;

        self.load(&row).await
    }

    pub async fn find_by_workspace_id(&self, workspace_id: Uuid) -> StorageResult<Vec<Storage>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, type, name, last_save_error FROM storages WHERE workspace_id = ? ORDER BY name",
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut storages = Vec::with_capacity(rows.len());
        for row in &rows {
            storages.push(self.load(row).await?);
        }
        Ok(storages)
    }

    /// Remove the configuration row, then the storage row
    pub async fn delete(&self, storage: &Storage) -> StorageResult<()> {
        let id = storage.id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DELETE FROM {} WHERE storage_id = ?", variant_table(storage.storage_type())))
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM storages WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StorageError::not_found(format!("storage {} not found", storage.id)));
        }

        tx.commit().await?;

        tracing::debug!(storage_id = %storage.id, "Deleted storage");
        Ok(())
    }

    /// Eagerly fetch every configuration slot for a storage row
    async fn load(&self, row: &SqliteRow) -> StorageResult<Storage> {
        let id: String = row.try_get("id")?;
        let storage_id = parse_uuid(&id)?;
        let storage_type: String = row.try_get("type")?;

        let mut record = StorageRecord {
            id: storage_id,
            workspace_id: parse_uuid(&row.try_get::<String, _>("workspace_id")?)?,
            storage_type: StorageType::from_str(&storage_type)?,
            name: row.try_get("name")?,
            last_save_error: row.try_get("last_save_error")?,
            ..Default::default()
        };

        record.local_storage = self
            .fetch_slot("local_storages", &id)
            .await?
            .map(|r| -> StorageResult<LocalStorage> {
                Ok(LocalStorage {
                    storage_id,
                    path: r.try_get("path")?,
                })
            })
            .transpose()?;

        record.s3_storage = self
            .fetch_slot("s3_storages", &id)
            .await?
            .map(|r| -> StorageResult<S3Storage> {
                Ok(S3Storage {
                    storage_id,
                    s3_bucket: r.try_get("s3_bucket")?,
                    s3_region: r.try_get("s3_region")?,
                    s3_access_key: r.try_get("s3_access_key")?,
                    s3_secret_key: r.try_get("s3_secret_key")?,
                    s3_endpoint: r.try_get("s3_endpoint")?,
                    s3_prefix: r.try_get("s3_prefix")?,
                })
            })
            .transpose()?;

        record.google_drive_storage = self
            .fetch_slot("google_drive_storages", &id)
            .await?
            .map(|r| -> StorageResult<GoogleDriveStorage> {
                Ok(GoogleDriveStorage {
                    storage_id,
                    client_id: r.try_get("client_id")?,
                    client_secret: r.try_get("client_secret")?,
                    token_json: r.try_get("token_json")?,
                })
            })
            .transpose()?;

        record.nas_storage = self
            .fetch_slot("nas_storages", &id)
            .await?
            .map(|r| -> StorageResult<NasStorage> {
                Ok(NasStorage {
                    storage_id,
                    host: r.try_get("host")?,
                    port: parse_port(r.try_get("port")?)?,
                    share: r.try_get("share")?,
                    username: r.try_get("username")?,
                    password: r.try_get("password")?,
                    use_ssl: r.try_get("use_ssl")?,
                    domain: r.try_get("domain")?,
                    path: r.try_get("path")?,
                })
            })
            .transpose()?;

        record.azure_blob_storage = self
            .fetch_slot("azure_blob_storages", &id)
            .await?
            .map(|r| -> StorageResult<AzureBlobStorage> {
                Ok(AzureBlobStorage {
                    storage_id,
                    auth_method: parse_auth_method(&r.try_get::<String, _>("auth_method")?)?,
                    connection_string: r.try_get("connection_string")?,
                    account_name: r.try_get("account_name")?,
                    account_key: r.try_get("account_key")?,
                    container_name: r.try_get("container_name")?,
                    endpoint: r.try_get("endpoint")?,
                    prefix: r.try_get("prefix")?,
                })
            })
            .transpose()?;

        record.ftp_storage = self
            .fetch_slot("ftp_storages", &id)
            .await?
            .map(|r| -> StorageResult<FtpStorage> {
                Ok(FtpStorage {
                    storage_id,
                    host: r.try_get("host")?,
                    port: parse_port(r.try_get("port")?)?,
                    username: r.try_get("username")?,
                    password: r.try_get("password")?,
                    use_ssl: r.try_get("use_ssl")?,
                    path: r.try_get("path")?,
                })
            })
            .transpose()?;

        record.multi_storage = self
            .fetch_slot("multi_storages", &id)
            .await?
            .map(|r| -> StorageResult<MultiStorage> {
                let mut multi = MultiStorage::new(
                    parse_uuid(&r.try_get::<String, _>("primary_id")?)?,
                    parse_uuid(&r.try_get::<String, _>("secondary_id")?)?,
                );
                multi.storage_id = storage_id;
                Ok(multi)
            })
            .transpose()?;

        Storage::try_from(record)
    }

    async fn fetch_slot(&self, table: &str, storage_id: &str) -> StorageResult<Option<SqliteRow>> {
        let row = sqlx::query(&format!("SELECT * FROM {} WHERE storage_id = ?", table))
            .bind(storage_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl StorageLookup for StorageRepository {
    async fn find_by_id(&self, id: Uuid) -> StorageResult<Storage> {
        StorageRepository::find_by_id(self, id).await
    }
}

fn variant_table(storage_type: StorageType) -> &'static str {
    match storage_type {
        StorageType::Local => "local_storages",
        StorageType::S3 => "s3_storages",
        StorageType::GoogleDrive => "google_drive_storages",
        StorageType::Nas => "nas_storages",
        StorageType::AzureBlob => "azure_blob_storages",
        StorageType::Ftp => "ftp_storages",
        StorageType::Multi => "multi_storages",
    }
}

async fn insert_variant(conn: &mut SqliteConnection, variant: &StorageVariant) -> StorageResult<()> {
    let storage_id = variant.storage_id().to_string();

    match variant {
        StorageVariant::Local(local) => {
            sqlx::query("INSERT INTO local_storages (storage_id, path) VALUES (?, ?)")
                .bind(&storage_id)
                .bind(&local.path)
                .execute(conn)
                .await?;
        }
        StorageVariant::S3(s3) => {
            sqlx::query(
                r#"
                INSERT INTO s3_storages
                    (storage_id, s3_bucket, s3_region, s3_access_key, s3_secret_key, s3_endpoint, s3_prefix)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&storage_id)
            .bind(&s3.s3_bucket)
            .bind(&s3.s3_region)
            .bind(&s3.s3_access_key)
            .bind(&s3.s3_secret_key)
            .bind(&s3.s3_endpoint)
            .bind(&s3.s3_prefix)
            .execute(conn)
            .await?;
        }
        StorageVariant::GoogleDrive(drive) => {
            sqlx::query(
                "INSERT INTO google_drive_storages (storage_id, client_id, client_secret, token_json) VALUES (?, ?, ?, ?)",
            )
            .bind(&storage_id)
            .bind(&drive.client_id)
            .bind(&drive.client_secret)
            .bind(&drive.token_json)
            .execute(conn)
            .await?;
        }
        StorageVariant::Nas(nas) => {
            sqlx::query(
                r#"
                INSERT INTO nas_storages
                    (storage_id, host, port, share, username, password, use_ssl, domain, path)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&storage_id)
            .bind(&nas.host)
            .bind(i64::from(nas.port))
            .bind(&nas.share)
            .bind(&nas.username)
            .bind(&nas.password)
            .bind(nas.use_ssl)
            .bind(&nas.domain)
            .bind(&nas.path)
            .execute(conn)
            .await?;
        }
        StorageVariant::AzureBlob(azure) => {
            sqlx::query(
                r#"
                INSERT INTO azure_blob_storages
                    (storage_id, auth_method, connection_string, account_name, account_key, container_name, endpoint, prefix)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&storage_id)
            .bind(auth_method_name(azure.auth_method))
            .bind(&azure.connection_string)
            .bind(&azure.account_name)
            .bind(&azure.account_key)
            .bind(&azure.container_name)
            .bind(&azure.endpoint)
            .bind(&azure.prefix)
            .execute(conn)
            .await?;
        }
        StorageVariant::Ftp(ftp) => {
            sqlx::query(
                r#"
                INSERT INTO ftp_storages (storage_id, host, port, username, password, use_ssl, path)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&storage_id)
            .bind(&ftp.host)
            .bind(i64::from(ftp.port))
            .bind(&ftp.username)
            .bind(&ftp.password)
            .bind(ftp.use_ssl)
            .bind(&ftp.path)
            .execute(conn)
            .await?;
        }
        StorageVariant::Multi(multi) => {
            sqlx::query("INSERT INTO multi_storages (storage_id, primary_id, secondary_id) VALUES (?, ?, ?)")
                .bind(&storage_id)
                .bind(multi.primary_id.to_string())
                .bind(multi.secondary_id.to_string())
                .execute(conn)
                .await?;
        }
    }

    Ok(())
}

fn parse_uuid(value: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StorageError::Persistence {
        message: format!("invalid id {:?} in database: {}", value, e),
    })
}

fn parse_port(value: i64) -> StorageResult<u16> {
    u16::try_from(value).map_err(|_| StorageError::Persistence {
        message: format!("invalid port {} in database", value),
    })
}

fn auth_method_name(method: AzureAuthMethod) -> &'static str {
    match method {
        AzureAuthMethod::ConnectionString => "CONNECTION_STRING",
        AzureAuthMethod::AccountKey => "ACCOUNT_KEY",
    }
}

fn parse_auth_method(value: &str) -> StorageResult<AzureAuthMethod> {
    match value {
        "CONNECTION_STRING" => Ok(AzureAuthMethod::ConnectionString),
        "ACCOUNT_KEY" => Ok(AzureAuthMethod::AccountKey),
        other => Err(StorageError::Persistence {
            message: format!("unknown Azure auth method {:?} in database", other),
        }),
    }
}
