mod common;

use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use backup_storages::encryption::is_encrypted;
use backup_storages::storage::{
    FtpStorage, GoogleDriveStorage, MultiStorage, S3Storage, Storage, StorageError, StorageType, StorageVariant,
};
use common::StorageTestUtils;

fn s3(access: &str, secret: &str) -> StorageVariant {
    StorageVariant::S3(S3Storage {
        s3_bucket: "backups".to_string(),
        s3_region: "eu-central-1".to_string(),
        s3_access_key: access.to_string(),
        s3_secret_key: secret.to_string(),
        ..Default::default()
    })
}

#[cfg(unix)]
fn set_read_only(path: &Path, read_only: bool) {
    use std::os::unix::fs::PermissionsExt;
    let mode = if read_only { 0o555 } else { 0o755 };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    let marker = path.join(".marker");
    match std::fs::write(&marker, b"x") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_replicated_backup_end_to_end() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();
    let cancel = CancellationToken::new();

    let d1 = dir.path().join("d1");
    let d2 = dir.path().join("d2");
    std::fs::create_dir_all(&d1).unwrap();
    std::fs::create_dir_all(&d2).unwrap();

    let x = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "x", &d1))
        .await
        .unwrap();
    let y = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "y", &d2))
        .await
        .unwrap();
    let z = service
        .save_storage(
            workspace_id,
            Storage::new(workspace_id, "z", StorageVariant::Multi(MultiStorage::new(x.id, y.id))),
        )
        .await
        .unwrap();
    assert_eq!(z.storage_type(), StorageType::Multi);

    let first = Uuid::new_v4();
    service
        .save_file(&cancel, z.id, first, StorageTestUtils::reader(b"42"))
        .await
        .unwrap();
    assert_eq!(std::fs::read(d1.join(first.to_string())).unwrap(), b"42");
    assert_eq!(std::fs::read(d2.join(first.to_string())).unwrap(), b"42");

    let content = StorageTestUtils::read_all(service.get_file(z.id, first).await.unwrap()).await;
    assert_eq!(content, b"42");

    service.delete_file(z.id, first).await.unwrap();
    assert!(!d1.join(first.to_string()).exists());
    assert!(!d2.join(first.to_string()).exists());

    #[cfg(unix)]
    {
        set_read_only(&d2, true);
        if is_writable(&d2) {
            // permission bits are not enforced for this user
            set_read_only(&d2, false);
            return;
        }

        let second = Uuid::new_v4();
        let err = service
            .save_file(&cancel, z.id, second, StorageTestUtils::reader(b"43"))
            .await
            .unwrap_err();
        set_read_only(&d2, false);

        assert!(matches!(err, StorageError::PartialReplication { .. }));
        assert_eq!(std::fs::read(d1.join(second.to_string())).unwrap(), b"43");
        assert!(!d2.join(second.to_string()).exists());

        let recorded = service.get_storage(z.id).await.unwrap();
        assert!(recorded.last_save_error.is_some());
    }
}

#[tokio::test]
async fn test_secrets_are_encrypted_at_rest_and_hidden_on_read() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let saved = service
        .save_storage(workspace_id, Storage::new(workspace_id, "offsite", s3("AKIAEXAMPLE", "top-secret")))
        .await
        .unwrap();

    // the returned record is already redacted
    match &saved.variant {
        StorageVariant::S3(s3) => {
            assert!(s3.s3_access_key.is_empty());
            assert!(s3.s3_secret_key.is_empty());
        }
        other => panic!("expected S3 storage, got {:?}", other),
    }

    let stored = service.repository().find_by_id(saved.id).await.unwrap();
    match &stored.variant {
        StorageVariant::S3(s3) => {
            assert!(is_encrypted(&s3.s3_access_key));
            assert!(is_encrypted(&s3.s3_secret_key));
            assert_eq!(service.encryptor().decrypt(&s3.s3_access_key).unwrap(), "AKIAEXAMPLE");
            assert_eq!(service.encryptor().decrypt(&s3.s3_secret_key).unwrap(), "top-secret");
        }
        other => panic!("expected S3 storage, got {:?}", other),
    }

    let listed = service.get_storages(workspace_id).await.unwrap();
    assert_eq!(listed.len(), 1);
    let json = serde_json::to_string(&listed).unwrap();
    assert!(!json.contains("enc:"));
    assert!(!json.contains("top-secret"));
}

#[tokio::test]
async fn test_secret_with_encrypted_prefix_is_still_encrypted() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let ftp = StorageVariant::Ftp(FtpStorage {
        host: "ftp.example.com".to_string(),
        username: "backup".to_string(),
        password: "enc:MyRealPassword".to_string(),
        ..Default::default()
    });
    let saved = service
        .save_storage(workspace_id, Storage::new(workspace_id, "ftp", ftp))
        .await
        .unwrap();

    let stored = service.repository().find_by_id(saved.id).await.unwrap();
    match &stored.variant {
        StorageVariant::Ftp(f) => {
            assert_ne!(f.password, "enc:MyRealPassword");
            assert_eq!(service.encryptor().decrypt(&f.password).unwrap(), "enc:MyRealPassword");
        }
        other => panic!("expected FTP storage, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_with_blank_secret_keeps_stored_value() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let saved = service
        .save_storage(workspace_id, Storage::new(workspace_id, "offsite", s3("AKIAEXAMPLE", "top-secret")))
        .await
        .unwrap();

    let mut edit = Storage::new(workspace_id, "offsite-renamed", s3("", ""));
    edit.id = saved.id;
    let updated = service.save_storage(workspace_id, edit).await.unwrap();
    assert_eq!(updated.name, "offsite-renamed");

    let stored = service.repository().find_by_id(saved.id).await.unwrap();
    match &stored.variant {
        StorageVariant::S3(s3) => {
            assert_eq!(service.encryptor().decrypt(&s3.s3_secret_key).unwrap(), "top-secret");
        }
        other => panic!("expected S3 storage, got {:?}", other),
    }

    // a new secret replaces the stored one
    let mut rotate = Storage::new(workspace_id, "offsite-renamed", s3("", "rotated"));
    rotate.id = saved.id;
    service.save_storage(workspace_id, rotate).await.unwrap();

    let stored = service.repository().find_by_id(saved.id).await.unwrap();
    match &stored.variant {
        StorageVariant::S3(s3) => {
            assert_eq!(service.encryptor().decrypt(&s3.s3_access_key).unwrap(), "AKIAEXAMPLE");
            assert_eq!(service.encryptor().decrypt(&s3.s3_secret_key).unwrap(), "rotated");
        }
        other => panic!("expected S3 storage, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_from_other_workspace_is_rejected() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let saved = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "x", dir.path()))
        .await
        .unwrap();

    let mut edit = StorageTestUtils::local(workspace_id, "hijacked", dir.path());
    edit.id = saved.id;
    let err = service.save_storage(Uuid::new_v4(), edit).await.unwrap_err();
    assert!(matches!(err, StorageError::Validation { .. }));

    assert_eq!(service.get_storage(saved.id).await.unwrap().name, "x");
}

#[tokio::test]
async fn test_google_drive_token_is_checked_after_encryption() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let drive = |token: &str| {
        Storage::new(
            workspace_id,
            "drive",
            StorageVariant::GoogleDrive(GoogleDriveStorage {
                client_id: "client.apps.googleusercontent.com".to_string(),
                client_secret: "shh".to_string(),
                token_json: token.to_string(),
                ..Default::default()
            }),
        )
    };

    service
        .save_storage(workspace_id, drive(r#"{"access_token":"a","refresh_token":"r"}"#))
        .await
        .unwrap();

    let err = service
        .save_storage(workspace_id, drive(r#"{"access_token":"a"}"#))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Validation { .. }));
}

#[tokio::test]
async fn test_multi_storage_reference_rules() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();
    let other_workspace = Uuid::new_v4();

    let x = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "x", &dir.path().join("x")))
        .await
        .unwrap();
    let y = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "y", &dir.path().join("y")))
        .await
        .unwrap();
    let foreign = service
        .save_storage(
            other_workspace,
            StorageTestUtils::local(other_workspace, "foreign", &dir.path().join("foreign")),
        )
        .await
        .unwrap();
    let z = service
        .save_storage(
            workspace_id,
            Storage::new(workspace_id, "z", StorageVariant::Multi(MultiStorage::new(x.id, y.id))),
        )
        .await
        .unwrap();

    let multi = |primary: Uuid, secondary: Uuid| {
        Storage::new(workspace_id, "candidate", StorageVariant::Multi(MultiStorage::new(primary, secondary)))
    };

    let same = service.save_storage(workspace_id, multi(x.id, x.id)).await.unwrap_err();
    assert!(matches!(same, StorageError::Validation { .. }));

    let nested = service.save_storage(workspace_id, multi(z.id, y.id)).await.unwrap_err();
    assert!(matches!(nested, StorageError::Validation { .. }));

    let cross = service.save_storage(workspace_id, multi(x.id, foreign.id)).await.unwrap_err();
    assert!(matches!(cross, StorageError::Validation { .. }));

    let missing_id = Uuid::new_v4();
    let missing = service.save_storage(workspace_id, multi(x.id, missing_id)).await.unwrap_err();
    assert!(missing.is_not_found());
    assert!(missing.to_string().contains(&missing_id.to_string()));

    let mut self_ref = multi(z.id, y.id);
    self_ref.id = z.id;
    let err = service.save_storage(workspace_id, self_ref).await.unwrap_err();
    assert!(matches!(err, StorageError::Validation { .. }));

    // nothing rejected was persisted
    assert_eq!(service.get_storages(workspace_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_connection_outcome_is_recorded() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let blocker = dir.path().join("plain-file");
    std::fs::write(&blocker, b"x").unwrap();

    let saved = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "broken", &blocker))
        .await
        .unwrap();

    let err = service.test_storage_connection(saved.id).await.unwrap_err();
    assert!(matches!(err, StorageError::Connection { .. }));
    let recorded = service.get_storage(saved.id).await.unwrap();
    assert!(recorded.last_save_error.is_some());

    let mut fixed = StorageTestUtils::local(workspace_id, "broken", &dir.path().join("ok"));
    fixed.id = saved.id;
    service.save_storage(workspace_id, fixed).await.unwrap();

    service.test_storage_connection(saved.id).await.unwrap();
    assert!(service.get_storage(saved.id).await.unwrap().last_save_error.is_none());
}

#[tokio::test]
async fn test_direct_connection_check_does_not_persist() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let target = dir.path().join("direct");
    service
        .test_storage_connection_direct(StorageTestUtils::local(workspace_id, "draft", &target))
        .await
        .unwrap();
    assert!(target.is_dir());
    assert!(service.get_storages(workspace_id).await.unwrap().is_empty());

    // pending edits of a saved storage are checked without being saved
    let saved = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "saved", &target))
        .await
        .unwrap();
    let blocker = dir.path().join("plain-file");
    std::fs::write(&blocker, b"x").unwrap();

    let mut edit = StorageTestUtils::local(workspace_id, "saved", &blocker);
    edit.id = saved.id;
    assert!(service.test_storage_connection_direct(edit).await.is_err());

    match service.repository().find_by_id(saved.id).await.unwrap().variant {
        StorageVariant::Local(local) => assert_eq!(local.path, target.to_string_lossy()),
        other => panic!("expected local storage, got {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_storage() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();

    let saved = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "x", dir.path()))
        .await
        .unwrap();

    service.delete_storage(saved.id).await.unwrap();
    assert!(service.get_storage(saved.id).await.unwrap_err().is_not_found());
    assert!(service.delete_storage(saved.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_workspace_deletion_removes_only_its_storages() {
    let dir = TempDir::new().unwrap();
    let service = StorageTestUtils::service(&dir).await;
    let workspace_id = Uuid::new_v4();
    let other_workspace = Uuid::new_v4();

    let x = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "x", &dir.path().join("x")))
        .await
        .unwrap();
    let y = service
        .save_storage(workspace_id, StorageTestUtils::local(workspace_id, "y", &dir.path().join("y")))
        .await
        .unwrap();
    service
        .save_storage(
            workspace_id,
            Storage::new(workspace_id, "z", StorageVariant::Multi(MultiStorage::new(x.id, y.id))),
        )
        .await
        .unwrap();
    service
        .save_storage(other_workspace, StorageTestUtils::local(other_workspace, "keep", dir.path()))
        .await
        .unwrap();

    service.on_before_workspace_deletion(workspace_id).await.unwrap();

    assert!(service.get_storages(workspace_id).await.unwrap().is_empty());
    assert_eq!(service.get_storages(other_workspace).await.unwrap().len(), 1);
}
