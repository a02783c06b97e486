use manga_ingest::db::models::FileStatus;
use manga_ingest::db::queries::files;
use manga_ingest::ingest::RemoveError;
use manga_ingest::ingest::validate::IntakeError;
use manga_ingest::policy::{Actor, Role};
use manga_ingest::quota::QuotaError;

use super::*;

#[tokio::test]
async fn accepted_upload_is_stored_and_tracked() {
    let env = setup().await;
    let data = three_page_zip();

    let file = env
        .ingestor
        .accept_upload(&uploader(1), "Title - Chapter 1.cbz", &data, None)
        .await
        .unwrap();

    assert_eq!(file.file_status(), Some(FileStatus::Pending));
    assert_eq!(file.kind, "zip");
    assert_eq!(file.size, data.len() as i64);
    assert_eq!(file.content_hash.len(), 64);
    assert!(file.stored_path.ends_with(".cbz"));
    assert_eq!(std::fs::read(env.storage_path(&file.stored_path)).unwrap(), data);

    let usage = env.ingestor.quota().usage(1).await.unwrap();
    assert_eq!(usage.storage_used, data.len() as i64);
    assert_eq!(usage.uploads_today, 1);
}

#[tokio::test]
async fn duplicate_upload_changes_nothing() {
    let env = setup().await;
    let data = three_page_zip();

    let first = env
        .ingestor
        .accept_upload(&uploader(1), "a.zip", &data, None)
        .await
        .unwrap();
    let before = env.ingestor.quota().usage(2).await.unwrap();

    let err = env
        .ingestor
        .accept_upload(&uploader(2), "b.zip", &data, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, IntakeError::Duplicate { existing_id } if existing_id == first.id),
        "got {err:?}"
    );

    assert_eq!(files::count(&env.pool).await.unwrap(), 1);
    let after = env.ingestor.quota().usage(2).await.unwrap();
    assert_eq!(after.storage_used, before.storage_used);
    assert_eq!(after.uploads_today, before.uploads_today);
}

#[tokio::test]
async fn oversize_upload_is_rejected_before_any_write() {
    let env = setup().await;
    // Uploader limit is 1 MB.
    let mut data = b"PK\x03\x04".to_vec();
    data.resize(1024 * 1024 + 1, 0);

    let err = env
        .ingestor
        .accept_upload(&uploader(1), "big.zip", &data, None)
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::SizeExceeded { .. }), "got {err:?}");

    assert_eq!(files::count(&env.pool).await.unwrap(), 0);
    assert!(!env.storage_path("uploads").exists());
    assert_eq!(env.ingestor.quota().usage(1).await.unwrap().storage_used, 0);
}

#[tokio::test]
async fn type_and_signature_checks() {
    let env = setup().await;

    let err = env
        .ingestor
        .accept_upload(&uploader(1), "setup.exe", &three_page_zip(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::InvalidType(_)), "got {err:?}");

    let err = env
        .ingestor
        .accept_upload(&uploader(1), "fake.cbz", b"not an archive", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::Unreadable), "got {err:?}");

    assert_eq!(files::count(&env.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn rar_signature_is_recorded_as_rar() {
    let env = setup().await;
    let mut data = b"Rar!\x1a\x07\x00".to_vec();
    data.extend_from_slice(&[0u8; 64]);

    let file = env
        .ingestor
        .accept_upload(&uploader(1), "Title - 3.cbr", &data, None)
        .await
        .unwrap();
    assert_eq!(file.kind, "rar");
}

#[tokio::test]
async fn readers_cannot_upload() {
    let env = setup().await;
    let reader = Actor {
        user_id: 5,
        role: Role::Reader,
    };

    let err = env
        .ingestor
        .accept_upload(&reader, "a.zip", &three_page_zip(), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, IntakeError::Quota(QuotaError::UploadNotAllowed(Role::Reader))),
        "got {err:?}"
    );
}

#[tokio::test]
async fn daily_upload_limit_applies() {
    let env = setup_with(|c| c.quota.uploader.daily_uploads = 1).await;

    env.ingestor
        .accept_upload(&uploader(1), "a.zip", &build_zip(&[("1.png", png(4, 4))]), None)
        .await
        .unwrap();
    let err = env
        .ingestor
        .accept_upload(&uploader(1), "b.zip", &build_zip(&[("1.png", png(5, 5))]), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, IntakeError::Quota(QuotaError::DailyLimitReached { limit: 1 })),
        "got {err:?}"
    );
    assert_eq!(files::count(&env.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_series_is_rejected() {
    let env = setup().await;
    let err = env
        .ingestor
        .accept_upload(&uploader(1), "a.zip", &three_page_zip(), Some(99))
        .await
        .unwrap_err();
    assert!(matches!(err, IntakeError::SeriesNotFound(99)), "got {err:?}");
    assert_eq!(files::count(&env.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn remove_upload_releases_blob_and_quota() {
    let env = setup().await;
    let data = three_page_zip();
    let file = env
        .ingestor
        .accept_upload(&uploader(1), "a.zip", &data, None)
        .await
        .unwrap();

    let err = env
        .ingestor
        .remove_upload(&uploader(2), file.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoveError::NotOwner(_)), "got {err:?}");

    env.ingestor
        .remove_upload(&uploader(1), file.id)
        .await
        .unwrap();
    assert!(files::get_by_id(&env.pool, file.id).await.unwrap().is_none());
    assert!(!env.storage_path(&file.stored_path).exists());
    assert_eq!(env.ingestor.quota().usage(1).await.unwrap().storage_used, 0);

    let err = env
        .ingestor
        .remove_upload(&uploader(1), file.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoveError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn moderators_may_remove_any_upload_but_not_while_processing() {
    let env = setup().await;
    let file = env
        .ingestor
        .accept_upload(&uploader(1), "a.zip", &three_page_zip(), None)
        .await
        .unwrap();

    files::set_status(&env.pool, file.id, FileStatus::Processing, None)
        .await
        .unwrap();
    let err = env
        .ingestor
        .remove_upload(&moderator(9), file.id)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoveError::InProgress(_)), "got {err:?}");

    files::set_status(&env.pool, file.id, FileStatus::Failed, Some("boom"))
        .await
        .unwrap();
    env.ingestor
        .remove_upload(&moderator(9), file.id)
        .await
        .unwrap();
    assert_eq!(files::count(&env.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn upload_is_queued_even_if_quota_counters_fail() {
    let mut env = setup().await;
    sqlx::query(
        "CREATE TRIGGER refuse_storage_updates BEFORE UPDATE OF storage_used ON user_quotas \
         BEGIN SELECT RAISE(ABORT, 'quota store unavailable'); END",
    )
    .execute(&env.pool)
    .await
    .unwrap();

    let file = env
        .ingestor
        .accept_upload(&uploader(1), "Kept - 1.zip", &three_page_zip(), None)
        .await
        .unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Pending));

    let receiver = env.take_receiver();
    let worker = env.ingestor.worker(receiver);
    let handle = tokio::spawn(worker.run());
    let done = wait_for_terminal(&env.pool, file.id).await;
    assert_eq!(done.file_status(), Some(FileStatus::Processed));

    env.ingestor.queue().shutdown();
    handle.await.unwrap();
}
