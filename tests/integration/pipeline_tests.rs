use tokio_util::sync::CancellationToken;

use manga_ingest::activity::{Activity, ActivityLog, ActivitySnapshot, RecentActivity};
use manga_ingest::db::models::{FileKind, FileStatus};
use manga_ingest::db::queries::{chapters, files, pages, series};
use manga_ingest::ingest::pipeline::PipelineError;

use super::*;

async fn upload(env: &TestEnv, name: &str, data: &[u8], series_id: Option<i64>) -> i64 {
    env.ingestor
        .accept_upload(&uploader(1), name, data, series_id)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn named_archive_becomes_ordered_chapter() {
    let env = setup().await;
    let file_id = upload(
        &env,
        "[Group] Title - Chapter 5 - Subtitle.zip",
        &three_page_zip(),
        None,
    )
    .await;

    let done = env
        .ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.page_count, 3);
    assert_eq!(done.skipped_pages, 0);

    let s = series::get_by_id(&env.pool, done.series_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(s.title, "Title");
    assert_eq!(s.chapter_count, 1);
    assert_eq!(s.created_by, 1);
    let cover = s.cover_path.expect("first chapter should produce a cover");
    let cover_img = image::open(env.storage_path(&cover)).unwrap();
    assert_eq!((cover_img.width(), cover_img.height()), (300, 450));

    let chapter = chapters::get_by_id(&env.pool, done.chapter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chapter.number, 5.0);
    assert_eq!(chapter.title, "Subtitle");
    assert_eq!(chapter.page_count, 3);
    assert_eq!(chapter.status, "published");

    let stored = pages::get_by_chapter(&env.pool, done.chapter_id)
        .await
        .unwrap();
    let numbers: Vec<i64> = stored.iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    // page1, page2, page10 in natural order
    let widths: Vec<i64> = stored.iter().map(|p| p.width).collect();
    assert_eq!(widths, vec![10, 20, 30]);
    for page in &stored {
        assert_eq!(page.mime_type, "image/jpeg");
        assert!(env.storage_path(&page.image_path).is_file());
    }

    let file = files::get_by_id(&env.pool, file_id).await.unwrap().unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Processed));
    assert_eq!(file.series_id, Some(done.series_id));
    assert!(file.error_message.is_none());

    assert_eq!(env.ingestor.quota().usage(1).await.unwrap().series_created, 1);
}

#[tokio::test]
async fn archive_without_images_leaves_no_catalog_records() {
    let env = setup().await;
    let data = build_zip(&[
        ("readme.txt", b"hello".to_vec()),
        ("__MACOSX/._cover.jpg", b"junk".to_vec()),
    ]);
    let file_id = upload(&env, "Empty - Chapter 1.zip", &data, None).await;

    let err = env
        .ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoImages), "got {err:?}");

    let file = files::get_by_id(&env.pool, file_id).await.unwrap().unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Failed));
    assert!(
        file.error_message
            .as_deref()
            .unwrap()
            .contains("no valid images")
    );
    assert_eq!(series::count(&env.pool).await.unwrap(), 0);
    assert_eq!(chapters::count(&env.pool).await.unwrap(), 0);
    assert_eq!(pages::count(&env.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn undecodable_images_only_discards_new_series() {
    let env = setup().await;
    let data = build_zip(&[
        ("01.png", b"not really a png".to_vec()),
        ("02.jpg", b"nor a jpeg".to_vec()),
    ]);
    let file_id = upload(&env, "Broken - Chapter 2.zip", &data, None).await;

    let result = env
        .ingestor
        .process_file(file_id, &CancellationToken::new())
        .await;
    assert!(!result.success);
    assert!(result.message.contains("no valid images"));

    assert_eq!(series::count(&env.pool).await.unwrap(), 0);
    assert_eq!(chapters::count(&env.pool).await.unwrap(), 0);
    assert_eq!(env.ingestor.quota().usage(1).await.unwrap().series_created, 0);
}

#[tokio::test]
async fn bad_pages_are_skipped_and_numbering_stays_contiguous() {
    let env = setup().await;
    let data = build_zip(&[
        ("p1.png", png(10, 10)),
        ("p2.png", b"corrupt".to_vec()),
        ("p3.png", png(30, 10)),
    ]);
    let file_id = upload(&env, "Mixed - 4.zip", &data, None).await;

    let done = env
        .ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.page_count, 2);
    assert_eq!(done.skipped_pages, 1);

    let stored = pages::get_by_chapter(&env.pool, done.chapter_id)
        .await
        .unwrap();
    let numbered: Vec<(i64, i64)> = stored.iter().map(|p| (p.number, p.width)).collect();
    assert_eq!(numbered, vec![(1, 10), (2, 30)]);
}

#[tokio::test]
async fn large_pages_are_downscaled() {
    let env = setup_with(|c| c.processing.max_page_dimension_px = 50).await;
    let data = build_zip(&[("1.png", png(200, 100))]);
    let file_id = upload(&env, "Big - 1.zip", &data, None).await;

    let done = env
        .ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap();
    let page = &pages::get_by_chapter(&env.pool, done.chapter_id)
        .await
        .unwrap()[0];
    assert_eq!((page.width, page.height), (50, 25));
}

#[tokio::test]
async fn sidecar_fills_what_the_filename_lacks() {
    let env = setup().await;
    let comic_info = br#"<?xml version="1.0"?>
<ComicInfo>
  <Series>Sidecar Series</Series>
  <Number>3</Number>
  <Writer>Tsutomu Nihei</Writer>
  <Year>1997</Year>
</ComicInfo>"#;
    let data = build_zip(&[("ComicInfo.xml", comic_info.to_vec()), ("1.png", png(8, 8))]);
    let file_id = upload(&env, "Blame.cbz", &data, None).await;

    let done = env
        .ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap();

    let s = series::get_by_id(&env.pool, done.series_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(s.title, "Blame");
    assert_eq!(s.author.as_deref(), Some("Tsutomu Nihei"));
    assert_eq!(s.year, Some(1997));

    let chapter = chapters::get_by_id(&env.pool, done.chapter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chapter.number, 3.0);
    assert_eq!(chapter.title, "Chapter 3");
}

#[tokio::test]
async fn chapters_join_an_existing_series() {
    let env = setup().await;
    let first = upload(&env, "Title - Chapter 1.zip", &three_page_zip(), None).await;
    let done = env
        .ingestor
        .process_now(&moderator(9), first, &CancellationToken::new())
        .await
        .unwrap();
    let cover_before = series::get_by_id(&env.pool, done.series_id)
        .await
        .unwrap()
        .unwrap()
        .cover_path;

    let second_data = build_zip(&[("1.png", png(16, 16))]);
    let second = upload(&env, "Title - Chapter 2.zip", &second_data, Some(done.series_id)).await;
    let done2 = env
        .ingestor
        .process_now(&moderator(9), second, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done2.series_id, done.series_id);

    let s = series::get_by_id(&env.pool, done.series_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(s.chapter_count, 2);
    assert_eq!(s.cover_path, cover_before);
    assert_eq!(series::count(&env.pool).await.unwrap(), 1);
    assert_eq!(env.ingestor.quota().usage(1).await.unwrap().series_created, 1);

    let numbers: Vec<f64> = chapters::get_by_series(&env.pool, done.series_id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.number)
        .collect();
    assert_eq!(numbers, vec![1.0, 2.0]);
}

#[tokio::test]
async fn existing_chapter_number_is_never_overwritten() {
    let env = setup().await;
    let first = upload(&env, "Title - Chapter 7.zip", &three_page_zip(), None).await;
    let done = env
        .ingestor
        .process_now(&moderator(9), first, &CancellationToken::new())
        .await
        .unwrap();

    let again = build_zip(&[("1.png", png(9, 9))]);
    let second = upload(&env, "Title - Chapter 7 - Again.zip", &again, Some(done.series_id)).await;
    let err = env
        .ingestor
        .process_now(&moderator(9), second, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::ChapterExists { number, .. } if number == 7.0),
        "got {err:?}"
    );

    let chapter = chapters::get_by_id(&env.pool, done.chapter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chapter.page_count, 3);
    assert_eq!(series::count(&env.pool).await.unwrap(), 1);
    assert_eq!(chapters::count(&env.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn processed_file_is_not_processed_again() {
    let env = setup().await;
    let file_id = upload(&env, "Once - 1.zip", &three_page_zip(), None).await;
    let cancel = CancellationToken::new();

    env.ingestor
        .process_now(&moderator(9), file_id, &cancel)
        .await
        .unwrap();
    let err = env
        .ingestor
        .process_now(&moderator(9), file_id, &cancel)
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::AlreadyProcessed { ref status, .. } if status == "processed"),
        "got {err:?}"
    );
    assert_eq!(chapters::count(&env.pool).await.unwrap(), 1);
    assert_eq!(pages::count(&env.pool).await.unwrap(), 3);

    let err = env
        .ingestor
        .process_now(&moderator(9), 404, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(404)), "got {err:?}");
}

#[tokio::test]
async fn failed_file_can_be_retried_explicitly() {
    let env = setup().await;
    let file_id = upload(&env, "Retry - 1.zip", &three_page_zip(), None).await;
    files::set_status(&env.pool, file_id, FileStatus::Failed, Some("earlier failure"))
        .await
        .unwrap();

    let result = env
        .ingestor
        .process_file(file_id, &CancellationToken::new())
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.page_count, 3);

    let file = files::get_by_id(&env.pool, file_id).await.unwrap().unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Processed));
    assert!(file.error_message.is_none());
}

#[tokio::test]
async fn rar_uploads_fail_as_unsupported() {
    let env = setup().await;
    let mut data = b"Rar!\x1a\x07\x00".to_vec();
    data.extend_from_slice(&[0u8; 64]);
    let file_id = upload(&env, "Title - 3.cbr", &data, None).await;

    let err = env
        .ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::UnsupportedFormat(FileKind::Rar)),
        "got {err:?}"
    );
    let file = files::get_by_id(&env.pool, file_id).await.unwrap().unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Failed));
    assert_eq!(series::count(&env.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_before_claim_leaves_file_pending() {
    let env = setup().await;
    let file_id = upload(&env, "Later - 1.zip", &three_page_zip(), None).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = env
        .ingestor
        .process_now(&moderator(9), file_id, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { pages: 0 }), "got {err:?}");

    let file = files::get_by_id(&env.pool, file_id).await.unwrap().unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Pending));
}

#[tokio::test]
async fn scratch_space_is_cleaned_up() {
    let env = setup().await;
    let file_id = upload(&env, "Tidy - 1.zip", &three_page_zip(), None).await;
    env.ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap();

    let leftovers = std::fs::read_dir(env.scratch_path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn names_that_clean_to_nothing_still_get_a_title() {
    let env = setup().await;
    let underscore = upload(&env, "_.zip", &three_page_zip(), None).await;
    let blank = upload(&env, "  .cbz", &build_zip(&[("1.png", png(8, 8))]), None).await;

    for (file_id, expected) in [(underscore, "_"), (blank, "Untitled")] {
        let done = env
            .ingestor
            .process_now(&moderator(9), file_id, &CancellationToken::new())
            .await
            .unwrap();
        let s = series::get_by_id(&env.pool, done.series_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.title, expected);
    }
}

/// Cancels `token` as soon as the first page of a file is stored.
struct CancelAfterFirstPage {
    token: CancellationToken,
    inner: RecentActivity,
}

impl ActivityLog for CancelAfterFirstPage {
    fn record(&self, activity: Activity) {
        self.inner.record(activity);
    }

    fn snapshot(&self) -> ActivitySnapshot {
        self.inner.snapshot()
    }

    fn page_stored(&self, _file_id: i64, stored: u32) {
        if stored == 1 {
            self.token.cancel();
        }
    }
}

#[tokio::test]
async fn cancellation_mid_run_keeps_stored_pages() {
    let token = CancellationToken::new();
    let env = setup_with_activity(Arc::new(CancelAfterFirstPage {
        token: token.clone(),
        inner: RecentActivity::new(10, Duration::from_secs(3600)),
    }))
    .await;
    let file_id = upload(&env, "Halted - Chapter 4.zip", &three_page_zip(), None).await;

    let err = env
        .ingestor
        .process_now(&moderator(9), file_id, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { pages: 1 }), "got {err:?}");

    let file = files::get_by_id(&env.pool, file_id).await.unwrap().unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Failed));
    assert_eq!(
        file.error_message.as_deref(),
        Some("processing cancelled after 1 pages")
    );

    // The chapter is finalized with the page written before the cancel.
    let series_id = file.series_id.expect("series survives a partial run");
    let chapters = chapters::get_by_series(&env.pool, series_id).await.unwrap();
    assert_eq!(chapters.len(), 1);
    assert_eq!(chapters[0].number, 4.0);
    assert_eq!(chapters[0].page_count, 1);
    assert_eq!(chapters[0].status, "published");

    let stored = pages::get_by_chapter(&env.pool, chapters[0].id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].number, 1);
    assert_eq!(stored[0].width, 10);
    assert!(env.storage_path(&stored[0].image_path).is_file());

    let leftovers = std::fs::read_dir(env.scratch_path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn scratch_space_is_cleaned_up_when_every_page_fails() {
    let env = setup().await;
    let data = build_zip(&[
        ("1.png", b"not a png".to_vec()),
        ("2.png", b"still not a png".to_vec()),
    ]);
    let file_id = upload(&env, "Broken - 1.zip", &data, None).await;

    let err = env
        .ingestor
        .process_now(&moderator(9), file_id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoImages), "got {err:?}");

    let leftovers = std::fs::read_dir(env.scratch_path()).unwrap().count();
    assert_eq!(leftovers, 0);
    assert_eq!(series::count(&env.pool).await.unwrap(), 0);
}
