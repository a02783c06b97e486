use std::time::Duration;

use manga_ingest::db::models::FileStatus;
use manga_ingest::db::queries::files;

use super::*;

#[tokio::test]
async fn worker_processes_in_order_and_survives_failures() {
    let mut env = setup().await;
    let receiver = env.take_receiver();
    let worker = env.ingestor.worker(receiver);
    let handle = tokio::spawn(worker.run());

    let a = env
        .ingestor
        .accept_upload(&uploader(1), "Alpha - 1.zip", &three_page_zip(), None)
        .await
        .unwrap();
    let b = env
        .ingestor
        .accept_upload(
            &uploader(1),
            "Empty - 1.zip",
            &build_zip(&[("readme.txt", b"nothing here".to_vec())]),
            None,
        )
        .await
        .unwrap();
    let c = env
        .ingestor
        .accept_upload(
            &uploader(1),
            "Gamma - 1.zip",
            &build_zip(&[("1.png", png(12, 12))]),
            None,
        )
        .await
        .unwrap();

    let a = wait_for_terminal(&env.pool, a.id).await;
    let b = wait_for_terminal(&env.pool, b.id).await;
    let c = wait_for_terminal(&env.pool, c.id).await;

    assert_eq!(a.file_status(), Some(FileStatus::Processed));
    assert_eq!(b.file_status(), Some(FileStatus::Failed));
    assert_eq!(c.file_status(), Some(FileStatus::Processed));
    // Series ids follow processing order.
    assert!(a.series_id.unwrap() < c.series_id.unwrap());

    let snapshot = env.ingestor.activity().snapshot();
    assert_eq!(snapshot.uploads.len(), 3);
    assert_eq!(snapshot.processed.len(), 2);
    assert_eq!(snapshot.failures.len(), 1);

    env.ingestor.queue().shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();
}

#[tokio::test]
async fn recovery_sweep_requeues_interrupted_files() {
    let mut env = setup().await;
    let file = env
        .ingestor
        .accept_upload(&uploader(1), "Resume - 2.zip", &three_page_zip(), None)
        .await
        .unwrap();
    // Simulate a crash mid-run.
    files::set_status(&env.pool, file.id, FileStatus::Processing, None)
        .await
        .unwrap();

    let receiver = env.take_receiver();
    let worker = env.ingestor.worker(receiver);
    assert_eq!(worker.recover().await.unwrap(), 1);
    let reset = files::get_by_id(&env.pool, file.id).await.unwrap().unwrap();
    assert_eq!(reset.file_status(), Some(FileStatus::Pending));

    let handle = tokio::spawn(worker.run());
    let done = wait_for_terminal(&env.pool, file.id).await;
    assert_eq!(done.file_status(), Some(FileStatus::Processed));

    env.ingestor.queue().shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn uploads_after_shutdown_stay_pending() {
    let mut env = setup().await;
    let receiver = env.take_receiver();
    let worker = env.ingestor.worker(receiver);
    env.ingestor.queue().shutdown();

    let file = env
        .ingestor
        .accept_upload(&uploader(1), "Parked - 1.zip", &three_page_zip(), None)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("worker should exit immediately once shut down");

    let file = files::get_by_id(&env.pool, file.id).await.unwrap().unwrap();
    assert_eq!(file.file_status(), Some(FileStatus::Pending));
}

#[tokio::test]
async fn worker_stops_when_every_producer_is_dropped() {
    let mut env = setup().await;
    let receiver = env.take_receiver();
    let worker = env.ingestor.worker(receiver);
    let handle = tokio::spawn(worker.run());

    let file = env
        .ingestor
        .accept_upload(&uploader(1), "Last - 1.zip", &three_page_zip(), None)
        .await
        .unwrap();
    let done = wait_for_terminal(&env.pool, file.id).await;
    assert_eq!(done.file_status(), Some(FileStatus::Processed));

    // No shutdown call: dropping the last queue handle ends the loop.
    drop(env.ingestor);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop once the queue has no producers")
        .unwrap();
}
