use arbor::{AttachedData, DeletionPolicy, FileChangeKind, Hint, TrackerError, TrackerService};
use std::collections::HashMap;
use std::sync::Arc;

use crate::integration::support::{file, tracker, url};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn published_batches_follow_commit_order() {
    let tracker = Arc::new(tracker());
    let mut receiver = tracker.subscribe();
    let service = TrackerService::spawn(Arc::clone(&tracker)).unwrap();

    let mut tasks = Vec::new();
    for task in 0..8 {
        let handle = service.handle();
        tasks.push(tokio::spawn(async move {
            for round in 0..5 {
                let path = url(&format!("/t{}/f{}", task, round));
                handle
                    .commit_hint(Hint::file(path.clone(), Some(file("1", "1"))))
                    .await
                    .unwrap();
                handle.commit_hint(Hint::deleted(path)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every path must be seen created before it is seen deleted.
    let mut state: HashMap<String, FileChangeKind> = HashMap::new();
    let mut batches = 0;
    while let Ok(batch) = receiver.try_recv() {
        batches += 1;
        for event in batch.iter() {
            let previous = state.insert(event.url.to_string(), event.kind);
            match event.kind {
                FileChangeKind::Created => assert_ne!(previous, Some(FileChangeKind::Created)),
                FileChangeKind::Deleted => assert_eq!(previous, Some(FileChangeKind::Created)),
                FileChangeKind::Changed => panic!("unexpected change event"),
            }
        }
    }
    assert_eq!(batches, 80);
    assert!(state.values().all(|kind| *kind == FileChangeKind::Deleted));
    assert!(tracker.enumerate_all_files(&url("/")).unwrap().is_empty());

    service.shutdown();
}

#[tokio::test]
async fn handle_forwards_attach_and_detach() {
    let tracker = Arc::new(tracker());
    let service = TrackerService::spawn(Arc::clone(&tracker)).unwrap();
    let handle = service.handle();
    let record = file("1", "1");

    handle
        .commit_hint(Hint::file(url("/f"), Some(record.clone())))
        .await
        .unwrap();
    let data = AttachedData::new("k", b"v".to_vec(), DeletionPolicy::Manual);
    handle
        .attach_data(url("/f"), record.clone(), data.clone(), false)
        .await
        .unwrap();
    assert!(matches!(
        handle
            .attach_data(url("/f"), record, data.clone(), false)
            .await,
        Err(TrackerError::AttachmentExists { .. })
    ));
    assert_eq!(
        handle.detach_data(url("/f"), "k".to_string()).await.unwrap(),
        Some(data)
    );
    assert!(handle.tracker().get_metadata(&url("/f")).unwrap().is_empty());

    service.shutdown();
}

#[tokio::test]
async fn handle_fails_after_shutdown() {
    let tracker = Arc::new(tracker());
    let service = TrackerService::spawn(tracker).unwrap();
    let handle = service.handle();
    service.shutdown();

    let result = handle
        .commit_hint(Hint::file(url("/late"), Some(file("1", "1"))))
        .await;
    assert!(matches!(result, Err(TrackerError::ServiceStopped)));
}
