use arbor::walker::handler_fn;
use arbor::{
    MemoryFileSystem, TrackerService, Url, WalkItem, Walker, WalkerError, WalkerThread,
    WalkerTiming,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::integration::support::{tracker, url};

/// Slow enough that only fast laps finish within a test's waiting time.
fn slow_timing() -> WalkerTiming {
    WalkerTiming {
        base_interval: Duration::from_millis(200),
        callback_cost_cap: Duration::from_millis(50),
        lap_interval: Duration::from_secs(60),
        poll_interval: Duration::from_millis(5),
        fresh_lap_timeout: Duration::from_secs(10),
    }
}

fn sample_fs() -> Arc<MemoryFileSystem> {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.write(&url("/a/one.txt"), "1");
    fs.write(&url("/a/b/two.txt"), "2");
    fs.write(&url("/c/three.txt"), "3");
    fs
}

fn recording_handler(seen: Arc<Mutex<Vec<WalkItem>>>) -> Arc<dyn arbor::WalkHandler> {
    handler_fn(move |item: WalkItem| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().push(item);
            Ok(())
        }
    })
}

#[tokio::test]
async fn fresh_lap_reflects_changes_made_before_the_call() {
    let fs = sample_fs();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let walker = WalkerThread::spawn(
        Walker::new(fs.clone()),
        Url::root(),
        slow_timing(),
        recording_handler(Arc::clone(&seen)),
    );
    walker.wait_for_fresh_lap().await.unwrap();

    fs.write(&url("/c/d/new.txt"), "new");
    seen.lock().clear();
    walker.wait_for_fresh_lap().await.unwrap();

    let items = seen.lock().clone();
    let listing = items
        .iter()
        .find(|item| item.url == url("/c/d"))
        .expect("new directory was visited");
    assert_eq!(listing.entries[0].0, "new.txt");
    walker.shutdown().await;
}

#[tokio::test]
async fn walker_feeds_the_tracker_through_the_service() {
    let fs = sample_fs();
    let tracker = Arc::new(tracker());
    let service = TrackerService::spawn(Arc::clone(&tracker)).unwrap();
    let walker = WalkerThread::spawn(
        Walker::new(fs.clone()),
        Url::root(),
        slow_timing(),
        Arc::new(service.handle()),
    );
    walker.wait_for_fresh_lap().await.unwrap();
    assert!(tracker.get_node(&url("/a/b/two.txt")).unwrap().is_some());

    fs.remove(&url("/a"));
    walker.wait_for_fresh_lap().await.unwrap();
    assert!(tracker.get_node(&url("/a/b/two.txt")).unwrap().is_none());
    assert_eq!(
        tracker.enumerate_all_files(&Url::root()).unwrap(),
        vec![url("/c"), url("/c/three.txt")]
    );

    walker.shutdown().await;
    service.shutdown();
}

#[tokio::test]
async fn callback_failures_do_not_stop_the_lap() {
    let fs = sample_fs();
    let seen = Arc::new(Mutex::new(Vec::<Url>::new()));
    let recorder = Arc::clone(&seen);
    let handler = handler_fn(move |item: WalkItem| {
        let recorder = Arc::clone(&recorder);
        async move {
            recorder.lock().push(item.url.clone());
            if item.url == Url::parse("/a") {
                anyhow::bail!("cannot handle {}", item.url);
            }
            if item.url == Url::parse("/c") {
                panic!("handler bug");
            }
            Ok(())
        }
    });
    let walker = WalkerThread::spawn(Walker::new(fs), Url::root(), slow_timing(), handler);
    walker.wait_for_fresh_lap().await.unwrap();

    let visited = seen.lock().clone();
    assert!(visited.contains(&url("/a/b")));
    assert!(visited.contains(&url("/c")));
    assert!(walker.laps_completed() >= 2);
    walker.shutdown().await;
}

#[tokio::test]
async fn root_listing_failure_aborts_the_lap() {
    let fs = sample_fs();
    fs.fail_listing(&Url::root());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let walker = WalkerThread::spawn(
        Walker::new(fs.clone()),
        Url::root(),
        slow_timing(),
        recording_handler(Arc::clone(&seen)),
    );

    let result = walker
        .wait_for_fresh_lap_within(Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(WalkerError::Timeout(_))));
    assert_eq!(walker.laps_completed(), 0);
    assert!(seen.lock().is_empty());

    fs.clear_failures();
    walker.wait_for_fresh_lap().await.unwrap();
    assert!(!seen.lock().is_empty());
    walker.shutdown().await;
}

#[tokio::test]
async fn shutdown_from_inside_the_callback() {
    let fs = sample_fs();
    let slot: Arc<OnceLock<Arc<WalkerThread>>> = Arc::new(OnceLock::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let handler = {
        let slot = Arc::clone(&slot);
        let calls = Arc::clone(&calls);
        handler_fn(move |_item: WalkItem| {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(walker) = slot.get() {
                    walker.shutdown().await;
                }
                Ok(())
            }
        })
    };
    let walker = Arc::new(WalkerThread::spawn(
        Walker::new(fs),
        Url::root(),
        slow_timing(),
        handler,
    ));
    let _ = slot.set(Arc::clone(&walker));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !walker.is_stopped() {
            walker.request_fast_lap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), walker.shutdown())
        .await
        .unwrap();
    let after_shutdown = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_shutdown);
    assert!(matches!(
        walker.wait_for_fresh_lap().await,
        Err(WalkerError::Stopped)
    ));
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let walker = WalkerThread::spawn(
        Walker::new(sample_fs()),
        Url::root(),
        WalkerTiming::default(),
        recording_handler(Arc::new(Mutex::new(Vec::new()))),
    );
    walker.shutdown().await;
    walker.shutdown().await;
    assert!(walker.is_stopped());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn concurrent_shutdowns_both_wait_for_the_loop() {
    let inflight = Arc::new(AtomicUsize::new(0));
    let handler = {
        let inflight = Arc::clone(&inflight);
        handler_fn(move |_item: WalkItem| {
            let inflight = Arc::clone(&inflight);
            async move {
                inflight.fetch_add(1, Ordering::SeqCst);
                // Blocks the loop so cancellation cannot be observed until it returns.
                std::thread::sleep(Duration::from_millis(200));
                inflight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let walker = Arc::new(WalkerThread::spawn(
        Walker::new(sample_fs()),
        Url::root(),
        slow_timing(),
        handler,
    ));
    while inflight.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let first = {
        let walker = Arc::clone(&walker);
        tokio::spawn(async move { walker.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    walker.shutdown().await;
    assert_eq!(inflight.load(Ordering::SeqCst), 0);
    first.await.unwrap();
}
