use arbor::{
    AttachedData, DeletionPolicy, EventChannel, Hint, HintTracker, TrackerError, TreeIndex, Url,
};
use std::sync::Arc;

use crate::integration::support::{changed, commit, created, deleted, dir, file, tracker, url};

#[test]
fn repeated_hints_are_idempotent() {
    let tracker = tracker();
    let hint = Hint::file(url("/a/b/c"), Some(file("1", "1")));
    assert_eq!(commit(&tracker, hint.clone()), vec![created("/a/b/c")]);
    assert!(commit(&tracker, hint).is_empty());

    let listing = Hint::directory(
        url("/a/b"),
        vec![
            ("c".to_string(), file("1", "1")),
            ("d".to_string(), dir("2")),
        ],
    );
    assert_eq!(commit(&tracker, listing.clone()), vec![created("/a/b/d")]);
    assert!(commit(&tracker, listing).is_empty());
}

#[test]
fn identity_change_replaces_the_node() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/a/b/c"), Some(file("1", "1"))));

    let events = commit(&tracker, Hint::file(url("/a/b/c"), Some(file("2", "2"))));
    assert_eq!(events, vec![deleted("/a/b/c"), created("/a/b/c")]);
}

#[test]
fn content_change_is_reported_as_changed() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/a/b/c"), Some(file("1", "1"))));

    let events = commit(&tracker, Hint::file(url("/a/b/c"), Some(file("1", "2"))));
    assert_eq!(events, vec![changed("/a/b/c")]);
    let node = tracker.get_node(&url("/a/b/c")).unwrap().unwrap();
    assert_eq!(node.content_tag.as_deref(), Some("2"));
}

#[test]
fn directory_replacement_cascades_before_recreation() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/a/b/c"), Some(dir("1"))));
    commit(
        &tracker,
        Hint::directory(url("/a/b/c"), vec![("d".to_string(), file("5", "5"))]),
    );

    let events = commit(&tracker, Hint::file(url("/a/b/c"), Some(dir("2"))));
    assert_eq!(
        events,
        vec![deleted("/a/b/c"), deleted("/a/b/c/d"), created("/a/b/c")]
    );
    assert_eq!(
        tracker.enumerate_all_files(&url("/a/b/c")).unwrap(),
        vec![url("/a/b/c")]
    );
}

#[test]
fn listing_type_flip_replaces_only_that_child() {
    let tracker = tracker();
    commit(
        &tracker,
        Hint::directory(
            url("/x"),
            vec![
                ("e".to_string(), dir("10")),
                ("f".to_string(), file("11", "1")),
            ],
        ),
    );

    let events = commit(
        &tracker,
        Hint::directory(
            url("/x"),
            vec![("e".to_string(), dir("10")), ("f".to_string(), dir("11"))],
        ),
    );
    assert_eq!(events, vec![deleted("/x/f"), created("/x/f")]);
    assert!(tracker.get_node(&url("/x/f")).unwrap().unwrap().is_directory);
}

#[test]
fn listing_removals_precede_additions() {
    let tracker = tracker();
    commit(
        &tracker,
        Hint::directory(url("/x"), vec![("old".to_string(), file("1", "1"))]),
    );

    let events = commit(
        &tracker,
        Hint::directory(url("/x"), vec![("new".to_string(), file("2", "1"))]),
    );
    assert_eq!(events, vec![deleted("/x/old"), created("/x/new")]);
}

#[test]
fn changed_event_carries_expired_attachments_only() {
    let tracker = tracker();
    let record = file("7", "1");
    commit(&tracker, Hint::file(url("/n"), Some(record.clone())));

    let thumb = AttachedData::new("thumb", b"png".to_vec(), DeletionPolicy::WhenContentChanges);
    let pin = AttachedData::new("pin", b"1".to_vec(), DeletionPolicy::Manual);
    tracker
        .attach_data(&url("/n"), &record, thumb.clone(), false)
        .unwrap();
    tracker
        .attach_data(&url("/n"), &record, pin.clone(), false)
        .unwrap();

    let batch = tracker
        .commit_hint(&Hint::file(url("/n"), Some(file("7", "2"))))
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].attached_data, vec![thumb]);

    // Content-bound data is gone, manual data stays.
    assert_eq!(tracker.get_metadata(&url("/n")).unwrap(), vec![pin]);
}

#[test]
fn deletion_reports_attachments_of_observed_nodes_only() {
    let tracker = tracker();
    let record = file("1", "1");
    commit(&tracker, Hint::file(url("/p/q/r"), Some(record.clone())));
    let data = AttachedData::new("k", b"v".to_vec(), DeletionPolicy::WhenDeleted);
    tracker
        .attach_data(&url("/p/q/r"), &record, data.clone(), false)
        .unwrap();

    let batch = tracker.commit_hint(&Hint::deleted(url("/p"))).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].url, url("/p/q/r"));
    assert_eq!(batch[0].attached_data, vec![data]);
    assert!(tracker.get_node(&url("/p")).unwrap().is_none());
}

#[test]
fn absent_file_hint_acts_like_deleted_hint() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/gone"), Some(file("1", "1"))));
    assert_eq!(
        commit(&tracker, Hint::file(url("/gone"), None)),
        vec![deleted("/gone")]
    );
    assert!(commit(&tracker, Hint::deleted(url("/never"))).is_empty());
}

#[test]
fn synthetic_directory_is_created_once_identified() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/s/t"), Some(file("1", "1"))));
    let synthetic = tracker.get_node(&url("/s")).unwrap().unwrap();
    assert!(synthetic.is_directory);
    assert!(!synthetic.is_observed());

    let events = commit(
        &tracker,
        Hint::directory(url("/"), vec![("s".to_string(), dir("20"))]),
    );
    assert_eq!(events, vec![created("/s")]);
    // The child survives: identifying a synthetic parent is not a replacement.
    assert!(tracker.get_node(&url("/s/t")).unwrap().is_some());
}

#[test]
fn file_in_the_way_of_a_directory_chain_is_destroyed() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/m"), Some(file("1", "1"))));

    let events = commit(&tracker, Hint::file(url("/m/n"), Some(file("2", "1"))));
    assert_eq!(events, vec![deleted("/m"), created("/m/n")]);
    assert!(tracker.get_node(&url("/m")).unwrap().unwrap().is_directory);
}

#[test]
fn enumeration_is_scoped_to_the_base() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/a/b/c"), Some(file("1", "1"))));
    commit(&tracker, Hint::file(url("/a/g/h"), Some(file("2", "1"))));

    assert_eq!(
        tracker.enumerate_all_files(&url("/a/g")).unwrap(),
        vec![url("/a/g/h")]
    );
    assert!(tracker.enumerate_all_files(&url("/a/zzz")).unwrap().is_empty());
    assert_eq!(
        tracker.enumerate_all_files(&url("/")).unwrap(),
        vec![url("/a/b/c"), url("/a/g/h")]
    );
}

#[test]
fn attach_contract_violations() {
    let tracker = tracker();
    let record = file("1", "1");
    let data = AttachedData::new("k", b"v".to_vec(), DeletionPolicy::default());

    let err = tracker
        .attach_data(&url("/f"), &record, data.clone(), false)
        .unwrap_err();
    assert!(matches!(err, TrackerError::NotIndexed(_)));
    assert!(err.is_contract_violation());
    assert!(err.to_string().contains("must be indexed first"));
    assert!(matches!(
        tracker.get_metadata(&url("/f")),
        Err(TrackerError::NotIndexed(_))
    ));

    commit(&tracker, Hint::file(url("/f"), Some(record.clone())));
    tracker
        .attach_data(&url("/f"), &record, data.clone(), false)
        .unwrap();
    assert!(matches!(
        tracker.attach_data(&url("/f"), &record, data.clone(), false),
        Err(TrackerError::AttachmentExists { .. })
    ));

    let replacement = AttachedData::new("k", b"w".to_vec(), DeletionPolicy::Manual);
    tracker
        .attach_data(&url("/f"), &record, replacement.clone(), true)
        .unwrap();
    assert_eq!(tracker.get_metadata(&url("/f")).unwrap(), vec![replacement]);

    assert!(matches!(
        tracker.attach_data(&url("/f"), &file("1", "old"), data, true),
        Err(TrackerError::StaleRecord(_))
    ));
}

#[test]
fn detach_returns_the_removed_data() {
    let tracker = tracker();
    let record = file("1", "1");
    commit(&tracker, Hint::file(url("/f"), Some(record.clone())));
    let data = AttachedData::new("k", b"v".to_vec(), DeletionPolicy::Manual);
    tracker
        .attach_data(&url("/f"), &record, data.clone(), false)
        .unwrap();

    assert_eq!(tracker.detach_data(&url("/f"), "k").unwrap(), Some(data));
    assert_eq!(tracker.detach_data(&url("/f"), "k").unwrap(), None);
    assert!(tracker.get_metadata(&url("/f")).unwrap().is_empty());
}

#[test]
fn subscribers_receive_the_committed_batch() {
    let tracker = tracker();
    let mut receiver = tracker.subscribe();
    let batch = tracker
        .commit_hint(&Hint::file(url("/e"), Some(file("1", "1"))))
        .unwrap();
    let received = receiver.try_recv().unwrap();
    assert_eq!(received, batch);

    // No-op hints publish nothing.
    tracker
        .commit_hint(&Hint::file(url("/e"), Some(file("1", "1"))))
        .unwrap();
    assert!(receiver.try_recv().is_err());
}

#[test]
fn index_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();
    {
        let index = TreeIndex::open(temp.path(), "file-index", true).unwrap();
        let tracker = HintTracker::new(Arc::new(index), EventChannel::default());
        commit(&tracker, Hint::file(url("/kept"), Some(file("1", "1"))));
    }
    let index = TreeIndex::open(temp.path(), "file-index", true).unwrap();
    let tracker = HintTracker::new(Arc::new(index), EventChannel::default());
    assert!(tracker.get_node(&url("/kept")).unwrap().is_some());
    assert!(commit(&tracker, Hint::file(url("/kept"), Some(file("1", "1")))).is_empty());
}

#[test]
fn names_differing_only_in_normalization_are_distinct_children() {
    let tracker = tracker();
    let decomposed = "cafe\u{301}";
    let composed = "caf\u{e9}";
    let events = commit(
        &tracker,
        Hint::directory(
            url("/x"),
            vec![
                (decomposed.to_string(), file("1", "1")),
                (composed.to_string(), file("2", "1")),
            ],
        ),
    );
    assert_eq!(events.len(), 2);
    assert!(tracker.get_node(&url("/x").join(decomposed)).unwrap().is_some());
    assert!(tracker.get_node(&url("/x").join(composed)).unwrap().is_some());
}

#[test]
fn nul_in_a_name_is_indexed_once() {
    let tracker = tracker();
    let listing = Hint::directory(
        url("/x"),
        vec![
            ("a\0b".to_string(), file("1", "1")),
            ("a".to_string(), dir("2")),
        ],
    );
    assert_eq!(commit(&tracker, listing.clone()).len(), 2);
    assert!(commit(&tracker, listing).is_empty());
    assert_eq!(
        tracker.enumerate_all_files(&url("/x/a")).unwrap(),
        vec![url("/x/a")]
    );
}

#[test]
fn failed_hint_publishes_nothing_and_writes_nothing() {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let index = TreeIndex::from_db(db.clone(), "file-index", false).unwrap();
    let tracker = HintTracker::new(Arc::new(index), EventChannel::default());
    commit(&tracker, Hint::file(url("/kept"), Some(file("1", "1"))));
    let before = tracker.enumerate_all_files(&Url::root()).unwrap();

    // Undecodable row for /x/bad, below a directory that is not indexed yet.
    let mut key = vec![b'n'];
    key.extend(Url::parse("/x/bad").storage_key());
    db.open_tree("file-index")
        .unwrap()
        .insert(key, &b"\xff\xff"[..])
        .unwrap();

    let mut receiver = tracker.subscribe();
    let result = tracker.commit_hint(&Hint::directory(
        url("/x"),
        vec![("new".to_string(), file("2", "1"))],
    ));

    assert!(matches!(result, Err(TrackerError::Storage(_))));
    assert!(receiver.try_recv().is_err());
    assert!(tracker.get_node(&url("/x")).unwrap().is_none());
    assert!(tracker.get_node(&url("/x/new")).unwrap().is_none());
    assert_eq!(tracker.enumerate_all_files(&url("/kept")).unwrap(), before);
}

#[test]
fn enumeration_is_a_snapshot_and_restartable() {
    let tracker = tracker();
    commit(&tracker, Hint::file(url("/a"), Some(file("1", "1"))));
    let first = tracker.enumerate_all_files(&Url::root()).unwrap();

    commit(&tracker, Hint::file(url("/b"), Some(file("2", "1"))));
    assert_eq!(first, vec![url("/a")]);
    assert_eq!(
        tracker.enumerate_all_files(&Url::root()).unwrap(),
        vec![url("/a"), url("/b")]
    );
}
