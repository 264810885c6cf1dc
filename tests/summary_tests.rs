//! Integration tests for the summary index: record lifecycle, counts,
//! notifications and save/load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use foldersummary::error::SummaryError;
use foldersummary::model::class::RecordClass;
use foldersummary::model::flags::MessageFlags;
use foldersummary::model::info::{Extra, MessageInfo, RecordFields};
use foldersummary::model::pool;
use foldersummary::summary::events::{FolderChanges, SummaryEvent};
use foldersummary::summary::{FolderSummary, SummaryOptions};

fn record(summary: &FolderSummary, uid: &str, subject: &str, from: &str) -> MessageInfo {
    let fields = RecordFields::with_strings(Some(subject), Some(from), None, None);
    let info = MessageInfo::with_fields(Some(summary), fields);
    info.set_uid(uid).unwrap();
    info
}

fn options() -> SummaryOptions {
    SummaryOptions {
        fsync: false,
        ..SummaryOptions::default()
    }
}

// ─── Test 1: Add, flag, remove, save, load ──────────────────────────

#[test]
fn test_scenario_add_flag_remove_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("folder.summary");
    let summary = FolderSummary::with_class(
        Some(path.clone()),
        foldersummary::model::class::base_class(),
        options(),
    );

    for (uid, subject) in [("a", "Alpha"), ("b", "Beta"), ("c", "Gamma")] {
        let info = record(&summary, uid, subject, "sender@example.com");
        summary.add(&info).unwrap();
    }
    let root = summary.root_view();
    assert_eq!(root.total(), 3);
    assert_eq!(root.unread(), 3);
    assert_eq!(root.deleted(), 0);

    assert!(summary
        .set_flags("a", MessageFlags::SEEN, MessageFlags::SEEN)
        .unwrap());
    assert_eq!(root.unread(), 2);

    let b = summary.get("b").unwrap();
    assert!(summary.remove(&b));
    assert_eq!(root.total(), 2);

    summary.save().unwrap();

    let fresh = FolderSummary::with_class(
        Some(path),
        foldersummary::model::class::base_class(),
        options(),
    );
    fresh.load().unwrap();
    assert!(fresh.get("a").unwrap().flags().contains(MessageFlags::SEEN));
    let c = fresh.get("c").unwrap();
    assert_eq!(c.subject().as_deref(), Some("Gamma"));
    assert_eq!(c.from().as_deref(), Some("sender@example.com"));
    assert!(fresh.get("b").is_none());
    assert_eq!(fresh.root_view().total(), 2);
    assert_eq!(fresh.root_view().unread(), 1);
}

// ─── Test 2: Count invariants under mixed flags ─────────────────────

#[test]
fn test_count_invariants() {
    let summary = FolderSummary::in_memory();
    let flags = [
        MessageFlags::empty(),
        MessageFlags::SEEN,
        MessageFlags::DELETED,
        MessageFlags::JUNK,
        MessageFlags::DELETED | MessageFlags::JUNK,
        MessageFlags::SEEN | MessageFlags::FLAGGED,
    ];
    for (i, f) in flags.iter().enumerate() {
        let info = record(&summary, &format!("m{i}"), "s", "f@example.com");
        info.set_flags(MessageFlags::all(), *f);
        summary.add(&info).unwrap();
    }

    let check = |summary: &FolderSummary| {
        let root = summary.root_view();
        let all = summary.array();
        let hidden = all.iter().filter(|i| i.flags().is_hidden()).count() as u32;
        let unread = all.iter().filter(|i| i.flags().is_unread()).count() as u32;
        assert_eq!(root.total() as usize, summary.len());
        assert_eq!(root.visible(), root.total() - hidden);
        assert_eq!(root.unread(), unread);
    };
    check(&summary);

    summary
        .set_flags("m0", MessageFlags::DELETED, MessageFlags::DELETED)
        .unwrap();
    check(&summary);
    summary
        .set_flags("m4", MessageFlags::DELETED | MessageFlags::JUNK, MessageFlags::empty())
        .unwrap();
    check(&summary);
    summary.remove_uid("m1");
    check(&summary);
    summary.clear();
    check(&summary);
    assert_eq!(summary.root_view().total(), 0);
}

// ─── Test 3: set_flags idempotence ──────────────────────────────────

#[test]
fn test_set_flags_idempotence() {
    let summary = FolderSummary::in_memory();
    let info = record(&summary, "x", "s", "f@example.com");
    summary.add(&info).unwrap();

    assert!(info.set_flags(MessageFlags::SEEN, MessageFlags::SEEN));
    assert!(!info.set_flags(MessageFlags::SEEN, MessageFlags::SEEN));
    assert!(info.set_flags(MessageFlags::SEEN, MessageFlags::empty()));
    assert!(!info.set_flags(MessageFlags::SEEN, MessageFlags::empty()));
    assert!(matches!(
        summary.set_flags("missing", MessageFlags::SEEN, MessageFlags::SEEN),
        Err(SummaryError::UnknownUid(uid)) if uid == "missing"
    ));
}

// ─── Test 4: Reference lifecycle and the free hook ──────────────────

struct CountingClass {
    freed: Arc<AtomicUsize>,
}

impl RecordClass for CountingClass {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn free(&self, _uid: Option<&str>, _extra: Option<Extra>) {
        self.freed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_reference_lifecycle() {
    let freed = Arc::new(AtomicUsize::new(0));
    let summary = FolderSummary::with_class(
        None,
        Arc::new(CountingClass {
            freed: Arc::clone(&freed),
        }),
        options(),
    );

    let info = MessageInfo::new(Some(&summary));
    summary.add(&info).unwrap();
    let extra_refs: Vec<MessageInfo> = (0..3).map(|_| info.clone()).collect();
    // ours + summary + three extra
    assert_eq!(info.ref_count(), 5);

    assert!(summary.remove(&info));
    assert!(!info.is_indexed());
    drop(extra_refs);
    assert_eq!(freed.load(Ordering::SeqCst), 0);
    drop(info);
    assert_eq!(freed.load(Ordering::SeqCst), 1);
}

// ─── Test 5: Foreign records and uid handling ───────────────────────

#[test]
fn test_foreign_record_rejected() {
    let a = FolderSummary::in_memory();
    let b = FolderSummary::in_memory();
    let info = MessageInfo::new(Some(&a));
    assert!(matches!(b.add(&info), Err(SummaryError::ForeignRecord(_))));
    assert!(b.is_empty());

    let orphan = MessageInfo::new(None);
    assert!(a.add(&orphan).is_err());
}

#[test]
fn test_uid_clash_reassigns() {
    let summary = FolderSummary::in_memory();
    let first = record(&summary, "7", "one", "f@example.com");
    let second = record(&summary, "7", "two", "f@example.com");
    summary.add(&first).unwrap();
    summary.add(&second).unwrap();
    assert_eq!(summary.len(), 2);
    assert_ne!(first.uid(), second.uid());
    assert_eq!(second.uid().as_deref(), Some("8"));

    // Adding the same record again changes nothing
    summary.add(&first).unwrap();
    assert_eq!(summary.len(), 2);
    assert!(matches!(first.set_uid("99"), Err(SummaryError::UidInUse(_))));
}

#[test]
fn test_insertion_order_and_get_array() {
    let summary = FolderSummary::in_memory();
    for uid in ["z", "a", "m"] {
        summary.add(&record(&summary, uid, "s", "f@example.com")).unwrap();
    }
    let uids: Vec<String> = summary.uids().iter().map(|u| u.to_string()).collect();
    assert_eq!(uids, ["z", "a", "m"]);

    let batch = summary.get_array(["m", "missing", "z"]);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].uid().as_deref(), Some("m"));
    summary.free_array(batch);
}

// ─── Test 6: Notifications ──────────────────────────────────────────

#[test]
fn test_change_notifications() {
    let summary = FolderSummary::in_memory();
    let changes = Arc::new(Mutex::new(FolderChanges::new()));
    let sink = Arc::clone(&changes);
    let id = summary.subscribe(move |event: &SummaryEvent| {
        sink.lock().unwrap().record(event);
    });

    let info = record(&summary, "n1", "s", "f@example.com");
    summary.add(&info).unwrap();
    info.set_flags(MessageFlags::FLAGGED, MessageFlags::FLAGGED);
    // Internal bits never notify
    info.set_flags(MessageFlags::FOLDER_FLAGGED, MessageFlags::FOLDER_FLAGGED);
    info.set_user_tag("label", Some("work"));

    {
        let batch = changes.lock().unwrap().take();
        assert_eq!(batch.added, vec!["n1".to_string()]);
        assert!(batch.changed.is_empty(), "changes to new records fold into added");
    }

    info.set_flags(MessageFlags::SEEN, MessageFlags::SEEN);
    summary.remove(&info);
    {
        let batch = changes.lock().unwrap().take();
        assert_eq!(batch.removed, vec!["n1".to_string()]);
        assert!(batch.added.is_empty());
    }

    assert!(summary.unsubscribe(id));
    summary.add(&record(&summary, "n2", "s", "f@example.com")).unwrap();
    assert!(changes.lock().unwrap().is_empty());
}

#[test]
fn test_notification_events_in_order() {
    let summary = FolderSummary::in_memory();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    summary.subscribe(move |event: &SummaryEvent| sink.lock().unwrap().push(event.clone()));

    let info = record(&summary, "e", "s", "f@example.com");
    summary.add(&info).unwrap();
    info.set_flags(MessageFlags::JUNK_LEARN, MessageFlags::JUNK_LEARN);
    info.set_user_flag("todo", true);
    summary.remove_uid("e");

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            SummaryEvent::Added("e".into()),
            SummaryEvent::Changed("e".into()),
            SummaryEvent::Removed("e".into()),
        ]
    );
}

// ─── Test 7: Dirty tracking ─────────────────────────────────────────

#[test]
fn test_dirty_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let summary = FolderSummary::with_class(
        Some(dir.path().join("s")),
        foldersummary::model::class::base_class(),
        options(),
    );
    assert!(!summary.is_dirty());

    let info = record(&summary, "d", "s", "f@example.com");
    summary.add(&info).unwrap();
    assert!(summary.is_dirty());
    summary.save().unwrap();
    assert!(!summary.is_dirty());

    // A no-op flag write leaves the summary clean
    assert!(!info.set_flags(MessageFlags::SEEN, MessageFlags::empty()));
    assert!(!summary.is_dirty());

    info.set_user_flag("x", true);
    assert!(summary.is_dirty());
    summary.save().unwrap();

    summary.touch();
    assert!(summary.is_dirty());
}

// ─── Test 8: Records outlive their summary ──────────────────────────

#[test]
fn test_record_outlives_summary() {
    let summary = FolderSummary::in_memory();
    let info = record(&summary, "keep", "Subject", "f@example.com");
    summary.add(&info).unwrap();
    drop(summary);

    assert!(!info.is_indexed());
    assert!(info.summary().is_none());
    assert!(info.set_flags(MessageFlags::SEEN, MessageFlags::SEEN));
    assert_eq!(info.subject().as_deref(), Some("Subject"));
}

// ─── Test 9: Concurrent flag updates keep counts consistent ─────────

#[test]
fn test_concurrent_flag_updates() {
    let summary = FolderSummary::in_memory();
    for i in 0..64 {
        summary
            .add(&record(&summary, &i.to_string(), "s", "f@example.com"))
            .unwrap();
    }

    std::thread::scope(|scope| {
        for t in 0..4 {
            let summary = summary.clone();
            scope.spawn(move || {
                for i in (t..64).step_by(4) {
                    let uid = i.to_string();
                    summary
                        .set_flags(&uid, MessageFlags::SEEN, MessageFlags::SEEN)
                        .unwrap();
                    if i % 8 == 0 {
                        summary
                            .set_flags(&uid, MessageFlags::DELETED, MessageFlags::DELETED)
                            .unwrap();
                    }
                }
            });
        }
    });

    let root = summary.root_view();
    assert_eq!(root.total(), 64);
    assert_eq!(root.unread(), 0);
    assert_eq!(root.deleted(), 8);
    assert_eq!(root.visible(), 56);
}

// ─── Test 10: Batch operations and uid allocation ───────────────────

#[test]
fn test_batch_add_and_remove() {
    let summary = FolderSummary::in_memory();
    let other = FolderSummary::in_memory();
    let batch = vec![
        MessageInfo::new(Some(&summary)),
        MessageInfo::new(Some(&other)),
        MessageInfo::new(Some(&summary)),
    ];
    let results = summary.add_many(&batch);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok(), "a failure does not stop the batch");
    assert_eq!(summary.len(), 2);
    assert_eq!(batch[2].uid().as_deref(), Some("2"));

    assert_eq!(summary.next_uid_string().unwrap(), "3");
    assert_eq!(summary.next_uid(), 4);
    summary.set_next_uid(100);
    let late = MessageInfo::new(Some(&summary));
    summary.add(&late).unwrap();
    assert_eq!(late.uid().as_deref(), Some("100"));

    assert_eq!(summary.remove_many(&batch), 2);
    assert_eq!(summary.len(), 1);
    assert_eq!(summary.root_view().total(), 1);
}

// ─── Test 11: User flag and tag resync ──────────────────────────────

#[test]
fn test_user_flag_resync() {
    use foldersummary::model::tags::{UserFlags, UserTags};

    let summary = FolderSummary::in_memory();
    let info = record(&summary, "r", "s", "f@example.com");
    summary.add(&info).unwrap();
    info.set_user_flag("old", true);

    let mut flags = UserFlags::new();
    flags.set_flag("new", true);
    assert!(info.set_user_flags_from(&flags));
    assert!(!info.user_flag("old"));
    assert!(info.user_flag("new"));
    assert!(!info.set_user_flags_from(&flags));

    let mut tags = UserTags::new();
    tags.set_tag("label", Some("home"));
    assert!(info.set_user_tags_from(&tags));
    assert_eq!(info.user_tag("label").as_deref(), Some("home"));
    assert!(!info.set_user_tags_from(&tags));
}

// ─── Test 12: Clone is detached from the index ──────────────────────

#[test]
fn test_clone_info_detached() {
    let summary = FolderSummary::in_memory();
    let info = record(&summary, "orig", "Subject", "f@example.com");
    info.set_flags(MessageFlags::SEEN, MessageFlags::SEEN);
    summary.add(&info).unwrap();

    let copy = info.clone_info();
    assert!(copy.uid().is_none());
    assert!(!copy.is_indexed());
    assert_eq!(copy.fields(), info.fields());
    assert_eq!(copy.flags(), MessageFlags::SEEN);

    copy.set_flags(MessageFlags::FLAGGED, MessageFlags::FLAGGED);
    assert!(!info.flags().is_flagged());
    summary.add(&copy).unwrap();
    assert_eq!(summary.len(), 2);
}

// ─── Test 13: Uid allocation past the highest IMAP uid ──────────────

#[test]
fn test_uid_allocation_after_max_uid() {
    let summary = FolderSummary::in_memory();
    summary
        .add(&record(&summary, "4294967295", "Top", "top@example.com"))
        .unwrap();
    summary
        .add(&record(&summary, "1", "Low", "low@example.com"))
        .unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let worker = summary.clone();
    std::thread::spawn(move || {
        let info = MessageInfo::new(Some(&worker));
        let result = worker.add(&info).map(|()| info.uid());
        let _ = tx.send(result);
    });
    let uid = rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("add returned")
        .unwrap();
    assert_eq!(uid.as_deref(), Some("2"));
    assert_eq!(summary.len(), 3);
    assert_eq!(summary.root_view().total(), 3);
}

// ─── Test 14: Dropped records give their pooled strings back ────────

#[test]
fn test_pooled_strings_released_with_records() {
    let summary = FolderSummary::in_memory();
    let subjects: Vec<String> = (0..200)
        .map(|i| format!("summary-tests release subject {i}"))
        .collect();
    let infos: Vec<MessageInfo> = subjects
        .iter()
        .enumerate()
        .map(|(i, subject)| record(&summary, &format!("r{i}"), subject, "shared-release@example.com"))
        .collect();
    for info in &infos {
        summary.add(info).unwrap();
    }
    assert!(subjects.iter().all(|s| pool::is_pooled(s)));

    let survivor = infos[0].clone();
    summary.clear();
    drop(infos);

    assert!(subjects[1..].iter().all(|s| !pool::is_pooled(s)));
    assert!(pool::is_pooled(&subjects[0]), "a live handle keeps its strings");
    assert!(pool::is_pooled("shared-release@example.com"));
    drop(survivor);
    assert!(!pool::is_pooled(&subjects[0]));
    assert!(!pool::is_pooled("shared-release@example.com"));
}
