//! Integration tests for the binary summary file: round trips, older
//! versions, corrupt input and failed saves.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, WriteBytesExt};
use chrono::{TimeZone, Utc};
use foldersummary::error::SummaryError;
use foldersummary::index::builder::{mbox_offset, MboxClass, MboxOffset};
use foldersummary::index::format::{self, SummaryHeader};
use foldersummary::model::class::{base_class, RecordClass};
use foldersummary::model::flags::MessageFlags;
use foldersummary::model::info::{Extra, MessageInfo, RecordFields};
use foldersummary::model::message_id::MessageIdHash;
use foldersummary::summary::events::{FolderChanges, SummaryEvent};
use foldersummary::summary::{FolderSummary, SummaryOptions};

fn options() -> SummaryOptions {
    SummaryOptions {
        fsync: false,
        ..SummaryOptions::default()
    }
}

fn open(path: &Path) -> FolderSummary {
    FolderSummary::with_class(Some(path.to_path_buf()), base_class(), options())
}

fn full_record(summary: &FolderSummary, uid: &str) -> MessageInfo {
    let mut fields = RecordFields::with_strings(
        Some("Quarterly report"),
        Some("Ana <ana@example.com>"),
        Some("team@example.com"),
        Some("boss@example.com"),
    );
    fields.mailing_list = Some(Arc::from("reports@lists.example.com"));
    fields.size = 48_213;
    fields.date_sent = Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap();
    fields.date_received = Utc.with_ymd_and_hms(2024, 3, 1, 9, 16, 2).unwrap();
    fields.message_id = MessageIdHash::from_id("<q1@example.com>");
    fields.references = vec![
        MessageIdHash::from_id("<q0@example.com>").unwrap(),
        MessageIdHash::from_id("<root@example.com>").unwrap(),
    ];
    let info = MessageInfo::with_fields(Some(summary), fields);
    info.set_uid(uid).unwrap();
    info
}

// ─── Test 1: Every field survives a save and load ───────────────────

#[test]
fn test_full_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inbox.summary");

    let summary = open(&path);
    let info = full_record(&summary, "100");
    info.set_flags(
        MessageFlags::all(),
        MessageFlags::SEEN | MessageFlags::ANSWERED | MessageFlags::JUNK_LEARN,
    );
    info.set_user_flag("todo", true);
    info.set_user_tag("label", Some("finance"));
    info.set_user_tag("color", Some(""));
    summary.add(&info).unwrap();
    summary.set_summary_flags(0x5);
    summary.save().unwrap();

    let loaded = open(&path);
    loaded.load().unwrap();
    let back = loaded.get("100").unwrap();
    assert_eq!(back.fields(), info.fields());
    assert_eq!(back.state(), info.state());
    assert_eq!(back.user_tag("color").as_deref(), Some(""));
    assert_eq!(loaded.flags(), 0x5);
    assert!(loaded.next_uid() > 100);
    assert!(!loaded.is_dirty());
}

// ─── Test 2: Unknown flag bits are kept ─────────────────────────────

#[test]
fn test_unknown_flag_bits_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s");
    let summary = open(&path);
    let info = full_record(&summary, "1");
    let odd = MessageFlags::from_bits_retain(1 << 14 | 1 << 30) | MessageFlags::SEEN;
    info.set_flags(MessageFlags::all(), odd);
    summary.add(&info).unwrap();
    summary.save().unwrap();

    let loaded = open(&path);
    loaded.load().unwrap();
    assert_eq!(loaded.get("1").unwrap().flags(), odd);
}

// ─── Test 3: Class fields round trip ────────────────────────────────

#[test]
fn test_mbox_class_offsets_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mbox.summary");
    let summary = FolderSummary::with_class(Some(path.clone()), MboxClass::shared(), options());
    for (uid, offset) in [("1", 0u64), ("2", 5_000_000_000)] {
        let info = full_record(&summary, uid);
        info.with_extra_mut::<MboxOffset, _>(|extra| extra.unwrap().0 = offset);
        summary.add(&info).unwrap();
    }
    summary.save().unwrap();

    let loaded = FolderSummary::with_class(Some(path), MboxClass::shared(), options());
    loaded.load().unwrap();
    assert_eq!(mbox_offset(&loaded.get("1").unwrap()), Some(0));
    assert_eq!(mbox_offset(&loaded.get("2").unwrap()), Some(5_000_000_000));
}

// ─── Test 4: Header-only load ───────────────────────────────────────

#[test]
fn test_header_load_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s");
    let summary = open(&path);
    for (uid, flags) in [
        ("1", MessageFlags::empty()),
        ("2", MessageFlags::SEEN),
        ("3", MessageFlags::DELETED),
        ("4", MessageFlags::JUNK | MessageFlags::DELETED),
    ] {
        let info = full_record(&summary, uid);
        info.set_flags(MessageFlags::all(), flags);
        summary.add(&info).unwrap();
    }
    summary.save().unwrap();

    let reader = open(&path);
    let header = reader.header_load().unwrap();
    assert_eq!(header.version, format::VERSION);
    assert_eq!(header.count, 4);
    assert_eq!(header.unread, 1);
    assert_eq!(header.deleted, 2);
    assert_eq!(header.junk, 1);
    assert_eq!(header.next_uid, 5);
    assert!(reader.is_empty(), "header_load reads no records");
    assert_eq!(reader.time(), header.time);
    assert_eq!(reader.saved_header(), Some(header));
}

// ─── Test 5: Version 2 files are still readable ─────────────────────

fn write_v2_record(w: &mut Vec<u8>, uid: &str, subject: &str) -> io::Result<()> {
    format::write_string(w, Some(uid))?;
    w.write_u32::<BigEndian>(MessageFlags::SEEN.bits())?;
    w.write_u32::<BigEndian>(321)?;
    format::write_date(w, Utc.with_ymd_and_hms(2020, 5, 4, 3, 2, 1).unwrap())?;
    format::write_date(w, Utc.with_ymd_and_hms(2020, 5, 4, 3, 2, 9).unwrap())?;
    format::write_optional_hash(w, None)?;
    format::write_count(w, 0)?;
    format::write_string(w, Some(subject))?;
    format::write_string(w, Some("old@example.com"))?;
    format::write_string(w, None)?;
    format::write_string(w, None)?;
    // v2 has no mailing-list field
    format::write_count(w, 1)?;
    format::write_string(w, Some("legacy"))?;
    format::write_count(w, 0)?;
    Ok(())
}

#[test]
fn test_version_2_file_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.summary");
    let mut bytes = Vec::new();
    SummaryHeader {
        version: 2,
        time: 1_600_000_000,
        count: 2,
        ..SummaryHeader::default()
    }
    .write(&mut bytes)
    .unwrap();
    write_v2_record(&mut bytes, "9", "First").unwrap();
    write_v2_record(&mut bytes, "12", "Second").unwrap();
    std::fs::write(&path, &bytes).unwrap();

    let summary = open(&path);
    summary.load().unwrap();
    assert_eq!(summary.len(), 2);
    let second = summary.get("12").unwrap();
    assert_eq!(second.subject().as_deref(), Some("Second"));
    assert!(second.mailing_list().is_none());
    assert!(second.user_flag("legacy"));
    assert_eq!(second.size(), 321);
    assert_eq!(summary.next_uid(), 13);
    assert_eq!(summary.root_view().unread(), 0);

    // Saving upgrades the file to the current version
    summary.touch();
    summary.save().unwrap();
    assert_eq!(open(&path).header_load().unwrap().version, format::VERSION);
}

// ─── Test 6: Unsupported versions are rejected ──────────────────────

#[test]
fn test_unsupported_versions() {
    let dir = tempfile::tempdir().unwrap();
    for version in [1, format::VERSION + 1] {
        let path = dir.path().join(format!("v{version}"));
        let mut bytes = Vec::new();
        SummaryHeader {
            version,
            ..SummaryHeader::default()
        }
        .write(&mut bytes)
        .unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let summary = open(&path);
        assert!(matches!(
            summary.load(),
            Err(SummaryError::UnsupportedVersion { found, .. }) if found == version
        ));
    }
}

// ─── Test 7: Corrupt files leave the summary untouched ──────────────

#[test]
fn test_corrupt_file_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s");
    let summary = open(&path);
    summary.add(&full_record(&summary, "1")).unwrap();
    summary.add(&full_record(&summary, "2")).unwrap();
    summary.save().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

    let target = open(&path);
    target.add(&full_record(&target, "keep")).unwrap();
    assert!(matches!(
        target.load(),
        Err(SummaryError::InvalidSummary { .. })
    ));
    assert_eq!(target.len(), 1);
    assert!(target.contains("keep"));
    assert!(target.is_dirty());
}

#[test]
fn test_duplicate_uid_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dup");
    let mut bytes = Vec::new();
    SummaryHeader {
        version: 2,
        count: 2,
        ..SummaryHeader::default()
    }
    .write(&mut bytes)
    .unwrap();
    write_v2_record(&mut bytes, "5", "a").unwrap();
    write_v2_record(&mut bytes, "5", "b").unwrap();
    std::fs::write(&path, &bytes).unwrap();

    let err = open(&path).load().unwrap_err();
    assert!(matches!(err, SummaryError::InvalidSummary { ref reason, .. } if reason.contains("duplicate")));
}

#[test]
fn test_oversized_string_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big");
    let summary = open(&path);
    let long = "x".repeat(64);
    let info = MessageInfo::with_fields(
        Some(&summary),
        RecordFields::with_strings(Some(&long), None, None, None),
    );
    summary.add(&info).unwrap();
    summary.save().unwrap();

    let strict = FolderSummary::with_class(
        Some(path),
        base_class(),
        SummaryOptions {
            fsync: false,
            max_string_len: 16,
        },
    );
    assert!(matches!(
        strict.load(),
        Err(SummaryError::InvalidSummary { .. })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let summary = open(&dir.path().join("absent"));
    assert!(matches!(summary.load(), Err(SummaryError::Io { .. })));
    assert!(matches!(summary.header_load(), Err(SummaryError::Io { .. })));
}

// ─── Test 8: A failed save keeps the old file and the dirty flag ────

struct FlakyClass {
    fail: Arc<AtomicBool>,
}

impl RecordClass for FlakyClass {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn save_extra(&self, _info: &MessageInfo, _writer: &mut dyn Write) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::other("device full"));
        }
        Ok(())
    }

    fn load_extra(&self, _reader: &mut dyn Read, _version: i32) -> io::Result<Option<Extra>> {
        Ok(None)
    }
}

#[test]
fn test_failed_save_keeps_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flaky.summary");
    let fail = Arc::new(AtomicBool::new(false));
    let summary = FolderSummary::with_class(
        Some(path.clone()),
        Arc::new(FlakyClass {
            fail: Arc::clone(&fail),
        }),
        options(),
    );

    summary.add(&full_record(&summary, "1")).unwrap();
    summary.save().unwrap();
    let before = std::fs::read(&path).unwrap();

    summary.add(&full_record(&summary, "2")).unwrap();
    fail.store(true, Ordering::SeqCst);
    assert!(matches!(summary.save(), Err(SummaryError::Io { .. })));
    assert!(summary.is_dirty());
    assert_eq!(std::fs::read(&path).unwrap(), before);

    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1, "temp file should be cleaned up");

    fail.store(false, Ordering::SeqCst);
    summary.save().unwrap();
    assert!(!summary.is_dirty());
    assert_eq!(open(&path).header_load().unwrap().count, 2);
}

// ─── Test 9: Load replaces the current records ──────────────────────

#[test]
fn test_load_replaces_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s");
    let writer = open(&path);
    writer.add(&full_record(&writer, "a")).unwrap();
    writer.save().unwrap();

    let summary = open(&path);
    let stale = full_record(&summary, "stale");
    summary.add(&stale).unwrap();
    let flagged = summary
        .view_create(Some("flagged"), Some("(flagged)"))
        .unwrap();

    summary.load().unwrap();
    assert!(!stale.is_indexed());
    assert!(summary.get("stale").is_none());
    assert_eq!(summary.uids().len(), 1);
    assert_eq!(summary.root_view().total(), 1);
    assert_eq!(flagged.total(), 0);

    summary
        .set_flags("a", MessageFlags::FLAGGED, MessageFlags::FLAGGED)
        .unwrap();
    assert_eq!(flagged.total(), 1);
}

// ─── Test 10: Load notifies listeners about the swap ────────────────

#[test]
fn test_load_notifies_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s");
    let writer = open(&path);
    writer.add(&full_record(&writer, "a")).unwrap();
    writer.add(&full_record(&writer, "b")).unwrap();
    writer.save().unwrap();

    let summary = open(&path);
    summary.add(&full_record(&summary, "stale")).unwrap();
    summary.add(&full_record(&summary, "a")).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    summary.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    summary.load().unwrap();
    let seen = events.lock().unwrap().clone();
    assert_eq!(
        seen,
        [
            SummaryEvent::Removed("stale".into()),
            SummaryEvent::Removed("a".into()),
            SummaryEvent::Added("a".into()),
            SummaryEvent::Added("b".into()),
        ]
    );

    let mut changes = FolderChanges::new();
    seen.iter().for_each(|e| changes.record(e));
    assert_eq!(changes.removed, ["stale"]);
    assert_eq!(changes.added, ["b"]);
    assert_eq!(changes.changed, ["a"]);

    events.lock().unwrap().clear();
    std::fs::remove_file(&path).unwrap();
    assert!(summary.load().is_err());
    assert!(events.lock().unwrap().is_empty(), "a failed load stays silent");
}

// ─── Test 11: Dates come back in whole seconds ──────────────────────

#[test]
fn test_sub_second_dates_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s");
    let summary = open(&path);
    let fields = RecordFields {
        date_sent: Utc.timestamp_opt(1_709_284_500, 123_456_789).unwrap(),
        date_received: Utc.timestamp_opt(1_709_284_562, 999_000_000).unwrap(),
        ..RecordFields::default()
    };
    let info = MessageInfo::with_fields(Some(&summary), fields);
    summary.add(&info).unwrap();
    assert_eq!(info.date_sent().timestamp_subsec_nanos(), 123_456_789);
    summary.save().unwrap();

    let loaded = open(&path);
    loaded.load().unwrap();
    let back = loaded.get("1").unwrap();
    assert_eq!(back.date_sent(), Utc.timestamp_opt(1_709_284_500, 0).unwrap());
    assert_eq!(back.date_received(), Utc.timestamp_opt(1_709_284_562, 0).unwrap());
}
