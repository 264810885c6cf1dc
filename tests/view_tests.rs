//! Integration tests for views: independent counters, dynamic membership,
//! deletion and view-scoped search.

use std::sync::Arc;

use foldersummary::error::SummaryError;
use foldersummary::index::builder::MboxClass;
use foldersummary::model::flags::MessageFlags;
use foldersummary::model::info::{MessageInfo, RecordFields};
use foldersummary::summary::iter::{self, ListIterator, MessageIterator};
use foldersummary::summary::view::ViewState;
use foldersummary::summary::{FolderSummary, SummaryOptions};

fn add(summary: &FolderSummary, subject: &str, flags: MessageFlags) -> MessageInfo {
    let fields = RecordFields::with_strings(Some(subject), Some("a@example.com"), None, None);
    let info = MessageInfo::with_fields(Some(summary), fields);
    info.set_flags(MessageFlags::all(), flags);
    summary.add(&info).unwrap();
    info
}

// ─── Test 1: Flagged view tracks counts independently of the root ───

#[test]
fn test_flagged_view_counts() {
    let summary = FolderSummary::in_memory();
    add(&summary, "plain", MessageFlags::empty());

    let flagged = summary
        .view_create(Some("flagged"), Some("(match-all (flagged))"))
        .unwrap();
    let root = summary.root_view();
    assert_eq!(flagged.total(), 0);
    assert_eq!(root.total(), 1);

    add(&summary, "important", MessageFlags::FLAGGED);
    assert_eq!(flagged.total(), 1);
    assert_eq!(flagged.unread(), 1);
    assert_eq!(root.total(), 2);
    assert_eq!(root.unread(), 2);
}

// ─── Test 2: Flag changes move records in and out ───────────────────

#[test]
fn test_dynamic_membership_follows_flags() {
    let summary = FolderSummary::in_memory();
    let flagged = summary
        .view_create(Some("flagged"), Some("(match-all (flagged))"))
        .unwrap();
    assert!(!flagged.is_static());

    let info = add(&summary, "later", MessageFlags::empty());
    assert_eq!(flagged.total(), 0);

    info.set_flags(MessageFlags::FLAGGED, MessageFlags::FLAGGED);
    assert_eq!(flagged.total(), 1);

    // Still a member, but no longer unread
    info.set_flags(MessageFlags::SEEN, MessageFlags::SEEN);
    assert_eq!(flagged.total(), 1);
    assert_eq!(flagged.unread(), 0);

    info.set_flags(MessageFlags::FLAGGED, MessageFlags::empty());
    assert_eq!(flagged.total(), 0);
    assert_eq!(flagged.counts(), Default::default());
    assert_eq!(summary.root_view().total(), 1);
}

// ─── Test 3: User flag view counts by ±1 ────────────────────────────

#[test]
fn test_user_flag_view() {
    let summary = FolderSummary::in_memory();
    let work = summary
        .view_create(Some("work"), Some(r#"(match-all (user-flag "work"))"#))
        .unwrap();
    let a = add(&summary, "a", MessageFlags::empty());
    let b = add(&summary, "b", MessageFlags::empty());

    assert!(a.set_user_flag("work", true));
    assert_eq!(work.total(), 1);
    assert!(!a.set_user_flag("work", true));
    assert_eq!(work.total(), 1);
    assert!(b.set_user_flag("work", true));
    assert_eq!(work.total(), 2);
    assert!(a.set_user_flag("work", false));
    assert_eq!(work.total(), 1);
}

// ─── Test 4: Static views keep their membership ─────────────────────

#[test]
fn test_static_view_membership() {
    let summary = FolderSummary::in_memory();
    let invoices = summary
        .view_create(
            Some("invoices"),
            Some(r#"(match-all (header-contains "subject" "invoice"))"#),
        )
        .unwrap();
    assert!(invoices.is_static());

    let info = add(&summary, "Invoice 42", MessageFlags::empty());
    add(&summary, "Lunch", MessageFlags::empty());
    assert_eq!(invoices.total(), 1);
    assert_eq!(invoices.unread(), 1);

    info.set_flags(MessageFlags::DELETED, MessageFlags::DELETED);
    assert_eq!(invoices.total(), 1);
    assert_eq!(invoices.deleted(), 1);
    assert_eq!(invoices.visible(), 0);
}

// ─── Test 5: Views created late scan existing records ───────────────

#[test]
fn test_view_created_after_records() {
    let summary = FolderSummary::in_memory();
    add(&summary, "one", MessageFlags::SEEN);
    add(&summary, "two", MessageFlags::JUNK);
    add(&summary, "three", MessageFlags::empty());

    let unread = summary
        .view_create(Some("unread"), Some("(not (seen))"))
        .unwrap();
    assert_eq!(unread.total(), 2);
    assert_eq!(unread.junk(), 1);
    assert_eq!(unread.visible(), 1);
}

// ─── Test 6: Create, lookup, delete rules ───────────────────────────

#[test]
fn test_view_lifecycle() {
    let summary = FolderSummary::in_memory();
    let first = summary.view_create(Some("f"), Some("(flagged)")).unwrap();
    let again = summary.view_create(Some("f"), Some("(flagged)")).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert!(matches!(
        summary.view_create(Some("f"), Some("(seen)")),
        Err(SummaryError::ViewExists(_))
    ));
    assert!(matches!(
        summary.view_create(Some("bad"), Some("(no-such-form)")),
        Err(SummaryError::InvalidExpression { .. })
    ));
    assert!(summary.view_lookup(Some("bad")).is_none());

    assert!(summary.view_lookup(None).unwrap().is_root());
    assert!(Arc::ptr_eq(&summary.view_lookup(Some("f")).unwrap(), &first));
    assert_eq!(summary.views().len(), 1);

    assert!(matches!(summary.view_delete(None), Err(SummaryError::RootView)));
    summary.view_delete(Some("f")).unwrap();
    assert_eq!(first.state(), ViewState::Deleted);
    assert!(summary.view_lookup(Some("f")).is_none());
    assert!(matches!(
        summary.view_delete(Some("f")),
        Err(SummaryError::ViewNotFound(_))
    ));

    // Counters of a deleted view no longer move
    add(&summary, "late", MessageFlags::FLAGGED);
    assert_eq!(first.total(), 0);
}

// ─── Test 7: Deleting a view invalidates bound iterators ────────────

#[test]
fn test_view_delete_fails_bound_iterator() {
    let summary = FolderSummary::in_memory();
    add(&summary, "x", MessageFlags::empty());
    add(&summary, "y", MessageFlags::empty());
    let view = summary.view_create(Some("all"), Some("(match-all)")).unwrap();

    let mut iter = ListIterator::new(summary.array()).bind_view(Arc::clone(&view));
    assert!(iter.next().unwrap().is_some());

    summary.view_delete(Some("all")).unwrap();
    assert!(matches!(iter.next(), Err(SummaryError::ViewDeleted(id)) if id == "all"));
}

// ─── Test 8: View-scoped search through the record class ────────────

#[test]
fn test_search_within_view() {
    let summary = FolderSummary::with_class(None, MboxClass::shared(), SummaryOptions::default());
    add(&summary, "Invoice March", MessageFlags::FLAGGED);
    add(&summary, "Invoice April", MessageFlags::empty());
    add(&summary, "Dinner", MessageFlags::FLAGGED);
    summary
        .view_create(Some("flagged"), Some("(match-all (flagged))"))
        .unwrap();

    let mut hits = summary
        .search(
            Some("flagged"),
            r#"(header-contains "subject" "invoice")"#,
            None,
        )
        .unwrap();
    let found = iter::collect(hits.as_mut()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].subject().as_deref(), Some("Invoice March"));

    let mut all = summary
        .search(None, r#"(header-contains "subject" "invoice")"#, None)
        .unwrap();
    assert_eq!(iter::collect(all.as_mut()).unwrap().len(), 2);

    assert!(matches!(
        summary.search(Some("missing"), "(match-all)", None),
        Err(SummaryError::ViewNotFound(_))
    ));
}

#[test]
fn test_base_class_search_not_implemented() {
    let summary = FolderSummary::in_memory();
    assert!(matches!(
        summary.search(None, "(match-all)", None),
        Err(SummaryError::NotImplemented(_))
    ));
}

// ─── Test 9: Clear resets every view ────────────────────────────────

#[test]
fn test_clear_resets_views() {
    let summary = FolderSummary::in_memory();
    let flagged = summary
        .view_create(Some("flagged"), Some("(match-all (flagged))"))
        .unwrap();
    add(&summary, "a", MessageFlags::FLAGGED);
    add(&summary, "b", MessageFlags::DELETED);
    assert_eq!(flagged.total(), 1);

    summary.clear();
    assert_eq!(flagged.counts(), Default::default());
    assert_eq!(summary.root_view().counts(), Default::default());
    assert!(!flagged.is_deleted());
}
