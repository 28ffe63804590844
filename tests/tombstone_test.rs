//! Soft deletion, tombstone visibility, purging and tombstone collapse.

mod common;

use caldb::{DeleteAction, Filter};
use chrono::{Duration, Utc};

use common::*;

/// Marking deleted hides the incidence from live queries but keeps it
/// visible to the tombstone listing, stamped with the deletion instant.
#[test]
fn mark_deleted_creates_tombstone() {
    let (_dir, mut storage) = open_with_notebook();
    let event = sample_event("E1", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);

    let before = Utc::now();
    delete_one(&mut storage, NOTEBOOK, &event, DeleteAction::MarkDeleted);

    let deleted = storage.deleted_incidences(None, None).expect("tombstones");
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].uid, "E1");

    let live = storage.all_incidences(None).expect("live incidences");
    assert!(live.is_empty());
    assert!(storage
        .load_incidences(&Filter::All)
        .expect("load all")
        .is_empty());

    let deleted_at = storage
        .incidence_deleted_date(&event)
        .expect("query deletion date")
        .expect("deletion date set");
    assert!(deleted_at >= before - Duration::seconds(1));
    assert!(deleted_at <= Utc::now() + Duration::seconds(1));
}

/// The deleted-since listing reports tombstones of rows created before
/// the token.
#[test]
fn deleted_since_token() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-old", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    event.created = Some(Utc::now() - Duration::days(2));
    store_one(&mut storage, NOTEBOOK, &event);
    delete_one(&mut storage, NOTEBOOK, &event, DeleteAction::MarkDeleted);

    let token = Utc::now() - Duration::days(1);
    let deleted = storage
        .deleted_incidences(Some(token), None)
        .expect("tombstones since token");
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].uid, "E-old");

    // A token in the future matches nothing.
    let none = storage
        .deleted_incidences(Some(Utc::now() + Duration::days(1)), None)
        .expect("tombstones since future token");
    assert!(none.is_empty());
}

/// Purging removes the tombstone for good.
#[test]
fn purge_removes_tombstone() {
    let (_dir, mut storage) = open_with_notebook();
    let event = sample_event("E1", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);
    delete_one(&mut storage, NOTEBOOK, &event, DeleteAction::MarkDeleted);

    assert!(storage
        .purge_deleted_incidences(&[event.clone()])
        .expect("purge"));

    assert!(storage.deleted_incidences(None, None).expect("tombstones").is_empty());
    let conn = raw_connection(&storage);
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM Components WHERE UID = 'E1'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(rows, 0);
}

/// Purging only touches soft-deleted rows; a live incidence survives.
#[test]
fn purge_spares_live_rows() {
    let (_dir, mut storage) = open_with_notebook();
    let event = sample_event("E-live", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);

    assert!(storage
        .purge_deleted_incidences(&[event.clone()])
        .expect("purge"));
    assert_eq!(storage.all_incidences(None).expect("live").len(), 1);
}

/// Re-inserting a previously deleted `(uid, recurrence id)` collapses the
/// tombstone instead of colliding with it.
#[test]
fn insert_collapses_tombstone() {
    let (_dir, mut storage) = open_with_notebook();
    let event = sample_event("E1", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);
    delete_one(&mut storage, NOTEBOOK, &event, DeleteAction::MarkDeleted);

    let revived = sample_event("E1", utc(2024, 5, 2, 9, 0, 0), utc(2024, 5, 2, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &revived);

    assert!(storage.deleted_incidences(None, None).expect("tombstones").is_empty());
    let live = storage.all_incidences(None).expect("live");
    assert_eq!(live.len(), 1);
    assert_eq!(
        live[0].dt_start,
        Some(caldb::CalDateTime::Utc(utc(2024, 5, 2, 9, 0, 0)))
    );
}

/// Purge-deleting straight from a save batch never leaves a tombstone.
#[test]
fn purge_delete_action_removes_row() {
    let (_dir, mut storage) = open_with_notebook();
    let event = sample_event("E1", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);
    delete_one(&mut storage, NOTEBOOK, &event, DeleteAction::PurgeDeleted);

    assert!(storage.deleted_incidences(None, None).expect("tombstones").is_empty());
    assert!(storage.all_incidences(None).expect("live").is_empty());
}

/// Hard deletion drops the child rows with the component.
#[test]
fn hard_delete_cascades_children() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-casc", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    event
        .attendees
        .push(caldb::Attendee::new("Ann", "ann@example.org"));
    event.alarms.push(caldb::Alarm::display("ping", -60));
    store_one(&mut storage, NOTEBOOK, &event);

    let conn = raw_connection(&storage);
    assert_eq!(child_rows(&conn, "Attendee", "E-casc"), 1);
    delete_one(&mut storage, NOTEBOOK, &event, DeleteAction::PurgeDeleted);

    let attendee_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM Attendee", [], |row| row.get(0))
        .unwrap();
    let alarm_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM Alarm", [], |row| row.get(0))
        .unwrap();
    assert_eq!(attendee_rows, 0);
    assert_eq!(alarm_rows, 0);
}

/// Every successful mutating batch bumps the transaction id.
#[test]
fn transaction_id_is_monotonic() {
    let (_dir, mut storage) = open_with_notebook();
    // The notebook insert already bumped it once as an external change.
    let after_notebook = storage.transaction_id();

    let event = sample_event("E1", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);
    let after_insert = storage.transaction_id();
    assert!(after_insert > after_notebook);

    let mut renamed = event.clone();
    renamed.summary = "renamed".to_string();
    update_one(&mut storage, NOTEBOOK, &renamed);
    let after_update = storage.transaction_id();
    assert!(after_update > after_insert);

    delete_one(&mut storage, NOTEBOOK, &renamed, DeleteAction::MarkDeleted);
    assert!(storage.transaction_id() > after_update);
}

/// An update on a never-stored incidence fails the batch but does not
/// poison it: the valid rows still land (best effort, no rollback).
#[test]
fn best_effort_batch() {
    let (_dir, mut storage) = open_with_notebook();
    let good = sample_event("E-good", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    let ghost = sample_event("E-ghost", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));

    let ok = storage
        .store_incidences(
            &[(NOTEBOOK.to_string(), good.clone())],
            &[(NOTEBOOK.to_string(), ghost.clone())],
            &[],
            DeleteAction::MarkDeleted,
        )
        .expect("batch runs");
    assert!(!ok, "the ghost update must fail the batch");

    // The good row still committed.
    assert_eq!(storage.all_incidences(None).expect("live").len(), 1);
}
