#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use caldb::{
    DbOperation, DeleteAction, CalDateTime, Filter, Incidence, IncidenceData, Notebook, Storage,
    StorageConfig,
};

pub const NOTEBOOK: &str = "nb-1";

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub fn date(y: i32, mo: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, mo, d).unwrap()
}

/// Opens a fresh storage in its own temp dir. Keep the `TempDir` alive for
/// the duration of the test.
pub fn open_storage() -> (TempDir, Storage) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("cal.db");
    let mut storage =
        Storage::new(StorageConfig::new().with_database_path(path)).expect("prepare storage");
    storage.open().expect("open storage");
    (dir, storage)
}

/// A second session over an existing database file.
pub fn reopen(dir: &TempDir) -> Storage {
    let path = dir.path().join("cal.db");
    let mut storage =
        Storage::new(StorageConfig::new().with_database_path(path)).expect("prepare storage");
    storage.open().expect("open storage");
    storage
}

/// Fresh storage with one notebook ready to hold incidences.
pub fn open_with_notebook() -> (TempDir, Storage) {
    let (dir, mut storage) = open_storage();
    storage
        .modify_notebook(&Notebook::new(NOTEBOOK, "Test notebook"), DbOperation::Insert)
        .expect("insert notebook");
    (dir, storage)
}

/// An event with fixed UTC start and end.
pub fn sample_event(uid: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Incidence {
    let mut event = Incidence::new_event(uid);
    event.summary = format!("event {uid}");
    event.dt_start = Some(CalDateTime::Utc(start));
    if let IncidenceData::Event(fields) = &mut event.data {
        fields.dt_end = Some(CalDateTime::Utc(end));
    }
    event
}

pub fn store_one(storage: &mut Storage, notebook: &str, incidence: &Incidence) {
    let ok = storage
        .store_incidences(
            &[(notebook.to_string(), incidence.clone())],
            &[],
            &[],
            DeleteAction::MarkDeleted,
        )
        .expect("store batch");
    assert!(ok, "storing {} failed", incidence.uid);
}

pub fn update_one(storage: &mut Storage, notebook: &str, incidence: &Incidence) {
    let ok = storage
        .store_incidences(
            &[],
            &[(notebook.to_string(), incidence.clone())],
            &[],
            DeleteAction::MarkDeleted,
        )
        .expect("update batch");
    assert!(ok, "updating {} failed", incidence.uid);
}

pub fn delete_one(
    storage: &mut Storage,
    notebook: &str,
    incidence: &Incidence,
    action: DeleteAction,
) {
    let ok = storage
        .store_incidences(
            &[],
            &[],
            &[(notebook.to_string(), incidence.clone())],
            action,
        )
        .expect("delete batch");
    assert!(ok, "deleting {} failed", incidence.uid);
}

/// Loads the only incidence with this uid, panicking on zero or many.
pub fn load_one(storage: &Storage, uid: &str) -> Incidence {
    let result = storage
        .load_incidences(&Filter::Incidence {
            uid: uid.to_string(),
            recurrence_id: None,
        })
        .expect("load incidence");
    assert_eq!(result.len(), 1, "expected exactly one incidence '{uid}'");
    result.into_iter().next().unwrap().1
}

/// A raw read-only connection next to the session, for on-disk checks.
pub fn raw_connection(storage: &Storage) -> rusqlite::Connection {
    rusqlite::Connection::open(storage.database_path()).expect("open raw connection")
}

/// Row count of `table` for the component carrying `uid`.
pub fn child_rows(conn: &rusqlite::Connection, table: &str, uid: &str) -> i64 {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {table} WHERE ComponentId IN \
             (SELECT ComponentId FROM Components WHERE UID = ?)"
        ),
        [uid],
        |row| row.get(0),
    )
    .expect("count child rows")
}
