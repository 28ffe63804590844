//! # Storage Session
//!
//! The synchronous heart of the engine: one session owns one SQLite
//! connection, the cross-process lock, and the change-ping handle for a
//! database file.
//!
//! ```text
//! caller ──► Storage ──► ProcessLock ──► SQLite file
//!               │                           │
//!               │            sibling <db>.changed  ◄── peers' watchers
//!               ▼
//!          observers (opened / modified / updated / loaded / finished)
//! ```
//!
//! Every operation acquires the lock, does its SQL work, and releases
//! before returning. Mutations bump the transaction id in `Metadata` and
//! truncate the ping file so peer processes notice; `check_modified`
//! performs the reverse dance, treating a ping whose transaction id equals
//! the session's saved one as spurious.
//!
//! Save batches are best-effort: a failing row is logged and skipped, the
//! surrounding transaction still commits, and the batch reports `false`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::{Connection, ToSql};
use tracing::{debug, warn};

use crate::codec::{self, CalDateTime};
use crate::error::{Error, Result};
use crate::lock::{ChangePing, ProcessLock};
use crate::reader;
use crate::schema::*;
use crate::types::{
    notebook_flags, DbOperation, DeleteAction, Filter, Incidence, IncidenceData, Notebook,
    NotebookIncidences, Person, SortedFilter,
};
use crate::writer;

// =============================================================================
// Observers
// =============================================================================

/// Process-local notifications emitted by a session.
///
/// All methods have empty defaults so implementors pick the signals they
/// care about.
pub trait StorageObserver: Send + Sync {
    /// The session finished opening; `notebooks` is the stored set.
    fn storage_opened(&self, _notebooks: &[Notebook]) {}
    /// The session was closed.
    fn storage_closed(&self) {}
    /// Another process committed changes; reload cached state.
    fn storage_modified(&self, _notebooks: &[Notebook]) {}
    /// A save batch committed.
    fn storage_updated(
        &self,
        _additions: &NotebookIncidences,
        _modifications: &NotebookIncidences,
        _deletions: &NotebookIncidences,
    ) {
    }
    /// A load produced these incidences.
    fn incidences_loaded(&self, _incidences: &NotebookIncidences) {}
    /// An operation completed; `error` mirrors the boolean result.
    fn finished(&self, _error: bool, _message: &str) {}
}

// =============================================================================
// Configuration
// =============================================================================

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Database file path; the per-user default location when unset.
    pub database_path: Option<PathBuf>,
    /// Silently drop incidences whose notebook is not stored.
    pub validate_notebooks: bool,
    /// Session time zone, serialized into the database on the next save
    /// and used for zone-less decoding by consumers.
    pub timezone: Option<Tz>,
}

impl StorageConfig {
    pub fn new() -> Self {
        Self {
            validate_notebooks: true,
            ..Self::default()
        }
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = Some(timezone);
        self
    }

    pub fn with_validate_notebooks(mut self, validate: bool) -> Self {
        self.validate_notebooks = validate;
        self
    }
}

/// The default per-user database location: the privileged data directory
/// when it is writable, the plain one otherwise.
pub fn default_database_path() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    let privileged = home.join(".local/share/system/privileged");
    let base = if privileged.is_dir()
        && std::fs::metadata(&privileged)
            .map(|meta| !meta.permissions().readonly())
            .unwrap_or(false)
    {
        privileged
    } else {
        home.join(".local/share/system")
    };
    base.join("Calendar/caldb/db")
}

fn serialize_timezone(timezone: Tz) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//caldb//EN\r\n\
         BEGIN:VTIMEZONE\r\nTZID:{}\r\nEND:VTIMEZONE\r\nEND:VCALENDAR\r\n",
        timezone.name()
    )
}

fn parse_timezone(blob: &str) -> Option<Tz> {
    blob.lines()
        .find_map(|line| line.trim().strip_prefix("TZID:"))
        .and_then(|id| id.trim().parse().ok())
}

// =============================================================================
// Storage
// =============================================================================

/// A storage session over one calendar database file.
///
/// Single-threaded by design; the async façade serializes access from its
/// worker thread. Dropping an open session closes it.
pub struct Storage {
    db: Option<crate::schema::Database>,
    db_path: PathBuf,
    lock: ProcessLock,
    ping: ChangePing,
    saved_transaction_id: i64,
    last_ping_mtime: Option<SystemTime>,
    timezone: Option<Tz>,
    timezone_dirty: bool,
    validate_notebooks: bool,
    notebooks: Vec<Notebook>,
    default_notebook: Option<String>,
    observers: Vec<Arc<dyn StorageObserver>>,
}

impl Storage {
    /// Prepares a session for the configured database file. Nothing is
    /// opened yet; call [`Storage::open`].
    pub fn new(config: StorageConfig) -> Result<Self> {
        let db_path = config.database_path.unwrap_or_else(default_database_path);
        if let Some(parent) = db_path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(dir = %parent.display(), %err, "cannot create database directory");
            }
        }
        let lock = ProcessLock::new(&db_path)?;
        let ping = ChangePing::new(&db_path)?;
        Ok(Self {
            db: None,
            db_path,
            lock,
            ping,
            saved_transaction_id: 0,
            last_ping_mtime: None,
            timezone: config.timezone,
            timezone_dirty: config.timezone.is_some(),
            validate_notebooks: config.validate_notebooks,
            notebooks: Vec::new(),
            default_notebook: None,
            observers: Vec::new(),
        })
    }

    /// Convenience: prepare and open in one step.
    pub fn open_with(config: StorageConfig) -> Result<Self> {
        let mut storage = Self::new(config)?;
        storage.open()?;
        Ok(storage)
    }

    pub fn register_observer(&mut self, observer: Arc<dyn StorageObserver>) {
        self.observers.push(observer);
    }

    /// The database file this session works on.
    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    /// The sibling change-ping file peers watch.
    pub fn change_path(&self) -> &Path {
        self.ping.path()
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    fn conn(&self) -> Result<&Connection> {
        self.db.as_ref().map(|db| &db.conn).ok_or(Error::Closed)
    }

    /// Opens the database: applies the schema, reads the saved transaction
    /// id, loads the time-zone blob and the notebooks, and primes the
    /// change watcher state.
    pub fn open(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Err(Error::Schema("storage is already open".to_string()));
        }

        {
            let _guard = self.lock.acquire()?;
            let db = crate::schema::Database::open(&self.db_path)
                .map_err(|err| Error::Schema(format!("cannot open database: {err}")))?;
            self.saved_transaction_id = reader::select_transaction_id(&db.conn)?;
            self.db = Some(db);
        }
        debug!(path = %self.db_path.display(), "database opened");

        self.load_timezone()?;
        self.reload_notebooks()?;
        self.last_ping_mtime = self.ping.modified_time();

        let notebooks = self.notebooks.clone();
        for observer in &self.observers {
            observer.storage_opened(&notebooks);
        }
        Ok(())
    }

    /// Closes the session. Idempotent; cached statements are finalized
    /// with the connection.
    pub fn close(&mut self) {
        if self.db.take().is_some() {
            debug!(path = %self.db_path.display(), "database closed");
            for observer in &self.observers {
                observer.storage_closed();
            }
        }
    }

    /// Best-effort cancellation signal; this backend ignores it.
    pub fn cancel(&self) -> bool {
        true
    }

    // =========================================================================
    // Time zone
    // =========================================================================

    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    /// Changes the session time zone; persisted on the next save.
    pub fn set_timezone(&mut self, timezone: Tz) {
        if self.timezone != Some(timezone) {
            self.timezone = Some(timezone);
            self.timezone_dirty = true;
        }
    }

    fn load_timezone(&mut self) -> Result<()> {
        let blob = {
            let conn = self.conn()?;
            let _guard = self.lock.acquire()?;
            reader::select_timezones(conn)?
        };
        if let Some(stored) = parse_timezone(&blob) {
            if self.timezone.is_none() {
                self.timezone = Some(stored);
                self.timezone_dirty = false;
            } else if self.timezone == Some(stored) {
                self.timezone_dirty = false;
            }
        }
        Ok(())
    }

    /// Writes the serialized session zone; the lock is already held by
    /// the caller.
    fn save_timezone(&self, conn: &Connection) -> Result<bool> {
        match self.timezone {
            Some(timezone) if self.timezone_dirty => {
                writer::update_timezones(conn, &serialize_timezone(timezone))?;
                debug!(zone = timezone.name(), "timezone blob updated");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // =========================================================================
    // Notebooks
    // =========================================================================

    /// The notebooks as of the last load, alphabetical by name.
    pub fn notebooks(&self) -> &[Notebook] {
        &self.notebooks
    }

    pub fn notebook(&self, uid: &str) -> Option<&Notebook> {
        self.notebooks.iter().find(|notebook| notebook.uid == uid)
    }

    /// The uid of the default notebook, when one is stored.
    pub fn default_notebook(&self) -> Option<&str> {
        self.default_notebook.as_deref()
    }

    fn has_notebook(&self, uid: &str) -> bool {
        self.notebooks.iter().any(|notebook| notebook.uid == uid)
    }

    /// Re-reads the notebook rows from the database.
    pub fn reload_notebooks(&mut self) -> Result<()> {
        let notebooks = {
            let conn = self.conn()?;
            let _guard = self.lock.acquire()?;
            reader::select_calendars(conn)?
        };
        self.default_notebook = notebooks
            .iter()
            .find(|notebook| notebook.is_default())
            .map(|notebook| notebook.uid.clone());
        self.notebooks = notebooks;
        Ok(())
    }

    /// Inserts, updates or deletes a notebook row.
    ///
    /// Deletion leaves no orphans: the notebook's tombstones are purged
    /// and its remaining incidences hard-deleted first. The transaction id
    /// is incremented as an *external* change (the session forgets its own
    /// saved id) so every process, this one included, reloads.
    pub fn modify_notebook(&mut self, notebook: &Notebook, op: DbOperation) -> Result<()> {
        let (deleted, all) = if op == DbOperation::Delete {
            (
                self.deleted_incidences(None, Some(&notebook.uid))?,
                self.all_incidences(Some(&notebook.uid))?,
            )
        } else {
            (Vec::new(), Vec::new())
        };

        {
            let conn = self.conn()?;
            let _guard = self.lock.acquire()?;

            let is_default = notebook.is_default();
            writer::modify_calendars(conn, notebook, op, is_default)?;
            if is_default && op != DbOperation::Delete {
                // At most one notebook carries the default flag.
                conn.execute(
                    "UPDATE Calendars SET Flags = Flags & ~?1 WHERE CalendarId != ?2",
                    rusqlite::params![notebook_flags::DEFAULT, notebook.uid],
                )?;
            }

            if !deleted.is_empty() {
                debug!(count = deleted.len(), notebook = %notebook.uid, "purging tombstones");
                conn.execute_batch(BEGIN_TRANSACTION)?;
                for incidence in &deleted {
                    if let Err(err) = writer::purge_deleted_components(
                        conn,
                        &incidence.uid,
                        incidence.recurrence_id_seconds(),
                    ) {
                        warn!(uid = %incidence.uid, %err, "cannot purge tombstone");
                    }
                }
                conn.execute_batch(COMMIT_TRANSACTION)?;
            }
            if !all.is_empty() {
                debug!(count = all.len(), notebook = %notebook.uid, "deleting incidences");
                let now = Utc::now();
                conn.execute_batch(BEGIN_TRANSACTION)?;
                for incidence in &all {
                    if let Err(err) = writer::modify_components(
                        conn,
                        incidence,
                        &notebook.uid,
                        DbOperation::Delete,
                        now,
                    ) {
                        warn!(uid = %incidence.uid, %err, "cannot delete incidence");
                    }
                }
                conn.execute_batch(COMMIT_TRANSACTION)?;
            }

            writer::increment_transaction_id(conn)?;
        }

        // Forget our own id so the next ping reads as external.
        self.saved_transaction_id = -1;
        self.ping.signal();
        self.reload_notebooks()?;
        Ok(())
    }

    /// Moves the default flag onto `uid`, persisting both affected rows.
    pub fn set_default_notebook(&mut self, uid: &str) -> Result<()> {
        let mut notebook = self
            .notebook(uid)
            .cloned()
            .ok_or_else(|| Error::Inconsistency(format!("no notebook with uid '{uid}'")))?;
        notebook.set_default(true);
        self.modify_notebook(&notebook, DbOperation::Update)
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Saves a batch: inserts, rewrites and deletions, each list mapped to
    /// its operation, all inside one transaction.
    ///
    /// Inserting a `(uid, recurrence id)` also collapses any soft-deleted
    /// twin so tombstones never shadow a revived incidence. The deletions
    /// list is soft- or hard-deleted per `delete_action`.
    ///
    /// Best effort: returns `Ok(false)` when at least one row failed; the
    /// rest of the batch is committed regardless.
    pub fn store_incidences(
        &mut self,
        additions: &[(String, Incidence)],
        modifications: &[(String, Incidence)],
        deletions: &[(String, Incidence)],
        delete_action: DeleteAction,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut success = true;
        let mut timezone_saved = false;
        let mut new_transaction_id = None;

        let delete_op = match delete_action {
            DeleteAction::MarkDeleted => DbOperation::MarkDeleted,
            DeleteAction::PurgeDeleted => DbOperation::Delete,
        };

        // Engine-side bookkeeping defaults, applied to clones so the
        // observer fan-out sees what was actually written.
        let prepare = |(notebook, incidence): &(String, Incidence), insert: bool| {
            let mut incidence = incidence.clone();
            if incidence.last_modified.is_none() {
                incidence.last_modified = Some(now);
            }
            if insert && incidence.created.is_none() {
                incidence.created = Some(now);
            }
            (notebook.clone(), incidence)
        };
        let additions: NotebookIncidences =
            additions.iter().map(|entry| prepare(entry, true)).collect();
        let modifications: NotebookIncidences =
            modifications.iter().map(|entry| prepare(entry, false)).collect();
        let deletions: NotebookIncidences =
            deletions.iter().map(|entry| prepare(entry, false)).collect();

        let changed = {
            let conn = self.conn()?;
            let _guard = self.lock.acquire()?;

            match self.save_timezone(conn) {
                Ok(saved) => timezone_saved = saved,
                Err(err) => warn!(%err, "saving timezone blob failed"),
            }

            conn.execute_batch(BEGIN_TRANSACTION)?;
            for (batch, op) in [
                (&additions, DbOperation::Insert),
                (&modifications, DbOperation::Update),
                (&deletions, delete_op),
            ] {
                for (notebook_uid, incidence) in batch.iter() {
                    if self.validate_notebooks && !self.has_notebook(notebook_uid) {
                        debug!(uid = %incidence.uid, notebook = %notebook_uid,
                               "incidence of unknown notebook dropped");
                        continue;
                    }
                    if let Err(err) =
                        writer::modify_components(conn, incidence, notebook_uid, op, now)
                    {
                        warn!(uid = %incidence.uid, ?op, %err, "incidence row failed");
                        success = false;
                        continue;
                    }
                    if op == DbOperation::Insert {
                        // Don't leave a tombstone with the same key behind.
                        if let Err(err) = writer::purge_deleted_components(
                            conn,
                            &incidence.uid,
                            incidence.recurrence_id_seconds(),
                        ) {
                            warn!(uid = %incidence.uid, %err, "cannot collapse tombstone");
                            success = false;
                        }
                    }
                }
            }
            conn.execute_batch(COMMIT_TRANSACTION)?;

            let changed = timezone_saved
                || !additions.is_empty()
                || !modifications.is_empty()
                || !deletions.is_empty();
            if changed {
                new_transaction_id = Some(writer::increment_transaction_id(conn)?);
            }
            changed
        };

        if let Some(id) = new_transaction_id {
            self.saved_transaction_id = id;
        }
        if timezone_saved {
            self.timezone_dirty = false;
        }
        if changed {
            self.ping.signal();
            self.last_ping_mtime = self.ping.modified_time();
            for observer in &self.observers {
                observer.storage_updated(&additions, &modifications, &deletions);
            }
        }

        let message = if success {
            "save completed"
        } else {
            "errors saving incidences"
        };
        for observer in &self.observers {
            observer.finished(!success, message);
        }
        Ok(success)
    }

    /// Hard-deletes the listed incidences, but only those currently
    /// soft-deleted. Purging is invisible to peers (no transaction id
    /// bump, no ping): tombstone collection is local housekeeping.
    pub fn purge_deleted_incidences(&mut self, list: &[Incidence]) -> Result<bool> {
        let conn = self.conn()?;
        let _guard = self.lock.acquire()?;
        let mut success = true;

        conn.execute_batch(BEGIN_TRANSACTION)?;
        for incidence in list {
            if let Err(err) = writer::purge_deleted_components(
                conn,
                &incidence.uid,
                incidence.recurrence_id_seconds(),
            ) {
                warn!(uid = %incidence.uid, %err, "cannot purge incidence");
                success = false;
            }
        }
        conn.execute_batch(COMMIT_TRANSACTION)?;
        Ok(success)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Loads every incidence matching `filter`, fanning the result out to
    /// the `incidences_loaded` observers.
    pub fn load_incidences(&self, filter: &Filter) -> Result<NotebookIncidences> {
        let result = match filter {
            Filter::All => self.run_filter(SELECT_COMPONENTS_ALL, &[])?,
            Filter::Notebook(uid) => {
                self.run_filter(SELECT_COMPONENTS_BY_NOTEBOOKUID, &[uid])?
            }
            Filter::Incidence {
                uid,
                recurrence_id,
            } => {
                let seconds = recurrence_id
                    .as_ref()
                    .map(CalDateTime::instance_seconds)
                    .unwrap_or(0);
                self.run_filter(SELECT_COMPONENTS_BY_UID_AND_RECURID, &[uid, &seconds])?
            }
            Filter::Series(uid) => self.run_filter(SELECT_COMPONENTS_BY_UID, &[uid])?,
            Filter::DatetimeRange { start, end } => match (start, end) {
                (Some(start), Some(end)) => {
                    let start = codec::to_origin(start);
                    let end = codec::to_origin(end);
                    self.run_filter(SELECT_COMPONENTS_BY_DATE_BOTH, &[&end, &start])?
                }
                (Some(start), None) => {
                    let start = codec::to_origin(start);
                    self.run_filter(SELECT_COMPONENTS_BY_DATE_START, &[&start])?
                }
                (None, Some(end)) => {
                    let end = codec::to_origin(end);
                    self.run_filter(SELECT_COMPONENTS_BY_DATE_END, &[&end])?
                }
                (None, None) => self.run_filter(SELECT_COMPONENTS_ALL, &[])?,
            },
            Filter::NoDate => self.run_filter(SELECT_COMPONENTS_BY_PLAIN, &[])?,
            Filter::UncompletedTodos => {
                self.run_filter(SELECT_COMPONENTS_BY_UNCOMPLETED_TODOS, &[])?
            }
            Filter::Journals => self.run_filter(SELECT_COMPONENTS_BY_JOURNAL, &[])?,
            Filter::Recursive => self.run_filter(SELECT_COMPONENTS_BY_RECURSIVE, &[])?,
            Filter::GeoLocation {
                latitude,
                longitude,
                delta_latitude,
                delta_longitude,
            } => {
                if *delta_latitude >= 180.0 && *delta_longitude >= 360.0 {
                    // The box covers the globe.
                    self.run_filter(SELECT_COMPONENTS_BY_GEO, &[])?
                } else {
                    let min_lat = latitude - delta_latitude;
                    let min_lon = longitude - delta_longitude;
                    let max_lat = latitude + delta_latitude;
                    let max_lon = longitude + delta_longitude;
                    self.run_filter(
                        SELECT_COMPONENTS_BY_GEO_AREA,
                        &[&min_lat, &min_lon, &max_lat, &max_lon],
                    )?
                }
            }
            Filter::Attendees => self.run_filter(SELECT_COMPONENTS_BY_ATTENDEE, &[])?,
        };

        for observer in &self.observers {
            observer.incidences_loaded(&result);
        }
        for observer in &self.observers {
            observer.finished(false, "load completed");
        }
        Ok(result)
    }

    fn run_filter(&self, sql: &str, params: &[&dyn ToSql]) -> Result<NotebookIncidences> {
        let conn = self.conn()?;
        let _guard = self.lock.acquire()?;
        let mut result = Vec::new();
        reader::for_each_component(conn, sql, params, |notebook, incidence| {
            if self.validate_notebooks && !self.has_notebook(&notebook) {
                debug!(uid = %incidence.uid, notebook = %notebook,
                       "incidence of unknown notebook dropped");
                return true;
            }
            result.push((notebook, incidence));
            true
        })?;
        Ok(result)
    }

    /// Loads a sorted window of incidences.
    ///
    /// `last` threads the pagination anchor: pass `None` for the first
    /// page; on return it holds the anchor to resume from, positioned so
    /// no equal-anchor run is ever split across pages. Pages run
    /// descending by anchor, except `Datetime { before: false }` which
    /// walks forward in time.
    pub fn load_sorted_incidences(
        &self,
        filter: &SortedFilter,
        limit: usize,
        last: &mut Option<DateTime<Utc>>,
    ) -> Result<NotebookIncidences> {
        // Descending listings start from the far future, the ascending
        // one from the far past.
        let ascending = matches!(filter, SortedFilter::Datetime { before: false, .. });
        let anchor_seconds = last
            .map(|dt| codec::to_origin(&dt))
            .unwrap_or(if ascending { i64::MIN } else { i64::MAX });

        let result = match filter {
            SortedFilter::Datetime { use_date, before } => {
                if *before {
                    let sql = if *use_date {
                        SELECT_COMPONENTS_BY_DATE_SMART
                    } else {
                        SELECT_COMPONENTS_BY_CREATED_SMART
                    };
                    self.run_sorted(sql, &[&anchor_seconds], limit, last, *use_date, false)?
                } else {
                    // The future listing anchors on start dates and
                    // ignores event ends.
                    self.run_sorted(
                        SELECT_COMPONENTS_BY_FUTURE_DATE_SMART,
                        &[&anchor_seconds],
                        limit,
                        last,
                        true,
                        true,
                    )?
                }
            }
            SortedFilter::Journals => self.run_sorted(
                SELECT_COMPONENTS_BY_JOURNAL_DATE,
                &[&anchor_seconds],
                limit,
                last,
                true,
                false,
            )?,
            SortedFilter::CompletedTodos { use_date } => {
                let sql = if *use_date {
                    SELECT_COMPONENTS_BY_COMPLETED_TODOS_AND_DATE
                } else {
                    SELECT_COMPONENTS_BY_COMPLETED_TODOS_AND_CREATED
                };
                self.run_sorted(sql, &[&anchor_seconds], limit, last, *use_date, false)?
            }
            SortedFilter::GeoLocation { use_date } => {
                let sql = if *use_date {
                    SELECT_COMPONENTS_BY_GEO_AND_DATE
                } else {
                    SELECT_COMPONENTS_BY_GEO_AND_CREATED
                };
                self.run_sorted(sql, &[&anchor_seconds], limit, last, *use_date, false)?
            }
            SortedFilter::Attendee { email } => match email {
                Some(email) => self.run_sorted(
                    SELECT_COMPONENTS_BY_ATTENDEE_EMAIL_AND_CREATED,
                    &[email, &anchor_seconds],
                    limit,
                    last,
                    false,
                    false,
                )?,
                None => self.run_sorted(
                    SELECT_COMPONENTS_BY_ATTENDEE_AND_CREATED,
                    &[&anchor_seconds],
                    limit,
                    last,
                    false,
                    false,
                )?,
            },
        };

        for observer in &self.observers {
            observer.incidences_loaded(&result);
        }
        for observer in &self.observers {
            observer.finished(false, "load completed");
        }
        Ok(result)
    }

    /// The shared pagination loop.
    ///
    /// Anchors are compared row to row; when the anchor changes while the
    /// window is already full, the run that just ended is the page
    /// boundary and `last` is set to its anchor. A page may therefore
    /// exceed `limit` to finish an equal-anchor run, which is what keeps
    /// repeated calls from skipping or duplicating rows.
    fn run_sorted(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        limit: usize,
        last: &mut Option<DateTime<Utc>>,
        use_date: bool,
        ignore_end: bool,
    ) -> Result<NotebookIncidences> {
        let conn = self.conn()?;
        let _guard = self.lock.acquire()?;

        let mut result = Vec::new();
        let mut previous: Option<DateTime<Utc>> = None;
        let mut boundary: Option<DateTime<Utc>> = None;
        let mut count = 0usize;

        reader::for_each_component(conn, sql, params, |notebook, incidence| {
            if self.validate_notebooks && !self.has_notebook(&notebook) {
                return true;
            }

            let end = incidence.end_date_time();
            let is_event = matches!(incidence.data, IncidenceData::Event(_));
            let anchor = if use_date && end.is_some() && !(ignore_end && is_event) {
                end.map(CalDateTime::as_utc).unwrap_or_default()
            } else if use_date && incidence.dt_start.is_some() {
                incidence
                    .dt_start
                    .as_ref()
                    .map(CalDateTime::as_utc)
                    .unwrap_or_default()
            } else {
                incidence.created.unwrap_or_default()
            };

            if previous != Some(anchor) {
                if previous.is_none() || limit == 0 || count < limit {
                    previous = Some(anchor);
                } else {
                    // Window full: the finished run is the boundary.
                    boundary = previous;
                    return false;
                }
            }
            boundary = Some(anchor);
            result.push((notebook, incidence));
            count += 1;
            true
        })?;

        *last = boundary;
        Ok(result)
    }

    // =========================================================================
    // Sync-token queries
    // =========================================================================

    /// Incidences created at or after `after`.
    pub fn inserted_incidences(
        &self,
        after: DateTime<Utc>,
        notebook_uid: Option<&str>,
    ) -> Result<Vec<Incidence>> {
        let seconds = codec::to_origin(&after);
        match notebook_uid {
            Some(uid) => self.select_incidences(
                SELECT_COMPONENTS_BY_CREATED_AND_NOTEBOOK,
                &[&seconds, &uid],
            ),
            None => self.select_incidences(SELECT_COMPONENTS_BY_CREATED, &[&seconds]),
        }
    }

    /// Incidences modified at or after `after`, excluding rows created in
    /// the same window (those are reported as insertions).
    pub fn modified_incidences(
        &self,
        after: DateTime<Utc>,
        notebook_uid: Option<&str>,
    ) -> Result<Vec<Incidence>> {
        let seconds = codec::to_origin(&after);
        match notebook_uid {
            Some(uid) => self.select_incidences(
                SELECT_COMPONENTS_BY_LAST_MODIFIED_AND_NOTEBOOK,
                &[&seconds, &uid],
            ),
            None => self.select_incidences(SELECT_COMPONENTS_BY_LAST_MODIFIED, &[&seconds]),
        }
    }

    /// Tombstones, optionally only those deleted at or after `after`.
    pub fn deleted_incidences(
        &self,
        after: Option<DateTime<Utc>>,
        notebook_uid: Option<&str>,
    ) -> Result<Vec<Incidence>> {
        match (after, notebook_uid) {
            (Some(after), Some(uid)) => {
                let seconds = codec::to_origin(&after);
                self.select_incidences(
                    SELECT_COMPONENTS_BY_DELETED_AND_NOTEBOOK,
                    &[&seconds, &uid],
                )
            }
            (Some(after), None) => {
                let seconds = codec::to_origin(&after);
                self.select_incidences(SELECT_COMPONENTS_BY_DELETED, &[&seconds])
            }
            (None, Some(uid)) => {
                self.select_incidences(SELECT_COMPONENTS_ALL_DELETED_BY_NOTEBOOK, &[&uid])
            }
            (None, None) => self.select_incidences(SELECT_COMPONENTS_ALL_DELETED, &[]),
        }
    }

    /// Every live incidence, optionally of one notebook.
    pub fn all_incidences(&self, notebook_uid: Option<&str>) -> Result<Vec<Incidence>> {
        match notebook_uid {
            Some(uid) => self.select_incidences(SELECT_COMPONENTS_BY_NOTEBOOKUID, &[&uid]),
            None => self.select_incidences(SELECT_COMPONENTS_ALL, &[]),
        }
    }

    /// Incidences sharing start and summary with `incidence`, likely
    /// duplicates from an import.
    pub fn duplicate_incidences(
        &self,
        incidence: &Incidence,
        notebook_uid: Option<&str>,
    ) -> Result<Vec<Incidence>> {
        let start = codec::encode(incidence.dt_start.as_ref(), incidence.all_day);
        match notebook_uid {
            Some(uid) => self.select_incidences(
                SELECT_COMPONENTS_BY_DUPLICATE_AND_NOTEBOOK,
                &[&start.utc, &incidence.summary, &uid],
            ),
            None => self.select_incidences(
                SELECT_COMPONENTS_BY_DUPLICATE,
                &[&start.utc, &incidence.summary],
            ),
        }
    }

    fn select_incidences(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Incidence>> {
        let conn = self.conn()?;
        let _guard = self.lock.acquire()?;
        let mut result = Vec::new();
        reader::for_each_component(conn, sql, params, |_notebook, incidence| {
            result.push(incidence);
            true
        })?;
        Ok(result)
    }

    /// When `incidence` is soft-deleted, the instant it was deleted.
    pub fn incidence_deleted_date(&self, incidence: &Incidence) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let _guard = self.lock.acquire()?;
        let mut stmt = conn.prepare_cached(SELECT_COMPONENTS_BY_UID_RECID_AND_DELETED)?;
        let mut rows = stmt.query(rusqlite::params![
            incidence.uid,
            incidence.recurrence_id_seconds()
        ])?;
        match rows.next()? {
            Some(row) => Ok(codec::from_origin(row.get::<_, i64>(1)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Counts and contacts
    // =========================================================================

    pub fn event_count(&self) -> Result<i64> {
        self.count(SELECT_EVENT_COUNT)
    }

    pub fn todo_count(&self) -> Result<i64> {
        self.count(SELECT_TODO_COUNT)
    }

    pub fn journal_count(&self) -> Result<i64> {
        self.count(SELECT_JOURNAL_COUNT)
    }

    fn count(&self, sql: &str) -> Result<i64> {
        let conn = self.conn()?;
        let _guard = self.lock.acquire()?;
        reader::select_count(conn, sql)
    }

    /// Distinct attendee contacts, ordered by number of appearances.
    pub fn load_contacts(&self) -> Result<Vec<Person>> {
        let conn = self.conn()?;
        let _guard = self.lock.acquire()?;
        reader::select_contacts(conn)
    }

    // =========================================================================
    // Change detection
    // =========================================================================

    /// Polls the ping file and, on a real external change, refreshes the
    /// session's cached state and fires the `modified` observers.
    ///
    /// Returns whether an external change was detected. Pings caused by
    /// this session's own saves (or with an unchanged transaction id) are
    /// spurious and ignored.
    pub fn check_modified(&mut self) -> Result<bool> {
        let mtime = self.ping.modified_time();
        if mtime == self.last_ping_mtime {
            return Ok(false);
        }
        self.last_ping_mtime = mtime;
        self.file_changed()
    }

    /// The transaction-id comparison behind [`Storage::check_modified`];
    /// watchers that already know the ping file moved call this directly.
    pub fn file_changed(&mut self) -> Result<bool> {
        let transaction_id = {
            let conn = self.conn()?;
            let _guard = self.lock.acquire()?;
            match reader::select_transaction_id(conn) {
                Ok(id) => id,
                // Force a reload when the id cannot be read.
                Err(err) => {
                    warn!(%err, "cannot read transaction id");
                    self.saved_transaction_id - 1
                }
            }
        };

        if transaction_id == self.saved_transaction_id {
            return Ok(false);
        }
        self.saved_transaction_id = transaction_id;
        debug!(path = %self.db_path.display(), transaction_id, "database modified externally");

        if let Err(err) = self.load_timezone() {
            warn!(%err, "reloading timezone failed");
        }
        if let Err(err) = self.reload_notebooks() {
            warn!(%err, "reloading notebooks failed");
        }
        let notebooks = self.notebooks.clone();
        for observer in &self.observers {
            observer.storage_modified(&notebooks);
        }
        Ok(true)
    }

    /// The transaction id as of the session's last own mutation or
    /// detected external change.
    pub fn transaction_id(&self) -> i64 {
        self.saved_transaction_id
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_blob_round_trip() {
        let tz: Tz = "Europe/Helsinki".parse().unwrap();
        let blob = serialize_timezone(tz);
        assert!(blob.contains("BEGIN:VTIMEZONE"));
        assert_eq!(parse_timezone(&blob), Some(tz));
        assert_eq!(parse_timezone(""), None);
        assert_eq!(parse_timezone("BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n"), None);
    }
}
