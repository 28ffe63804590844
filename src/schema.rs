//! # SQLite Schema
//!
//! The eleven tables of the calendar store and every statement template
//! the engine prepares against them.
//!
//! ## Table Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Metadata (transaction id)      Timezones (serialized zone blob)     │
//! │                                                                      │
//! │  Calendars ──< Calendarproperties                                    │
//! │                                                                      │
//! │  Components ──< Rdates                                               │
//! │      │      ──< Customproperties                                     │
//! │      │      ──< Recursive                                            │
//! │      │      ──< Alarm                                                │
//! │      │      ──< Attendee                                             │
//! │      └──────< Attachments                                            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Why three columns per date-time?
//!
//! Every stored date-time spreads over a UTC-seconds column, a
//! local-seconds column and a zone tag. The pair of integers preserves
//! both the instant *and* the wall-clock reading, so zone-less values
//! (clock times, floating dates) survive without inventing a zone, and
//! zoned values can fall back to their wall clock when a zone id stops
//! resolving. See [`crate::codec`] for the encoding policy.
//!
//! ### Why cascading child tables?
//!
//! All six component child tables key on `ComponentId` with
//! `ON DELETE CASCADE`: hard-deleting a component is a single statement
//! and can never leave orphan child rows. Updates still wipe and
//! re-insert children explicitly, which keeps the child writers to one
//! insert path.
//!
//! ### Why spare columns?
//!
//! The `extra*` columns are reserved fields kept so the schema never
//! needs widening; `extra1` of `Components` holds the incidence color.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

// =============================================================================
// DDL
// =============================================================================
// Each table has its own constant. Comments explain the purpose of the
// non-obvious columns.

/// Single-row table holding the monotonically increasing transaction id.
///
/// # Why a Separate Table?
///
/// SQLite has a `user_version` pragma, but the transaction id is data,
/// not schema: it is the cross-process modification token, bumped under
/// the lock on every mutating batch and compared by peers to tell real
/// changes from spurious pings.
pub const CREATE_METADATA: &str =
    "CREATE TABLE IF NOT EXISTS Metadata(transactionId INTEGER NOT NULL)";

/// Single-row table holding the storage time zone serialized as an
/// iCalendar blob.
///
/// The row is seeded empty; a session with a configured zone rewrites it
/// on the next save so every process decodes zone-less values alike.
pub const CREATE_TIMEZONES: &str =
    "CREATE TABLE IF NOT EXISTS Timezones(TzId INTEGER PRIMARY KEY, ICalData TEXT)";

/// Notebook rows.
///
/// # Columns
///
/// - `CalendarId`: the notebook uid (primary key)
/// - `Flags`: the notebook flag bitset, including the default-notebook
///   bit (see [`crate::types::notebook_flags`])
/// - `syncDate`, `modifiedDate`, `createdDate`: origin seconds, 0 when
///   unset
/// - `attachmentSize`: quota in bytes, negative for unlimited
/// - `sharedWith`: space-joined address list
pub const CREATE_CALENDARS: &str = "CREATE TABLE IF NOT EXISTS Calendars(\
     CalendarId TEXT PRIMARY KEY, Name TEXT, Description TEXT, Color TEXT, \
     Flags INTEGER, syncDate INTEGER, pluginName TEXT, account TEXT, \
     attachmentSize INTEGER, modifiedDate INTEGER, sharedWith TEXT, \
     syncProfile TEXT, createdDate INTEGER, extra1 TEXT, extra2 TEXT)";

/// Notebook custom properties, one row per key.
///
/// # Why a Child Table?
///
/// Property sets are open-ended; a row per key stores any number of them
/// without schema changes. The unique constraint makes the
/// delete-then-insert update idempotent.
pub const CREATE_CALENDARPROPERTIES: &str = "CREATE TABLE IF NOT EXISTS Calendarproperties(\
     CalendarId REFERENCES Calendars(CalendarId) ON DELETE CASCADE, \
     Name TEXT NOT NULL, Value TEXT, UNIQUE(CalendarId, Name))";

/// The incidence table. One row per `(UID, RecurId)` pair; every
/// date-time occupies three columns (origin seconds, local seconds, zone
/// tag).
///
/// # Columns
///
/// Column order matters: the row decoder reads by index.
///
/// ```text
///  0 ComponentId        15 Description        30 RecurIdLocal
///  1 Notebook           16 Status             31 RecurIdTimeZone
///  2 Type               17 GeoLatitude        32 RelatedTo
///  3 Summary            18 GeoLongitude       33 URL
///  4 Category           19 Priority           34 UID
///  5 DateStart          20 Resources          35 Transparency
///  6 DateStartLocal     21 DateCreated        36 LocalOnly
///  7 StartTimeZone      22 DateStamp          37 Percent
///  8 HasDueDate         23 DateLastModified   38 DateCompleted
///  9 DateEndDue         24 Sequence           39 DateCompletedLocal
/// 10 DateEndDueLocal    25 Comments           40 CompletedTimeZone
/// 11 EndDueTimeZone     26 Attachments        41 DateDeleted
/// 12 Duration           27 Contact            42 extra1 (color)
/// 13 Classification     28 InvitationStatus   43 extra2
/// 14 Location           29 RecurId            44 extra3
/// ```
///
/// # Shared Columns
///
/// `DateEndDue` carries an event's end *or* a to-do's due time; the
/// `Type` tag selects the interpretation. `Attachments` is the legacy
/// space-joined URI list, superseded by the `Attachments` table but
/// still decoded for old rows. `InvitationStatus` is a retained column
/// no longer written with meaningful values.
///
/// # Invariants
///
/// - `DateDeleted = 0` marks a live row; non-zero is a tombstone stamped
///   with its deletion instant
/// - `(UID, RecurId, DateDeleted)` is unique (see
///   [`INDEX_COMPONENT_UID`])
pub const CREATE_COMPONENTS: &str = "CREATE TABLE IF NOT EXISTS Components(\
     ComponentId INTEGER PRIMARY KEY AUTOINCREMENT, Notebook TEXT, Type TEXT, \
     Summary TEXT, Category TEXT, DateStart INTEGER, DateStartLocal INTEGER, \
     StartTimeZone TEXT, HasDueDate INTEGER, DateEndDue INTEGER, \
     DateEndDueLocal INTEGER, EndDueTimeZone TEXT, Duration INTEGER, \
     Classification INTEGER, Location TEXT, Description TEXT, Status INTEGER, \
     GeoLatitude REAL, GeoLongitude REAL, Priority INTEGER, Resources TEXT, \
     DateCreated INTEGER, DateStamp INTEGER, DateLastModified INTEGER, \
     Sequence INTEGER, Comments TEXT, Attachments TEXT, Contact TEXT, \
     InvitationStatus INTEGER, RecurId INTEGER, RecurIdLocal INTEGER, \
     RecurIdTimeZone TEXT, RelatedTo TEXT, URL TEXT, UID TEXT, \
     Transparency INTEGER, LocalOnly INTEGER, Percent INTEGER, \
     DateCompleted INTEGER, DateCompletedLocal INTEGER, CompletedTimeZone TEXT, \
     DateDeleted INTEGER, extra1 TEXT, extra2 TEXT, extra3 INTEGER)";

/// Explicit recurrence inclusion/exclusion dates.
///
/// # Row Kinds
///
/// | `Type` | Meaning |
/// |--------|---------|
/// | 1 | rdate (pure date, included) |
/// | 2 | exdate (pure date, excluded) |
/// | 3 | rdatetime (date-time, included) |
/// | 4 | exdatetime (date-time, excluded) |
///
/// One table serves all four lists; the kind column keeps them apart.
pub const CREATE_RDATES: &str = "CREATE TABLE IF NOT EXISTS Rdates(\
     ComponentId INTEGER NOT NULL REFERENCES Components(ComponentId) ON DELETE CASCADE, \
     Type INTEGER, Date INTEGER, DateLocal INTEGER, TimeZone TEXT)";

/// Incidence custom properties, one row per key, with the property
/// parameters preserved alongside the value.
pub const CREATE_CUSTOMPROPERTIES: &str = "CREATE TABLE IF NOT EXISTS Customproperties(\
     ComponentId INTEGER NOT NULL REFERENCES Components(ComponentId) ON DELETE CASCADE, \
     Name TEXT, Value TEXT, Parameters TEXT)";

/// Recurrence and exception rules.
///
/// # Columns
///
/// - `RuleType`: 1 = rrule, 2 = exrule
/// - `Frequency`: 1..=7 in SECONDLY..YEARLY order
/// - `Until` (three columns): the bounded end, absent when `Count` rules
/// - `Count`: occurrence count, -1 for "forever", 0 when `Until` rules
/// - `Interval`: every Nth occurrence
/// - the BY* columns: space-separated integer lists
///
/// # Parallel BYDAY Lists
///
/// BYDAY entries are weekday/position pairs (`-1SU` is "last Sunday"),
/// so they occupy *two* parallel lists: `ByDay` holds the weekday
/// numbers, `ByDayPos` the positional prefixes, matched up by index.
pub const CREATE_RECURSIVE: &str = "CREATE TABLE IF NOT EXISTS Recursive(\
     ComponentId INTEGER NOT NULL REFERENCES Components(ComponentId) ON DELETE CASCADE, \
     RuleType INTEGER, Frequency INTEGER, Until INTEGER, UntilLocal INTEGER, \
     untilTimeZone TEXT, Count INTEGER, Interval INTEGER, BySecond TEXT, \
     ByMinute TEXT, ByHour TEXT, ByDay TEXT, ByDayPos TEXT, ByMonthDay TEXT, \
     ByYearDay TEXT, ByWeekNum TEXT, ByMonth TEXT, BySetPos TEXT, WeekStart INTEGER)";

/// Alarms.
///
/// # One Trigger Shape
///
/// Exactly one of the trigger shapes is populated per row: the
/// `Offset`+`Relation` pair (relative to the incidence start or end) or
/// the three `DateTrigger*` columns (absolute time). The decoder prefers
/// the absolute time when both appear.
///
/// # Overloaded Text Columns
///
/// `Description`, `Attachment` and `Summary` change meaning with the
/// action code, mirroring [`crate::types::Alarm`]. `CustomProperties` is
/// a CRLF-joined alternating key/value list.
pub const CREATE_ALARM: &str = "CREATE TABLE IF NOT EXISTS Alarm(\
     ComponentId INTEGER NOT NULL REFERENCES Components(ComponentId) ON DELETE CASCADE, \
     Action INTEGER, Repeat INTEGER, Duration INTEGER, Offset INTEGER, \
     Relation TEXT, DateTrigger INTEGER, DateTriggerLocal INTEGER, \
     triggerTimeZone TEXT, Description TEXT, Attachment TEXT, Summary TEXT, \
     Address TEXT, CustomProperties TEXT, isEnabled INTEGER)";

/// Attendees.
///
/// # The Organizer Row
///
/// The organizer is stored as an attendee row with `IsOrganizer = 1`,
/// so one table answers both "who participates" and "who organizes".
/// `(ComponentId, Email)` is unique (see [`INDEX_ATTENDEE`]); an
/// attendee sharing the organizer's address folds into that row.
pub const CREATE_ATTENDEE: &str = "CREATE TABLE IF NOT EXISTS Attendee(\
     ComponentId INTEGER NOT NULL REFERENCES Components(ComponentId) ON DELETE CASCADE, \
     Email TEXT, Name TEXT, IsOrganizer INTEGER, Role INTEGER, PartStat INTEGER, \
     Rsvp INTEGER, DelegatedTo TEXT, DelegatedFrom TEXT)";

/// Attachments: either `Data` (binary blob) or `Uri` is set, never both.
///
/// # Why BLOB Storage?
///
/// SQLite stores blobs efficiently in-row, and calendar attachments are
/// small (the notebook quota caps them); a side-car file store would buy
/// nothing but consistency problems.
pub const CREATE_ATTACHMENTS: &str = "CREATE TABLE IF NOT EXISTS Attachments(\
     ComponentId INTEGER NOT NULL REFERENCES Components(ComponentId) ON DELETE CASCADE, \
     Data BLOB, Uri TEXT, MimeType TEXT, ShowInLine INTEGER, Label TEXT, Local INTEGER)";

// -----------------------------------------------------------------------------
// Indices
// -----------------------------------------------------------------------------
// Each child table gets a plain ComponentId index so the per-component
// child selects stay O(log n).

pub const INDEX_CALENDAR: &str =
    "CREATE INDEX IF NOT EXISTS IDX_CALENDAR ON Calendars(CalendarId)";

/// The wide component index backing the date-range and notebook scans.
pub const INDEX_COMPONENT: &str = "CREATE INDEX IF NOT EXISTS IDX_COMPONENT \
     ON Components(ComponentId, Notebook, DateStart, DateEndDue, DateDeleted)";

/// The natural key.
///
/// # Why (UID, RecurId, DateDeleted)?
///
/// - `UID`, `RecurId`: one live row per incidence identity
/// - `DateDeleted`: tombstones carry their deletion instant here, so a
///   tombstone and a revived live row coexist until the tombstone is
///   purged (inserts purge matching tombstones for exactly this reason)
pub const INDEX_COMPONENT_UID: &str = "CREATE UNIQUE INDEX IF NOT EXISTS IDX_COMPONENT_UID \
     ON Components(UID, RecurId, DateDeleted)";
pub const INDEX_COMPONENT_NOTEBOOK: &str =
    "CREATE INDEX IF NOT EXISTS IDX_COMPONENT_NOTEBOOK ON Components(Notebook)";
pub const INDEX_RDATES: &str = "CREATE INDEX IF NOT EXISTS IDX_RDATES ON Rdates(ComponentId)";
pub const INDEX_CUSTOMPROPERTIES: &str =
    "CREATE INDEX IF NOT EXISTS IDX_CUSTOMPROPERTIES ON Customproperties(ComponentId)";
pub const INDEX_RECURSIVE: &str =
    "CREATE INDEX IF NOT EXISTS IDX_RECURSIVE ON Recursive(ComponentId)";
pub const INDEX_ALARM: &str = "CREATE INDEX IF NOT EXISTS IDX_ALARM ON Alarm(ComponentId)";

/// Unique per component and address; duplicate attendee rows are
/// rejected at step time and skipped with a warning.
pub const INDEX_ATTENDEE: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS IDX_ATTENDEE ON Attendee(ComponentId, Email)";
pub const INDEX_ATTACHMENTS: &str =
    "CREATE INDEX IF NOT EXISTS IDX_ATTACHMENTS ON Attachments(ComponentId)";
pub const INDEX_CALENDARPROPERTIES: &str =
    "CREATE INDEX IF NOT EXISTS IDX_CALENDARPROPERTIES ON Calendarproperties(CalendarId)";

// =============================================================================
// Statement templates
// =============================================================================
// Inserts bind every column in declaration order; `Components` fixes
// DateDeleted to 0 and leaves the spare columns empty.

/// Notebook insert; the two spare columns stay empty.
pub const INSERT_CALENDARS: &str =
    "INSERT INTO Calendars VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', '')";
pub const INSERT_CALENDARPROPERTIES: &str = "INSERT INTO Calendarproperties VALUES (?, ?, ?)";

/// Component insert.
///
/// `DateCreated` falls back to "now UTC" when the caller left it unset
/// (the COALESCE), and `DateDeleted` is fixed to 0: fresh rows are live
/// by construction.
pub const INSERT_COMPONENTS: &str = "INSERT INTO Components VALUES (\
     NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
     COALESCE(?, strftime('%s','now')), \
     ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, '', 0)";
pub const INSERT_RDATES: &str = "INSERT INTO Rdates VALUES (?, ?, ?, ?, ?)";
pub const INSERT_CUSTOMPROPERTIES: &str = "INSERT INTO Customproperties VALUES (?, ?, ?, ?)";
pub const INSERT_RECURSIVE: &str = "INSERT INTO Recursive VALUES (\
     ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
pub const INSERT_ALARM: &str =
    "INSERT INTO Alarm VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
pub const INSERT_ATTENDEE: &str = "INSERT INTO Attendee VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";
pub const INSERT_ATTACHMENTS: &str = "INSERT INTO Attachments VALUES (?, ?, ?, ?, ?, ?, ?)";

/// Both singletons update in place; neither table ever grows.
pub const UPDATE_METADATA: &str = "UPDATE Metadata SET transactionId=?";
pub const UPDATE_TIMEZONES: &str = "UPDATE Timezones SET ICalData=? WHERE TzId=1";
pub const UPDATE_CALENDARS: &str = "UPDATE Calendars SET \
     Name=?, Description=?, Color=?, Flags=?, syncDate=?, pluginName=?, account=?, \
     attachmentSize=?, modifiedDate=?, sharedWith=?, syncProfile=?, createdDate=? \
     WHERE CalendarId=?";

/// Component update: rewrites every column under the resolved rowid.
///
/// An unset `DateCreated` keeps the stored value (the COALESCE), so
/// updates never disturb the creation time the sync listings key on.
/// `DateDeleted` is not touched: only live rows are ever updated.
pub const UPDATE_COMPONENTS: &str = "UPDATE Components SET \
     Notebook=?, Type=?, Summary=?, Category=?, DateStart=?, DateStartLocal=?, \
     StartTimeZone=?, HasDueDate=?, DateEndDue=?, DateEndDueLocal=?, EndDueTimeZone=?, \
     Duration=?, Classification=?, Location=?, Description=?, Status=?, GeoLatitude=?, \
     GeoLongitude=?, Priority=?, Resources=?, DateCreated=COALESCE(?, DateCreated), \
     DateStamp=?, DateLastModified=?, Sequence=?, Comments=?, Attachments=?, Contact=?, \
     InvitationStatus=?, RecurId=?, RecurIdLocal=?, RecurIdTimeZone=?, RelatedTo=?, \
     URL=?, UID=?, Transparency=?, LocalOnly=?, Percent=?, DateCompleted=?, \
     DateCompletedLocal=?, CompletedTimeZone=?, extra1=? WHERE ComponentId=?";

/// Soft delete: stamps the deletion instant, keeps everything else.
pub const UPDATE_COMPONENTS_AS_DELETED: &str =
    "UPDATE Components SET DateDeleted=? WHERE ComponentId=?";

pub const DELETE_CALENDARS: &str = "DELETE FROM Calendars WHERE CalendarId=?";
pub const DELETE_CALENDARPROPERTIES: &str =
    "DELETE FROM Calendarproperties WHERE CalendarId=?";

/// Hard delete; the child tables cascade.
pub const DELETE_COMPONENTS: &str = "DELETE FROM Components WHERE ComponentId=?";
pub const DELETE_RDATES: &str = "DELETE FROM Rdates WHERE ComponentId=?";
pub const DELETE_CUSTOMPROPERTIES: &str =
    "DELETE FROM Customproperties WHERE ComponentId=?";
pub const DELETE_RECURSIVE: &str = "DELETE FROM Recursive WHERE ComponentId=?";
pub const DELETE_ALARM: &str = "DELETE FROM Alarm WHERE ComponentId=?";
pub const DELETE_ATTENDEE: &str = "DELETE FROM Attendee WHERE ComponentId=?";
pub const DELETE_ATTACHMENTS: &str = "DELETE FROM Attachments WHERE ComponentId=?";

// -----------------------------------------------------------------------------
// Selects: singletons, notebooks
// -----------------------------------------------------------------------------

pub const SELECT_METADATA: &str = "SELECT transactionId FROM Metadata";
pub const SELECT_TIMEZONES: &str = "SELECT TzId, ICalData FROM Timezones WHERE TzId=1";

/// Notebook listings are alphabetical by display name.
pub const SELECT_CALENDARS_ALL: &str = "SELECT * FROM Calendars ORDER BY Name";
pub const SELECT_CALENDARPROPERTIES_BY_ID: &str =
    "SELECT CalendarId, Name, Value FROM Calendarproperties WHERE CalendarId=?";

// -----------------------------------------------------------------------------
// Selects: unsorted filters
// -----------------------------------------------------------------------------
// All live-row selects filter on DateDeleted=0. A component "recurs"
// when it owns recurrence rules or overrides an instance of a series;
// such rows always match range filters and are narrowed in memory by
// the caller's recurrence expansion (a row's stored start says nothing
// about where its occurrences fall).

pub const SELECT_COMPONENTS_ALL: &str = "SELECT * FROM Components WHERE DateDeleted=0";
pub const SELECT_COMPONENTS_BY_NOTEBOOKUID: &str =
    "SELECT * FROM Components WHERE Notebook=? AND DateDeleted=0";

/// One incidence by natural key; a RecurId of 0 selects the series
/// parent (or the plain incidence).
pub const SELECT_COMPONENTS_BY_UID_AND_RECURID: &str =
    "SELECT * FROM Components WHERE UID=? AND RecurId=? AND DateDeleted=0";

/// A whole series: the parent plus every instance override.
pub const SELECT_COMPONENTS_BY_UID: &str =
    "SELECT * FROM Components WHERE UID=? AND DateDeleted=0";

/// Bounded range: effective ranges overlapping `[start, end)`.
/// Binds (end, start).
pub const SELECT_COMPONENTS_BY_DATE_BOTH: &str = "SELECT * FROM Components \
     WHERE DateDeleted=0 AND ((DateStart < ?1 AND (DateEndDue > ?2 OR DateEndDue = 0)) \
     OR ComponentId IN (SELECT DISTINCT ComponentId FROM Recursive) OR RecurId != 0)";

/// Open-ended range from `start`: everything not already finished.
pub const SELECT_COMPONENTS_BY_DATE_START: &str = "SELECT * FROM Components \
     WHERE DateDeleted=0 AND (DateEndDue > ?1 OR (DateEndDue = 0 AND DateStart >= ?1) \
     OR ComponentId IN (SELECT DISTINCT ComponentId FROM Recursive) OR RecurId != 0)";

/// Open-ended range up to `end`: everything starting before it.
pub const SELECT_COMPONENTS_BY_DATE_END: &str = "SELECT * FROM Components \
     WHERE DateDeleted=0 AND (DateStart < ?1 \
     OR ComponentId IN (SELECT DISTINCT ComponentId FROM Recursive) OR RecurId != 0)";

/// Incidences with no dates at all (both date columns are the 0
/// sentinel).
pub const SELECT_COMPONENTS_BY_PLAIN: &str =
    "SELECT * FROM Components WHERE DateStart=0 AND DateEndDue=0 AND DateDeleted=0";
/// Open to-dos; `DateCompleted = 0` is "never completed".
pub const SELECT_COMPONENTS_BY_UNCOMPLETED_TODOS: &str =
    "SELECT * FROM Components WHERE Type='Todo' AND DateCompleted=0 AND DateDeleted=0";
pub const SELECT_COMPONENTS_BY_JOURNAL: &str =
    "SELECT * FROM Components WHERE Type='Journal' AND DateDeleted=0";

/// Recurring components: those with rule rows, or those overriding an
/// instance of a series (non-zero `RecurId`).
pub const SELECT_COMPONENTS_BY_RECURSIVE: &str = "SELECT * FROM Components \
     WHERE (ComponentId IN (SELECT DISTINCT ComponentId FROM Recursive) OR RecurId != 0) \
     AND DateDeleted=0";

/// Everything with a real location (geo columns off the sentinel).
pub const SELECT_COMPONENTS_BY_GEO: &str = "SELECT * FROM Components \
     WHERE GeoLatitude != -1000.0 AND GeoLongitude != -1000.0 AND DateDeleted=0";

/// Located incidences inside a box. Binds (min lat, min lon, max lat,
/// max lon); the sentinel sits far below any real minimum, so unlocated
/// rows never match.
pub const SELECT_COMPONENTS_BY_GEO_AREA: &str = "SELECT * FROM Components \
     WHERE GeoLatitude >= ? AND GeoLongitude >= ? AND GeoLatitude <= ? \
     AND GeoLongitude <= ? AND DateDeleted=0";
pub const SELECT_COMPONENTS_BY_ATTENDEE: &str = "SELECT * FROM Components \
     WHERE ComponentId IN (SELECT DISTINCT ComponentId FROM Attendee) AND DateDeleted=0";

// -----------------------------------------------------------------------------
// Selects: sorted, windowed listings
// -----------------------------------------------------------------------------
// Descending by the listing anchor, except the future listing which walks
// forward. The smart date field is the due date for to-dos and the start
// otherwise. The anchor comparison is strict: a page always contains the
// whole equal-anchor run at its boundary, so the next page, resuming
// strictly past that anchor, revisits nothing.

/// Dated incidences walking backwards from the anchor, newest first.
pub const SELECT_COMPONENTS_BY_DATE_SMART: &str = "SELECT * FROM Components \
     WHERE DateEndDue != 0 AND DateEndDue < ? AND DateDeleted=0 \
     ORDER BY DateEndDue DESC, DateCreated DESC";

/// The undated complement of the smart listing, anchored on creation
/// times instead.
pub const SELECT_COMPONENTS_BY_CREATED_SMART: &str = "SELECT * FROM Components \
     WHERE DateEndDue=0 AND DateCreated < ? AND DateDeleted=0 \
     ORDER BY DateCreated DESC";

/// The forward listing: ascending on the smart date field, for "what is
/// coming up" views.
pub const SELECT_COMPONENTS_BY_FUTURE_DATE_SMART: &str = "SELECT * FROM Components \
     WHERE (CASE Type WHEN 'Todo' THEN DateEndDue ELSE DateStart END) > ? AND DateDeleted=0 \
     ORDER BY (CASE Type WHEN 'Todo' THEN DateEndDue ELSE DateStart END) ASC, DateCreated ASC";
/// Journals newest first by their entry date.
pub const SELECT_COMPONENTS_BY_JOURNAL_DATE: &str = "SELECT * FROM Components \
     WHERE Type='Journal' AND DateDeleted=0 AND DateStart < ? \
     ORDER BY DateStart DESC, DateCreated DESC";

/// Completed to-dos with a due date, most recently due first.
pub const SELECT_COMPONENTS_BY_COMPLETED_TODOS_AND_DATE: &str = "SELECT * FROM Components \
     WHERE Type='Todo' AND DateCompleted != 0 AND DateEndDue != 0 AND DateEndDue < ? \
     AND DateDeleted=0 ORDER BY DateEndDue DESC, DateCreated DESC";
pub const SELECT_COMPONENTS_BY_COMPLETED_TODOS_AND_CREATED: &str = "SELECT * FROM Components \
     WHERE Type='Todo' AND DateCompleted != 0 AND DateEndDue=0 AND DateCreated < ? \
     AND DateDeleted=0 ORDER BY DateCreated DESC";
pub const SELECT_COMPONENTS_BY_GEO_AND_DATE: &str = "SELECT * FROM Components \
     WHERE GeoLatitude != -1000.0 AND GeoLongitude != -1000.0 AND DateEndDue != 0 \
     AND DateEndDue < ? AND DateDeleted=0 ORDER BY DateEndDue DESC, DateCreated DESC";
pub const SELECT_COMPONENTS_BY_GEO_AND_CREATED: &str = "SELECT * FROM Components \
     WHERE GeoLatitude != -1000.0 AND GeoLongitude != -1000.0 AND DateEndDue=0 \
     AND DateCreated < ? AND DateDeleted=0 ORDER BY DateCreated DESC";
pub const SELECT_COMPONENTS_BY_ATTENDEE_AND_CREATED: &str = "SELECT * FROM Components \
     WHERE ComponentId IN (SELECT DISTINCT ComponentId FROM Attendee) AND DateCreated < ? \
     AND DateDeleted=0 ORDER BY DateCreated DESC";
pub const SELECT_COMPONENTS_BY_ATTENDEE_EMAIL_AND_CREATED: &str = "SELECT * FROM Components \
     WHERE ComponentId IN (SELECT DISTINCT ComponentId FROM Attendee WHERE Email=?) \
     AND DateCreated < ? AND DateDeleted=0 ORDER BY DateCreated DESC";

// -----------------------------------------------------------------------------
// Selects: sync tokens, duplicates, tombstones
// -----------------------------------------------------------------------------
// The modified/deleted variants exclude rows created after the token so a
// fresh insert is only reported once: a consumer syncing since T sees a
// row either in the inserted listing or in the modified one, never both.

/// Inserted-since listing: rows created at or after the token.
pub const SELECT_COMPONENTS_BY_CREATED: &str =
    "SELECT * FROM Components WHERE DateCreated >= ? AND DateDeleted=0";
pub const SELECT_COMPONENTS_BY_CREATED_AND_NOTEBOOK: &str =
    "SELECT * FROM Components WHERE DateCreated >= ? AND Notebook=? AND DateDeleted=0";
/// Modified-since listing; the `DateCreated < token` clause keeps fresh
/// inserts out (they belong to the inserted listing).
pub const SELECT_COMPONENTS_BY_LAST_MODIFIED: &str = "SELECT * FROM Components \
     WHERE DateLastModified >= ?1 AND DateCreated < ?1 AND DateDeleted=0";
pub const SELECT_COMPONENTS_BY_LAST_MODIFIED_AND_NOTEBOOK: &str = "SELECT * FROM Components \
     WHERE DateLastModified >= ?1 AND DateCreated < ?1 AND Notebook=? AND DateDeleted=0";
/// Deleted-since listing: tombstones of rows the consumer had seen.
pub const SELECT_COMPONENTS_BY_DELETED: &str = "SELECT * FROM Components \
     WHERE DateDeleted >= ?1 AND DateDeleted != 0 AND DateCreated < ?1";
pub const SELECT_COMPONENTS_BY_DELETED_AND_NOTEBOOK: &str = "SELECT * FROM Components \
     WHERE DateDeleted >= ?1 AND DateDeleted != 0 AND DateCreated < ?1 AND Notebook=?";
/// Every tombstone, regardless of age.
pub const SELECT_COMPONENTS_ALL_DELETED: &str =
    "SELECT * FROM Components WHERE DateDeleted != 0";
pub const SELECT_COMPONENTS_ALL_DELETED_BY_NOTEBOOK: &str =
    "SELECT * FROM Components WHERE Notebook=? AND DateDeleted != 0";

/// Import dedup: rows sharing a start instant and a summary.
pub const SELECT_COMPONENTS_BY_DUPLICATE: &str =
    "SELECT * FROM Components WHERE DateStart=? AND Summary=? AND DateDeleted=0";
pub const SELECT_COMPONENTS_BY_DUPLICATE_AND_NOTEBOOK: &str = "SELECT * FROM Components \
     WHERE DateStart=? AND Summary=? AND Notebook=? AND DateDeleted=0";

/// Resolves the natural key to a rowid; updates and deletes start here.
pub const SELECT_ROWID_FROM_COMPONENTS_BY_UID_AND_RECURID: &str =
    "SELECT ComponentId FROM Components WHERE UID=? AND RecurId=? AND DateDeleted=0";

/// The tombstones of one natural key, with their deletion instants.
pub const SELECT_COMPONENTS_BY_UID_RECID_AND_DELETED: &str = "SELECT ComponentId, DateDeleted \
     FROM Components WHERE UID=? AND RecurId=? AND DateDeleted != 0";

// -----------------------------------------------------------------------------
// Selects: child tables, contacts, counts
// -----------------------------------------------------------------------------

// One per child table, all keyed on the component rowid; the row
// decoder runs them through the connection's statement cache for every
// loaded incidence.
pub const SELECT_RDATES_BY_ID: &str = "SELECT * FROM Rdates WHERE ComponentId=?";
pub const SELECT_CUSTOMPROPERTIES_BY_ID: &str =
    "SELECT * FROM Customproperties WHERE ComponentId=?";
pub const SELECT_RECURSIVE_BY_ID: &str = "SELECT * FROM Recursive WHERE ComponentId=?";
pub const SELECT_ALARM_BY_ID: &str = "SELECT * FROM Alarm WHERE ComponentId=?";
pub const SELECT_ATTENDEE_BY_ID: &str = "SELECT * FROM Attendee WHERE ComponentId=?";
pub const SELECT_ATTACHMENTS_BY_ID: &str = "SELECT * FROM Attachments WHERE ComponentId=?";

/// Distinct attendee addresses with how often each appears, most
/// frequent first; feeds the contact suggestions.
pub const SELECT_ATTENDEE_AND_COUNT: &str = "SELECT Email, Name, COUNT(Email) FROM Attendee \
     WHERE Email != '' GROUP BY Email ORDER BY COUNT(Email) DESC";
pub const SELECT_EVENT_COUNT: &str =
    "SELECT COUNT(*) FROM Components WHERE Type='Event' AND DateDeleted=0";
pub const SELECT_TODO_COUNT: &str =
    "SELECT COUNT(*) FROM Components WHERE Type='Todo' AND DateDeleted=0";
pub const SELECT_JOURNAL_COUNT: &str =
    "SELECT COUNT(*) FROM Components WHERE Type='Journal' AND DateDeleted=0";

/// IMMEDIATE takes the write lock up front, so a batch never discovers
/// mid-way that a peer got there first.
pub const BEGIN_TRANSACTION: &str = "BEGIN IMMEDIATE";
pub const COMMIT_TRANSACTION: &str = "COMMIT";

/// Everything `initialize` applies, in order: tables first, indices
/// after, so every index finds its table.
const CREATE_STATEMENTS: &[&str] = &[
    CREATE_METADATA,
    CREATE_TIMEZONES,
    CREATE_CALENDARS,
    CREATE_CALENDARPROPERTIES,
    CREATE_COMPONENTS,
    CREATE_RDATES,
    CREATE_CUSTOMPROPERTIES,
    CREATE_RECURSIVE,
    CREATE_ALARM,
    CREATE_ATTENDEE,
    CREATE_ATTACHMENTS,
    INDEX_CALENDAR,
    INDEX_COMPONENT,
    INDEX_COMPONENT_UID,
    INDEX_COMPONENT_NOTEBOOK,
    INDEX_RDATES,
    INDEX_CUSTOMPROPERTIES,
    INDEX_RECURSIVE,
    INDEX_ALARM,
    INDEX_ATTENDEE,
    INDEX_ATTACHMENTS,
    INDEX_CALENDARPROPERTIES,
];

/// How long SQLite retries on internal locks before giving up.
///
/// The cross-process mutex already serializes whole operations; this
/// only covers the file-level locks SQLite takes underneath, so a short
/// bound is enough.
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

// =============================================================================
// Database wrapper
// =============================================================================

/// A SQLite connection with the calendar schema applied.
///
/// # Rust Pattern: Newtype Wrapper
///
/// Wrapping `Connection` in our own struct means a raw, un-initialized
/// connection cannot be passed where the schema is expected, and the
/// crate controls which operations exist.
///
/// # Ownership
///
/// `Database` owns its `Connection`. Dropping the wrapper closes the
/// handle and finalizes every cached statement (RAII).
#[derive(Debug)]
pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// `Error::Sqlite` when the file cannot be opened or a DDL statement
    /// fails to apply.
    ///
    /// # Rust Pattern: impl AsRef\<Path\>
    ///
    /// Accepting `impl AsRef<Path>` lets callers pass `&str`, `String`,
    /// `&Path` or `PathBuf` without converting first.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use caldb::Database;
    ///
    /// let db = Database::open("calendar.db")?;
    /// # Ok::<(), caldb::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database.
    ///
    /// # When to Use
    ///
    /// - Unit tests that don't need persistence
    /// - Schema experiments
    ///
    /// # Note
    ///
    /// In-memory databases vanish with the connection, and the
    /// cross-process machinery (lock, ping file) has nothing to attach
    /// to; the storage session always works on a file.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Applies pragmas, creates the tables and indices, and seeds the
    /// singleton rows. Idempotent: `IF NOT EXISTS` everywhere and
    /// guarded singleton inserts make a second open a no-op.
    fn initialize(&self) -> Result<()> {
        // =====================================================================
        // Connection configuration
        // =====================================================================

        // Bounded waiting on SQLite's internal locks.
        self.conn.busy_timeout(BUSY_TIMEOUT)?;

        // The child tables rely on ON DELETE CASCADE; foreign keys are
        // off by default in SQLite and must be enabled per connection.
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        // =====================================================================
        // Tables and indices
        // =====================================================================

        for ddl in CREATE_STATEMENTS {
            self.conn.execute_batch(ddl)?;
        }

        // =====================================================================
        // Singletons
        // =====================================================================
        // Seed only on a fresh database; an existing transaction id or
        // zone blob must survive reopen.

        self.conn.execute(
            "INSERT INTO Metadata(transactionId) SELECT 0 \
             WHERE NOT EXISTS (SELECT 1 FROM Metadata)",
            [],
        )?;
        self.conn.execute(
            "INSERT INTO Timezones(TzId, ICalData) SELECT 1, '' \
             WHERE NOT EXISTS (SELECT 1 FROM Timezones WHERE TzId=1)",
            [],
        )?;
        Ok(())
    }

    /// Test access to the underlying connection; production code goes
    /// through the storage session.
    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// The full table set comes up on a fresh database.
    #[test]
    fn creates_all_tables() {
        let db = Database::open_in_memory().expect("create in-memory db");
        let count: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' \
                 AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .expect("query tables");
        assert_eq!(count, 11, "expected the eleven calendar tables");
    }

    /// Every IDX_* index exists, the unique ones included.
    #[test]
    fn creates_indices() {
        let db = Database::open_in_memory().expect("create db");
        let indices: Vec<String> = {
            let mut stmt = db
                .conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='index' \
                     AND name LIKE 'IDX_%'",
                )
                .expect("prepare");
            stmt.query_map([], |row| row.get(0))
                .expect("query")
                .collect::<std::result::Result<Vec<_>, _>>()
                .expect("collect")
        };
        assert!(indices.contains(&"IDX_COMPONENT_UID".to_string()));
        assert!(indices.contains(&"IDX_COMPONENT_NOTEBOOK".to_string()));
        assert!(indices.contains(&"IDX_ATTENDEE".to_string()));
        assert_eq!(indices.len(), 11);
    }

    /// A fresh database starts at transaction id 0 with an empty zone
    /// blob.
    #[test]
    fn seeds_singletons() {
        let db = Database::open_in_memory().expect("create db");
        let tid: i64 = db
            .conn
            .query_row(SELECT_METADATA, [], |row| row.get(0))
            .expect("metadata row");
        assert_eq!(tid, 0);
        let blob: String = db
            .conn
            .query_row(SELECT_TIMEZONES, [], |row| row.get(1))
            .expect("timezones row");
        assert!(blob.is_empty());
    }

    /// Opening twice must not duplicate singletons or fail on existing
    /// tables.
    #[test]
    fn double_open_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cal.db");
        {
            let _db = Database::open(&path).expect("first open");
        }
        let db = Database::open(&path).expect("second open");
        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM Metadata", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 1);
    }

    /// Two live rows must never share a `(UID, RecurId)` pair.
    #[test]
    fn natural_key_is_unique() {
        let db = Database::open_in_memory().expect("create db");
        let insert = "INSERT INTO Components(Notebook, Type, UID, RecurId, DateDeleted) \
                      VALUES ('nb', 'Event', 'e1', 0, 0)";
        db.conn.execute(insert, []).expect("first insert");
        assert!(db.conn.execute(insert, []).is_err(), "duplicate natural key");
    }
}
