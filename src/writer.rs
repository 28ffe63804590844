//! # Row Encoder
//!
//! The save side of the row codec: incidences and notebooks out of the
//! domain model, into `Components`, `Calendars` and their child tables.
//!
//! ## Write Path
//!
//! ```text
//! modify_components(op)
//!     │ resolve rowid by (UID, RecurId)      (update / delete paths)
//!     ▼
//! write_component_row                        (41 bound columns)
//!     │
//!     ▼
//! wipe_children (update only) ──► insert_* per child table
//! ```
//!
//! ## Why Delete-Then-Insert Children?
//!
//! Updates resolve the component rowid from the natural key, rewrite the
//! main row in place, then wipe and re-insert every child row under the
//! same rowid. Diffing child sets row by row would need stable child
//! identities the format does not have; a wipe keeps the child writers
//! to a single insert path and cannot leave stale rows behind. Hard
//! deletes remove the main row and let the foreign keys cascade through
//! the children.
//!
//! ## Failure Granularity
//!
//! Child rows that fail to bind or step are logged and skipped; the
//! component row itself failing aborts the incidence with an error. That
//! split mirrors the batch contract: a batch is best-effort per incidence,
//! an incidence is best-effort per child.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::warn;

use crate::codec::{self, CalDateTime, INVALID_LATLON};
use crate::error::{Error, Result};
use crate::schema::*;
use crate::types::{
    Alarm, AlarmTrigger, Attachment, AttachmentData, DbOperation, Incidence, IncidenceData,
    Notebook, RecurrenceRule,
};

/// Rdates row kinds.
pub(crate) const RDATE: i64 = 1;
pub(crate) const XDATE: i64 = 2;
pub(crate) const RDATE_TIME: i64 = 3;
pub(crate) const XDATE_TIME: i64 = 4;

/// Recursive row kinds.
const RULE_RRULE: i64 = 1;
const RULE_EXRULE: i64 = 2;

const START_TRIGGER_RELATION: &str = "startTriggerRelation";
const END_TRIGGER_RELATION: &str = "endTriggerRelation";

/// Resolves the rowid of the live component matching the natural key.
pub(crate) fn select_row_id(conn: &Connection, uid: &str, recurrence_id: i64) -> Result<Option<i64>> {
    let mut stmt = conn.prepare_cached(SELECT_ROWID_FROM_COMPONENTS_BY_UID_AND_RECURID)?;
    let mut rows = stmt.query(params![uid, recurrence_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Applies `op` to an incidence: insert, rewrite, soft-delete or purge.
///
/// `now` is the batch timestamp; it lands in the datestamp column and in
/// any bookkeeping field the caller left unset.
///
/// # Operations
///
/// | Op | Main row | Children |
/// |----|----------|----------|
/// | `Insert` | new row, `DateDeleted = 0` | inserted |
/// | `Update` | rewritten under the resolved rowid | wiped, re-inserted |
/// | `MarkDeleted` | `DateDeleted` stamped | kept (sync consumers read them) |
/// | `Delete` | removed | cascade |
///
/// # Errors
///
/// `Error::NotFound` when `op` needs an existing row and the natural key
/// resolves to nothing live.
pub(crate) fn modify_components(
    conn: &Connection,
    incidence: &Incidence,
    notebook_uid: &str,
    op: DbOperation,
    now: DateTime<Utc>,
) -> Result<()> {
    let recurrence_id = incidence.recurrence_id_seconds();

    let rowid = match op {
        DbOperation::Insert => None,
        _ => Some(
            select_row_id(conn, &incidence.uid, recurrence_id)?.ok_or_else(|| {
                Error::NotFound {
                    uid: incidence.uid.clone(),
                    recurrence_id,
                }
            })?,
        ),
    };

    match op {
        DbOperation::Delete => {
            // Children cascade.
            conn.prepare_cached(DELETE_COMPONENTS)?
                .execute(params![rowid])?;
            return Ok(());
        }
        DbOperation::MarkDeleted => {
            conn.prepare_cached(UPDATE_COMPONENTS_AS_DELETED)?
                .execute(params![codec::to_origin(&now), rowid])?;
            return Ok(());
        }
        DbOperation::Insert | DbOperation::Update => {}
    }

    let rowid = write_component_row(conn, incidence, notebook_uid, rowid, now)?;

    if op == DbOperation::Update {
        wipe_children(conn, rowid)?;
    }
    if let Err(err) = insert_custom_properties(conn, rowid, incidence) {
        warn!(uid = %incidence.uid, %err, "failed to store custom properties");
    }
    if let Err(err) = insert_attendees(conn, rowid, incidence) {
        warn!(uid = %incidence.uid, %err, "failed to store attendees");
    }
    if let Err(err) = insert_alarms(conn, rowid, incidence) {
        warn!(uid = %incidence.uid, %err, "failed to store alarms");
    }
    if let Err(err) = insert_recurrence_rules(conn, rowid, incidence) {
        warn!(uid = %incidence.uid, %err, "failed to store recurrence rules");
    }
    if let Err(err) = insert_rdates(conn, rowid, incidence) {
        warn!(uid = %incidence.uid, %err, "failed to store rdates");
    }
    if let Err(err) = insert_attachments(conn, rowid, incidence) {
        warn!(uid = %incidence.uid, %err, "failed to store attachments");
    }

    Ok(())
}

/// Binds and steps the main `Components` row. Returns the rowid written.
///
/// # Variant Encoding
///
/// The tagged union flattens into the shared columns: an event's end and
/// a to-do's due time share `DateEndDue`, journals zero out the fields
/// they don't carry (location, geo, priority, duration), and a completed
/// to-do without a completion time gets stamped with `now`.
fn write_component_row(
    conn: &Connection,
    incidence: &Incidence,
    notebook_uid: &str,
    rowid: Option<i64>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let is_journal = matches!(incidence.data, IncidenceData::Journal);

    let start = codec::encode(incidence.dt_start.as_ref(), incidence.all_day);

    // Events store an all-day end with one extra day, a compatibility
    // quirk of the on-disk format; the decoder subtracts it again.
    let (has_due_date, end_due) = match &incidence.data {
        IncidenceData::Event(event) => {
            let effective = event.dt_end.as_ref().map(|end| {
                if incidence.all_day {
                    CalDateTime::Date(end.date() + chrono::Days::new(1))
                } else {
                    end.clone()
                }
            });
            (false, codec::encode(effective.as_ref(), incidence.all_day))
        }
        IncidenceData::Todo(todo) => (
            todo.has_due_date,
            codec::encode(todo.dt_due.as_ref(), incidence.all_day),
        ),
        _ => (false, codec::encode(None, false)),
    };

    let (latitude, longitude) = match (&incidence.geo, is_journal) {
        (Some(geo), false) => (geo.latitude, geo.longitude),
        _ => (INVALID_LATLON, INVALID_LATLON),
    };

    // NULL keeps the stored creation date on update and defaults to now
    // on insert (COALESCE in the statements).
    let created: Option<i64> = incidence.created.map(|dt| codec::to_origin(&dt));
    let last_modified = codec::to_origin(&incidence.last_modified.unwrap_or(now));
    let datestamp = codec::to_origin(&now);

    // A recurrence id is never stored floating: its seconds are half of
    // the natural key and must compare exactly.
    let recur_id = codec::encode(incidence.recurrence_id.as_ref(), false);

    let (percent, completed) = match &incidence.data {
        IncidenceData::Todo(todo) => {
            let effective = if todo.is_completed() {
                Some(
                    todo.completed
                        .clone()
                        .unwrap_or(CalDateTime::Utc(now)),
                )
            } else {
                None
            };
            (
                todo.percent_complete,
                codec::encode(effective.as_ref(), incidence.all_day),
            )
        }
        _ => (0, codec::encode(None, false)),
    };

    let transparency = incidence
        .as_event()
        .map(|event| event.transparency as i64)
        .unwrap_or(0);
    let duration = if is_journal { 0 } else { incidence.duration_secs };
    let location = if is_journal { "" } else { incidence.location.as_str() };
    let priority = if is_journal { 0 } else { incidence.priority };
    let resources = if is_journal {
        String::new()
    } else {
        incidence.resources.join(" ")
    };

    let values = params![
        notebook_uid,
        incidence.data.type_tag(),
        incidence.summary,
        incidence.categories.join(","),
        start.utc,
        start.local,
        start.zone,
        has_due_date as i64,
        end_due.utc,
        end_due.local,
        end_due.zone,
        duration,
        incidence.secrecy as i64,
        location,
        incidence.description,
        incidence.status as i64,
        latitude,
        longitude,
        priority,
        resources,
        created,
        datestamp,
        last_modified,
        incidence.revision,
        incidence.comments.join(" "),
        Option::<String>::None, // attachments live in their own table
        incidence.contacts.join(" "),
        0i64, // invitation status, retained column
        recur_id.utc,
        recur_id.local,
        recur_id.zone,
        incidence.related_to,
        incidence.url,
        incidence.uid,
        transparency,
        incidence.local_only as i64,
        percent,
        completed.utc,
        completed.local,
        completed.zone,
        incidence.color,
    ];

    match rowid {
        None => {
            conn.prepare_cached(INSERT_COMPONENTS)?.execute(values)?;
            Ok(conn.last_insert_rowid())
        }
        Some(rowid) => {
            let mut with_rowid = values.to_vec();
            let rowid_value = rusqlite::types::Value::Integer(rowid);
            with_rowid.push(&rowid_value);
            conn.prepare_cached(UPDATE_COMPONENTS)?
                .execute(&with_rowid[..])?;
            Ok(rowid)
        }
    }
}

/// Deletes every child row of a component; the update path re-inserts
/// them afterwards. One cached statement per table, all keyed on the
/// rowid.
fn wipe_children(conn: &Connection, rowid: i64) -> Result<()> {
    for sql in [
        DELETE_CUSTOMPROPERTIES,
        DELETE_ATTENDEE,
        DELETE_ALARM,
        DELETE_RECURSIVE,
        DELETE_RDATES,
        DELETE_ATTACHMENTS,
    ] {
        conn.prepare_cached(sql)?.execute(params![rowid])?;
    }
    Ok(())
}

fn insert_custom_properties(conn: &Connection, rowid: i64, incidence: &Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_CUSTOMPROPERTIES)?;
    for (name, (value, parameters)) in &incidence.custom_properties {
        stmt.execute(params![rowid, name, value, parameters])?;
    }
    Ok(())
}

/// Stores attendees, with the organizer leading as a flagged row.
///
/// # Organizer Handling
///
/// The organizer becomes an attendee row with the organizer flag set; an
/// attendee listed with the organizer's email is folded into that row.
/// On load the flagged row fills both the organizer field and the
/// attendee list, which is why a saved organizer reappears among the
/// attendees.
///
/// # Skipped Rows
///
/// Attendees without an email cannot be keyed (the table is unique per
/// `(component, email)`) and are skipped with a warning, as are rows the
/// unique index rejects.
fn insert_attendees(conn: &Connection, rowid: i64, incidence: &Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_ATTENDEE)?;

    let organizer_email = incidence
        .organizer
        .as_ref()
        .filter(|organizer| !organizer.email.is_empty())
        .map(|organizer| {
            stmt.execute(params![
                rowid,
                organizer.email,
                organizer.name,
                1i64, // organizer flag
                0i64,
                0i64,
                0i64,
                "",
                "",
            ])
            .map(|_| organizer.email.clone())
        })
        .transpose()?;

    for attendee in &incidence.attendees {
        if attendee.email.is_empty() {
            warn!(uid = %incidence.uid, "attendee without email address skipped");
            continue;
        }
        if Some(&attendee.email) == organizer_email.as_ref() {
            continue;
        }
        if let Err(err) = stmt.execute(params![
            rowid,
            attendee.email,
            attendee.name,
            0i64,
            attendee.role as i64,
            attendee.status as i64,
            attendee.rsvp as i64,
            attendee.delegate,
            attendee.delegator,
        ]) {
            warn!(uid = %incidence.uid, email = %attendee.email, %err, "attendee row skipped");
        }
    }
    Ok(())
}

fn insert_alarms(conn: &Connection, rowid: i64, incidence: &Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_ALARM)?;
    for alarm in &incidence.alarms {
        if let Err(err) = insert_alarm(&mut stmt, rowid, alarm) {
            warn!(uid = %incidence.uid, %err, "alarm row skipped");
        }
    }
    Ok(())
}

/// One alarm row: the trigger shape picks which of the offset/relation
/// or absolute-time columns are populated, the rest stay at their empty
/// sentinels.
fn insert_alarm(
    stmt: &mut rusqlite::CachedStatement<'_>,
    rowid: i64,
    alarm: &Alarm,
) -> Result<()> {
    let (offset, relation, time) = match &alarm.trigger {
        AlarmTrigger::StartOffset(secs) => (*secs, START_TRIGGER_RELATION, codec::encode(None, false)),
        AlarmTrigger::EndOffset(secs) => (*secs, END_TRIGGER_RELATION, codec::encode(None, false)),
        AlarmTrigger::Absolute(at) => (0, "", codec::encode(Some(at), false)),
    };

    // Alternating key/value lines, CRLF separated.
    let properties = if alarm.custom_properties.is_empty() {
        String::new()
    } else {
        alarm
            .custom_properties
            .iter()
            .flat_map(|(key, value)| [key.as_str(), value.as_str()])
            .collect::<Vec<_>>()
            .join("\r\n")
    };

    let (repeat, snooze) = if alarm.repeat_count > 0 {
        (alarm.repeat_count as i64, alarm.snooze_secs)
    } else {
        (0, 0)
    };

    stmt.execute(params![
        rowid,
        alarm.action as i64,
        repeat,
        snooze,
        offset,
        relation,
        time.utc,
        time.local,
        time.zone,
        alarm.description,
        alarm.attachment,
        alarm.summary,
        alarm.addresses.join(" "),
        properties,
        alarm.enabled as i64,
    ])?;
    Ok(())
}

fn insert_recurrence_rules(conn: &Connection, rowid: i64, incidence: &Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_RECURSIVE)?;
    for rule in &incidence.recurrence.r_rules {
        insert_rule(&mut stmt, rowid, rule, RULE_RRULE, incidence.all_day)?;
    }
    for rule in &incidence.recurrence.ex_rules {
        insert_rule(&mut stmt, rowid, rule, RULE_EXRULE, incidence.all_day)?;
    }
    Ok(())
}

/// Joins an integer list into the space-separated stored form.
fn join_ints(values: &[i32]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// One rule row.
///
/// # Parallel BYDAY Lists
///
/// BYDAY entries split into two space-separated columns, weekday numbers
/// in one and positional prefixes in the other, matched up by index on
/// load.
fn insert_rule(
    stmt: &mut rusqlite::CachedStatement<'_>,
    rowid: i64,
    rule: &RecurrenceRule,
    kind: i64,
    all_day: bool,
) -> Result<()> {
    let until = codec::encode(rule.until.as_ref(), all_day);
    let by_days = join_ints(&rule.by_days.iter().map(|wd| wd.day).collect::<Vec<_>>());
    let by_day_pos = join_ints(&rule.by_days.iter().map(|wd| wd.pos).collect::<Vec<_>>());

    stmt.execute(params![
        rowid,
        kind,
        rule.frequency as i64,
        until.utc,
        until.local,
        until.zone,
        rule.count,
        rule.interval,
        join_ints(&rule.by_seconds),
        join_ints(&rule.by_minutes),
        join_ints(&rule.by_hours),
        by_days,
        by_day_pos,
        join_ints(&rule.by_month_days),
        join_ints(&rule.by_year_days),
        join_ints(&rule.by_week_numbers),
        join_ints(&rule.by_months),
        join_ints(&rule.by_set_pos),
        rule.week_start,
    ])?;
    Ok(())
}

/// The four recurrence date lists, written into the shared table with
/// their row kinds.
fn insert_rdates(conn: &Connection, rowid: i64, incidence: &Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_RDATES)?;

    for (kind, dates) in [
        (RDATE, &incidence.recurrence.r_dates),
        (XDATE, &incidence.recurrence.ex_dates),
    ] {
        for date in dates {
            let encoded = codec::encode(Some(&CalDateTime::Date(*date)), true);
            stmt.execute(params![rowid, kind, encoded.utc, encoded.local, encoded.zone])?;
        }
    }

    for (kind, times) in [
        (RDATE_TIME, &incidence.recurrence.r_date_times),
        (XDATE_TIME, &incidence.recurrence.ex_date_times),
    ] {
        for time in times {
            // All-day series hand out their instances as clock-time
            // midnights; store those floating so the stored value reads
            // identically in every zone.
            let floating = incidence.all_day
                && matches!(time, CalDateTime::Clock(ndt)
                    if ndt.time() == chrono::NaiveTime::MIN);
            let encoded = codec::encode(Some(time), floating);
            stmt.execute(params![rowid, kind, encoded.utc, encoded.local, encoded.zone])?;
        }
    }
    Ok(())
}

fn insert_attachments(conn: &Connection, rowid: i64, incidence: &Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_ATTACHMENTS)?;
    for attachment in &incidence.attachments {
        if let Err(err) = insert_attachment(&mut stmt, rowid, attachment) {
            warn!(uid = %incidence.uid, %err, "attachment row skipped");
        }
    }
    Ok(())
}

fn insert_attachment(
    stmt: &mut rusqlite::CachedStatement<'_>,
    rowid: i64,
    attachment: &Attachment,
) -> Result<()> {
    let (data, uri) = match &attachment.data {
        AttachmentData::Binary(bytes) => (Some(bytes.as_slice()), None),
        AttachmentData::Uri(uri) => (None, Some(uri.as_str())),
    };
    stmt.execute(params![
        rowid,
        data,
        uri,
        attachment.mime_type,
        attachment.show_inline as i64,
        attachment.label,
        attachment.local as i64,
    ])?;
    Ok(())
}

/// Hard-deletes every tombstone matching the natural key.
///
/// # When This Runs
///
/// - on every insert, so a revived `(uid, recurrence id)` does not
///   collide with its own tombstone in the unique index
/// - from the explicit purge operation, which only ever touches
///   soft-deleted rows by construction of the select
/// - when a notebook is deleted, to take its tombstones along
pub(crate) fn purge_deleted_components(
    conn: &Connection,
    uid: &str,
    recurrence_id: i64,
) -> Result<usize> {
    let rowids: Vec<i64> = {
        let mut stmt = conn.prepare_cached(SELECT_COMPONENTS_BY_UID_RECID_AND_DELETED)?;
        let rows = stmt.query_map(params![uid, recurrence_id], |row| row.get(0))?;
        rows.collect::<std::result::Result<_, _>>()?
    };
    let mut delete = conn.prepare_cached(DELETE_COMPONENTS)?;
    for rowid in &rowids {
        delete.execute(params![rowid])?;
    }
    Ok(rowids.len())
}

// =============================================================================
// Notebooks
// =============================================================================

/// Applies `op` to a notebook row and its property rows.
///
/// `is_default` states whether this notebook carries the storage's
/// default flag; it is folded into the `Flags` column here so the flag
/// travels with the row. Property rows follow the delete-then-insert
/// discipline of the component children; deleting the notebook row lets
/// them cascade.
pub(crate) fn modify_calendars(
    conn: &Connection,
    notebook: &Notebook,
    op: DbOperation,
    is_default: bool,
) -> Result<()> {
    let mut flags = notebook.flags;
    if is_default {
        flags |= crate::types::notebook_flags::DEFAULT;
    } else {
        flags &= !crate::types::notebook_flags::DEFAULT;
    }

    let sync_date = notebook.sync_date.map(|dt| codec::to_origin(&dt)).unwrap_or(0);
    let modified_date = notebook
        .modified_date
        .map(|dt| codec::to_origin(&dt))
        .unwrap_or(0);
    let created_date = notebook
        .creation_date
        .map(|dt| codec::to_origin(&dt))
        .unwrap_or(0);

    match op {
        DbOperation::Insert => {
            conn.prepare_cached(INSERT_CALENDARS)?.execute(params![
                notebook.uid,
                notebook.name,
                notebook.description,
                notebook.color,
                flags,
                sync_date,
                notebook.plugin_name,
                notebook.account,
                notebook.attachment_size,
                modified_date,
                notebook.shared_with.join(" "),
                notebook.sync_profile,
                created_date,
            ])?;
        }
        DbOperation::Update => {
            conn.prepare_cached(UPDATE_CALENDARS)?.execute(params![
                notebook.name,
                notebook.description,
                notebook.color,
                flags,
                sync_date,
                notebook.plugin_name,
                notebook.account,
                notebook.attachment_size,
                modified_date,
                notebook.shared_with.join(" "),
                notebook.sync_profile,
                created_date,
                notebook.uid,
            ])?;
        }
        DbOperation::Delete | DbOperation::MarkDeleted => {
            // Property rows cascade.
            conn.prepare_cached(DELETE_CALENDARS)?
                .execute(params![notebook.uid])?;
            return Ok(());
        }
    }

    // Delete-then-insert, like the component children.
    conn.prepare_cached(DELETE_CALENDARPROPERTIES)?
        .execute(params![notebook.uid])?;
    let mut insert = conn.prepare_cached(INSERT_CALENDARPROPERTIES)?;
    for (name, value) in &notebook.custom_properties {
        if let Err(err) = insert.execute(params![notebook.uid, name, value]) {
            warn!(notebook = %notebook.uid, property = %name, %err, "notebook property skipped");
        }
    }
    Ok(())
}

// =============================================================================
// Singletons
// =============================================================================

/// Bumps the transaction id and returns the new value.
///
/// Runs under the cross-process lock like every mutation, so the
/// read-increment-write pair cannot race a peer.
pub(crate) fn increment_transaction_id(conn: &Connection) -> Result<i64> {
    let current: i64 = conn.query_row(SELECT_METADATA, [], |row| row.get(0))?;
    let next = current + 1;
    conn.prepare_cached(UPDATE_METADATA)?.execute(params![next])?;
    Ok(next)
}

/// Replaces the serialized time-zone blob.
pub(crate) fn update_timezones(conn: &Connection, ical_data: &str) -> Result<()> {
    conn.prepare_cached(UPDATE_TIMEZONES)?
        .execute(params![ical_data])?;
    Ok(())
}
