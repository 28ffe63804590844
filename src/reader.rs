//! # Row Decoder
//!
//! The load side of the row codec: `Components` and `Calendars` rows back
//! into the domain model.
//!
//! ## Read Path
//!
//! ```text
//! SELECT * FROM Components ...          (one filter statement)
//!         │  per row
//!         ▼
//! decode_component_row                  (columns by index → Incidence)
//!         │
//!         ▼
//! load_children                         (six per-component selects)
//!         │
//!         ▼
//! visitor closure                       (collect, paginate, or stop)
//! ```
//!
//! Columns are read by index; the layout is documented on
//! [`crate::schema::CREATE_COMPONENTS`]. All text/integer reads go
//! through `Option`-based helpers so a NULL column never fails a row.
//!
//! ## Tolerance Policy
//!
//! The decoder is tolerant by contract:
//!
//! - a child row that cannot be interpreted (unknown alarm action, empty
//!   attachment) is skipped with a warning, never an error
//! - legacy attachment URIs in the main row are honored when the
//!   attachment table has no rows for the component
//! - the midnight heuristic of the time codec restores the all-day flag
//!   of rows written before floating dates existed

use rusqlite::{Connection, Row, ToSql};
use tracing::warn;

use crate::codec::{self, latlon_is_set, CalDateTime};
use crate::error::Result;
use crate::schema::*;
use crate::types::{
    Alarm, AlarmAction, AlarmTrigger, Attachment, AttachmentData, Attendee, AttendeeRole,
    EventFields, Frequency, GeoPoint, Incidence, IncidenceData, IncidenceStatus, Notebook,
    PartStat, Person, RecurrenceRule, Secrecy, TodoFields, Transparency, WeekdayPos,
};
use crate::writer::{RDATE, RDATE_TIME, XDATE, XDATE_TIME};

/// Text column, with NULL reading as the empty string.
fn text(row: &Row, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

/// Integer column, with NULL reading as 0 (the absent-value sentinel).
fn int(row: &Row, idx: usize) -> rusqlite::Result<i64> {
    Ok(row.get::<_, Option<i64>>(idx)?.unwrap_or(0))
}

/// REAL column, with NULL reading as the geo sentinel.
fn real(row: &Row, idx: usize) -> rusqlite::Result<f64> {
    Ok(row
        .get::<_, Option<f64>>(idx)?
        .unwrap_or(codec::INVALID_LATLON))
}

/// Decodes the three date-time columns starting at `idx`; the second
/// field is the codec's is-date verdict.
fn date_time(row: &Row, idx: usize) -> rusqlite::Result<(Option<CalDateTime>, bool)> {
    let utc = int(row, idx)?;
    let local = int(row, idx + 1)?;
    let zone = text(row, idx + 2)?;
    Ok(codec::decode(utc, local, &zone))
}

/// Splits a space-separated integer list, dropping unparsable parts.
fn split_ints(value: &str) -> Vec<i32> {
    value
        .split_ascii_whitespace()
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// Splits a space-joined string list.
fn split_words(value: &str) -> Vec<String> {
    value
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Components
// =============================================================================

/// One decoded main-table row, before children are attached.
pub(crate) struct ComponentRow {
    pub rowid: i64,
    pub notebook: String,
    pub incidence: Incidence,
    /// Space-separated URI list from the legacy attachment column.
    legacy_attachments: String,
}

/// Decodes a `SELECT * FROM Components` row.
///
/// Returns `None` for rows whose type tag is unknown; the caller skips
/// them and moves on.
///
/// # Variant Decoding
///
/// The type tag selects how the shared date columns are read: an event
/// takes `DateEndDue` as its end (undoing the +1-day shift of all-day
/// ends), a to-do takes it as its due time (collapsing a due equal to
/// the start when the stored flag says there is none), a journal uses
/// the start alone.
///
/// # The All-Day Heuristic
///
/// A row is all-day when its start decodes as a date, its end (if any)
/// does too. Legacy rows stored all-day dates as zone-less midnights;
/// the codec's midnight verdict covers those.
pub(crate) fn decode_component_row(row: &Row) -> Result<Option<ComponentRow>> {
    let type_tag = text(row, 2)?;

    let (start, start_is_date) = date_time(row, 5)?;
    let mut all_day = false;

    let data = match type_tag.as_str() {
        "Event" => {
            let (end, end_is_date) = date_time(row, 9)?;
            let mut dt_end = end;
            if start_is_date && (dt_end.is_none() || end_is_date) {
                all_day = true;
                // The stored all-day end carries one extra day.
                dt_end = dt_end.map(|end| CalDateTime::Date(end.date() - chrono::Days::new(1)));
            }
            IncidenceData::Event(EventFields {
                dt_end,
                transparency: Transparency::from_code(int(row, 35)?),
            })
        }
        "Todo" => {
            let stored_has_due = int(row, 8)? != 0;
            let (due, due_is_date) = date_time(row, 9)?;
            let mut dt_due = due;
            if let (Some(due_value), Some(start_value)) = (&dt_due, &start) {
                if due_value == start_value && !stored_has_due {
                    dt_due = None;
                }
            }
            if start_is_date
                && (dt_due.is_none()
                    || (due_is_date
                        && dt_due.as_ref().map(|due| due.as_utc())
                            > start.as_ref().map(|start| start.as_utc())))
            {
                all_day = true;
            }
            let (completed, _) = date_time(row, 38)?;
            IncidenceData::Todo(TodoFields {
                has_due_date: dt_due.is_some(),
                dt_due,
                percent_complete: int(row, 37)? as i32,
                completed,
            })
        }
        "Journal" => {
            all_day = start_is_date;
            IncidenceData::Journal
        }
        "FreeBusy" => IncidenceData::FreeBusy,
        other => {
            warn!(type_tag = %other, "unknown component type skipped");
            return Ok(None);
        }
    };

    let latitude = real(row, 17)?;
    let longitude = real(row, 18)?;
    let geo = latlon_is_set(latitude).then_some(GeoPoint {
        latitude,
        longitude,
    });

    let (recurrence_id, _) = date_time(row, 29)?;

    let mut incidence = Incidence {
        uid: text(row, 34)?,
        recurrence_id,
        summary: text(row, 3)?,
        description: text(row, 15)?,
        location: text(row, 14)?,
        categories: {
            let raw = text(row, 4)?;
            if raw.is_empty() {
                Vec::new()
            } else {
                raw.split(',').map(str::to_string).collect()
            }
        },
        comments: split_words(&text(row, 25)?),
        contacts: split_words(&text(row, 27)?),
        resources: split_words(&text(row, 20)?),
        color: text(row, 42)?,
        url: text(row, 33)?,
        related_to: text(row, 32)?,
        secrecy: Secrecy::from_code(int(row, 13)?),
        status: IncidenceStatus::from_code(int(row, 16)?),
        priority: int(row, 19)? as i32,
        revision: int(row, 24)? as i32,
        dt_start: start,
        all_day,
        duration_secs: int(row, 12)?,
        geo,
        organizer: None,
        attendees: Vec::new(),
        alarms: Vec::new(),
        attachments: Vec::new(),
        custom_properties: Default::default(),
        recurrence: Default::default(),
        created: codec::from_origin(int(row, 21)?),
        last_modified: codec::from_origin(int(row, 23)?),
        local_only: int(row, 36)? != 0,
        data,
    };

    // Events without a start are not valid on disk; the epoch stands in,
    // matching what was stored for them.
    if incidence.dt_start.is_none() && matches!(incidence.data, IncidenceData::Event(_)) {
        incidence.dt_start = codec::from_origin(0).map(CalDateTime::Utc);
    }

    Ok(Some(ComponentRow {
        rowid: int(row, 0)?,
        notebook: text(row, 1)?,
        incidence,
        legacy_attachments: text(row, 26)?,
    }))
}

/// Attaches every child-table row to a decoded incidence.
///
/// Six per-component selects, all through the connection's statement
/// cache so repeated loads reuse the prepared statements. The legacy
/// attachment column is consulted last, only when the attachment table
/// produced nothing.
pub(crate) fn load_children(conn: &Connection, row: &mut ComponentRow) -> Result<()> {
    let rowid = row.rowid;
    let incidence = &mut row.incidence;

    load_custom_properties(conn, rowid, incidence)?;
    load_attendees(conn, rowid, incidence)?;
    load_alarms(conn, rowid, incidence)?;
    load_recurrence_rules(conn, rowid, incidence)?;
    load_rdates(conn, rowid, incidence)?;
    load_attachments(conn, rowid, incidence)?;

    if incidence.attachments.is_empty() && !row.legacy_attachments.is_empty() {
        for uri in row.legacy_attachments.split_ascii_whitespace() {
            incidence.attachments.push(Attachment::uri(uri));
        }
    }
    Ok(())
}

fn load_custom_properties(
    conn: &Connection,
    rowid: i64,
    incidence: &mut Incidence,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(SELECT_CUSTOMPROPERTIES_BY_ID)?;
    let mut rows = stmt.query([rowid])?;
    while let Some(row) = rows.next()? {
        incidence
            .custom_properties
            .insert(text(row, 1)?, (text(row, 2)?, text(row, 3)?));
    }
    Ok(())
}

/// Restores attendees; the flagged organizer row also fills the
/// organizer field, and stays in the attendee list like any other row.
fn load_attendees(conn: &Connection, rowid: i64, incidence: &mut Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(SELECT_ATTENDEE_BY_ID)?;
    let mut rows = stmt.query([rowid])?;
    while let Some(row) = rows.next()? {
        let email = text(row, 1)?;
        let name = text(row, 2)?;
        if int(row, 3)? != 0 {
            incidence.organizer = Some(Person::new(name.clone(), email.clone()));
        }
        incidence.attendees.push(Attendee {
            email,
            name,
            role: AttendeeRole::from_code(int(row, 4)?),
            status: PartStat::from_code(int(row, 5)?),
            rsvp: int(row, 6)? != 0,
            delegate: text(row, 7)?,
            delegator: text(row, 8)?,
        });
    }
    Ok(())
}

/// Restores alarms.
///
/// The trigger shape is rebuilt from whichever columns are populated: a
/// valid absolute time wins, otherwise the offset applies to the start
/// or end per the relation tag. Alarms with an unknown action code are
/// skipped with a warning.
fn load_alarms(conn: &Connection, rowid: i64, incidence: &mut Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(SELECT_ALARM_BY_ID)?;
    let mut rows = stmt.query([rowid])?;
    while let Some(row) = rows.next()? {
        let Some(action) = AlarmAction::from_code(int(row, 1)?) else {
            warn!(uid = %incidence.uid, "alarm with unknown action skipped");
            continue;
        };

        let (time, _) = date_time(row, 6)?;
        let offset = int(row, 4)?;
        let relation = text(row, 5)?;
        let trigger = match time {
            Some(at) => AlarmTrigger::Absolute(at),
            None if relation.contains("endTriggerRelation") => AlarmTrigger::EndOffset(offset),
            None => AlarmTrigger::StartOffset(offset),
        };

        let mut custom_properties = std::collections::BTreeMap::new();
        let raw = text(row, 13)?;
        if !raw.is_empty() {
            let mut parts = raw.split("\r\n");
            while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                custom_properties.insert(key.to_string(), value.to_string());
            }
        }

        incidence.alarms.push(Alarm {
            action,
            trigger,
            repeat_count: int(row, 2)? as i32,
            snooze_secs: int(row, 3)?,
            description: text(row, 9)?,
            attachment: text(row, 10)?,
            summary: text(row, 11)?,
            addresses: split_words(&text(row, 12)?),
            custom_properties,
            enabled: int(row, 14)? != 0,
        });
    }
    Ok(())
}

/// Restores recurrence and exception rules.
///
/// The count/until convention is normalized on the way in: a positive
/// count suppresses the end date, and a rule with neither reads as
/// count -1 (recurring forever), so round-tripped rules compare equal.
fn load_recurrence_rules(
    conn: &Connection,
    rowid: i64,
    incidence: &mut Incidence,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(SELECT_RECURSIVE_BY_ID)?;
    let mut rows = stmt.query([rowid])?;
    while let Some(row) = rows.next()? {
        let (mut until, _) = date_time(row, 3)?;
        let mut count = int(row, 6)? as i32;
        if count == 0 && until.is_none() {
            // Recurring without an end and without a count: encode the
            // open end explicitly.
            count = -1;
        } else if count > 0 {
            // A count suppresses the end date so equal rules compare
            // equal after a round trip.
            until = None;
        }

        let by_days: Vec<i32> = split_ints(&text(row, 11)?);
        let by_day_pos: Vec<i32> = split_ints(&text(row, 12)?);
        let by_days = by_days
            .iter()
            .enumerate()
            .map(|(i, day)| WeekdayPos {
                day: *day,
                pos: by_day_pos.get(i).copied().unwrap_or(0),
            })
            .collect();

        let rule = RecurrenceRule {
            frequency: Frequency::from_code(int(row, 2)?),
            until,
            count,
            interval: int(row, 7)? as i32,
            by_seconds: split_ints(&text(row, 8)?),
            by_minutes: split_ints(&text(row, 9)?),
            by_hours: split_ints(&text(row, 10)?),
            by_days,
            by_month_days: split_ints(&text(row, 13)?),
            by_year_days: split_ints(&text(row, 14)?),
            by_week_numbers: split_ints(&text(row, 15)?),
            by_months: split_ints(&text(row, 16)?),
            by_set_pos: split_ints(&text(row, 17)?),
            week_start: int(row, 18)? as i32,
        };

        if int(row, 1)? == 1 {
            incidence.recurrence.r_rules.push(rule);
        } else {
            incidence.recurrence.ex_rules.push(rule);
        }
    }
    Ok(())
}

/// Restores the four recurrence date lists from their shared table,
/// splitting on the row kind.
fn load_rdates(conn: &Connection, rowid: i64, incidence: &mut Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(SELECT_RDATES_BY_ID)?;
    let mut rows = stmt.query([rowid])?;
    while let Some(row) = rows.next()? {
        let kind = int(row, 1)?;
        let (value, _) = date_time(row, 2)?;
        let Some(value) = value else { continue };
        match kind {
            RDATE => incidence.recurrence.r_dates.push(value.date()),
            XDATE => incidence.recurrence.ex_dates.push(value.date()),
            RDATE_TIME => incidence.recurrence.r_date_times.push(value),
            XDATE_TIME => incidence.recurrence.ex_date_times.push(value),
            other => warn!(uid = %incidence.uid, kind = other, "unknown rdate kind skipped"),
        }
    }
    Ok(())
}

/// Restores attachments. A row with neither data nor a URI carries
/// nothing worth keeping and is skipped with a warning.
fn load_attachments(conn: &Connection, rowid: i64, incidence: &mut Incidence) -> Result<()> {
    let mut stmt = conn.prepare_cached(SELECT_ATTACHMENTS_BY_ID)?;
    let mut rows = stmt.query([rowid])?;
    while let Some(row) = rows.next()? {
        let data = row.get::<_, Option<Vec<u8>>>(1)?;
        let uri = row.get::<_, Option<String>>(2)?;
        let data = match (data, uri) {
            (Some(bytes), _) if !bytes.is_empty() => AttachmentData::Binary(bytes),
            (_, Some(uri)) if !uri.is_empty() => AttachmentData::Uri(uri),
            _ => {
                warn!(uid = %incidence.uid, "empty attachment row skipped");
                continue;
            }
        };
        incidence.attachments.push(Attachment {
            data,
            mime_type: text(row, 3)?,
            show_inline: int(row, 4)? != 0,
            label: text(row, 5)?,
            local: int(row, 6)? != 0,
        });
    }
    Ok(())
}

/// Runs a component select and feeds fully decoded incidences to the
/// visitor until it returns `false` or the rows run out. Returns the
/// number of rows visited.
///
/// # Rust Pattern: Visitor Closure
///
/// The callers differ only in what they do per row (collect everything,
/// collect under notebook validation, paginate with an early stop), so
/// the row loop takes an `FnMut(String, Incidence) -> bool` instead of
/// materializing a vector the paginator would then cut short.
///
/// # Why Streaming?
///
/// Sorted listings stop at a page boundary; decoding rows one at a time
/// means the statement is abandoned right there instead of draining a
/// table-sized result first.
pub(crate) fn for_each_component(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
    mut visit: impl FnMut(String, Incidence) -> bool,
) -> Result<usize> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let Some(mut component) = decode_component_row(row)? else {
            continue;
        };
        load_children(conn, &mut component)?;
        count += 1;
        if !visit(component.notebook, component.incidence) {
            break;
        }
    }
    Ok(count)
}

// =============================================================================
// Notebooks
// =============================================================================

/// Loads every notebook with its property rows, alphabetical by name.
///
/// The default flag travels inside `flags`; the session decides which
/// uid it crowns. Dates read 0 as "unset" rather than the epoch.
pub(crate) fn select_calendars(conn: &Connection) -> Result<Vec<Notebook>> {
    let mut notebooks = Vec::new();
    let mut stmt = conn.prepare_cached(SELECT_CALENDARS_ALL)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let sync_date = int(row, 5)?;
        let modified_date = int(row, 9)?;
        let created_date = int(row, 12)?;
        let mut notebook = Notebook {
            uid: text(row, 0)?,
            name: text(row, 1)?,
            description: text(row, 2)?,
            color: text(row, 3)?,
            flags: int(row, 4)? as u32,
            plugin_name: text(row, 6)?,
            account: text(row, 7)?,
            attachment_size: int(row, 8)?,
            sync_date: (sync_date != 0).then(|| codec::from_origin(sync_date)).flatten(),
            modified_date: (modified_date != 0)
                .then(|| codec::from_origin(modified_date))
                .flatten(),
            creation_date: (created_date != 0)
                .then(|| codec::from_origin(created_date))
                .flatten(),
            shared_with: split_words(&text(row, 10)?),
            sync_profile: text(row, 11)?,
            custom_properties: Default::default(),
        };
        load_calendar_properties(conn, &mut notebook)?;
        notebooks.push(notebook);
    }
    Ok(notebooks)
}

/// Property rows of one notebook, through the statement cache.
fn load_calendar_properties(conn: &Connection, notebook: &mut Notebook) -> Result<()> {
    let mut stmt = conn.prepare_cached(SELECT_CALENDARPROPERTIES_BY_ID)?;
    let mut rows = stmt.query([&notebook.uid])?;
    while let Some(row) = rows.next()? {
        notebook
            .custom_properties
            .insert(text(row, 1)?, text(row, 2)?);
    }
    Ok(())
}

// =============================================================================
// Singletons, counts, contacts
// =============================================================================

/// The stored transaction id, the cross-process modification token.
pub(crate) fn select_transaction_id(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(SELECT_METADATA, [], |row| row.get(0))?)
}

/// The serialized time-zone blob; empty on a fresh database.
pub(crate) fn select_timezones(conn: &Connection) -> Result<String> {
    Ok(conn.query_row(SELECT_TIMEZONES, [], |row| {
        Ok(row.get::<_, Option<String>>(1)?.unwrap_or_default())
    })?)
}

/// A single COUNT(*) scalar.
pub(crate) fn select_count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

/// Distinct attendee contacts, most frequently appearing first.
pub(crate) fn select_contacts(conn: &Connection) -> Result<Vec<Person>> {
    let mut stmt = conn.prepare_cached(SELECT_ATTENDEE_AND_COUNT)?;
    let rows = stmt.query_map([], |row| {
        Ok(Person {
            email: text(row, 0)?,
            name: text(row, 1)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}
