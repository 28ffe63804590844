//! Save-then-load round trips for every part of the incidence model.

mod common;

use std::collections::BTreeMap;

use chrono::TimeZone;
use chrono_tz::Tz;

use caldb::{
    Alarm, AlarmAction, AlarmTrigger, Attachment, AttachmentData, Attendee, CalDateTime, Filter,
    Frequency, GeoPoint, Incidence, IncidenceData, IncidenceStatus, Person, RecurrenceRule,
    Secrecy, TodoFields, Transparency, WeekdayPos, FLOATING_DATE,
};

use common::*;

/// A plain UTC event comes back with the same identity and times.
#[test]
fn event_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let event = sample_event("E1", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E1");
    assert_eq!(loaded.uid, "E1");
    assert_eq!(loaded.summary, "event E1");
    assert_eq!(loaded.dt_start, Some(CalDateTime::Utc(utc(2024, 5, 1, 9, 0, 0))));
    assert_eq!(
        loaded.as_event().unwrap().dt_end,
        Some(CalDateTime::Utc(utc(2024, 5, 1, 10, 0, 0)))
    );
    assert!(!loaded.all_day);
    // Bookkeeping is filled in by the engine.
    assert!(loaded.created.is_some());
    assert!(loaded.last_modified.is_some());
}

/// An all-day event is stored with its end shifted one day forward and
/// tagged floating; loading undoes the shift and restores the flag.
#[test]
fn all_day_event_stores_shifted_end() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = Incidence::new_event("E2");
    event.all_day = true;
    event.dt_start = Some(CalDateTime::Date(date(2024, 5, 1)));
    if let IncidenceData::Event(fields) = &mut event.data {
        fields.dt_end = Some(CalDateTime::Date(date(2024, 5, 1)));
    }
    store_one(&mut storage, NOTEBOOK, &event);

    // On disk: 2024-05-02 midnight, floating.
    let conn = raw_connection(&storage);
    let (end_local, end_zone): (i64, String) = conn
        .query_row(
            "SELECT DateEndDueLocal, EndDueTimeZone FROM Components WHERE UID = 'E2'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("read stored end");
    let expected = date(2024, 5, 2).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
    assert_eq!(end_local, expected);
    assert_eq!(end_zone, FLOATING_DATE);

    let loaded = load_one(&storage, "E2");
    assert!(loaded.all_day);
    assert_eq!(loaded.dt_start, Some(CalDateTime::Date(date(2024, 5, 1))));
    assert_eq!(
        loaded.as_event().unwrap().dt_end,
        Some(CalDateTime::Date(date(2024, 5, 1)))
    );
}

/// Clock times (no zone) survive unchanged.
#[test]
fn clock_time_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let start = date(2024, 5, 1).and_hms_opt(18, 30, 0).unwrap();
    let mut event = Incidence::new_event("E-clock");
    event.dt_start = Some(CalDateTime::Clock(start));
    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E-clock");
    assert_eq!(loaded.dt_start, Some(CalDateTime::Clock(start)));
    assert!(!loaded.all_day);
}

/// Zoned times keep their zone across the round trip.
#[test]
fn zoned_time_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let tz: Tz = "Europe/Helsinki".parse().unwrap();
    let start = tz.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut event = Incidence::new_event("E-zoned");
    event.dt_start = Some(CalDateTime::Zoned(start));
    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E-zoned");
    assert_eq!(loaded.dt_start, Some(CalDateTime::Zoned(start)));
}

/// FREQ=WEEKLY;BYDAY=MO,WE;COUNT=10 comes back rule for rule.
#[test]
fn recurring_event_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E3", utc(2024, 5, 6, 9, 0, 0), utc(2024, 5, 6, 10, 0, 0));
    let mut rule = RecurrenceRule::new(Frequency::Weekly);
    rule.count = 10;
    rule.by_days = vec![WeekdayPos::every(1), WeekdayPos::every(3)];
    event.recurrence.r_rules.push(rule);
    event.recurrence.ex_dates.push(date(2024, 5, 13));
    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E3");
    let rules = &loaded.recurrence.r_rules;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].frequency, Frequency::Weekly);
    assert_eq!(rules[0].by_days, vec![WeekdayPos::every(1), WeekdayPos::every(3)]);
    assert_eq!(rules[0].count, 10);
    assert_eq!(rules[0].until, None);
    assert_eq!(rules[0].interval, 1);
    assert_eq!(loaded.recurrence.ex_dates, vec![date(2024, 5, 13)]);
}

/// A rule bounded by an until date keeps it; an unbounded rule reads back
/// with the explicit infinite count.
#[test]
fn recurrence_until_and_infinite() {
    let (_dir, mut storage) = open_with_notebook();

    let mut bounded = sample_event("E-until", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    let mut rule = RecurrenceRule::new(Frequency::Daily);
    rule.until = Some(CalDateTime::Utc(utc(2024, 6, 1, 9, 0, 0)));
    bounded.recurrence.r_rules.push(rule);
    store_one(&mut storage, NOTEBOOK, &bounded);

    let mut open_ended = sample_event("E-inf", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    open_ended
        .recurrence
        .r_rules
        .push(RecurrenceRule::new(Frequency::Monthly));
    store_one(&mut storage, NOTEBOOK, &open_ended);

    let loaded = load_one(&storage, "E-until");
    assert_eq!(
        loaded.recurrence.r_rules[0].until,
        Some(CalDateTime::Utc(utc(2024, 6, 1, 9, 0, 0)))
    );

    let loaded = load_one(&storage, "E-inf");
    assert_eq!(loaded.recurrence.r_rules[0].count, -1);
    assert_eq!(loaded.recurrence.r_rules[0].until, None);
}

/// The organizer is stored as a flagged attendee row and restored as
/// both organizer and attendee-list member.
#[test]
fn organizer_absorbed_into_attendees() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-org", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    event.organizer = Some(Person::new("Olive", "olive@example.org"));
    event.attendees.push(Attendee::new("Ann", "ann@example.org"));
    event.attendees.push(Attendee::new("Bob", "bob@example.org"));
    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E-org");
    assert_eq!(
        loaded.organizer,
        Some(Person::new("Olive", "olive@example.org"))
    );
    let emails: Vec<&str> = loaded
        .attendees
        .iter()
        .map(|attendee| attendee.email.as_str())
        .collect();
    assert_eq!(emails.len(), 3);
    assert!(emails.contains(&"olive@example.org"));
    assert!(emails.contains(&"ann@example.org"));
    assert!(emails.contains(&"bob@example.org"));
}

#[test]
fn alarms_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-alarm", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));

    event.alarms.push(Alarm::display("wake up", -300));

    let mut email = Alarm::display("agenda attached", 0);
    email.action = AlarmAction::Email;
    email.trigger = AlarmTrigger::EndOffset(600);
    email.summary = "meeting soon".to_string();
    email.addresses = vec!["ann@example.org".to_string(), "bob@example.org".to_string()];
    email.repeat_count = 2;
    email.snooze_secs = 120;
    email
        .custom_properties
        .insert("X-SOUND".to_string(), "chime".to_string());
    event.alarms.push(email);

    let mut absolute = Alarm::display("hard deadline", 0);
    absolute.trigger = AlarmTrigger::Absolute(CalDateTime::Utc(utc(2024, 5, 1, 8, 45, 0)));
    event.alarms.push(absolute);

    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E-alarm");
    assert_eq!(loaded.alarms.len(), 3);

    let display = &loaded.alarms[0];
    assert_eq!(display.action, AlarmAction::Display);
    assert_eq!(display.trigger, AlarmTrigger::StartOffset(-300));
    assert_eq!(display.description, "wake up");
    assert!(display.enabled);

    let email = &loaded.alarms[1];
    assert_eq!(email.action, AlarmAction::Email);
    assert_eq!(email.trigger, AlarmTrigger::EndOffset(600));
    assert_eq!(email.summary, "meeting soon");
    assert_eq!(email.addresses, vec!["ann@example.org", "bob@example.org"]);
    assert_eq!(email.repeat_count, 2);
    assert_eq!(email.snooze_secs, 120);
    assert_eq!(email.custom_properties.get("X-SOUND"), Some(&"chime".to_string()));

    let absolute = &loaded.alarms[2];
    assert_eq!(
        absolute.trigger,
        AlarmTrigger::Absolute(CalDateTime::Utc(utc(2024, 5, 1, 8, 45, 0)))
    );
}

#[test]
fn attachments_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-att", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));

    let mut binary = Attachment::binary(vec![0xde, 0xad, 0xbe, 0xef], "application/octet-stream");
    binary.label = "payload".to_string();
    binary.show_inline = true;
    event.attachments.push(binary);
    event
        .attachments
        .push(Attachment::uri("https://example.org/agenda.pdf"));

    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E-att");
    assert_eq!(loaded.attachments.len(), 2);
    assert_eq!(
        loaded.attachments[0].data,
        AttachmentData::Binary(vec![0xde, 0xad, 0xbe, 0xef])
    );
    assert_eq!(loaded.attachments[0].label, "payload");
    assert!(loaded.attachments[0].show_inline);
    assert_eq!(
        loaded.attachments[1].data,
        AttachmentData::Uri("https://example.org/agenda.pdf".to_string())
    );
}

/// The grab bag of common fields.
#[test]
fn common_fields_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-common", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    event.description = "a description".to_string();
    event.location = "the office".to_string();
    event.categories = vec!["work".to_string(), "quarterly".to_string()];
    event.comments = vec!["first".to_string(), "second".to_string()];
    event.contacts = vec!["ann@example.org".to_string()];
    event.resources = vec!["projector".to_string(), "room-4".to_string()];
    event.color = "#ff0000".to_string();
    event.url = "https://example.org/meeting".to_string();
    event.related_to = "parent-uid".to_string();
    event.secrecy = Secrecy::Private;
    event.status = IncidenceStatus::Confirmed;
    event.priority = 5;
    event.revision = 3;
    event.duration_secs = 3600;
    event.geo = Some(GeoPoint {
        latitude: 60.17,
        longitude: 24.94,
    });
    event.local_only = true;
    event
        .custom_properties
        .insert("X-PROJECT".to_string(), ("atlas".to_string(), "ROLE=lead".to_string()));
    if let IncidenceData::Event(fields) = &mut event.data {
        fields.transparency = Transparency::Transparent;
    }
    store_one(&mut storage, NOTEBOOK, &event);

    let loaded = load_one(&storage, "E-common");
    assert_eq!(loaded.description, "a description");
    assert_eq!(loaded.location, "the office");
    assert_eq!(loaded.categories, vec!["work", "quarterly"]);
    assert_eq!(loaded.comments, vec!["first", "second"]);
    assert_eq!(loaded.contacts, vec!["ann@example.org"]);
    assert_eq!(loaded.resources, vec!["projector", "room-4"]);
    assert_eq!(loaded.color, "#ff0000");
    assert_eq!(loaded.url, "https://example.org/meeting");
    assert_eq!(loaded.related_to, "parent-uid");
    assert_eq!(loaded.secrecy, Secrecy::Private);
    assert_eq!(loaded.status, IncidenceStatus::Confirmed);
    assert_eq!(loaded.priority, 5);
    assert_eq!(loaded.revision, 3);
    assert_eq!(loaded.duration_secs, 3600);
    let geo = loaded.geo.expect("geo survived");
    assert!((geo.latitude - 60.17).abs() < 1e-9);
    assert!((geo.longitude - 24.94).abs() < 1e-9);
    assert!(loaded.local_only);
    assert_eq!(
        loaded.custom_properties.get("X-PROJECT"),
        Some(&("atlas".to_string(), "ROLE=lead".to_string()))
    );
    assert_eq!(
        loaded.as_event().unwrap().transparency,
        Transparency::Transparent
    );
}

#[test]
fn todo_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let mut todo = Incidence::new_todo("T1");
    todo.summary = "write report".to_string();
    todo.dt_start = Some(CalDateTime::Utc(utc(2024, 5, 1, 8, 0, 0)));
    todo.data = IncidenceData::Todo(TodoFields {
        dt_due: Some(CalDateTime::Utc(utc(2024, 5, 3, 17, 0, 0))),
        has_due_date: true,
        percent_complete: 40,
        completed: None,
    });
    store_one(&mut storage, NOTEBOOK, &todo);

    let loaded = load_one(&storage, "T1");
    let fields = loaded.as_todo().unwrap();
    assert_eq!(fields.dt_due, Some(CalDateTime::Utc(utc(2024, 5, 3, 17, 0, 0))));
    assert!(fields.has_due_date);
    assert_eq!(fields.percent_complete, 40);
    assert_eq!(fields.completed, None);
}

/// A fully-done to-do without a completion time gets one from the engine.
#[test]
fn completed_todo_gets_completion_time() {
    let (_dir, mut storage) = open_with_notebook();
    let mut todo = Incidence::new_todo("T2");
    todo.data = IncidenceData::Todo(TodoFields {
        dt_due: None,
        has_due_date: false,
        percent_complete: 100,
        completed: None,
    });
    store_one(&mut storage, NOTEBOOK, &todo);

    let loaded = load_one(&storage, "T2");
    assert!(loaded.as_todo().unwrap().completed.is_some());
}

#[test]
fn journal_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let mut journal = Incidence::new_journal("J1");
    journal.summary = "dear diary".to_string();
    journal.description = "a long day".to_string();
    journal.dt_start = Some(CalDateTime::Utc(utc(2024, 5, 1, 21, 0, 0)));
    store_one(&mut storage, NOTEBOOK, &journal);

    let loaded = load_one(&storage, "J1");
    assert!(matches!(loaded.data, IncidenceData::Journal));
    assert_eq!(loaded.summary, "dear diary");
    assert_eq!(loaded.dt_start, Some(CalDateTime::Utc(utc(2024, 5, 1, 21, 0, 0))));
}

/// Insert followed by update leaves exactly one main row and unchanged
/// child cardinalities.
#[test]
fn update_is_idempotent_on_rows() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-upd", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    event.attendees.push(Attendee::new("Ann", "ann@example.org"));
    event.alarms.push(Alarm::display("ping", -60));
    event
        .custom_properties
        .insert("X-ONE".to_string(), ("1".to_string(), String::new()));
    store_one(&mut storage, NOTEBOOK, &event);

    event.summary = "renamed".to_string();
    update_one(&mut storage, NOTEBOOK, &event);

    let conn = raw_connection(&storage);
    let components: i64 = conn
        .query_row("SELECT COUNT(*) FROM Components WHERE UID = 'E-upd'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(components, 1);
    assert_eq!(child_rows(&conn, "Attendee", "E-upd"), 1);
    assert_eq!(child_rows(&conn, "Alarm", "E-upd"), 1);
    assert_eq!(child_rows(&conn, "Customproperties", "E-upd"), 1);

    assert_eq!(load_one(&storage, "E-upd").summary, "renamed");
}

/// A recurrence override and its parent share a uid; the pair is keyed by
/// the recurrence id.
#[test]
fn series_override_round_trip() {
    let (_dir, mut storage) = open_with_notebook();
    let parent = {
        let mut event = sample_event("R1", utc(2024, 5, 6, 9, 0, 0), utc(2024, 5, 6, 10, 0, 0));
        event
            .recurrence
            .r_rules
            .push(RecurrenceRule::new(Frequency::Weekly));
        event
    };
    let override_instance = {
        let mut event = sample_event("R1", utc(2024, 5, 13, 11, 0, 0), utc(2024, 5, 13, 12, 0, 0));
        event.recurrence_id = Some(CalDateTime::Utc(utc(2024, 5, 13, 9, 0, 0)));
        event
    };
    store_one(&mut storage, NOTEBOOK, &parent);
    store_one(&mut storage, NOTEBOOK, &override_instance);

    let series = storage
        .load_incidences(&Filter::Series("R1".to_string()))
        .expect("load series");
    assert_eq!(series.len(), 2);

    let only_override = storage
        .load_incidences(&Filter::Incidence {
            uid: "R1".to_string(),
            recurrence_id: Some(CalDateTime::Utc(utc(2024, 5, 13, 9, 0, 0))),
        })
        .expect("load override");
    assert_eq!(only_override.len(), 1);
    assert_eq!(
        only_override[0].1.recurrence_id,
        Some(CalDateTime::Utc(utc(2024, 5, 13, 9, 0, 0)))
    );

    let only_parent = storage
        .load_incidences(&Filter::Incidence {
            uid: "R1".to_string(),
            recurrence_id: None,
        })
        .expect("load parent");
    assert_eq!(only_parent.len(), 1);
    assert_eq!(only_parent[0].1.recurrence_id, None);
}

/// Rows written before the attachment table existed carry their URIs as
/// a space-separated list in the main row; those still load.
#[test]
fn legacy_attachment_column_is_honored() {
    let (_dir, mut storage) = open_with_notebook();
    let event = sample_event("E-legacy", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    store_one(&mut storage, NOTEBOOK, &event);

    raw_connection(&storage)
        .execute(
            "UPDATE Components SET Attachments = 'file:///a.pdf file:///b.pdf' \
             WHERE UID = 'E-legacy'",
            [],
        )
        .expect("write legacy column");

    let loaded = load_one(&storage, "E-legacy");
    assert_eq!(loaded.attachments.len(), 2);
    assert_eq!(
        loaded.attachments[0].data,
        AttachmentData::Uri("file:///a.pdf".to_string())
    );
}

/// Rows written before floating dates existed stored all-day dates as
/// zone-less midnights; the midnight heuristic restores the all-day flag.
#[test]
fn legacy_clock_midnight_reads_as_all_day() {
    let (_dir, mut storage) = open_with_notebook();
    let midnight = date(2024, 5, 1)
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp();
    raw_connection(&storage)
        .execute(
            "INSERT INTO Components (Notebook, Type, UID, Summary, \
             DateStart, DateStartLocal, StartTimeZone, \
             DateEndDue, DateEndDueLocal, EndDueTimeZone, \
             RecurId, DateCreated, DateLastModified, DateDeleted) \
             VALUES (?1, 'Event', 'E-midnight', 'old row', \
             ?2, ?2, '', 0, 0, '', 0, ?2, ?2, 0)",
            rusqlite::params![NOTEBOOK, midnight],
        )
        .expect("insert legacy row");

    let loaded = load_one(&storage, "E-midnight");
    assert!(loaded.all_day, "midnight clock time reads as an all-day date");
}

/// Custom properties keep their parameters.
#[test]
fn custom_property_parameters() {
    let (_dir, mut storage) = open_with_notebook();
    let mut event = sample_event("E-prop", utc(2024, 5, 1, 9, 0, 0), utc(2024, 5, 1, 10, 0, 0));
    let mut properties = BTreeMap::new();
    properties.insert(
        "X-A".to_string(),
        ("value-a".to_string(), "LANG=en".to_string()),
    );
    properties.insert("X-B".to_string(), ("value-b".to_string(), String::new()));
    event.custom_properties = properties.clone();
    store_one(&mut storage, NOTEBOOK, &event);

    assert_eq!(load_one(&storage, "E-prop").custom_properties, properties);
}
