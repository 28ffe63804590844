//! # Domain Types
//!
//! The calendar model the engine persists: incidences (events, to-dos,
//! journals, free/busy markers), notebooks, and their parts.
//!
//! ## Design Philosophy: Tagged Unions over Trait Objects
//!
//! Events, to-dos and journals share one set of common fields; the
//! variant-specific fields live in a tagged union ([`IncidenceData`])
//! rather than behind trait objects. This buys:
//!
//! - **Exhaustive matching**: the row codec matches every variant, and
//!   adding one is a compile error at every site that must handle it
//! - **Plain value semantics**: incidences clone, compare and cross
//!   thread boundaries without `Arc`/`dyn` machinery
//! - **One column set**: all variants share the `Components` row shape,
//!   with the `Type` tag selecting the interpretation
//!
//! ## Stored Codes
//!
//! Enumerations that end up in integer columns ([`Secrecy`], status
//! codes, alarm actions, recurrence frequencies, ...) carry explicit
//! discriminants; the stored integers are part of the on-disk format and
//! must not shift. Each such enum pairs a `from_code` decoder with a
//! plain `as i64` cast on the encode side.
//!
//! ## Example
//!
//! ```rust
//! use caldb::{Incidence, IncidenceData};
//!
//! let mut event = Incidence::new_event("evt-1");
//! event.summary = "team meeting".to_string();
//! assert_eq!(event.data.type_tag(), "Event");
//! assert_eq!(event.recurrence_id_seconds(), 0);
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::codec::CalDateTime;

// =============================================================================
// Incidences
// =============================================================================

/// Classification of an incidence.
///
/// # Stability
///
/// The discriminants are the stored integers; `Public` doubles as the
/// decode fallback for codes written by other software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Secrecy {
    #[default]
    Public = 0,
    Private = 1,
    Confidential = 2,
}

impl Secrecy {
    /// Decodes a stored classification code; unknown codes read as
    /// `Public` rather than failing the row.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Secrecy::Private,
            2 => Secrecy::Confidential,
            _ => Secrecy::Public,
        }
    }
}

/// RFC 5545 status of an incidence.
///
/// One enum covers the event statuses (`Tentative`, `Confirmed`), the
/// to-do statuses (`NeedsAction`, `InProcess`, `Completed`) and the
/// journal statuses (`Draft`, `Final`); the stored code does not say
/// which family it came from, so neither does the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncidenceStatus {
    #[default]
    None = 0,
    Tentative = 1,
    Confirmed = 2,
    Completed = 3,
    NeedsAction = 4,
    Canceled = 5,
    InProcess = 6,
    Draft = 7,
    Final = 8,
}

impl IncidenceStatus {
    /// Decodes a stored status code; unknown codes read as `None`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => IncidenceStatus::Tentative,
            2 => IncidenceStatus::Confirmed,
            3 => IncidenceStatus::Completed,
            4 => IncidenceStatus::NeedsAction,
            5 => IncidenceStatus::Canceled,
            6 => IncidenceStatus::InProcess,
            7 => IncidenceStatus::Draft,
            8 => IncidenceStatus::Final,
            _ => IncidenceStatus::None,
        }
    }
}

/// Whether an event blocks time on a free/busy view.
///
/// `Opaque` events consume the slot; `Transparent` ones (birthdays,
/// reminders) leave it free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transparency {
    #[default]
    Opaque = 0,
    Transparent = 1,
}

impl Transparency {
    /// Decodes a stored transparency code; anything but 1 reads opaque.
    pub fn from_code(code: i64) -> Self {
        if code == 1 {
            Transparency::Transparent
        } else {
            Transparency::Opaque
        }
    }
}

/// A geographic position.
///
/// # Why No Option Inside?
///
/// Absence is modelled one level up (`Incidence::geo` is an `Option`);
/// on disk it becomes the [`crate::codec::INVALID_LATLON`] sentinel in
/// both REAL columns, which is what the original file format uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A name/email pair, used for organizers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Person {
    pub name: String,
    pub email: String,
}

impl Person {
    /// # Rust Pattern: impl Into\<String\>
    ///
    /// Accepting `impl Into<String>` means callers can pass `&str` or
    /// `String`; the conversion happens at the call site.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Participation role of an attendee. The codes are the stored integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttendeeRole {
    #[default]
    RequiredParticipant = 0,
    OptionalParticipant = 1,
    NonParticipant = 2,
    Chair = 3,
}

impl AttendeeRole {
    /// Decodes a stored role code; unknown codes read as required.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => AttendeeRole::OptionalParticipant,
            2 => AttendeeRole::NonParticipant,
            3 => AttendeeRole::Chair,
            _ => AttendeeRole::RequiredParticipant,
        }
    }
}

/// Participation status of an attendee. The codes are the stored
/// integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartStat {
    #[default]
    NeedsAction = 0,
    Accepted = 1,
    Declined = 2,
    Tentative = 3,
    Delegated = 4,
    Completed = 5,
    InProcess = 6,
}

impl PartStat {
    /// Decodes a stored participation code; unknown codes read as
    /// needs-action.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => PartStat::Accepted,
            2 => PartStat::Declined,
            3 => PartStat::Tentative,
            4 => PartStat::Delegated,
            5 => PartStat::Completed,
            6 => PartStat::InProcess,
            _ => PartStat::NeedsAction,
        }
    }
}

/// A participant of an incidence.
///
/// # Why Email Is the Key
///
/// The attendee table keys on `(component, email)`: one row per address,
/// and the organizer occupies one of those rows with a flag set.
/// Attendees without an email address cannot be keyed and are skipped
/// with a warning on save.
///
/// # Delegation
///
/// `delegate` is who this attendee handed participation to,
/// `delegator` who handed it to them, both as bare addresses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attendee {
    pub email: String,
    pub name: String,
    pub role: AttendeeRole,
    pub status: PartStat,
    pub rsvp: bool,
    pub delegate: String,
    pub delegator: String,
}

impl Attendee {
    /// A required participant with needs-action status.
    ///
    /// # Example
    ///
    /// ```rust
    /// use caldb::Attendee;
    ///
    /// let ann = Attendee::new("Ann", "ann@example.org");
    /// assert!(!ann.rsvp);
    /// ```
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

// =============================================================================
// Alarms
// =============================================================================

/// What an alarm does when it fires. The codes are the stored integers.
///
/// # Why No `Invalid` Variant?
///
/// A stored action outside 1..=4 has no meaning to any consumer, so
/// `from_code` returns `None` and the row decoder skips the alarm with a
/// warning instead of carrying a dead variant around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    Display = 1,
    Procedure = 2,
    Email = 3,
    Audio = 4,
}

impl AlarmAction {
    /// Decodes a stored action code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(AlarmAction::Display),
            2 => Some(AlarmAction::Procedure),
            3 => Some(AlarmAction::Email),
            4 => Some(AlarmAction::Audio),
            _ => None,
        }
    }
}

/// When an alarm fires.
///
/// # Rust Pattern: Enum for Mutually Exclusive States
///
/// The on-disk row spreads the trigger over an offset column, a relation
/// tag and three absolute-time columns, with exactly one shape populated.
/// In the model that "exactly one" is the type: an alarm cannot carry
/// both an offset and an absolute time.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmTrigger {
    /// Offset in seconds from the incidence start (negative = before).
    StartOffset(i64),
    /// Offset in seconds from the incidence end.
    EndOffset(i64),
    /// A fixed trigger time.
    Absolute(CalDateTime),
}

/// A reminder attached to an incidence.
///
/// # Field Overloading
///
/// The free-form text fields are overloaded per action, following the
/// iCalendar model:
///
/// | Field | Display | Procedure | Email | Audio |
/// |-------|---------|-----------|-------|-------|
/// | `description` | text | arguments | body | - |
/// | `attachment` | - | program file | attachment list | audio file |
/// | `summary` | - | - | subject | - |
///
/// # Repetition
///
/// `repeat_count` is the number of additional fires after the first,
/// `snooze_secs` the pause between them; both zero means fire once.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub action: AlarmAction,
    pub trigger: AlarmTrigger,
    /// Number of additional repetitions after the first fire.
    pub repeat_count: i32,
    /// Seconds between repetitions.
    pub snooze_secs: i64,
    pub description: String,
    pub attachment: String,
    pub summary: String,
    /// Mail recipients (email addresses).
    pub addresses: Vec<String>,
    pub custom_properties: BTreeMap<String, String>,
    pub enabled: bool,
}

impl Alarm {
    /// A display alarm firing `offset_secs` relative to the start.
    ///
    /// # Example
    ///
    /// ```rust
    /// use caldb::{Alarm, AlarmTrigger};
    ///
    /// // Five minutes before the start.
    /// let alarm = Alarm::display("wake up", -300);
    /// assert_eq!(alarm.trigger, AlarmTrigger::StartOffset(-300));
    /// assert!(alarm.enabled);
    /// ```
    pub fn display(text: impl Into<String>, offset_secs: i64) -> Self {
        Self {
            action: AlarmAction::Display,
            trigger: AlarmTrigger::StartOffset(offset_secs),
            repeat_count: 0,
            snooze_secs: 0,
            description: text.into(),
            attachment: String::new(),
            summary: String::new(),
            addresses: Vec::new(),
            custom_properties: BTreeMap::new(),
            enabled: true,
        }
    }
}

// =============================================================================
// Attachments
// =============================================================================

/// Attachment payload: either inline binary data or a URI, never both.
///
/// # Rust Pattern: Enum over Two Nullable Columns
///
/// On disk this is a nullable BLOB next to a nullable TEXT column with
/// the convention that exactly one is set; the enum makes the convention
/// unrepresentable to violate in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    Binary(Vec<u8>),
    Uri(String),
}

/// A document attached to an incidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub data: AttachmentData,
    pub mime_type: String,
    pub show_inline: bool,
    pub label: String,
    pub local: bool,
}

impl Attachment {
    /// An attachment referencing an external resource.
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            data: AttachmentData::Uri(uri.into()),
            mime_type: String::new(),
            show_inline: false,
            label: String::new(),
            local: false,
        }
    }

    /// An attachment carrying its payload inline.
    pub fn binary(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data: AttachmentData::Binary(data),
            mime_type: mime_type.into(),
            show_inline: false,
            label: String::new(),
            local: false,
        }
    }
}

// =============================================================================
// Recurrence
// =============================================================================

/// RRULE frequency. The codes 1..=7 are the stored integers, in the
/// RFC's SECONDLY..YEARLY order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    #[default]
    None = 0,
    Secondly = 1,
    Minutely = 2,
    Hourly = 3,
    Daily = 4,
    Weekly = 5,
    Monthly = 6,
    Yearly = 7,
}

impl Frequency {
    /// Decodes a stored frequency code; unknown codes read as `None`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Frequency::Secondly,
            2 => Frequency::Minutely,
            3 => Frequency::Hourly,
            4 => Frequency::Daily,
            5 => Frequency::Weekly,
            6 => Frequency::Monthly,
            7 => Frequency::Yearly,
            _ => Frequency::None,
        }
    }
}

/// A BYDAY entry: a weekday (1 = Monday .. 7 = Sunday) with an optional
/// positional prefix (0 = every, 1 = first, -1 = last, ...).
///
/// # Storage
///
/// BYDAY rows store the weekday numbers and the positions as two
/// parallel space-separated lists, so `-1SU` (last Sunday) becomes `7`
/// in one column and `-1` in the other at the same list index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayPos {
    pub day: i32,
    pub pos: i32,
}

impl WeekdayPos {
    /// Every occurrence of the weekday (no positional prefix).
    pub fn every(day: i32) -> Self {
        Self { day, pos: 0 }
    }
}

/// One recurrence or exception rule.
///
/// # The `count` Convention
///
/// `count` follows the stored convention:
///
/// - positive: the number of occurrences, and `until` is suppressed so
///   equal rules compare equal after a round trip
/// - `0`: the end is given by `until`
/// - `-1`: recurring forever (written back explicitly when a stored rule
///   has neither a count nor an end)
///
/// # Example
///
/// ```rust
/// use caldb::{Frequency, RecurrenceRule, WeekdayPos};
///
/// // Every Monday and Wednesday, ten times.
/// let mut rule = RecurrenceRule::new(Frequency::Weekly);
/// rule.count = 10;
/// rule.by_days = vec![WeekdayPos::every(1), WeekdayPos::every(3)];
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub until: Option<CalDateTime>,
    pub count: i32,
    pub interval: i32,
    pub by_seconds: Vec<i32>,
    pub by_minutes: Vec<i32>,
    pub by_hours: Vec<i32>,
    pub by_days: Vec<WeekdayPos>,
    pub by_month_days: Vec<i32>,
    pub by_year_days: Vec<i32>,
    pub by_week_numbers: Vec<i32>,
    pub by_months: Vec<i32>,
    pub by_set_pos: Vec<i32>,
    /// First day of the week, 1 = Monday.
    pub week_start: i32,
}

impl RecurrenceRule {
    /// A rule with interval one and Monday week start, the common case.
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            week_start: 1,
            ..Self::default()
        }
    }
}

/// The full recurrence of an incidence: rules, exception rules, and the
/// explicit inclusion/exclusion dates.
///
/// # Four Date Lists
///
/// `r_dates`/`ex_dates` hold pure dates (all-day semantics);
/// `r_date_times`/`ex_date_times` hold full date-times. The storage keeps
/// all four in one child table distinguished by a row kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recurrence {
    pub r_rules: Vec<RecurrenceRule>,
    pub ex_rules: Vec<RecurrenceRule>,
    pub r_dates: Vec<NaiveDate>,
    pub ex_dates: Vec<NaiveDate>,
    pub r_date_times: Vec<CalDateTime>,
    pub ex_date_times: Vec<CalDateTime>,
}

impl Recurrence {
    /// True when nothing recurs.
    pub fn is_empty(&self) -> bool {
        self.r_rules.is_empty()
            && self.ex_rules.is_empty()
            && self.r_dates.is_empty()
            && self.ex_dates.is_empty()
            && self.r_date_times.is_empty()
            && self.ex_date_times.is_empty()
    }
}

// =============================================================================
// Incidence
// =============================================================================

/// Event-specific fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventFields {
    /// End of the event; stored with one extra day for all-day events
    /// (a compatibility quirk the decoder undoes).
    pub dt_end: Option<CalDateTime>,
    /// Free/busy transparency.
    pub transparency: Transparency,
}

/// To-do-specific fields.
///
/// # Why `has_due_date`?
///
/// A to-do whose due time equals its start is ambiguous on disk (both
/// land in the same columns); the flag distinguishes "due at the start"
/// from "no due date at all".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TodoFields {
    pub dt_due: Option<CalDateTime>,
    /// Distinguishes "no due date" from "due equals start".
    pub has_due_date: bool,
    pub percent_complete: i32,
    pub completed: Option<CalDateTime>,
}

impl TodoFields {
    /// A to-do is completed when fully percent-done or carrying a
    /// completion time. The save path stamps a completion time onto
    /// completed to-dos that lack one.
    pub fn is_completed(&self) -> bool {
        self.percent_complete >= 100 || self.completed.is_some()
    }
}

/// The variant-specific half of an incidence.
///
/// # Rust Pattern: Data-Carrying Enum
///
/// The variant selects the interpretation of the shared columns (an
/// event's end and a to-do's due time share storage) and carries the
/// fields only that variant has. Free/busy markers have no fields of
/// their own; they are persisted by type tag alone.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidenceData {
    Event(EventFields),
    Todo(TodoFields),
    Journal,
    /// Free/busy markers are persisted by type tag only.
    FreeBusy,
}

impl IncidenceData {
    /// The type tag stored in the `Type` column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            IncidenceData::Event(_) => "Event",
            IncidenceData::Todo(_) => "Todo",
            IncidenceData::Journal => "Journal",
            IncidenceData::FreeBusy => "FreeBusy",
        }
    }
}

/// A calendar object: event, to-do, journal or free/busy marker.
///
/// # Identity
///
/// The natural key of a stored incidence is `(uid, recurrence_id)`. A
/// set recurrence id marks this object as an override of one instance of
/// a recurring series with the same uid; the series parent has none.
///
/// # Bookkeeping
///
/// `created` and `last_modified` default to "now UTC" when left unset at
/// save time, so a freshly built incidence needs neither.
///
/// # Example
///
/// ```rust
/// use caldb::Incidence;
///
/// let mut event = Incidence::new_event("evt-1");
/// event.summary = "standup".to_string();
/// assert!(event.recurrence.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Incidence {
    /// The iCalendar UID; shared by every row of a recurring series.
    pub uid: String,
    /// The overridden instance this object replaces, when it is an
    /// override rather than a series parent or a plain incidence.
    pub recurrence_id: Option<CalDateTime>,

    /// One-line title.
    pub summary: String,
    /// Long-form body text.
    pub description: String,
    /// Free-form venue text (unused by journals).
    pub location: String,
    /// Category labels, stored comma-joined.
    pub categories: Vec<String>,
    /// Comment lines, stored space-joined.
    pub comments: Vec<String>,
    /// Contact strings, stored space-joined.
    pub contacts: Vec<String>,
    /// Required resources ("projector"), stored space-joined.
    pub resources: Vec<String>,
    /// Display color, free-form (typically `#rrggbb`).
    pub color: String,
    /// An associated URL.
    pub url: String,
    /// Uid of the incidence this one relates to (RELATED-TO).
    pub related_to: String,

    /// Access classification.
    pub secrecy: Secrecy,
    /// RFC 5545 status.
    pub status: IncidenceStatus,
    /// 0 (undefined) through 9 (lowest); 1 is highest.
    pub priority: i32,
    /// The SEQUENCE revision counter, bumped by editors on change.
    pub revision: i32,

    /// Start of the effective range; mandatory for stored events.
    pub dt_start: Option<CalDateTime>,
    /// All-day flag; forces the floating-date shape on every stored
    /// date-time of this incidence.
    pub all_day: bool,
    /// Duration in seconds; 0 means no explicit duration.
    pub duration_secs: i64,
    /// Location on the globe, when any.
    pub geo: Option<GeoPoint>,

    /// Who organizes; saved as a flagged attendee row.
    pub organizer: Option<Person>,
    pub attendees: Vec<Attendee>,
    pub alarms: Vec<Alarm>,
    pub attachments: Vec<Attachment>,
    /// Custom property name → (value, parameters).
    pub custom_properties: BTreeMap<String, (String, String)>,
    /// Rules and explicit dates making this incidence recur.
    pub recurrence: Recurrence,

    /// Creation instant; stamped with "now UTC" at first save if unset.
    pub created: Option<DateTime<Utc>>,
    /// Last modification; stamped at save if unset.
    pub last_modified: Option<DateTime<Utc>>,
    /// Device-local marker: excluded from sync uploads by consumers.
    pub local_only: bool,

    /// The variant-specific half.
    pub data: IncidenceData,
}

impl Incidence {
    fn with_data(uid: impl Into<String>, data: IncidenceData) -> Self {
        Self {
            uid: uid.into(),
            recurrence_id: None,
            summary: String::new(),
            description: String::new(),
            location: String::new(),
            categories: Vec::new(),
            comments: Vec::new(),
            contacts: Vec::new(),
            resources: Vec::new(),
            color: String::new(),
            url: String::new(),
            related_to: String::new(),
            secrecy: Secrecy::default(),
            status: IncidenceStatus::default(),
            priority: 0,
            revision: 0,
            dt_start: None,
            all_day: false,
            duration_secs: 0,
            geo: None,
            organizer: None,
            attendees: Vec::new(),
            alarms: Vec::new(),
            attachments: Vec::new(),
            custom_properties: BTreeMap::new(),
            recurrence: Recurrence::default(),
            created: None,
            last_modified: None,
            local_only: false,
            data,
        }
    }

    /// An empty event with the given uid.
    pub fn new_event(uid: impl Into<String>) -> Self {
        Self::with_data(uid, IncidenceData::Event(EventFields::default()))
    }

    /// An empty to-do with the given uid.
    pub fn new_todo(uid: impl Into<String>) -> Self {
        Self::with_data(uid, IncidenceData::Todo(TodoFields::default()))
    }

    /// An empty journal with the given uid.
    pub fn new_journal(uid: impl Into<String>) -> Self {
        Self::with_data(uid, IncidenceData::Journal)
    }

    /// The event fields, when this is an event.
    ///
    /// # Example
    ///
    /// ```rust
    /// use caldb::Incidence;
    ///
    /// let event = Incidence::new_event("e");
    /// assert!(event.as_event().is_some());
    /// assert!(event.as_todo().is_none());
    /// ```
    pub fn as_event(&self) -> Option<&EventFields> {
        match &self.data {
            IncidenceData::Event(e) => Some(e),
            _ => None,
        }
    }

    /// The to-do fields, when this is a to-do.
    pub fn as_todo(&self) -> Option<&TodoFields> {
        match &self.data {
            IncidenceData::Todo(t) => Some(t),
            _ => None,
        }
    }

    /// The date-time closing this incidence's effective range: the event
    /// end or the to-do due time. Journals and free/busy markers have
    /// none; the sorted listings fall back to the start or the creation
    /// time for them.
    pub fn end_date_time(&self) -> Option<&CalDateTime> {
        match &self.data {
            IncidenceData::Event(e) => e.dt_end.as_ref(),
            IncidenceData::Todo(t) => t.dt_due.as_ref(),
            _ => None,
        }
    }

    /// Encoded recurrence-id seconds; 0 when this is not an override.
    ///
    /// # Why Seconds?
    ///
    /// The `RecurId` column holds this integer and, together with `UID`,
    /// forms the natural key of the component table. The encoding must
    /// stay stable for the key to keep matching; see
    /// [`CalDateTime::instance_seconds`].
    pub fn recurrence_id_seconds(&self) -> i64 {
        self.recurrence_id
            .as_ref()
            .map(CalDateTime::instance_seconds)
            .unwrap_or(0)
    }
}

// =============================================================================
// Notebooks
// =============================================================================

/// Bits of the notebook `Flags` column.
///
/// # Why a Bitset?
///
/// The column predates this crate; all notebook booleans share one
/// INTEGER so the schema never widens when a flag is added.
pub mod notebook_flags {
    pub const SHARED: u32 = 1 << 0;
    pub const MASTER: u32 = 1 << 1;
    pub const SYNCHRONIZED: u32 = 1 << 2;
    pub const READ_ONLY: u32 = 1 << 3;
    pub const VISIBLE: u32 = 1 << 4;
    pub const RUN_TIME_ONLY: u32 = 1 << 5;
    /// At most one notebook per storage carries this bit; the session
    /// enforces uniqueness when saving.
    pub const DEFAULT: u32 = 1 << 6;
}

/// A named collection of incidences with its own sync metadata.
///
/// # Lifecycle
///
/// Every stored incidence belongs to exactly one notebook by uid.
/// Deleting a notebook takes its incidences with it, tombstones
/// included, so no orphan rows survive.
///
/// # Example
///
/// ```rust
/// use caldb::Notebook;
///
/// let mut personal = Notebook::new("nb-1", "Personal");
/// personal.color = "#00ff00".to_string();
/// personal.set_default(true);
/// assert!(personal.is_default());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Notebook {
    /// Stable identifier; incidences reference notebooks by this.
    pub uid: String,
    /// Display name; the notebook listing sorts on it.
    pub name: String,
    pub description: String,
    /// Display color, free-form.
    pub color: String,
    /// Flag bitset; see [`notebook_flags`].
    pub flags: u32,
    /// Name of the sync plugin owning this notebook, if any.
    pub plugin_name: String,
    /// Account identifier of the owning service.
    pub account: String,
    /// Attachment-size quota in bytes; negative means unlimited.
    pub attachment_size: i64,
    /// Last successful sync.
    pub sync_date: Option<DateTime<Utc>>,
    /// Last metadata change.
    pub modified_date: Option<DateTime<Utc>>,
    /// When the notebook was created.
    pub creation_date: Option<DateTime<Utc>>,
    /// Addresses this notebook is shared with, stored space-joined.
    pub shared_with: Vec<String>,
    /// Identifier of the sync profile driving this notebook.
    pub sync_profile: String,
    /// Open-ended key/value metadata.
    pub custom_properties: BTreeMap<String, String>,
}

impl Notebook {
    /// A visible notebook with no quota and empty sync metadata.
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            description: String::new(),
            color: String::new(),
            flags: notebook_flags::VISIBLE,
            plugin_name: String::new(),
            account: String::new(),
            attachment_size: -1,
            sync_date: None,
            modified_date: None,
            creation_date: None,
            shared_with: Vec::new(),
            sync_profile: String::new(),
            custom_properties: BTreeMap::new(),
        }
    }

    /// Whether this notebook carries the default flag.
    pub fn is_default(&self) -> bool {
        self.flags & notebook_flags::DEFAULT != 0
    }

    /// Sets or clears the default flag, leaving the other bits alone.
    pub fn set_default(&mut self, default: bool) {
        if default {
            self.flags |= notebook_flags::DEFAULT;
        } else {
            self.flags &= !notebook_flags::DEFAULT;
        }
    }
}

// =============================================================================
// Operations and filters
// =============================================================================

/// Database operation applied to a row.
///
/// The two delete shapes differ in what sync consumers see afterwards:
/// a marked row remains visible in the tombstone listings, a deleted
/// row is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOperation {
    Insert,
    Update,
    /// Soft delete: set `DateDeleted`, keep the row for sync consumers.
    MarkDeleted,
    /// Hard delete: purge the row and its children.
    Delete,
}

/// What to do with the deletions list of a save batch.
///
/// `MarkDeleted` leaves tombstones for sync consumers to observe;
/// `PurgeDeleted` removes the rows outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    MarkDeleted,
    PurgeDeleted,
}

/// Selection of incidences for an unsorted load.
///
/// # Design: Closed Taxonomy
///
/// The variants form a closed set, and each maps to exactly one prepared
/// statement. A sum type (rather than a filter trait) keeps the
/// statement selection an exhaustive match: a new filter kind cannot be
/// added without also deciding its SQL.
///
/// # Example
///
/// ```rust,ignore
/// use caldb::Filter;
///
/// let one = Filter::Incidence {
///     uid: "evt-1".to_string(),
///     recurrence_id: None,
/// };
/// let page = storage.load_incidences(&one)?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every live incidence.
    All,
    /// Live incidences of one notebook.
    Notebook(String),
    /// A single incidence by natural key.
    Incidence {
        uid: String,
        recurrence_id: Option<CalDateTime>,
    },
    /// A recurring series: every row sharing the uid.
    Series(String),
    /// Incidences whose effective range overlaps `[start, end]`. Rows that
    /// recur always match and are narrowed by the caller's recurrence
    /// expansion.
    DatetimeRange {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// Incidences without any start or end.
    NoDate,
    /// To-dos not yet completed.
    UncompletedTodos,
    /// All journals.
    Journals,
    /// Incidences that recur or override a series instance.
    Recursive,
    /// Incidences inside a geo box. Both deltas spanning a hemisphere or
    /// more (`dlat >= 180 && dlon >= 360`) degenerates to "everything with
    /// a location".
    GeoLocation {
        latitude: f64,
        longitude: f64,
        delta_latitude: f64,
        delta_longitude: f64,
    },
    /// Incidences with at least one attendee.
    Attendees,
}

/// Selection for a sorted, windowed listing.
///
/// Each variant maps to exactly one prepared statement; results are
/// ordered by the listing's anchor, descending except the future listing
/// (`Datetime { before: false }`), which walks forward in time.
#[derive(Debug, Clone, PartialEq)]
pub enum SortedFilter {
    /// The smart date listing. `use_date` anchors on end/start dates
    /// instead of creation times; `before == false` lists forward from the
    /// anchor, ascending, ignoring event ends.
    Datetime { use_date: bool, before: bool },
    /// Journals by start date.
    Journals,
    /// Completed to-dos, by due date (`use_date`) or creation time.
    CompletedTodos { use_date: bool },
    /// Located incidences, by end date (`use_date`) or creation time.
    GeoLocation { use_date: bool },
    /// Incidences with attendees, optionally narrowed to one email,
    /// by creation time.
    Attendee { email: Option<String> },
}

/// Loaded incidences paired with their notebook uid, in result order.
///
/// # Why Not a HashMap?
///
/// Sorted listings are meaningful in order; a vector of pairs keeps the
/// multi-map shape (one notebook uid per incidence) without erasing it.
pub type NotebookIncidences = Vec<(String, Incidence)>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags() {
        assert_eq!(Incidence::new_event("e").data.type_tag(), "Event");
        assert_eq!(Incidence::new_todo("t").data.type_tag(), "Todo");
        assert_eq!(Incidence::new_journal("j").data.type_tag(), "Journal");
        assert_eq!(IncidenceData::FreeBusy.type_tag(), "FreeBusy");
    }

    /// The discriminants are the on-disk format; pin them.
    #[test]
    fn stored_codes_are_stable() {
        assert_eq!(AlarmAction::Display as i64, 1);
        assert_eq!(AlarmAction::Audio as i64, 4);
        assert_eq!(Frequency::Secondly as i64, 1);
        assert_eq!(Frequency::Yearly as i64, 7);
        assert_eq!(Secrecy::Confidential as i64, 2);
    }

    #[test]
    fn notebook_default_flag() {
        let mut nb = Notebook::new("nb-1", "Personal");
        assert!(!nb.is_default());
        nb.set_default(true);
        assert!(nb.is_default());
        assert!(nb.flags & notebook_flags::VISIBLE != 0);
        nb.set_default(false);
        assert!(!nb.is_default());
    }

    #[test]
    fn recurrence_id_seconds_is_zero_without_override() {
        let inc = Incidence::new_event("e");
        assert_eq!(inc.recurrence_id_seconds(), 0);
    }

    #[test]
    fn todo_completion() {
        let mut todo = TodoFields::default();
        assert!(!todo.is_completed());
        todo.percent_complete = 100;
        assert!(todo.is_completed());
    }
}
