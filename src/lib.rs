//! # caldb: Embedded Calendar Storage
//!
//! A persistent storage engine for iCalendar-like data (events, to-dos,
//! journals) grouped into notebooks, over a single SQLite file shared by
//! every process on the device.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                       StorageActor                             │
//! │            (worker thread, command queue, events)              │
//! └───────────────────────────┬────────────────────────────────────┘
//!                             │
//! ┌───────────────────────────▼────────────────────────────────────┐
//! │                         Storage                                │
//! │   open/close · save pipeline · filters · sorted pagination     │
//! │                                                                │
//! │   ┌──────────┐  ┌──────────┐  ┌─────────────────────────────┐  │
//! │   │  writer  │  │  reader  │  │ ProcessLock + <db>.changed  │  │
//! │   └──────────┘  └──────────┘  └─────────────────────────────┘  │
//! └───────────────────────────┬────────────────────────────────────┘
//!                             │
//!                      ┌──────▼──────┐
//!                      │   SQLite    │
//!                      └─────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - `(uid, recurrence id)` is the natural key of a stored incidence;
//!   inserting collapses any tombstone with the same key.
//! - Every mutation bumps the `Metadata` transaction id and truncates the
//!   `<db>.changed` ping file; peers compare ids to tell real changes
//!   from spurious pings.
//! - Soft-deleted incidences stay visible to sync consumers until purged
//!   explicitly or with their notebook.
//! - Sorted listings never split an equal-anchor run across pages.
//!
//! ## Modules
//!
//! - [`error`]: the crate-wide error enum
//! - [`codec`]: origin-time date-time codec and on-disk sentinels
//! - [`types`]: the calendar domain model and filter taxonomy
//! - [`schema`]: DDL and statement templates
//! - [`writer`] / [`reader`]: row codec, save and load sides
//! - [`lock`]: cross-process mutex and change-ping file
//! - [`storage`]: the synchronous session
//! - [`actor`]: the threaded asynchronous façade

pub mod actor;
pub mod codec;
pub mod error;
pub mod lock;
pub mod reader;
pub mod schema;
pub mod storage;
pub mod types;
pub mod writer;

pub use actor::{ObserverEvent, StorageActor};
pub use codec::{CalDateTime, FLOATING_DATE, INVALID_LATLON};
pub use error::{Error, Result};
pub use schema::Database;
pub use storage::{default_database_path, Storage, StorageConfig, StorageObserver};
pub use types::{
    notebook_flags, Alarm, AlarmAction, AlarmTrigger, Attachment, AttachmentData, Attendee,
    AttendeeRole, DbOperation, DeleteAction, EventFields, Filter, Frequency, GeoPoint, Incidence,
    IncidenceData, IncidenceStatus, Notebook, NotebookIncidences, PartStat, Person, Recurrence,
    RecurrenceRule, Secrecy, SortedFilter, TodoFields, Transparency, WeekdayPos,
};
