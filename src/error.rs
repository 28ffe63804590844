//! # Error Handling
//!
//! This module defines the error types used throughout the engine. A
//! single error enum ([`Error`]) represents every failure mode, which
//! keeps error handling simple for library users.
//!
//! ## Rust Pattern: thiserror
//!
//! The `thiserror` crate derives the `std::error::Error` plumbing:
//! - `Display` implementations from the `#[error(...)]` attributes
//! - `From` implementations from the `#[from]` attributes
//! - Source chaining for wrapped errors
//!
//! ## Why a Single Error Type?
//!
//! Libraries commonly choose between:
//! 1. **Single enum** (our choice): easy to match on, simple signatures
//! 2. **Separate error types per module**: more precise, but verbose
//!
//! A single enum works well here because most operations fail in the same
//! few ways (lock trouble, SQLite errors) and callers typically handle
//! them uniformly: log and report the operation as failed.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Lock | peer holds the cross-process mutex | retry the operation |
//! | Internal | SQLite error, schema failure | log and investigate |
//! | Not found | update of a never-stored incidence | fix the caller's state |
//! | Lifecycle | operation on a closed session | open first |
//!
//! Row-level trouble during a batch save is deliberately *not* represented
//! here: bad rows are skipped with a warning and reflected in the boolean
//! result of the batch (best-effort contract). `Error` is reserved for
//! failures that abort an operation outright.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in storage operations.
///
/// # Example
///
/// ```rust,ignore
/// use caldb::{Error, Result};
///
/// fn example() -> Result<()> {
///     // Errors can be created directly
///     let err = Error::NotFound {
///         uid: "evt-1".to_string(),
///         recurrence_id: 0,
///     };
///
///     // Or propagated with ?
///     some_operation()?;
///
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The cross-process lock could not be acquired or released.
    ///
    /// # When This Happens
    ///
    /// The advisory lock next to the database file could not be created
    /// or taken: the directory is unwritable, the file descriptor limit
    /// is hit, or the I/O layer failed outright. Contention with a peer
    /// process is *not* an error - acquisition blocks until the peer
    /// releases.
    ///
    /// # Recovery
    ///
    /// Nothing has been read or written when this is returned; the
    /// operation can simply be retried.
    #[error("cannot lock database '{path}': {reason}")]
    Lock {
        /// Database path the lock belongs to
        path: String,
        /// Underlying I/O failure
        reason: String,
    },

    /// SQLite operation failed.
    ///
    /// # When This Happens
    ///
    /// This wraps any error from the `rusqlite` crate:
    /// - The database file is locked beyond the busy timeout
    /// - The disk is full
    /// - The database file is corrupted
    /// - A statement is malformed (indicates a bug in this crate)
    ///
    /// # Rust Pattern: #[from]
    ///
    /// The `#[from]` attribute generates:
    /// ```rust,ignore
    /// impl From<rusqlite::Error> for Error {
    ///     fn from(err: rusqlite::Error) -> Self {
    ///         Error::Sqlite(err)
    ///     }
    /// }
    /// ```
    /// which lets the `?` operator convert rusqlite errors automatically.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The schema could not be applied or verified during open.
    ///
    /// # When This Happens
    ///
    /// - The file exists but is not a SQLite database
    /// - A DDL statement failed to apply
    /// - The session is opened twice
    ///
    /// # Recovery
    ///
    /// Fatal for the session; the handle is closed and the open fails.
    /// May require removing or restoring the database file.
    #[error("schema error: {0}")]
    Schema(String),

    /// No live row matches the incidence identity.
    ///
    /// # When This Happens
    ///
    /// An update, mark-deleted or delete could not resolve the
    /// `(uid, recurrence id)` pair to a component row: the incidence was
    /// never stored, was already purged, or only exists as a tombstone.
    ///
    /// # Recovery
    ///
    /// Within a batch this is a per-row failure: the row is skipped with
    /// a warning and the batch reports `false`. Callers holding stale
    /// state should reload.
    #[error("no stored incidence with uid '{uid}' and recurrence id {recurrence_id}")]
    NotFound {
        /// Incidence uid
        uid: String,
        /// Encoded recurrence-id seconds (0 when absent)
        recurrence_id: i64,
    },

    /// Stored data could not be interpreted.
    ///
    /// # When This Happens
    ///
    /// A row violates the format's own rules - for example an attachment
    /// carrying neither data nor a URI, or a named notebook that does not
    /// exist. During loads the offending row is skipped with a warning
    /// instead; this variant surfaces only where skipping is impossible.
    #[error("inconsistent data: {0}")]
    Inconsistency(String),

    /// The session (or the façade worker) has already been closed.
    ///
    /// # When This Happens
    ///
    /// - A method is called after `close()`
    /// - A façade command is enqueued after the worker shut down
    ///
    /// # Recovery
    ///
    /// Open a new session; closed sessions stay closed.
    #[error("storage is closed")]
    Closed,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` alias using [`Error`].
///
/// # Rust Pattern: Type Aliases
///
/// Defining `type Result<T> = std::result::Result<T, Error>` means
/// functions return `Result<Foo>` instead of `Result<Foo, Error>`: less
/// typing, clearer intent, and the standard shape for library crates.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages appear in logs; make sure they carry the identifiers
    /// needed to find the offending row.
    #[test]
    fn error_display() {
        let err = Error::NotFound {
            uid: "evt-1".to_string(),
            recurrence_id: 0,
        };
        assert_eq!(
            err.to_string(),
            "no stored incidence with uid 'evt-1' and recurrence id 0"
        );

        let err = Error::Lock {
            path: "/tmp/cal/db".to_string(),
            reason: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/cal/db"));
    }

    /// The `#[from]` attribute on `Error::Sqlite` lets `?` convert
    /// rusqlite errors into ours.
    #[test]
    fn sqlite_error_converts() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("x".to_string());
        let err: Error = sqlite_err.into();
        assert!(matches!(err, Error::Sqlite(_)));
        assert!(err.to_string().contains("sqlite error"));
    }
}
