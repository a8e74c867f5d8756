///
/// Error types for the bridge.
///
/// Host-facing failures are `Error`. Every variant maps onto one of a small
/// set of kinds so callers can branch without matching on messages, and
/// engine-originated failures keep the engine's result code.
///

use std::ffi::c_int;

use rusqlite::ffi;
use thiserror::Error;

use crate::arena;
use crate::codes::{SQLITE_DONE, SQLITE_OK, SQLITE_ROW};

/// Coarse classification of an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The engine arena could not satisfy an allocation.
    OutOfMemory,
    /// The engine returned a failure result code.
    Engine,
    /// The engine returned a code that is invalid at that point of the protocol.
    Protocol,
    /// An operation was attempted on a finalized statement, closed connection,
    /// or similar.
    Lifecycle,
    /// The engine thread could not run a job.
    Worker,
    /// Storage backend registration conflicts.
    Registration,
    Config,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("out of memory: engine arena could not supply {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("SQLite Error({code}): {message}")]
    Engine { code: i32, message: String },

    #[error("unexpected engine result code {code}, expected ROW or DONE")]
    Protocol { code: i32 },

    #[error("{0}")]
    Lifecycle(&'static str),

    #[error("engine worker failed: {0}")]
    Worker(String),

    #[error("a storage backend named '{name}' is already registered")]
    VfsExists { name: String },

    #[error("no storage backend named '{name}' is registered")]
    VfsNotFound { name: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The engine result code carried by this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Engine { code, .. } | Error::Protocol { code } => Some(*code),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Error::Engine { .. } => ErrorKind::Engine,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::Lifecycle(_) => ErrorKind::Lifecycle,
            Error::Worker(_) => ErrorKind::Worker,
            Error::VfsExists { .. } | Error::VfsNotFound { .. } => ErrorKind::Registration,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Passes `OK`, `ROW` and `DONE` through and turns every other result code
/// into `Error::Engine`, taking the message from `db` when there is one.
///
/// # Safety
/// `db` must be null or a live connection handle.
pub(crate) unsafe fn check(rc: c_int, db: *mut ffi::sqlite3) -> Result<c_int> {
    match rc {
        SQLITE_OK | SQLITE_ROW | SQLITE_DONE => Ok(rc),
        _ => Err(unsafe { engine_error(rc, db) }),
    }
}

/// # Safety
/// `db` must be null or a live connection handle.
pub(crate) unsafe fn engine_error(rc: c_int, db: *mut ffi::sqlite3) -> Error {
    let message = unsafe {
        if db.is_null() {
            arena::decode_cstring(ffi::sqlite3_errstr(rc), None)
        } else {
            arena::decode_cstring(ffi::sqlite3_errmsg(db), None)
        }
    };
    Error::Engine { code: rc, message }
}
