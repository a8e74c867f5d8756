///
/// Prepared statements.
///
/// A `Statement` owns one compiled statement handle. All work on it is done
/// by jobs on the engine thread; the handle itself never leaves the bridge.
///
/// Stepping yields rows until the engine reports DONE, then resets the
/// statement so it can run again. An error also resets it. Finalizing twice
/// is a lifecycle error; a statement dropped without `finalize` is finalized
/// in the background.
///

use std::ffi::{c_char, c_int};
use std::ptr::NonNull;
use std::sync::Arc;

use rusqlite::ffi;
use tracing::debug;

use crate::arena::{self, Region, POINTER_SLOT};
use crate::bindings::Bindings;
use crate::codes::{SQLITE_DONE, SQLITE_ROW};
use crate::conn::DbPtr;
use crate::engine::Engine;
use crate::error::{check, Error, Result};
use crate::row::{self, Row};
use crate::value::{self, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StmtPtr(NonNull<ffi::sqlite3_stmt>);

unsafe impl Send for StmtPtr {}
unsafe impl Sync for StmtPtr {}

impl StmtPtr {
    pub(crate) fn as_ptr(self) -> *mut ffi::sqlite3_stmt {
        self.0.as_ptr()
    }
}

/// Outcome of compiling the leading statement of some SQL text.
pub(crate) struct Prepared {
    /// `None` when the text held only whitespace or comments.
    pub stmt: Option<StmtPtr>,
    /// Bytes of the text the engine consumed.
    pub consumed: usize,
    pub parameters: Vec<Option<String>>,
}

/// Compiles the first statement of `len` bytes at `sql`.
///
/// # Safety
/// Engine thread only; `db` must be open and `sql` valid for `len` bytes.
pub(crate) unsafe fn prepare(db: DbPtr, sql: *const c_char, len: usize) -> Result<Prepared> {
    arena::borrow(&[POINTER_SLOT, POINTER_SLOT], |mem| unsafe {
        let stmt_out = mem.ptr::<*mut ffi::sqlite3_stmt>(0);
        let tail_out = mem.ptr::<*const c_char>(1);
        let rc = ffi::sqlite3_prepare_v2(db.as_ptr(), sql, len as c_int, stmt_out, tail_out);
        check(rc, db.as_ptr())?;

        let tail = *tail_out;
        let consumed = if tail.is_null() {
            len
        } else {
            (tail as usize).saturating_sub(sql as usize).min(len)
        };
        let stmt = NonNull::new(*stmt_out).map(StmtPtr);
        let parameters = match stmt {
            Some(stmt) => parameter_names(stmt),
            None => Vec::new(),
        };
        Ok(Prepared {
            stmt,
            consumed,
            parameters,
        })
    })
}

unsafe fn parameter_names(stmt: StmtPtr) -> Vec<Option<String>> {
    let count = unsafe { ffi::sqlite3_bind_parameter_count(stmt.as_ptr()) };
    (1..=count)
        .map(|i| {
            let name = unsafe { ffi::sqlite3_bind_parameter_name(stmt.as_ptr(), i) };
            (!name.is_null()).then(|| unsafe { arena::decode_cstring(name, None) })
        })
        .collect()
}

pub struct Statement {
    engine: &'static Engine,
    db: DbPtr,
    raw: Option<StmtPtr>,
    parameters: Vec<Option<String>>,
    bind_cursor: c_int,
    columns: Option<Arc<[String]>>,
}

impl Statement {
    pub(crate) fn new(engine: &'static Engine, db: DbPtr, prepared: Prepared) -> Option<Self> {
        prepared.stmt.map(|raw| Self {
            engine,
            db,
            raw: Some(raw),
            parameters: prepared.parameters,
            bind_cursor: 1,
            columns: None,
        })
    }

    fn raw(&self) -> Result<StmtPtr> {
        self.raw.ok_or(Error::Lifecycle("statement has been finalized"))
    }

    pub fn is_finalized(&self) -> bool {
        self.raw.is_none()
    }

    /// Releases the statement handle. Fails if it was already released.
    pub async fn finalize(&mut self) -> Result<()> {
        let raw = self.raw.take().ok_or(Error::Lifecycle("statement has already been finalized"))?;
        let db = self.db;
        self.engine
            .call(move || unsafe {
                let rc = ffi::sqlite3_finalize(raw.as_ptr());
                check(rc, db.as_ptr()).map(|_| ())
            })
            .await?
    }

    /// Clears every binding and rewinds the positional cursor.
    pub async fn clear(&mut self) -> Result<&mut Self> {
        let raw = self.raw()?;
        let db = self.db;
        self.engine
            .call(move || unsafe { check(ffi::sqlite3_clear_bindings(raw.as_ptr()), db.as_ptr()) })
            .await??;
        self.bind_cursor = 1;
        Ok(self)
    }

    /// Binds one value, by name when given, otherwise at the next
    /// positional index.
    pub async fn bind(&mut self, value: impl Into<Value>, name: Option<&str>) -> Result<&mut Self> {
        let raw = self.raw()?;
        let db = self.db;
        let value = value.into();
        let position = match name {
            Some(_) => None,
            None => {
                let index = self.bind_cursor;
                self.bind_cursor += 1;
                Some(index)
            }
        };
        let name = name.map(str::to_string);
        self.engine
            .call(move || unsafe {
                let index = match (position, name) {
                    (Some(index), _) => index,
                    (None, Some(name)) => arena::borrow(&[Region::Str(&name)], |mem| {
                        Ok(ffi::sqlite3_bind_parameter_index(raw.as_ptr(), mem.c_str(0)))
                    })?,
                    (None, None) => 0,
                };
                let rc = value::bind(raw.as_ptr(), index, &value)?;
                check(rc, db.as_ptr()).map(|_| ())
            })
            .await??;
        Ok(self)
    }

    /// Binds every parameter of the statement from `bindings`: named
    /// placeholders by name, the rest positionally.
    pub async fn bind_all(&mut self, bindings: &mut Bindings) -> Result<&mut Self> {
        let raw = self.raw()?;
        let db = self.db;
        let values: Vec<(c_int, Value)> = self
            .parameters
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = match name {
                    Some(name) => bindings.claim_named(name),
                    None => bindings.claim_anon(),
                };
                (i as c_int + 1, value)
            })
            .collect();
        if values.is_empty() {
            return Ok(self);
        }
        self.engine
            .call(move || unsafe {
                for (index, value) in &values {
                    let rc = value::bind(raw.as_ptr(), *index, value)?;
                    check(rc, db.as_ptr())?;
                }
                Ok::<(), Error>(())
            })
            .await??;
        Ok(self)
    }

    /// Advances one row. `None` means the statement ran to completion and
    /// has been reset.
    pub async fn step(&mut self) -> Result<Option<Row>> {
        let raw = self.raw()?;
        let db = self.db;
        let columns = self.columns.clone();
        let row = self
            .engine
            .call(move || unsafe {
                let rc = ffi::sqlite3_step(raw.as_ptr());
                match rc {
                    SQLITE_ROW => Ok(Some(row::read_row(raw.as_ptr(), columns))),
                    SQLITE_DONE => {
                        ffi::sqlite3_reset(raw.as_ptr());
                        Ok(None)
                    }
                    _ => {
                        let err = match check(rc, db.as_ptr()) {
                            Err(err) => err,
                            Ok(code) => Error::Protocol { code },
                        };
                        ffi::sqlite3_reset(raw.as_ptr());
                        Err(err)
                    }
                }
            })
            .await?;
        match row {
            Ok(Some(row)) => {
                self.columns = Some(row.shared_columns());
                Ok(Some(row))
            }
            Ok(None) => {
                self.columns = None;
                Ok(None)
            }
            Err(err) => {
                self.columns = None;
                Err(err)
            }
        }
    }

    pub async fn reset(&mut self) -> Result<()> {
        let raw = self.raw()?;
        let db = self.db;
        self.columns = None;
        self.engine
            .call(move || unsafe { check(ffi::sqlite3_reset(raw.as_ptr()), db.as_ptr()).map(|_| ()) })
            .await?
    }

    /// Cursor over the statement's rows.
    pub fn rows(&mut self) -> Rows<'_> {
        Rows {
            stmt: self,
            done: false,
        }
    }

    /// The SQL text the statement was compiled from.
    pub async fn sql(&self) -> Result<String> {
        let raw = self.raw()?;
        self.engine
            .call(move || unsafe { arena::decode_cstring(ffi::sqlite3_sql(raw.as_ptr()), None) })
            .await
    }

    pub async fn column_names(&self) -> Result<Vec<String>> {
        let raw = self.raw()?;
        let names = self
            .engine
            .call(move || unsafe { row::column_names(raw.as_ptr()) })
            .await?;
        Ok(names.to_vec())
    }

    /// Parameter names in index order; `None` for positional parameters.
    pub fn parameter_names(&self) -> &[Option<String>] {
        &self.parameters
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            debug!("statement dropped without finalize, finalizing in background");
            self.engine.post(move || unsafe {
                ffi::sqlite3_finalize(raw.as_ptr());
            });
        }
    }
}

/// Row cursor over one statement. Dropping it before the last row resets
/// the statement.
pub struct Rows<'s> {
    stmt: &'s mut Statement,
    done: bool,
}

impl Rows<'_> {
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        match self.stmt.step().await {
            Ok(Some(row)) => Ok(Some(row)),
            other => {
                self.done = true;
                other
            }
        }
    }

    pub async fn all(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Drop for Rows<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(raw) = self.stmt.raw {
            debug!("row cursor dropped early, resetting statement");
            self.stmt.columns = None;
            self.stmt.engine.post(move || unsafe {
                ffi::sqlite3_reset(raw.as_ptr());
            });
        }
    }
}
