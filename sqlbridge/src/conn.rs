//!
//! Database connections.
//!
//! A `Conn` wraps at most one open engine connection handle. Opening a new
//! database replaces the handle only once the new open has succeeded, and a
//! failed open releases whatever partial handle the engine produced.
//! Closing is idempotent and queued behind any work already submitted.
//!
//! Queries against a closed connection reopen it with the configured
//! `default_open` parameters first.
//!

use std::ffi::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::ffi;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::arena::{self, Region, POINTER_SLOT};
use crate::backup::{Backup, BackupOptions, BackupTarget};
use crate::codes::{OpenFlags, SQLITE_FCNTL_FILE_POINTER, SQLITE_FCNTL_VFS_POINTER, SQLITE_OK};
use crate::engine::{self, Engine};
use crate::error::{check, Error, Result};
use crate::handles::Handle;
use crate::query::{Query, QueryRows, SqlCommand, Statements};
use crate::statement::{self, Statement};
use crate::vfs::{adapter, Vfs, VfsFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DbPtr(NonNull<ffi::sqlite3>);

unsafe impl Send for DbPtr {}
unsafe impl Sync for DbPtr {}

impl DbPtr {
    pub(crate) fn as_ptr(self) -> *mut ffi::sqlite3 {
        self.0.as_ptr()
    }
}

/// What to open: a pathname (or `file:` URI), open flags, and optionally the
/// name of a registered storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenParams {
    pub pathname: String,
    pub flags: OpenFlags,
    /// Backend name; empty selects the engine default.
    pub vfs: String,
}

impl Default for OpenParams {
    fn default() -> Self {
        Self {
            pathname: ":memory:".to_string(),
            flags: OpenFlags::default_open(),
            vfs: String::new(),
        }
    }
}

impl OpenParams {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            ..Self::default()
        }
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn vfs(mut self, vfs: impl Into<String>) -> Self {
        self.vfs = vfs.into();
        self
    }
}

/// Used inside a query, reopens the connection the query runs on.
#[async_trait]
impl SqlCommand for OpenParams {
    async fn execute(&self, conn: &mut Conn) -> Result<()> {
        conn.open(self.clone()).await
    }
}

/// Opens a connection handle. Engine thread only.
fn open_handle(params: &OpenParams) -> Result<DbPtr> {
    let regions = [POINTER_SLOT, Region::Str(&params.pathname), Region::Str(&params.vfs)];
    arena::borrow(&regions, |mem| unsafe {
        let out = mem.ptr::<*mut ffi::sqlite3>(0);
        let vfs = if params.vfs.is_empty() {
            std::ptr::null()
        } else {
            mem.c_str(2)
        };
        let rc = ffi::sqlite3_open_v2(mem.c_str(1), out, params.flags.bits(), vfs);
        let db = *out;
        if let Err(err) = check(rc, db) {
            ffi::sqlite3_close_v2(db);
            return Err(err);
        }
        NonNull::new(db).map(DbPtr).ok_or(Error::Protocol { code: rc })
    })
}

/// Opens a connection and counts it against the registered backend it runs
/// on, if any. Engine thread only.
fn open_counted(params: &OpenParams) -> Result<(DbPtr, Option<Handle>)> {
    let db = open_handle(params)?;
    let vfs = unsafe { file_control_pointer::<ffi::sqlite3_vfs>(db, "main", SQLITE_FCNTL_VFS_POINTER) };
    match vfs {
        Ok(vfs) => Ok((db, vfs.and_then(adapter::acquire_connection))),
        Err(err) => {
            unsafe { ffi::sqlite3_close_v2(db.as_ptr()) };
            Err(err)
        }
    }
}

/// Interrupts whatever the connection is running, from any thread.
#[derive(Clone)]
pub struct InterruptHandle {
    db: Arc<Mutex<Option<DbPtr>>>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(db) = *db {
            unsafe { ffi::sqlite3_interrupt(db.as_ptr()) };
        }
    }
}

pub struct Conn {
    engine: &'static Engine,
    db: Option<DbPtr>,
    /// Registered backend the open handle runs on.
    backend: Option<Handle>,
    params: Option<OpenParams>,
    interrupt: Arc<Mutex<Option<DbPtr>>>,
}

impl Conn {
    /// A closed connection.
    pub fn new() -> Result<Self> {
        Ok(Self {
            engine: engine::engine()?,
            db: None,
            backend: None,
            params: None,
            interrupt: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn connect(params: OpenParams) -> Result<Self> {
        let mut conn = Self::new()?;
        conn.open(params).await?;
        Ok(conn)
    }

    /// Opens `params`, replacing the current database only on success.
    pub async fn open(&mut self, params: OpenParams) -> Result<()> {
        let request = params.clone();
        let (db, backend) = self.engine.call(move || open_counted(&request)).await??;
        self.close();
        debug!(pathname = %params.pathname, vfs = %params.vfs, "connection opened");
        self.db = Some(db);
        self.backend = backend;
        *self.interrupt.lock().unwrap_or_else(|e| e.into_inner()) = Some(db);
        self.params = Some(params);
        Ok(())
    }

    /// Closes the connection. Does nothing when already closed.
    pub fn close(&mut self) {
        let Some(db) = self.db.take() else {
            return;
        };
        *self.interrupt.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.params = None;
        let backend = self.backend.take();
        debug!("connection closed");
        self.engine.post(move || {
            let rc = unsafe { ffi::sqlite3_close_v2(db.as_ptr()) };
            if rc != SQLITE_OK {
                warn!(code = rc, "closing connection failed");
            }
            if let Some(backend) = backend {
                adapter::release_connection(backend);
            }
        });
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    /// Parameters of the currently open database.
    pub fn params(&self) -> Option<&OpenParams> {
        self.params.as_ref()
    }

    pub(crate) fn engine(&self) -> &'static Engine {
        self.engine
    }

    pub(crate) fn db(&self) -> Result<DbPtr> {
        self.db.ok_or(Error::Lifecycle("connection is not open"))
    }

    /// Reopens with the configured defaults when closed.
    pub(crate) async fn ensure_open(&mut self) -> Result<DbPtr> {
        if let Some(db) = self.db {
            return Ok(db);
        }
        let params = self.engine.config().default_open.clone();
        debug!(pathname = %params.pathname, "reopening closed connection with defaults");
        self.open(params).await?;
        self.db()
    }

    /// Compiles the first statement of `sql`, ignoring anything after it.
    /// `None` when `sql` holds no statement.
    pub async fn prepare(&mut self, sql: &str) -> Result<Option<Statement>> {
        let db = self.ensure_open().await?;
        let text = arena::encode_cstring(sql)?;
        let prepared = self
            .engine
            .call(move || unsafe { statement::prepare(db, text.as_c_ptr(), text.len()) })
            .await??;
        Ok(Statement::new(self.engine, db, prepared))
    }

    /// Prepares each statement of `query` in turn, with its arguments bound.
    pub fn stmts(&mut self, query: impl Into<Query>) -> Statements<'_> {
        Statements::new(self, query.into().plan())
    }

    /// Runs `query` and yields the rows of every statement in it.
    pub fn sql(&mut self, query: impl Into<Query>) -> QueryRows<'_> {
        QueryRows::new(self.stmts(query))
    }

    /// Copies database `options.src_db` of this connection into `target`.
    pub fn backup<'a>(&'a self, target: BackupTarget<'a>, options: BackupOptions) -> Backup<'a> {
        Backup::new(self, target, options)
    }

    pub fn interrupt(&self) {
        if let Some(db) = self.db {
            unsafe { ffi::sqlite3_interrupt(db.as_ptr()) };
        }
    }

    /// A handle that can interrupt this connection while a query holds it.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            db: Arc::clone(&self.interrupt),
        }
    }

    pub async fn interrupted(&self) -> Result<bool> {
        let Some(db) = self.db else {
            return Ok(false);
        };
        self.engine
            .call(move || unsafe { ffi::sqlite3_is_interrupted(db.as_ptr()) != 0 })
            .await
    }

    /// Whether the connection is outside an explicit transaction.
    pub async fn autocommit(&self) -> Result<bool> {
        let Some(db) = self.db else {
            return Ok(true);
        };
        self.engine
            .call(move || unsafe { ffi::sqlite3_get_autocommit(db.as_ptr()) != 0 })
            .await
    }

    /// Filename backing attached database `db_name`; `":memory:"` for
    /// in-memory and temporary databases.
    pub async fn filename(&self, db_name: &str) -> Result<Option<String>> {
        let Some(db) = self.db else {
            return Ok(None);
        };
        let db_name = db_name.to_string();
        self.engine
            .call(move || {
                arena::borrow(&[Region::Str(&db_name)], |mem| unsafe {
                    let name = ffi::sqlite3_db_filename(db.as_ptr(), mem.c_str(0));
                    if name.is_null() {
                        return Ok(None);
                    }
                    let name = arena::decode_cstring(name, None);
                    Ok(Some(if name.is_empty() { ":memory:".to_string() } else { name }))
                })
            })
            .await?
    }

    /// Name of the storage backend serving attached database `db_name`.
    pub async fn vfsname(&self, db_name: &str) -> Result<Option<String>> {
        let Some(db) = self.db else {
            return Ok(None);
        };
        let db_name = db_name.to_string();
        self.engine
            .call(move || unsafe {
                let vfs = file_control_pointer::<ffi::sqlite3_vfs>(db, &db_name, SQLITE_FCNTL_VFS_POINTER)?;
                Ok::<_, Error>(vfs.map(|vfs| arena::decode_cstring((*vfs).zName, None)))
            })
            .await?
    }

    /// The host backend serving attached database `db_name`, if it is a
    /// registered one.
    pub async fn vfs(&self, db_name: &str) -> Result<Option<Arc<dyn Vfs>>> {
        let Some(db) = self.db else {
            return Ok(None);
        };
        let db_name = db_name.to_string();
        self.engine
            .call(move || unsafe {
                let vfs = file_control_pointer::<ffi::sqlite3_vfs>(db, &db_name, SQLITE_FCNTL_VFS_POINTER)?;
                Ok::<_, Error>(vfs.and_then(adapter::vfs_for_raw))
            })
            .await?
    }

    /// The host file backing attached database `db_name`, if a registered
    /// backend opened it.
    pub async fn file(&self, db_name: &str) -> Result<Option<Arc<dyn VfsFile>>> {
        let Some(db) = self.db else {
            return Ok(None);
        };
        let db_name = db_name.to_string();
        self.engine
            .call(move || unsafe {
                let file = file_control_pointer::<ffi::sqlite3_file>(db, &db_name, SQLITE_FCNTL_FILE_POINTER)?;
                Ok::<_, Error>(file.and_then(|file| adapter::file_for_raw(file)))
            })
            .await?
    }

    /// Schema names of every attached database, `main` first.
    pub async fn dbnames(&self) -> Result<Option<Vec<String>>> {
        let Some(db) = self.db else {
            return Ok(None);
        };
        self.engine
            .call(move || {
                let mut names = Vec::new();
                for i in 0.. {
                    let name = unsafe { ffi::sqlite3_db_name(db.as_ptr(), i) };
                    if name.is_null() {
                        break;
                    }
                    names.push(unsafe { arena::decode_cstring(name, None) });
                }
                Some(names)
            })
            .await
    }
}

/// Reads a pointer-valued file control. Engine thread only.
unsafe fn file_control_pointer<T>(db: DbPtr, db_name: &str, op: c_int) -> Result<Option<*mut T>> {
    arena::borrow(&[POINTER_SLOT, Region::Str(db_name)], |mem| unsafe {
        let out = mem.ptr::<*mut T>(0);
        let rc = ffi::sqlite3_file_control(db.as_ptr(), mem.c_str(1), op, out as *mut c_void);
        check(rc, db.as_ptr())?;
        let value = *out;
        Ok((!value.is_null()).then_some(value))
    })
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.close();
    }
}
