//!
//! Online backup.
//!
//! `Backup` copies one attached database of a source connection into a
//! destination, a few pages per step, reporting progress after every step.
//! The destination is either a caller's connection or parameters the
//! backup opens (and later closes) itself.
//!
//! Cleanup always finishes the engine's backup handle. It runs when the
//! sequence ends, fails, or is dropped part way.
//!

use std::ffi::c_int;
use std::ptr::NonNull;

use async_trait::async_trait;
use rusqlite::ffi;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arena::{self, Region};
use crate::codes::{SQLITE_DONE, SQLITE_OK};
use crate::conn::{Conn, DbPtr, OpenParams};
use crate::engine::Engine;
use crate::error::{check, engine_error, Error, Result};
use crate::query::SqlCommand;

#[derive(Debug, Clone, Copy)]
struct BackupPtr(NonNull<ffi::sqlite3_backup>);

unsafe impl Send for BackupPtr {}
unsafe impl Sync for BackupPtr {}

impl BackupPtr {
    fn as_ptr(self) -> *mut ffi::sqlite3_backup {
        self.0.as_ptr()
    }
}

pub enum BackupTarget<'a> {
    Conn(&'a mut Conn),
    Params(OpenParams),
}

impl<'a> From<&'a mut Conn> for BackupTarget<'a> {
    fn from(conn: &'a mut Conn) -> Self {
        BackupTarget::Conn(conn)
    }
}

impl From<OpenParams> for BackupTarget<'_> {
    fn from(params: OpenParams) -> Self {
        BackupTarget::Params(params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupOptions {
    pub src_db: String,
    pub dest_db: String,
    pub pages_per_step: i32,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            src_db: "main".to_string(),
            dest_db: "main".to_string(),
            pages_per_step: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupProgress {
    pub remaining_pages: i32,
    pub total_pages: i32,
}

enum Dest<'a> {
    Borrowed(&'a mut Conn),
    Owned(Conn),
}

impl Dest<'_> {
    fn conn(&mut self) -> &mut Conn {
        match self {
            Dest::Borrowed(conn) => conn,
            Dest::Owned(conn) => conn,
        }
    }
}

/// Lazy sequence of backup progress records.
pub struct Backup<'a> {
    engine: &'static Engine,
    source: Option<DbPtr>,
    target: Option<BackupTarget<'a>>,
    options: BackupOptions,
    dest: Option<Dest<'a>>,
    dest_db: Option<DbPtr>,
    handle: Option<BackupPtr>,
    done: bool,
}

impl<'a> Backup<'a> {
    pub(crate) fn new(source: &'a Conn, target: BackupTarget<'a>, options: BackupOptions) -> Self {
        Self {
            engine: source.engine(),
            source: source.db().ok(),
            target: Some(target),
            options,
            dest: None,
            dest_db: None,
            handle: None,
            done: false,
        }
    }

    /// Copies the next batch of pages. `None` once the copy is complete.
    pub async fn next(&mut self) -> Result<Option<BackupProgress>> {
        if self.done {
            return Ok(None);
        }
        match self.advance().await {
            Ok(Some(progress)) => Ok(Some(progress)),
            Ok(None) => {
                self.cleanup().await;
                Ok(None)
            }
            Err(err) => {
                self.cleanup().await;
                Err(err)
            }
        }
    }

    /// Runs the backup to completion, returning the last progress record.
    pub async fn run(mut self) -> Result<Option<BackupProgress>> {
        let mut last = None;
        while let Some(progress) = self.next().await? {
            last = Some(progress);
        }
        Ok(last)
    }

    async fn advance(&mut self) -> Result<Option<BackupProgress>> {
        let handle = match self.handle {
            Some(handle) => handle,
            None if self.target.is_some() => self.start().await?,
            // The last step reported completion.
            None => return Ok(None),
        };

        let pages = self.options.pages_per_step as c_int;
        let (rc, remaining, total) = self
            .engine
            .call(move || unsafe {
                let raw = handle.as_ptr();
                let rc = ffi::sqlite3_backup_step(raw, pages);
                (rc, ffi::sqlite3_backup_remaining(raw), ffi::sqlite3_backup_pagecount(raw))
            })
            .await?;

        match rc {
            SQLITE_OK => {}
            SQLITE_DONE => self.finish_handle().await?,
            _ => return Err(self.step_error(rc).await),
        }

        let progress = BackupProgress {
            remaining_pages: remaining,
            total_pages: total,
        };
        debug!(remaining = remaining, total = total, "backup step");
        Ok(Some(progress))
    }

    async fn start(&mut self) -> Result<BackupPtr> {
        let source = self
            .source
            .ok_or(Error::Lifecycle("backup source connection is not open"))?;
        let mut dest = match self.target.take() {
            Some(BackupTarget::Conn(conn)) => Dest::Borrowed(conn),
            Some(BackupTarget::Params(params)) => Dest::Owned(Conn::connect(params).await?),
            None => return Err(Error::Lifecycle("backup has already started")),
        };
        let dest_db = dest.conn().ensure_open().await;
        self.dest = Some(dest);
        let dest_db = dest_db?;
        self.dest_db = Some(dest_db);

        let src_name = self.options.src_db.clone();
        let dest_name = self.options.dest_db.clone();
        let handle = self
            .engine
            .call(move || {
                arena::borrow(&[Region::Str(&dest_name), Region::Str(&src_name)], |mem| unsafe {
                    let raw = ffi::sqlite3_backup_init(
                        dest_db.as_ptr(),
                        mem.c_str(0),
                        source.as_ptr(),
                        mem.c_str(1),
                    );
                    match NonNull::new(raw) {
                        Some(raw) => Ok(BackupPtr(raw)),
                        None => Err(engine_error(ffi::sqlite3_errcode(dest_db.as_ptr()), dest_db.as_ptr())),
                    }
                })
            })
            .await??;
        debug!(
            src_db = %self.options.src_db,
            dest_db = %self.options.dest_db,
            "backup started"
        );
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Step failures are recorded on the destination connection.
    async fn step_error(&self, rc: c_int) -> Error {
        let Some(db) = self.dest_db else {
            return Error::Protocol { code: rc };
        };
        match self.engine.call(move || unsafe { engine_error(rc, db.as_ptr()) }).await {
            Ok(err) | Err(err) => err,
        }
    }

    async fn finish_handle(&mut self) -> Result<()> {
        let (Some(handle), Some(db)) = (self.handle.take(), self.dest_db) else {
            return Ok(());
        };
        self.engine
            .call(move || unsafe {
                let rc = ffi::sqlite3_backup_finish(handle.as_ptr());
                check(rc, db.as_ptr()).map(|_| ())
            })
            .await?
    }

    async fn cleanup(&mut self) {
        self.done = true;
        self.target = None;
        let _ = self.finish_handle().await;
        if let Some(Dest::Owned(mut conn)) = self.dest.take() {
            conn.close();
        }
    }
}

impl Drop for Backup<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("backup dropped before completion, finishing in background");
            self.engine.post(move || unsafe {
                ffi::sqlite3_backup_finish(handle.as_ptr());
            });
        }
    }
}

/// A query command that backs up the connection it runs on into `dest`.
pub struct BackupCommand {
    dest: OpenParams,
    options: BackupOptions,
}

pub fn backup(dest: OpenParams, options: BackupOptions) -> BackupCommand {
    BackupCommand { dest, options }
}

#[async_trait]
impl SqlCommand for BackupCommand {
    async fn execute(&self, conn: &mut Conn) -> Result<()> {
        conn.ensure_open().await?;
        let mut backup = conn.backup(BackupTarget::Params(self.dest.clone()), self.options.clone());
        while let Some(progress) = backup.next().await? {
            info!(
                remaining = progress.remaining_pages,
                total = progress.total_pages,
                "backup"
            );
        }
        Ok(())
    }
}
