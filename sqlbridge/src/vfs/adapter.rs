//!
//! Engine-facing side of the storage backends.
//!
//! Registers one `sqlite3_vfs` per backend and implements every callback of
//! the engine's VFS and file ABI. Callbacks run on the engine thread, resolve
//! the integer handle the engine passed back to a host object, and either call
//! it directly (cheap synchronous capabilities) or suspend the engine thread
//! until its future resolves.
//!
//! A callback never unwinds into the engine. Backend failures become engine
//! result codes and are queued on the handle-table entries they belong to, so
//! `xGetLastError` and `VfsRegistration::last_error` can report them. A
//! handle the tables do not know is a protocol violation and panics, which
//! aborts at the `extern "C"` boundary.
//!

use std::ffi::{c_char, c_int, c_void};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::ffi;
use tracing::{info, trace, warn};

use super::{Filename, Vfs, VfsError, VfsFile, VfsRegistration, VfsResult, FileControlArg};
use crate::arena::{self, ArenaBuf};
use crate::codes::*;
use crate::engine;
use crate::error::{engine_error, Error, Result};
use crate::handles::{Handle, HandleTable};

/// File struct the engine allocates `szOsFile` bytes for. The engine owns
/// `base`; the handle follows it.
#[repr(C)]
pub(crate) struct BridgeFile {
    base: ffi::sqlite3_file,
    handle: Handle,
}

struct VfsSlot {
    vfs: Arc<dyn Vfs>,
    name: String,
    raw: *mut ffi::sqlite3_vfs,
    _zname: ArenaBuf,
    /// Open connections whose engine handle points at `raw`.
    connections: usize,
}

unsafe impl Send for VfsSlot {}

struct FileSlot {
    file: Arc<dyn VfsFile>,
    backend: Handle,
    /// Stands in for a failed open. The engine does not always close these.
    placeholder: bool,
}

static VFS_TABLE: LazyLock<Mutex<HandleTable<VfsSlot>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));
static FILE_TABLE: LazyLock<Mutex<HandleTable<FileSlot>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));

fn vfs_table() -> MutexGuard<'static, HandleTable<VfsSlot>> {
    VFS_TABLE.lock().unwrap_or_else(|e| e.into_inner())
}

fn file_table() -> MutexGuard<'static, HandleTable<FileSlot>> {
    FILE_TABLE.lock().unwrap_or_else(|e| e.into_inner())
}

static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Registers `vfs` with the engine. Runs on the engine thread.
pub(crate) fn register(vfs: Arc<dyn Vfs>, make_default: bool) -> Result<VfsRegistration> {
    let name = vfs.name().to_string();
    let zname = arena::encode_cstring(&name)?;
    let taken = find_by_name(&name).is_some()
        || !unsafe { ffi::sqlite3_vfs_find(zname.as_c_ptr()) }.is_null();
    if taken {
        return Err(Error::VfsExists { name });
    }

    let raw = Box::into_raw(Box::new(ffi::sqlite3_vfs {
        iVersion: 2,
        szOsFile: std::mem::size_of::<BridgeFile>() as c_int,
        mxPathname: vfs.max_pathname(),
        pNext: ptr::null_mut(),
        zName: zname.as_c_ptr(),
        pAppData: ptr::null_mut(),
        xOpen: Some(x_open),
        xDelete: Some(x_delete),
        xAccess: Some(x_access),
        xFullPathname: Some(x_full_pathname),
        xDlOpen: None,
        xDlError: None,
        xDlSym: None,
        xDlClose: None,
        xRandomness: Some(x_randomness),
        xSleep: Some(x_sleep),
        xCurrentTime: None,
        xGetLastError: Some(x_get_last_error),
        xCurrentTimeInt64: Some(x_current_time_int64),
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    }));

    let handle = vfs_table().insert(VfsSlot {
        vfs,
        name: name.clone(),
        raw,
        _zname: zname,
        connections: 0,
    });
    unsafe { (*raw).pAppData = handle as usize as *mut c_void };

    let rc = unsafe { ffi::sqlite3_vfs_register(raw, make_default as c_int) };
    if rc != SQLITE_OK {
        vfs_table().remove(handle);
        drop(unsafe { Box::from_raw(raw) });
        return Err(unsafe { engine_error(rc, ptr::null_mut()) });
    }

    info!(name = %name, handle, make_default, "registered storage backend");
    Ok(VfsRegistration { name, handle })
}

/// Unregisters a backend. Runs on the engine thread.
pub(crate) fn unregister(handle: Handle) -> Result<()> {
    let in_use = vfs_table()
        .get(handle)
        .map(|entry| entry.value.connections)
        .ok_or_else(|| Error::VfsNotFound {
            name: format!("#{handle}"),
        })?;
    if in_use > 0 {
        return Err(Error::Lifecycle("storage backend still has open connections"));
    }
    {
        let mut files = file_table();
        let owned: Vec<(Handle, bool)> = files
            .iter()
            .filter(|(_, entry)| entry.value.backend == handle)
            .map(|(file, entry)| (file, entry.value.placeholder))
            .collect();
        if owned.iter().any(|(_, placeholder)| !placeholder) {
            return Err(Error::Lifecycle("storage backend still has open files"));
        }
        for (file, _) in owned {
            files.remove(file);
        }
    }
    let entry = vfs_table()
        .remove(handle)
        .ok_or_else(|| Error::VfsNotFound {
            name: format!("#{handle}"),
        })?;
    let raw = entry.value.raw;
    let rc = unsafe { ffi::sqlite3_vfs_unregister(raw) };
    if rc != SQLITE_OK {
        // The engine may still reference the struct; leak it.
        return Err(unsafe { engine_error(rc, ptr::null_mut()) });
    }
    drop(unsafe { Box::from_raw(raw) });
    info!(name = %entry.value.name, handle, "unregistered storage backend");
    Ok(())
}

/// Counts a connection opened through `raw`. Returns the backend handle
/// when `raw` is one of ours.
pub(crate) fn acquire_connection(raw: *mut ffi::sqlite3_vfs) -> Option<Handle> {
    let mut table = vfs_table();
    let handle = table
        .iter()
        .find(|(_, entry)| ptr::eq(entry.value.raw, raw))
        .map(|(handle, _)| handle)?;
    if let Some(entry) = table.get_mut(handle) {
        entry.value.connections += 1;
    }
    Some(handle)
}

pub(crate) fn release_connection(handle: Handle) {
    if let Some(entry) = vfs_table().get_mut(handle) {
        entry.value.connections = entry.value.connections.saturating_sub(1);
    }
}

pub(crate) fn find_by_name(name: &str) -> Option<Handle> {
    vfs_table()
        .iter()
        .find(|(_, entry)| entry.value.name == name)
        .map(|(handle, _)| handle)
}

pub(crate) fn last_vfs_error(handle: Handle) -> Option<VfsError> {
    vfs_table()
        .get(handle)
        .and_then(|entry| entry.pending.last().cloned())
}

pub(crate) fn vfs_object(handle: Handle) -> Option<Arc<dyn Vfs>> {
    vfs_table()
        .get(handle)
        .map(|entry| Arc::clone(&entry.value.vfs))
}

/// The host backend behind an engine VFS pointer, if it is one of ours.
pub(crate) fn vfs_for_raw(raw: *mut ffi::sqlite3_vfs) -> Option<Arc<dyn Vfs>> {
    vfs_table()
        .iter()
        .find(|(_, entry)| ptr::eq(entry.value.raw, raw))
        .map(|(_, entry)| Arc::clone(&entry.value.vfs))
}

/// The host file behind an engine file pointer, if one of our backends
/// opened it.
///
/// # Safety
/// `file` must be null or point to a live engine file struct.
pub(crate) unsafe fn file_for_raw(file: *mut ffi::sqlite3_file) -> Option<Arc<dyn VfsFile>> {
    if file.is_null() || !ptr::eq(unsafe { (*file).pMethods }, &IO_METHODS) {
        return None;
    }
    let handle = unsafe { file_handle(file) };
    file_table()
        .get(handle)
        .map(|entry| Arc::clone(&entry.value.file))
}

// ---------------------------------------------------------------------------
// Dispatch helpers
// ---------------------------------------------------------------------------

unsafe fn vfs_handle(vfs: *mut ffi::sqlite3_vfs) -> Handle {
    unsafe { (*vfs).pAppData as usize as Handle }
}

unsafe fn file_handle(file: *mut ffi::sqlite3_file) -> Handle {
    unsafe { (*(file as *mut BridgeFile)).handle }
}

/// Resolves a backend handle and marks it as reached by the current call.
fn backend(handle: Handle) -> Arc<dyn Vfs> {
    let epoch = engine::current_epoch();
    let mut table = vfs_table();
    match table.get_mut(handle) {
        Some(entry) => {
            entry.pending.touch(epoch);
            Arc::clone(&entry.value.vfs)
        }
        None => panic!("storage callback for unknown backend handle {handle}"),
    }
}

/// Resolves a file handle, marking the file and its backend as reached.
fn file(handle: Handle) -> (Arc<dyn VfsFile>, Handle) {
    let epoch = engine::current_epoch();
    let (file, owner) = {
        let mut table = file_table();
        match table.get_mut(handle) {
            Some(entry) => {
                entry.pending.touch(epoch);
                (Arc::clone(&entry.value.file), entry.value.backend)
            }
            None => panic!("storage callback for unknown file handle {handle}"),
        }
    };
    if let Some(entry) = vfs_table().get_mut(owner) {
        entry.pending.touch(epoch);
    }
    (file, owner)
}

fn insert_file(file: Arc<dyn VfsFile>, backend: Handle, placeholder: bool) -> Handle {
    file_table().insert(FileSlot {
        file,
        backend,
        placeholder,
    })
}

/// Logs and queues a backend failure, returning the code to hand the engine.
fn fail(
    op: &'static str,
    fallback: c_int,
    backend: Handle,
    file: Option<Handle>,
    error: VfsError,
) -> c_int {
    let code = error.code().unwrap_or(fallback);
    warn!(op, backend, file = file.unwrap_or(0), code, error = %error, "storage backend call failed");
    let epoch = engine::current_epoch();
    if let Some(handle) = file {
        if let Some(entry) = file_table().get_mut(handle) {
            entry.pending.push(epoch, error.clone());
        }
    }
    if let Some(entry) = vfs_table().get_mut(backend) {
        entry.pending.push(epoch, error);
    }
    code
}

/// Parks the engine thread until `fut` resolves on the io runtime.
fn suspend<T, F>(fut: F) -> VfsResult<T>
where
    F: Future<Output = VfsResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match engine::running() {
        Some(engine) => engine.suspend(fut).and_then(|result| result),
        None => Err(VfsError::new("engine is not running")),
    }
}

/// Runs a synchronous backend capability, turning a panic into an error.
fn guarded<T>(op: &'static str, f: impl FnOnce() -> VfsResult<T>) -> VfsResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        Err(VfsError::new(format!(
            "{op} panicked: {}",
            engine::panic_message(panic.as_ref())
        )))
    })
}

/// Stands in for a file whose open failed, so the engine's matching close
/// finds an entry.
struct PlaceholderFile;

#[async_trait]
impl VfsFile for PlaceholderFile {
    async fn close(&self) -> VfsResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VFS callbacks
// ---------------------------------------------------------------------------

unsafe extern "C" fn x_open(
    vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let imp = backend(owner);
    let filename = unsafe { Filename::from_raw(name) };
    trace!(vfs = owner, filename = %filename, flags, "xOpen");

    let open_flags = OpenFlags::from_bits(flags);
    let result = suspend(async move { imp.open(&filename, open_flags).await });

    let bridge = file as *mut BridgeFile;
    match result {
        Ok(opened) => {
            let reported = opened.flags();
            let handle = insert_file(opened, owner, false);
            unsafe {
                (*bridge).handle = handle;
                (*bridge).base.pMethods = &IO_METHODS;
                if !out_flags.is_null() {
                    *out_flags = reported;
                }
            }
            SQLITE_OK
        }
        Err(error) => {
            let handle = insert_file(Arc::new(PlaceholderFile), owner, true);
            unsafe {
                (*bridge).handle = handle;
                (*bridge).base.pMethods = &IO_METHODS;
            }
            fail("open", SQLITE_CANTOPEN, owner, Some(handle), error)
        }
    }
}

unsafe extern "C" fn x_delete(vfs: *mut ffi::sqlite3_vfs, name: *const c_char, sync_dir: c_int) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let imp = backend(owner);
    let name = unsafe { arena::decode_cstring(name, None) };
    trace!(vfs = owner, name = %name, sync_dir, "xDelete");
    match suspend(async move { imp.delete(&name, sync_dir != 0).await }) {
        Ok(()) => SQLITE_OK,
        Err(error) => fail("delete", SQLITE_IOERR_DELETE, owner, None, error),
    }
}

unsafe extern "C" fn x_access(
    vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    flags: c_int,
    out: *mut c_int,
) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let imp = backend(owner);
    let name = unsafe { arena::decode_cstring(name, None) };
    trace!(vfs = owner, name = %name, flags, "xAccess");
    match suspend(async move { imp.access(&name, flags).await }) {
        Ok(found) => {
            unsafe { *out = found as c_int };
            SQLITE_OK
        }
        Err(error) => fail("access", SQLITE_IOERR_ACCESS, owner, None, error),
    }
}

unsafe extern "C" fn x_full_pathname(
    vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    n_out: c_int,
    out: *mut c_char,
) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let imp = backend(owner);
    let name = unsafe { arena::decode_cstring(name, None) };
    trace!(vfs = owner, name = %name, n_out, "xFullPathname");

    let capacity = n_out.max(0) as usize;
    let result = guarded("full_pathname", || imp.full_pathname(&name)).and_then(|full| {
        if full.len() + 1 > capacity {
            Err(VfsError::with_code(
                SQLITE_CANTOPEN,
                format!("pathname longer than {} bytes: {full}", capacity.saturating_sub(1)),
            ))
        } else {
            Ok(full)
        }
    });
    match result {
        Ok(full) => {
            unsafe {
                arena::write(out as *mut u8, full.as_bytes());
                *out.add(full.len()) = 0;
            }
            SQLITE_OK
        }
        Err(error) => fail("full_pathname", SQLITE_CANTOPEN, owner, None, error),
    }
}

unsafe extern "C" fn x_randomness(vfs: *mut ffi::sqlite3_vfs, n: c_int, out: *mut c_char) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let imp = backend(owner);
    trace!(vfs = owner, n, "xRandomness");
    let buf = unsafe { std::slice::from_raw_parts_mut(out as *mut u8, n.max(0) as usize) };
    match guarded("randomness", || Ok(imp.randomness(buf))) {
        Ok(filled) => filled.min(n.max(0) as usize) as c_int,
        Err(error) => {
            fail("randomness", SQLITE_ERROR, owner, None, error);
            0
        }
    }
}

unsafe extern "C" fn x_sleep(vfs: *mut ffi::sqlite3_vfs, micros: c_int) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let imp = backend(owner);
    trace!(vfs = owner, micros, "xSleep");
    let duration = micros.max(0) as u64;
    match suspend(async move {
        imp.sleep(duration).await;
        Ok(())
    }) {
        Ok(()) => micros,
        Err(error) => {
            fail("sleep", SQLITE_ERROR, owner, None, error);
            0
        }
    }
}

unsafe extern "C" fn x_current_time_int64(vfs: *mut ffi::sqlite3_vfs, out: *mut i64) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let imp = backend(owner);
    match guarded("current_time", || Ok(imp.current_time())) {
        Ok(now) => {
            unsafe { *out = now };
            SQLITE_OK
        }
        Err(error) => fail("current_time", SQLITE_ERROR, owner, None, error),
    }
}

/// Copies the newest pending error of the backend into `buf` and returns its
/// code, or returns 0 when the last call that reached the backend succeeded.
unsafe extern "C" fn x_get_last_error(vfs: *mut ffi::sqlite3_vfs, n_buf: c_int, buf: *mut c_char) -> c_int {
    let owner = unsafe { vfs_handle(vfs) };
    let error = last_vfs_error(owner);
    trace!(vfs = owner, found = error.is_some(), "xGetLastError");

    let capacity = n_buf.max(0) as usize;
    if !buf.is_null() && capacity > 0 {
        let message = error.as_ref().map(|e| e.message().as_bytes()).unwrap_or_default();
        let n = message.len().min(capacity - 1);
        unsafe {
            arena::write(buf as *mut u8, &message[..n]);
            *buf.add(n) = 0;
        }
    }
    error.map(|e| e.code().unwrap_or(SQLITE_IOERR)).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// File callbacks
// ---------------------------------------------------------------------------

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, "xClose");
    let rc = match suspend(async move { imp.close().await }) {
        Ok(()) => SQLITE_OK,
        Err(error) => fail("close", SQLITE_IOERR_CLOSE, owner, Some(handle), error),
    };
    file_table().remove(handle);
    rc
}

unsafe extern "C" fn x_read(file: *mut ffi::sqlite3_file, buf: *mut c_void, amount: c_int, offset: i64) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, amount, offset, "xRead");

    let len = amount.max(0) as usize;
    match suspend(async move { imp.read(offset.max(0) as u64, len).await }) {
        Ok(data) => {
            let n = data.len().min(len);
            let dst = buf as *mut u8;
            unsafe {
                arena::write(dst, &data[..n]);
                if n < len {
                    ptr::write_bytes(dst.add(n), 0, len - n);
                }
            }
            if n < len { SQLITE_IOERR_SHORT_READ } else { SQLITE_OK }
        }
        Err(error) => fail("read", SQLITE_IOERR_READ, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_write(file: *mut ffi::sqlite3_file, buf: *const c_void, amount: c_int, offset: i64) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, amount, offset, "xWrite");

    let data = unsafe { arena::read(buf as *const u8, amount.max(0) as usize) };
    match suspend(async move { imp.write(&data, offset.max(0) as u64).await }) {
        Ok(()) => SQLITE_OK,
        Err(error) => fail("write", SQLITE_IOERR_WRITE, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_truncate(file: *mut ffi::sqlite3_file, size: i64) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, size, "xTruncate");
    match suspend(async move { imp.truncate(size.max(0) as u64).await }) {
        Ok(()) => SQLITE_OK,
        Err(error) => fail("truncate", SQLITE_IOERR_TRUNCATE, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_sync(file: *mut ffi::sqlite3_file, flags: c_int) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, flags, "xSync");
    match suspend(async move { imp.sync(flags).await }) {
        Ok(()) => SQLITE_OK,
        Err(error) => fail("sync", SQLITE_IOERR_FSYNC, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_file_size(file: *mut ffi::sqlite3_file, out: *mut i64) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, "xFileSize");
    match suspend(async move { imp.size().await }) {
        Ok(size) => {
            unsafe { *out = size as i64 };
            SQLITE_OK
        }
        Err(error) => fail("size", SQLITE_IOERR_FSTAT, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_lock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, level, "xLock");
    let Some(level) = LockLevel::from_raw(level) else {
        return fail("lock", SQLITE_IOERR_LOCK, owner, Some(handle), VfsError::new(format!("invalid lock level {level}")));
    };
    match suspend(async move { imp.lock(level).await }) {
        Ok(true) => SQLITE_OK,
        Ok(false) => SQLITE_BUSY,
        Err(error) => fail("lock", SQLITE_IOERR_LOCK, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_unlock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, level, "xUnlock");
    let Some(level) = LockLevel::from_raw(level) else {
        return fail("unlock", SQLITE_IOERR_UNLOCK, owner, Some(handle), VfsError::new(format!("invalid lock level {level}")));
    };
    match suspend(async move { imp.unlock(level).await }) {
        Ok(()) => SQLITE_OK,
        Err(error) => fail("unlock", SQLITE_IOERR_UNLOCK, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_check_reserved_lock(file: *mut ffi::sqlite3_file, out: *mut c_int) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, "xCheckReservedLock");
    match suspend(async move { imp.check_reserved_lock().await }) {
        Ok(reserved) => {
            unsafe { *out = reserved as c_int };
            SQLITE_OK
        }
        Err(error) => fail("check_reserved_lock", SQLITE_IOERR_CHECKRESERVEDLOCK, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_file_control(file: *mut ffi::sqlite3_file, op: c_int, arg: *mut c_void) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    trace!(file = handle, op, "xFileControl");
    match guarded("file_control", || imp.file_control(op, FileControlArg(arg as usize))) {
        Ok(rc) => rc,
        Err(error) => fail("file_control", SQLITE_ERROR, owner, Some(handle), error),
    }
}

unsafe extern "C" fn x_sector_size(file: *mut ffi::sqlite3_file) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    match guarded("sector_size", || Ok(imp.sector_size())) {
        Ok(size) => size,
        Err(error) => {
            fail("sector_size", SQLITE_ERROR, owner, Some(handle), error);
            0
        }
    }
}

unsafe extern "C" fn x_device_characteristics(file: *mut ffi::sqlite3_file) -> c_int {
    let handle = unsafe { file_handle(file) };
    let (imp, owner) = self::file(handle);
    match guarded("device_characteristics", || Ok(imp.device_characteristics())) {
        Ok(flags) => flags,
        Err(error) => {
            fail("device_characteristics", SQLITE_ERROR, owner, Some(handle), error);
            0
        }
    }
}
