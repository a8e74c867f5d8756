//!
//! Pluggable storage backends.
//!
//! A backend implements [`Vfs`] (namespace-level operations) and hands out
//! [`VfsFile`]s from `open`. Both traits are async: the adapter suspends the
//! engine thread while a backend future runs, so backends are free to do
//! network or disk I/O on the bridge's io runtime.
//!
//! Every capability has a default. Most defaults fail with an
//! "unsupported operation" error, which the engine sees as the nearest I/O
//! error code for that operation.
//!

pub mod adapter;
pub mod filename;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use thiserror::Error;

use crate::codes::{LockLevel, OpenFlags, SQLITE_CANTOPEN, SQLITE_NOTFOUND};
use crate::engine;
use crate::error::Result;
use crate::handles::Handle;

pub use filename::{Filename, UriParameter};

/// Julian day number of the Unix epoch, in milliseconds.
pub const UNIX_EPOCH_JULIAN_MS: i64 = 210_866_760_000_000;

/// Failure raised by a storage backend.
///
/// `code` is the engine result code to report; when absent the adapter uses
/// the I/O error code of the operation that failed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct VfsError {
    code: Option<i32>,
    message: String,
}

impl VfsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(format!("unsupported operation: {operation}"))
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for VfsError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                VfsError::with_code(SQLITE_CANTOPEN, e.to_string())
            }
            _ => VfsError::new(e.to_string()),
        }
    }
}

pub type VfsResult<T> = std::result::Result<T, VfsError>;

/// Opaque argument of a file-control request. Most opcodes pass a pointer;
/// the backend must know the opcode to interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileControlArg(pub usize);

/// A registered storage namespace.
#[async_trait]
pub trait Vfs: Send + Sync + 'static {
    /// Name under which the backend is registered with the engine.
    fn name(&self) -> &str;

    /// Longest pathname the backend accepts.
    fn max_pathname(&self) -> i32 {
        64
    }

    /// Opens `filename`. The returned file's `flags()` are reported back to
    /// the engine as the effective open flags.
    async fn open(&self, filename: &Filename, flags: OpenFlags) -> VfsResult<Arc<dyn VfsFile>> {
        let _ = (filename, flags);
        Err(VfsError::unsupported("open"))
    }

    async fn delete(&self, filename: &str, sync_dir: bool) -> VfsResult<()> {
        let _ = (filename, sync_dir);
        Err(VfsError::unsupported("delete"))
    }

    /// Answers an existence or permission query (`SQLITE_ACCESS_*`).
    async fn access(&self, filename: &str, flags: i32) -> VfsResult<bool> {
        let _ = (filename, flags);
        Err(VfsError::unsupported("access"))
    }

    fn full_pathname(&self, filename: &str) -> VfsResult<String> {
        Ok(filename.to_string())
    }

    /// Fills `buf` with random bytes and returns how many were written.
    fn randomness(&self, buf: &mut [u8]) -> usize {
        rand::rngs::OsRng.fill_bytes(buf);
        buf.len()
    }

    async fn sleep(&self, micros: u64) {
        tokio::time::sleep(Duration::from_micros(micros)).await;
    }

    /// Current time as a Julian day number in milliseconds.
    fn current_time(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() + UNIX_EPOCH_JULIAN_MS
    }
}

/// An open file of a backend.
#[async_trait]
pub trait VfsFile: Send + Sync + 'static {
    fn flags(&self) -> i32 {
        0
    }

    async fn close(&self) -> VfsResult<()> {
        Err(VfsError::unsupported("close"))
    }

    /// Reads up to `len` bytes at `offset`. Returning fewer bytes is a short
    /// read; the adapter zero-fills the rest.
    async fn read(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        let _ = (offset, len);
        Err(VfsError::unsupported("read"))
    }

    async fn write(&self, data: &[u8], offset: u64) -> VfsResult<()> {
        let _ = (data, offset);
        Err(VfsError::unsupported("write"))
    }

    async fn truncate(&self, size: u64) -> VfsResult<()> {
        let _ = size;
        Err(VfsError::unsupported("truncate"))
    }

    async fn sync(&self, flags: i32) -> VfsResult<()> {
        let _ = flags;
        Ok(())
    }

    async fn size(&self) -> VfsResult<u64> {
        Err(VfsError::unsupported("size"))
    }

    /// Upgrades to `level`. `Ok(false)` means the lock is held elsewhere.
    async fn lock(&self, level: LockLevel) -> VfsResult<bool> {
        let _ = level;
        Err(VfsError::unsupported("lock"))
    }

    async fn unlock(&self, level: LockLevel) -> VfsResult<()> {
        let _ = level;
        Err(VfsError::unsupported("unlock"))
    }

    async fn check_reserved_lock(&self) -> VfsResult<bool> {
        Err(VfsError::unsupported("check_reserved_lock"))
    }

    /// Returns the result code for `op`; `SQLITE_NOTFOUND` for opcodes the
    /// backend does not handle.
    fn file_control(&self, op: i32, arg: FileControlArg) -> VfsResult<i32> {
        let _ = (op, arg);
        Ok(SQLITE_NOTFOUND)
    }

    fn sector_size(&self) -> i32 {
        0
    }

    fn device_characteristics(&self) -> i32 {
        0
    }
}

/// A backend registered with the engine.
#[derive(Clone)]
pub struct VfsRegistration {
    name: String,
    handle: Handle,
}

impl VfsRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The newest backend error raised during the most recent engine call
    /// that reached this backend.
    pub fn last_error(&self) -> Option<VfsError> {
        adapter::last_vfs_error(self.handle)
    }

    /// The registered backend object, while it is registered.
    pub fn vfs(&self) -> Option<Arc<dyn Vfs>> {
        adapter::vfs_object(self.handle)
    }
}

impl fmt::Debug for VfsRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VfsRegistration")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Registers `vfs` with the engine under `vfs.name()`, optionally as the
/// default backend for connections that do not name one.
pub async fn register_vfs(vfs: Arc<dyn Vfs>, make_default: bool) -> Result<VfsRegistration> {
    let engine = engine::engine()?;
    engine
        .call(move || adapter::register(vfs, make_default))
        .await?
}

/// Removes a registration. Fails while connections or files still use it.
pub async fn unregister_vfs(registration: VfsRegistration) -> Result<()> {
    let engine = engine::engine()?;
    engine
        .call(move || adapter::unregister(registration.handle))
        .await?
}

/// Looks up a registration by backend name.
pub fn find_vfs(name: &str) -> Option<VfsRegistration> {
    adapter::find_by_name(name).map(|handle| VfsRegistration {
        name: name.to_string(),
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::SQLITE_IOERR_READ;

    struct Bare;

    impl Vfs for Bare {
        fn name(&self) -> &str {
            "bare"
        }
    }

    struct BareFile;

    impl VfsFile for BareFile {}

    #[tokio::test]
    async fn test_defaults_report_unsupported() {
        let err = Bare.delete("x.db", false).await.unwrap_err();
        assert_eq!(err.message(), "unsupported operation: delete");
        assert_eq!(err.code(), None);

        let err = BareFile.read(0, 16).await.unwrap_err();
        assert_eq!(err.message(), "unsupported operation: read");
        assert!(BareFile.sync(0).await.is_ok());
        assert_eq!(BareFile.file_control(1, FileControlArg(0)).unwrap(), SQLITE_NOTFOUND);
    }

    #[tokio::test]
    async fn test_default_capabilities() {
        assert_eq!(Bare.max_pathname(), 64);
        assert_eq!(Bare.full_pathname("a/b.db").unwrap(), "a/b.db");

        let mut buf = [0u8; 32];
        assert_eq!(Bare.randomness(&mut buf), 32);

        assert_eq!(UNIX_EPOCH_JULIAN_MS, 210_866_760_000_000);
        // 2000-01-01T00:00:00Z is Julian day 2451544.5.
        let now = Bare.current_time();
        assert!(now > 24_515_445 * 8_640_000);
        let unix_ms = chrono::Utc::now().timestamp_millis();
        assert!((now - UNIX_EPOCH_JULIAN_MS - unix_ms).abs() < 60_000);
        Bare.sleep(10).await;
    }

    #[test]
    fn test_io_error_mapping() {
        let not_found: VfsError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(not_found.code(), Some(SQLITE_CANTOPEN));

        let other: VfsError = std::io::Error::other("disk on fire").into();
        assert_eq!(other.code(), None);
        assert_eq!(other.to_string(), "disk on fire");

        let coded = VfsError::with_code(SQLITE_IOERR_READ, "bad sector");
        assert_eq!(coded.code(), Some(SQLITE_IOERR_READ));
    }
}
