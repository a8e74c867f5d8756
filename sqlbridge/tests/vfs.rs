///
/// # Integration Tests for storage backends
///
/// Drives real databases through registered backends: the in-memory
/// backend shared across connections, a backend that cannot open files,
/// and one whose reads fail on demand.
///

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use sqlbridge::codes::{primary, SQLITE_CANTOPEN, SQLITE_IOERR};
use sqlbridge::vfs::{find_vfs, FileControlArg, Filename};
use sqlbridge::{
    register_vfs, unregister_vfs, Conn, ErrorKind, LockLevel, MemoryVfs, OpenFlags, OpenParams,
    Value, Vfs, VfsError, VfsFile, VfsResult,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn test_memory_vfs_shared_between_connections() {
    init_logging();
    let params = OpenParams::new("file:shared.db").vfs("mem");

    let mut writer = Conn::connect(params.clone()).await.expect("Failed to open writer");
    writer
        .sql("CREATE TABLE t(x); INSERT INTO t VALUES (1), (2), (3)")
        .exec()
        .await
        .unwrap();

    let mut reader = Conn::connect(params).await.expect("Failed to open reader");
    let row = reader.sql("SELECT sum(x) FROM t").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(6.0));

    assert_eq!(writer.vfsname("main").await.unwrap().as_deref(), Some("mem"));
    assert_eq!(writer.filename("main").await.unwrap().as_deref(), Some("shared.db"));
    let vfs = writer.vfs("main").await.unwrap().expect("mem should be one of ours");
    assert_eq!(vfs.name(), "mem");
    let file = writer.file("main").await.unwrap().expect("main db file should be ours");
    assert!(file.size().await.unwrap() > 0);
}

#[tokio::test]
async fn test_write_lock_conflict_reports_busy() {
    init_logging();
    let params = OpenParams::new("file:locked.db").vfs("mem");
    let mut first = Conn::connect(params.clone()).await.unwrap();
    first.sql("CREATE TABLE t(x)").exec().await.unwrap();
    first.sql("BEGIN IMMEDIATE").exec().await.unwrap();

    let mut second = Conn::connect(params).await.unwrap();
    let err = second.sql("INSERT INTO t VALUES (1)").exec().await.unwrap_err();
    assert_eq!(err.code().map(primary), Some(sqlbridge::codes::SQLITE_BUSY));

    first.sql("COMMIT").exec().await.unwrap();
    second.sql("INSERT INTO t VALUES (1)").exec().await.unwrap();
}

struct NoOpen;

impl Vfs for NoOpen {
    fn name(&self) -> &str {
        "no-open"
    }
}

#[tokio::test]
async fn test_failed_open_reports_error_and_cleans_up() {
    init_logging();
    let reg = register_vfs(Arc::new(NoOpen), false).await.unwrap();

    let err = Conn::connect(OpenParams::new("nowhere.db").vfs("no-open"))
        .await
        .err()
        .expect("Open should fail");
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.code().map(primary), Some(SQLITE_CANTOPEN));
    let last = reg.last_error().expect("Backend error should be recorded");
    assert!(last.message().contains("unsupported operation"), "got: {last}");

    // The failed open left no file behind, so the backend can go.
    unregister_vfs(reg).await.expect("Unregister should succeed");
    assert!(find_vfs("no-open").is_none());
}

#[tokio::test]
async fn test_unknown_vfs_name_fails_open() {
    init_logging();
    let mut conn = Conn::new().unwrap();
    let err = conn
        .open(OpenParams::new("x.db").vfs("not-registered"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert!(!conn.is_open());
}

/// Wraps the in-memory backend; reads fail while `fail` is set.
struct Flaky {
    inner: MemoryVfs,
    fail: Arc<AtomicBool>,
}

struct FlakyFile {
    inner: Arc<dyn VfsFile>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Vfs for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn open(&self, filename: &Filename, flags: OpenFlags) -> VfsResult<Arc<dyn VfsFile>> {
        let inner = self.inner.open(filename, flags).await?;
        Ok(Arc::new(FlakyFile {
            inner,
            fail: Arc::clone(&self.fail),
        }))
    }

    async fn delete(&self, filename: &str, sync_dir: bool) -> VfsResult<()> {
        self.inner.delete(filename, sync_dir).await
    }

    async fn access(&self, filename: &str, flags: i32) -> VfsResult<bool> {
        self.inner.access(filename, flags).await
    }
}

#[async_trait]
impl VfsFile for FlakyFile {
    fn flags(&self) -> i32 {
        self.inner.flags()
    }

    async fn close(&self) -> VfsResult<()> {
        self.inner.close().await
    }

    async fn read(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VfsError::new("disk on fire"));
        }
        self.inner.read(offset, len).await
    }

    async fn write(&self, data: &[u8], offset: u64) -> VfsResult<()> {
        self.inner.write(data, offset).await
    }

    async fn truncate(&self, size: u64) -> VfsResult<()> {
        self.inner.truncate(size).await
    }

    async fn sync(&self, flags: i32) -> VfsResult<()> {
        self.inner.sync(flags).await
    }

    async fn size(&self) -> VfsResult<u64> {
        self.inner.size().await
    }

    async fn lock(&self, level: LockLevel) -> VfsResult<bool> {
        self.inner.lock(level).await
    }

    async fn unlock(&self, level: LockLevel) -> VfsResult<()> {
        self.inner.unlock(level).await
    }

    async fn check_reserved_lock(&self) -> VfsResult<bool> {
        self.inner.check_reserved_lock().await
    }

    fn file_control(&self, op: i32, arg: FileControlArg) -> VfsResult<i32> {
        self.inner.file_control(op, arg)
    }
}

#[tokio::test]
async fn test_read_failure_surfaces_as_io_error() {
    init_logging();
    let fail = Arc::new(AtomicBool::new(false));
    let reg = register_vfs(
        Arc::new(Flaky {
            inner: MemoryVfs::new("flaky-inner"),
            fail: Arc::clone(&fail),
        }),
        false,
    )
    .await
    .unwrap();
    let params = OpenParams::new("file:flaky.db").vfs("flaky");

    let mut setup = Conn::connect(params.clone()).await.unwrap();
    setup
        .sql("CREATE TABLE t(x); INSERT INTO t VALUES (42)")
        .exec()
        .await
        .unwrap();

    // Opening reads the header, so fail only once the connection exists.
    let mut conn = Conn::connect(params).await.unwrap();
    fail.store(true, Ordering::SeqCst);

    let err = conn.sql("SELECT x FROM t").exec().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.code().map(primary), Some(SQLITE_IOERR));
    let last = reg.last_error().expect("Read failure should be recorded");
    assert_eq!(last.message(), "disk on fire");

    fail.store(false, Ordering::SeqCst);
    let row = conn.sql("SELECT x FROM t").exec().await.unwrap().unwrap();
    assert_eq!(row[0], Value::Number(42.0));
    // The failure belonged to an earlier call.
    assert!(reg.last_error().is_none());

    // Files are still open, so the registration stays.
    assert!(unregister_vfs(reg.clone()).await.is_err());
    drop(conn);
    drop(setup);
}

#[tokio::test]
async fn test_register_duplicate_name_fails() {
    init_logging();
    let err = register_vfs(Arc::new(MemoryVfs::new("mem")), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Registration);
    assert!(find_vfs("mem").is_some());
}

#[tokio::test]
async fn test_unregister_refused_while_connection_uses_backend() {
    init_logging();
    let reg = register_vfs(Arc::new(MemoryVfs::new("idle-mem")), false)
        .await
        .unwrap();

    // An in-memory database opens no files through the backend.
    let mut conn = Conn::connect(OpenParams::new(":memory:").vfs("idle-mem"))
        .await
        .unwrap();
    let err = unregister_vfs(reg.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lifecycle);

    // The backend is still there for the engine's clock.
    let row = conn.sql("SELECT datetime('now')").exec().await.unwrap().unwrap();
    assert!(matches!(row[0], Value::Text(_)));

    conn.close();
    unregister_vfs(reg).await.expect("Unregister should succeed once closed");
    assert!(find_vfs("idle-mem").is_none());
}
