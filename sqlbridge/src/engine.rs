//!
//! Engine execution context.
//!
//! Every call into the engine ABI happens on one dedicated OS thread. Host
//! code hands that thread jobs through a FIFO queue and awaits a oneshot
//! reply; fire-and-forget jobs (close, finalize and reset from `Drop`) share
//! the same queue so they stay ordered with everything else.
//!
//! Storage callbacks run on the engine thread in the middle of an engine
//! call and must answer synchronously. `Engine::suspend` bridges that gap:
//! the backend future is spawned on a private multi-threaded runtime and
//! the engine thread parks until the reply arrives.
//!
//! The engine is a process-wide singleton, started on first use with the
//! default `BridgeConfig` or explicitly with `init`.
//!

use std::collections::VecDeque;
use std::ffi::{c_char, c_int, c_void};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use rusqlite::ffi;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::arena;
use crate::codes::{SQLITE_CONFIG_LOG, SQLITE_MISUSE, SQLITE_OK};
use crate::config::{BridgeConfig, MEMORY_VFS_NAME};
use crate::error::{check, Error, Result};
use crate::vfs::memory::MemoryVfs;
use crate::vfs::{adapter, VfsError};

type Job = Box<dyn FnOnce() + Send + 'static>;

static ENGINE: OnceLock<Engine> = OnceLock::new();
static START: Mutex<()> = Mutex::new(());

/// Advanced once per job; stamps backend errors with the call they belong to.
static EPOCH: AtomicU64 = AtomicU64::new(0);

/// FIFO of pending jobs for the engine thread.
struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    condvar: Condvar,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    fn push(&self, job: Job) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.push_back(job);
        self.condvar.notify_one();
    }

    fn pop(&self) -> Job {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(job) = jobs.pop_front() {
                return job;
            }
            jobs = self.condvar.wait(jobs).unwrap_or_else(|e| e.into_inner());
        }
    }
}

fn worker_loop(queue: Arc<JobQueue>) {
    loop {
        let job = queue.pop();
        EPOCH.fetch_add(1, Ordering::SeqCst);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            error!("engine job panicked: {}", panic_message(panic.as_ref()));
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to the running engine thread and its io runtime.
pub struct Engine {
    queue: Arc<JobQueue>,
    io: Runtime,
    config: BridgeConfig,
}

impl Engine {
    fn start(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let io = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("sqlbridge-io")
            .enable_all()
            .build()?;

        let queue = Arc::new(JobQueue::new());
        let worker_queue = Arc::clone(&queue);
        let boot_config = config.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name(config.engine_thread_name.clone())
            .spawn(move || {
                let booted = bootstrap(&boot_config);
                let ok = booted.is_ok();
                let _ = ready_tx.send(booted);
                if ok {
                    worker_loop(worker_queue);
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Worker("engine thread exited during startup".to_string()))??;

        info!(
            thread = %config.engine_thread_name,
            io_threads = config.io_threads,
            "engine started"
        );
        Ok(Self { queue, io, config })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runs `f` on the engine thread and waits for its result.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.queue.push(Box::new(move || {
            let _ = tx.send(f());
        }));
        rx.await
            .map_err(|_| Error::Worker("job panicked on the engine thread".to_string()))
    }

    /// Queues `f` without waiting for it.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(f));
    }

    /// Drives `fut` to completion on the io runtime while the calling thread
    /// blocks. Must not be called from a runtime thread.
    pub(crate) fn suspend<T, F>(&self, fut: F) -> std::result::Result<T, VfsError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.io.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.blocking_recv()
            .map_err(|_| VfsError::new("storage backend task panicked or was cancelled"))
    }
}

/// Starts the engine with `config`. Fails if it is already running.
pub fn init(config: BridgeConfig) -> Result<&'static Engine> {
    let _guard = START.lock().unwrap_or_else(|e| e.into_inner());
    if ENGINE.get().is_some() {
        return Err(Error::Lifecycle("engine is already running"));
    }
    let engine = Engine::start(config)?;
    Ok(ENGINE.get_or_init(|| engine))
}

/// The running engine, started with the default configuration if needed.
pub fn engine() -> Result<&'static Engine> {
    if let Some(engine) = ENGINE.get() {
        return Ok(engine);
    }
    let _guard = START.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(engine) = ENGINE.get() {
        return Ok(engine);
    }
    let engine = Engine::start(BridgeConfig::default())?;
    Ok(ENGINE.get_or_init(|| engine))
}

/// The engine if it has been started.
pub(crate) fn running() -> Option<&'static Engine> {
    ENGINE.get()
}

pub(crate) fn current_epoch() -> u64 {
    EPOCH.load(Ordering::SeqCst)
}

fn bootstrap(config: &BridgeConfig) -> Result<()> {
    if config.forward_engine_log {
        let rc = unsafe {
            ffi::sqlite3_config(
                SQLITE_CONFIG_LOG,
                forward_engine_log as unsafe extern "C" fn(*mut c_void, c_int, *const c_char),
                std::ptr::null_mut::<c_void>(),
            )
        };
        match rc {
            SQLITE_OK => debug!("engine log forwarding enabled"),
            // The library was initialized before the bridge got to it.
            SQLITE_MISUSE => debug!("engine log forwarding unavailable, engine already initialized"),
            other => warn!(code = other, "failed to configure engine log forwarding"),
        }
    }

    unsafe { check(ffi::sqlite3_initialize(), std::ptr::null_mut())? };

    if config.register_memory_vfs {
        adapter::register(Arc::new(MemoryVfs::new(MEMORY_VFS_NAME)), false)?;
    }
    Ok(())
}

unsafe extern "C" fn forward_engine_log(_: *mut c_void, code: c_int, message: *const c_char) {
    let message = unsafe { arena::decode_cstring(message, None) };
    warn!(target: "sqlbridge::engine", "SQLite({code}): {message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_returns_value() {
        let engine = engine().unwrap();
        let name = engine
            .call(|| std::thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some(engine.config().engine_thread_name.as_str()));
    }

    #[tokio::test]
    async fn test_panicking_job_reports_worker_error() {
        let engine = engine().unwrap();
        let result = engine.call(|| -> i32 { panic!("boom") }).await;
        assert!(matches!(result, Err(Error::Worker(_))));

        // The thread keeps serving afterwards.
        assert_eq!(engine.call(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let engine = engine().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            engine.post(move || seen.lock().unwrap().push(i));
        }
        let seen_by_call = Arc::clone(&seen);
        let snapshot = engine
            .call(move || seen_by_call.lock().unwrap().clone())
            .await
            .unwrap();
        assert_eq!(snapshot, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_each_job_advances_epoch() {
        let engine = engine().unwrap();
        let first = engine.call(current_epoch).await.unwrap();
        let second = engine.call(current_epoch).await.unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_suspend_drives_future_on_io_runtime() {
        let engine = engine().unwrap();
        let value = engine
            .suspend(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                41 + 1
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_suspend_maps_task_panic() {
        let engine = engine().unwrap();
        let result = engine.suspend(async {
            if true {
                panic!("backend exploded");
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_init_after_start_fails() {
        engine().unwrap();
        assert!(matches!(
            init(BridgeConfig::default()),
            Err(Error::Lifecycle(_))
        ));
    }
}
