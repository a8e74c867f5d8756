///
/// sqlbridge: async host bridge for an embedded SQLite engine
///
/// Runs SQLite on a dedicated engine thread and exposes it to async Rust
/// code, with pluggable storage backends written as async traits.
///
/// Architecture:
/// - Every engine call is a job on the engine thread (see `engine`). Host
///   futures await the job's reply.
/// - Storage backends (`vfs::Vfs`, `vfs::VfsFile`) are registered with the
///   engine through a generated VFS. Their callbacks suspend the engine
///   thread while the backend future runs on the bridge's io runtime.
/// - Backends and open files live in handle tables keyed by integer
///   handles. Each entry keeps a small queue of recent backend errors for
///   the engine's get-last-error callback.
/// - Strings and buffers crossing the ABI are copied into engine-allocated
///   memory (`arena`) and released when the call settles.
///
/// Surface:
/// - Connection: `Conn::open`, `close`, `filename`, `vfsname`, `vfs`,
///   `file`, `dbnames`, `autocommit`, `interrupt`
/// - Statements: `Conn::prepare`, `Statement::bind`, `bind_all`, `step`,
///   `reset`, `clear`, `finalize`
/// - Queries: `Conn::sql` and `Conn::stmts` over a `Query` of SQL fragments,
///   values, parameter maps and commands
/// - Backup: `Conn::backup` and the `backup` query command
/// - Backends: `vfs::register_vfs`, `vfs::unregister_vfs`,
///   `vfs::memory::MemoryVfs`
///

pub mod arena;
pub mod backup;
pub mod bindings;
pub mod codes;
pub mod config;
pub mod conn;
pub mod engine;
pub mod error;
pub mod handles;
pub mod query;
pub mod row;
pub mod statement;
pub mod value;
pub mod vfs;

pub use backup::{backup, Backup, BackupCommand, BackupOptions, BackupProgress, BackupTarget};
pub use bindings::Bindings;
pub use codes::{LockLevel, OpenFlags};
pub use config::BridgeConfig;
pub use conn::{Conn, InterruptHandle, OpenParams};
pub use engine::{engine, init, Engine};
pub use error::{Error, ErrorKind, Result};
pub use query::{Arg, Query, QueryPlan, QueryRows, SqlCommand, Statements};
pub use row::Row;
pub use statement::{Rows, Statement};
pub use value::{Value, MAX_SAFE_INTEGER};
pub use vfs::memory::MemoryVfs;
pub use vfs::{find_vfs, register_vfs, unregister_vfs, Vfs, VfsError, VfsFile, VfsRegistration, VfsResult};
