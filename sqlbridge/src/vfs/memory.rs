///
/// In-memory storage backend.
///
/// Files live in a map shared by every handle the backend opens, so several
/// connections can open the same database by name. Each file tracks the
/// engine's locking protocol: the number of shared holders plus who holds
/// RESERVED, PENDING and EXCLUSIVE. A handle that cannot take a lock gets
/// `Ok(false)`, which the engine sees as BUSY.
///

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Filename, Vfs, VfsError, VfsFile, VfsResult};
use crate::codes::{LockLevel, OpenFlags, SQLITE_CANTOPEN};

#[derive(Debug, Default)]
struct LockState {
    shared: usize,
    reserved: bool,
    pending: bool,
    exclusive: bool,
}

#[derive(Debug, Default)]
struct MemoryData {
    bytes: Mutex<Vec<u8>>,
    locks: Mutex<LockState>,
}

type FileMap = Arc<Mutex<HashMap<String, Arc<MemoryData>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MemoryVfs {
    name: String,
    files: FileMap,
    next_temp: AtomicU64,
}

impl MemoryVfs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Arc::new(Mutex::new(HashMap::new())),
            next_temp: AtomicU64::new(1),
        }
    }

    /// Names of the files currently stored.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.files).keys().cloned().collect();
        names.sort();
        names
    }

    /// Size in bytes of a stored file.
    pub fn file_size(&self, name: &str) -> Option<usize> {
        lock(&self.files).get(name).map(|data| lock(&data.bytes).len())
    }
}

#[async_trait]
impl Vfs for MemoryVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_pathname(&self) -> i32 {
        512
    }

    async fn open(&self, filename: &Filename, flags: OpenFlags) -> VfsResult<Arc<dyn VfsFile>> {
        let path = match filename.path() {
            Some(path) => path.to_string(),
            None => format!(
                "temp-{}",
                self.next_temp.fetch_add(1, Ordering::Relaxed)
            ),
        };

        let data = {
            let mut files = lock(&self.files);
            match files.get(&path).cloned() {
                Some(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) => {
                    return Err(VfsError::with_code(
                        SQLITE_CANTOPEN,
                        format!("file already exists: {path}"),
                    ));
                }
                Some(data) => data,
                None if flags.contains(OpenFlags::CREATE) || filename.is_temporary() => {
                    let data = Arc::new(MemoryData::default());
                    files.insert(path.clone(), Arc::clone(&data));
                    data
                }
                None => {
                    return Err(VfsError::with_code(
                        SQLITE_CANTOPEN,
                        format!("no such file: {path}"),
                    ));
                }
            }
        };

        Ok(Arc::new(MemoryFile {
            path,
            data,
            files: Arc::clone(&self.files),
            flags: flags.bits(),
            delete_on_close: flags.contains(OpenFlags::DELETEONCLOSE) || filename.is_temporary(),
            held: Mutex::new(Held::default()),
        }))
    }

    async fn delete(&self, filename: &str, _sync_dir: bool) -> VfsResult<()> {
        lock(&self.files).remove(filename);
        Ok(())
    }

    async fn access(&self, filename: &str, _flags: i32) -> VfsResult<bool> {
        Ok(lock(&self.files).contains_key(filename))
    }
}

/// Locks held by one open handle.
#[derive(Debug, Default)]
struct Held {
    level: LockLevel,
    reserved: bool,
}

pub struct MemoryFile {
    path: String,
    data: Arc<MemoryData>,
    files: FileMap,
    flags: i32,
    delete_on_close: bool,
    held: Mutex<Held>,
}

impl MemoryFile {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lock_level(&self) -> LockLevel {
        lock(&self.held).level
    }

    fn acquire(&self, level: LockLevel) -> bool {
        let mut held = lock(&self.held);
        let mut state = lock(&self.data.locks);
        if held.level >= level {
            return true;
        }
        match level {
            LockLevel::None => true,
            LockLevel::Shared => {
                if state.pending || state.exclusive {
                    return false;
                }
                state.shared += 1;
                held.level = LockLevel::Shared;
                true
            }
            LockLevel::Reserved => {
                if state.reserved {
                    return false;
                }
                state.reserved = true;
                held.reserved = true;
                held.level = LockLevel::Reserved;
                true
            }
            LockLevel::Pending | LockLevel::Exclusive => {
                if held.level < LockLevel::Pending {
                    if state.pending {
                        return false;
                    }
                    state.pending = true;
                    held.level = LockLevel::Pending;
                }
                if level == LockLevel::Pending {
                    return true;
                }
                // Other readers must drain first; PENDING keeps new ones out.
                if state.shared > 1 {
                    return false;
                }
                state.exclusive = true;
                held.level = LockLevel::Exclusive;
                true
            }
        }
    }

    fn release(&self, level: LockLevel) {
        let mut held = lock(&self.held);
        let mut state = lock(&self.data.locks);
        if held.level <= level {
            return;
        }
        if held.level == LockLevel::Exclusive {
            state.exclusive = false;
        }
        if held.level >= LockLevel::Pending {
            state.pending = false;
        }
        if held.reserved && level < LockLevel::Reserved {
            state.reserved = false;
            held.reserved = false;
        }
        if level == LockLevel::None && held.level >= LockLevel::Shared {
            state.shared = state.shared.saturating_sub(1);
        }
        held.level = level;
    }
}

#[async_trait]
impl VfsFile for MemoryFile {
    fn flags(&self) -> i32 {
        self.flags
    }

    async fn close(&self) -> VfsResult<()> {
        self.release(LockLevel::None);
        if self.delete_on_close {
            lock(&self.files).remove(&self.path);
        }
        Ok(())
    }

    async fn read(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        let bytes = lock(&self.data.bytes);
        let start = (offset as usize).min(bytes.len());
        let end = start.saturating_add(len).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    async fn write(&self, data: &[u8], offset: u64) -> VfsResult<()> {
        let mut bytes = lock(&self.data.bytes);
        let start = offset as usize;
        let end = start + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn truncate(&self, size: u64) -> VfsResult<()> {
        lock(&self.data.bytes).resize(size as usize, 0);
        Ok(())
    }

    async fn size(&self) -> VfsResult<u64> {
        Ok(lock(&self.data.bytes).len() as u64)
    }

    async fn lock(&self, level: LockLevel) -> VfsResult<bool> {
        Ok(self.acquire(level))
    }

    async fn unlock(&self, level: LockLevel) -> VfsResult<()> {
        self.release(level);
        Ok(())
    }

    async fn check_reserved_lock(&self) -> VfsResult<bool> {
        let state = lock(&self.data.locks);
        Ok(state.reserved || state.pending || state.exclusive)
    }
}
