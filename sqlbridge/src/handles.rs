///
/// Opaque handle tables.
///
/// The engine only ever carries plain integers for host objects: a registered
/// backend's handle sits in `pAppData` of its `sqlite3_vfs`, and an open
/// file's handle sits in the tail of its file struct. A `HandleTable` maps
/// those integers back to the host objects. Handles start at 1 and are never
/// reused within a table; 0 means "no handle".
///
/// Each entry also keeps a bounded queue of backend failures. Errors are
/// stamped with the engine epoch they were raised in and every dispatch into
/// an entry records its epoch, so `last()` only reports an error that belongs
/// to the most recent engine call that reached the entry.
///

use std::collections::{HashMap, VecDeque};

use crate::vfs::VfsError;

pub type Handle = u64;

/// Errors retained per entry; older ones are dropped.
pub const PENDING_ERROR_CAPACITY: usize = 16;

#[derive(Debug, Default)]
pub struct PendingErrors {
    errors: VecDeque<(u64, VfsError)>,
    touched: u64,
}

impl PendingErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the entry was dispatched into during `epoch`.
    pub fn touch(&mut self, epoch: u64) {
        self.touched = self.touched.max(epoch);
    }

    pub fn push(&mut self, epoch: u64, error: VfsError) {
        self.touch(epoch);
        if self.errors.len() == PENDING_ERROR_CAPACITY {
            self.errors.pop_front();
        }
        self.errors.push_back((epoch, error));
    }

    /// The newest error, if it was raised in the last epoch that touched
    /// this entry.
    pub fn last(&self) -> Option<&VfsError> {
        self.errors
            .back()
            .filter(|(epoch, _)| *epoch == self.touched)
            .map(|(_, error)| error)
    }

    /// All retained errors, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &VfsError> {
        self.errors.iter().map(|(_, error)| error)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug)]
pub struct Entry<T> {
    pub value: T,
    pub pending: PendingErrors,
}

#[derive(Debug)]
pub struct HandleTable<T> {
    entries: HashMap<Handle, Entry<T>>,
    next_id: Handle,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                value,
                pending: PendingErrors::new(),
            },
        );
        id
    }

    pub fn get(&self, handle: Handle) -> Option<&Entry<T>> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Entry<T>> {
        self.entries.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Entry<T>> {
        self.entries.remove(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Entry<T>)> {
        self.entries.iter().map(|(handle, entry)| (*handle, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_not_reused() {
        let mut table = HandleTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_eq!((a, b), (1, 2));
        assert_eq!(table.remove(a).map(|e| e.value), Some("a"));
        let c = table.insert("c");
        assert_eq!(c, 3);
        assert!(table.get(a).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_last_error_scoped_to_touched_epoch() {
        let mut pending = PendingErrors::new();
        pending.touch(3);
        assert!(pending.last().is_none());

        pending.push(3, VfsError::new("read failed"));
        assert_eq!(pending.last().map(|e| e.message()), Some("read failed"));

        // A later call that reaches the entry without failing hides it.
        pending.touch(4);
        assert!(pending.last().is_none());
        assert_eq!(pending.len(), 1);

        // Reading does not clear.
        pending.push(5, VfsError::new("write failed"));
        assert_eq!(pending.last().map(|e| e.message()), Some("write failed"));
        assert_eq!(pending.last().map(|e| e.message()), Some("write failed"));
    }

    #[test]
    fn test_pending_errors_are_bounded() {
        let mut pending = PendingErrors::new();
        for i in 0..(PENDING_ERROR_CAPACITY as u64 + 4) {
            pending.push(i, VfsError::new(format!("error {i}")));
        }
        assert_eq!(pending.len(), PENDING_ERROR_CAPACITY);
        assert_eq!(pending.iter().next().map(|e| e.message()), Some("error 4"));
        assert_eq!(pending.last().map(|e| e.message()), Some("error 19"));
    }
}
