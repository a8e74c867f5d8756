///
/// Engine result codes and flag vocabularies.
///
/// The bridge speaks the engine's integer vocabulary unchanged: result codes
/// returned from storage callbacks, open flags passed to backends, lock levels
/// and column type tags. The subset the bridge produces or inspects is
/// re-exported from the engine bindings; flags and lock levels get typed
/// wrappers.
///

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use rusqlite::ffi;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use ffi::{
    SQLITE_BLOB, SQLITE_BUSY, SQLITE_CANTOPEN, SQLITE_DONE, SQLITE_ERROR, SQLITE_FLOAT,
    SQLITE_INTEGER, SQLITE_IOERR, SQLITE_MISUSE, SQLITE_NOMEM, SQLITE_NOTFOUND, SQLITE_NULL,
    SQLITE_OK, SQLITE_RANGE, SQLITE_ROW, SQLITE_TEXT, SQLITE_UTF8,
};

pub use ffi::{
    SQLITE_IOERR_ACCESS, SQLITE_IOERR_CHECKRESERVEDLOCK, SQLITE_IOERR_CLOSE, SQLITE_IOERR_DELETE,
    SQLITE_IOERR_FSTAT, SQLITE_IOERR_FSYNC, SQLITE_IOERR_LOCK, SQLITE_IOERR_READ,
    SQLITE_IOERR_SHORT_READ, SQLITE_IOERR_TRUNCATE, SQLITE_IOERR_UNLOCK, SQLITE_IOERR_WRITE,
};

pub use ffi::{
    SQLITE_ACCESS_EXISTS, SQLITE_ACCESS_READ, SQLITE_ACCESS_READWRITE, SQLITE_CONFIG_LOG,
    SQLITE_FCNTL_FILE_POINTER, SQLITE_FCNTL_VFS_POINTER,
};

/// Returns the primary result code with the extended bits stripped.
pub fn primary(code: i32) -> i32 {
    code & 0xff
}

/// Open flags handed to `sqlite3_open_v2` and forwarded to backends on
/// `xOpen`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(i32);

impl OpenFlags {
    pub const READONLY: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_READONLY);
    pub const READWRITE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_READWRITE);
    pub const CREATE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_CREATE);
    pub const DELETEONCLOSE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_DELETEONCLOSE);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_EXCLUSIVE);
    pub const URI: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_URI);
    pub const MEMORY: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_MEMORY);
    pub const MAIN_DB: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_MAIN_DB);
    pub const TEMP_DB: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_TEMP_DB);
    pub const TRANSIENT_DB: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_TRANSIENT_DB);
    pub const MAIN_JOURNAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_MAIN_JOURNAL);
    pub const TEMP_JOURNAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_TEMP_JOURNAL);
    pub const SUBJOURNAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_SUBJOURNAL);
    pub const SUPER_JOURNAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_SUPER_JOURNAL);
    pub const NOMUTEX: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_NOMUTEX);
    pub const FULLMUTEX: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_FULLMUTEX);
    pub const WAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_WAL);
    pub const NOFOLLOW: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_NOFOLLOW);
    pub const EXRESCODE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_EXRESCODE);

    const NAMES: &'static [(&'static str, OpenFlags)] = &[
        ("readonly", Self::READONLY),
        ("readwrite", Self::READWRITE),
        ("create", Self::CREATE),
        ("deleteonclose", Self::DELETEONCLOSE),
        ("exclusive", Self::EXCLUSIVE),
        ("uri", Self::URI),
        ("memory", Self::MEMORY),
        ("main_db", Self::MAIN_DB),
        ("temp_db", Self::TEMP_DB),
        ("transient_db", Self::TRANSIENT_DB),
        ("main_journal", Self::MAIN_JOURNAL),
        ("temp_journal", Self::TEMP_JOURNAL),
        ("subjournal", Self::SUBJOURNAL),
        ("super_journal", Self::SUPER_JOURNAL),
        ("nomutex", Self::NOMUTEX),
        ("fullmutex", Self::FULLMUTEX),
        ("wal", Self::WAL),
        ("nofollow", Self::NOFOLLOW),
        ("exrescode", Self::EXRESCODE),
    ];

    pub const fn empty() -> Self {
        OpenFlags(0)
    }

    pub const fn from_bits(bits: i32) -> Self {
        OpenFlags(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Looks up a flag by its lowercase name, as used in config files.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, flag)| *flag)
    }

    /// Default flags for opening a database the bridge should create if
    /// missing, with URI filenames and extended result codes enabled.
    pub const fn default_open() -> Self {
        OpenFlags(Self::URI.0 | Self::CREATE.0 | Self::READWRITE.0 | Self::EXRESCODE.0)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: OpenFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "OpenFlags({:#x} {})", self.0, names.join("|"))
    }
}

impl Serialize for OpenFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFlags {
    Bits(i32),
    Names(Vec<String>),
}

impl<'de> Deserialize<'de> for OpenFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawFlags::deserialize(deserializer)? {
            RawFlags::Bits(bits) => Ok(OpenFlags(bits)),
            RawFlags::Names(names) => names.iter().try_fold(OpenFlags::empty(), |acc, name| {
                OpenFlags::from_name(name)
                    .map(|flag| acc | flag)
                    .ok_or_else(|| serde::de::Error::custom(format!("unknown open flag '{}'", name)))
            }),
        }
    }
}

/// File lock levels, in increasing order of exclusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LockLevel {
    #[default]
    None,
    Shared,
    Reserved,
    Pending,
    Exclusive,
}

impl LockLevel {
    pub fn from_raw(level: i32) -> Option<Self> {
        match level {
            ffi::SQLITE_LOCK_NONE => Some(LockLevel::None),
            ffi::SQLITE_LOCK_SHARED => Some(LockLevel::Shared),
            ffi::SQLITE_LOCK_RESERVED => Some(LockLevel::Reserved),
            ffi::SQLITE_LOCK_PENDING => Some(LockLevel::Pending),
            ffi::SQLITE_LOCK_EXCLUSIVE => Some(LockLevel::Exclusive),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            LockLevel::None => ffi::SQLITE_LOCK_NONE,
            LockLevel::Shared => ffi::SQLITE_LOCK_SHARED,
            LockLevel::Reserved => ffi::SQLITE_LOCK_RESERVED,
            LockLevel::Pending => ffi::SQLITE_LOCK_PENDING,
            LockLevel::Exclusive => ffi::SQLITE_LOCK_EXCLUSIVE,
        }
    }
}
