///
/// Engine arena marshalling.
///
/// Every buffer handed to the engine, and every out-parameter slot the engine
/// writes into, is allocated from the engine's own allocator
/// (`sqlite3_malloc64` / `sqlite3_free`). `ArenaBuf` owns one such
/// allocation and releases it on drop, so a region borrowed for the duration
/// of a call is freed on every exit path including unwinding.
///
/// Strings cross the boundary as UTF-8 with a trailing NUL. Decoding takes an
/// optional explicit length so that text containing NUL bytes round-trips.
///

use std::ffi::{c_char, c_void};
use std::ptr::NonNull;

use rusqlite::ffi;

use crate::error::{Error, Result};

/// One allocation in the engine arena.
pub struct ArenaBuf {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for ArenaBuf {}
unsafe impl Sync for ArenaBuf {}

impl ArenaBuf {
    /// Allocates `len` uninitialized bytes. A zero-length request still gets
    /// a distinct non-null allocation.
    pub fn allocate(len: usize) -> Result<Self> {
        let raw = unsafe { ffi::sqlite3_malloc64(len.max(1) as u64) } as *mut u8;
        NonNull::new(raw)
            .map(|ptr| ArenaBuf { ptr, len })
            .ok_or(Error::OutOfMemory { bytes: len })
    }

    pub fn zeroed(len: usize) -> Result<Self> {
        let buf = Self::allocate(len)?;
        unsafe { std::ptr::write_bytes(buf.ptr.as_ptr(), 0, len.max(1)) };
        Ok(buf)
    }

    /// Copies `bytes` into a fresh allocation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let buf = Self::allocate(bytes.len())?;
        unsafe { write(buf.ptr.as_ptr(), bytes) };
        Ok(buf)
    }

    /// Encodes `s` as a NUL-terminated string. `len()` excludes the NUL.
    pub fn cstring(s: &str) -> Result<Self> {
        let mut buf = Self::allocate(s.len() + 1)?;
        unsafe {
            write(buf.ptr.as_ptr(), s.as_bytes());
            *buf.ptr.as_ptr().add(s.len()) = 0;
        }
        buf.len = s.len();
        Ok(buf)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_c_ptr(&self) -> *const c_char {
        self.ptr.as_ptr() as *const c_char
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Gives up ownership; the engine (or a later `free`) releases it.
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr() as *mut c_void;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for ArenaBuf {
    fn drop(&mut self) {
        unsafe { ffi::sqlite3_free(self.ptr.as_ptr() as *mut c_void) };
    }
}

impl std::fmt::Debug for ArenaBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaBuf")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

pub fn allocate(len: usize) -> Result<ArenaBuf> {
    ArenaBuf::allocate(len)
}

/// # Safety
/// `ptr` must be null or come from the engine allocator and not be in use.
pub unsafe fn free(ptr: *mut c_void) {
    unsafe { ffi::sqlite3_free(ptr) };
}

/// Copies `len` bytes out of engine memory. A null pointer reads as empty.
///
/// # Safety
/// `ptr` must be null or valid for `len` bytes.
pub unsafe fn read(ptr: *const u8, len: usize) -> Vec<u8> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
}

/// # Safety
/// `ptr` must be valid for `bytes.len()` writes.
pub unsafe fn write(ptr: *mut u8, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
}

pub fn encode_cstring(s: &str) -> Result<ArenaBuf> {
    ArenaBuf::cstring(s)
}

/// Decodes engine text. With `len` the exact byte count is used (embedded
/// NULs survive); without it the text ends at the first NUL. Null decodes to
/// the empty string and invalid UTF-8 is replaced.
///
/// # Safety
/// `ptr` must be null, NUL-terminated, or valid for `len` bytes.
pub unsafe fn decode_cstring(ptr: *const c_char, len: Option<usize>) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let bytes = match len {
        Some(len) => unsafe { std::slice::from_raw_parts(ptr as *const u8, len) },
        None => unsafe { std::ffi::CStr::from_ptr(ptr) }.to_bytes(),
    };
    String::from_utf8_lossy(bytes).into_owned()
}

/// One region requested from `borrow`.
#[derive(Debug, Clone, Copy)]
pub enum Region<'a> {
    /// Zeroed scratch space, typically an out-parameter slot.
    Bytes(usize),
    /// A NUL-terminated copy of a string.
    Str(&'a str),
    /// A copy of raw bytes.
    Data(&'a [u8]),
}

/// Pointer-sized out-parameter slot.
pub const POINTER_SLOT: Region<'static> = Region::Bytes(std::mem::size_of::<*mut c_void>());

/// The regions handed to a `borrow` callback, in request order.
pub struct Borrowed {
    bufs: Vec<ArenaBuf>,
}

impl Borrowed {
    fn allocate(regions: &[Region<'_>]) -> Result<Self> {
        let bufs = regions
            .iter()
            .map(|region| match region {
                Region::Bytes(len) => ArenaBuf::zeroed(*len),
                Region::Str(s) => ArenaBuf::cstring(s),
                Region::Data(bytes) => ArenaBuf::from_bytes(bytes),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Borrowed { bufs })
    }

    /// Region `index` viewed as a `T` slot.
    pub fn ptr<T>(&self, index: usize) -> *mut T {
        self.bufs[index].as_ptr() as *mut T
    }

    pub fn c_str(&self, index: usize) -> *const c_char {
        self.bufs[index].as_c_ptr()
    }

    pub fn buf(&self, index: usize) -> &ArenaBuf {
        &self.bufs[index]
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }
}

/// Allocates every region, runs `f`, then frees the regions whichever way
/// `f` exits. If any allocation fails, the ones already made are released
/// and `f` is not run.
pub fn borrow<R>(regions: &[Region<'_>], f: impl FnOnce(&mut Borrowed) -> Result<R>) -> Result<R> {
    let mut borrowed = Borrowed::allocate(regions)?;
    f(&mut borrowed)
}
