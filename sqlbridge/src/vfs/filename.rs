///
/// Filenames handed to `xOpen`.
///
/// The engine passes open requests a pointer into a database filename block:
/// the path, then URI query parameters as NUL-separated key/value pairs. The
/// path is decoded eagerly; parameters are looked up through the engine's
/// URI accessors only when asked for. A null pointer means the engine wants
/// an anonymous temporary file.
///
/// The block is owned by the engine and stays valid until the matching
/// close, which outlives any backend `open` call.
///

use std::ffi::c_char;
use std::fmt;

use rusqlite::ffi;

use crate::arena;
use crate::error::Result;

pub struct Filename {
    raw: *const c_char,
    path: Option<String>,
}

unsafe impl Send for Filename {}
unsafe impl Sync for Filename {}

impl Filename {
    /// # Safety
    /// `raw` must be null or a filename pointer received in `xOpen`.
    pub(crate) unsafe fn from_raw(raw: *const c_char) -> Self {
        let path = if raw.is_null() {
            None
        } else {
            Some(unsafe { arena::decode_cstring(raw, None) })
        };
        Self { raw, path }
    }

    /// The decoded path, or `None` for a temporary file.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn is_temporary(&self) -> bool {
        self.raw.is_null()
    }

    /// Looks up URI parameter `name`, returning `default` when it is absent.
    /// The parameter is parsed according to the type of `default`.
    pub fn get_parameter<T: UriParameter>(&self, name: &str, default: T) -> Result<T> {
        if self.raw.is_null() {
            return Ok(default);
        }
        let key = arena::encode_cstring(name)?;
        Ok(unsafe { T::lookup(self.raw, key.as_c_ptr(), default) })
    }

    /// Every URI parameter in the order given, with raw string values.
    pub fn parameters(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if self.raw.is_null() {
            return params;
        }
        for i in 0.. {
            let key = unsafe { ffi::sqlite3_uri_key(self.raw, i) };
            if key.is_null() {
                break;
            }
            let value = unsafe { ffi::sqlite3_uri_parameter(self.raw, key) };
            params.push(unsafe {
                (
                    arena::decode_cstring(key, None),
                    arena::decode_cstring(value, None),
                )
            });
        }
        params
    }
}

impl fmt::Debug for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filename").field("path", &self.path).finish()
    }
}

impl fmt::Display for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path.as_deref().unwrap_or("<temp>"))
    }
}

/// A type a URI parameter can be read as.
pub trait UriParameter: Sized {
    /// # Safety
    /// `filename` must be an `xOpen` filename pointer and `key` a
    /// NUL-terminated string.
    unsafe fn lookup(filename: *const c_char, key: *const c_char, default: Self) -> Self;
}

impl UriParameter for bool {
    unsafe fn lookup(filename: *const c_char, key: *const c_char, default: Self) -> Self {
        unsafe { ffi::sqlite3_uri_boolean(filename, key, default as i32) != 0 }
    }
}

impl UriParameter for i64 {
    unsafe fn lookup(filename: *const c_char, key: *const c_char, default: Self) -> Self {
        unsafe { ffi::sqlite3_uri_int64(filename, key, default) }
    }
}

impl UriParameter for f64 {
    unsafe fn lookup(filename: *const c_char, key: *const c_char, default: Self) -> Self {
        let value = unsafe { ffi::sqlite3_uri_parameter(filename, key) };
        if value.is_null() {
            return default;
        }
        unsafe { arena::decode_cstring(value, None) }
            .trim()
            .parse()
            .unwrap_or(default)
    }
}

impl UriParameter for String {
    unsafe fn lookup(filename: *const c_char, key: *const c_char, default: Self) -> Self {
        let value = unsafe { ffi::sqlite3_uri_parameter(filename, key) };
        if value.is_null() {
            default
        } else {
            unsafe { arena::decode_cstring(value, None) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A filename block laid out by the engine's own constructor, as `xOpen`
    /// would receive it.
    struct OwnedFilename(*const c_char);

    impl OwnedFilename {
        fn new(path: &str, params: &[(&str, &str)]) -> Self {
            let path = std::ffi::CString::new(path).unwrap();
            let keys: Vec<std::ffi::CString> = params
                .iter()
                .flat_map(|(k, v)| {
                    [
                        std::ffi::CString::new(*k).unwrap(),
                        std::ffi::CString::new(*v).unwrap(),
                    ]
                })
                .collect();
            let ptrs: Vec<*const c_char> = keys.iter().map(|s| s.as_ptr()).collect();
            let raw = unsafe {
                ffi::sqlite3_create_filename(
                    path.as_ptr(),
                    c"".as_ptr(),
                    c"".as_ptr(),
                    params.len() as i32,
                    ptrs.as_ptr() as *mut *const c_char,
                )
            };
            assert!(!raw.is_null());
            Self(raw)
        }
    }

    impl Drop for OwnedFilename {
        fn drop(&mut self) {
            unsafe { ffi::sqlite3_free_filename(self.0) };
        }
    }

    #[test]
    fn test_temp_filename() {
        let name = unsafe { Filename::from_raw(std::ptr::null()) };
        assert!(name.is_temporary());
        assert_eq!(name.path(), None);
        assert!(name.get_parameter("cache", true).unwrap());
        assert!(name.parameters().is_empty());
        assert_eq!(name.to_string(), "<temp>");
    }

    #[test]
    fn test_typed_parameters() {
        let owned = OwnedFilename::new(
            "app.db",
            &[("cache", "off"), ("pages", "12"), ("ratio", "0.5"), ("mode", "rw")],
        );
        let name = unsafe { Filename::from_raw(owned.0) };
        assert_eq!(name.path(), Some("app.db"));
        assert!(!name.get_parameter("cache", true).unwrap());
        assert_eq!(name.get_parameter("pages", 0i64).unwrap(), 12);
        assert_eq!(name.get_parameter("ratio", 1.0f64).unwrap(), 0.5);
        assert_eq!(name.get_parameter("mode", String::new()).unwrap(), "rw");
        assert_eq!(name.get_parameter("missing", 7i64).unwrap(), 7);
        assert_eq!(
            name.parameters(),
            vec![
                ("cache".to_string(), "off".to_string()),
                ("pages".to_string(), "12".to_string()),
                ("ratio".to_string(), "0.5".to_string()),
                ("mode".to_string(), "rw".to_string()),
            ]
        );
    }
}
