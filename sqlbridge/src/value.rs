///
/// Host values and their encoding to and from engine cells.
///
/// Numbers are carried as `f64` the way a dynamic host would see them, so an
/// integer only stays a `Number` while it is exactly representable: within
/// ±(2^53 − 1). Anything wider travels as `BigInt`.
///
/// Binding rules:
/// - `Number` that is integer-valued and fits `i64` → int64, otherwise double
/// - `Bool` → int64 0/1
/// - `BigInt` → int64
/// - `Text` / `Blob` → copied into engine memory the engine frees itself
///
/// Reading an integer cell gives `Number` inside the safe range and `BigInt`
/// outside it.
///

use std::ffi::{c_char, c_int, c_void};

use rusqlite::ffi;

use crate::arena::{self, ArenaBuf};
use crate::codes::*;
use crate::error::Result;

/// Largest integer an `f64` represents exactly (2^53 − 1).
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

pub fn is_safe_integer(n: i64) -> bool {
    (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n)
}

/// The integer cell an integer-valued number binds as. `None` for
/// fractions, non-finite values and anything outside the `i64` range.
fn integer_cell(n: f64) -> Option<i64> {
    // -2^63 is exact; i64::MAX rounds up to 2^63.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (n.fract() == 0.0 && (-LIMIT..LIMIT).contains(&n)).then_some(n as i64)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// The host representation of an engine integer.
    pub fn from_i64(n: i64) -> Self {
        if is_safe_integer(n) {
            Value::Number(n as f64)
        } else {
            Value::BigInt(n)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 => {
                Some(*n as i64)
            }
            Value::BigInt(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::BigInt(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! from_small_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Number(v as f64)
            }
        })*
    };
}

from_small_int!(i8, i16, i32, u8, u16, u32);

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::from_i64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

/// Binds `value` to parameter `index` (1-based) and returns the engine's
/// result code.
///
/// # Safety
/// `stmt` must be a live statement handle, used from the engine thread.
pub(crate) unsafe fn bind(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> Result<c_int> {
    let rc = unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int64(stmt, index, *b as i64),
            Value::Number(n) => match integer_cell(*n) {
                Some(i) => ffi::sqlite3_bind_int64(stmt, index, i),
                None => ffi::sqlite3_bind_double(stmt, index, *n),
            },
            Value::BigInt(n) => ffi::sqlite3_bind_int64(stmt, index, *n),
            Value::Text(s) => {
                let buf = ArenaBuf::from_bytes(s.as_bytes())?;
                ffi::sqlite3_bind_text64(
                    stmt,
                    index,
                    buf.into_raw() as *const c_char,
                    s.len() as u64,
                    Some(ffi::sqlite3_free),
                    SQLITE_UTF8 as u8,
                )
            }
            Value::Blob(b) => {
                let buf = ArenaBuf::from_bytes(b)?;
                ffi::sqlite3_bind_blob64(
                    stmt,
                    index,
                    buf.into_raw() as *const c_void,
                    b.len() as u64,
                    Some(ffi::sqlite3_free),
                )
            }
        }
    };
    Ok(rc)
}

/// Reads column `index` of the current row.
///
/// # Safety
/// `stmt` must be a live statement positioned on a row.
pub(crate) unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            SQLITE_INTEGER => Value::from_i64(ffi::sqlite3_column_int64(stmt, index)),
            SQLITE_FLOAT => Value::Number(ffi::sqlite3_column_double(stmt, index)),
            SQLITE_TEXT => {
                let text = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                Value::Text(arena::decode_cstring(text as *const c_char, Some(len.max(0) as usize)))
            }
            SQLITE_BLOB => {
                let blob = ffi::sqlite3_column_blob(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                Value::Blob(arena::read(blob as *const u8, len.max(0) as usize))
            }
            _ => Value::Null,
        }
    }
}
