//! Raw engine boundary.
//!
//! This is the **only** module containing `unsafe` code. It wraps the
//! `sqlite3*` and `sqlite3_stmt*` pointers from `rusqlite::ffi` in owned
//! types and turns result codes into [`EngineError`] values. Everything above
//! this layer (handle sharing, transaction bracketing, busy retry) is safe
//! Rust.

use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::{c_char, c_int};
use std::ptr::{self, NonNull};

use rusqlite::ffi;
use tracing::warn;

use super::value::Value;

/// Open flags for every handle: read/write, create on demand, serialized
/// threading mode so one handle may be shared across threads.
const OPEN_FLAGS: c_int = ffi::SQLITE_OPEN_READWRITE
    | ffi::SQLITE_OPEN_CREATE
    | ffi::SQLITE_OPEN_FULLMUTEX
    | ffi::SQLITE_OPEN_URI;

/// A failed engine call: the SQLite result code and its diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EngineError {
    pub code: c_int,
    pub message: String,
}

impl EngineError {
    pub fn new(code: c_int, message: impl Into<String>) -> Self {
        EngineError {
            code,
            message: message.into(),
        }
    }

    /// Builds an error carrying the engine's generic text for `code`.
    pub fn from_code(code: c_int) -> Self {
        EngineError::new(code, errstr(code))
    }

    /// `SQLITE_BUSY` or one of its extended codes. The only transient
    /// condition.
    pub fn is_busy(&self) -> bool {
        self.code & 0xff == ffi::SQLITE_BUSY
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, code {}", self.message, self.code)
    }
}

pub(crate) type EngineResult<T> = std::result::Result<T, EngineError>;

/// Outcome of one successful `sqlite3_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Row,
    Done,
}

/// Engine description of a result code (`sqlite3_errstr`).
pub(crate) fn errstr(code: c_int) -> String {
    let ptr = unsafe { ffi::sqlite3_errstr(code) };
    if ptr.is_null() {
        return format!("unknown error {}", code);
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn errmsg(db: *mut ffi::sqlite3) -> String {
    let ptr = unsafe { ffi::sqlite3_errmsg(db) };
    if ptr.is_null() {
        return "unknown error".to_string();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn to_c_int(n: usize) -> EngineResult<c_int> {
    c_int::try_from(n).map_err(|_| EngineError::from_code(ffi::SQLITE_TOOBIG))
}

/// An open `sqlite3*` handle. Closed with `sqlite3_close_v2` on drop.
pub(crate) struct RawDb {
    db: NonNull<ffi::sqlite3>,
}

// Handles are opened with SQLITE_OPEN_FULLMUTEX: the engine serializes every
// call on the handle, so it may be used from any thread.
unsafe impl Send for RawDb {}
unsafe impl Sync for RawDb {}

impl RawDb {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &str) -> EngineResult<Self> {
        let c_path = CString::new(path)
            .map_err(|e| EngineError::new(ffi::SQLITE_MISUSE, format!("invalid path: {}", e)))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, OPEN_FLAGS, ptr::null()) };
        if rc != ffi::SQLITE_OK {
            // A handle is usually allocated even on failure; it carries the
            // message and must still be closed.
            let message = if db.is_null() {
                errstr(rc)
            } else {
                let m = errmsg(db);
                unsafe {
                    ffi::sqlite3_close_v2(db);
                }
                m
            };
            return Err(EngineError::new(rc, message));
        }

        NonNull::new(db)
            .map(|db| RawDb { db })
            .ok_or_else(|| EngineError::from_code(ffi::SQLITE_NOMEM))
    }

    fn ptr(&self) -> *mut ffi::sqlite3 {
        self.db.as_ptr()
    }

    /// Runs one or more statements, discarding any result rows.
    pub fn exec(&self, sql: &str) -> EngineResult<()> {
        let c_sql = CString::new(sql)
            .map_err(|e| EngineError::new(ffi::SQLITE_MISUSE, format!("nul in SQL: {}", e)))?;
        let mut err_ptr: *mut c_char = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_exec(self.ptr(), c_sql.as_ptr(), None, ptr::null_mut(), &mut err_ptr) };
        if rc == ffi::SQLITE_OK {
            return Ok(());
        }
        let message = if err_ptr.is_null() {
            errmsg(self.ptr())
        } else {
            let m = unsafe { CStr::from_ptr(err_ptr) }.to_string_lossy().into_owned();
            unsafe { ffi::sqlite3_free(err_ptr.cast()) };
            m
        };
        Err(EngineError::new(rc, message))
    }

    /// Compiles the first statement in `sql`. Trailing statements are
    /// ignored.
    pub fn prepare(&self, sql: &str) -> EngineResult<RawStmt> {
        let len = to_c_int(sql.len())?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(self.ptr(), sql.as_ptr().cast::<c_char>(), len, &mut stmt, ptr::null_mut())
        };
        if rc != ffi::SQLITE_OK {
            return Err(EngineError::new(rc, errmsg(self.ptr())));
        }
        // Whitespace or a lone comment compiles to no statement at all.
        let stmt = NonNull::new(stmt).ok_or_else(|| EngineError::new(ffi::SQLITE_MISUSE, "statement is empty"))?;
        Ok(RawStmt { stmt, db: self.db })
    }

    /// Rows changed by the most recent INSERT/UPDATE/DELETE on this handle.
    pub fn changes(&self) -> usize {
        let n = unsafe { ffi::sqlite3_changes(self.ptr()) };
        usize::try_from(n).unwrap_or(0)
    }

    /// Rowid of the most recent successful INSERT on this handle.
    pub fn last_insert_rowid(&self) -> i64 {
        unsafe { ffi::sqlite3_last_insert_rowid(self.ptr()) }
    }

    /// `true` when the engine has no explicit transaction open.
    pub fn is_autocommit(&self) -> bool {
        unsafe { ffi::sqlite3_get_autocommit(self.ptr()) != 0 }
    }
}

impl Drop for RawDb {
    fn drop(&mut self) {
        // close_v2 defers the close until outstanding statements finalize.
        let rc = unsafe { ffi::sqlite3_close_v2(self.ptr()) };
        if rc != ffi::SQLITE_OK {
            warn!(code = rc, "sqlite3_close_v2 failed: {}", errstr(rc));
        }
    }
}

/// A compiled `sqlite3_stmt*`. Finalized on drop.
///
/// Must not outlive the [`RawDb`] it was prepared on; owners keep the
/// handle alive alongside the statement.
#[derive(Debug)]
pub(crate) struct RawStmt {
    stmt: NonNull<ffi::sqlite3_stmt>,
    db: NonNull<ffi::sqlite3>,
}

// A statement has a single owner; the full-mutex handle serializes the calls.
unsafe impl Send for RawStmt {}

impl RawStmt {
    fn ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.stmt.as_ptr()
    }

    fn check(&self, rc: c_int) -> EngineResult<()> {
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(EngineError::new(rc, errmsg(self.db.as_ptr())))
        }
    }

    /// Binds `value` at the 1-based parameter position `idx`.
    pub fn bind(&self, idx: c_int, value: &Value) -> EngineResult<()> {
        let rc = match value {
            Value::Integer(v) => unsafe { ffi::sqlite3_bind_int64(self.ptr(), idx, *v) },
            Value::Real(v) => unsafe { ffi::sqlite3_bind_double(self.ptr(), idx, *v) },
            Value::Text(v) => {
                let len = to_c_int(v.len())?;
                unsafe {
                    ffi::sqlite3_bind_text(
                        self.ptr(),
                        idx,
                        v.as_ptr().cast::<c_char>(),
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    )
                }
            }
            Value::Null => unsafe { ffi::sqlite3_bind_null(self.ptr(), idx) },
        };
        self.check(rc)
    }

    /// Advances the statement by one step.
    pub fn step(&self) -> EngineResult<Step> {
        match unsafe { ffi::sqlite3_step(self.ptr()) } {
            ffi::SQLITE_ROW => Ok(Step::Row),
            ffi::SQLITE_DONE => Ok(Step::Done),
            rc => Err(EngineError::new(rc, errmsg(self.db.as_ptr()))),
        }
    }

    /// Rewinds the statement. Bindings are kept.
    pub fn reset(&self) {
        unsafe {
            ffi::sqlite3_reset(self.ptr());
        }
    }

    pub fn clear_bindings(&self) {
        unsafe {
            ffi::sqlite3_clear_bindings(self.ptr());
        }
    }

    pub fn column_count(&self) -> usize {
        let n = unsafe { ffi::sqlite3_column_count(self.ptr()) };
        usize::try_from(n).unwrap_or(0)
    }

    fn col(idx: usize) -> c_int {
        // Out-of-range indexes are handled by the engine (it yields NULL).
        c_int::try_from(idx).unwrap_or(c_int::MAX)
    }

    pub fn column_i64(&self, idx: usize) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.ptr(), Self::col(idx)) }
    }

    pub fn column_f64(&self, idx: usize) -> f64 {
        unsafe { ffi::sqlite3_column_double(self.ptr(), Self::col(idx)) }
    }

    /// Reads a column as UTF-8 text. NULL reads as an empty string.
    pub fn column_text(&self, idx: usize) -> String {
        let col = Self::col(idx);
        unsafe {
            let ptr = ffi::sqlite3_column_text(self.ptr(), col);
            if ptr.is_null() {
                return String::new();
            }
            let len = usize::try_from(ffi::sqlite3_column_bytes(self.ptr(), col)).unwrap_or(0);
            String::from_utf8_lossy(std::slice::from_raw_parts(ptr, len)).into_owned()
        }
    }

    pub fn is_null(&self, idx: usize) -> bool {
        unsafe { ffi::sqlite3_column_type(self.ptr(), Self::col(idx)) == ffi::SQLITE_NULL }
    }
}

impl Drop for RawStmt {
    fn drop(&mut self) {
        unsafe {
            ffi::sqlite3_finalize(self.ptr());
        }
    }
}
