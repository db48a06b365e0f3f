//! A SQLite virtual table module that treats an HTTP endpoint's streamed
//! JSON response as a table of rows.
//!
//! `httpvtab_core` owns the network/framing/transcoding pipeline; this
//! crate is the thin SQL-shaped skin over it: DDL parsing
//! ([`decl_parser`]), per-row JSON projection ([`column_binder`]), and the
//! `rusqlite::vtab` trait implementations ([`vtab`]) that make `CREATE
//! VIRTUAL TABLE ... USING httpvtab(...)` work.

pub mod column_binder;
pub mod config;
pub mod decl_parser;
pub mod error;
pub mod vtab;

pub use error::{Error, Result};
pub use vtab::register;

/// `sqlite3_httpvtab_init`, the entry point SQLite's `load_extension()`
/// looks up when this crate is built as a loadable `cdylib`
/// (`.so`/`.dylib`/`.dll`). Absent when embedded as a regular Rust
/// dependency, since `register` already covers that case without any
/// `unsafe` at the call site.
#[cfg(feature = "loadable-extension")]
mod loadable {
    use std::ffi::CString;
    use std::os::raw::{c_char, c_int};

    use rusqlite::ffi;
    use rusqlite::Connection;

    /// # Safety
    /// Called by SQLite's extension loader with a valid `sqlite3*`,
    /// matching the `sqlite3_extension_init` ABI. Only meaningful when
    /// this crate is built as a `cdylib` with the `loadable-extension`
    /// feature, which also turns on rusqlite's own `loadable_extension`
    /// feature so every `libsqlite3-sys` call routes through the host's
    /// `sqlite3_api_routines` table instead of a statically linked
    /// SQLite.
    #[no_mangle]
    pub unsafe extern "C" fn sqlite3_httpvtab_init(
        db: *mut ffi::sqlite3,
        pz_err_msg: *mut *mut c_char,
        p_api: *mut ffi::sqlite3_api_routines,
    ) -> c_int {
        ffi::sqlite3_extension_init2(p_api);

        let conn = match Connection::from_handle(db) {
            Ok(c) => c,
            Err(e) => return write_err(pz_err_msg, &e.to_string()),
        };
        match crate::vtab::register(&conn) {
            Ok(()) => ffi::SQLITE_OK,
            Err(e) => write_err(pz_err_msg, &e.to_string()),
        }
    }

    unsafe fn write_err(pz_err_msg: *mut *mut c_char, msg: &str) -> c_int {
        if let Ok(c_msg) = CString::new(msg) {
            // Pass the message as an argument to a fixed "%s" format, never
            // as the format string itself - msg comes from a fetched URL's
            // error text and must not be interpreted for format specifiers.
            *pz_err_msg = ffi::sqlite3_mprintf(b"%s\0".as_ptr() as *const c_char, c_msg.as_ptr());
        }
        ffi::SQLITE_ERROR
    }
}
