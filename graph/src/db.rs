//! Connection bootstrap: registers `sqlite-vec` as an auto-extension (as the
//! teacher's root binary does) and applies the schema in `sql/schema.sql`.

use common::error::{ColonyError, Result};
use rusqlite::Connection;
use rusqlite::ffi::sqlite3_auto_extension;

const SCHEMA: &str = include_str!("sql/schema.sql");

/// Opens a connection at `path` (or an in-memory database for `:memory:`),
/// registers the `sqlite-vec` extension, and applies the schema. Idempotent:
/// every DDL statement is `IF NOT EXISTS`.
pub fn open(path: &str) -> Result<Connection> {
    unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(sqlite_vec::sqlite3_vec_init as *const ())));
    }

    let conn = Connection::open(path).map_err(|e| ColonyError::fatal("graph: open", e))?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| ColonyError::fatal("graph: pragma", e))?;
    conn.execute_batch(SCHEMA).map_err(|e| ColonyError::fatal("graph: schema", e))?;
    Ok(conn)
}

/// In-memory database for tests, schema pre-applied.
pub fn open_in_memory() -> Result<Connection> {
    open(":memory:")
}
