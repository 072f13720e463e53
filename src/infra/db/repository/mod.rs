//! Repository implementations for data access in diffit.
//!
//! One repository per table, all sharing the connection owned by `Database`.

mod baseline;
mod build;
mod project;
mod snapshot;

pub use baseline::BaselineRepository;
pub use build::BuildRepository;
pub use project::ProjectRepository;
pub use snapshot::{SnapshotFilter, SnapshotRepository};

use parking_lot::Mutex;
use rusqlite::Connection;
use rusqlite::types::Type;
use std::str::FromStr;
use std::sync::Arc;

pub type DbConn = Arc<Mutex<Connection>>;

pub(super) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(super) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Read a text column into an enum parsed with `FromStr`.
pub(super) fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
    })
}

pub(super) fn total_count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<u64> {
    let total: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(total.max(0) as u64)
}
