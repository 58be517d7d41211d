//! Audit rows written when a file's content or path is replaced

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct History {
    pub id: i64,
    pub object_id: i64,
    pub file_id: i64,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

impl History {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            object_id: row.get(1)?,
            file_id: row.get(2)?,
            path: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

pub fn create_history(object_id: i64, file_id: i64, path: &str, conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO histories (object_id, file_id, path, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![object_id, file_id, path, Utc::now()],
    )?;
    Ok(())
}

pub fn find_histories_by_file(file_id: i64, conn: &Connection) -> Result<Vec<History>> {
    let mut stmt = conn.prepare(
        "SELECT id, object_id, file_id, path, created_at FROM histories WHERE file_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![file_id], History::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}
