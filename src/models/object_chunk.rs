//! Object-to-chunk membership rows
//!
//! Each row places one chunk at a 1-based position inside an object and
//! carries the digest snapshot taken after consuming positions 1..=number,
//! which is what makes appends resumable.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ObjectChunk {
    /// Row id; `None` while staged for insert
    pub id: Option<i64>,
    pub object_id: i64,
    pub chunk_id: i64,
    pub number: i64,
    pub hash_state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const OBJECT_CHUNK_COLUMNS: &str =
    "id, object_id, chunk_id, number, hash_state, created_at, updated_at";

impl ObjectChunk {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            object_id: row.get(1)?,
            chunk_id: row.get(2)?,
            number: row.get(3)?,
            hash_state: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    /// A membership staged for insert under a not-yet-known object id
    pub fn staged(chunk_id: i64, number: i64, hash_state: String) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            object_id: 0,
            chunk_id,
            number,
            hash_state: Some(hash_state),
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert or update this row
    pub fn save(&mut self, conn: &Connection) -> Result<()> {
        let now = Utc::now();
        match self.id {
            Some(id) => {
                conn.execute(
                    "UPDATE object_chunk
                     SET object_id = ?1, chunk_id = ?2, number = ?3, hash_state = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![self.object_id, self.chunk_id, self.number, self.hash_state, now, id],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO object_chunk
                       (object_id, chunk_id, number, hash_state, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![self.object_id, self.chunk_id, self.number, self.hash_state, now, now],
                )?;
                self.id = Some(conn.last_insert_rowid());
            }
        }
        self.updated_at = now;
        Ok(())
    }
}

/// How many object chunks reference a chunk (its tenancy)
pub fn count_by_chunk_id(chunk_id: i64, conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM object_chunk WHERE chunk_id = ?1",
        params![chunk_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// All memberships of an object, ordered by position
pub fn find_by_object(object_id: i64, conn: &Connection) -> Result<Vec<ObjectChunk>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM object_chunk WHERE object_id = ?1 ORDER BY number",
        OBJECT_CHUNK_COLUMNS
    ))?;
    let rows = stmt.query_map(params![object_id], ObjectChunk::from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// The highest-numbered membership of an object
pub fn last_for_object(object_id: i64, conn: &Connection) -> Result<Option<ObjectChunk>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM object_chunk WHERE object_id = ?1 ORDER BY number DESC LIMIT 1",
                OBJECT_CHUNK_COLUMNS
            ),
            params![object_id],
            ObjectChunk::from_row,
        )
        .optional()?;
    Ok(row)
}
