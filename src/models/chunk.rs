//! Chunk store: fixed-size blocks deduplicated by content hash
//!
//! A chunk row describes one on-disk block of at most [`CHUNK_SIZE`] bytes.
//! Identical contents map to one row and one file, shared by every object
//! that references them. A chunk file is only ever mutated in place while
//! exactly one object chunk references it; shared chunks stay immutable and
//! appends mint a fresh chunk instead.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::digest::sha256_hex;
use crate::error::{Error, Result};
use crate::models::object_chunk;

/// Fixed chunk size: 2 MiB
pub const CHUNK_SIZE: usize = 2 << 20;

/// One content-addressed block
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: i64,
    pub size: i64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const CHUNK_COLUMNS: &str = "id, size, hash, created_at, updated_at";

impl Chunk {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            size: row.get(1)?,
            hash: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    /// On-disk location of this chunk, creating intermediate directories.
    ///
    /// The decimal id is split from the right into 3-digit groups; the
    /// most-significant group is dropped and the remaining groups, least
    /// significant first, become directory segments under the root. The full
    /// id is the filename: id `10234567` lives at `root/567/234/10234567`.
    /// Every directory level holds at most 1000 entries.
    pub fn disk_path(&self, root: &Path) -> Result<PathBuf> {
        disk_path_for(self.id, root)
    }

    /// Open the backing file for read
    pub fn reader(&self, root: &Path) -> Result<fs::File> {
        let path = self.disk_path(root)?;
        fs::File::open(&path).map_err(|_| Error::ChunkNotFound(self.hash.clone()))
    }

    /// Append bytes to this chunk, respecting content dedup and tenancy.
    ///
    /// Returns the chunk now holding the combined content, which is this row
    /// only when it was exclusively held; the caller must re-point its object
    /// chunk when the id differs.
    pub fn append_bytes(
        &self,
        data: &[u8],
        root: &Path,
        conn: &Connection,
    ) -> Result<(Chunk, usize)> {
        if data.len() + self.size as usize > CHUNK_SIZE {
            return Err(Error::ChunkExceedsLimit(CHUNK_SIZE));
        }

        let path = self.disk_path(root)?;
        let mut combined = fs::read(&path)?;
        combined.extend_from_slice(data);
        let hash = sha256_hex(&combined);

        if let Some(existing) = find_chunk_by_hash(&hash, conn)? {
            return Ok((existing, data.len()));
        }

        // Shared chunks are never mutated; mint a fresh one instead.
        if object_chunk::count_by_chunk_id(self.id, conn)? > 1 {
            let minted = create_chunk_from_bytes(&combined, root, conn)?;
            return Ok((minted, data.len()));
        }

        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(data)?;

        let now = Utc::now();
        conn.execute(
            "UPDATE chunks SET size = ?1, hash = ?2, updated_at = ?3 WHERE id = ?4",
            params![combined.len() as i64, hash, now, self.id],
        )?;
        debug!(chunk = self.id, size = combined.len(), "chunk grown in place");

        Ok((
            Chunk {
                id: self.id,
                size: combined.len() as i64,
                hash,
                created_at: self.created_at,
                updated_at: now,
            },
            data.len(),
        ))
    }
}

fn disk_path_for(id: i64, root: &Path) -> Result<PathBuf> {
    if id < 10000 {
        return Err(Error::InvalidChunkId(id));
    }

    let id_str = id.to_string();
    let mut rest = id_str.as_str();
    let mut dir = root.to_path_buf();
    while rest.len() > 3 {
        dir.push(&rest[rest.len() - 3..]);
        rest = &rest[..rest.len() - 3];
    }

    if !dir.is_dir() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir.join(id_str))
}

/// On-disk location for a chunk known only by id
pub fn chunk_disk_path(id: i64, root: &Path) -> Result<PathBuf> {
    disk_path_for(id, root)
}

pub fn find_chunk_by_hash(hash: &str, conn: &Connection) -> Result<Option<Chunk>> {
    let chunk = conn
        .query_row(
            &format!("SELECT {} FROM chunks WHERE hash = ?1", CHUNK_COLUMNS),
            params![hash],
            Chunk::from_row,
        )
        .optional()?;
    Ok(chunk)
}

/// Store a block, reusing any existing chunk with the same content
pub fn create_chunk_from_bytes(data: &[u8], root: &Path, conn: &Connection) -> Result<Chunk> {
    if data.len() > CHUNK_SIZE {
        return Err(Error::ChunkExceedsLimit(CHUNK_SIZE));
    }

    let hash = sha256_hex(data);
    if let Some(existing) = find_chunk_by_hash(&hash, conn)? {
        return Ok(existing);
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO chunks (size, hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (hash) DO NOTHING",
        params![data.len() as i64, hash, now, now],
    )?;
    let chunk = find_chunk_by_hash(&hash, conn)?.ok_or(Error::ChunkNotFound(hash))?;

    let path = chunk.disk_path(root)?;
    fs::write(&path, data)?;
    debug!(chunk = chunk.id, size = data.len(), "chunk stored");

    Ok(chunk)
}

/// The canonical empty chunk backing the empty object
pub fn create_empty_chunk(root: &Path, conn: &Connection) -> Result<Chunk> {
    create_chunk_from_bytes(&[], root, conn)
}
