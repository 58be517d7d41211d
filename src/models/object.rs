//! Object engine
//!
//! An object is an ordered, gap-free sequence of chunks identified by the
//! SHA-256 of its full concatenation. Creation splits a stream into
//! [`CHUNK_SIZE`] slices; append restores the digest snapshot persisted on
//! the last object chunk and continues hashing from there, so previously
//! stored bytes are never read back for digestion.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::digest::ResumableSha256;
use crate::error::{Error, Result};
use crate::models::chunk::{self, Chunk, CHUNK_SIZE};
use crate::models::object_chunk::{self, ObjectChunk};
use crate::models::object_reader::ObjectReader;

#[derive(Debug, Clone)]
pub struct Object {
    pub id: i64,
    pub size: i64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const OBJECT_COLUMNS: &str = "id, size, hash, created_at, updated_at";

impl Object {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            size: row.get(1)?,
            hash: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    /// The chunk at a 1-based position
    pub fn chunk_with_number(&self, number: i64, conn: &Connection) -> Result<Chunk> {
        let chunk = conn
            .query_row(
                "SELECT c.id, c.size, c.hash, c.created_at, c.updated_at
                 FROM chunks c
                 JOIN object_chunk oc ON oc.chunk_id = c.id
                 WHERE oc.object_id = ?1 AND oc.number = ?2",
                params![self.id, number],
                Chunk::from_row,
            )
            .optional()?;
        chunk.ok_or(Error::ObjectNoChunks)
    }

    /// The highest-numbered membership row
    pub fn last_object_chunk(&self, conn: &Connection) -> Result<Option<ObjectChunk>> {
        object_chunk::last_for_object(self.id, conn)
    }

    /// How many rows reference this object: files (trashed included) plus
    /// histories. At most one reference means an append may edit the object
    /// row in place.
    pub fn reference_count(&self, conn: &Connection) -> Result<i64> {
        let count = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM files WHERE object_id = ?1)
                  + (SELECT COUNT(*) FROM histories WHERE object_id = ?1)",
            params![self.id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Append a stream to this object.
    ///
    /// Returns the object now holding the combined content (this row when it
    /// was exclusively referenced, a new row otherwise) and the number of
    /// bytes consumed from the reader.
    pub fn append_from_reader(
        &self,
        reader: &mut dyn Read,
        root: &Path,
        conn: &Connection,
    ) -> Result<(Object, usize)> {
        let last_oc = self.last_object_chunk(conn)?.ok_or(Error::ObjectNoChunks)?;
        let state = last_oc.hash_state.as_deref().ok_or(Error::MissingHashState)?;
        let mut digest = ResumableSha256::from_state_text(state)?;

        let mut staged = object_chunk::find_by_object(self.id, conn)?;
        if staged.is_empty() {
            return Err(Error::ObjectNoChunks);
        }

        // Tenancy check: a shared object must not be rewritten, so its
        // memberships are re-staged as fresh rows under a new object id.
        let reuse_row = self.reference_count(conn)? <= 1;
        if !reuse_row {
            for oc in &mut staged {
                oc.id = None;
            }
        }

        let mut added = 0usize;

        // Complete the last chunk up to the chunk-size boundary.
        let last_chunk = self.chunk_with_number(last_oc.number, conn)?;
        let gap = CHUNK_SIZE - last_chunk.size as usize;
        if gap > 0 {
            let fill = read_up_to(reader, gap)?;
            let (grown, _) = last_chunk.append_bytes(&fill, root, conn)?;
            if let Some(last) = staged.last_mut() {
                if grown.id != last_chunk.id {
                    last.chunk_id = grown.id;
                }
                digest.update(&fill);
                last.hash_state = Some(digest.state_text()?);
            }
            added += fill.len();
        }

        // Stream the rest in whole chunks.
        let mut number = last_oc.number;
        loop {
            let slice = read_up_to(reader, CHUNK_SIZE)?;
            if slice.is_empty() {
                break;
            }
            let stored = chunk::create_chunk_from_bytes(&slice, root, conn)?;
            digest.update(&slice);
            number += 1;
            staged.push(ObjectChunk::staged(stored.id, number, digest.state_text()?));
            added += slice.len();
            if slice.len() < CHUNK_SIZE {
                break;
            }
        }

        let hash = digest.hex_digest();
        if let Some(existing) = find_object_by_hash(&hash, conn)? {
            return Ok((existing, added));
        }

        let now = Utc::now();
        let object = if reuse_row {
            conn.execute(
                "UPDATE objects SET size = ?1, hash = ?2, updated_at = ?3 WHERE id = ?4",
                params![self.size + added as i64, hash, now, self.id],
            )?;
            Object {
                id: self.id,
                size: self.size + added as i64,
                hash,
                created_at: self.created_at,
                updated_at: now,
            }
        } else {
            insert_object(self.size + added as i64, &hash, conn)?
        };

        for oc in &mut staged {
            oc.object_id = object.id;
            oc.save(conn)?;
        }

        debug!(object = object.id, added, reused = reuse_row, "object appended");
        Ok((object, added))
    }

    /// A seekable reader over the object's logical byte stream
    pub fn reader(&self, root: &Path, conn: &Connection) -> Result<ObjectReader> {
        ObjectReader::new(self, root, conn)
    }
}

pub fn find_object_by_hash(hash: &str, conn: &Connection) -> Result<Option<Object>> {
    let object = conn
        .query_row(
            &format!("SELECT {} FROM objects WHERE hash = ?1", OBJECT_COLUMNS),
            params![hash],
            Object::from_row,
        )
        .optional()?;
    Ok(object)
}

pub fn find_object_by_id(id: i64, conn: &Connection) -> Result<Object> {
    let object = conn
        .query_row(
            &format!("SELECT {} FROM objects WHERE id = ?1", OBJECT_COLUMNS),
            params![id],
            Object::from_row,
        )
        .optional()?;
    object.ok_or(Error::ObjectNotFound(id))
}

fn insert_object(size: i64, hash: &str, conn: &Connection) -> Result<Object> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO objects (size, hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![size, hash, now, now],
    )?;
    Ok(Object {
        id: conn.last_insert_rowid(),
        size,
        hash: hash.to_string(),
        created_at: now,
        updated_at: now,
    })
}

/// Read until `cap` bytes are gathered or the stream ends
fn read_up_to(reader: &mut dyn Read, cap: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; cap];
    let mut filled = 0;
    while filled < cap {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Build an object from a stream, deduplicating chunks and the whole object
pub fn create_object_from_reader(
    reader: &mut dyn Read,
    root: &Path,
    conn: &Connection,
) -> Result<Object> {
    let mut digest = ResumableSha256::new();
    let mut staged: Vec<ObjectChunk> = Vec::new();
    let mut size = 0usize;
    let mut number = 0i64;

    loop {
        let slice = read_up_to(reader, CHUNK_SIZE)?;
        if slice.is_empty() {
            break;
        }
        let stored = chunk::create_chunk_from_bytes(&slice, root, conn)?;
        digest.update(&slice);
        number += 1;
        staged.push(ObjectChunk::staged(stored.id, number, digest.state_text()?));
        size += slice.len();
        if slice.len() < CHUNK_SIZE {
            break;
        }
    }

    if size == 0 {
        return create_empty_object(root, conn);
    }

    let hash = digest.hex_digest();
    if let Some(existing) = find_object_by_hash(&hash, conn)? {
        return Ok(existing);
    }

    let object = insert_object(size as i64, &hash, conn)?;
    for oc in &mut staged {
        oc.object_id = object.id;
        oc.save(conn)?;
    }

    debug!(object = object.id, size, chunks = number, "object created");
    Ok(object)
}

/// The canonical zero-byte object: a single membership pointing at the
/// empty chunk
pub fn create_empty_object(root: &Path, conn: &Connection) -> Result<Object> {
    let digest = ResumableSha256::new();
    let hash = digest.hex_digest();

    if let Some(existing) = find_object_by_hash(&hash, conn)? {
        return Ok(existing);
    }

    let empty = chunk::create_empty_chunk(root, conn)?;
    let object = insert_object(0, &hash, conn)?;
    let mut oc = ObjectChunk::staged(empty.id, 1, digest.state_text()?);
    oc.object_id = object.id;
    oc.save(conn)?;

    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{migrate, Database};
    use crate::digest::sha256_hex;
    use std::io::Read;
    use tempfile::TempDir;

    fn setup() -> (Database, TempDir) {
        let db = Database::open_in_memory().unwrap();
        migrate::upgrade(&db.blocking_lock()).unwrap();
        (db, tempfile::tempdir().unwrap())
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn read_all(object: &Object, root: &std::path::Path, conn: &Connection) -> Vec<u8> {
        let mut reader = object.reader(root, conn).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_create_single_chunk_object() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        let data = pattern(1000, 1);
        let object = create_object_from_reader(&mut data.as_slice(), dir.path(), &conn).unwrap();

        assert_eq!(object.size, 1000);
        assert_eq!(object.hash, sha256_hex(&data));
        assert_eq!(read_all(&object, dir.path(), &conn), data);
    }

    #[test]
    fn test_create_multi_chunk_object() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        let data = pattern(2 * CHUNK_SIZE + 4096, 2);
        let object = create_object_from_reader(&mut data.as_slice(), dir.path(), &conn).unwrap();

        assert_eq!(object.size as usize, data.len());
        assert_eq!(object.hash, sha256_hex(&data));

        let memberships = object_chunk::find_by_object(object.id, &conn).unwrap();
        assert_eq!(memberships.len(), 3);
        assert_eq!(
            memberships.iter().map(|oc| oc.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        // Object size equals the sum of member chunk sizes.
        let total: i64 = conn
            .query_row(
                "SELECT SUM(c.size) FROM chunks c
                 JOIN object_chunk oc ON oc.chunk_id = c.id
                 WHERE oc.object_id = ?1",
                params![object.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(total, object.size);

        assert_eq!(read_all(&object, dir.path(), &conn), data);
    }

    #[test]
    fn test_create_deduplicates_whole_object() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        let data = pattern(5000, 3);
        let first = create_object_from_reader(&mut data.as_slice(), dir.path(), &conn).unwrap();
        let second = create_object_from_reader(&mut data.as_slice(), dir.path(), &conn).unwrap();
        assert_eq!(first.id, second.id);

        let objects: i64 = conn
            .query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))
            .unwrap();
        assert_eq!(objects, 1);
        let chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(chunks, 1);
    }

    #[test]
    fn test_empty_object() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        let mut empty: &[u8] = &[];
        let object = create_object_from_reader(&mut empty, dir.path(), &conn).unwrap();
        assert_eq!(object.size, 0);
        assert_eq!(object.hash, sha256_hex(&[]));

        let memberships = object_chunk::find_by_object(object.id, &conn).unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].number, 1);
        assert!(memberships[0].hash_state.is_some());
    }

    #[test]
    fn test_append_continues_hash_without_rescan() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        // B split across three appends, with splits off chunk boundaries.
        let full = pattern(CHUNK_SIZE + CHUNK_SIZE / 2 + 977, 4);
        let (a1, rest) = full.split_at(CHUNK_SIZE / 2 + 13);
        let (a2, a3) = rest.split_at(CHUNK_SIZE);

        let object = create_object_from_reader(&mut &a1[..], dir.path(), &conn).unwrap();
        conn.execute(
            "INSERT INTO files (uid, pid, app_id, object_id, size, name, ext, created_at, updated_at)
             VALUES ('u', 0, 1, ?1, ?2, 'f', '', '', '')",
            params![object.id, object.size],
        )
        .unwrap();

        let (object, added) = object
            .append_from_reader(&mut &a2[..], dir.path(), &conn)
            .unwrap();
        assert_eq!(added, a2.len());
        let (object, added) = object
            .append_from_reader(&mut &a3[..], dir.path(), &conn)
            .unwrap();
        assert_eq!(added, a3.len());

        assert_eq!(object.size as usize, full.len());
        assert_eq!(object.hash, sha256_hex(&full));
        assert_eq!(read_all(&object, dir.path(), &conn), full);
    }

    #[test]
    fn test_append_reuses_row_when_exclusively_referenced() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        let object = create_object_from_reader(&mut &pattern(100, 5)[..], dir.path(), &conn).unwrap();
        conn.execute(
            "INSERT INTO files (uid, pid, app_id, object_id, size, name, ext, created_at, updated_at)
             VALUES ('u', 0, 1, ?1, 100, 'f', '', '', '')",
            params![object.id],
        )
        .unwrap();

        let (appended, _) = object
            .append_from_reader(&mut &pattern(50, 6)[..], dir.path(), &conn)
            .unwrap();
        assert_eq!(appended.id, object.id);
    }

    #[test]
    fn test_append_to_shared_object_creates_new_row() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        let object = create_object_from_reader(&mut &pattern(100, 7)[..], dir.path(), &conn).unwrap();
        for uid in ["u1", "u2"] {
            conn.execute(
                "INSERT INTO files (uid, pid, app_id, object_id, size, name, ext, created_at, updated_at)
                 VALUES (?1, 0, 1, ?2, 100, ?1, '', '', '')",
                params![uid, object.id],
            )
            .unwrap();
        }

        let (appended, _) = object
            .append_from_reader(&mut &pattern(50, 8)[..], dir.path(), &conn)
            .unwrap();
        assert_ne!(appended.id, object.id);

        // The original object is intact.
        let original = find_object_by_id(object.id, &conn).unwrap();
        assert_eq!(original.size, 100);
        assert_eq!(original.hash, object.hash);
    }

    #[test]
    fn test_append_dedupes_against_existing_object() {
        let (db, dir) = setup();
        let conn = db.blocking_lock();

        let full = pattern(300, 9);
        let whole = create_object_from_reader(&mut &full[..], dir.path(), &conn).unwrap();

        let partial =
            create_object_from_reader(&mut &full[..120], dir.path(), &conn).unwrap();
        let (appended, added) = partial
            .append_from_reader(&mut &full[120..], dir.path(), &conn)
            .unwrap();

        assert_eq!(added, 180);
        assert_eq!(appended.id, whole.id);
    }
}
