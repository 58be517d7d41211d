//! Seekable reader over an object's chunk sequence
//!
//! Presents the ordered chunks of one object as a single logical byte
//! stream. Chunk metadata is loaded once at construction; chunk files are
//! opened lazily as the cursor crosses chunk boundaries.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::chunk::{chunk_disk_path, CHUNK_SIZE};
use crate::models::object::Object;

struct ChunkSlot {
    path: PathBuf,
    size: i64,
}

pub struct ObjectReader {
    object_size: i64,
    chunks: Vec<ChunkSlot>,
    /// Index into `chunks` of the chunk under the cursor
    current: usize,
    file: Option<fs::File>,
    already_read: i64,
}

impl ObjectReader {
    pub fn new(object: &Object, root: &Path, conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.size FROM chunks c
             JOIN object_chunk oc ON oc.chunk_id = c.id
             WHERE oc.object_id = ?1
             ORDER BY oc.number",
        )?;
        let rows = stmt.query_map(params![object.id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, size) = row?;
            chunks.push(ChunkSlot {
                path: chunk_disk_path(id, root)?,
                size,
            });
        }
        if chunks.is_empty() {
            return Err(Error::ObjectNoChunks);
        }

        let file = fs::File::open(&chunks[0].path)?;
        Ok(Self {
            object_size: object.size,
            chunks,
            current: 0,
            file: Some(file),
            already_read: 0,
        })
    }

    fn open_current(&mut self) -> io::Result<&mut fs::File> {
        if self.file.is_none() {
            self.file = Some(fs::File::open(&self.chunks[self.current].path)?);
        }
        // The option was just filled; this cannot miss.
        Ok(self.file.as_mut().expect("chunk file just opened"))
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.already_read >= self.object_size {
                self.file = None;
                return Ok(0);
            }
            let n = self.open_current()?.read(buf)?;
            if n > 0 {
                self.already_read += n as i64;
                return Ok(n);
            }
            // Chunk exhausted: move to the next one.
            if self.current + 1 >= self.chunks.len() {
                return Ok(0);
            }
            self.current += 1;
            self.file = None;
        }
    }
}

impl Seek for ObjectReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let abs = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.already_read + offset,
            SeekFrom::End(offset) => self.object_size + offset,
        };

        if abs < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "negative read position",
            ));
        }
        if abs >= self.object_size {
            // Park at the end; subsequent reads report end-of-stream.
            self.already_read = abs;
            self.current = self.chunks.len() - 1;
            self.file = None;
            return Ok(abs as u64);
        }

        let chunk_size = CHUNK_SIZE as i64;
        let mut number = (abs + chunk_size - 1) / chunk_size;
        if abs % chunk_size == 0 {
            number += 1;
        }
        let index = (number - 1) as usize;

        let mut file = if index == self.current && self.file.is_some() {
            // Reuse the open handle for a seek within the current chunk.
            match self.file.take() {
                Some(f) => f,
                None => fs::File::open(&self.chunks[index].path)?,
            }
        } else {
            fs::File::open(&self.chunks[index].path)?
        };
        file.seek(SeekFrom::Start((abs % chunk_size) as u64))?;

        self.file = Some(file);
        self.current = index;
        self.already_read = abs;
        Ok(abs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{migrate, Database};
    use crate::models::object::create_object_from_reader;
    use tempfile::TempDir;

    fn setup_object(len: usize) -> (Database, TempDir, Object, Vec<u8>) {
        let db = Database::open_in_memory().unwrap();
        migrate::upgrade(&db.blocking_lock()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let object = {
            let conn = db.blocking_lock();
            create_object_from_reader(&mut data.as_slice(), dir.path(), &conn).unwrap()
        };
        (db, dir, object, data)
    }

    #[test]
    fn test_read_window_after_seek() {
        let (db, dir, object, data) = setup_object(2 * CHUNK_SIZE + 300);
        let conn = db.blocking_lock();
        let mut reader = object.reader(dir.path(), &conn).unwrap();

        // Windows chosen to land inside, before, and across chunk boundaries.
        for (start, len) in [
            (0usize, 16usize),
            (CHUNK_SIZE - 3, 6),
            (CHUNK_SIZE, 8),
            (2 * CHUNK_SIZE - 1, 2),
            (2 * CHUNK_SIZE + 290, 100),
        ] {
            reader.seek(SeekFrom::Start(start as u64)).unwrap();
            let mut buf = vec![0u8; len];
            let mut got = 0;
            while got < len {
                let n = reader.read(&mut buf[got..]).unwrap();
                if n == 0 {
                    break;
                }
                got += n;
            }
            let expected = &data[start..(start + len).min(data.len())];
            assert_eq!(&buf[..got], expected, "window at {}", start);
        }
    }

    #[test]
    fn test_seek_variants() {
        let (db, dir, object, data) = setup_object(CHUNK_SIZE + 100);
        let conn = db.blocking_lock();
        let mut reader = object.reader(dir.path(), &conn).unwrap();

        let pos = reader.seek(SeekFrom::End(-10)).unwrap();
        assert_eq!(pos, data.len() as u64 - 10);
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &data[data.len() - 10..]);

        reader.seek(SeekFrom::Start(50)).unwrap();
        let pos = reader.seek(SeekFrom::Current(25)).unwrap();
        assert_eq!(pos, 75);

        assert!(reader.seek(SeekFrom::Start(0)).is_ok());
        assert!(reader.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_seek_past_end_parks() {
        let (db, dir, object, _) = setup_object(100);
        let conn = db.blocking_lock();
        let mut reader = object.reader(dir.path(), &conn).unwrap();

        let pos = reader.seek(SeekFrom::Start(5000)).unwrap();
        assert_eq!(pos, 5000);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_sequential_read_crosses_chunks() {
        let (db, dir, object, data) = setup_object(CHUNK_SIZE + CHUNK_SIZE / 2);
        let conn = db.blocking_lock();
        let mut reader = object.reader(dir.path(), &conn).unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
