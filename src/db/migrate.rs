//! Schema migrations
//!
//! Migrations are registered in a fixed order and applied inside one batch
//! per upgrade run. The `migrations` table records applied names and the
//! batch they ran in; `rollback` undoes whole batches in reverse order.

use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{Error, Result};

/// One reversible schema step
pub struct Migration {
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// Registered migrations, in application order
pub fn registered() -> &'static [Migration] {
    &[
        Migration {
            name: "create_apps_table",
            up: "
                CREATE TABLE IF NOT EXISTS apps (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  uid TEXT NOT NULL UNIQUE,
                  secret TEXT NOT NULL,
                  name TEXT NOT NULL,
                  note TEXT,
                  created_at TEXT NOT NULL,
                  updated_at TEXT NOT NULL,
                  deleted_at TEXT
                );
            ",
            down: "DROP TABLE IF EXISTS apps;",
        },
        Migration {
            name: "create_chunks_table",
            // Chunk ids start at 10000 so the on-disk layout always has at
            // least one directory level.
            up: "
                CREATE TABLE IF NOT EXISTS chunks (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  size INTEGER NOT NULL DEFAULT 0,
                  hash TEXT NOT NULL UNIQUE,
                  created_at TEXT NOT NULL,
                  updated_at TEXT NOT NULL
                );
                INSERT INTO sqlite_sequence (name, seq)
                SELECT 'chunks', 9999
                WHERE NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = 'chunks');
            ",
            down: "DROP TABLE IF EXISTS chunks;",
        },
        Migration {
            name: "create_files_table",
            up: "
                CREATE TABLE IF NOT EXISTS files (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  uid TEXT NOT NULL UNIQUE,
                  pid INTEGER NOT NULL DEFAULT 0,
                  app_id INTEGER NOT NULL DEFAULT 0,
                  object_id INTEGER NOT NULL DEFAULT 0,
                  size INTEGER NOT NULL DEFAULT 0,
                  name TEXT NOT NULL DEFAULT '',
                  ext TEXT NOT NULL DEFAULT '',
                  is_dir INTEGER NOT NULL DEFAULT 0,
                  hidden INTEGER NOT NULL DEFAULT 0,
                  download_count INTEGER NOT NULL DEFAULT 0,
                  created_at TEXT NOT NULL,
                  updated_at TEXT NOT NULL,
                  deleted_at TEXT,
                  UNIQUE (app_id, pid, name)
                );
                CREATE INDEX IF NOT EXISTS files_object_id_idx ON files (object_id);
                CREATE INDEX IF NOT EXISTS files_app_id_idx ON files (app_id);
                CREATE INDEX IF NOT EXISTS files_deleted_at_idx ON files (deleted_at);
            ",
            down: "DROP TABLE IF EXISTS files;",
        },
        Migration {
            name: "create_histories_table",
            up: "
                CREATE TABLE IF NOT EXISTS histories (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  object_id INTEGER NOT NULL,
                  file_id INTEGER NOT NULL,
                  path TEXT NOT NULL,
                  created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS histories_object_id_idx ON histories (object_id);
                CREATE INDEX IF NOT EXISTS histories_file_id_idx ON histories (file_id);
            ",
            down: "DROP TABLE IF EXISTS histories;",
        },
        Migration {
            name: "create_object_chunk_table",
            up: "
                CREATE TABLE IF NOT EXISTS object_chunk (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  object_id INTEGER NOT NULL,
                  chunk_id INTEGER NOT NULL,
                  number INTEGER NOT NULL,
                  hash_state TEXT,
                  created_at TEXT NOT NULL,
                  updated_at TEXT NOT NULL,
                  UNIQUE (object_id, chunk_id, number)
                );
                CREATE INDEX IF NOT EXISTS object_chunk_chunk_id_idx ON object_chunk (chunk_id);
            ",
            down: "DROP TABLE IF EXISTS object_chunk;",
        },
        Migration {
            name: "create_objects_table",
            up: "
                CREATE TABLE IF NOT EXISTS objects (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  size INTEGER NOT NULL DEFAULT 0,
                  hash TEXT NOT NULL UNIQUE,
                  created_at TEXT NOT NULL,
                  updated_at TEXT NOT NULL
                );
            ",
            down: "DROP TABLE IF EXISTS objects;",
        },
        Migration {
            name: "create_requests_table",
            up: "
                CREATE TABLE IF NOT EXISTS requests (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  protocol TEXT NOT NULL,
                  app_id INTEGER,
                  nonce TEXT,
                  token TEXT,
                  ip TEXT,
                  method TEXT,
                  service TEXT,
                  request_body TEXT NOT NULL DEFAULT '',
                  request_header TEXT NOT NULL DEFAULT '',
                  response_code INTEGER NOT NULL DEFAULT 200,
                  response_body TEXT NOT NULL DEFAULT '',
                  created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS requests_app_id_idx ON requests (app_id);
            ",
            down: "DROP TABLE IF EXISTS requests;",
        },
        Migration {
            name: "create_tokens_table",
            up: "
                CREATE TABLE IF NOT EXISTS tokens (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  uid TEXT NOT NULL UNIQUE,
                  secret TEXT,
                  app_id INTEGER NOT NULL,
                  ip TEXT,
                  available_times INTEGER NOT NULL DEFAULT -1,
                  read_only INTEGER NOT NULL DEFAULT 0,
                  path TEXT NOT NULL DEFAULT '/',
                  expired_at TEXT,
                  created_at TEXT NOT NULL,
                  updated_at TEXT NOT NULL,
                  deleted_at TEXT
                );
            ",
            down: "DROP TABLE IF EXISTS tokens;",
        },
    ]
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS migrations (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          migration TEXT NOT NULL UNIQUE,
          batch INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn max_batch(conn: &Connection) -> Result<i64> {
    ensure_migrations_table(conn)?;
    let batch: Option<i64> =
        conn.query_row("SELECT MAX(batch) FROM migrations", [], |row| row.get(0))?;
    Ok(batch.unwrap_or(0))
}

/// Apply every registered migration that has not run yet.
///
/// Returns the names applied in this batch.
pub fn upgrade(conn: &Connection) -> Result<Vec<String>> {
    let batch = max_batch(conn)? + 1;
    let mut applied = Vec::new();

    for migration in registered() {
        let done: i64 = conn.query_row(
            "SELECT COUNT(*) FROM migrations WHERE migration = ?1",
            params![migration.name],
            |row| row.get(0),
        )?;
        if done > 0 {
            continue;
        }

        conn.execute_batch(migration.up)
            .map_err(|e| Error::Migration(format!("{}: {}", migration.name, e)))?;
        conn.execute(
            "INSERT INTO migrations (migration, batch) VALUES (?1, ?2)",
            params![migration.name, batch],
        )?;
        info!("Migrate: {}", migration.name);
        applied.push(migration.name.to_string());
    }

    Ok(applied)
}

/// Undo the last `steps` batches, most recent first
pub fn rollback(conn: &Connection, steps: i64) -> Result<Vec<String>> {
    let fallback_to = max_batch(conn)? - steps + 1;
    let mut reverted = Vec::new();

    let names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT migration FROM migrations WHERE batch >= ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![fallback_to], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for name in names {
        let migration = registered()
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::Migration(format!("unknown migration: {}", name)))?;
        conn.execute_batch(migration.down)
            .map_err(|e| Error::Migration(format!("{}: {}", name, e)))?;
        conn.execute("DELETE FROM migrations WHERE migration = ?1", params![name])?;
        info!("Rollback: {}", name);
        reverted.push(name);
    }

    Ok(reverted)
}
