//! Applications: tenants of the directory tree

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::uid;

#[derive(Debug, Clone)]
pub struct App {
    pub id: i64,
    pub uid: String,
    pub secret: String,
    pub name: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

const APP_COLUMNS: &str = "id, uid, secret, name, note, created_at, updated_at, deleted_at";

impl App {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uid: row.get(1)?,
            secret: row.get(2)?,
            name: row.get(3)?,
            note: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            deleted_at: row.get(7)?,
        })
    }
}

/// Create an application together with its root directory row
pub fn create_app(name: &str, note: Option<&str>, conn: &Connection) -> Result<App> {
    let now = Utc::now();
    let app_uid = uid::uid();
    let secret = uid::secret();
    conn.execute(
        "INSERT INTO apps (uid, secret, name, note, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![app_uid, secret, name, note, now, now],
    )?;
    let app_id = conn.last_insert_rowid();

    // The per-app root: pid = 0, empty name, directory.
    conn.execute(
        "INSERT INTO files (uid, pid, app_id, object_id, size, name, ext, is_dir, created_at, updated_at)
         VALUES (?1, 0, ?2, 0, 0, '', '', 1, ?3, ?4)",
        params![uid::uid(), app_id, now, now],
    )?;

    Ok(App {
        id: app_id,
        uid: app_uid,
        secret,
        name: name.to_string(),
        note: note.map(str::to_string),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

pub fn find_app_by_uid(uid: &str, conn: &Connection) -> Result<Option<App>> {
    let app = conn
        .query_row(
            &format!(
                "SELECT {} FROM apps WHERE uid = ?1 AND deleted_at IS NULL",
                APP_COLUMNS
            ),
            params![uid],
            App::from_row,
        )
        .optional()?;
    Ok(app)
}

pub fn find_app_by_id(id: i64, conn: &Connection) -> Result<App> {
    let app = conn
        .query_row(
            &format!("SELECT {} FROM apps WHERE id = ?1", APP_COLUMNS),
            params![id],
            App::from_row,
        )
        .optional()?;
    app.ok_or(Error::InvalidApp)
}

/// Soft-delete an application
pub fn delete_app_soft(app: &App, conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE apps SET deleted_at = ?1 WHERE id = ?2",
        params![Utc::now(), app.id],
    )?;
    Ok(())
}
