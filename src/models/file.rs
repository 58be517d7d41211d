//! Directory tree
//!
//! Files form a per-application tree keyed by `(app_id, pid, name)`; the
//! root row has `pid = 0` and an empty name. Leaves reference an object,
//! directories carry the recursive size of their non-trashed children.
//! Deletion is soft: rows keep a `deleted_at` timestamp and default lookups
//! exclude them.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::app::App;
use crate::models::history;
use crate::models::object::{self, Object};
use crate::models::object_reader::ObjectReader;
use crate::models::path_cache::{self, cache_key};
use crate::models::token::Token;
use crate::uid;

#[derive(Debug, Clone)]
pub struct File {
    pub id: i64,
    pub uid: String,
    pub pid: i64,
    pub app_id: i64,
    pub object_id: i64,
    pub size: i64,
    pub name: String,
    pub ext: String,
    pub is_dir: bool,
    pub hidden: bool,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

const FILE_COLUMNS: &str = "id, uid, pid, app_id, object_id, size, name, ext, is_dir, hidden, \
                            download_count, created_at, updated_at, deleted_at";

/// Everything before the last path segment; `/f` has parent `/`
pub(crate) fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => trimmed[..pos].to_string(),
    }
}

/// The last path segment
pub(crate) fn base_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => trimmed[pos + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// The extension of a file name, without the dot
fn ext_of(name: &str) -> String {
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => name[pos + 1..].to_string(),
        _ => String::new(),
    }
}

impl File {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uid: row.get(1)?,
            pid: row.get(2)?,
            app_id: row.get(3)?,
            object_id: row.get(4)?,
            size: row.get(5)?,
            name: row.get(6)?,
            ext: row.get(7)?,
            is_dir: row.get::<_, i64>(8)? != 0,
            hidden: row.get::<_, i64>(9)? != 0,
            download_count: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            deleted_at: row.get(13)?,
        })
    }

    /// Absolute path of this row, assembled by walking parent links
    pub fn path(&self, conn: &Connection) -> Result<String> {
        if self.pid == 0 && self.is_dir {
            return Ok("/".to_string());
        }

        let mut parts = Vec::new();
        let mut current = self.clone();
        loop {
            parts.push(current.name.clone());
            if current.pid == 0 {
                break;
            }
            current = find_file_by_id(current.pid, true, conn)?
                .ok_or_else(|| Error::FileNotFound(current.pid.to_string()))?;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    /// Apply a size delta to this row and every ancestor up to the root
    pub fn update_parent_size(&self, delta: i64, conn: &Connection) -> Result<()> {
        let mut ids = Vec::new();
        let mut current = self.clone();
        loop {
            ids.push(current.id.to_string());
            if current.pid == 0 {
                break;
            }
            current = find_file_by_id(current.pid, true, conn)?
                .ok_or_else(|| Error::FileNotFound(current.pid.to_string()))?;
        }

        conn.execute(
            &format!(
                "UPDATE files SET size = size + ?1 WHERE id IN ({})",
                ids.join(",")
            ),
            params![delta],
        )?;
        Ok(())
    }

    /// A file is visible to a token iff its absolute path sits under the
    /// token's scope prefix
    pub fn can_be_accessed_by_token(&self, token: &Token, conn: &Connection) -> Result<()> {
        let path = self.path(conn)?;
        if !path.starts_with(&token.path) {
            return Err(Error::AccessDenied);
        }
        Ok(())
    }

    /// A seekable reader over the referenced object
    pub fn reader(&self, root: &Path, conn: &Connection) -> Result<ObjectReader> {
        if self.is_dir {
            return Err(Error::ReadDir);
        }
        let object = object::find_object_by_id(self.object_id, conn)?;
        object.reader(root, conn)
    }

    /// The referenced object row
    pub fn object(&self, conn: &Connection) -> Result<Object> {
        object::find_object_by_id(self.object_id, conn)
    }

    /// Non-trashed children of a directory
    pub fn children(&self, conn: &Connection) -> Result<Vec<File>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM files WHERE pid = ?1 AND deleted_at IS NULL",
            FILE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![self.id], File::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn create_history(&self, object_id: i64, path: &str, conn: &Connection) -> Result<()> {
        history::create_history(object_id, self.id, path, conn)
    }

    /// Replace the content with a new object built from `reader`.
    ///
    /// The previous object is preserved in a history row; the size delta is
    /// propagated up the parent chain.
    pub fn overwrite_from_reader(
        &mut self,
        reader: &mut dyn Read,
        hidden: bool,
        root: &Path,
        conn: &Connection,
    ) -> Result<()> {
        if self.is_dir {
            return Err(Error::OverwriteDir);
        }

        let path = self.path(conn)?;
        self.create_history(self.object_id, &path, conn)?;

        let object = object::create_object_from_reader(reader, root, conn)?;
        let size_diff = object.size - self.size;
        self.object_id = object.id;
        self.hidden = hidden;
        self.size += size_diff;

        conn.execute(
            "UPDATE files SET object_id = ?1, hidden = ?2, size = ?3, updated_at = ?4 WHERE id = ?5",
            params![self.object_id, self.hidden as i64, self.size, Utc::now(), self.id],
        )?;

        let parent = find_file_by_id(self.pid, true, conn)?
            .ok_or_else(|| Error::FileNotFound(self.pid.to_string()))?;
        parent.update_parent_size(size_diff, conn)
    }

    /// Extend the referenced object with `reader`, without rescanning the
    /// bytes already stored. Appends write no history row.
    pub fn append_from_reader(
        &mut self,
        reader: &mut dyn Read,
        hidden: bool,
        root: &Path,
        conn: &Connection,
    ) -> Result<()> {
        if self.is_dir {
            return Err(Error::AppendToDir);
        }

        let object = object::find_object_by_id(self.object_id, conn)?;
        let (object, added) = object.append_from_reader(reader, root, conn)?;

        self.hidden = hidden;
        self.size += added as i64;
        self.object_id = object.id;

        conn.execute(
            "UPDATE files SET hidden = ?1, size = ?2, object_id = ?3, updated_at = ?4 WHERE id = ?5",
            params![self.hidden as i64, self.size, self.object_id, Utc::now(), self.id],
        )?;

        let parent = find_file_by_id(self.pid, true, conn)?
            .ok_or_else(|| Error::FileNotFound(self.pid.to_string()))?;
        parent.update_parent_size(added as i64, conn)
    }

    /// Move or rename this row.
    ///
    /// Fails when the destination resolves, trashed rows included. Leaf
    /// moves write a history row with the previous path. A rename inside
    /// the same directory only touches name and extension; a move across
    /// directories re-parents the row and shifts sizes between the two
    /// chains.
    pub fn move_to(&mut self, app: &App, new_path: &str, conn: &Connection) -> Result<()> {
        let new_dir = parent_dir(new_path);
        let new_name = base_name(new_path);
        let new_ext = ext_of(&new_name);

        let previous_path = self.path(conn)?;
        if previous_path == new_path {
            return Ok(());
        }

        if find_file_by_path(app, new_path, true, true, conn)?.is_some() {
            return Err(Error::FileExists);
        }

        let new_parent = create_or_get_last_directory(app, &new_dir, conn)?;

        if !self.is_dir {
            self.create_history(self.object_id, &previous_path, conn)?;
        }

        self.name = new_name;
        self.ext = new_ext;

        if new_parent.id == self.pid {
            conn.execute(
                "UPDATE files SET name = ?1, ext = ?2, updated_at = ?3 WHERE id = ?4",
                params![self.name, self.ext, Utc::now(), self.id],
            )?;
        } else {
            let old_parent = find_file_by_id(self.pid, true, conn)?
                .ok_or_else(|| Error::FileNotFound(self.pid.to_string()))?;

            new_parent.update_parent_size(self.size, conn)?;
            old_parent.update_parent_size(-self.size, conn)?;

            self.pid = new_parent.id;
            conn.execute(
                "UPDATE files SET pid = ?1, name = ?2, ext = ?3, updated_at = ?4 WHERE id = ?5",
                params![self.pid, self.name, self.ext, Utc::now(), self.id],
            )?;
        }

        let mut cache = path_cache::shared();
        cache.remove(&cache_key(&app.uid, &previous_path));
        cache.put(cache_key(&app.uid, &self.path(conn)?), self.id);
        Ok(())
    }

    fn soft_delete_row(id: i64, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE files SET deleted_at = ?1 WHERE id = ?2",
            params![Utc::now(), id],
        )?;
        Ok(())
    }

    fn execute_delete(&self, force: bool, conn: &Connection) -> Result<()> {
        if !self.is_dir {
            return Self::soft_delete_row(self.id, conn);
        }

        let children = self.children(conn)?;
        if children.is_empty() {
            return Self::soft_delete_row(self.id, conn);
        }
        if !force {
            return Err(Error::DeleteNonEmptyDir);
        }

        for child in &children {
            child.execute_delete(force, conn)?;
        }
        conn.execute("UPDATE files SET size = 0 WHERE id = ?1", params![self.id])?;
        Self::soft_delete_row(self.id, conn)
    }

    /// Soft-delete this row; recursive when `force` is set.
    ///
    /// The freed size is subtracted from every ancestor, and the struct is
    /// reloaded so `deleted_at` reflects the store.
    pub fn delete(&mut self, force: bool, conn: &Connection) -> Result<()> {
        let origin_size = self.size;
        let parent = if self.pid != 0 {
            find_file_by_id(self.pid, true, conn)?
        } else {
            None
        };

        self.execute_delete(force, conn)?;

        if origin_size != 0 {
            if let Some(parent) = parent {
                parent.update_parent_size(-origin_size, conn)?;
            }
        }

        *self = find_file_by_id(self.id, true, conn)?
            .ok_or_else(|| Error::FileNotFound(self.id.to_string()))?;
        Ok(())
    }
}

pub fn find_file_by_id(id: i64, trashed: bool, conn: &Connection) -> Result<Option<File>> {
    let scope = if trashed { "" } else { " AND deleted_at IS NULL" };
    let file = conn
        .query_row(
            &format!("SELECT {} FROM files WHERE id = ?1{}", FILE_COLUMNS, scope),
            params![id],
            File::from_row,
        )
        .optional()?;
    Ok(file)
}

pub fn find_file_by_uid(uid: &str, trashed: bool, conn: &Connection) -> Result<Option<File>> {
    let scope = if trashed { "" } else { " AND deleted_at IS NULL" };
    let file = conn
        .query_row(
            &format!("SELECT {} FROM files WHERE uid = ?1{}", FILE_COLUMNS, scope),
            params![uid],
            File::from_row,
        )
        .optional()?;
    Ok(file)
}

fn find_child(
    app_id: i64,
    pid: i64,
    name: &str,
    trashed: bool,
    conn: &Connection,
) -> Result<Option<File>> {
    let scope = if trashed { "" } else { " AND deleted_at IS NULL" };
    let file = conn
        .query_row(
            &format!(
                "SELECT {} FROM files WHERE app_id = ?1 AND pid = ?2 AND name = ?3{}",
                FILE_COLUMNS, scope
            ),
            params![app_id, pid, name],
            File::from_row,
        )
        .optional()?;
    Ok(file)
}

/// The application's root directory row
pub fn create_or_get_root(app: &App, conn: &Connection) -> Result<File> {
    find_child(app.id, 0, "", false, conn)?
        .ok_or_else(|| Error::FileNotFound(format!("root of app {}", app.id)))
}

/// Resolve a path to a file row.
///
/// Cached resolutions are revalidated by id so a stale entry never resurrects
/// a deleted row.
pub fn find_file_by_path(
    app: &App,
    path: &str,
    trashed: bool,
    use_cache: bool,
    conn: &Connection,
) -> Result<Option<File>> {
    let key = cache_key(&app.uid, path);

    if use_cache {
        let cached = path_cache::shared().get(&key);
        if let Some(id) = cached {
            match find_file_by_id(id, trashed, conn)? {
                Some(file) => return Ok(Some(file)),
                None => path_cache::shared().remove(&key),
            }
        }
    }

    let trimmed = path.trim().trim_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();

    let mut parent: Option<File> = if parts[0].is_empty() {
        None
    } else {
        Some(create_or_get_root(app, conn)?)
    };

    for part in parts {
        let pid = parent.as_ref().map(|p| p.id).unwrap_or(0);
        match find_child(app.id, pid, part, trashed, conn)? {
            Some(file) => parent = Some(file),
            None => return Ok(None),
        }
    }

    if use_cache {
        if let Some(found) = &parent {
            path_cache::shared().put(key, found.id);
        }
    }
    Ok(parent)
}

/// Resolve a path, trashed rows included
pub fn find_file_by_path_with_trashed(
    app: &App,
    path: &str,
    conn: &Connection,
) -> Result<Option<File>> {
    find_file_by_path(app, path, true, true, conn)
}

/// Walk `dir_path`, inserting a directory row for every missing segment,
/// and return the terminal directory
pub fn create_or_get_last_directory(app: &App, dir_path: &str, conn: &Connection) -> Result<File> {
    let trimmed = dir_path.trim().trim_end_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();

    // A leading empty segment resolves the root through the pid = 0 walk;
    // a relative path anchors at the root row directly.
    let mut parent: Option<File> = if parts[0].is_empty() {
        None
    } else {
        Some(create_or_get_root(app, conn)?)
    };

    for part in parts {
        let pid = parent.as_ref().map(|p| p.id).unwrap_or(0);
        let file = match find_child(app.id, pid, part, false, conn)? {
            Some(file) => file,
            None => {
                let now = Utc::now();
                conn.execute(
                    "INSERT INTO files (uid, pid, app_id, object_id, size, name, ext, is_dir,
                                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, 0, 0, ?4, '', 1, ?5, ?6)",
                    params![uid::uid(), pid, app.id, part, now, now],
                )?;
                find_child(app.id, pid, part, false, conn)?
                    .ok_or_else(|| Error::FileNotFound(part.to_string()))?
            }
        };
        parent = Some(file);
    }

    parent.ok_or(Error::InvalidPath)
}

/// Create a leaf at `save_path` from a stream.
///
/// Fails when the path already resolves, trashed rows included. Intermediate
/// directories are created and the new object's size is propagated up the
/// parent chain.
pub fn create_file_from_reader(
    app: &App,
    save_path: &str,
    reader: &mut dyn Read,
    hidden: bool,
    root: &Path,
    conn: &Connection,
) -> Result<File> {
    if find_file_by_path_with_trashed(app, save_path, conn)?.is_some() {
        return Err(Error::FileExists);
    }

    let dir_prefix = parent_dir(save_path);
    let file_name = base_name(save_path);

    let parent = create_or_get_last_directory(app, &dir_prefix, conn)?;
    let object = object::create_object_from_reader(reader, root, conn)?;

    let now = Utc::now();
    conn.execute(
        "INSERT INTO files (uid, pid, app_id, object_id, size, name, ext, is_dir, hidden,
                            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10)",
        params![
            uid::uid(),
            parent.id,
            app.id,
            object.id,
            object.size,
            file_name,
            ext_of(&file_name),
            hidden as i64,
            now,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();

    parent.update_parent_size(object.size, conn)?;

    find_file_by_id(id, false, conn)?.ok_or_else(|| Error::FileNotFound(save_path.to_string()))
}
