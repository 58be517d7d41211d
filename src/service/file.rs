//! File and directory operations

use std::path::Path;

use bytes::Bytes;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::models::app::{self, App};
use crate::models::file::{self, base_name, parent_dir, File};
use crate::models::object_reader::ObjectReader;
use crate::models::token::Token;
use crate::service::errors::{rule, rule_from, ValidateErrors};
use crate::service::validate::{validate_path, validate_sort, validate_token};
use crate::uid;

const MAX_PATH_LENGTH: usize = 1000;

fn app_of(token: &Token, conn: &Connection) -> Result<App> {
    app::find_app_by_id(token.app_id, conn)
}

/// Create a file or directory, or grow/replace an existing file.
///
/// Without content the path becomes a directory chain. With content, the
/// behavior on an existing path is picked by exactly one of `overwrite`,
/// `append` and `rename`; with none set an occupied path is an error.
pub struct FileCreate {
    pub token: Token,
    pub path: String,
    pub hidden: bool,
    pub ip: Option<String>,
    pub content: Option<Bytes>,
    pub overwrite: bool,
    pub rename: bool,
    pub append: bool,
}

impl FileCreate {
    pub fn validate(&self, conn: &Connection) -> ValidateErrors {
        let mut errors = ValidateErrors::new();

        if [self.overwrite, self.rename, self.append]
            .iter()
            .filter(|flag| **flag)
            .count()
            > 1
        {
            errors.push(rule("FileCreate.Operate"));
        }

        if self.path.is_empty() || self.path.len() > MAX_PATH_LENGTH || !validate_path(&self.path)
        {
            errors.push(rule("FileCreate.Path"));
        }

        if let Err(err) = validate_token(conn, self.ip.as_deref(), false, &self.token) {
            errors.push(rule_from("FileCreate.Token", &err));
        }

        errors
    }

    pub fn execute(&mut self, root: &Path, conn: &Connection) -> Result<File> {
        let app = app_of(&self.token, conn)?;
        let save_path = self.token.path_with_scope(&self.path);

        self.token.decrement_available_times(conn)?;

        let content = match &self.content {
            None => return file::create_or_get_last_directory(&app, &save_path, conn),
            Some(content) => content.clone(),
        };

        let existing = file::find_file_by_path_with_trashed(&app, &save_path, conn)?;
        let mut existing = match existing {
            None => {
                return file::create_file_from_reader(
                    &app,
                    &save_path,
                    &mut content.as_ref(),
                    self.hidden,
                    root,
                    conn,
                )
            }
            Some(existing) => existing,
        };

        if existing.deleted_at.is_some() && (self.append || self.overwrite) {
            return Err(Error::FileDeleted);
        }

        if self.overwrite {
            existing.overwrite_from_reader(&mut content.as_ref(), self.hidden, root, conn)?;
            return Ok(existing);
        }

        if self.append {
            existing.append_from_reader(&mut content.as_ref(), self.hidden, root, conn)?;
            return Ok(existing);
        }

        if self.rename {
            let renamed = format!(
                "{}/{}_{}",
                parent_dir(&save_path),
                uid::random_md5(256),
                base_name(&save_path)
            );
            return file::create_file_from_reader(
                &app,
                &renamed,
                &mut content.as_ref(),
                self.hidden,
                root,
                conn,
            );
        }

        Err(Error::PathExists)
    }
}

/// Open a file for reading; also backs the metadata endpoint
pub struct FileRead {
    pub token: Token,
    pub file: File,
    pub ip: Option<String>,
}

impl FileRead {
    pub fn validate(&self, conn: &Connection) -> ValidateErrors {
        let mut errors = ValidateErrors::new();

        if let Err(err) = validate_token(conn, self.ip.as_deref(), true, &self.token) {
            errors.push(rule_from("FileRead.Token", &err));
        }

        match file::find_file_by_id(self.file.id, false, conn) {
            Ok(Some(file)) => {
                if let Err(err) = file.can_be_accessed_by_token(&self.token, conn) {
                    errors.push(rule_from("FileRead.Token", &err));
                }
            }
            Ok(None) => errors.push(rule_from(
                "FileRead.File",
                &Error::FileNotFound(self.file.uid.clone()),
            )),
            Err(err) => errors.push(rule_from("FileRead.File", &err)),
        }

        errors
    }

    pub fn execute(&mut self, root: &Path, conn: &Connection) -> Result<ObjectReader> {
        self.token.decrement_available_times(conn)?;

        if self.file.hidden {
            return Err(Error::ReadHidden);
        }
        self.file.reader(root, conn)
    }
}

/// Paginated listing of a directory's children
pub struct DirectoryList {
    pub token: Token,
    pub ip: Option<String>,
    pub sub_dir: String,
    pub sort: String,
    pub offset: i64,
    pub limit: i64,
}

pub struct DirectoryListResponse {
    pub total: i64,
    pub pages: i64,
    pub files: Vec<File>,
}

impl DirectoryList {
    pub fn validate(&self, conn: &Connection) -> ValidateErrors {
        let mut errors = ValidateErrors::new();

        if !validate_sort(&self.sort) {
            errors.push(rule("DirectoryList.Sort"));
        }
        if !validate_path(&self.sub_dir) {
            errors.push(rule("DirectoryList.SubDir"));
        }
        if self.offset < 0 {
            errors.push(rule("DirectoryList.Offset"));
        }
        if !(10..=20).contains(&self.limit) {
            errors.push(rule("DirectoryList.Limit"));
        }
        if let Err(err) = validate_token(conn, self.ip.as_deref(), false, &self.token) {
            errors.push(rule_from("DirectoryList.Token", &err));
        }

        errors
    }

    pub fn execute(&mut self, conn: &Connection) -> Result<DirectoryListResponse> {
        let app = app_of(&self.token, conn)?;
        let dir_path = self.token.path_with_scope(&self.sub_dir);

        self.token.decrement_available_times(conn)?;

        let dir = file::find_file_by_path(&app, &dir_path, false, false, conn)?
            .ok_or_else(|| Error::FileNotFound(dir_path.clone()))?;
        if !dir.is_dir {
            return Err(Error::ListFile);
        }

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE pid = ?1 AND deleted_at IS NULL",
            [dir.id],
            |row| row.get(0),
        )?;
        let pages = (total + self.limit - 1) / self.limit;

        let (key, order) = match self.sort.trim_start_matches('-') {
            "name" => ("name", self.sort.starts_with('-')),
            "time" => ("updated_at", self.sort.starts_with('-')),
            _ => ("is_dir", self.sort.starts_with('-')),
        };
        let direction = if order { "DESC" } else { "ASC" };

        let mut stmt = conn.prepare(&format!(
            "SELECT id, uid, pid, app_id, object_id, size, name, ext, is_dir, hidden,
                    download_count, created_at, updated_at, deleted_at
             FROM files WHERE pid = ?1 AND deleted_at IS NULL
             ORDER BY {} {} LIMIT ?2 OFFSET ?3",
            key, direction
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![dir.id, self.limit, self.offset],
            File::from_row,
        )?;
        let files = rows.collect::<rusqlite::Result<_>>()?;

        Ok(DirectoryListResponse { total, pages, files })
    }
}

/// Move a file and/or toggle its hidden flag
pub struct FileUpdate {
    pub token: Token,
    pub file: File,
    pub ip: Option<String>,
    pub hidden: Option<bool>,
    pub path: Option<String>,
}

impl FileUpdate {
    pub fn validate(&self, conn: &Connection) -> ValidateErrors {
        let mut errors = ValidateErrors::new();

        if let Err(err) = validate_token(conn, self.ip.as_deref(), false, &self.token) {
            errors.push(rule_from("FileUpdate.Token", &err));
        }

        match file::find_file_by_id(self.file.id, false, conn) {
            Ok(Some(file)) => {
                if let Err(err) = file.can_be_accessed_by_token(&self.token, conn) {
                    errors.push(rule_from("FileUpdate.Token", &err));
                }
            }
            Ok(None) => errors.push(rule_from(
                "FileUpdate.File",
                &Error::FileNotFound(self.file.uid.clone()),
            )),
            Err(err) => errors.push(rule_from("FileUpdate.File", &err)),
        }

        if let Some(path) = &self.path {
            if path.is_empty() || path.len() > MAX_PATH_LENGTH || !validate_path(path) {
                errors.push(rule("FileUpdate.Path"));
            }
        }

        errors
    }

    pub fn execute(&mut self, conn: &Connection) -> Result<File> {
        let app = app_of(&self.token, conn)?;

        self.token.decrement_available_times(conn)?;

        if let Some(path) = &self.path {
            let target = self.token.path_with_scope(path);
            self.file.move_to(&app, &target, conn)?;
        }

        if let Some(hidden) = self.hidden {
            self.file.hidden = hidden;
            conn.execute(
                "UPDATE files SET hidden = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![hidden as i64, chrono::Utc::now(), self.file.id],
            )?;
        }

        Ok(self.file.clone())
    }
}

/// Soft-delete a file or directory
pub struct FileDelete {
    pub token: Token,
    pub file: File,
    pub force: bool,
    pub ip: Option<String>,
}

impl FileDelete {
    pub fn validate(&self, conn: &Connection) -> ValidateErrors {
        let mut errors = ValidateErrors::new();

        if let Err(err) = validate_token(conn, self.ip.as_deref(), false, &self.token) {
            errors.push(rule_from("FileDelete.Token", &err));
        }

        match file::find_file_by_id(self.file.id, false, conn) {
            Ok(Some(file)) => {
                if let Err(err) = file.can_be_accessed_by_token(&self.token, conn) {
                    errors.push(rule_from("FileDelete.Token", &err));
                }
            }
            Ok(None) => errors.push(rule_from(
                "FileDelete.File",
                &Error::FileNotFound(self.file.uid.clone()),
            )),
            Err(err) => errors.push(rule_from("FileDelete.File", &err)),
        }

        errors
    }

    pub fn execute(&mut self, conn: &Connection) -> Result<File> {
        self.token.decrement_available_times(conn)?;
        self.file.delete(self.force, conn)?;
        Ok(self.file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{migrate, Database};
    use crate::digest::sha256_hex;
    use crate::models::token::create_token;
    use tempfile::TempDir;

    fn setup() -> (Database, TempDir, Token) {
        let db = Database::open_in_memory().unwrap();
        let token = {
            let conn = db.blocking_lock();
            migrate::upgrade(&conn).unwrap();
            let app = app::create_app("demo", None, &conn).unwrap();
            create_token(&app, "/", None, None, None, -1, false, &conn).unwrap()
        };
        (db, tempfile::tempdir().unwrap(), token)
    }

    fn create_service(token: &Token, path: &str, content: &[u8]) -> FileCreate {
        FileCreate {
            token: token.clone(),
            path: path.to_string(),
            hidden: false,
            ip: None,
            content: Some(Bytes::copy_from_slice(content)),
            overwrite: false,
            rename: false,
            append: false,
        }
    }

    #[test]
    fn test_create_then_conflict_then_overwrite() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        let mut create = create_service(&token, "/f.txt", b"one");
        assert!(create.validate(&conn).is_empty());
        let file = create.execute(dir.path(), &conn).unwrap();
        assert_eq!(file.size, 3);

        let mut again = create_service(&token, "/f.txt", b"two");
        assert!(matches!(again.execute(dir.path(), &conn), Err(Error::PathExists)));

        let mut overwrite = create_service(&token, "/f.txt", b"three");
        overwrite.overwrite = true;
        let file = overwrite.execute(dir.path(), &conn).unwrap();
        assert_eq!(file.size, 5);
        assert_eq!(file.object(&conn).unwrap().hash, sha256_hex(b"three"));
    }

    #[test]
    fn test_create_append_accumulates() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        create_service(&token, "/log", b"part1-").execute(dir.path(), &conn).unwrap();

        let mut append = create_service(&token, "/log", b"part2");
        append.append = true;
        let file = append.execute(dir.path(), &conn).unwrap();
        assert_eq!(file.size, 11);
        assert_eq!(file.object(&conn).unwrap().hash, sha256_hex(b"part1-part2"));
    }

    #[test]
    fn test_create_rename_collision() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        create_service(&token, "/dup", b"a").execute(dir.path(), &conn).unwrap();

        let mut rename = create_service(&token, "/dup", b"b");
        rename.rename = true;
        let file = rename.execute(dir.path(), &conn).unwrap();
        assert!(file.name.ends_with("_dup"));
        assert_ne!(file.path(&conn).unwrap(), "/dup");
    }

    #[test]
    fn test_create_directory_without_content() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();
        let _ = dir;

        let mut mkdir = FileCreate {
            token: token.clone(),
            path: "/a/b/c".to_string(),
            hidden: false,
            ip: None,
            content: None,
            overwrite: false,
            rename: false,
            append: false,
        };
        let created = mkdir.execute(Path::new("/nonexistent"), &conn).unwrap();
        assert!(created.is_dir);
        assert_eq!(created.path(&conn).unwrap(), "/a/b/c");
    }

    #[test]
    fn test_exclusive_flags_rejected() {
        let (db, _dir, token) = setup();
        let conn = db.blocking_lock();

        let mut service = create_service(&token, "/x", b"x");
        service.overwrite = true;
        service.append = true;
        let errors = service.validate(&conn);
        assert!(errors.contains_code(10022));
    }

    #[test]
    fn test_read_hidden_file_rejected() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        let mut create = create_service(&token, "/secret", b"shh");
        create.hidden = true;
        let file = create.execute(dir.path(), &conn).unwrap();

        let mut read = FileRead {
            token: token.clone(),
            file,
            ip: None,
        };
        assert!(read.validate(&conn).is_empty());
        assert!(matches!(
            read.execute(dir.path(), &conn),
            Err(Error::ReadHidden)
        ));
    }

    #[test]
    fn test_scope_denies_foreign_file() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        let file = create_service(&token, "/private/f", b"x")
            .execute(dir.path(), &conn)
            .unwrap();

        let app = app::find_app_by_id(token.app_id, &conn).unwrap();
        let scoped = create_token(&app, "/public", None, None, None, -1, false, &conn).unwrap();

        let read = FileRead {
            token: scoped,
            file,
            ip: None,
        };
        let errors = read.validate(&conn);
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_directory_list_pagination_and_sort() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        for name in ["b", "a", "c"] {
            create_service(&token, &format!("/docs/{}", name), name.as_bytes())
                .execute(dir.path(), &conn)
                .unwrap();
        }

        let mut list = DirectoryList {
            token: token.clone(),
            ip: None,
            sub_dir: "/docs".to_string(),
            sort: "name".to_string(),
            offset: 0,
            limit: 10,
        };
        assert!(list.validate(&conn).is_empty());
        let response = list.execute(&conn).unwrap();
        assert_eq!(response.total, 3);
        assert_eq!(response.pages, 1);
        let names: Vec<_> = response.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let bad = DirectoryList {
            token: token.clone(),
            ip: None,
            sub_dir: "/docs".to_string(),
            sort: "size".to_string(),
            offset: 0,
            limit: 5,
        };
        let errors = bad.validate(&conn);
        assert!(errors.contains_code(10032));
        assert!(errors.contains_code(10035));
    }

    #[test]
    fn test_list_file_rejected() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        create_service(&token, "/plain", b"x").execute(dir.path(), &conn).unwrap();

        let mut list = DirectoryList {
            token: token.clone(),
            ip: None,
            sub_dir: "/plain".to_string(),
            sort: "-type".to_string(),
            offset: 0,
            limit: 10,
        };
        assert!(matches!(list.execute(&conn), Err(Error::ListFile)));
    }

    #[test]
    fn test_update_moves_and_hides() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        let file = create_service(&token, "/old/f", b"x").execute(dir.path(), &conn).unwrap();

        let mut update = FileUpdate {
            token: token.clone(),
            file,
            ip: None,
            hidden: Some(true),
            path: Some("/new/g".to_string()),
        };
        assert!(update.validate(&conn).is_empty());
        let updated = update.execute(&conn).unwrap();
        assert_eq!(updated.path(&conn).unwrap(), "/new/g");

        let reloaded = file::find_file_by_uid(&updated.uid, false, &conn)
            .unwrap()
            .unwrap();
        assert!(reloaded.hidden);
    }

    #[test]
    fn test_delete_requires_force_for_populated_dir() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        create_service(&token, "/junk/a", b"1").execute(dir.path(), &conn).unwrap();
        let folder = file::find_file_by_path(
            &app::find_app_by_id(token.app_id, &conn).unwrap(),
            "/junk",
            false,
            false,
            &conn,
        )
        .unwrap()
        .unwrap();

        let mut delete = FileDelete {
            token: token.clone(),
            file: folder.clone(),
            force: false,
            ip: None,
        };
        assert!(matches!(delete.execute(&conn), Err(Error::DeleteNonEmptyDir)));

        let mut force = FileDelete {
            token: token.clone(),
            file: folder,
            force: true,
            ip: None,
        };
        let deleted = force.execute(&conn).unwrap();
        assert!(deleted.deleted_at.is_some());
    }

    #[test]
    fn test_deleted_file_rejects_append_and_overwrite() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        let mut file = create_service(&token, "/gone", b"x").execute(dir.path(), &conn).unwrap();
        file.delete(false, &conn).unwrap();

        let mut append = create_service(&token, "/gone", b"y");
        append.append = true;
        assert!(matches!(
            append.execute(dir.path(), &conn),
            Err(Error::FileDeleted)
        ));

        // Plain create on a trashed path conflicts too.
        let mut create = create_service(&token, "/gone", b"y");
        assert!(matches!(
            create.execute(dir.path(), &conn),
            Err(Error::PathExists)
        ));
    }

    #[test]
    fn test_quota_decrements_per_request() {
        let (db, dir, token) = setup();
        let conn = db.blocking_lock();

        let app = app::find_app_by_id(token.app_id, &conn).unwrap();
        let limited = create_token(&app, "/", None, None, None, 2, false, &conn).unwrap();

        let mut first = create_service(&limited, "/q1", b"x");
        first.execute(dir.path(), &conn).unwrap();
        let mut second = create_service(&limited, "/q2", b"x");
        // The service reloads the persisted count through validate.
        let reloaded = validate_token(&conn, None, false, &second.token).unwrap();
        assert_eq!(reloaded.available_times, 1);
        second.token = reloaded;
        second.execute(dir.path(), &conn).unwrap();

        let third = create_service(&limited, "/q3", b"x");
        let errors = third.validate(&conn);
        assert!(!errors.is_empty());
    }
}
