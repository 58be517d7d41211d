//! Access tokens: path-scoped, use-limited credentials

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::app::App;
use crate::uid;

/// Sentinel for tokens without a use quota
pub const UNLIMITED_TIMES: i64 = -1;

#[derive(Debug, Clone)]
pub struct Token {
    pub id: i64,
    pub uid: String,
    pub secret: Option<String>,
    pub app_id: i64,
    pub ip: Option<String>,
    pub available_times: i64,
    pub read_only: bool,
    pub path: String,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

const TOKEN_COLUMNS: &str = "id, uid, secret, app_id, ip, available_times, read_only, path, \
                             expired_at, created_at, updated_at, deleted_at";

/// A token path always begins with `/`
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

impl Token {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uid: row.get(1)?,
            secret: row.get(2)?,
            app_id: row.get(3)?,
            ip: row.get(4)?,
            available_times: row.get(5)?,
            read_only: row.get::<_, i64>(6)? != 0,
            path: row.get(7)?,
            expired_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            deleted_at: row.get(11)?,
        })
    }

    /// Resolve a request path inside this token's scope
    pub fn path_with_scope(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.path.trim_end_matches('/'),
            path.trim_matches('/')
        )
    }

    /// A token without an allow-list accepts every address
    pub fn allow_ip(&self, ip: &str) -> bool {
        match &self.ip {
            Some(list) => list.contains(ip),
            None => true,
        }
    }

    /// Burn one use; unlimited tokens are left untouched
    pub fn decrement_available_times(&mut self, conn: &Connection) -> Result<()> {
        if self.available_times == UNLIMITED_TIMES {
            return Ok(());
        }
        self.available_times -= 1;
        conn.execute(
            "UPDATE tokens SET available_times = ?1, updated_at = ?2 WHERE id = ?3",
            params![self.available_times, Utc::now(), self.id],
        )?;
        Ok(())
    }

    /// Persist mutable fields
    pub fn save(&mut self, conn: &Connection) -> Result<()> {
        self.path = normalize_path(&self.path);
        let now = Utc::now();
        conn.execute(
            "UPDATE tokens
             SET secret = ?1, ip = ?2, available_times = ?3, read_only = ?4, path = ?5,
                 expired_at = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                self.secret,
                self.ip,
                self.available_times,
                self.read_only as i64,
                self.path,
                self.expired_at,
                now,
                self.id
            ],
        )?;
        self.updated_at = now;
        Ok(())
    }

    /// Soft-delete this token
    pub fn soft_delete(&mut self, conn: &Connection) -> Result<()> {
        let now = Utc::now();
        conn.execute(
            "UPDATE tokens SET deleted_at = ?1 WHERE id = ?2",
            params![now, self.id],
        )?;
        self.deleted_at = Some(now);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
pub fn create_token(
    app: &App,
    path: &str,
    expired_at: Option<DateTime<Utc>>,
    ip: Option<&str>,
    secret: Option<&str>,
    available_times: i64,
    read_only: bool,
    conn: &Connection,
) -> Result<Token> {
    let now = Utc::now();
    let token_uid = uid::uid();
    let path = normalize_path(path);
    conn.execute(
        "INSERT INTO tokens (uid, secret, app_id, ip, available_times, read_only, path,
                             expired_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            token_uid,
            secret,
            app.id,
            ip,
            available_times,
            read_only as i64,
            path,
            expired_at,
            now,
            now
        ],
    )?;
    Ok(Token {
        id: conn.last_insert_rowid(),
        uid: token_uid,
        secret: secret.map(str::to_string),
        app_id: app.id,
        ip: ip.map(str::to_string),
        available_times,
        read_only,
        path,
        expired_at,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

pub fn find_token_by_uid(uid: &str, trashed: bool, conn: &Connection) -> Result<Option<Token>> {
    let scope = if trashed { "" } else { " AND deleted_at IS NULL" };
    let token = conn
        .query_row(
            &format!("SELECT {} FROM tokens WHERE uid = ?1{}", TOKEN_COLUMNS, scope),
            params![uid],
            Token::from_row,
        )
        .optional()?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{migrate, Database};
    use crate::models::app::create_app;

    fn setup() -> (Database, App) {
        let db = Database::open_in_memory().unwrap();
        let app = {
            let conn = db.blocking_lock();
            migrate::upgrade(&conn).unwrap();
            create_app("demo", None, &conn).unwrap()
        };
        (db, app)
    }

    #[test]
    fn test_path_scope() {
        let (db, app) = setup();
        let conn = db.blocking_lock();
        let token =
            create_token(&app, "/scope/", None, None, None, UNLIMITED_TIMES, false, &conn).unwrap();

        assert_eq!(token.path_with_scope("a/b"), "/scope/a/b");
        assert_eq!(token.path_with_scope("/a/b/"), "/scope/a/b");
        assert_eq!(token.path_with_scope("/"), "/scope/");
    }

    #[test]
    fn test_path_normalized_on_create() {
        let (db, app) = setup();
        let conn = db.blocking_lock();
        let token =
            create_token(&app, "uploads", None, None, None, UNLIMITED_TIMES, false, &conn).unwrap();
        assert_eq!(token.path, "/uploads");
    }

    #[test]
    fn test_ip_allow_list() {
        let (db, app) = setup();
        let conn = db.blocking_lock();
        let open =
            create_token(&app, "/", None, None, None, UNLIMITED_TIMES, false, &conn).unwrap();
        assert!(open.allow_ip("10.0.0.1"));

        let scoped = create_token(
            &app,
            "/",
            None,
            Some("192.168.0.1,192.168.0.2"),
            None,
            UNLIMITED_TIMES,
            false,
            &conn,
        )
        .unwrap();
        assert!(scoped.allow_ip("192.168.0.2"));
        assert!(!scoped.allow_ip("10.0.0.1"));
    }

    #[test]
    fn test_decrement_persists() {
        let (db, app) = setup();
        let conn = db.blocking_lock();
        let mut token = create_token(&app, "/", None, None, None, 2, false, &conn).unwrap();

        token.decrement_available_times(&conn).unwrap();
        let reloaded = find_token_by_uid(&token.uid, false, &conn).unwrap().unwrap();
        assert_eq!(reloaded.available_times, 1);

        let mut unlimited =
            create_token(&app, "/", None, None, None, UNLIMITED_TIMES, false, &conn).unwrap();
        unlimited.decrement_available_times(&conn).unwrap();
        assert_eq!(unlimited.available_times, UNLIMITED_TIMES);
    }

    #[test]
    fn test_soft_delete_hides_token() {
        let (db, app) = setup();
        let conn = db.blocking_lock();
        let mut token =
            create_token(&app, "/", None, None, None, UNLIMITED_TIMES, false, &conn).unwrap();

        token.soft_delete(&conn).unwrap();
        assert!(find_token_by_uid(&token.uid, false, &conn).unwrap().is_none());
        assert!(find_token_by_uid(&token.uid, true, &conn).unwrap().is_some());
    }
}
