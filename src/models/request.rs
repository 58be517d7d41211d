//! Request audit rows, also the nonce store for replay protection

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: i64,
    pub protocol: String,
    pub app_id: Option<i64>,
    pub nonce: Option<String>,
    pub token: Option<String>,
    pub ip: Option<String>,
    pub method: Option<String>,
    pub service: Option<String>,
    pub request_body: String,
    pub request_header: String,
    pub response_code: i64,
    pub response_body: String,
    pub created_at: DateTime<Utc>,
}

const REQUEST_COLUMNS: &str = "id, protocol, app_id, nonce, token, ip, method, service, \
                               request_body, request_header, response_code, response_body, created_at";

impl RequestRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            protocol: row.get(1)?,
            app_id: row.get(2)?,
            nonce: row.get(3)?,
            token: row.get(4)?,
            ip: row.get(5)?,
            method: row.get(6)?,
            service: row.get(7)?,
            request_body: row.get(8)?,
            request_header: row.get(9)?,
            response_code: row.get(10)?,
            response_body: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

/// Record an inbound HTTP request before it is handled
pub fn create_http_request(
    ip: &str,
    method: &str,
    service: &str,
    request_header: &str,
    conn: &Connection,
) -> Result<RequestRecord> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO requests (protocol, ip, method, service, request_header, created_at)
         VALUES ('http', ?1, ?2, ?3, ?4, ?5)",
        params![ip, method, service, request_header, now],
    )?;
    Ok(RequestRecord {
        id: conn.last_insert_rowid(),
        protocol: "http".to_string(),
        app_id: None,
        nonce: None,
        token: None,
        ip: Some(ip.to_string()),
        method: Some(method.to_string()),
        service: Some(service.to_string()),
        request_body: String::new(),
        request_header: request_header.to_string(),
        response_code: 200,
        response_body: String::new(),
        created_at: now,
    })
}

/// Attach the authenticated caller and parsed body to a request row
pub fn update_request_context(
    request_id: i64,
    app_id: Option<i64>,
    token_uid: Option<&str>,
    nonce: Option<&str>,
    request_body: &str,
    conn: &Connection,
) -> Result<()> {
    conn.execute(
        "UPDATE requests SET app_id = ?1, token = ?2, nonce = ?3, request_body = ?4 WHERE id = ?5",
        params![app_id, token_uid, nonce, request_body, request_id],
    )?;
    Ok(())
}

/// Record the response once the handler is done
pub fn update_request_response(
    request_id: i64,
    response_code: i64,
    response_body: &str,
    conn: &Connection,
) -> Result<()> {
    conn.execute(
        "UPDATE requests SET response_code = ?1, response_body = ?2 WHERE id = ?3",
        params![response_code, response_body, request_id],
    )?;
    Ok(())
}

/// Look up a prior submission of `(app, nonce)` for replay detection
pub fn find_request_by_app_and_nonce(
    app_id: i64,
    nonce: &str,
    conn: &Connection,
) -> Result<Option<RequestRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM requests WHERE app_id = ?1 AND nonce = ?2",
                REQUEST_COLUMNS
            ),
            params![app_id, nonce],
            RequestRecord::from_row,
        )
        .optional()?;
    Ok(record)
}
