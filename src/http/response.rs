//! Response envelope and resource serializers
//!
//! Every JSON endpoint answers `{requestId, success, errors, data}`; errors
//! map a field name to a list of messages.

use std::collections::HashMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::file::File;
use crate::models::object;
use crate::models::token::Token;
use crate::service::ValidateErrors;

#[derive(Debug, Serialize)]
pub struct Envelope {
    #[serde(rename = "requestId")]
    pub request_id: i64,
    pub success: bool,
    pub errors: Option<HashMap<String, Vec<String>>>,
    pub data: Option<Value>,
}

impl Envelope {
    pub fn ok(request_id: i64, data: Value) -> Self {
        Self {
            request_id,
            success: true,
            errors: None,
            data: Some(data),
        }
    }

    pub fn failed(request_id: i64, errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            request_id,
            success: false,
            errors: Some(errors),
            data: None,
        }
    }

    pub fn error(request_id: i64, field: &str, err: &Error) -> Self {
        Self::failed(request_id, error_map(field, err))
    }

    pub fn message(request_id: i64, field: &str, message: &str) -> Self {
        Self::failed(request_id, message_map(field, message))
    }

    pub fn validation(request_id: i64, errors: &ValidateErrors) -> Self {
        Self::failed(request_id, errors.map_field_errors())
    }

    /// Render with the given status
    pub fn respond(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }

    /// Render as a 400 validation/business failure
    pub fn bad_request(self) -> Response {
        self.respond(StatusCode::BAD_REQUEST)
    }
}

/// A single-field error map; an empty field lands under `system`
pub fn error_map(field: &str, err: &Error) -> HashMap<String, Vec<String>> {
    message_map(field, &err.to_string())
}

pub fn message_map(field: &str, message: &str) -> HashMap<String, Vec<String>> {
    let field = if field.is_empty() { "system" } else { field };
    let mut map = HashMap::with_capacity(1);
    map.insert(field.to_string(), vec![message.to_string()]);
    map
}

/// The wire shape of a token
pub fn token_resp(token: &Token) -> Value {
    let mut resp = json!({
        "token": token.uid,
        "ip": token.ip,
        "availableTimes": token.available_times,
        "readOnly": token.read_only as i64,
        "expiredAt": token.expired_at.map(|t| t.timestamp()),
        "path": token.path,
        "secret": token.secret,
    });
    if let Some(deleted_at) = token.deleted_at {
        resp["deletedAt"] = json!(deleted_at.timestamp());
    }
    resp
}

/// The wire shape of a file or directory
pub fn file_resp(file: &File, conn: &Connection) -> Result<Value> {
    let path = file.path(conn)?;
    let mut resp = json!({
        "fileUid": file.uid,
        "path": path,
        "size": file.size,
        "isDir": file.is_dir as i64,
        "hidden": file.hidden as i64,
    });

    if !file.is_dir {
        let object = object::find_object_by_id(file.object_id, conn)?;
        resp["hash"] = json!(object.hash);
        resp["ext"] = json!(file.ext);
    }
    if let Some(deleted_at) = file.deleted_at {
        resp["deletedAt"] = json!(deleted_at.timestamp());
    }

    Ok(resp)
}
