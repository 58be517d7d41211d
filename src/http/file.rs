//! File and directory handlers

use std::io::{Read, Seek, SeekFrom};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use rusqlite::Connection;
use serde_json::json;

use crate::db;
use crate::digest::sha256_hex;
use crate::error::Error;
use crate::http::middleware::{
    authenticate_token, client_ip, request_id_of, SkipBodyRecording,
};
use crate::http::params::Params;
use crate::http::range::{parse_range, RangeSpec};
use crate::http::response::{file_resp, Envelope};
use crate::http::ServerState;
use crate::models::file::{self, File};
use crate::models::object_reader::ObjectReader;
use crate::service::file::{DirectoryList, FileCreate, FileDelete, FileRead, FileUpdate};

const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

fn last_modified(file: &File) -> String {
    file.updated_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn disposition(file: &File, open_in_browser: bool) -> String {
    let kind = if open_in_browser { "inline" } else { "attachment" };
    format!("{}; filename=\"{}\"", kind, file.name)
}

/// POST /file/create
pub async fn file_create(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);
    let ip = client_ip(&req);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let mut conn = state.db.lock().await;
    let token = match authenticate_token(&conn, &params, true, request_id) {
        Ok(token) => token,
        Err(errors) => return Envelope::failed(request_id, errors).bad_request(),
    };

    // A client-supplied hash or size is verified before anything is written.
    if let Some(content) = &params.file {
        match params.integer("size") {
            Ok(Some(size)) if size != content.len() as i64 => {
                return Envelope::error(request_id, "size", &Error::SizeMismatch).bad_request();
            }
            Err(msg) => return Envelope::message(request_id, "size", &msg).bad_request(),
            _ => {}
        }
        if let Some(expected) = params.get("hash") {
            if sha256_hex(content) != expected {
                return Envelope::error(request_id, "hash", &Error::HashMismatch).bad_request();
            }
        }
    }

    let mut service = FileCreate {
        token,
        path: params.get("path").unwrap_or_default().to_string(),
        hidden: params.flag("hidden"),
        ip: Some(ip),
        content: params.file.clone(),
        overwrite: params.flag("overwrite"),
        rename: params.flag("rename"),
        append: params.flag("append"),
    };

    let errors = service.validate(&conn);
    if !errors.is_empty() {
        return Envelope::validation(request_id, &errors).bad_request();
    }

    let root = state.config.chunk.root_path.clone();
    let created = db::with_transaction(&mut conn, |tx| service.execute(&root, tx));
    match created {
        Ok(file) => match file_resp(&file, &conn) {
            Ok(data) => Envelope::ok(request_id, data).respond(StatusCode::OK),
            Err(err) => Envelope::error(request_id, "", &err).bad_request(),
        },
        Err(err) => Envelope::error(request_id, "", &err).bad_request(),
    }
}

/// Shared read-side prologue: authenticate, load the file, run the read
/// service (which burns one token use and refuses hidden files)
fn prepare_read(
    conn: &Connection,
    state: &ServerState,
    params: &Params,
    ip: String,
    request_id: i64,
) -> Result<(File, ObjectReader), Box<Envelope>> {
    let token = authenticate_token(conn, params, false, request_id)
        .map_err(|errors| Box::new(Envelope::failed(request_id, errors)))?;

    let file_uid = params.get("fileUid").unwrap_or_default();
    let file = match file::find_file_by_uid(file_uid, false, conn) {
        Ok(Some(file)) => file,
        _ => {
            return Err(Box::new(Envelope::error(
                request_id,
                "fileUid",
                &Error::FileNotFound(file_uid.to_string()),
            )))
        }
    };

    let mut service = FileRead {
        token,
        file,
        ip: Some(ip),
    };
    let errors = service.validate(conn);
    if !errors.is_empty() {
        return Err(Box::new(Envelope::validation(request_id, &errors)));
    }

    let reader = service
        .execute(&state.config.chunk.root_path, conn)
        .map_err(|err| Box::new(Envelope::error(request_id, "", &err)))?;
    Ok((service.file, reader))
}

fn content_response(
    request_id: i64,
    status: StatusCode,
    headers: Vec<(header::HeaderName, String)>,
    body: Vec<u8>,
) -> Response {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    match builder.body(Body::from(body)) {
        Ok(mut response) => {
            response.extensions_mut().insert(SkipBodyRecording);
            response
        }
        Err(err) => {
            Envelope::message(request_id, "system", &err.to_string()).bad_request()
        }
    }
}

/// GET /file/read
pub async fn file_read(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);
    let ip = client_ip(&req);
    let range_header = req
        .headers()
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let conn = state.db.lock().await;
    let (file, mut reader) = match prepare_read(&conn, &state, &params, ip, request_id) {
        Ok(prepared) => prepared,
        Err(envelope) => return envelope.bad_request(),
    };

    let object = match file.object(&conn) {
        Ok(object) => object,
        Err(err) => return Envelope::error(request_id, "", &err).bad_request(),
    };

    let spec = match &range_header {
        None => RangeSpec::Full,
        Some(header) => match parse_range(header, file.size) {
            Ok(spec) => spec,
            Err(err) => return Envelope::error(request_id, "", &err).bad_request(),
        },
    };

    let open_in_browser = params.flag("openInBrowser");
    let mut headers = vec![
        (header::ETAG, object.hash.clone()),
        (header::ACCEPT_RANGES, "bytes".to_string()),
        (header::CONTENT_TYPE, BINARY_CONTENT_TYPE.to_string()),
        (header::LAST_MODIFIED, last_modified(&file)),
        (header::CONTENT_DISPOSITION, disposition(&file, open_in_browser)),
    ];

    match spec {
        RangeSpec::Full => {
            let mut body = Vec::with_capacity(file.size as usize);
            if let Err(err) = reader.read_to_end(&mut body) {
                return Envelope::message(request_id, "system", &err.to_string()).bad_request();
            }
            content_response(request_id, StatusCode::OK, headers, body)
        }
        RangeSpec::Window { start, end } => {
            if let Err(err) = reader.seek(SeekFrom::Start(start as u64)) {
                return Envelope::message(request_id, "system", &err.to_string()).bad_request();
            }
            let length = (end - start + 1) as usize;
            let mut body = Vec::with_capacity(length);
            if let Err(err) = reader.take(length as u64).read_to_end(&mut body) {
                return Envelope::message(request_id, "system", &err.to_string()).bad_request();
            }
            headers.push((
                header::CONTENT_RANGE,
                format!("{}-{}/{}", start, end, file.size),
            ));
            content_response(request_id, StatusCode::PARTIAL_CONTENT, headers, body)
        }
    }
}

/// GET /file/info
///
/// Metadata only: the same gates as a read, the same headers, no body. A
/// malformed `Range` header is rejected with the read endpoint's parser.
pub async fn file_info(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);
    let ip = client_ip(&req);
    let range_header = req
        .headers()
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let conn = state.db.lock().await;
    let (file, _reader) = match prepare_read(&conn, &state, &params, ip, request_id) {
        Ok(prepared) => prepared,
        Err(envelope) => return envelope.bad_request(),
    };

    if let Some(header_value) = &range_header {
        if let Err(err) = parse_range(header_value, file.size) {
            return Envelope::error(request_id, "", &err).bad_request();
        }
    }

    let object = match file.object(&conn) {
        Ok(object) => object,
        Err(err) => return Envelope::error(request_id, "", &err).bad_request(),
    };

    let headers = vec![
        (header::ETAG, object.hash),
        (header::ACCEPT_RANGES, "bytes".to_string()),
        (header::CONTENT_TYPE, BINARY_CONTENT_TYPE.to_string()),
        (header::LAST_MODIFIED, last_modified(&file)),
        (header::CONTENT_DISPOSITION, disposition(&file, false)),
        (header::CONTENT_LENGTH, file.size.to_string()),
    ];
    content_response(request_id, StatusCode::OK, headers, Vec::new())
}

/// PATCH /file/update
pub async fn file_update(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);
    let ip = client_ip(&req);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let mut conn = state.db.lock().await;
    let token = match authenticate_token(&conn, &params, false, request_id) {
        Ok(token) => token,
        Err(errors) => return Envelope::failed(request_id, errors).bad_request(),
    };

    let file_uid = params.get("fileUid").unwrap_or_default();
    let file = match file::find_file_by_uid(file_uid, false, &conn) {
        Ok(Some(file)) => file,
        _ => {
            return Envelope::error(
                request_id,
                "fileUid",
                &Error::FileNotFound(file_uid.to_string()),
            )
            .bad_request()
        }
    };

    let mut service = FileUpdate {
        token,
        file,
        ip: Some(ip),
        hidden: params.get("hidden").map(|v| v == "1" || v == "true"),
        path: params.get("path").map(str::to_string),
    };

    let errors = service.validate(&conn);
    if !errors.is_empty() {
        return Envelope::validation(request_id, &errors).bad_request();
    }

    let updated = db::with_transaction(&mut conn, |tx| service.execute(tx));
    match updated {
        Ok(file) => match file_resp(&file, &conn) {
            Ok(data) => Envelope::ok(request_id, data).respond(StatusCode::OK),
            Err(err) => Envelope::error(request_id, "", &err).bad_request(),
        },
        Err(err) => Envelope::error(request_id, "", &err).bad_request(),
    }
}

/// DELETE /file/delete
pub async fn file_delete(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);
    let ip = client_ip(&req);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let mut conn = state.db.lock().await;
    let token = match authenticate_token(&conn, &params, false, request_id) {
        Ok(token) => token,
        Err(errors) => return Envelope::failed(request_id, errors).bad_request(),
    };

    let file_uid = params.get("fileUid").unwrap_or_default();
    let file = match file::find_file_by_uid(file_uid, false, &conn) {
        Ok(Some(file)) => file,
        _ => {
            return Envelope::error(
                request_id,
                "fileUid",
                &Error::FileNotFound(file_uid.to_string()),
            )
            .bad_request()
        }
    };

    let mut service = FileDelete {
        token,
        file,
        force: params.flag("force"),
        ip: Some(ip),
    };

    let errors = service.validate(&conn);
    if !errors.is_empty() {
        return Envelope::validation(request_id, &errors).bad_request();
    }

    let deleted = db::with_transaction(&mut conn, |tx| service.execute(tx));
    match deleted {
        Ok(file) => match file_resp(&file, &conn) {
            Ok(data) => Envelope::ok(request_id, data).respond(StatusCode::OK),
            Err(err) => Envelope::error(request_id, "system", &err).bad_request(),
        },
        Err(err) => Envelope::error(request_id, "system", &err).bad_request(),
    }
}

/// GET /directory/list
pub async fn directory_list(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);
    let ip = client_ip(&req);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let conn = state.db.lock().await;
    let token = match authenticate_token(&conn, &params, true, request_id) {
        Ok(token) => token,
        Err(errors) => return Envelope::failed(request_id, errors).bad_request(),
    };

    let offset = match params.integer("offset") {
        Ok(value) => value.unwrap_or(0),
        Err(msg) => return Envelope::message(request_id, "offset", &msg).bad_request(),
    };
    let limit = match params.integer("limit") {
        Ok(value) => value.unwrap_or(10),
        Err(msg) => return Envelope::message(request_id, "limit", &msg).bad_request(),
    };

    let mut service = DirectoryList {
        token,
        ip: Some(ip),
        sub_dir: params.get("subDir").unwrap_or("/").to_string(),
        sort: params.get("sort").unwrap_or("-type").to_string(),
        offset,
        limit,
    };

    let errors = service.validate(&conn);
    if !errors.is_empty() {
        return Envelope::validation(request_id, &errors).bad_request();
    }

    let listed = service.execute(&conn);
    match listed {
        Ok(response) => {
            let mut items = Vec::with_capacity(response.files.len());
            for file in &response.files {
                match file_resp(file, &conn) {
                    Ok(item) => items.push(item),
                    Err(err) => return Envelope::error(request_id, "", &err).bad_request(),
                }
            }
            let data = json!({
                "total": response.total,
                "pages": response.pages,
                "items": items,
            });
            Envelope::ok(request_id, data).respond(StatusCode::OK)
        }
        Err(err) => Envelope::error(request_id, "", &err).bad_request(),
    }
}
