//! Token lifecycle handlers

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};

use crate::db;
use crate::http::middleware::{authenticate_app, request_id_of};
use crate::http::params::Params;
use crate::http::response::{token_resp, Envelope};
use crate::http::ServerState;
use crate::service::token::{TokenCreate, TokenDelete, TokenUpdate};

fn parse_expired_at(params: &Params) -> Result<Option<DateTime<Utc>>, String> {
    match params.integer("expiredAt")? {
        None => Ok(None),
        Some(seconds) => Utc
            .timestamp_opt(seconds, 0)
            .single()
            .map(Some)
            .ok_or_else(|| "expiredAt is not a valid unix timestamp".to_string()),
    }
}

/// POST /token/create
pub async fn token_create(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let mut conn = state.db.lock().await;
    let app = match authenticate_app(&conn, &params, request_id) {
        Ok(app) => app,
        Err(errors) => return Envelope::failed(request_id, errors).bad_request(),
    };

    let expired_at = match parse_expired_at(&params) {
        Ok(value) => value,
        Err(msg) => return Envelope::message(request_id, "expiredAt", &msg).bad_request(),
    };
    let available_times = match params.integer("availableTimes") {
        Ok(value) => value.unwrap_or(-1),
        Err(msg) => return Envelope::message(request_id, "availableTimes", &msg).bad_request(),
    };

    let service = TokenCreate {
        app,
        ip: params.get("ip").map(str::to_string),
        path: params.get("path").unwrap_or("/").to_string(),
        secret: params.get("secret").map(str::to_string),
        read_only: params.flag("readOnly"),
        expired_at,
        available_times,
    };

    let errors = service.validate(&conn);
    if !errors.is_empty() {
        return Envelope::validation(request_id, &errors).bad_request();
    }

    match db::with_transaction(&mut conn, |tx| service.execute(tx)) {
        Ok(token) => Envelope::ok(request_id, token_resp(&token)).respond(StatusCode::OK),
        Err(err) => Envelope::error(request_id, "", &err).bad_request(),
    }
}

/// PATCH /token/update
pub async fn token_update(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let mut conn = state.db.lock().await;
    if let Err(errors) = authenticate_app(&conn, &params, request_id) {
        return Envelope::failed(request_id, errors).bad_request();
    }

    let expired_at = match parse_expired_at(&params) {
        Ok(value) => value,
        Err(msg) => return Envelope::message(request_id, "expiredAt", &msg).bad_request(),
    };
    let available_times = match params.integer("availableTimes") {
        Ok(value) => value,
        Err(msg) => return Envelope::message(request_id, "availableTimes", &msg).bad_request(),
    };

    let service = TokenUpdate {
        token_uid: params.get("token").unwrap_or_default().to_string(),
        ip: params.get("ip").map(str::to_string),
        path: params.get("path").map(str::to_string),
        secret: params.get("secret").map(str::to_string),
        read_only: params.get("readOnly").map(|v| v == "1" || v == "true"),
        expired_at,
        available_times,
    };

    let errors = service.validate(&conn);
    if !errors.is_empty() {
        return Envelope::validation(request_id, &errors).bad_request();
    }

    match db::with_transaction(&mut conn, |tx| service.execute(tx)) {
        Ok(token) => Envelope::ok(request_id, token_resp(&token)).respond(StatusCode::OK),
        Err(err) => Envelope::error(request_id, "token", &err).bad_request(),
    }
}

/// DELETE /token/delete
pub async fn token_delete(State(state): State<ServerState>, req: Request) -> Response {
    let request_id = request_id_of(&req);

    let params = match Params::collect(req).await {
        Ok(params) => params,
        Err(msg) => return Envelope::message(request_id, "inputParamError", &msg).bad_request(),
    };

    let mut conn = state.db.lock().await;
    if let Err(errors) = authenticate_app(&conn, &params, request_id) {
        return Envelope::failed(request_id, errors).bad_request();
    }

    let service = TokenDelete {
        token_uid: params.get("token").unwrap_or_default().to_string(),
    };

    match db::with_transaction(&mut conn, |tx| service.execute(tx)) {
        Ok(token) => Envelope::ok(request_id, token_resp(&token)).respond(StatusCode::OK),
        Err(err) => Envelope::error(request_id, "token", &err).bad_request(),
    }
}
