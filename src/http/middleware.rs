//! Request middleware and authentication helpers
//!
//! Every request is recorded in the `requests` table before handling and its
//! response code/body filled in afterwards; that same table doubles as the
//! nonce store for replay rejection. Signatures cover the sorted parameter
//! mapping plus the caller's secret.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use md5::{Digest, Md5};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::Error;
use crate::http::params::Params;
use crate::http::response::{message_map, Envelope};
use crate::http::ServerState;
use crate::models::app::{self, App};
use crate::models::request;
use crate::models::token::{self, Token};

/// Field-keyed error messages produced before a service runs
pub type FieldErrors = HashMap<String, Vec<String>>;

/// The id of the `requests` row describing the current request
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub i64);

/// Marks a response whose body must not be copied into the audit row
/// (file content downloads)
#[derive(Debug, Clone, Copy)]
pub struct SkipBodyRecording;

pub fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_default()
}

pub fn request_id_of(req: &Request) -> i64 {
    req.extensions().get::<RequestId>().map(|id| id.0).unwrap_or(0)
}

fn headers_json(headers: &HeaderMap) -> String {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name.to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).to_string());
    }
    serde_json::to_string(&map).unwrap_or_default()
}

/// Record the request, run the handler, then record the response
pub async fn record_request(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    let method = req.method().to_string();
    let service = req.uri().to_string();
    let header_json = headers_json(req.headers());

    let request_id = {
        let conn = state.db.lock().await;
        match request::create_http_request(&ip, &method, &service, &header_json, &conn) {
            Ok(record) => record.id,
            Err(err) => {
                warn!("failed to record request: {}", err);
                0
            }
        }
    };
    req.extensions_mut().insert(RequestId(request_id));

    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16();

    let response = if response.extensions().get::<SkipBodyRecording>().is_some() {
        let conn = state.db.lock().await;
        let _ = request::update_request_response(request_id, status as i64, "", &conn);
        response
    } else {
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .unwrap_or_default();
        {
            let conn = state.db.lock().await;
            let _ = request::update_request_response(
                request_id,
                status as i64,
                &String::from_utf8_lossy(&bytes),
                &conn,
            );
        }
        Response::from_parts(parts, axum::body::Body::from(bytes))
    };

    info!(
        target: "burrow::access",
        %ip,
        %method,
        service = %service,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

static LIMITERS: LazyLock<Mutex<HashMap<IpAddr, TokenBucket>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

const LIMITER_PURGE_THRESHOLD: usize = 1024;

fn limiter_allows(ip: IpAddr, interval: Duration, burst: f64) -> bool {
    let mut limiters = LIMITERS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let now = Instant::now();

    if limiters.len() > LIMITER_PURGE_THRESHOLD {
        let ttl = interval.saturating_mul(10);
        limiters.retain(|_, bucket| now.duration_since(bucket.last_seen) < ttl);
    }

    let bucket = limiters.entry(ip).or_insert(TokenBucket {
        tokens: burst,
        last_refill: now,
        last_seen: now,
    });

    let elapsed = now.duration_since(bucket.last_refill).as_millis() as f64;
    let refill = elapsed / interval.as_millis().max(1) as f64;
    bucket.tokens = (bucket.tokens + refill).min(burst);
    bucket.last_refill = now;
    bucket.last_seen = now;

    if bucket.tokens >= 1.0 {
        bucket.tokens -= 1.0;
        true
    } else {
        false
    }
}

/// Per-IP token bucket; refused requests answer 429
pub async fn limit_rate_by_ip(
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Response {
    let interval = Duration::from_millis(state.config.http.limit_rate_by_ip_interval.max(1));
    let burst = state.config.http.limit_rate_by_ip_max_num.max(1) as f64;
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if !limiter_allows(ip, interval, burst) {
        let request_id = request_id_of(&req);
        return Envelope::message(request_id, "limitRateByIp", "too many requests")
            .respond(StatusCode::TOO_MANY_REQUESTS);
    }
    next.run(req).await
}

/// MD5 over `k1=v1&k2=v2&…&kn=vn` + secret, keys sorted, `sign` excluded
pub fn sign_params(entries: &BTreeMap<String, String>, secret: &str) -> String {
    let joined = entries
        .iter()
        .filter(|(key, _)| key.as_str() != "sign")
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(params: &Params, secret: &str) -> bool {
    match params.get("sign") {
        Some(sign) if !sign.is_empty() => sign_params(params.entries(), secret) == sign,
        _ => false,
    }
}

const NONCE_MESSAGE: &str =
    "nonce is optional, but the min length of nonce is 32, the max length is 48";

/// Reject replays: a `(app, nonce)` pair is accepted exactly once
fn check_nonce(
    conn: &Connection,
    app_id: i64,
    params: &Params,
    required: bool,
) -> Result<(), FieldErrors> {
    match params.get("nonce") {
        None | Some("") => {
            if required {
                Err(message_map("nonce", NONCE_MESSAGE))
            } else {
                Ok(())
            }
        }
        Some(nonce) => {
            if !(32..=48).contains(&nonce.len()) {
                return Err(message_map("nonce", NONCE_MESSAGE));
            }
            match request::find_request_by_app_and_nonce(app_id, nonce, conn) {
                Ok(Some(_)) => Err(message_map("nonce", &Error::Replay.to_string())),
                Ok(None) => Ok(()),
                Err(err) => Err(message_map("system", &err.to_string())),
            }
        }
    }
}

/// App-secret authentication for the token lifecycle endpoints
pub fn authenticate_app(
    conn: &Connection,
    params: &Params,
    request_id: i64,
) -> Result<App, FieldErrors> {
    let app_uid = params.get("appUid").unwrap_or_default();
    let app = match app::find_app_by_uid(app_uid, conn) {
        Ok(Some(app)) => app,
        _ => return Err(message_map("appUid", "can't parse app from appUid")),
    };

    check_nonce(conn, app.id, params, true)?;

    let _ = request::update_request_context(
        request_id,
        Some(app.id),
        None,
        params.get("nonce"),
        &params.json(),
        conn,
    );

    if !verify_signature(params, &app.secret) {
        return Err(message_map("sign", &Error::SignatureMismatch.to_string()));
    }
    Ok(app)
}

/// Token authentication for the file and directory endpoints.
///
/// The signature is only enforced for tokens that carry a secret.
pub fn authenticate_token(
    conn: &Connection,
    params: &Params,
    nonce_required: bool,
    request_id: i64,
) -> Result<Token, FieldErrors> {
    let token_uid = params.get("token").unwrap_or_default();
    let token = match token::find_token_by_uid(token_uid, false, conn) {
        Ok(Some(token)) => token,
        _ => return Err(message_map("token", "token find failed")),
    };

    check_nonce(conn, token.app_id, params, nonce_required)?;

    let _ = request::update_request_context(
        request_id,
        Some(token.app_id),
        Some(&token.uid),
        params.get("nonce"),
        &params.json(),
        conn,
    );

    if let Some(secret) = &token.secret {
        if !verify_signature(params, secret) {
            return Err(message_map("sign", &Error::SignatureMismatch.to_string()));
        }
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sign_is_deterministic_and_sensitive() {
        let params = entries(&[("b", "2"), ("a", "1"), ("token", "abc")]);
        let sign = sign_params(&params, "secret");
        assert_eq!(sign, sign_params(&params, "secret"));
        assert_eq!(sign.len(), 32);

        // Any single perturbation changes the signature.
        let other = entries(&[("b", "2"), ("a", "2"), ("token", "abc")]);
        assert_ne!(sign, sign_params(&other, "secret"));
        assert_ne!(sign, sign_params(&params, "secre t"));
    }

    #[test]
    fn test_sign_excludes_sign_param() {
        let without = entries(&[("a", "1")]);
        let with = entries(&[("a", "1"), ("sign", "whatever")]);
        assert_eq!(sign_params(&without, "s"), sign_params(&with, "s"));
    }

    #[test]
    fn test_verify_signature_roundtrip() {
        let mut pairs = entries(&[("path", "/f"), ("token", "t")]);
        let sign = sign_params(&pairs, "s3cret");
        pairs.insert("sign".to_string(), sign);

        let params = Params::from_pairs(
            &pairs
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect::<Vec<_>>(),
        );
        assert!(verify_signature(&params, "s3cret"));
        assert!(!verify_signature(&params, "wrong"));
    }

    #[test]
    fn test_limiter_exhausts_burst() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let interval = Duration::from_secs(3600);
        assert!(limiter_allows(ip, interval, 2.0));
        assert!(limiter_allows(ip, interval, 2.0));
        assert!(!limiter_allows(ip, interval, 2.0));
    }
}
