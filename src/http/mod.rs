//! HTTP API
//!
//! REST surface for the token lifecycle and the file tree, mounted under the
//! configured API prefix. Handlers parse one parameter mapping per request,
//! authenticate against it, and answer the JSON envelope; content downloads
//! stream raw bytes instead.

pub mod file;
pub mod middleware;
pub mod params;
pub mod range;
pub mod response;
pub mod token;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};

/// Uploads run through the engine in chunk-size slices, so the HTTP cap only
/// bounds buffering, not object size.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct ServerState {
    pub db: Database,
    pub config: Arc<Config>,
}

/// HTTP API server
pub struct HttpServer {
    state: ServerState,
}

impl HttpServer {
    pub fn new(db: Database, config: Arc<Config>) -> Self {
        Self {
            state: ServerState { db, config },
        }
    }

    fn prefix(&self) -> String {
        let prefix = self.state.config.http.api_prefix.trim_end_matches('/');
        if prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{}", prefix)
        }
    }

    /// Build the router with all middleware applied
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let prefix = self.prefix();
        let route = |suffix: &str| format!("{}{}", prefix, suffix);

        let mut router = Router::new()
            .route(&route("/token/create"), post(token::token_create))
            .route(&route("/token/update"), patch(token::token_update))
            .route(&route("/token/delete"), delete(token::token_delete))
            .route(&route("/file/create"), post(file::file_create))
            .route(&route("/file/read"), get(file::file_read))
            .route(&route("/file/info"), get(file::file_info))
            .route(&route("/file/update"), patch(file::file_update))
            .route(&route("/file/delete"), delete(file::file_delete))
            .route(&route("/directory/list"), get(file::directory_list))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

        if state.config.http.limit_rate_by_ip_enable {
            router = router.layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::limit_rate_by_ip,
            ));
        }

        router = router.layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::record_request,
        ));

        if state.config.http.cors_enable {
            router = router.layer(cors_layer(&state.config));
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::new())
            .with_state(state)
    }

    /// Bind and serve until shutdown
    pub async fn serve(&self) -> Result<()> {
        let app = self.router();
        let bind = &self.state.config.http.bind;

        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("HTTP API listening on {}{}", bind, self.prefix());

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let http = &config.http;
    let mut layer = CorsLayer::new();

    if http.cors_allow_all_origins {
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = http
            .cors_allow_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        layer = layer.allow_origin(AllowOrigin::list(origins));
    }

    let methods: Vec<Method> = http
        .cors_allow_methods
        .iter()
        .filter_map(|method| method.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = http
        .cors_allow_headers
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();
    let exposed: Vec<HeaderName> = http
        .cors_expose_headers
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();

    layer = layer
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers(exposed)
        .max_age(std::time::Duration::from_secs(http.cors_max_age));

    // Credentials cannot be combined with a wildcard origin.
    if http.cors_allow_credentials && !http.cors_allow_all_origins {
        layer = layer.allow_credentials(true);
    }
    layer
}

#[cfg(test)]
mod tests {
    use super::middleware::sign_params;
    use super::*;
    use crate::db::migrate;
    use crate::models::app::{self, App};
    use crate::models::token::create_token;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    struct Harness {
        router: Router,
        app: App,
        db: Database,
        _chunks: TempDir,
    }

    async fn harness() -> Harness {
        let db = Database::open_in_memory().unwrap();
        let app = {
            let conn = db.lock().await;
            migrate::upgrade(&conn).unwrap();
            app::create_app("http-tests", None, &conn).unwrap()
        };

        let chunks = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.chunk.root_path = chunks.path().to_path_buf();

        let server = HttpServer::new(db.clone(), Arc::new(config));
        Harness {
            router: server.router(),
            app,
            db,
            _chunks: chunks,
        }
    }

    fn signed_form(pairs: &[(&str, &str)], secret: &str) -> String {
        let mut map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let sign = sign_params(&map, secret);
        map.insert("sign".to_string(), sign);
        map.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn nonce(tag: u8) -> String {
        let mut n = String::with_capacity(32);
        for i in 0..32 {
            n.push(char::from(b'a' + ((i as u8 + tag) % 26)));
        }
        n
    }

    fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    boundary, name, value
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                boundary
            )
            .as_bytes(),
        );
        body.extend_from_slice(file);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        body
    }

    #[tokio::test]
    async fn test_token_create_and_replay_rejection() {
        let h = harness().await;
        let nonce = nonce(0);
        let body = signed_form(
            &[
                ("appUid", h.app.uid.as_str()),
                ("nonce", nonce.as_str()),
                ("path", "/"),
            ],
            &h.app.secret,
        );

        let make_request = || {
            Request::builder()
                .method("POST")
                .uri("/api/burrow/token/create")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.clone()))
                .unwrap()
        };

        let (status, value) = send(&h.router, make_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], Value::Bool(true));
        assert!(value["data"]["token"].as_str().unwrap().len() == 32);

        // The identical submission is a replay.
        let (status, value) = send(&h.router, make_request()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            value["errors"]["nonce"][0],
            Value::String("this request is being replayed".to_string())
        );
    }

    #[tokio::test]
    async fn test_token_create_rejects_bad_signature() {
        let h = harness().await;
        let nonce = nonce(1);
        let body = signed_form(
            &[
                ("appUid", h.app.uid.as_str()),
                ("nonce", nonce.as_str()),
                ("path", "/"),
            ],
            "not the app secret",
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/burrow/token/create")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        let (status, value) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["errors"]["sign"].is_array());
    }

    #[tokio::test]
    async fn test_file_upload_read_and_range() {
        let h = harness().await;
        let token = {
            let conn = h.db.lock().await;
            create_token(&h.app, "/", None, None, None, -1, false, &conn).unwrap()
        };

        let content = b"The quick brown fox jumps over the lazy dog";
        let upload_nonce = nonce(2);
        let boundary = "burrow-test-boundary";
        let body = multipart_body(
            boundary,
            &[
                ("token", token.uid.as_str()),
                ("nonce", upload_nonce.as_str()),
                ("path", "/pangram.txt"),
            ],
            content,
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/burrow/file/create")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, value) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK, "upload failed: {}", value);
        let file_uid = value["data"]["fileUid"].as_str().unwrap().to_string();
        assert_eq!(
            value["data"]["hash"].as_str().unwrap(),
            crate::digest::sha256_hex(content)
        );

        // Full read.
        let request = Request::builder()
            .method("GET")
            .uri(format!(
                "/api/burrow/file/read?token={}&fileUid={}",
                token.uid, file_uid
            ))
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(etag, crate::digest::sha256_hex(content));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], content);

        // Ranged read.
        let request = Request::builder()
            .method("GET")
            .uri(format!(
                "/api/burrow/file/read?token={}&fileUid={}",
                token.uid, file_uid
            ))
            .header(header::RANGE, "bytes=4-8")
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_RANGE)
                .unwrap()
                .to_str()
                .unwrap(),
            format!("4-8/{}", content.len())
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], &content[4..=8]);

        // Metadata endpoint carries the same ETag and the full length.
        let request = Request::builder()
            .method("GET")
            .uri(format!(
                "/api/burrow/file/info?token={}&fileUid={}",
                token.uid, file_uid
            ))
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_LENGTH)
                .unwrap()
                .to_str()
                .unwrap(),
            content.len().to_string()
        );
    }

    #[tokio::test]
    async fn test_file_read_rejects_malformed_range() {
        let h = harness().await;
        let token = {
            let conn = h.db.lock().await;
            create_token(&h.app, "/", None, None, None, -1, false, &conn).unwrap()
        };

        let boundary = "burrow-test-boundary";
        let upload_nonce = nonce(3);
        let body = multipart_body(
            boundary,
            &[
                ("token", token.uid.as_str()),
                ("nonce", upload_nonce.as_str()),
                ("path", "/r.bin"),
            ],
            b"0123456789",
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/burrow/file/create")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, value) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let file_uid = value["data"]["fileUid"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("GET")
            .uri(format!(
                "/api/burrow/file/read?token={}&fileUid={}",
                token.uid, file_uid
            ))
            .header(header::RANGE, "bytes=9-1")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_directory_list_endpoint() {
        let h = harness().await;
        let token = {
            let conn = h.db.lock().await;
            create_token(&h.app, "/", None, None, None, -1, false, &conn).unwrap()
        };

        for (index, name) in ["one.txt", "two.txt"].iter().enumerate() {
            let boundary = "burrow-test-boundary";
            let upload_nonce = nonce(10 + index as u8);
            let body = multipart_body(
                boundary,
                &[
                    ("token", token.uid.as_str()),
                    ("nonce", upload_nonce.as_str()),
                    ("path", &format!("/listing/{}", name)),
                ],
                name.as_bytes(),
            );
            let request = Request::builder()
                .method("POST")
                .uri("/api/burrow/file/create")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap();
            let (status, _) = send(&h.router, request).await;
            assert_eq!(status, StatusCode::OK);
        }

        let list_nonce = nonce(20);
        let request = Request::builder()
            .method("GET")
            .uri(format!(
                "/api/burrow/directory/list?token={}&subDir=/listing&sort=name&limit=10&offset=0&nonce={}",
                token.uid, list_nonce
            ))
            .body(Body::empty())
            .unwrap();
        let (status, value) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK, "list failed: {}", value);
        assert_eq!(value["data"]["total"], Value::from(2));
        assert_eq!(value["data"]["items"][0]["path"], Value::from("/listing/one.txt"));
    }
}
