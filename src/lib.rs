//! Burrow - Content-Addressed File Storage
//!
//! A chunked, content-addressed object store behind a token-gated HTTP API.
//! Byte streams are split into fixed-size chunks deduplicated by SHA-256,
//! composed into objects whose identity is the digest of their full content,
//! and arranged in per-application directory trees. Appends resume the
//! streaming digest from a persisted snapshot instead of re-reading stored
//! bytes.

pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod http;
pub mod models;
pub mod service;
pub mod uid;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use http::HttpServer;
