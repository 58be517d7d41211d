//! Shared validators for paths, tokens and listing parameters

use chrono::Utc;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::models::token::{self, Token, UNLIMITED_TIMES};

/// Characters a path segment must not contain
const FORBIDDEN: &[char] = &[
    '^', '!', '@', '%', '(', ')', ';', ',', '[', ']', '{', '}', '<', '>', '\\', '|', ':', '*',
    '?', '"', '\'',
];

fn valid_segment(segment: &str) -> bool {
    let length = segment.chars().count();
    (1..=255).contains(&length) && !segment.contains(FORBIDDEN)
}

/// Check a slash-separated unix path, absolute or relative, with or without
/// a trailing slash
pub fn validate_path(path: &str) -> bool {
    if path.is_empty() || path == "/" {
        return true;
    }
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return false;
    }
    trimmed.split('/').all(valid_segment)
}

pub const SORT_VALUES: &[&str] = &["type", "-type", "name", "-name", "time", "-time"];

pub fn validate_sort(sort: &str) -> bool {
    SORT_VALUES.contains(&sort)
}

/// Reload and gate a token for one request.
///
/// Check order: address allow-list, use quota, read-only flag, expiry.
pub fn validate_token(
    conn: &Connection,
    ip: Option<&str>,
    allow_read_only: bool,
    token: &Token,
) -> Result<Token> {
    let token = token::find_token_by_uid(&token.uid, false, conn)?.ok_or(Error::InvalidToken)?;

    if let Some(ip) = ip {
        if !token.allow_ip(ip) {
            return Err(Error::TokenIp);
        }
    }

    if token.available_times != UNLIMITED_TIMES && token.available_times <= 0 {
        return Err(Error::TokenExhausted);
    }

    if !allow_read_only && token.read_only {
        return Err(Error::TokenReadOnly);
    }

    if let Some(expired_at) = token.expired_at {
        if expired_at < Utc::now() {
            return Err(Error::TokenExpired);
        }
    }

    Ok(token)
}
