//! Token lifecycle operations

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::models::app::{self, App};
use crate::models::token::{self, Token};
use crate::service::errors::{rule, rule_from, ValidateErrors};
use crate::service::validate::validate_path;

const MAX_PATH_LENGTH: usize = 1000;
const MAX_IP_LENGTH: usize = 1500;
const SECRET_RANGE: std::ops::RangeInclusive<usize> = 12..=32;

/// Issue a new path-scoped token for an application
pub struct TokenCreate {
    pub app: App,
    pub ip: Option<String>,
    pub path: String,
    pub secret: Option<String>,
    pub read_only: bool,
    pub expired_at: Option<DateTime<Utc>>,
    pub available_times: i64,
}

impl TokenCreate {
    pub fn validate(&self, conn: &Connection) -> ValidateErrors {
        let mut errors = ValidateErrors::new();

        match app::find_app_by_uid(&self.app.uid, conn) {
            Ok(Some(_)) => {}
            Ok(None) => errors.push(rule("TokenCreate.App")),
            Err(err) => errors.push(rule_from("TokenCreate.App", &err)),
        }

        if self.path.is_empty() || self.path.len() > MAX_PATH_LENGTH || !validate_path(&self.path)
        {
            errors.push(rule("TokenCreate.Path"));
        }
        if let Some(ip) = &self.ip {
            if ip.len() > MAX_IP_LENGTH {
                errors.push(rule("TokenCreate.IP"));
            }
        }
        if let Some(secret) = &self.secret {
            if !SECRET_RANGE.contains(&secret.len()) {
                errors.push(rule("TokenCreate.Secret"));
            }
        }
        if self.available_times < -1 {
            errors.push(rule("TokenCreate.AvailableTimes"));
        }
        if let Some(expired_at) = self.expired_at {
            if expired_at <= Utc::now() {
                errors.push(rule("TokenCreate.ExpiredAt"));
            }
        }

        errors
    }

    pub fn execute(&self, conn: &Connection) -> Result<Token> {
        token::create_token(
            &self.app,
            &self.path,
            self.expired_at,
            self.ip.as_deref(),
            self.secret.as_deref(),
            self.available_times,
            self.read_only,
            conn,
        )
    }
}

/// Mutate an existing token; absent fields are left untouched
pub struct TokenUpdate {
    pub token_uid: String,
    pub ip: Option<String>,
    pub path: Option<String>,
    pub secret: Option<String>,
    pub read_only: Option<bool>,
    pub expired_at: Option<DateTime<Utc>>,
    pub available_times: Option<i64>,
}

impl TokenUpdate {
    pub fn validate(&self, _conn: &Connection) -> ValidateErrors {
        let mut errors = ValidateErrors::new();

        if self.token_uid.is_empty() {
            errors.push(rule("TokenUpdate.Token"));
        }
        if let Some(path) = &self.path {
            if path.is_empty() || path.len() > MAX_PATH_LENGTH || !validate_path(path) {
                errors.push(rule("TokenUpdate.Path"));
            }
        }
        if let Some(ip) = &self.ip {
            if ip.len() > MAX_IP_LENGTH {
                errors.push(rule("TokenUpdate.IP"));
            }
        }
        if let Some(secret) = &self.secret {
            if !SECRET_RANGE.contains(&secret.len()) {
                errors.push(rule("TokenUpdate.Secret"));
            }
        }
        if let Some(times) = self.available_times {
            if times < -1 {
                errors.push(rule("TokenUpdate.AvailableTimes"));
            }
        }
        if let Some(expired_at) = self.expired_at {
            if expired_at <= Utc::now() {
                errors.push(rule("TokenUpdate.ExpiredAt"));
            }
        }

        errors
    }

    pub fn execute(&self, conn: &Connection) -> Result<Token> {
        let mut token =
            token::find_token_by_uid(&self.token_uid, false, conn)?.ok_or(Error::InvalidToken)?;

        if let Some(path) = &self.path {
            token.path = path.clone();
        }
        if let Some(ip) = &self.ip {
            token.ip = Some(ip.clone());
        }
        if let Some(secret) = &self.secret {
            token.secret = Some(secret.clone());
        }
        if let Some(read_only) = self.read_only {
            token.read_only = read_only;
        }
        if let Some(expired_at) = self.expired_at {
            token.expired_at = Some(expired_at);
        }
        if let Some(times) = self.available_times {
            token.available_times = times;
        }

        token.save(conn)?;
        Ok(token)
    }
}

/// Soft-delete a token; the trashed row is returned for the response
pub struct TokenDelete {
    pub token_uid: String,
}

impl TokenDelete {
    pub fn execute(&self, conn: &Connection) -> Result<Token> {
        let mut token =
            token::find_token_by_uid(&self.token_uid, false, conn)?.ok_or(Error::InvalidToken)?;
        token.soft_delete(conn)?;
        Ok(token)
    }
}
