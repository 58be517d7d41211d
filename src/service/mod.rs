//! Service operations
//!
//! One struct per exposed operation, carrying the authenticated token (or
//! app) plus the request parameters. `validate` collects typed field errors
//! against the central rule table; `execute` runs against a connection the
//! caller owns, so mutating operations compose under one caller-begun
//! transaction.

pub mod errors;
pub mod file;
pub mod token;
pub mod validate;

pub use errors::{ValidateError, ValidateErrors};
