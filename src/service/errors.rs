//! Typed validation errors with a stable code table
//!
//! Every validation rule has a numeric code that clients can rely on; the
//! human message is advisory. Rules are looked up by their
//! `Operation.Field` name.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::Error;

/// One failed rule
#[derive(Debug, Clone, Serialize)]
pub struct ValidateError {
    pub code: u32,
    pub field: String,
    pub msg: String,
}

impl ValidateError {
    pub fn message(&self) -> String {
        self.msg.clone()
    }
}

/// The collected failures of one validation pass
#[derive(Debug, Default)]
pub struct ValidateErrors(pub Vec<ValidateError>);

impl ValidateErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: ValidateError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field-keyed message lists for the response envelope
    pub fn map_field_errors(&self) -> HashMap<String, Vec<String>> {
        let mut map = HashMap::with_capacity(self.0.len());
        for error in &self.0 {
            map.entry(error.field.clone())
                .or_insert_with(Vec::new)
                .push(error.message());
        }
        map
    }

    pub fn contains_code(&self, code: u32) -> bool {
        self.0.iter().any(|e| e.code == code)
    }
}

/// The central rule table: `(code, field, message)`
const RULES: &[(u32, &str, &str)] = &[
    (10002, "TokenCreate.App", "can't find specific application by input params"),
    (10003, "TokenCreate.Path", "path of token can't be empty, max of length is 1000, and must be a legal unix path"),
    (10004, "TokenCreate.IP", "max length of ip is 1500"),
    (10005, "TokenCreate.Secret", "the length of secret is between 12 and 32"),
    (10006, "TokenCreate.AvailableTimes", "availableTimes of token is greater than -1"),
    (10007, "TokenCreate.ReadOnly", "readOnly of token is 0 or 1"),
    (10008, "TokenUpdate.Token", "token is required"),
    (10009, "TokenUpdate.IP", "max length of ip is 1500, it's optional"),
    (10010, "TokenUpdate.Path", "max length of path is 1000, and must be a legal unix path, it's optional"),
    (10011, "TokenUpdate.Secret", "the length of secret is between 12 and 32, it's optional"),
    (10012, "TokenUpdate.ReadOnly", "readOnly is 1 or 0, it's optional"),
    (10013, "TokenUpdate.ExpiredAt", "expiredAt must be greater than now, it's optional"),
    (10014, "TokenUpdate.AvailableTimes", "availableTimes must be an integer greater than -1, it's optional"),
    (10015, "FileCreate.App", "can't find specific application by input params"),
    (10016, "FileCreate.Token", "can't find specific token by input params"),
    (10017, "FileCreate.Path", "path of file or directory can't be empty, max of length is 1000, and must be a legal unix path"),
    (10018, "FileCreate.Hidden", "hidden must be 0 or 1"),
    (10019, "FileCreate.Overwrite", "overwrite must be 0 or 1"),
    (10020, "FileCreate.Rename", "rename must be 0 or 1"),
    (10021, "FileCreate.Append", "append must be 0 or 1"),
    (10022, "FileCreate.Operate", "only one of rename, append and overwrite is allowed"),
    (10023, "FileRead.Token", "token is required"),
    (10024, "FileRead.File", "file is required"),
    (10025, "FileUpdate.Token", "token is required"),
    (10026, "FileUpdate.File", "file is required"),
    (10027, "FileUpdate.Hidden", "hidden must be 0 or 1"),
    (10028, "FileUpdate.Path", "max length of path is 1000, and must be a legal unix path"),
    (10029, "FileDelete.Token", "token is required"),
    (10030, "FileDelete.File", "file is required"),
    (10031, "DirectoryList.Token", "token is required"),
    (10032, "DirectoryList.Sort", "sort is only allowed to be one of type -type name -name time -time"),
    (10033, "DirectoryList.SubDir", "subDir must be a legal unix path"),
    (10034, "DirectoryList.Offset", "the min value of offset is 0"),
    (10035, "DirectoryList.Limit", "the min value of limit is 10, and max of limit is 20"),
    (10036, "TokenCreate.ExpiredAt", "expiredAt must be greater than now, it's optional"),
];

/// A rule failure with the table's message
pub fn rule(field: &str) -> ValidateError {
    match RULES.iter().find(|(_, f, _)| *f == field) {
        Some((code, f, msg)) => ValidateError {
            code: *code,
            field: (*f).to_string(),
            msg: (*msg).to_string(),
        },
        None => ValidateError {
            code: 0,
            field: field.to_string(),
            msg: format!("validation failed: {}", field),
        },
    }
}

/// A rule failure carrying the underlying error's message
pub fn rule_from(field: &str, err: &Error) -> ValidateError {
    let mut error = rule(field);
    error.msg = err.to_string();
    error
}
