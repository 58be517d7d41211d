//! Error types for Burrow

use thiserror::Error;

/// Result type alias using Burrow Error
pub type Result<T> = std::result::Result<T, Error>;

/// Burrow error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    // Metadata store errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    // Chunk store errors
    #[error("invalid chunk id: {0}")]
    InvalidChunkId(i64),

    #[error("total length exceed limit: {0} bytes")]
    ChunkExceedsLimit(usize),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    // Object engine errors
    #[error("Object not found: {0}")]
    ObjectNotFound(i64),

    #[error("object has no any chunks")]
    ObjectNoChunks,

    #[error("object chunk is missing its digest state")]
    MissingHashState,

    #[error("invalid digest state: {0}")]
    DigestState(String),

    // Directory tree errors
    #[error("file has already existed")]
    FileExists,

    #[error("the path has already existed")]
    PathExists,

    #[error("directory can't be overwritten")]
    OverwriteDir,

    #[error("can't append data to directory")]
    AppendToDir,

    #[error("can't read a directory")]
    ReadDir,

    #[error("try to read the hidden file")]
    ReadHidden,

    #[error("can't list the content of a file")]
    ListFile,

    #[error("delete non-empty directory")]
    DeleteNonEmptyDir,

    #[error("the file has been deleted")]
    FileDeleted,

    #[error("file can't be accessed by some tokens")]
    AccessDenied,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("only one of rename, append and overwrite is allowed")]
    ExclusiveOperation,

    #[error("the size of file doesn't match")]
    SizeMismatch,

    #[error("the hash of file doesn't match")]
    HashMismatch,

    #[error("path is not a legal unix path")]
    InvalidPath,

    #[error("invalid sort types, only one of type, -type, name, -name, time and -time")]
    InvalidSort,

    // Credential errors
    #[error("invalid application")]
    InvalidApp,

    #[error("invalid token")]
    InvalidToken,

    #[error("token can't be used by this ip")]
    TokenIp,

    #[error("the available times of token has already exhausted")]
    TokenExhausted,

    #[error("this token is read only")]
    TokenReadOnly,

    #[error("token is expired")]
    TokenExpired,

    #[error("request param sign error")]
    SignatureMismatch,

    #[error("this request is being replayed")]
    Replay,

    // HTTP range errors
    #[error("http range header format error")]
    RangeFormat,

    #[error("wrong http range header, start must be less than end")]
    RangeBounds,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures the client can repair by changing the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::Io(_)
                | Error::Database(_)
                | Error::Migration(_)
                | Error::Config(_)
                | Error::Toml(_)
                | Error::TomlSer(_)
                | Error::Internal(_)
        )
    }
}
