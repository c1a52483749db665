// src/error.rs
//! Crate-wide error type.
//!
//! One variant per entry in the bundle format's error taxonomy, plus
//! transparent wrappers for the two external collaborators (filesystem I/O,
//! raster image decode/encode). There is no "no error" variant — `Ok(T)`
//! already carries that meaning.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no memory")]
    NoMemory,

    #[error("problem accessing file: {0}")]
    FileAccess(String),

    #[error("invalid bundle format: {0}")]
    InvalidFormat(String),

    #[error("bundle version mismatch: found {found}, expected {expected}")]
    WrongVersion { found: u32, expected: u32 },

    #[error("bundle is an empty file")]
    EmptyFile,

    #[error("invalid anchor enum value: {0}")]
    InvalidAnchor(String),

    #[error("cannot fit all images into texture")]
    CannotFit,

    #[error("image has no pixels: {0}")]
    NoPixels(String),

    #[error("unrecognized image format: {0}")]
    ImageFormat(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("cannot delete while stream open: {0}")]
    StreamOpen(String),

    #[error("{0}")]
    Parse(String),
}

impl Error {
    /// The stable kebab-case error name used in CLI output (`<context>: <err-str>`).
    pub fn err_str(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::FileAccess(_) => "file-access",
            Error::Image(_) => "image-format",
            Error::Json(_) | Error::InvalidFormat(_) | Error::Parse(_) => "invalid-format",
            Error::NoMemory => "no-memory",
            Error::WrongVersion { .. } => "wrong-version",
            Error::EmptyFile => "empty-file",
            Error::InvalidAnchor(_) => "invalid-anchor",
            Error::CannotFit => "cannot-fit",
            Error::NoPixels(_) => "no-pixels",
            Error::ImageFormat(_) => "image-format",
            Error::NotFound(_) => "not-found",
            Error::StreamOpen(_) => "stream-open",
        }
    }

    pub fn parse_at(line: u64, col: u64, msg: impl std::fmt::Display) -> Self {
        Error::Parse(format!("line {line}, col {col}: {msg}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
