// src/error.rs

//! Error types shared by every blockyard module

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Glob match failed: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Registry and dependency graph disagree: {0}")]
    Consistency(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Unsatisfied dependency: {0}")]
    Unsatisfied(String),

    #[error("Transaction error: {0}")]
    Transact(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}
