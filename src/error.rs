//! Typed errors shared by the migration capabilities.
//!
//! Command glue wraps these in `anyhow` with context; the capability seams
//! (media store, repository, importer, export parsing) return them directly so
//! callers can tell recoverable per-item failures from fatal ones.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    /// A referenced source record (attachment, author, post) does not exist.
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// The export document itself is malformed. Always fatal.
    #[error("malformed export: {0}")]
    ParseFailure(String),

    #[error("fetch {url}: {reason}")]
    AssetFetchFailure { url: String, reason: String },

    #[error("store {url}: {reason}")]
    AssetStoreFailure { url: String, reason: String },

    /// The post is missing a field the repository requires.
    #[error("invalid post {slug:?}: {reason}")]
    PostValidationFailure { slug: String, reason: String },

    #[error("repository write failed: {0}")]
    RepositoryWriteFailure(String),
}

impl MigrateError {
    /// Only a broken export aborts a run; everything else is recorded and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ParseFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
