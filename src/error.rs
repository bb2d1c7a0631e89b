//! Error handling and custom error types
//!
//! Provides unified error handling across the pipeline using thiserror.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Product {0} not found")]
    NotFound(i64),

    #[error("Product {product_id} has no source image {image_url}")]
    SlotNotFound { product_id: i64, image_url: String },

    #[error("Conflicting update on product {0}")]
    Conflict(i64),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Consume error: {0}")]
    Consume(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    /// Whether a fresh attempt at the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Fetch(_)
            | Error::Upload(_)
            | Error::Conflict(_)
            | Error::Io(_)
            | Error::Cache(_)
            | Error::Publish(_)
            | Error::Consume(_) => true,
            Error::Database(e) => database_error_is_transient(e),
            Error::Decode(_)
            | Error::UnsupportedFormat(_)
            | Error::NotFound(_)
            | Error::SlotNotFound { .. }
            | Error::Config(_)
            | Error::Serialization(_)
            | Error::Invariant(_) => false,
        }
    }
}

/// Connection-level and pool failures can clear up; query, schema and
/// decoding errors repeat on every attempt.
fn database_error_is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().map_or(false, |code| sqlstate_is_transient(&code)),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        _ => false,
    }
}

/// SQLSTATE classes for connection exceptions (08), transaction rollbacks
/// such as serialization failures and deadlocks (40), insufficient resources
/// (53), operator intervention (57) and system errors (58).
fn sqlstate_is_transient(code: &str) -> bool {
    matches!(code.get(..2), Some("08" | "40" | "53" | "57" | "58"))
}

pub type Result<T> = std::result::Result<T, Error>;
