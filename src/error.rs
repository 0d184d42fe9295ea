//! Store-level errors.
//!
//! Gateway failures are classified by the store operation that hit them.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors surfaced by the stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A read failed; the cache was left untouched.
    #[error("Query failed: {0}")]
    Query(String),

    /// A write failed; nothing was applied locally.
    #[error("Mutation failed: {0}")]
    Mutation(String),

    /// One of the upload steps failed; no cover was bound.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// A chat message was rejected; delivery must not be assumed.
    #[error("Send failed: {0}")]
    Send(String),

    /// The push channel failed or could not be opened.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// The backend returned a row the client cannot read.
    #[error("Decode failed: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn query(err: GatewayError) -> Self {
        StoreError::Query(err.to_string())
    }

    pub fn mutation(err: GatewayError) -> Self {
        StoreError::Mutation(err.to_string())
    }

    /// A failed write. An unreadable reply is reported as [`StoreError::Decode`].
    pub fn write(err: GatewayError) -> Self {
        match err {
            GatewayError::Decode(_) => StoreError::decode(err),
            _ => StoreError::mutation(err),
        }
    }

    pub fn upload(err: impl std::fmt::Display) -> Self {
        StoreError::Upload(err.to_string())
    }

    pub fn send(err: GatewayError) -> Self {
        StoreError::Send(err.to_string())
    }

    pub fn subscription(err: GatewayError) -> Self {
        StoreError::Subscription(err.to_string())
    }

    pub fn decode(err: GatewayError) -> Self {
        StoreError::Decode(err.to_string())
    }
}
