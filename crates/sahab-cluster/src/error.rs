//! Cluster error types

use thiserror::Error;

/// Result type for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Cluster-related errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("No healthy nodes available")]
    NoHealthyNodes,

    #[error("circuit open for node {0}")]
    CircuitOpen(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Invalid request signature")]
    InvalidSignature,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("All peers failed: {0}")]
    AllPeersFailed(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] sahab_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// HTTP status used when the error surfaces on an API edge.
    pub fn http_status(&self) -> u16 {
        match self {
            ClusterError::MissingHeader(_) | ClusterError::InvalidSignature => 401,
            ClusterError::RateLimited => 429,
            ClusterError::NodeNotFound(_) => 404,
            ClusterError::Validation(_) | ClusterError::InvalidConfig(_) => 400,
            ClusterError::Conflict(_) => 409,
            ClusterError::NodeUnreachable(_)
            | ClusterError::CircuitOpen(_)
            | ClusterError::NoHealthyNodes => 503,
            ClusterError::Metadata(e) => e.http_status(),
            _ => 500,
        }
    }
}
