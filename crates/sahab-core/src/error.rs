//! Error types for Sahab

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("The specified bucket does not exist: {0}")]
    BucketNotFound(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Migration job not found: {0}")]
    MigrationNotFound(String),

    #[error("Replication rule not found: {0}")]
    RuleNotFound(String),

    // Lifecycle errors
    #[error("Cluster is already initialized")]
    AlreadyInitialized,

    #[error("Cluster is not initialized")]
    NotInitialized,

    // Validation errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Backend errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Storage backend error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::NodeNotFound(_) => "NodeNotFound",
            Error::BucketNotFound(_) => "NoSuchBucket",
            Error::TenantNotFound(_) => "TenantNotFound",
            Error::MigrationNotFound(_) => "MigrationNotFound",
            Error::RuleNotFound(_) => "RuleNotFound",
            Error::AlreadyInitialized => "AlreadyInitialized",
            Error::NotInitialized => "NotInitialized",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::Conflict(_) => "Conflict",
            Error::Unauthorized(_) => "Unauthorized",
            Error::DatabaseError(_) => "InternalError",
            Error::StorageError(_) => "InternalError",
            Error::Serialization(_) => "InternalError",
            Error::InternalError(_) => "InternalError",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidArgument(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::NodeNotFound(_)
            | Error::BucketNotFound(_)
            | Error::TenantNotFound(_)
            | Error::MigrationNotFound(_)
            | Error::RuleNotFound(_) => 404,
            Error::AlreadyInitialized | Error::Conflict(_) => 409,
            Error::NotInitialized => 412,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Error::AlreadyInitialized.http_status(), 409);
        assert_eq!(Error::NodeNotFound("n1".into()).http_status(), 404);
        assert_eq!(Error::InvalidArgument("bad".into()).http_status(), 400);
        assert_eq!(Error::DatabaseError("boom".into()).http_status(), 500);
    }
}
