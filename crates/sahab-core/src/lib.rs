//! Sahab core - shared types, errors and configuration for the
//! cluster control plane.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};

/// Sahab version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bucket metadata key holding the id of the bucket's home node.
pub const LOCATION_METADATA_KEY: &str = "cluster:location";
