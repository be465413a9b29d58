//! Sahab internal cluster API
//!
//! Axum router for the peer-to-peer endpoints (envelope-authenticated and
//! rate-limited), the operator surface, Prometheus metrics, and the
//! `sahab-node` server wiring.

pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
