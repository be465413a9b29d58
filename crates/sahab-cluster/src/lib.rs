//! Sahab cluster - the coordination control plane
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Sahab Cluster                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐   │
//! │  │ClusterManager│  │ Sync Engines │  │ Replication/      │   │
//! │  │              │  │              │  │ Migration         │   │
//! │  │ - Peer CRUD  │  │ - Scan       │  │                   │   │
//! │  │ - Health     │  │ - Checksum   │  │ - Rule scheduler  │   │
//! │  │ - Status     │  │ - Push/skip  │  │ - Worker pool     │   │
//! │  └──────┬───────┘  └──────┬───────┘  └────────┬──────────┘   │
//! │         │                 │                   │              │
//! │         └─────────────────┼───────────────────┘              │
//! │                           │                                  │
//! │        ┌──────────────────┴──────────────────┐               │
//! │        │   Transport (HMAC envelope + HTTP)  │               │
//! │        │   Circuit breakers · Rate limiter   │               │
//! │        └─────────────────────────────────────┘               │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Coordination is eventual: per-record checksums skip redundant pushes
//! and tombstones propagate deletions. There is no consensus protocol.

pub mod aggregate;
pub mod breaker;
pub mod cache;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod migration;
pub mod proxy;
pub mod ratelimit;
pub mod replication;
pub mod sync;
pub mod tombstone;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use aggregate::{BucketAggregator, BucketsResponse, QuotaAggregator};
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerStats, CircuitBreaker, CircuitState};
pub use cache::{CacheStats, LocationCache};
pub use envelope::Envelope;
pub use error::{ClusterError, ClusterResult};
pub use manager::{AddNodeRequest, ClusterManager, ClusterView, HealthResponse};
pub use metrics::ClusterMetrics;
pub use migration::MigrationEngine;
pub use proxy::{ProxiedResponse, ReverseProxy};
pub use ratelimit::{RateLimiter, RateLimiterConfig, RateLimiterStats};
pub use replication::{ReplicationConfig, ReplicationPipeline};
pub use sync::{SyncAck, SyncCycleStats, SyncEngine, SyncEntity};
pub use tombstone::{TombstoneConfig, TombstoneLog};
pub use transport::{NodeClient, RequestIdentity, TransportConfig};

// Re-export the core types callers work with
pub use sahab_core::types::{
    BucketWithLocation, ClusterStatus, HealthStatus, LocalConfig, MigrationJob, MigrationRequest,
    MigrationState, Node, NodeId, QueueItemStatus, QueueOperation, ReplicationQueueItem,
    ReplicationRule, TenantUsage, Tombstone,
};
