//! Node server wiring
//!
//! Builds the store, the reference catalog, every cluster engine and the
//! axum router, then serves until interrupted. Background engines observe
//! their shutdown flags and finish the in-flight iteration before exiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use sahab_cluster::{
    BreakerConfig, BreakerRegistry, ClusterManager, ClusterMetrics, LocationCache,
    MigrationEngine, NodeClient, RateLimiter, RateLimiterConfig, ReplicationConfig,
    ReplicationPipeline, SyncEngine, TombstoneConfig, TombstoneLog, TransportConfig,
};
use sahab_core::config::{global_config, SahabConfig};
use sahab_core::Result;
use sahab_metadata::{
    AclManager, BucketCatalog, ClusterStore, DirectoryCatalog, LocalCatalog, ObjectCatalog,
    ObjectStore,
};
use sahab_storage::FsObjectStore;

use crate::metrics::{metrics_handler, metrics_middleware, MetricsRecorder};
use crate::middleware::{envelope_auth, rate_limit};
use crate::routes::{admin, internal};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SahabConfig>,
    pub store: Arc<ClusterStore>,
    pub manager: Arc<ClusterManager>,
    pub directory: Arc<dyn DirectoryCatalog>,
    pub buckets: Arc<dyn BucketCatalog>,
    pub objects: Arc<dyn ObjectCatalog>,
    pub blobs: Arc<dyn ObjectStore>,
    pub acl: Option<Arc<dyn AclManager>>,
    pub tombstones: Arc<TombstoneLog>,
    pub replication: Arc<ReplicationPipeline>,
    pub migration: Arc<MigrationEngine>,
    pub limiter: Arc<RateLimiter>,
    pub cluster_metrics: Arc<ClusterMetrics>,
    pub breakers: Arc<BreakerRegistry>,
    pub cache: Arc<LocationCache>,
    pub recorder: MetricsRecorder,
}

/// The Sahab node server
pub struct ApiServer {
    config: SahabConfig,
}

impl ApiServer {
    pub fn new(config: SahabConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let recorder = MetricsRecorder::new();
        info!("Prometheus metrics initialized");

        // Persistence
        let store = Arc::new(ClusterStore::new(&self.config.database.url).await?);
        store
            .seed_global_defaults(&global_config::defaults())
            .await?;
        let catalog = Arc::new(LocalCatalog::new(&self.config.database.url).await?);

        let blobs = Arc::new(FsObjectStore::new(&self.config.storage.data_dir));
        blobs.init().await?;
        blobs.health_check().await?;

        // Cluster plumbing
        let cluster_metrics = Arc::new(ClusterMetrics::new());
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let transport = Arc::new(
            NodeClient::new(
                TransportConfig::default(),
                Arc::clone(&breakers),
                Arc::clone(&cluster_metrics),
            )
            .map_err(|e| sahab_core::Error::InternalError(e.to_string()))?,
        );

        let manager = Arc::new(ClusterManager::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&breakers),
            self.config.cluster.clone(),
        ));

        let cache = Arc::new(LocationCache::new(Duration::from_secs(
            self.config.cluster.location_cache_ttl_secs,
        )));
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            requests_per_second: self.config.cluster.rate_limit_rps,
            burst_size: self.config.cluster.rate_limit_burst,
            ..Default::default()
        }));

        // Engines
        let tombstones = Arc::new(TombstoneLog::new(
            Arc::clone(&store),
            Arc::clone(&catalog) as Arc<dyn DirectoryCatalog>,
            Arc::clone(&manager) as Arc<dyn sahab_cluster::ClusterView>,
            Arc::clone(&transport),
            TombstoneConfig {
                retention: Duration::from_secs(self.config.cluster.tombstone_retention_hours * 3600),
                sync_interval: Duration::from_secs(self.config.cluster.deletion_sync_interval_secs),
                ..Default::default()
            },
        ));

        let sync_engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&catalog) as Arc<dyn DirectoryCatalog>,
            Arc::clone(&manager) as Arc<dyn sahab_cluster::ClusterView>,
            Arc::clone(&transport),
        ));

        let replication = Arc::new(ReplicationPipeline::new(
            Arc::clone(&store),
            Arc::clone(&catalog) as Arc<dyn ObjectCatalog>,
            Arc::clone(&blobs) as Arc<dyn ObjectStore>,
            Arc::clone(&manager) as Arc<dyn sahab_cluster::ClusterView>,
            Arc::clone(&transport),
            ReplicationConfig::default(),
        ));

        let migration = Arc::new(MigrationEngine::new(
            Arc::clone(&store),
            Arc::clone(&manager) as Arc<dyn sahab_cluster::ClusterView>,
            Arc::clone(&transport),
            Arc::clone(&blobs) as Arc<dyn ObjectStore>,
            Arc::clone(&catalog) as Arc<dyn ObjectCatalog>,
            Arc::clone(&catalog) as Arc<dyn BucketCatalog>,
            Arc::clone(&catalog) as Arc<dyn DirectoryCatalog>,
            Some(Arc::clone(&catalog) as Arc<dyn AclManager>),
            Arc::clone(&cache),
        ));

        // Background tasks
        let sweeper_shutdown = Arc::new(RwLock::new(false));
        manager.start();
        tombstones.start();
        sync_engine.start();
        replication.start().await;
        limiter.spawn_sweeper(Arc::clone(&sweeper_shutdown));
        cache.spawn_sweeper(Arc::clone(&sweeper_shutdown));
        cluster_metrics.spawn_reporter(Duration::from_secs(300), Arc::clone(&sweeper_shutdown));

        let state = AppState {
            config: Arc::new(self.config.clone()),
            store,
            manager: Arc::clone(&manager),
            directory: Arc::clone(&catalog) as Arc<dyn DirectoryCatalog>,
            buckets: Arc::clone(&catalog) as Arc<dyn BucketCatalog>,
            objects: Arc::clone(&catalog) as Arc<dyn ObjectCatalog>,
            blobs,
            acl: Some(catalog as Arc<dyn AclManager>),
            tombstones: Arc::clone(&tombstones),
            replication: Arc::clone(&replication),
            migration,
            limiter,
            cluster_metrics,
            breakers,
            cache,
            recorder,
        };

        let app = build_router(state);
        let addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        let listener = TcpListener::bind(&addr).await?;

        info!("🚀 Sahab node listening on http://{}", addr);
        info!("📊 Operator API at http://{}/api/v1/cluster", addr);
        info!("📈 Prometheus metrics at http://{}/metrics", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("Shutting down background engines");
        *sweeper_shutdown.write() = true;
        manager.stop();
        tombstones.stop();
        sync_engine.stop();
        replication.stop();

        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    let internal_routes = Router::new()
        .route("/health", get(internal::health))
        .route("/tenant/{tenant_id}/storage", get(internal::tenant_storage))
        .route("/buckets", get(internal::list_buckets))
        .route("/tenant-sync", post(internal::tenant_sync))
        .route("/user-sync", post(internal::user_sync))
        .route("/access-key-sync", post(internal::access_key_sync))
        .route(
            "/bucket-permission-sync",
            post(internal::bucket_permission_sync),
        )
        .route("/idp-provider-sync", post(internal::idp_provider_sync))
        .route(
            "/idp-provider-delete-sync",
            post(internal::idp_provider_delete_sync),
        )
        .route("/group-mapping-sync", post(internal::group_mapping_sync))
        .route("/deletion-log-sync", post(internal::deletion_log_sync))
        .route(
            "/objects/{tenant_id}/{bucket}/{*key}",
            put(internal::put_object)
                .delete(internal::delete_object)
                .head(internal::head_object),
        )
        .route(
            "/bucket-permissions",
            post(internal::receive_bucket_permission),
        )
        .route("/bucket-acl", post(internal::receive_bucket_acl))
        .route("/bucket-config", post(internal::receive_bucket_config))
        // Inner layer runs second: rate limit first, then the envelope
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            envelope_auth,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let admin_routes = Router::new()
        .route("/initialize", post(admin::initialize))
        .route("/enable", post(admin::enable))
        .route("/disable", post(admin::disable))
        .route("/status", get(admin::cluster_status))
        .route("/stats", get(admin::cluster_stats))
        .route("/nodes", post(admin::add_node).get(admin::list_nodes))
        .route(
            "/nodes/{node_id}",
            get(admin::get_node).delete(admin::remove_node),
        )
        .route(
            "/nodes/{node_id}/health-history",
            get(admin::node_health_history),
        )
        .route("/sync/{kind}/status", get(admin::sync_status))
        .route(
            "/replication/rules",
            post(admin::create_rule).get(admin::list_rules),
        )
        .route("/replication/rules/{rule_id}", delete(admin::delete_rule))
        .route(
            "/migrations",
            post(admin::create_migration).get(admin::list_migrations),
        )
        .route("/migrations/{job_id}", get(admin::get_migration))
        .route(
            "/migrations/{job_id}/cancel",
            post(admin::cancel_migration),
        );

    Router::new()
        .nest("/api/internal/cluster", internal_routes)
        .nest("/api/v1/cluster", admin_routes)
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
