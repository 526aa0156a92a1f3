use axum::{Router, middleware, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::auth::auth_middleware;
use crate::handlers::{claims, metrics, namespaces, pools, quotas, watch};
use crate::request_id::request_id_middleware;
use pkg_controllers::{ClaimController, ControllerConfig, PoolController};
use pkg_metrics::{MetricsRegistry, PoolRecorder};
use pkg_state::{StateStore, StoreError};
use pkg_types::namespace::Namespace;

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: String,
    pub join_token: String,
    pub controllers: ControllerConfig,
}

/// All routes. Everything but `/metrics` requires the bearer token.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/watch", get(watch::watch_events))
        .route(
            "/api/v1/namespaces",
            get(namespaces::list_namespaces).post(namespaces::create_namespace),
        )
        .route(
            "/api/v1/namespaces/{ns}",
            get(namespaces::get_namespace)
                .put(namespaces::update_namespace)
                .delete(namespaces::delete_namespace),
        )
        .route(
            "/api/v1/resourcepools",
            get(pools::list_pools).post(pools::create_pool),
        )
        .route(
            "/api/v1/resourcepools/{name}",
            get(pools::get_pool)
                .put(pools::update_pool)
                .delete(pools::delete_pool),
        )
        .route(
            "/api/v1/namespaces/{ns}/resourcepoolclaims",
            get(claims::list_claims).post(claims::create_claim),
        )
        .route(
            "/api/v1/namespaces/{ns}/resourcepoolclaims/{name}",
            get(claims::get_claim)
                .put(claims::update_claim)
                .delete(claims::delete_claim),
        )
        .route(
            "/api/v1/namespaces/{ns}/resourcequotas",
            get(quotas::list_quotas),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/metrics", get(metrics::render_metrics))
        .merge(api_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let store = StateStore::new(&config.data_dir).await?;
    let registry = Arc::new(MetricsRegistry::new());
    let recorder = PoolRecorder::new(registry.clone());

    seed_default_namespace(&store).await?;

    PoolController::new(store.clone(), recorder.clone(), config.controllers.clone()).start();
    ClaimController::new(store.clone(), recorder, config.controllers.clone()).start();

    let state = AppState {
        store: store.clone(),
        metrics: registry,
        join_token: config.join_token,
    };
    let app = build_router(state);

    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    store.close().await?;
    Ok(())
}

async fn seed_default_namespace(store: &StateStore) -> anyhow::Result<()> {
    match store.create(Namespace::new("default")).await {
        Ok(_) => info!("Seeded namespace: default"),
        Err(StoreError::AlreadyExists(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
