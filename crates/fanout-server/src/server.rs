//! `FanoutServer`: Axum HTTP and WebSocket surface over the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::hub::distributor::Distributor;
use crate::hub::session::{SessionState, run_session};
use crate::hub::{Hub, HubSettings};
use crate::metrics::{UPGRADE_FAILURES_TOTAL, render};
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The broadcast hub.
    pub hub: Arc<Hub>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,
}

/// The fanout server: one hub, one distribution loop, one listener.
pub struct FanoutServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    distributor: Mutex<Option<Distributor>>,
    distributor_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl FanoutServer {
    /// Create a server. Nothing runs until [`listen`](Self::listen).
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<Self, ServerError> {
        config.validate()?;
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, distributor) = Hub::new(HubSettings::from(&config), shutdown.token());
        Ok(Self {
            config,
            hub,
            distributor: Mutex::new(Some(distributor)),
            distributor_task: Mutex::new(None),
            shutdown,
            metrics,
            start_time: Instant::now(),
        })
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.config.max_message_size,
        };

        let mut router = Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .route("/health", get(health_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        let mut router = router.with_state(state);
        if let Some(dir) = &self.config.static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start the distribution loop and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        if self.distributor.lock().is_none() {
            return Err(ServerError::AlreadyListening);
        }
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

        let distributor = self
            .distributor
            .lock()
            .take()
            .ok_or(ServerError::AlreadyListening)?;
        *self.distributor_task.lock() = Some(tokio::spawn(distributor.run()));

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled_owned().await })
                .await;
            if let Err(error) = result {
                error!(%error, "http server error");
            }
        });

        info!(
            addr = %local_addr,
            ws_path = %self.config.ws_path,
            "fanout server listening"
        );
        Ok((local_addr, server))
    }

    /// Drain the queue, close every connection and wait for the serve task.
    pub async fn stop(&self, server: JoinHandle<()>) -> ShutdownOutcome {
        let distributor = self.distributor_task.lock().take();
        let outcome = self
            .shutdown
            .graceful_shutdown(
                &self.hub,
                distributor,
                Some(server),
                self.config.shutdown_timeout(),
            )
            .await;
        info!(?outcome, "fanout server stopped");
        outcome
    }

    /// Get the hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET {ws_path}
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    debug!(peer = %peer_addr, state = %SessionState::Upgrading, "upgrade requested");
    let hub = state.hub.clone();
    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(move |error| {
            warn!(peer = %peer_addr, %error, state = %SessionState::Closed, "upgrade failed");
            counter!(UPGRADE_FAILURES_TOTAL).increment(1);
        })
        .on_upgrade(move |socket| run_session(socket, peer_addr, hub))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats().await;
    Json(health::health_check(state.start_time, &stats))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
