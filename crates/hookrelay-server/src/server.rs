use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use hookrelay_delivery::{DeliveryChannel, HttpChannel, WorkerPool};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    admin, bootstrap, config::AppConfig, handlers, intake, metrics, state::AppState,
};

pub struct HookRelayServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
    channel: Arc<dyn DeliveryChannel>,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        // Provider webhook
        .route("/meta/webhook", get(intake::verify).post(intake::receive))
        .nest("/admin", admin::admin_routes())
        .layer(middleware::from_fn(track_http_metrics))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Records request count and latency per matched route template, so
/// identifiers in paths do not create new series.
async fn track_http_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;
    metrics::record_http_request(&method, &route, response.status().as_u16(), started.elapsed());
    response
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Connects storage, seeds sample data if enabled and builds the router.
    pub async fn build(self) -> anyhow::Result<HookRelayServer> {
        let channel: Arc<dyn DeliveryChannel> =
            Arc::new(HttpChannel::new(self.config.delivery.channel_config())?);
        let state = AppState::from_config(self.config).await?;

        if state.config.bootstrap.seed_sample_data {
            bootstrap::seed_sample_data(&state.resolver).await?;
        }

        let app = build_app(state.clone());

        Ok(HookRelayServer {
            addr: self.addr,
            app,
            state,
            channel,
        })
    }
}

impl HookRelayServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves until ctrl-c, then stops the delivery workers within the
    /// configured grace period.
    pub async fn run(self) -> anyhow::Result<()> {
        let workers = WorkerPool::start(
            self.state.queue.clone(),
            self.channel.clone(),
            self.state.config.delivery.worker_config(),
        );
        let purge = self
            .state
            .cache
            .clone()
            .start_purge_task(self.state.config.cache.purge_interval());

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        workers.shutdown().await;
        purge.abort();
        if let Some(pg) = &self.state.postgres {
            pg.close().await;
        }

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
