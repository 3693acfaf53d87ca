mod config;
mod engine;
mod error;
mod factory;
mod gemini;
mod mock_engine;
mod oracle;
mod rate_limiter;
mod remote_engine;
mod types;

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    response::Json,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use config::Config;
use error::ClassifyError;
use factory::BackendFactory;
use types::{ClassifyTextsRequest, ClassifyTextsResponse, WelcomeResponse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    let settings = config.gateway_settings()?;
    tracing::info!(
        address = %config.server_address(),
        default_provider = %settings.default_provider,
        oracle_timeout = ?settings.oracle_timeout,
        request_timeout = ?config.request_timeout(),
        "Starting topic gateway"
    );

    let factory = BackendFactory::new(settings)?;
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = router(AppState::new(Arc::new(factory)), config.request_timeout())
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,topic_gateway=debug".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/classify-texts", post(classify_texts_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    factory: Arc<BackendFactory>,
}

impl AppState {
    fn new(factory: Arc<BackendFactory>) -> Self {
        Self { factory }
    }
}

async fn root_handler() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the Gen AI Inference APIs!",
    })
}

#[tracing::instrument(
    skip_all,
    fields(
        request_id = %uuid::Uuid::new_v4().simple(),
        texts = tracing::field::Empty,
        topics = tracing::field::Empty,
        provider = tracing::field::Empty,
    )
)]
async fn classify_texts_handler(
    State(state): State<AppState>,
    request: Result<Json<ClassifyTextsRequest>, JsonRejection>,
) -> Result<Json<ClassifyTextsResponse>, ClassifyError> {
    counter!("classification_requests_total").increment(1);

    let Json(request) = request?;
    if request.texts.is_empty() {
        return Err(ClassifyError::validation("texts must contain at least 1 item"));
    }
    if request.topics.is_empty() {
        return Err(ClassifyError::validation("topics must contain at least 1 item"));
    }

    let span = tracing::Span::current();
    span.record("texts", request.texts.len());
    span.record("topics", request.topics.len());

    let backend = state
        .factory
        .resolve(request.provider.as_deref(), request.model_name.as_deref())?;
    span.record("provider", backend.provider().as_str());
    tracing::info!("Processing classification request");

    let results = backend.classify(&request.texts, &request.topics).await?;

    tracing::info!(results = results.len(), "Classification completed successfully");
    Ok(Json(ClassifyTextsResponse { results }))
}
