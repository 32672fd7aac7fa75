mod handlers;

use std::{
    fs::File,
    io::BufReader,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use archiver_core::config::Config;
use archiver_github::{ApiMetrics, GitHub};
use archiver_pipeline::{EventProcessor, HttpLogFetcher, Registry};
use archiver_storage::AzureBlobStore;
use axum::{
    Router,
    extract::{ConnectInfo, FromRef},
    http::{HeaderName, Request, StatusCode, header},
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::handlers::build_router;

const CONFIG_ENV: &str = "ARCHIVER_CONFIG";

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<Registry>,
    metrics: Option<Arc<ApiMetrics>>,
    /// Cancelled on shutdown; in-flight deliveries stop at their current stage.
    shutdown: CancellationToken,
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config: Arc<Config> = {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.yml".to_string());
        let file = BufReader::new(File::open(&path).expect("Failed to open config file"));
        Arc::new(serde_yaml::from_reader(file).expect("Failed to parse config file"))
    };
    let github = GitHub::new(&config.github).expect("Failed to create GitHub client");
    let store = AzureBlobStore::new(&config.storage).expect("Failed to create storage client");
    let fetcher = HttpLogFetcher::new(config.fetch.timeout()).expect("Failed to create fetcher");
    let processor = EventProcessor::new(github.clone(), Arc::new(fetcher), Arc::new(store));
    let registry = Registry::builder().register(Arc::new(processor)).build();
    tracing::info!("Handling events: {}", registry.event_types().join(", "));

    let shutdown = CancellationToken::new();
    let state = AppState {
        config: config.clone(),
        registry: Arc::new(registry),
        metrics: github.metrics(),
        shutdown: shutdown.clone(),
    };
    let router = app(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(addr).await.expect("bind error");
    tracing::info!("Web server: Listening on {}", addr);
    if let Err(e) =
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown)).await
    {
        tracing::error!("Web server error: {e}");
    }
    tracing::info!("Shut down gracefully");
}

fn app(state: AppState) -> Router {
    let sensitive_headers: Arc<[_]> =
        vec![header::AUTHORIZATION, HeaderName::from_static("x-hub-signature-256")].into();
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers.clone())
        .sensitive_response_headers(sensitive_headers)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(MyMakeSpan { level: Level::INFO })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(120),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash());
    build_router().with_state(state).layer(middleware)
}

/// Waits for SIGINT or SIGTERM, then cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    wait_for_signal().await.expect("Failed to install signal handler");
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}

#[derive(Debug, Clone)]
pub struct MyMakeSpan {
    level: Level,
}

impl<B> MakeSpan<B> for MyMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        // Behind a proxy the peer is the proxy; prefer the first forwarded address.
        let forwarded = request
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        let ip = forwarded
            .or_else(|| {
                request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(a)| a.ip())
            })
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("[unknown]");
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    ip = %ip,
                    user_agent = %user_agent,
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
