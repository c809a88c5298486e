//! tierwatch daemon
//!
//! Runs a cache engine and exposes its observability surface over HTTP:
//!
//! | Path                          | Method | Body                          |
//! |-------------------------------|--------|-------------------------------|
//! | `/healthz`, `/livez`          | GET    | liveness                      |
//! | `/readyz`                     | GET    | readiness + component checks  |
//! | `/metrics`                    | GET    | Prometheus text exposition    |
//! | `/report`                     | GET    | `EngineReport` JSON           |
//! | `/alerts`                     | GET    | every alert, JSON             |
//! | `/alerts/{id}/acknowledge`    | POST   | `?actor=<name>`               |
//! | `/alerts/{id}/resolve`        | POST   | `?actor=<name>`               |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use tierwatch::alerting::{LoggingAlertSink, WebhookAlertSink};
use tierwatch::{CacheEngine, EngineConfig, Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tierwatch - two-tier cache engine with performance alerting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "TIERWATCH_CONFIG")]
    config: Option<String>,

    /// Redis URL for the shared tier (overrides the configuration file)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// HTTP bind address
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// Webhook receiving alert notifications as JSON
    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(url) = &args.redis_url {
        config.redis_url = Some(url.clone());
    }
    config.validate()?;

    info!("Starting tierwatch");
    info!("  Shared tier: {}", config.redis_url.as_deref().unwrap_or("disabled"));
    info!("  Local capacity: {} bytes / {} entries", config.local.max_size_bytes, config.local.max_entries);
    info!("  Alert rules: {}", config.alerts.rules.len());

    let notify_timeout = config.alerts.notify_timeout();
    let mut builder = CacheEngine::builder(config).alert_sink(Arc::new(LoggingAlertSink::info_level()));
    if let Some(url) = &args.webhook_url {
        builder = builder.alert_sink(Arc::new(WebhookAlertSink::new(url.clone(), notify_timeout)?));
        info!("  Alert webhook: {}", url);
    }

    let engine = Arc::new(builder.build()?);
    engine.initialize().await?;

    tokio::select! {
        result = run_http_server(&args.http_addr, Arc::clone(&engine)) => {
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    engine.shutdown().await;
    info!("tierwatch shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "redis=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

type HttpResponse = Response<Full<Bytes>>;

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    respond(status, "text/plain; charset=utf-8", body)
}

fn json<T: serde::Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

async fn handle(engine: Arc<CacheEngine>, req: Request<hyper::body::Incoming>) -> std::result::Result<HttpResponse, Infallible> {
    let path = req.uri().path().trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let response = match (req.method(), segments.as_slice()) {
        (&Method::GET, ["healthz"]) | (&Method::GET, ["livez"]) => {
            if engine.liveness().is_live() {
                text(StatusCode::OK, "ok")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "stopped")
            }
        }
        (&Method::GET, ["readyz"]) => {
            let health = engine.health().await;
            let status = if health.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json(status, &health)
        }
        (&Method::GET, ["metrics"]) => match engine.metrics_text() {
            Ok((content_type, body)) => respond(StatusCode::OK, &content_type, body),
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        (&Method::GET, ["report"]) => json(StatusCode::OK, &engine.report()),
        (&Method::GET, ["alerts"]) => json(StatusCode::OK, &engine.alerts().all()),
        (&Method::POST, ["alerts", id, action]) => {
            let actor = query_param(req.uri().query(), "actor")
                .and_then(|raw| urlencoding::decode(raw).ok())
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|| "http".to_string());
            match Uuid::parse_str(id) {
                Err(_) => text(StatusCode::BAD_REQUEST, "invalid alert id"),
                Ok(id) => {
                    let result = match *action {
                        "acknowledge" => Some(engine.alerts().acknowledge(id, &actor)),
                        "resolve" => Some(engine.alerts().resolve(id, &actor)),
                        _ => None,
                    };
                    match result {
                        None => text(StatusCode::NOT_FOUND, "not found"),
                        Some(Ok(alert)) => json(StatusCode::OK, &alert),
                        Some(Err(e @ Error::AlertNotFound(_))) => text(StatusCode::NOT_FOUND, e.to_string()),
                        Some(Err(e)) => text(StatusCode::CONFLICT, e.to_string()),
                    }
                }
            }
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

async fn run_http_server(addr: &str, engine: Arc<CacheEngine>) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid HTTP address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind HTTP server: {}", e)))?;

    info!("HTTP server listening on {}", addr);

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("HTTP accept error: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let engine = Arc::clone(&engine);

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(Arc::clone(&engine), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("HTTP connection error: {}", e);
            }
        });
    }
}
