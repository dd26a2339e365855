use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use clap_serde_derive::ClapSerde;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::ServerResult;
use crate::host::ModelHost;
use crate::inference::task::generate::{GenerateRequest, GenerateResponse};

mod config;
mod error;
mod host;
mod inference;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = "MistralServer.toml")]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[derive(Clone)]
struct AppState {
    host: Arc<ModelHost>,
}

macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {{
        error!($fmt $(, $arg)*);
        std::process::exit($code);
    }};
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(conf) => conf.merge(args.opt_config),
        Err(err) => {
            if args.config_file == "MistralServer.toml" {
                Config::default().merge(args.opt_config)
            } else {
                exit_err!(
                    1,
                    "Failed to read configuration file {} with error: {}",
                    args.config_file,
                    err
                );
            }
        }
    };

    // A failed load keeps the process up: /health stays reachable and
    // /generate/ answers 503 until a restart.
    let host = match ModelHost::initialize(&config) {
        Ok(host) => host,
        Err(err) => {
            error!("{err}");
            ModelHost::unloaded()
        }
    };
    let state = AppState {
        host: Arc::new(host),
    };

    let router = Router::new()
        .route("/generate/", post(handle_generate_request))
        .route("/health", get(handle_health_request))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[axum_macros::debug_handler]
async fn handle_generate_request(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> ServerResult<(StatusCode, Json<GenerateResponse>)> {
    let host = state.host.clone();
    // Generation is compute bound; keep it off the async workers.
    let response = tokio::task::spawn_blocking(move || host.generate(req)).await??;
    Ok((StatusCode::OK, Json(response)))
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    gpu_available: bool,
}

#[axum_macros::debug_handler]
async fn handle_health_request(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.host.status();
    Json(HealthResponse {
        status: "healthy",
        model_loaded: status.loaded,
        gpu_available: status.gpu_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unloaded_state() -> AppState {
        AppState {
            host: Arc::new(ModelHost::unloaded()),
        }
    }

    #[tokio::test]
    async fn generate_before_initialization_returns_service_unavailable() {
        let req: GenerateRequest =
            serde_json::from_value(serde_json::json!({ "prompt": "What is 2+2?" })).unwrap();
        let err = handle_generate_request(State(unloaded_state()), Json(req))
            .await
            .err()
            .expect("expected an error response");
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_succeeds_before_initialization() {
        let Json(health) = handle_health_request(State(unloaded_state())).await;
        assert_eq!(health.status, "healthy");
        assert!(!health.model_loaded);
    }
}
