//! pulmod: the pulmo-nesy HTTP server.
//!
//! - `POST /query`: `{"query": "..."}` → `{"response": "...", "source": "system|symbolic|sub-symbolic"}`
//! - `GET  /health`: server and knowledge base status
//!
//! Configuration comes from `$PULMO_CONFIG` or `$XDG_CONFIG_HOME/pulmo-nesy/config.toml`;
//! `PULMO_DATA_DIR`, `PULMO_SERVER_BIND` and `PULMO_SERVER_PORT` override it.
//!
//! Build and run: `cargo run --features server --bin pulmod`

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use pulmo_nesy::config::PulmoConfig;
use pulmo_nesy::kb::Origin;
use pulmo_nesy::paths::PulmoPaths;
use pulmo_nesy::router::{Response, Router as QueryRouter};

// ── Server state ──────────────────────────────────────────────────────────

struct ServerState {
    router: QueryRouter,
}

// ── Request/response types ────────────────────────────────────────────────

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    generation: u64,
    origin: Origin,
    facts: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let kb = state.router.knowledge_base().active();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        generation: kb.generation().value(),
        origin: kb.origin(),
        facts: kb.facts().len(),
    })
}

async fn query_handler(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Response>, (StatusCode, Json<ErrorResponse>)> {
    // Oracle and engine calls block; keep them off the async workers.
    let result = tokio::task::spawn_blocking(move || state.router.handle(&req.query)).await;
    match result {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(e)) => {
            tracing::error!(error = ?e, "query failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    detail: e.user_message().to_string(),
                }),
            ))
        }
        Err(e) => {
            tracing::error!(error = %e, "query task panicked");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    detail: "Internal error.".to_string(),
                }),
            ))
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────

fn load_config() -> miette::Result<PulmoConfig> {
    let mut config = match std::env::var("PULMO_CONFIG") {
        Ok(path) => PulmoConfig::load(&PathBuf::from(path))?,
        Err(_) => PulmoConfig::load_or_default(&PulmoPaths::resolve()?.config_file())?,
    };
    if let Ok(dir) = std::env::var("PULMO_DATA_DIR") {
        config.store.data_dir = Some(PathBuf::from(dir));
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,redb=warn")),
        )
        .init();

    let bind = std::env::var("PULMO_SERVER_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PULMO_SERVER_PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("{bind}:{port}");

    let config = load_config().unwrap_or_else(|e| {
        tracing::error!("failed to load configuration: {e:?}");
        std::process::exit(1);
    });
    let router = QueryRouter::from_config(&config).unwrap_or_else(|e| {
        tracing::error!("failed to open knowledge base: {e:?}");
        std::process::exit(1);
    });
    let state = Arc::new(ServerState { router });

    tracing::info!(
        model = %config.oracle.model,
        oracle = %config.oracle.base_url,
        "pulmod initialized"
    );

    let app = Router::new()
        .route("/health", get(health))
        .route("/query", post(query_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("pulmod listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        });

    // Serve with graceful shutdown on SIGTERM/SIGINT.
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = ctrl_c => {},
                            _ = sigterm.recv() => {},
                        }
                    }
                    Err(_) => {
                        ctrl_c.await.ok();
                    }
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
            }
            tracing::info!("pulmod shutting down");
        })
        .await;
    if let Err(e) = served {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
