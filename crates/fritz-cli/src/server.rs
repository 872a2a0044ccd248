use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use fritz_core::{exposition, GatewayCollector, HomeCollector, UpnpClient};
use tokio::net::{lookup_host, TcpListener};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayCollector<UpnpClient>>,
    pub home: Option<Arc<HomeCollector>>,
}

/// Resolves the listen address; ":9133" is shorthand for every interface.
pub async fn resolve_listen_address(raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("listen address must not be empty");
    }

    let full = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    let addr = lookup_host(full.as_str())
        .await
        .with_context(|| format!("invalid listen address {raw:?}"))?
        .next()
        .with_context(|| format!("listen address {raw:?} resolves to nothing"));
    addr
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route(
            "/",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/metrics")]) }),
        )
        .with_state(state)
}

/// One collection pass over every configured source, rendered as text.
pub async fn render(state: &AppState) -> Result<String> {
    let mut samples = state.gateway.collect().await;
    if let Some(home) = &state.home {
        samples.extend(home.collect().await);
    }
    Ok(exposition::encode(&samples)?)
}

async fn metrics(State(state): State<AppState>) -> Response {
    match render(&state).await {
        Ok(body) => ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            error!(error = %err, "cannot encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    info!(%addr, "serving /metrics");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("received ctrl-c, stopping"),
        Err(err) => warn!(error = %err, "cannot listen for ctrl-c"),
    }
}
