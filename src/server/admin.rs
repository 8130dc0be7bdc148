//! Admin HTTP API served on the secondary port
//!
//! - `GET /api/ping` -> `pong`
//! - `GET /api/version`
//! - `GET /api/info` -> store statistics
//! - `/api/acl?action=list|add|del`, add/del with `{"rules": [...]}`
//! - `GET /metrics` -> Prometheus text

use super::acl::Acl;
use super::store::KeyStore;
use crate::common::{Error, MetricsRegistry};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<KeyStore>,
    pub acl: Arc<Acl>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/ping", axum::routing::get(ping))
        .route("/api/version", axum::routing::get(version))
        .route("/api/info", axum::routing::get(info))
        .route("/api/acl", axum::routing::any(acl))
        .route("/metrics", axum::routing::get(metrics))
        .with_state(state)
}

async fn ping() -> impl IntoResponse {
    "pong"
}

async fn version() -> impl IntoResponse {
    axum::Json(json!({ "version": crate::VERSION }))
}

async fn info(State(state): State<AdminState>) -> impl IntoResponse {
    let stats = state.store.stats();
    axum::Json(json!({
        "store": stats,
        "connections": state.metrics.active_connections.get(),
        "uptime_seconds": state.metrics.uptime_seconds(),
    }))
}

#[derive(Debug, Deserialize)]
struct AclQuery {
    action: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AclRules {
    pub rules: Vec<String>,
}

fn error_response(e: Error) -> Response {
    (
        e.to_http_status(),
        axum::Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

async fn acl(
    State(state): State<AdminState>,
    Query(query): Query<AclQuery>,
    body: Bytes,
) -> Response {
    let action = query.action.unwrap_or_default();
    if action == "list" {
        return axum::Json(AclRules {
            rules: state.acl.rules(),
        })
        .into_response();
    }

    let apply: fn(&Acl, &str) -> crate::Result<super::acl::AclRule> = match action.as_str() {
        "add" => Acl::add,
        "del" => Acl::del,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "error": format!("unknown action '{}'", other) })),
            )
                .into_response()
        }
    };

    let request: AclRules = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(Error::Acl(format!("invalid body: {}", e))),
    };
    for rule in &request.rules {
        if let Err(e) = apply(&state.acl, rule) {
            return error_response(e);
        }
    }

    axum::Json(AclRules {
        rules: state.acl.rules(),
    })
    .into_response()
}

async fn metrics(State(state): State<AdminState>) -> impl IntoResponse {
    state.metrics.sync_store(&state.store.stats());
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.metrics.to_prometheus(),
    )
}

/// Bind and serve the admin API until `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: AdminState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Admin API listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
