mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use gantry_core::ReloadSupervisor;
use gantry_dispatch::Dispatcher;
use gantry_events::EventBus;
use gantry_governor::Governor;
use gantry_scheduler::SchedulerEngine;
use gantry_session::SessionStore;
use gantry_storage::Store;
use gantry_workflow::WorkflowEngine;
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

pub use error::{ApiError, ApiResult};

/// Everything a handler needs to reach the engine. Cloning is cheap — every
/// field is an `Arc` (or already `Clone`, like `EventBus`) — so this is
/// handed to axum as the router's shared `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub events: EventBus,
    pub dispatcher: Arc<Dispatcher>,
    pub workflow_engine: Arc<WorkflowEngine>,
    pub scheduler: Arc<SchedulerEngine>,
    pub governor: Arc<Governor>,
    pub sessions: Arc<SessionStore>,
    pub supervisor: Arc<ReloadSupervisor>,
    api_token: Arc<RwLock<Option<String>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        events: EventBus,
        dispatcher: Arc<Dispatcher>,
        workflow_engine: Arc<WorkflowEngine>,
        scheduler: Arc<SchedulerEngine>,
        governor: Arc<Governor>,
        sessions: Arc<SessionStore>,
        supervisor: Arc<ReloadSupervisor>,
        api_token: Option<String>,
    ) -> Self {
        Self {
            store,
            events,
            dispatcher,
            workflow_engine,
            scheduler,
            governor,
            sessions,
            supervisor,
            api_token: Arc::new(RwLock::new(api_token)),
        }
    }

    pub async fn api_token(&self) -> Option<String> {
        self.api_token.read().await.clone()
    }

    pub async fn set_api_token(&self, token: Option<String>) {
        *self.api_token.write().await = token;
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    code: Option<String>,
}

/// Bearer-token admission gate (§6: "authentication via bearer token from
/// config"). A `None` configured token disables auth entirely, matching a
/// single-operator local daemon with no token configured. `/healthz` is
/// always reachable so a process supervisor can probe liveness without a
/// credential.
async fn require_bearer_token(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || request.uri().path() == "/healthz" {
        return next.run(request).await;
    }

    let Some(expected) = state.api_token().await else {
        return next.run(request).await;
    };

    if extract_bearer(request.headers()).as_deref() == Some(expected.as_str()) {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorEnvelope {
            error: "missing or invalid bearer token".to_string(),
            code: Some("unauthorized".to_string()),
        }),
    )
        .into_response()
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())?;
    let trimmed = auth.trim();
    let bearer = trimmed.strip_prefix("Bearer ").or_else(|| trimmed.strip_prefix("bearer "))?;
    let token = bearer.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(cors)
        .with_state(state)
}

/// Binds and serves the HTTP API until ctrl-c or the supervisor's shutdown
/// token fires, whichever comes first.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.supervisor.shutdown_token();
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gantry-server: listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        })
        .await?;
    Ok(())
}
