//! Axum transport for the plan sync: SSE progress stream, plan search and an admin page.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use biq_cdr::{RetailerRegistry, RetailerSelection};
use biq_core::{AusState, RetailerDescriptor};
use biq_storage::{PlanQuery, PlanStore};
use biq_sync::{
    maybe_build_scheduler, SyncConfig, SyncEvent, SyncFailure, SyncOrchestrator, SyncRequest,
    SyncServices,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "biq-web";

pub const DEFAULT_PLAN_LIMIT: usize = 100;
pub const MAX_PLAN_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub store: Arc<dyn PlanStore>,
    pub registry: Arc<RetailerRegistry>,
    pub default_chunk_size: usize,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        store: Arc<dyn PlanStore>,
        registry: Arc<RetailerRegistry>,
        default_chunk_size: usize,
    ) -> Self {
        Self {
            orchestrator,
            store,
            registry,
            default_chunk_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    pub retailer: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub priority_only: bool,
    pub cursor: Option<usize>,
    pub chunk_size: Option<usize>,
    pub session_started_at: Option<DateTime<Utc>>,
}

impl SyncQuery {
    pub fn into_request(self, default_chunk_size: usize) -> SyncRequest {
        SyncRequest {
            selection: RetailerSelection::from_params(self.retailer.as_deref(), self.priority_only),
            cursor: self.cursor.unwrap_or(0),
            chunk_size: self.chunk_size.unwrap_or(default_chunk_size),
            session_started_at: self.session_started_at,
        }
    }
}

/// Checkbox-style flag: `1`, `true`, `yes` and `on` are set, anything else is not.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct PlansQuery {
    pub state: Option<String>,
    pub retailer: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    total: usize,
    priority_count: usize,
    default_chunk_size: usize,
    retailers: Vec<RetailerDescriptor>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/retailers", get(retailers_handler))
        .route("/plans", get(plans_handler))
        .route("/sync", post(sync_handler))
        .with_state(Arc::new(state))
}

pub fn web_port_from_env() -> u16 {
    std::env::var("BIQ_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "web server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Connects, migrates, starts the optional cron scheduler and serves until shutdown.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let services = SyncServices::connect(&config).await?;
    services.store.migrate().await.context("running migrations")?;

    let scheduler = maybe_build_scheduler(&config, services.orchestrator.clone()).await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await.context("starting scheduler")?;
        info!(cron = %config.sync_cron, "sync scheduler started");
    }

    let state = AppState::new(
        services.orchestrator,
        services.store,
        services.registry,
        config.default_chunk_size,
    );
    serve(state, web_port_from_env()).await
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let retailers = state.registry.all().to_vec();
    render_html(IndexTemplate {
        total: retailers.len(),
        priority_count: retailers.iter().filter(|r| r.is_priority()).count(),
        default_chunk_size: state.default_chunk_size,
        retailers,
    })
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn retailers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RetailerDescriptor>> {
    Json(state.registry.all().to_vec())
}

async fn plans_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlansQuery>,
) -> Response {
    let plan_state = match query.state.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => match AusState::parse(raw) {
            Some(parsed) => Some(parsed),
            None => {
                return (StatusCode::BAD_REQUEST, format!("unknown state `{raw}`")).into_response()
            }
        },
        None => None,
    };
    let plan_query = PlanQuery {
        state: plan_state,
        retailer_id: query.retailer.filter(|r| !r.trim().is_empty()),
        limit: query
            .limit
            .unwrap_or(DEFAULT_PLAN_LIMIT)
            .clamp(1, MAX_PLAN_LIMIT),
    };
    match state.store.search_active(&plan_query).await {
        Ok(plans) => Json(plans).into_response(),
        Err(err) => server_error(anyhow::Error::new(err)),
    }
}

/// Runs one invocation in the background and streams its events as `data: <json>` frames.
async fn sync_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SyncQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected sync parameters");
            let event = SyncEvent::Failed(SyncFailure::new(format!(
                "invalid sync parameters: {}",
                rejection.body_text()
            )));
            return Sse::new(tokio_stream::once(Event::default().json_data(event))).into_response();
        }
    };
    let request = query.into_request(state.default_chunk_size);
    let (tx, rx) = mpsc::channel(64);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run(&request, tx).await {
            warn!(error = %err, "sync request failed");
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(event));
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err:#}")),
    )
        .into_response()
}
