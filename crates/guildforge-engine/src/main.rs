//! guildforge engine service.
//!
//! Opens the session store, resumes interrupted sessions, runs the cleanup
//! scheduler and serves the provisioning API.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check (session store reachable)
//!
//! ## Provisioning
//! - `POST /v1/provision` - Provision a blueprint into a tenant
//! - `POST /v1/preview` - Plan a blueprint without applying it
//! - `GET /v1/sessions/:tenant_id/:initiator_id` - Get session status

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use guildforge_core::{Blueprint, InitiatorId, ResourceId, SessionKey, TenantId};
use guildforge_engine::{
    AuditSink, EngineConfig, EngineError, HttpResourceClient, JsonLinesAuditSink, Provisioner,
    ProvisionRequest, ProvisioningService, TracingAuditSink,
};
use guildforge_store::{RocksStore, Store};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Service = ProvisioningService<HttpResourceClient, RocksStore>;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<Service>,
    default_blueprint: Option<Arc<Blueprint>>,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "guildforge-engine",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.store().ping() {
        Ok(()) => (StatusCode::OK, "ready").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Store not ready");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

// ============================================================================
// Provisioning Endpoints
// ============================================================================

/// Request body for provisioning and previews.
#[derive(Debug, Deserialize)]
struct ProvisionBody {
    tenant_id: TenantId,
    initiator_id: InitiatorId,
    /// Full blueprint; falls back to the configured default.
    #[serde(default)]
    blueprint: Option<Blueprint>,
    /// Restrict the blueprint to these categories.
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    origin_channel: Option<ResourceId>,
}

#[derive(Debug, Serialize)]
struct ProvisionResponse {
    session_key: SessionKey,
}

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

fn error_response(e: &EngineError) -> Response {
    let code = e.http_status_code();
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse::new(e.to_string(), code)),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(message, 400)),
    )
        .into_response()
}

/// Turn a request body into a provisioning request.
fn build_request(
    body: ProvisionBody,
    default_blueprint: Option<&Blueprint>,
) -> Result<ProvisionRequest, Response> {
    let blueprint = match (body.blueprint, default_blueprint) {
        (Some(blueprint), _) => blueprint,
        (None, Some(default)) => default.clone(),
        (None, None) => return Err(bad_request("no blueprint given and no default configured")),
    };
    let blueprint = if body.categories.is_empty() {
        blueprint
    } else {
        blueprint
            .subset(&body.categories)
            .map_err(|e| bad_request(e.to_string()))?
    };

    let mut request = ProvisionRequest::new(body.tenant_id, body.initiator_id, blueprint);
    request.origin_channel = body.origin_channel;
    Ok(request)
}

/// Provision a blueprint.
///
/// POST /v1/provision
async fn provision_handler(
    State(state): State<AppState>,
    Json(body): Json<ProvisionBody>,
) -> Response {
    let request = match build_request(body, state.default_blueprint.as_deref()) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let key = request.session_key();

    match state.service.start_provisioning(request).await {
        Ok(session_key) => {
            tracing::info!(session = %session_key, "Provisioned via HTTP API");
            Json(ProvisionResponse { session_key }).into_response()
        }
        Err(e) => {
            tracing::error!(session = %key, error = %e, "Failed to provision");
            error_response(&e)
        }
    }
}

/// Plan a blueprint without applying it.
///
/// POST /v1/preview
async fn preview_handler(
    State(state): State<AppState>,
    Json(body): Json<ProvisionBody>,
) -> Response {
    let request = match build_request(body, state.default_blueprint.as_deref()) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.service.preview_plan(&request).await {
        Ok(plan) => Json(plan).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Get the status of a session.
///
/// GET /v1/sessions/:tenant_id/:initiator_id
async fn session_handler(
    State(state): State<AppState>,
    Path((tenant_id, initiator_id)): Path<(String, String)>,
) -> Response {
    let (tenant_id, initiator_id) = match (tenant_id.parse::<TenantId>(), initiator_id.parse::<InitiatorId>()) {
        (Ok(t), Ok(i)) => (t, i),
        (Err(e), _) | (_, Err(e)) => return bad_request(format!("Invalid ID: {e}")),
    };

    match state
        .service
        .get_session_status(&SessionKey::new(tenant_id, initiator_id))
        .await
    {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Provisioning
        .route("/v1/provision", post(provision_handler))
        .route("/v1/preview", post(preview_handler))
        .route("/v1/sessions/:tenant_id/:initiator_id", get(session_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,guildforge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting guildforge engine");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let api_url =
        std::env::var("PLATFORM_API_URL").unwrap_or_else(|_| "http://localhost:8090".to_string());
    let api_token = std::env::var("PLATFORM_API_TOKEN").ok();
    let config = EngineConfig::from_env();

    tracing::info!(
        data_dir = %data_dir,
        api_url = %api_url,
        cleanup_interval_secs = config.cleanup_interval_secs,
        session_inactivity_secs = config.session_inactivity_secs,
        reversible_updates = config.reversible_updates,
        "Loaded engine configuration"
    );

    let default_blueprint = match std::env::var("BLUEPRINT_PATH") {
        Ok(path) => {
            let blueprint = Blueprint::from_json(&std::fs::read_to_string(&path)?)?;
            tracing::info!(
                path = %path,
                categories = blueprint.categories.len(),
                "Loaded default blueprint"
            );
            Some(Arc::new(blueprint))
        }
        Err(_) => None,
    };

    let audit: Arc<dyn AuditSink> = match std::env::var("AUDIT_LOG_PATH") {
        Ok(path) => {
            tracing::info!(path = %path, "Writing audit events to file");
            Arc::new(JsonLinesAuditSink::open(&path)?)
        }
        Err(_) => Arc::new(TracingAuditSink),
    };

    // Initialize store and platform client
    let store = Arc::new(RocksStore::open(&data_dir)?);
    let client = Arc::new(HttpResourceClient::new(api_url, api_token)?);
    let service = Arc::new(ProvisioningService::new(client, store, audit, config));

    let cached = service.load_cache()?;
    tracing::info!(sessions = cached, "Loaded session cache");

    // Resume interrupted sessions in the background
    let resumer = Arc::clone(&service);
    tokio::spawn(async move {
        match resumer.resume_in_progress().await {
            Ok(outcomes) => {
                for (key, outcome) in outcomes {
                    match outcome {
                        Ok(()) => tracing::info!(session = %key, "Resumed session completed"),
                        Err(e) => tracing::warn!(session = %key, error = %e, "Resumed session failed"),
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to list in-progress sessions"),
        }
    });

    // Start the cleanup scheduler as a background task
    let cleanup = service.cleanup();
    tokio::spawn(async move {
        cleanup.run().await;
    });
    tracing::info!("Started session cleanup loop");

    let state = AppState {
        service,
        default_blueprint,
    };
    let app = create_router(state);

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
