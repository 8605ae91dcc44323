//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use super::types::*;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::crypto::EnvelopeCodec;
use crate::lifecycle::{ReadOutcome, SecretService, ServiceError, WriteRequest};
use crate::secret::ExpirationCode;
use crate::store::{create_secret_store, SecretStore};
use crate::sweeper::{ExpirySweeper, SweepScheduler};
use crate::validation::PwnedPasswords;

/// Shared application state.
pub struct AppState {
    pub service: Arc<SecretService>,
    /// Applied when a create request omits `expire`
    pub default_expiration: ExpirationCode,
    /// Applied when a create request omits `tries`
    pub default_tries: u32,
    /// Base of the read links handed back on create
    pub public_url: String,
}

impl AppState {
    pub fn new(service: Arc<SecretService>, config: &Config) -> Self {
        Self {
            service,
            default_expiration: config.default_expiration,
            default_tries: config.default_tries,
            public_url: config.public_base_url(),
        }
    }
}

/// Link to the page where the recipient enters the passphrase.
fn read_link(public_url: &str, external_id: &str) -> String {
    format!("{}/secret/{}", public_url.trim_end_matches('/'), external_id)
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/secret", post(create_secret))
        .route("/api/secret/read", post(read_secret))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store, start the expiry sweeper and serve until SIGTERM/SIGINT.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = create_secret_store(config.store, config.database_path.clone()).await?;
    if !store.is_persistent() {
        tracing::warn!("Using the in-memory store, secrets will not survive a restart");
    }
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut service = SecretService::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        EnvelopeCodec::new(config.kdf_iterations),
    )
    .with_liveness(config.liveness)
    .with_settings(config.lifecycle_settings());

    match PwnedPasswords::new(config.breach_api_url.clone()) {
        Ok(checker) => service = service.with_breach_checker(Arc::new(checker)),
        Err(e) => tracing::warn!("Breach lookups disabled: {}", e),
    }

    let sweeper = SweepScheduler::new(
        Arc::new(ExpirySweeper::new(store, clock, config.liveness)),
        config.sweep_interval,
    );
    sweeper.start().await;

    let state = Arc::new(AppState::new(Arc::new(service), &config));
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let store = state.service.store();
    let (code, status) = match store.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!("Health check could not reach the database: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        persistent: store.is_persistent(),
    };
    (code, Json(body)).into_response()
}

/// Create a secret.
async fn create_secret(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateSecretRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text()),
    };

    let request = WriteRequest {
        secret: req.secret,
        passphrase: req.passphrase,
        expire: req
            .expire
            .unwrap_or_else(|| state.default_expiration.to_string()),
        tries: req.tries.unwrap_or(state.default_tries),
        check_breach: req.haveibeenpwned,
    };

    match state.service.write(request).await {
        Ok(result) => {
            let body = CreatedBody {
                status: Status::Created,
                details: messages::CREATED.to_string(),
                link: read_link(&state.public_url, &result.external_id),
                external_id: result.external_id,
                expires_at: result.expires_at,
                expires_on: result.expires_on,
            };
            (StatusCode::CREATED, Json(ResponseEnvelope::new(body))).into_response()
        }
        Err(e) => service_error_response(e),
    }
}

/// Read a secret. A successful read deletes it.
async fn read_secret(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReadSecretRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text()),
    };

    let outcome = match state.service.read(&req.external_id, &req.passphrase).await {
        Ok(outcome) => outcome,
        Err(e) => return service_error_response(e),
    };

    let (code, status, msg) = match outcome {
        ReadOutcome::Revealed(plaintext) => (StatusCode::OK, Status::Success, plaintext),
        ReadOutcome::WrongPassphrase { remaining } => (
            StatusCode::UNAUTHORIZED,
            Status::Invalid,
            messages::invalid(remaining),
        ),
        ReadOutcome::ExhaustedAndDeleted => (
            StatusCode::UNAUTHORIZED,
            Status::Invalid,
            messages::EXCEEDED.to_string(),
        ),
        ReadOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Status::Expired,
            messages::NOT_FOUND.to_string(),
        ),
    };
    (code, Json(ResponseEnvelope::new(ReadBody { status, msg }))).into_response()
}

fn error_response(code: StatusCode, details: String) -> Response {
    let body = ErrorBody {
        status: Status::Error,
        details,
    };
    (code, Json(ResponseEnvelope::new(body))).into_response()
}

fn service_error_response(e: ServiceError) -> Response {
    match e {
        ServiceError::Validation(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        ServiceError::RepositoryUnavailable(reason) => {
            tracing::error!("Repository unavailable: {}", reason);
            error_response(StatusCode::SERVICE_UNAVAILABLE, messages::UNEXPECTED.to_string())
        }
        e @ (ServiceError::IdSpaceExhausted(_) | ServiceError::Internal(_)) => {
            tracing::error!("Request failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, messages::UNEXPECTED.to_string())
        }
    }
}
