//! HTTP surface for the assessor.
//!
//! ```bash
//! designcheck serve --bind 127.0.0.1:8000
//!
//! curl -X POST http://localhost:8000/assess \
//!   -H "Content-Type: application/json" \
//!   -d '{"text": "Load balancer, two API nodes, Postgres with a replica."}'
//!
//! curl http://localhost:8000/health
//! ```
//!
//! `/assess` is bounded twice: a per-client request rate (see
//! [`crate::rate_limit`]) and a shared cap on assessments in flight.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use designcheck_core::{AssessmentError, Assessor, ErrorKind, RawSubmission, SubmissionMetadata};
use serde::{Deserialize, Serialize};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rate_limit::{self, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    assessor: Arc<Assessor>,
}

#[derive(Debug, Deserialize)]
pub struct AssessRequest {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<SubmissionMetadata>,
}

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    service: &'static str,
    rubric_version: &'a str,
}

/// Limits applied to `POST /assess`. `/health` is never limited.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Assessments in flight; further requests wait for a slot.
    pub max_concurrent: usize,

    /// Requests per client per minute; 0 disables the limit.
    pub rate_limit_per_minute: u32,

    /// Identify clients by `X-Forwarded-For` / `X-Real-IP` instead of the peer address.
    pub trust_forwarded_for: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            rate_limit_per_minute: 30,
            trust_forwarded_for: false,
        }
    }
}

pub fn router(assessor: Arc<Assessor>, options: ServerOptions) -> Router {
    // One semaphore shared by every clone of the route. The rate limit sits
    // outside it so rejected clients never wait for a slot.
    let mut assess_route: MethodRouter<AppState> =
        post(assess).layer(GlobalConcurrencyLimitLayer::new(options.max_concurrent));
    if options.rate_limit_per_minute > 0 {
        let limiter = Arc::new(RateLimiter::new(
            options.rate_limit_per_minute,
            options.trust_forwarded_for,
        ));
        assess_route =
            assess_route.layer(middleware::from_fn_with_state(limiter, rate_limit::enforce));
    }

    Router::new()
        .route("/assess", assess_route)
        .route("/health", get(health))
        .with_state(AppState { assessor })
        .layer(TraceLayer::new_for_http())
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UpstreamRejected | ErrorKind::MalformedResponse | ErrorKind::InvalidScore => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn error_response(err: AssessmentError) -> Response {
    (status_for(err.kind), Json(err)).into_response()
}

async fn assess(
    State(state): State<AppState>,
    payload: Result<Json<AssessRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(AssessmentError::new(
                ErrorKind::InvalidInput,
                format!("request body: {}", rejection.body_text()),
            ))
        }
    };

    let mut raw = RawSubmission::new(request.text);
    if let Some(metadata) = request.metadata {
        raw = raw.with_metadata(metadata);
    }

    match state.assessor.assess(&raw).await {
        Ok(assessment) => Json(assessment).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "healthy",
        service: "assessment",
        rubric_version: &state.assessor.rubric().version,
    })
    .into_response()
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
