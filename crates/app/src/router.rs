use std::sync::Arc;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use jobboard_storage::Database;

use crate::auth::TokenValidator;
use crate::workflow::{Clock, RegistrationWorkflow};
use crate::{registrations, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Clock,
    workflow: RegistrationWorkflow,
    token_validator: TokenValidator,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, auth_secret: &[u8]) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let workflow = RegistrationWorkflow::new(storage.clone(), clock.clone());
        Self {
            metrics,
            storage,
            clock,
            workflow,
            token_validator: TokenValidator::new(auth_secret),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock.clone();
        self.workflow = RegistrationWorkflow::new(self.storage.clone(), clock);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn workflow(&self) -> &RegistrationWorkflow {
        &self.workflow
    }

    pub fn token_validator(&self) -> &TokenValidator {
        &self.token_validator
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/registrations",
            post(registrations::submit).get(registrations::list),
        )
        .route("/registrations/mine", get(registrations::mine))
        .route("/registrations/:id", get(registrations::fetch))
        .route("/registrations/:id/approve", post(registrations::approve))
        .route("/registrations/:id/reject", post(registrations::reject))
        .route("/companies/:id", get(registrations::company))
        .route_layer(middleware::from_fn(record_request))
        .with_state(state)
}

async fn record_request(matched: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let route = matched
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = request.method().to_string();

    let response = next.run(request).await;
    counter!(
        "api_requests_total",
        "route" => route,
        "method" => method,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(state.storage().pool()).await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            tracing::error!(stage = "app", error = %err, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
