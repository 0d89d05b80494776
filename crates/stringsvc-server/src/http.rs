use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use stringsvc_core::{AuthProvider, ServiceError};

use crate::endpoints::{
    AuthRequest, AuthResponse, CountRequest, CountResponse, Endpoints, HealthResponse, UppercaseRequest,
    UppercaseResponse,
};
use crate::error::ApiError;

/// Routes reachable without a bearer token.
pub const PUBLIC_PATHS: [&str; 4] = ["/auth", "/health", "/metrics", "/api-docs/openapi.json"];

#[derive(Clone)]
pub struct HttpState {
    pub endpoints: Arc<Endpoints>,
    pub auth: Arc<AuthProvider>,
    pub metrics: Option<PrometheusHandle>,
}

/// Principal taken from a verified bearer token.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

#[derive(OpenApi)]
#[openapi(
    paths(auth, uppercase, count, health),
    components(schemas(
        AuthRequest,
        AuthResponse,
        UppercaseRequest,
        UppercaseResponse,
        CountRequest,
        CountResponse,
        HealthResponse
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_jwt",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/auth", post(auth))
        .route("/uppercase", post(uppercase))
        .route("/count", post(count))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[utoipa::path(
    post,
    path = "/auth",
    request_body = AuthRequest,
    responses(
        (status = 200, description = "Token issued, valid for 120 seconds", body = AuthResponse),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "Incorrect credentials")
    )
)]
async fn auth(State(state): State<HttpState>, body: Bytes) -> Result<Json<AuthResponse>, ApiError> {
    let req: AuthRequest = decode(&body)?;
    Ok(Json(state.endpoints.auth(req)?))
}

#[utoipa::path(
    post,
    path = "/uppercase",
    request_body = UppercaseRequest,
    responses(
        (status = 200, description = "Uppercased input", body = UppercaseResponse),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "Missing, invalid or expired token"),
        (status = 422, description = "Empty input", body = UppercaseResponse)
    ),
    security(("bearer_jwt" = []))
)]
async fn uppercase(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: UppercaseRequest = decode(&body)?;
    tracing::debug!(principal = %principal.0, "uppercase");
    match state.endpoints.uppercase(req) {
        Ok(resp) => Ok(Json(resp).into_response()),
        Err(ApiError::EmptyInput) => {
            let resp = UppercaseResponse {
                v: String::new(),
                err: ServiceError::EmptyInput.to_string(),
            };
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(resp)).into_response())
        }
        Err(e) => Err(e),
    }
}

#[utoipa::path(
    post,
    path = "/count",
    request_body = CountRequest,
    responses(
        (status = 200, description = "Byte length of the input", body = CountResponse),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "Missing, invalid or expired token")
    ),
    security(("bearer_jwt" = []))
)]
async fn count(
    State(state): State<HttpState>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Result<Json<CountResponse>, ApiError> {
    let req: CountRequest = decode(&body)?;
    tracing::debug!(principal = %principal.0, "count");
    Ok(Json(state.endpoints.count(req)))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Serving", body = HealthResponse),
        (status = 503, description = "Not serving", body = HealthResponse)
    )
)]
async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let resp = state.endpoints.health();
    let status = if resp.status {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}

async fn render_metrics(State(state): State<HttpState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn auth_middleware(State(state): State<HttpState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let path = req.uri().path();
    if PUBLIC_PATHS.iter().any(|public| *public == path) {
        return Ok(next.run(req).await);
    }

    let header = req.headers().get(header::AUTHORIZATION).and_then(|h| h.to_str().ok());
    let principal = state.auth.authorize(header)?;
    req.extensions_mut().insert(Principal(principal));
    Ok(next.run(req).await)
}
