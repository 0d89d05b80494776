use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tonic::Status;

use stringsvc_core::{AuthError, Protocol, RegistryError, ServiceError};

/// Caller-facing failures, rendered natively by each transport.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    Decode(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("incorrect credentials")]
    InvalidCredentials,

    #[error("empty string")]
    EmptyInput,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Decode(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::EmptyInput => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::Unauthenticated(_) => ApiError::Unauthenticated(e.to_string()),
            AuthError::Signing(reason) => ApiError::Internal(reason),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::EmptyInput => ApiError::EmptyInput,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(json!({ "err": self.to_string() }))).into_response();
        if matches!(self, ApiError::Unauthenticated(_) | ApiError::InvalidCredentials) {
            response
                .headers_mut()
                .insert(axum::http::header::WWW_AUTHENTICATE, axum::http::HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<ApiError> for Status {
    fn from(e: ApiError) -> Self {
        let message = e.to_string();
        match e {
            ApiError::Decode(_) | ApiError::EmptyInput => Status::invalid_argument(message),
            ApiError::Unauthenticated(_) | ApiError::InvalidCredentials => Status::unauthenticated(message),
            ApiError::Internal(_) => Status::internal(message),
        }
    }
}

/// Infrastructure failures that end the process.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("{protocol} listener failed: {source}")]
    Listener {
        protocol: Protocol,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0} listener task panicked")]
    Panicked(Protocol),

    #[error("discovery registration failed: {0}")]
    Registration(#[from] RegistryError),
}

impl ServeError {
    pub fn listener(protocol: Protocol, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ServeError::Listener {
            protocol,
            source: source.into(),
        }
    }
}
