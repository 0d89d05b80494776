//! Protocol-agnostic endpoints.
//!
//! Each transport decodes into these request types, calls the matching
//! method, and encodes the response. None of this knows about auth headers;
//! protected endpoints are gated before they are reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use stringsvc_core::{HealthStatus, StringService};

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UppercaseRequest {
    #[schema(example = "hello")]
    pub s: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UppercaseResponse {
    pub v: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountRequest {
    #[schema(example = "hello")]
    pub s: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    pub v: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthRequest {
    #[schema(example = "user1")]
    pub username: String,
    #[schema(example = "passwordOne")]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: bool,
}

pub struct Endpoints {
    svc: Arc<dyn StringService>,
    serving: AtomicBool,
}

impl Endpoints {
    pub fn new(svc: Arc<dyn StringService>) -> Self {
        Self {
            svc,
            serving: AtomicBool::new(true),
        }
    }

    /// Cleared once shutdown begins so health checks see the instance leaving.
    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    pub fn uppercase(&self, req: UppercaseRequest) -> Result<UppercaseResponse, ApiError> {
        let v = self.svc.uppercase(&req.s)?;
        Ok(UppercaseResponse { v, err: String::new() })
    }

    pub fn count(&self, req: CountRequest) -> CountResponse {
        let n = self.svc.count(&req.s);
        CountResponse {
            v: i64::try_from(n).unwrap_or(i64::MAX),
        }
    }

    pub fn auth(&self, req: AuthRequest) -> Result<AuthResponse, ApiError> {
        let token = self.svc.auth(&req.username, &req.password)?;
        Ok(AuthResponse { token })
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from(self.serving.load(Ordering::SeqCst) && self.svc.health_check())
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: self.status().is_serving(),
        }
    }
}
