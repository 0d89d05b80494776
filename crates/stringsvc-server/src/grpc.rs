//! gRPC binding of the endpoints, plus the standard health service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tower_http::trace::TraceLayer;

use stringsvc_core::{AuthProvider, HealthStatus};

use crate::endpoints::{AuthRequest, CountRequest, Endpoints, UppercaseRequest};
use crate::error::ApiError;
use crate::proto;
use crate::proto::string_service_server::{StringService as StringServiceRpc, StringServiceServer};

/// Metadata key carrying `Bearer <token>`.
pub const AUTHORIZATION: &str = "authorization";

/// How often the health reporter re-runs the service health check.
pub const HEALTH_REFRESH: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct GrpcBinding {
    endpoints: Arc<Endpoints>,
    auth: Arc<AuthProvider>,
    health_refresh: Duration,
}

impl GrpcBinding {
    pub fn new(endpoints: Arc<Endpoints>, auth: Arc<AuthProvider>) -> Self {
        Self {
            endpoints,
            auth,
            health_refresh: HEALTH_REFRESH,
        }
    }

    pub fn with_health_refresh(mut self, every: Duration) -> Self {
        self.health_refresh = every;
        self
    }

    fn authorize<T>(&self, request: &Request<T>) -> Result<String, Status> {
        let header = request.metadata().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        self.auth
            .authorize(header)
            .map_err(|e| Status::from(ApiError::from(e)))
    }
}

#[tonic::async_trait]
impl StringServiceRpc for GrpcBinding {
    async fn auth(&self, request: Request<proto::AuthRequest>) -> Result<Response<proto::AuthResponse>, Status> {
        let req = request.into_inner();
        let resp = self.endpoints.auth(AuthRequest {
            username: req.username,
            password: req.password,
        })?;
        Ok(Response::new(proto::AuthResponse { token: resp.token }))
    }

    async fn uppercase(
        &self,
        request: Request<proto::UppercaseRequest>,
    ) -> Result<Response<proto::UppercaseResponse>, Status> {
        let principal = self.authorize(&request)?;
        tracing::debug!(principal = %principal, "uppercase");
        let req = request.into_inner();
        let resp = self.endpoints.uppercase(UppercaseRequest { s: req.s })?;
        Ok(Response::new(proto::UppercaseResponse { v: resp.v }))
    }

    async fn count(&self, request: Request<proto::CountRequest>) -> Result<Response<proto::CountResponse>, Status> {
        let principal = self.authorize(&request)?;
        tracing::debug!(principal = %principal, "count");
        let req = request.into_inner();
        let resp = self.endpoints.count(CountRequest { s: req.s });
        Ok(Response::new(proto::CountResponse { v: resp.v }))
    }
}

/// Serves the binding and `grpc.health.v1.Health` on an already bound listener.
///
/// Health mirrors [`Endpoints::status`], re-checked every `health_refresh`,
/// and turns NOT_SERVING as soon as `shutdown` resolves, while in-flight
/// calls drain.
pub async fn serve(
    listener: TcpListener,
    binding: GrpcBinding,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), tonic::transport::Error> {
    let (mut reporter, health_service) = tonic_health::server::health_reporter();
    let endpoints = binding.endpoints.clone();
    let refresh = binding.health_refresh;
    report(&mut reporter, endpoints.status()).await;

    let signal = async move {
        tokio::pin!(shutdown);
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + refresh, refresh);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticks.tick() => report(&mut reporter, endpoints.status()).await,
            }
        }
        report(&mut reporter, HealthStatus::NotServing).await;
    };

    Server::builder()
        .layer(TraceLayer::new_for_grpc())
        .add_service(health_service)
        .add_service(StringServiceServer::new(binding))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
        .await
}

/// Sets both the named service and the server-wide `""` entry.
async fn report(reporter: &mut HealthReporter, status: HealthStatus) {
    let status = serving_status(status);
    reporter
        .set_service_status(<StringServiceServer<GrpcBinding> as tonic::server::NamedService>::NAME, status)
        .await;
    reporter.set_service_status("", status).await;
}

fn serving_status(status: HealthStatus) -> ServingStatus {
    match status {
        HealthStatus::Serving => ServingStatus::Serving,
        HealthStatus::NotServing => ServingStatus::NotServing,
    }
}
