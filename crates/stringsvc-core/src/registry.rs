use async_trait::async_trait;
use thiserror::Error;

use crate::ServiceInstance;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("discovery backend unavailable: {0}")]
    Unavailable(String),
    #[error("discovery backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("instance not found: {0}")]
    InstanceNotFound(String),
    #[error("invalid registration transition from {0}")]
    InvalidTransition(&'static str),
}

/// Remote registry that tracks live instances and polls their health checks.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), RegistryError>;
    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError>;
    async fn instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError>;
}
