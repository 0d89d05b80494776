pub mod auth;
pub mod errors;
pub mod health;
pub mod instance;
pub mod middleware;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod time;

pub use auth::{AuthError, AuthProvider, Claims, CredentialStore, TOKEN_TTL_SECS};
pub use errors::{ConfigError, ServiceError};
pub use health::HealthStatus;
pub use instance::{HealthCheckSpec, ServiceInstance};
pub use middleware::{standard_chain, Method, MetricsReporter, ServiceChain};
pub use protocol::Protocol;
pub use registry::{DiscoveryBackend, RegistryError};
pub use service::{BasicService, StringService};
