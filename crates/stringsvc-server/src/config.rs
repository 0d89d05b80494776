use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use stringsvc_core::{ConfigError, CredentialStore};
use stringsvc_discovery::{RegistrationMode, RetryPolicy};

pub const DEFAULT_CREDENTIALS: &str = "user1:passwordOne,user2:passwordTwo";

#[derive(Debug, Clone, Parser)]
#[command(name = "stringsvc-server")]
#[command(about = "String operations over HTTP and gRPC with bearer-token auth", long_about = None)]
pub struct ServerArgs {
    #[arg(long, env = "STRINGSVC_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,

    #[arg(long, env = "STRINGSVC_GRPC_ADDR", default_value = "0.0.0.0:8081")]
    pub grpc_addr: SocketAddr,

    /// Host announced to the discovery backend and used in health check URLs
    #[arg(long, env = "STRINGSVC_ADVERTISE_HOST", default_value = "127.0.0.1")]
    pub advertise_host: String,

    #[arg(long, env = "STRINGSVC_SERVICE_NAME", default_value = "stringsvc")]
    pub service_name: String,

    #[arg(long, env = "CONSUL_ADDR", default_value = "http://127.0.0.1:8500")]
    pub consul_addr: String,

    /// Run without announcing to Consul
    #[arg(long, env = "STRINGSVC_NO_DISCOVERY")]
    pub no_discovery: bool,

    /// Exit instead of serving unregistered when Consul cannot be reached
    #[arg(long, env = "STRINGSVC_REQUIRE_REGISTRATION")]
    pub require_registration: bool,

    /// Shared HS256 key; a random key is generated when absent
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Comma-separated `principal:secret` pairs
    #[arg(long, env = "STRINGSVC_CREDENTIALS", default_value = DEFAULT_CREDENTIALS, hide_env_values = true)]
    pub credentials: String,

    #[arg(long, default_value_t = 10)]
    pub check_interval_secs: u64,

    #[arg(long, default_value_t = 2)]
    pub check_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub register_attempts: u32,

    #[arg(long, default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    #[arg(long, env = "STRINGSVC_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub signing_key: Vec<u8>,
    pub credentials: CredentialStore,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_key", &"<redacted>")
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub consul_addr: String,
    pub mode: RegistrationMode,
    pub retry: RetryPolicy,
    pub check_interval: Duration,
    pub check_timeout: Duration,
}

/// Everything the server needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub advertise_host: String,
    pub service_name: String,
    pub auth: AuthConfig,
    pub discovery: DiscoveryConfig,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        let credentials = CredentialStore::parse(&args.credentials)?;
        let signing_key = match args.jwt_secret {
            Some(secret) if !secret.is_empty() => secret.into_bytes(),
            _ => {
                tracing::warn!("JWT_SECRET not set, tokens will only verify on this instance");
                random_key()
            }
        };

        Ok(Self {
            http_addr: args.http_addr,
            grpc_addr: args.grpc_addr,
            advertise_host: args.advertise_host,
            service_name: args.service_name,
            auth: AuthConfig {
                signing_key,
                credentials,
            },
            discovery: DiscoveryConfig {
                enabled: !args.no_discovery,
                consul_addr: args.consul_addr,
                mode: if args.require_registration {
                    RegistrationMode::Required
                } else {
                    RegistrationMode::BestEffort
                },
                retry: RetryPolicy {
                    max_attempts: args.register_attempts.max(1),
                    ..RetryPolicy::default()
                },
                check_interval: Duration::from_secs(args.check_interval_secs),
                check_timeout: Duration::from_secs(args.check_timeout_secs),
            },
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }

    /// Loopback listeners on ephemeral ports, no discovery.
    pub fn local(credentials: CredentialStore) -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            grpc_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertise_host: "127.0.0.1".to_string(),
            service_name: "stringsvc".to_string(),
            auth: AuthConfig {
                signing_key: random_key(),
                credentials,
            },
            discovery: DiscoveryConfig {
                enabled: false,
                consul_addr: String::new(),
                mode: RegistrationMode::BestEffort,
                retry: RetryPolicy::single_attempt(),
                check_interval: Duration::from_secs(10),
                check_timeout: Duration::from_secs(2),
            },
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

fn random_key() -> Vec<u8> {
    rand::random::<[u8; 32]>().to_vec()
}
