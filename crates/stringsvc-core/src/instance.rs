use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Protocol;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_DEREGISTER_AFTER: Duration = Duration::from_secs(60);

/// How the discovery backend checks an instance. Polled by the backend, never by us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub protocol: Protocol,
    /// Full URL for HTTP checks, `host:port` for gRPC health RPCs.
    pub endpoint: String,
    pub interval: Duration,
    pub timeout: Duration,
    /// Backend evicts the instance after failing checks for this long.
    pub deregister_after: Option<Duration>,
    pub notes: String,
}

impl HealthCheckSpec {
    pub fn for_listener(protocol: Protocol, address: &str, port: u16) -> Self {
        let endpoint = match protocol {
            Protocol::Http => format!("http://{address}:{port}/health"),
            Protocol::Grpc => format!("{address}:{port}"),
        };
        Self {
            protocol,
            endpoint,
            interval: DEFAULT_CHECK_INTERVAL,
            timeout: DEFAULT_CHECK_TIMEOUT,
            deregister_after: Some(DEFAULT_DEREGISTER_AFTER),
            notes: "Basic health checks".to_string(),
        }
    }

    pub fn with_timing(mut self, interval: Duration, timeout: Duration) -> Self {
        self.interval = interval;
        self.timeout = timeout;
        self
    }
}

/// Descriptor announced to the discovery backend for one listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique per boot so restarts never collide with a stale entry.
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub check: HealthCheckSpec,
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        let name = name.into();
        let address = address.into();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{name}-{protocol}-{}", &suffix[..12]),
            tags: vec![name.clone(), protocol.to_string(), port.to_string()],
            check: HealthCheckSpec::for_listener(protocol, &address, port),
            name,
            address,
            port,
        }
    }

    pub fn with_check(mut self, check: HealthCheckSpec) -> Self {
        self.check = check;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.check.protocol
    }
}
