//! Consul agent HTTP API backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use stringsvc_core::{DiscoveryBackend, HealthCheckSpec, Protocol, RegistryError, ServiceInstance};

pub struct ConsulBackend {
    client: Client,
    base_url: String,
}

impl ConsulBackend {
    /// Accepts `host:port` or a full `http(s)://` URL.
    pub fn new(addr: &str) -> Self {
        Self::with_client(Client::new(), addr)
    }

    pub fn with_client(client: Client, addr: &str) -> Self {
        let addr = addr.trim_end_matches('/');
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_status(response: Response) -> Result<Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn unavailable(e: reqwest::Error) -> RegistryError {
    RegistryError::Unavailable(e.to_string())
}

#[async_trait]
impl DiscoveryBackend for ConsulBackend {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), RegistryError> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let body = AgentServiceRegistration::from(instance);
        let response = self.client.put(url).json(&body).send().await.map_err(unavailable)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        let url = format!("{}/v1/agent/service/deregister/{instance_id}", self.base_url);
        let response = self.client.put(url).send().await.map_err(unavailable)?;
        match Self::check_status(response).await {
            Err(RegistryError::Rejected { status: 404, .. }) => {
                Err(RegistryError::InstanceNotFound(instance_id.to_string()))
            }
            other => other.map(|_| ()),
        }
    }

    async fn instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        let url = format!("{}/v1/agent/services", self.base_url);
        let response = self.client.get(url).send().await.map_err(unavailable)?;
        let services: HashMap<String, AgentService> = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(unavailable)?;

        let mut instances: Vec<ServiceInstance> = services
            .into_values()
            .filter(|s| s.service == service_name)
            .map(ServiceInstance::from)
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }
}

/// Body of `PUT /v1/agent/service/register`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub check: AgentServiceCheck,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "GRPC", skip_serializing_if = "Option::is_none")]
    pub grpc: Option<String>,
    pub interval: String,
    pub timeout: String,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregister_critical_service_after: Option<String>,
}

impl From<&ServiceInstance> for AgentServiceRegistration {
    fn from(instance: &ServiceInstance) -> Self {
        let check = &instance.check;
        let (http, grpc) = match check.protocol {
            Protocol::Http => (Some(check.endpoint.clone()), None),
            Protocol::Grpc => (None, Some(check.endpoint.clone())),
        };
        Self {
            id: instance.id.clone(),
            name: instance.name.clone(),
            address: instance.address.clone(),
            port: instance.port,
            tags: instance.tags.clone(),
            check: AgentServiceCheck {
                http,
                grpc,
                interval: go_duration(check.interval),
                timeout: go_duration(check.timeout),
                notes: check.notes.clone(),
                deregister_critical_service_after: check.deregister_after.map(go_duration),
            },
        }
    }
}

/// Entry of `GET /v1/agent/services`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    tags: Vec<String>,
}

impl From<AgentService> for ServiceInstance {
    fn from(s: AgentService) -> Self {
        // The agent listing omits check definitions; rebuild the default one.
        let protocol = if s.tags.iter().any(|t| t == Protocol::Grpc.as_str()) {
            Protocol::Grpc
        } else {
            Protocol::Http
        };
        ServiceInstance {
            check: HealthCheckSpec::for_listener(protocol, &s.address, s.port),
            id: s.id,
            name: s.service,
            address: s.address,
            port: s.port,
            tags: s.tags,
        }
    }
}

/// Formats a duration the way Consul parses it (`10s`, `500ms`).
fn go_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_body_for_http_listener() {
        let instance = ServiceInstance::new("stringsvc", "10.1.2.3", 8080, Protocol::Http);
        let body = serde_json::to_value(AgentServiceRegistration::from(&instance)).unwrap();

        assert_eq!(body["ID"], instance.id.as_str());
        assert_eq!(body["Name"], "stringsvc");
        assert_eq!(body["Address"], "10.1.2.3");
        assert_eq!(body["Port"], 8080);
        assert_eq!(body["Check"]["HTTP"], "http://10.1.2.3:8080/health");
        assert_eq!(body["Check"]["Interval"], "10s");
        assert_eq!(body["Check"]["Timeout"], "2s");
        assert_eq!(body["Check"]["DeregisterCriticalServiceAfter"], "60s");
        assert!(body["Check"].get("GRPC").is_none());
    }

    #[test]
    fn registration_body_for_grpc_listener() {
        let instance = ServiceInstance::new("stringsvc", "10.1.2.3", 8081, Protocol::Grpc);
        let body = serde_json::to_value(AgentServiceRegistration::from(&instance)).unwrap();

        assert_eq!(body["Check"]["GRPC"], "10.1.2.3:8081");
        assert!(body["Check"].get("HTTP").is_none());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(go_duration(Duration::from_secs(10)), "10s");
        assert_eq!(go_duration(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn address_normalisation() {
        assert_eq!(ConsulBackend::new("127.0.0.1:8500").base_url(), "http://127.0.0.1:8500");
        assert_eq!(ConsulBackend::new("https://consul:8501/").base_url(), "https://consul:8501");
    }
}
