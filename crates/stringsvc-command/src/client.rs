use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::json;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;
use tonic::Request;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use stringsvc_server::proto;
use stringsvc_server::proto::string_service_client::StringServiceClient;

/// Response body shared by every JSON route; absent fields default.
#[derive(Debug, Default, Deserialize)]
struct Reply {
    #[serde(default)]
    token: String,
    #[serde(default)]
    v: serde_json::Value,
    #[serde(default)]
    err: String,
    #[serde(default)]
    status: bool,
}

pub enum Client {
    Http { http: reqwest::Client, base: String },
    Grpc { channel: Channel },
}

impl Client {
    pub fn http(addr: &str) -> Self {
        Client::Http {
            http: reqwest::Client::new(),
            base: base_url(addr),
        }
    }

    pub async fn grpc(addr: &str) -> anyhow::Result<Self> {
        let channel = Channel::from_shared(base_url(addr))?
            .connect()
            .await
            .with_context(|| format!("connecting to {addr}"))?;
        Ok(Client::Grpc { channel })
    }

    pub async fn token(&self, username: &str, password: &str) -> anyhow::Result<String> {
        match self {
            Client::Http { .. } => {
                let reply = self
                    .post("/auth", None, json!({ "username": username, "password": password }))
                    .await?;
                Ok(reply.token)
            }
            Client::Grpc { channel } => {
                let resp = StringServiceClient::new(channel.clone())
                    .auth(proto::AuthRequest {
                        username: username.to_string(),
                        password: password.to_string(),
                    })
                    .await?;
                Ok(resp.into_inner().token)
            }
        }
    }

    pub async fn uppercase(&self, token: &str, s: &str) -> anyhow::Result<String> {
        match self {
            Client::Http { .. } => {
                let reply = self.post("/uppercase", Some(token), json!({ "s": s })).await?;
                reply.v.as_str().map(str::to_string).context("response missing `v`")
            }
            Client::Grpc { channel } => {
                let request = bearer(proto::UppercaseRequest { s: s.to_string() }, token)?;
                let resp = StringServiceClient::new(channel.clone()).uppercase(request).await?;
                Ok(resp.into_inner().v)
            }
        }
    }

    pub async fn count(&self, token: &str, s: &str) -> anyhow::Result<i64> {
        match self {
            Client::Http { .. } => {
                let reply = self.post("/count", Some(token), json!({ "s": s })).await?;
                reply.v.as_i64().context("response missing `v`")
            }
            Client::Grpc { channel } => {
                let request = bearer(proto::CountRequest { s: s.to_string() }, token)?;
                let resp = StringServiceClient::new(channel.clone()).count(request).await?;
                Ok(resp.into_inner().v)
            }
        }
    }

    pub async fn health(&self) -> anyhow::Result<bool> {
        match self {
            Client::Http { http, base } => {
                let reply: Reply = http.get(format!("{base}/health")).send().await?.json().await?;
                Ok(reply.status)
            }
            Client::Grpc { channel } => {
                let resp = HealthClient::new(channel.clone())
                    .check(HealthCheckRequest { service: String::new() })
                    .await?;
                Ok(resp.into_inner().status == ServingStatus::Serving as i32)
            }
        }
    }

    async fn post(&self, path: &str, token: Option<&str>, body: serde_json::Value) -> anyhow::Result<Reply> {
        let Client::Http { http, base } = self else {
            bail!("not an HTTP client");
        };
        let mut request = http.post(format!("{base}{path}")).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let reply: Reply = response.json().await.unwrap_or_default();
        if !status.is_success() {
            bail!("{path} returned {status}: {}", reply.err);
        }
        Ok(reply)
    }
}

fn bearer<T>(message: T, token: &str) -> anyhow::Result<Request<T>> {
    let mut request = Request::new(message);
    let value: AsciiMetadataValue = format!("Bearer {token}").parse()?;
    request.metadata_mut().insert("authorization", value);
    Ok(request)
}

fn base_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
