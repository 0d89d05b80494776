use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut};

use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::{Code, Request, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tokio_util::sync::CancellationToken;

use stringsvc_core::middleware::AtomicReporter;
use stringsvc_core::{standard_chain, AuthProvider, BasicService, CredentialStore, Method};
use stringsvc_server::endpoints::Endpoints;
use stringsvc_server::grpc::{self, GrpcBinding};
use stringsvc_server::proto::string_service_client::StringServiceClient;
use stringsvc_server::proto::{AuthRequest, CountRequest, UppercaseRequest};
use stringsvc_server::{app, Dependencies, ServerConfig};

struct Running {
    channel: Channel,
    http_base: String,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<Result<(), stringsvc_server::ServeError>>,
}

async fn spawn_server() -> Running {
    spawn_server_with(ServerConfig::local(CredentialStore::new().with("user1", "passwordOne"))).await
}

async fn spawn_server_with(config: ServerConfig) -> Running {
    let server = app::start(config, Dependencies::default()).await.unwrap();
    let grpc_addr = server.grpc_addr();
    let http_base = format!("http://{}", server.http_addr());
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run(pending()));
    let channel = Channel::from_shared(format!("http://{grpc_addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    Running {
        channel,
        http_base,
        shutdown,
        handle,
    }
}

fn with_token<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    let value: AsciiMetadataValue = format!("Bearer {token}").parse().unwrap();
    request.metadata_mut().insert("authorization", value);
    request
}

async fn login(client: &mut StringServiceClient<Channel>) -> String {
    client
        .auth(AuthRequest {
            username: "user1".into(),
            password: "passwordOne".into(),
        })
        .await
        .unwrap()
        .into_inner()
        .token
}

#[tokio::test]
async fn auth_then_uppercase_and_count() {
    let running = spawn_server().await;
    let mut client = StringServiceClient::new(running.channel.clone());
    let token = login(&mut client).await;

    let upper = client
        .uppercase(with_token(UppercaseRequest { s: "hello".into() }, &token))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(upper.v, "HELLO");

    let count = client
        .count(with_token(CountRequest { s: "hello".into() }, &token))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(count.v, 5);

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthenticated() {
    let running = spawn_server().await;
    let mut client = StringServiceClient::new(running.channel.clone());

    let status = client
        .uppercase(UppercaseRequest { s: "hello".into() })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "unauthenticated: missing bearer token");

    let status = client
        .count(with_token(CountRequest { s: "hello".into() }, "garbage"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_credentials_are_unauthenticated() {
    let running = spawn_server().await;
    let mut client = StringServiceClient::new(running.channel.clone());

    let status = client
        .auth(AuthRequest {
            username: "user1".into(),
            password: "passwordTwo".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "incorrect credentials");

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_uppercase_is_invalid_argument() {
    let running = spawn_server().await;
    let mut client = StringServiceClient::new(running.channel.clone());
    let token = login(&mut client).await;

    let status = client
        .uppercase(with_token(UppercaseRequest { s: String::new() }, &token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "empty string");

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn standard_health_service_reports_serving() {
    let running = spawn_server().await;
    let mut health = HealthClient::new(running.channel.clone());

    for service in ["", "stringsvc.v1.StringService"] {
        let response = health
            .check(HealthCheckRequest {
                service: service.to_string(),
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.status, ServingStatus::Serving as i32, "{service:?}");
    }

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn token_from_grpc_is_accepted_over_http() {
    let running = spawn_server().await;
    let mut client = StringServiceClient::new(running.channel.clone());
    let token = login(&mut client).await;

    let response = reqwest::Client::new()
        .post(format!("{}/uppercase", running.http_base))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "s": "cross" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["v"], "CROSS");

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

/// Sends raw bytes as the request message and hands back the raw reply.
#[derive(Default)]
struct RawCodec;

struct RawEncoder;

struct RawDecoder;

impl Encoder for RawEncoder {
    type Item = Vec<u8>;
    type Error = Status;

    fn encode(&mut self, item: Vec<u8>, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for RawDecoder {
    type Item = Vec<u8>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Vec<u8>>, Status> {
        Ok(Some(src.copy_to_bytes(src.remaining()).to_vec()))
    }
}

impl Codec for RawCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> RawEncoder {
        RawEncoder
    }

    fn decoder(&mut self) -> RawDecoder {
        RawDecoder
    }
}

#[tokio::test]
async fn undecodable_message_is_invalid_argument() {
    let running = spawn_server().await;
    let mut grpc = tonic::client::Grpc::new(running.channel.clone());
    grpc.ready().await.unwrap();

    // A truncated varint: not a valid AuthRequest.
    let path = PathAndQuery::from_static("/stringsvc.v1.StringService/Auth");
    let status = grpc
        .unary(Request::new(vec![0xff, 0xff]), path, RawCodec)
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().starts_with("malformed request"), "{}", status.message());

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn health_watch_sees_not_serving_when_shutdown_begins() {
    let mut config = ServerConfig::local(CredentialStore::new().with("user1", "passwordOne"));
    config.shutdown_timeout = Duration::from_millis(500);
    let running = spawn_server_with(config).await;
    let mut health = HealthClient::new(running.channel.clone());

    let mut updates = health
        .watch(HealthCheckRequest {
            service: "stringsvc.v1.StringService".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    let first = updates.message().await.unwrap().unwrap();
    assert_eq!(first.status, ServingStatus::Serving as i32);

    running.shutdown.cancel();
    let next = tokio::time::timeout(Duration::from_secs(2), updates.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(next.status, ServingStatus::NotServing as i32);

    drop(updates);
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn health_reporter_reruns_the_decorated_health_check() {
    let store = CredentialStore::new().with("user1", "passwordOne");
    let auth = Arc::new(AuthProvider::new(b"k", store));
    let reporter = Arc::new(AtomicReporter::new());
    let endpoints = Arc::new(Endpoints::new(standard_chain(BasicService::new(auth.clone()), reporter.clone())));
    let binding = GrpcBinding::new(endpoints.clone(), auth).with_health_refresh(Duration::from_millis(20));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(grpc::serve(listener, binding, async {
        let _ = stopped.await;
    }));

    let channel = Channel::from_shared(format!("http://{addr}")).unwrap().connect().await.unwrap();
    let mut health = HealthClient::new(channel);
    let check = || HealthCheckRequest { service: String::new() };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(reporter.requests(Method::HealthCheck, false) >= 2);

    endpoints.set_serving(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = health.check(check()).await.unwrap().into_inner().status;
    assert_eq!(status, ServingStatus::NotServing as i32);

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
