use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use stringsvc_core::{CredentialStore, DiscoveryBackend, Protocol};
use stringsvc_discovery::{InMemoryBackend, RegistrationMode, RetryPolicy};
use stringsvc_server::{app, Dependencies, ServeError, ServerConfig};
use tonic::transport::Channel;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

fn config() -> ServerConfig {
    ServerConfig::local(CredentialStore::new().with("user1", "passwordOne"))
}

fn deps(backend: &Arc<InMemoryBackend>) -> Dependencies {
    Dependencies {
        discovery: Some(backend.clone() as Arc<dyn DiscoveryBackend>),
        ..Dependencies::default()
    }
}

async fn wait_for_instances(backend: &InMemoryBackend, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.len() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn both_listeners_register_and_deregister() {
    let backend = Arc::new(InMemoryBackend::new());
    let server = app::start(config(), deps(&backend)).await.unwrap();
    let (http_port, grpc_port) = (server.http_addr().port(), server.grpc_addr().port());
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run(pending()));

    wait_for_instances(&backend, 2).await;
    let mut instances = backend.instances("stringsvc").await.unwrap();
    instances.sort_by_key(|i| i.port);
    let mut expected = vec![(http_port, Protocol::Http), (grpc_port, Protocol::Grpc)];
    expected.sort_by_key(|(port, _)| *port);
    let registered: Vec<_> = instances.iter().map(|i| (i.port, i.protocol())).collect();
    assert_eq!(registered, expected);
    assert!(instances.iter().all(|i| i.address == "127.0.0.1"));
    assert_ne!(instances[0].id, instances[1].id);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
    assert!(backend.is_empty());
}

#[tokio::test]
async fn signal_triggers_shutdown() {
    let backend = Arc::new(InMemoryBackend::new());
    let server = app::start(config(), deps(&backend)).await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async {
        let _ = rx.await;
    }));

    wait_for_instances(&backend, 2).await;
    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(backend.is_empty());
}

#[tokio::test]
async fn best_effort_serves_without_registration() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_next_registrations(2);
    let server = app::start(config(), deps(&backend)).await.unwrap();
    let health = format!("http://{}/health", server.http_addr());
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run(pending()));

    let response = reqwest::get(&health).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(backend.is_empty());

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn required_registration_failure_stops_the_process() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_next_registrations(2);
    let mut config = config();
    config.discovery.mode = RegistrationMode::Required;
    let server = app::start(config, deps(&backend)).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), server.run(pending()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ServeError::Registration(_)));
    assert!(backend.is_empty());
}

#[tokio::test]
async fn occupied_port_fails_startup() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = config();
    config.grpc_addr = taken.local_addr().unwrap();

    let err = app::start(config, Dependencies::default()).await.err().unwrap();
    assert!(matches!(
        err,
        ServeError::Listener {
            protocol: Protocol::Grpc,
            ..
        }
    ));
}

#[tokio::test]
async fn serves_immediately_while_discovery_is_down() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_next_registrations(100);
    let mut config = config();
    config.discovery.retry = RetryPolicy::default();
    let server = app::start(config, deps(&backend)).await.unwrap();
    let health = format!("http://{}/health", server.http_addr());
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run(pending()));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let response = client.get(&health).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(backend.is_empty());

    shutdown.cancel();
    handle.await.unwrap().unwrap();
    assert!(backend.is_empty());
}

#[tokio::test]
async fn drain_timeout_still_deregisters_every_listener() {
    let backend = Arc::new(InMemoryBackend::new());
    let mut config = config();
    config.shutdown_timeout = Duration::from_millis(200);
    let server = app::start(config, deps(&backend)).await.unwrap();
    let grpc_url = format!("http://{}", server.grpc_addr());
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run(pending()));
    wait_for_instances(&backend, 2).await;

    // An open watch stream keeps the gRPC listener from draining.
    let channel = Channel::from_shared(grpc_url).unwrap().connect().await.unwrap();
    let mut updates = HealthClient::new(channel)
        .watch(HealthCheckRequest { service: String::new() })
        .await
        .unwrap()
        .into_inner();
    updates.message().await.unwrap().unwrap();

    shutdown.cancel();
    handle.await.unwrap().unwrap();
    assert!(backend.is_empty());
    drop(updates);
}
