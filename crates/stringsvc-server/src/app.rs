//! Process lifecycle: bind both listeners, register them, serve, and tear
//! everything down when the first of {HTTP exits, gRPC exits, signal} happens.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use stringsvc_core::middleware::RecorderReporter;
use stringsvc_core::{
    standard_chain, AuthProvider, BasicService, DiscoveryBackend, HealthCheckSpec, MetricsReporter, Protocol,
    RegistryError, ServiceInstance,
};
use stringsvc_discovery::Registrar;

use crate::config::ServerConfig;
use crate::endpoints::Endpoints;
use crate::error::ServeError;
use crate::grpc::{self, GrpcBinding};
use crate::http::{self, HttpState};

/// Collaborators injected at startup.
pub struct Dependencies {
    pub discovery: Option<Arc<dyn DiscoveryBackend>>,
    pub metrics: Option<PrometheusHandle>,
    pub reporter: Arc<dyn MetricsReporter>,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self {
            discovery: None,
            metrics: None,
            reporter: Arc::new(RecorderReporter),
        }
    }
}

type ListenerResult = (Protocol, Result<(), ServeError>);

/// Bookkeeping for one spawned listener task.
struct Listener {
    protocol: Protocol,
    instance_id: Option<String>,
}

/// Both listeners bound and serving.
pub struct Server {
    http_addr: SocketAddr,
    grpc_addr: SocketAddr,
    endpoints: Arc<Endpoints>,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    tasks: JoinSet<ListenerResult>,
    listeners: HashMap<Id, Listener>,
    discovery: Option<Arc<dyn DiscoveryBackend>>,
}

/// Binds both listeners, then spawns one task per listener that registers
/// with discovery (when configured), serves, and deregisters on exit.
pub async fn start(config: ServerConfig, deps: Dependencies) -> Result<Server, ServeError> {
    let http_listener = TcpListener::bind(config.http_addr)
        .await
        .map_err(|e| ServeError::listener(Protocol::Http, e))?;
    let grpc_listener = TcpListener::bind(config.grpc_addr)
        .await
        .map_err(|e| ServeError::listener(Protocol::Grpc, e))?;
    let http_addr = http_listener
        .local_addr()
        .map_err(|e| ServeError::listener(Protocol::Http, e))?;
    let grpc_addr = grpc_listener
        .local_addr()
        .map_err(|e| ServeError::listener(Protocol::Grpc, e))?;

    let auth = Arc::new(AuthProvider::new(&config.auth.signing_key, config.auth.credentials.clone()));
    let svc = standard_chain(BasicService::new(auth.clone()), deps.reporter);
    let endpoints = Arc::new(Endpoints::new(svc));
    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let mut listeners = HashMap::new();

    let registrar = |protocol: Protocol, port: u16| {
        deps.discovery.as_ref().map(|backend| {
            let check = HealthCheckSpec::for_listener(protocol, &config.advertise_host, port)
                .with_timing(config.discovery.check_interval, config.discovery.check_timeout);
            let instance =
                ServiceInstance::new(&config.service_name, &config.advertise_host, port, protocol).with_check(check);
            Registrar::new(Arc::clone(backend), instance).with_retry(config.discovery.retry)
        })
    };

    let http_state = HttpState {
        endpoints: endpoints.clone(),
        auth: auth.clone(),
        metrics: deps.metrics,
    };
    let http_serve = {
        let token = shutdown.clone();
        async move {
            axum::serve(http_listener, http::router(http_state))
                .with_graceful_shutdown(token.cancelled_owned())
                .await
                .map_err(|e| ServeError::listener(Protocol::Http, e))
        }
    };
    let http_registrar = registrar(Protocol::Http, http_addr.port());
    let instance_id = http_registrar.as_ref().map(|r| r.instance().id.clone());
    let handle = tasks.spawn(run_listener(Protocol::Http, http_registrar, config.discovery.mode, http_serve));
    listeners.insert(
        handle.id(),
        Listener {
            protocol: Protocol::Http,
            instance_id,
        },
    );

    let binding = GrpcBinding::new(endpoints.clone(), auth);
    let grpc_serve = {
        let token = shutdown.clone();
        async move {
            grpc::serve(grpc_listener, binding, token.cancelled_owned())
                .await
                .map_err(|e| ServeError::listener(Protocol::Grpc, e))
        }
    };
    let grpc_registrar = registrar(Protocol::Grpc, grpc_addr.port());
    let instance_id = grpc_registrar.as_ref().map(|r| r.instance().id.clone());
    let handle = tasks.spawn(run_listener(Protocol::Grpc, grpc_registrar, config.discovery.mode, grpc_serve));
    listeners.insert(
        handle.id(),
        Listener {
            protocol: Protocol::Grpc,
            instance_id,
        },
    );

    tracing::info!(%http_addr, %grpc_addr, "listening");

    Ok(Server {
        http_addr,
        grpc_addr,
        endpoints,
        shutdown,
        shutdown_timeout: config.shutdown_timeout,
        tasks,
        listeners,
        discovery: deps.discovery,
    })
}

async fn run_listener<F>(
    protocol: Protocol,
    registrar: Option<Registrar>,
    mode: stringsvc_discovery::RegistrationMode,
    serve: F,
) -> ListenerResult
where
    F: Future<Output = Result<(), ServeError>>,
{
    tracing::info!(%protocol, "starting listener");
    let result = match registrar {
        Some(registrar) => match registrar.scope(mode, serve).await {
            Ok(served) => served,
            Err(e) => Err(ServeError::from(e)),
        },
        None => serve.await,
    };
    (protocol, result)
}

impl Server {
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn grpc_addr(&self) -> SocketAddr {
        self.grpc_addr
    }

    /// Cancelling this token starts the same shutdown as a signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves until `signal` resolves or a listener exits, then drains.
    ///
    /// In-flight requests are not cancelled: listeners stop accepting and
    /// finish what they have, bounded by the configured shutdown timeout.
    pub async fn run(mut self, signal: impl Future<Output = ()>) -> Result<(), ServeError> {
        let trigger = tokio::select! {
            Some(joined) = self.tasks.join_next_with_id() => Some(settle(&mut self.listeners, joined)),
            () = signal => None,
            () = self.shutdown.cancelled() => None,
        };

        let outcome = match trigger {
            Some((protocol, Ok(()))) => {
                tracing::warn!(%protocol, "listener stopped, shutting down");
                Ok(())
            }
            Some((protocol, Err(e))) => {
                tracing::error!(%protocol, error = %e, "listener failed, shutting down");
                Err(e)
            }
            None => {
                tracing::info!("shutdown requested");
                Ok(())
            }
        };

        self.endpoints.set_serving(false);
        self.shutdown.cancel();

        let mut tasks = self.tasks;
        let mut listeners = self.listeners;
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next_with_id().await {
                let (protocol, result) = settle(&mut listeners, joined);
                match result {
                    Ok(()) => tracing::info!(%protocol, "listener stopped"),
                    Err(e) => tracing::warn!(%protocol, error = %e, "listener stopped with error"),
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(timeout = ?self.shutdown_timeout, "drain timed out, aborting listeners");
            tasks.shutdown().await;
        }
        if let Some(backend) = &self.discovery {
            deregister_unsettled(backend.as_ref(), listeners.into_values()).await;
        }
        outcome
    }
}

/// Retracts instances whose listener task was aborted or panicked before
/// its registrar could deregister.
async fn deregister_unsettled(backend: &dyn DiscoveryBackend, listeners: impl Iterator<Item = Listener>) {
    for listener in listeners {
        let Some(id) = listener.instance_id else {
            continue;
        };
        match backend.deregister(&id).await {
            Ok(()) => tracing::info!(protocol = %listener.protocol, %id, "deregistered aborted listener"),
            // Never registered, or already retracted.
            Err(RegistryError::InstanceNotFound(_)) => {}
            Err(e) => tracing::warn!(protocol = %listener.protocol, %id, error = %e, "deregistration failed"),
        }
    }
}

/// Listeners that returned normally are forgotten; their registrar already deregistered.
fn settle(listeners: &mut HashMap<Id, Listener>, joined: Result<(Id, ListenerResult), JoinError>) -> ListenerResult {
    match joined {
        Ok((id, result)) => {
            listeners.remove(&id);
            result
        }
        Err(e) => {
            let protocol = listeners.get(&e.id()).map_or(Protocol::Http, |l| l.protocol);
            tracing::error!(%protocol, error = %e, "listener task panicked");
            (protocol, Err(ServeError::Panicked(protocol)))
        }
    }
}
