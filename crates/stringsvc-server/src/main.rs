use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use stringsvc_core::middleware::RecorderReporter;
use stringsvc_core::DiscoveryBackend;
use stringsvc_discovery::ConsulBackend;
use stringsvc_server::telemetry::{init_tracing, install_metrics_recorder};
use stringsvc_server::{app, Dependencies, ServerArgs, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = ServerArgs::parse();
    init_tracing(args.log_json);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ServerArgs) -> anyhow::Result<()> {
    let metrics = install_metrics_recorder()?;
    let config = ServerConfig::from_args(args)?;
    tracing::info!(service = %config.service_name, auth = ?config.auth, "configuration loaded");

    let discovery = if config.discovery.enabled {
        let backend = ConsulBackend::new(&config.discovery.consul_addr);
        tracing::info!(consul = %backend.base_url(), mode = ?config.discovery.mode, "discovery enabled");
        Some(Arc::new(backend) as Arc<dyn DiscoveryBackend>)
    } else {
        tracing::info!("discovery disabled");
        None
    };

    let deps = Dependencies {
        discovery,
        metrics: Some(metrics),
        reporter: Arc::new(RecorderReporter),
    };
    let server = app::start(config, deps).await?;
    server.run(shutdown_signal()).await?;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
