//! Server setup and lifecycle management

use crate::api::rest::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::controller::{log_events, Controller};
use crate::error::{DaemonError, DaemonResult};
use crate::simulation::Simulation;
use cachefleet_engine::{collect_reserved_ports, EngineContext};
use cachefleet_ports::RuntimePortAllocator;
use cachefleet_store::InMemoryCluster;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// CacheFleet daemon server
///
/// Runs the controller against an in-process simulated cluster and serves
/// the status API until a shutdown signal arrives.
pub struct Server {
    config: DaemonConfig,
    cluster: InMemoryCluster,
    simulation: Arc<Simulation>,
    controller: Arc<Controller>,
}

impl Server {
    /// Seed the cluster and rebuild the port pool from recorded releases
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let cluster = InMemoryCluster::new();
        let simulation = Arc::new(Simulation::new(
            cluster.clone(),
            config.simulation.clone(),
        ));
        simulation.seed().await?;

        let client = cluster.client();
        let range = config.ports.parse_range()?;
        let ports = RuntimePortAllocator::build(range, config.ports.policy, || {
            collect_reserved_ports(&client)
        })
        .await?;

        let ctx = EngineContext::new(
            client.clone(),
            simulation.releases(),
            simulation.executor(),
            Arc::new(ports),
            config.engine.to_engine_config(),
        );
        let controller = Arc::new(Controller::new(ctx, config.scheduler.clone()));

        Ok(Self {
            config,
            cluster,
            simulation,
            controller,
        })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState::new(self.cluster.client(), self.controller.clone());
        let app = create_router(state, &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("CacheFleet daemon listening on {}", addr);

        tokio::spawn(log_events(
            self.controller.subscribe_events(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(self.simulation.clone().run(shutdown_rx.clone()));
        let controller = tokio::spawn(self.controller.clone().run(shutdown_rx));

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("CacheFleet daemon shutting down");

        // Background loops only stop on a send; a closed channel means they
        // are already gone
        let _ = shutdown_tx.send(true);
        if let Err(e) = controller.await {
            tracing::warn!(error = %e, "Controller task ended abnormally");
        }

        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
