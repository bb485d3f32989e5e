//! EMS Notify API - HTTP boundary for business collaborators.
//!
//! Business services call this after their transaction commits. Each call
//! publishes a notification to RabbitMQ and answers `202 Accepted`; broker
//! outages are logged and never reported back to the caller.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use ems_notify::{
    util, web, AmqpBroker, AppState, BrokerError, Config, NotificationPublisher, Topology,
};

#[tokio::main]
async fn main() -> Result<()> {
    util::logging::init();

    info!("api_server_starting");

    let config = Config::from_env();
    let topology = Topology::from_config(&config).context("Invalid broker configuration")?;
    info!(
        port = config.port,
        exchange = %topology.exchange,
        publish_timeout_ms = config.publish_timeout_ms,
        "config_loaded"
    );

    let broker = AmqpBroker::new(config.amqp_url.clone(), topology.clone());

    // A conflicting topology is fatal; an unreachable broker only costs
    // notifications until it comes back.
    match broker.connect().await {
        Ok(()) => info!("rabbitmq_topology_ready"),
        Err(BrokerError::Topology(e)) => {
            return Err(e).context("Failed to declare broker topology");
        }
        Err(e) => warn!(error = %e, "rabbitmq_unavailable_at_startup"),
    }

    let publisher = NotificationPublisher::new(
        Arc::new(broker.clone()),
        Arc::new(topology),
        config.publish_timeout(),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = web::router(AppState::new(Arc::new(publisher)));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "api_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(util::shutdown_signal())
        .await
        .context("Server error")?;

    broker.close().await;

    info!("api_server_shutdown_complete");

    Ok(())
}
