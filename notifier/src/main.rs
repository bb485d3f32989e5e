//! EMS Notifier - RabbitMQ consumers for employee and leave notifications.
//!
//! Declares the exchange, queues and bindings, then consumes both queues
//! until SIGINT/SIGTERM, sending a simulated email for every notification.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use ems_notify::{consumer, util, Config, HandlerRegistry, LoggingMailSink, Topology};

#[tokio::main]
async fn main() -> Result<()> {
    util::logging::init();

    info!("notifier_starting");

    let config = Config::from_env();
    let topology = Topology::from_config(&config).context("Invalid broker configuration")?;
    info!(
        amqp_url_set = !config.amqp_url.is_empty(),
        exchange = %topology.exchange,
        employee_queue = %topology.employee.queue,
        leave_queue = %topology.leave.queue,
        prefetch = config.consumer_prefetch,
        "config_loaded"
    );

    let registry = HandlerRegistry::for_topology(&topology, Arc::new(LoggingMailSink));

    consumer::run(Arc::new(config), Arc::new(topology), registry).await?;

    Ok(())
}
