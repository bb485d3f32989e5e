//! Fire-and-forget notification publisher.
//!
//! [`NotificationPublisher::publish`] is called after a business mutation
//! has committed. It stamps the envelope, hands it to the broker and turns
//! every failure into a single log event; nothing is ever returned to the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::envelope::{LeaveStatus, Notification, NotificationKind};
use crate::topology::{Topology, TopologyError};

/// A serialized envelope addressed to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message_id: String,
    pub kind: NotificationKind,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to RabbitMQ")]
    Connect(#[source] lapin::Error),

    #[error("failed to open channel")]
    Channel(#[source] lapin::Error),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("failed to publish to exchange {exchange:?}")]
    Publish {
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("broker did not confirm publish")]
    Confirm(#[source] lapin::Error),

    #[error("broker rejected message {message_id}")]
    Nacked { message_id: String },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Single-attempt transport for outbound messages.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError>;
}

/// Lapin-backed broker client.
///
/// Keeps one connection and one confirm-mode channel, declares the topology
/// on every (re)connect and reconnects lazily once the channel drops.
#[derive(Clone)]
pub struct AmqpBroker {
    inner: Arc<AmqpBrokerInner>,
}

struct AmqpBrokerInner {
    url: String,
    topology: Topology,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl AmqpBroker {
    pub fn new(url: String, topology: Topology) -> Self {
        Self {
            inner: Arc::new(AmqpBrokerInner {
                url,
                topology,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Connect eagerly, declaring the topology.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, BrokerError> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .map_err(BrokerError::Connect)?;

        info!("rabbitmq_publisher_connected");

        let ch = conn.create_channel().await.map_err(BrokerError::Channel)?;
        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(BrokerError::Channel)?;

        self.inner.topology.declare(&ch).await?;

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

#[async_trait]
impl BrokerClient for AmqpBroker {
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let channel = self.ensure_connected().await?;

        let confirmation = channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_kind(message.kind.as_str().into())
                    .with_message_id(message.message_id.clone().into()),
            )
            .await
            .map_err(|source| BrokerError::Publish {
                exchange: message.exchange.clone(),
                source,
            })?
            .await
            .map_err(BrokerError::Confirm)?;

        if confirmation.is_nack() {
            return Err(BrokerError::Nacked {
                message_id: message.message_id,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
enum PublishError {
    #[error("failed to serialize notification")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Capability held by business collaborators to announce committed changes.
///
/// Both calls are infallible: a notification outage is never a reason to
/// undo the business operation that triggered it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_employee_created(
        &self,
        employee_name: &str,
        employee_email: &str,
        employee_id: i64,
        department: &str,
    );

    async fn notify_leave_status_updated(
        &self,
        employee_name: &str,
        employee_email: &str,
        request_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        status: LeaveStatus,
    );
}

/// Stamps, serializes and routes notifications.
#[derive(Clone)]
pub struct NotificationPublisher {
    broker: Arc<dyn BrokerClient>,
    topology: Arc<Topology>,
    timeout: Duration,
}

impl NotificationPublisher {
    pub fn new(broker: Arc<dyn BrokerClient>, topology: Arc<Topology>, timeout: Duration) -> Self {
        Self {
            broker,
            topology,
            timeout,
        }
    }

    /// Publish a notification of `kind`, absorbing every failure.
    ///
    /// Any caller-supplied `kind`, `purpose` or `timestamp` is overwritten.
    pub async fn publish(&self, mut notification: Notification, kind: NotificationKind) {
        notification.kind = Some(kind);
        notification.purpose = Some(kind.purpose().to_string());
        notification.timestamp = Some(Utc::now());

        let message_id = notification.correlation_id();
        let routing_key = &self.topology.binding(kind).routing_key;

        info!(
            kind = %kind,
            message_id = %message_id,
            employee_name = ?notification.employee_name,
            "notification_publishing"
        );

        match self.try_publish(&notification, kind, &message_id).await {
            Ok(body_length) => {
                info!(
                    kind = %kind,
                    message_id = %message_id,
                    exchange = %self.topology.exchange,
                    routing_key = %routing_key,
                    body_length = body_length,
                    "notification_published"
                );
            }
            Err(e) => {
                error!(
                    kind = %kind,
                    message_id = %message_id,
                    exchange = %self.topology.exchange,
                    routing_key = %routing_key,
                    error = %e,
                    cause = ?std::error::Error::source(&e).map(|s| s.to_string()),
                    "notification_publish_failed"
                );
            }
        }
    }

    async fn try_publish(
        &self,
        notification: &Notification,
        kind: NotificationKind,
        message_id: &str,
    ) -> Result<usize, PublishError> {
        let body = serde_json::to_vec(notification)?;
        let body_length = body.len();

        let message = OutboundMessage {
            exchange: self.topology.exchange.clone(),
            routing_key: self.topology.binding(kind).routing_key.clone(),
            message_id: message_id.to_string(),
            kind,
            body,
        };

        tokio::time::timeout(self.timeout, self.broker.send(message))
            .await
            .map_err(|_| PublishError::Timeout(self.timeout))??;

        Ok(body_length)
    }
}

#[async_trait]
impl NotificationSink for NotificationPublisher {
    async fn notify_employee_created(
        &self,
        employee_name: &str,
        employee_email: &str,
        employee_id: i64,
        department: &str,
    ) {
        let notification =
            Notification::employee_created(employee_name, employee_email, employee_id, department);
        self.publish(notification, NotificationKind::EmployeeCreated)
            .await;
    }

    async fn notify_leave_status_updated(
        &self,
        employee_name: &str,
        employee_email: &str,
        request_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        status: LeaveStatus,
    ) {
        let notification = Notification::leave_status_updated(
            employee_name,
            employee_email,
            request_id,
            start_date,
            end_date,
            status,
        );
        self.publish(notification, NotificationKind::LeaveStatusUpdated)
            .await;
    }
}
