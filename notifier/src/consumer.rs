//! RabbitMQ consumers for the employee and leave queues.
//!
//! Each queue is served by its own channel and task, with its own
//! [`QueueWorker`]; the two never share state. Handlers are looked up by
//! queue name in a [`HandlerRegistry`] built at startup.
//!
//! Acknowledgment does not depend on the side effect: once a delivery has
//! been decoded, the handler runs and the message is acked whatever the
//! outcome. Bodies that are not a notification at all are rejected without
//! requeue, since there is no dead-letter exchange to park them in.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::envelope::Notification;
use crate::mail::{render_leave_status, render_welcome, MailSink};
use crate::topology::Topology;
use crate::util::shutdown_signal;

/// Side effect run for every decoded notification on a queue.
///
/// Handlers report their own failures through logging; they have no way to
/// fail a delivery.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, notification: Notification);
}

/// Sends the welcome message for a new employee.
pub struct EmployeeWelcomeHandler {
    mail: Arc<dyn MailSink>,
}

impl EmployeeWelcomeHandler {
    pub fn new(mail: Arc<dyn MailSink>) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl NotificationHandler for EmployeeWelcomeHandler {
    fn name(&self) -> &'static str {
        "employee_welcome"
    }

    async fn handle(&self, notification: Notification) {
        info!(
            kind = ?notification.resolved_kind(),
            employee_name = ?notification.employee_name,
            employee_email = ?notification.employee_email,
            employee_id = ?notification.employee_id,
            department = ?notification.department,
            purpose = ?notification.purpose,
            timestamp = ?notification.timestamp,
            "employee_notification_received"
        );

        let employee = match notification.as_employee_created() {
            Ok(employee) => employee,
            Err(e) => {
                error!(error = %e, "employee_notification_invalid");
                return;
            }
        };

        let email = render_welcome(&employee);
        match self.mail.send(email).await {
            Ok(()) => info!(employee_id = employee.employee_id, "employee_notification_processed"),
            Err(e) => error!(
                employee_id = employee.employee_id,
                error = %e,
                "employee_notification_send_failed"
            ),
        }
    }
}

/// Sends the status update for a decided leave request.
pub struct LeaveStatusHandler {
    mail: Arc<dyn MailSink>,
}

impl LeaveStatusHandler {
    pub fn new(mail: Arc<dyn MailSink>) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl NotificationHandler for LeaveStatusHandler {
    fn name(&self) -> &'static str {
        "leave_status"
    }

    async fn handle(&self, notification: Notification) {
        info!(
            kind = ?notification.resolved_kind(),
            employee_name = ?notification.employee_name,
            employee_email = ?notification.employee_email,
            leave_start_date = ?notification.leave_start_date,
            leave_end_date = ?notification.leave_end_date,
            leave_status = ?notification.leave_status,
            request_id = ?notification.request_id,
            purpose = ?notification.purpose,
            timestamp = ?notification.timestamp,
            "leave_notification_received"
        );

        let leave = match notification.as_leave_status_updated() {
            Ok(leave) => leave,
            Err(e) => {
                error!(error = %e, "leave_notification_invalid");
                return;
            }
        };

        let email = render_leave_status(&leave);
        match self.mail.send(email).await {
            Ok(()) => info!(request_id = leave.request_id, "leave_notification_processed"),
            Err(e) => error!(
                request_id = leave.request_id,
                error = %e,
                "leave_notification_send_failed"
            ),
        }
    }
}

/// Queue name to handler mapping.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard wiring: welcome handler on the employee queue, status
    /// handler on the leave queue.
    pub fn for_topology(topology: &Topology, mail: Arc<dyn MailSink>) -> Self {
        let mut registry = Self::new();
        registry.register(
            &topology.employee.queue,
            Arc::new(EmployeeWelcomeHandler::new(mail.clone())),
        );
        registry.register(&topology.leave.queue, Arc::new(LeaveStatusHandler::new(mail)));
        registry
    }

    /// Register `handler` for `queue`, replacing any previous one.
    pub fn register(&mut self, queue: &str, handler: Arc<dyn NotificationHandler>) {
        self.handlers.insert(queue.to_string(), handler);
    }

    pub fn get(&self, queue: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.handlers.get(queue).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Drop without requeue.
    Reject,
}

/// Per-queue delivery processor.
pub struct QueueWorker {
    queue: String,
    handler: Arc<dyn NotificationHandler>,
    state: WorkerState,
}

impl QueueWorker {
    pub fn new(queue: impl Into<String>, handler: Arc<dyn NotificationHandler>) -> Self {
        Self {
            queue: queue.into(),
            handler,
            state: WorkerState::Idle,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Decode and handle one delivery body.
    pub async fn dispatch(&mut self, message_id: &str, data: &[u8]) -> Disposition {
        self.transition(WorkerState::Processing);

        let disposition = match serde_json::from_slice::<Notification>(data) {
            Ok(notification) => {
                let handled = AssertUnwindSafe(self.handler.handle(notification))
                    .catch_unwind()
                    .await;
                if handled.is_err() {
                    error!(
                        queue = %self.queue,
                        handler = self.handler.name(),
                        message_id = %message_id,
                        "notification_handler_panicked"
                    );
                }
                Disposition::Ack
            }
            Err(e) => {
                error!(
                    queue = %self.queue,
                    message_id = %message_id,
                    error = %e,
                    body_preview = %String::from_utf8_lossy(&data[..data.len().min(500)]),
                    "notification_parse_failed"
                );
                Disposition::Reject
            }
        };

        self.transition(WorkerState::Idle);
        disposition
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(queue = %self.queue, from = ?self.state, to = ?next, "worker_state_changed");
        self.state = next;
    }
}

/// Run both queue consumers until SIGINT/SIGTERM.
///
/// This function:
/// 1. Connects to RabbitMQ and declares the topology (fatal on conflict)
/// 2. Opens one channel per queue with the configured prefetch
/// 3. Looks up each queue's handler in the registry
/// 4. Consumes each queue on its own task, one delivery at a time
/// 5. Returns an error as soon as any consumer stops on its own, so the
///    process exits instead of idling on a dead connection
pub async fn run(config: Arc<Config>, topology: Arc<Topology>, registry: HandlerRegistry) -> Result<()> {
    info!(url_length = config.amqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.amqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let setup = conn.create_channel().await.context("Failed to create channel")?;
    topology
        .declare(&setup)
        .await
        .context("Failed to declare broker topology")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for (kind, binding) in topology.bindings() {
        let handler = registry
            .get(&binding.queue)
            .ok_or_else(|| anyhow!("no handler registered for queue {}", binding.queue))?;

        let channel = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        channel
            .basic_qos(config.consumer_prefetch, BasicQosOptions::default())
            .await
            .context("Failed to set QoS")?;

        let consumer = channel
            .basic_consume(
                &binding.queue,
                &format!("ems-notifier-{}", binding.queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to start consumer on {}", binding.queue))?;

        info!(
            kind = %kind,
            queue = %binding.queue,
            handler = handler.name(),
            prefetch_count = config.consumer_prefetch,
            "rabbitmq_consumer_started"
        );

        let worker = QueueWorker::new(binding.queue.clone(), handler);
        tasks.spawn(consume(channel, consumer, worker, shutdown_rx.clone()));
    }

    info!("notifier_ready");

    let outcome = supervise(&mut tasks, shutdown_signal()).await;
    match &outcome {
        Ok(()) => info!("notifier_stopping"),
        Err(e) => error!(error = %e, "notifier_consumer_lost"),
    }
    let _ = shutdown_tx.send(true);

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "consumer_task_failed");
        }
    }

    if let Err(e) = conn.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }

    info!("notifier_shutdown_complete");
    outcome
}

/// Wait for `shutdown`, failing early if a consumer task ends first.
async fn supervise<F>(tasks: &mut JoinSet<String>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => Ok(()),
        Some(finished) = tasks.join_next() => match finished {
            Ok(queue) => Err(anyhow!("rabbitmq_consumer_closed: consumer on {} stopped", queue)),
            Err(e) => Err(anyhow!("rabbitmq_consumer_closed: consumer task failed: {}", e)),
        },
    }
}

/// Consume one queue until shutdown or until the broker closes the consumer.
/// Returns the queue name.
async fn consume(
    channel: Channel,
    mut consumer: Consumer,
    mut worker: QueueWorker,
    mut shutdown: watch::Receiver<bool>,
) -> String {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(queue = %worker.queue(), "rabbitmq_consumer_stopping");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let delivery_tag = delivery.delivery_tag;
                        let message_id = delivery
                            .properties
                            .message_id()
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unknown".to_string());

                        info!(
                            queue = %worker.queue(),
                            message_id = %message_id,
                            delivery_tag = delivery_tag,
                            redelivered = delivery.redelivered,
                            "rabbitmq_notification_received"
                        );

                        match worker.dispatch(&message_id, &delivery.data).await {
                            Disposition::Ack => {
                                if let Err(e) = channel
                                    .basic_ack(delivery_tag, BasicAckOptions::default())
                                    .await
                                {
                                    error!(
                                        delivery_tag = delivery_tag,
                                        error = %e,
                                        "rabbitmq_ack_failed"
                                    );
                                } else {
                                    info!(
                                        queue = %worker.queue(),
                                        message_id = %message_id,
                                        "rabbitmq_notification_acked"
                                    );
                                }
                            }
                            Disposition::Reject => {
                                if let Err(e) = channel
                                    .basic_nack(
                                        delivery_tag,
                                        BasicNackOptions {
                                            requeue: false,
                                            ..Default::default()
                                        },
                                    )
                                    .await
                                {
                                    error!(
                                        delivery_tag = delivery_tag,
                                        error = %e,
                                        "rabbitmq_nack_failed"
                                    );
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(queue = %worker.queue(), error = %e, "rabbitmq_delivery_error");
                        if !channel.status().connected() {
                            warn!(queue = %worker.queue(), "rabbitmq_channel_lost");
                            break;
                        }
                    }
                    None => {
                        warn!(queue = %worker.queue(), "rabbitmq_consumer_closed");
                        break;
                    }
                }
            }
        }
    }

    worker.queue().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::config::test_config;
    use crate::envelope::{LeaveStatus, NotificationKind};
    use crate::mail::testing::RecordingMailSink;
    use crate::publisher::testing::{Behavior, MemoryBroker};
    use crate::publisher::{NotificationPublisher, NotificationSink, OutboundMessage};
    use crate::util::logging::capture_logs;

    const SCENARIO_B: &[u8] = br#"{
        "kind": "LEAVE_STATUS_UPDATED",
        "employeeName": "Bob",
        "requestId": 7,
        "leaveStartDate": "2024-03-15",
        "leaveEndDate": "2024-03-20",
        "leaveStatus": "APPROVED"
    }"#;

    fn recording_handler() -> Arc<RecordingHandler> {
        Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Hand a published message to the worker of the queue its routing key reaches.
    async fn deliver(
        topology: &Topology,
        registry: &HandlerRegistry,
        message: &OutboundMessage,
    ) -> Disposition {
        let queues = topology.route(&message.routing_key);
        assert_eq!(queues.len(), 1, "routed to {queues:?}");
        let handler = registry.get(queues[0]).unwrap();
        let mut worker = QueueWorker::new(queues[0], handler);
        worker.dispatch(&message.message_id, &message.body).await
    }

    fn employee_body() -> Vec<u8> {
        let mut notification =
            Notification::employee_created("Jane Doe", "jane@x.com", 42, "Engineering");
        notification.kind = Some(NotificationKind::EmployeeCreated);
        notification.purpose = Some("Welcome notification".to_string());
        serde_json::to_vec(&notification).unwrap()
    }

    fn leave_body() -> Vec<u8> {
        let mut notification = Notification::leave_status_updated(
            "Bob",
            "bob@x.com",
            7,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
            LeaveStatus::Approved,
        );
        notification.kind = Some(NotificationKind::LeaveStatusUpdated);
        serde_json::to_vec(&notification).unwrap()
    }

    struct PanickingHandler;

    #[async_trait]
    impl NotificationHandler for PanickingHandler {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn handle(&self, _notification: Notification) {
            panic!("handler bug");
        }
    }

    struct RecordingHandler {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(&self, notification: Notification) {
            self.seen.lock().unwrap().push(notification);
        }
    }

    #[tokio::test]
    async fn test_employee_handler_sends_welcome() {
        let mail = Arc::new(RecordingMailSink::default());
        let mut worker = QueueWorker::new(
            "employee",
            Arc::new(EmployeeWelcomeHandler::new(mail.clone())),
        );

        let disposition = worker.dispatch("EMPLOYEE_CREATED-42", &employee_body()).await;

        assert_eq!(disposition, Disposition::Ack);
        let sent = mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.as_deref(), Some("jane@x.com"));
        assert!(sent[0].body.contains("Jane Doe"));
        assert!(sent[0].body.contains("Engineering"));
        assert!(sent[0].body.contains("42"));
    }

    #[tokio::test]
    async fn test_leave_handler_sends_status_update() {
        let mail = Arc::new(RecordingMailSink::default());
        let mut worker = QueueWorker::new("leave", Arc::new(LeaveStatusHandler::new(mail.clone())));

        let disposition = worker.dispatch("LEAVE_STATUS_UPDATED-7", &leave_body()).await;

        assert_eq!(disposition, Disposition::Ack);
        let sent = mail.sent();
        assert_eq!(sent.len(), 1);
        for expected in ["2024-03-15", "2024-03-20", "APPROVED", "7"] {
            assert!(sent[0].body.contains(expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_missing_field_is_logged_and_acked() {
        let (logs, _guard) = capture_logs();
        let mail = Arc::new(RecordingMailSink::default());
        let mut worker = QueueWorker::new("leave", Arc::new(LeaveStatusHandler::new(mail.clone())));

        let body = br#"{"kind":"LEAVE_STATUS_UPDATED","employeeName":"Bob","requestId":7}"#;
        let disposition = worker.dispatch("LEAVE_STATUS_UPDATED-7", body).await;

        assert_eq!(disposition, Disposition::Ack);
        assert!(mail.sent().is_empty());
        assert_eq!(logs.count("leave_notification_invalid"), 1);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_wrong_queue_kind_is_acked() {
        let mail = Arc::new(RecordingMailSink::default());
        let mut worker = QueueWorker::new(
            "employee",
            Arc::new(EmployeeWelcomeHandler::new(mail.clone())),
        );

        let disposition = worker.dispatch("LEAVE_STATUS_UPDATED-7", &leave_body()).await;

        assert_eq!(disposition, Disposition::Ack);
        assert!(mail.sent().is_empty());
    }

    #[tokio::test]
    async fn test_mail_failure_is_logged_and_acked() {
        let (logs, _guard) = capture_logs();
        let mail = Arc::new(RecordingMailSink::failing());
        let mut worker = QueueWorker::new(
            "employee",
            Arc::new(EmployeeWelcomeHandler::new(mail.clone())),
        );

        let disposition = worker.dispatch("EMPLOYEE_CREATED-42", &employee_body()).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(logs.count("employee_notification_send_failed"), 1);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_rejected() {
        let (logs, _guard) = capture_logs();
        let mail = Arc::new(RecordingMailSink::default());
        let mut worker = QueueWorker::new(
            "employee",
            Arc::new(EmployeeWelcomeHandler::new(mail.clone())),
        );

        let disposition = worker.dispatch("unknown", b"not json").await;

        assert_eq!(disposition, Disposition::Reject);
        assert_eq!(logs.count("notification_parse_failed"), 1);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let mut worker = QueueWorker::new("employee", Arc::new(PanickingHandler));

        let disposition = worker.dispatch("EMPLOYEE_CREATED-42", &employee_body()).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_worker_preserves_delivery_order() {
        let recorder = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });
        let mut worker = QueueWorker::new("employee", recorder.clone());
        assert_eq!(worker.state(), WorkerState::Idle);

        for id in 1..=3 {
            let notification =
                Notification::employee_created("Jane Doe", "jane@x.com", id, "Engineering");
            let body = serde_json::to_vec(&notification).unwrap();
            worker.dispatch("m", &body).await;
        }

        let ids: Vec<_> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.employee_id.unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_registry_for_topology() {
        let topology = Topology::from_config(&test_config()).unwrap();
        let registry =
            HandlerRegistry::for_topology(&topology, Arc::new(RecordingMailSink::default()));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("test.employee.queue").unwrap().name(),
            "employee_welcome"
        );
        assert_eq!(registry.get("test.leave.queue").unwrap().name(), "leave_status");
        assert!(registry.get("unknown.queue").is_none());
    }

    #[tokio::test]
    async fn test_leave_without_email_still_sends_update() {
        let (logs, _guard) = capture_logs();
        let mail = Arc::new(RecordingMailSink::default());
        let mut worker = QueueWorker::new("leave", Arc::new(LeaveStatusHandler::new(mail.clone())));

        let disposition = worker.dispatch("LEAVE_STATUS_UPDATED-7", SCENARIO_B).await;

        assert_eq!(disposition, Disposition::Ack);
        let sent = mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, None);
        for expected in ["Bob", "2024-03-15", "2024-03-20", "APPROVED", "7"] {
            assert!(sent[0].body.contains(expected), "missing {expected}");
        }
        assert_eq!(logs.count("leave_notification_invalid"), 0);
        assert_eq!(logs.count("leave_notification_processed"), 1);
    }

    #[tokio::test]
    async fn test_local_timestamp_is_acked() {
        let mail = Arc::new(RecordingMailSink::default());
        let mut worker = QueueWorker::new(
            "employee",
            Arc::new(EmployeeWelcomeHandler::new(mail.clone())),
        );

        let body = br#"{
            "kind": "EMPLOYEE_CREATED",
            "employeeName": "Jane Doe",
            "employeeEmail": "jane@x.com",
            "employeeId": 42,
            "department": "Engineering",
            "purpose": "Welcome notification",
            "timestamp": "2024-03-01T09:30:00.123"
        }"#;
        let disposition = worker.dispatch("EMPLOYEE_CREATED-42", body).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(mail.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_published_messages_reach_their_handlers() {
        let topology = Arc::new(Topology::from_config(&test_config()).unwrap());
        let broker = Arc::new(MemoryBroker::new(Behavior::Accept));
        let publisher =
            NotificationPublisher::new(broker.clone(), topology.clone(), Duration::from_millis(200));
        let mail = Arc::new(RecordingMailSink::default());
        let registry = HandlerRegistry::for_topology(&topology, mail.clone());

        publisher
            .notify_employee_created("Jane Doe", "jane@x.com", 42, "Engineering")
            .await;
        let mut leave = Notification::leave_status_updated(
            "Bob",
            "",
            7,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
            LeaveStatus::Approved,
        );
        leave.employee_email = None;
        publisher
            .publish(leave, NotificationKind::LeaveStatusUpdated)
            .await;

        let messages = broker.sent();
        assert_eq!(messages.len(), 2);
        for message in &messages {
            assert_eq!(deliver(&topology, &registry, message).await, Disposition::Ack);
        }

        let sent = mail.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to.as_deref(), Some("jane@x.com"));
        assert_eq!(sent[0].subject, "Welcome to the Company!");
        for expected in ["Jane Doe", "Engineering", "42"] {
            assert!(sent[0].body.contains(expected), "missing {expected}");
        }
        assert_eq!(sent[1].to, None);
        assert_eq!(sent[1].subject, "Leave Request Status Update");
        for expected in ["Bob", "2024-03-15", "2024-03-20", "APPROVED", "7"] {
            assert!(sent[1].body.contains(expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_published_attributes_survive_consumption() {
        let topology = Arc::new(Topology::from_config(&test_config()).unwrap());
        let broker = Arc::new(MemoryBroker::new(Behavior::Accept));
        let publisher =
            NotificationPublisher::new(broker.clone(), topology.clone(), Duration::from_millis(200));
        let employee = recording_handler();
        let leave = recording_handler();
        let mut registry = HandlerRegistry::new();
        registry.register(&topology.employee.queue, employee.clone());
        registry.register(&topology.leave.queue, leave.clone());

        publisher
            .notify_employee_created("Jane Doe", "jane@x.com", 42, "Engineering")
            .await;
        publisher
            .notify_leave_status_updated(
                "Bob",
                "bob@x.com",
                7,
                NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
                LeaveStatus::Approved,
            )
            .await;

        let messages = broker.sent();
        assert_eq!(messages.len(), 2);
        for message in &messages {
            deliver(&topology, &registry, message).await;
        }

        let received = [
            employee.seen.lock().unwrap().clone(),
            leave.seen.lock().unwrap().clone(),
        ];
        for (message, seen) in messages.iter().zip(received) {
            assert_eq!(seen.len(), 1);
            let published: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
            let consumed = serde_json::to_value(&seen[0]).unwrap();
            assert_eq!(consumed, published);
            assert!(published["timestamp"].is_string());
        }
        assert_eq!(
            employee.seen.lock().unwrap()[0].purpose.as_deref(),
            Some("Welcome notification")
        );
        assert_eq!(
            leave.seen.lock().unwrap()[0].purpose.as_deref(),
            Some("Status update notification")
        );
    }

    #[tokio::test]
    async fn test_supervise_fails_when_consumer_stops() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async { "test.employee.queue".to_string() });
        tasks.spawn(std::future::pending::<String>());

        let err = supervise(&mut tasks, std::future::pending::<()>())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("rabbitmq_consumer_closed"));
        assert!(message.contains("test.employee.queue"));
        tasks.abort_all();
    }

    #[tokio::test]
    async fn test_supervise_returns_ok_on_shutdown() {
        let mut tasks = JoinSet::new();
        tasks.spawn(std::future::pending::<String>());
        tasks.spawn(std::future::pending::<String>());

        assert!(supervise(&mut tasks, async {}).await.is_ok());
        assert_eq!(tasks.len(), 2);
        tasks.abort_all();
    }
}
