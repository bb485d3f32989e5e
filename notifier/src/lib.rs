//! EMS Notifier - asynchronous notification pipeline for the employee
//! management system.
//!
//! This library provides shared modules for the two binaries:
//! - `ems-notify-api`: Thin HTTP boundary business services call after a commit
//! - `ems-notifier`: Consumers for the employee and leave queues
//!
//! ## Architecture
//!
//! ```text
//!                                    ┌─ employee routing key → employee queue → welcome handler
//! Collaborator → Publisher → exchange┤
//!                                    └─ leave routing key    → leave queue    → status handler
//! ```

pub mod config;
pub mod consumer;
pub mod envelope;
pub mod mail;
pub mod publisher;
pub mod topology;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use consumer::{
    Disposition, EmployeeWelcomeHandler, HandlerRegistry, LeaveStatusHandler, NotificationHandler,
    QueueWorker, WorkerState,
};
pub use envelope::{LeaveStatus, Notification, NotificationKind};
pub use mail::{LoggingMailSink, MailSink, SimulatedEmail};
pub use publisher::{AmqpBroker, BrokerClient, BrokerError, NotificationPublisher, NotificationSink};
pub use topology::{Topology, TopologyError};
pub use web::AppState;
