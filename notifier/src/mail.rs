//! Simulated email delivery.
//!
//! Handlers render a message and hand it to a [`MailSink`]. The only sink
//! shipped here writes the message to the log; a real mail transport would
//! implement the same trait.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::envelope::{EmployeeCreated, LeaveStatusUpdated};

/// A rendered message ready for delivery. `to` is empty when the
/// notification carried no address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedEmail {
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport rejected message to {to:?}: {reason}")]
    Rejected { to: Option<String>, reason: String },
}

/// Outbound delivery boundary.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, email: SimulatedEmail) -> Result<(), MailError>;
}

/// Sink that logs each message instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMailSink;

#[async_trait]
impl MailSink for LoggingMailSink {
    async fn send(&self, email: SimulatedEmail) -> Result<(), MailError> {
        info!(
            to = email.to.as_deref().unwrap_or(""),
            subject = %email.subject,
            body = %email.body,
            "simulated_email_sent"
        );
        Ok(())
    }
}

pub fn render_welcome(employee: &EmployeeCreated<'_>) -> SimulatedEmail {
    SimulatedEmail {
        to: employee.employee_email.map(str::to_string),
        subject: "Welcome to the Company!".to_string(),
        body: format!(
            "Dear {},\n\nWelcome to the {} department! Your Employee ID is {}.\n\nBest regards,\nHR Team",
            employee.employee_name, employee.department, employee.employee_id
        ),
    }
}

pub fn render_leave_status(leave: &LeaveStatusUpdated<'_>) -> SimulatedEmail {
    SimulatedEmail {
        to: leave.employee_email.map(str::to_string),
        subject: "Leave Request Status Update".to_string(),
        body: format!(
            "Dear {},\n\nYour leave request (ID: {}) from {} to {} has been {}.\n\nBest regards,\nHR Team",
            leave.employee_name,
            leave.request_id,
            leave.leave_start_date,
            leave.leave_end_date,
            leave.leave_status
        ),
    }
}
