//! Notification envelope shared by the publisher and the consumers.
//!
//! The envelope crosses the wire as a camelCase JSON object. Absent optional
//! fields are omitted, calendar dates travel as `YYYY-MM-DD` strings and the
//! publish timestamp as an RFC 3339 date-time. Timestamps without an offset
//! (`2024-03-01T09:30:00.123`) are read as UTC.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Which business event a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    EmployeeCreated,
    LeaveStatusUpdated,
}

impl NotificationKind {
    /// Wire tag, e.g. `EMPLOYEE_CREATED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::EmployeeCreated => "EMPLOYEE_CREATED",
            NotificationKind::LeaveStatusUpdated => "LEAVE_STATUS_UPDATED",
        }
    }

    /// Human-readable purpose stamped by the publisher.
    pub fn purpose(&self) -> &'static str {
        match self {
            NotificationKind::EmployeeCreated => "Welcome notification",
            NotificationKind::LeaveStatusUpdated => "Status update notification",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a leave request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "PENDING",
            LeaveStatus::Approved => "APPROVED",
            LeaveStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification message.
///
/// Business collaborators fill in the attributes of one kind; `kind`,
/// `purpose` and `timestamp` belong to the publisher and are overwritten
/// at publish time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NotificationKind>,

    /// Tag under the older `type` name; only consulted when `kind` is absent.
    #[serde(default, rename = "type", skip_serializing)]
    type_tag: Option<NotificationKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parse an ISO-8601 date-time, with or without an offset.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| value.parse::<NaiveDateTime>().map(|n| Utc.from_utc_datetime(&n)))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
                .map(|n| Utc.from_utc_datetime(&n))
        })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|value| {
        parse_timestamp(&value)
            .map_err(|e| de::Error::custom(format!("invalid timestamp {:?}: {}", value, e)))
    })
    .transpose()
}

/// Why a notification cannot be rendered for its kind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("notification has no kind")]
    MissingKind,

    #[error("expected a {expected} notification, got {actual}")]
    WrongKind {
        expected: NotificationKind,
        actual: NotificationKind,
    },

    #[error("{kind} notification is missing {field}")]
    MissingField {
        kind: NotificationKind,
        field: &'static str,
    },

    #[error("{kind} notification carries foreign field {field}")]
    ForeignField {
        kind: NotificationKind,
        field: &'static str,
    },

    #[error("{field} is not an ISO-8601 calendar date: {value:?}")]
    InvalidDate { field: &'static str, value: String },
}

/// Borrowed view of a complete employee-created notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmployeeCreated<'a> {
    pub employee_id: i64,
    pub employee_name: &'a str,
    pub employee_email: Option<&'a str>,
    pub department: &'a str,
}

/// Borrowed view of a complete leave-status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveStatusUpdated<'a> {
    pub request_id: i64,
    pub employee_name: &'a str,
    pub employee_email: Option<&'a str>,
    pub leave_start_date: &'a str,
    pub leave_end_date: &'a str,
    pub leave_status: &'a str,
}

impl Notification {
    /// Business attributes of a newly created employee.
    pub fn employee_created(
        employee_name: impl Into<String>,
        employee_email: impl Into<String>,
        employee_id: i64,
        department: impl Into<String>,
    ) -> Self {
        Self {
            employee_id: Some(employee_id),
            employee_name: Some(employee_name.into()),
            employee_email: Some(employee_email.into()),
            department: Some(department.into()),
            ..Default::default()
        }
    }

    /// Business attributes of a leave request whose status changed.
    pub fn leave_status_updated(
        employee_name: impl Into<String>,
        employee_email: impl Into<String>,
        request_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        status: LeaveStatus,
    ) -> Self {
        Self {
            employee_name: Some(employee_name.into()),
            employee_email: Some(employee_email.into()),
            leave_start_date: Some(start_date.format("%Y-%m-%d").to_string()),
            leave_end_date: Some(end_date.format("%Y-%m-%d").to_string()),
            leave_status: Some(status.as_str().to_string()),
            request_id: Some(request_id),
            ..Default::default()
        }
    }

    /// `kind`, falling back to the `type` tag older producers send.
    pub fn resolved_kind(&self) -> Option<NotificationKind> {
        self.kind.or(self.type_tag)
    }

    /// Id used to correlate a message across publisher and consumer logs.
    pub fn correlation_id(&self) -> String {
        let kind = self.resolved_kind().map(|k| k.as_str()).unwrap_or("UNKNOWN");
        let id = match self.resolved_kind() {
            Some(NotificationKind::LeaveStatusUpdated) => self.request_id,
            _ => self.employee_id,
        };
        match id {
            Some(id) => format!("{}-{}", kind, id),
            None => kind.to_string(),
        }
    }

    /// Check that this is a complete employee-created notification.
    pub fn as_employee_created(&self) -> Result<EmployeeCreated<'_>, EnvelopeError> {
        const KIND: NotificationKind = NotificationKind::EmployeeCreated;
        self.expect_kind(KIND)?;

        let foreign = [
            ("leaveStartDate", self.leave_start_date.is_some()),
            ("leaveEndDate", self.leave_end_date.is_some()),
            ("leaveStatus", self.leave_status.is_some()),
            ("requestId", self.request_id.is_some()),
        ];
        if let Some((field, _)) = foreign.iter().find(|(_, present)| *present) {
            return Err(EnvelopeError::ForeignField {
                kind: KIND,
                field: *field,
            });
        }

        Ok(EmployeeCreated {
            employee_id: required(KIND, "employeeId", self.employee_id)?,
            employee_name: required(KIND, "employeeName", self.employee_name.as_deref())?,
            employee_email: self.employee_email.as_deref(),
            department: required(KIND, "department", self.department.as_deref())?,
        })
    }

    /// Check that this is a complete leave-status notification.
    pub fn as_leave_status_updated(&self) -> Result<LeaveStatusUpdated<'_>, EnvelopeError> {
        const KIND: NotificationKind = NotificationKind::LeaveStatusUpdated;
        self.expect_kind(KIND)?;

        if self.department.is_some() {
            return Err(EnvelopeError::ForeignField {
                kind: KIND,
                field: "department",
            });
        }

        let start = required(KIND, "leaveStartDate", self.leave_start_date.as_deref())?;
        let end = required(KIND, "leaveEndDate", self.leave_end_date.as_deref())?;
        check_date("leaveStartDate", start)?;
        check_date("leaveEndDate", end)?;

        Ok(LeaveStatusUpdated {
            request_id: required(KIND, "requestId", self.request_id)?,
            employee_name: required(KIND, "employeeName", self.employee_name.as_deref())?,
            employee_email: self.employee_email.as_deref(),
            leave_start_date: start,
            leave_end_date: end,
            leave_status: required(KIND, "leaveStatus", self.leave_status.as_deref())?,
        })
    }

    fn expect_kind(&self, expected: NotificationKind) -> Result<(), EnvelopeError> {
        match self.resolved_kind() {
            None => Err(EnvelopeError::MissingKind),
            Some(actual) if actual != expected => {
                Err(EnvelopeError::WrongKind { expected, actual })
            }
            Some(_) => Ok(()),
        }
    }
}

fn required<T>(
    kind: NotificationKind,
    field: &'static str,
    value: Option<T>,
) -> Result<T, EnvelopeError> {
    value.ok_or(EnvelopeError::MissingField { kind, field })
}

fn check_date(field: &'static str, value: &str) -> Result<(), EnvelopeError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| EnvelopeError::InvalidDate {
            field,
            value: value.to_string(),
        })
}
