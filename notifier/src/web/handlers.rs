//! Notification endpoint handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::envelope::LeaveStatus;
use crate::publisher::NotificationSink;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub notifications: Arc<dyn NotificationSink>,
}

impl AppState {
    pub fn new(notifications: Arc<dyn NotificationSink>) -> Self {
        Self { notifications }
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
}

fn accepted() -> (StatusCode, Json<AcceptedResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "accepted" }),
    )
}

/// A newly created employee.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeCreatedRequest {
    pub employee_name: String,
    pub employee_email: String,
    pub employee_id: i64,
    pub department: String,
}

/// A leave request whose status changed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveStatusRequest {
    pub employee_name: String,
    pub employee_email: String,
    pub request_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: LeaveStatus,
}

pub async fn employee_created(
    State(state): State<AppState>,
    Json(request): Json<EmployeeCreatedRequest>,
) -> (StatusCode, Json<AcceptedResponse>) {
    info!(
        employee_id = request.employee_id,
        department = %request.department,
        "employee_created_received"
    );

    state
        .notifications
        .notify_employee_created(
            &request.employee_name,
            &request.employee_email,
            request.employee_id,
            &request.department,
        )
        .await;

    accepted()
}

pub async fn leave_status_updated(
    State(state): State<AppState>,
    Json(request): Json<LeaveStatusRequest>,
) -> (StatusCode, Json<AcceptedResponse>) {
    info!(
        request_id = request.request_id,
        status = %request.status,
        "leave_status_received"
    );

    state
        .notifications
        .notify_leave_status_updated(
            &request.employee_name,
            &request.employee_email,
            request.request_id,
            request.start_date,
            request.end_date,
            request.status,
        )
        .await;

    accepted()
}
