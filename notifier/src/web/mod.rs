//! Inbound HTTP boundary for business collaborators.
//!
//! Collaborators call these endpoints after their own transaction has
//! committed. Every well-formed request is answered with `202 Accepted`,
//! whether or not the notification reached the broker.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    employee_created, health, leave_status_updated, AcceptedResponse, AppState,
    EmployeeCreatedRequest, HealthResponse, LeaveStatusRequest,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/notifications/employee-created", post(employee_created))
        .route("/notifications/leave-status", post(leave_status_updated))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
