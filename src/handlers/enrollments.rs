use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Caller;
use crate::services::AdmissionReceipt;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

#[derive(Debug, Deserialize)]
pub struct AdmitRequest {
    pub activity_ids: Vec<Uuid>,
}

#[derive(Serialize)]
struct AdmitPayload {
    #[serde(flatten)]
    receipt: AdmissionReceipt,
    pending_tickets: Vec<Uuid>,
}

pub async fn admit(
    State(state): State<AppState>,
    Caller(requester): Caller,
    Json(body): Json<AdmitRequest>,
) -> Result<Response, AppError> {
    let receipt = state
        .scheduler
        .admit_batch(requester.user_id, &body.activity_ids)
        .await?;

    let message = if receipt.is_partial() {
        "Enrollment confirmed; some tickets are still pending"
    } else {
        "Enrollment confirmed"
    };
    let payload = AdmitPayload {
        pending_tickets: receipt.pending_tickets(),
        receipt,
    };
    Ok(created(payload, message))
}

pub async fn list(
    State(state): State<AppState>,
    Caller(requester): Caller,
) -> Result<Response, AppError> {
    let enrollments = state.scheduler.list_for_user(requester.user_id).await?;
    Ok(success(enrollments, "Enrollments retrieved"))
}

pub async fn cancel(
    State(state): State<AppState>,
    Caller(requester): Caller,
    Path(enrollment_id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.scheduler.cancel(enrollment_id, requester).await?;
    Ok(empty_success("Enrollment cancelled"))
}
