use axum::extract::State;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Caller;
use crate::models::TicketFormat;
use crate::services::{RedeemRequest, ValidatedTicket};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub activity_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
    /// Activity the scanner is stationed at.
    #[serde(default)]
    pub activity_id: Option<Uuid>,
}

#[derive(Serialize)]
struct ValidationSummary {
    format: TicketFormat,
    user_id: String,
    activity_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl From<ValidatedTicket> for ValidationSummary {
    fn from(ticket: ValidatedTicket) -> Self {
        match ticket {
            ValidatedTicket::Signed(claims) => Self {
                format: TicketFormat::Signed,
                user_id: claims.sub,
                activity_id: Some(claims.act),
                expires_at: DateTime::from_timestamp(claims.exp, 0),
            },
            ValidatedTicket::Legacy(legacy) => Self {
                format: TicketFormat::Legacy,
                user_id: legacy.user_id.to_string(),
                activity_id: None,
                expires_at: None,
            },
        }
    }
}

/// Issues (or reissues) the caller's ticket for one of their enrollments.
pub async fn issue(
    State(state): State<AppState>,
    Caller(requester): Caller,
    Json(body): Json<IssueRequest>,
) -> Result<Response, AppError> {
    let ticket = state
        .tickets
        .issue(requester.user_id, body.activity_id)
        .await?;
    Ok(created(ticket, "Ticket issued"))
}

pub async fn validate(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<TokenRequest>,
) -> Result<Response, AppError> {
    caller.require_staff()?;
    let ticket = state.tickets.validate(&body.token).await?;
    Ok(success(ValidationSummary::from(ticket), "Ticket is valid"))
}

pub async fn redeem(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<TokenRequest>,
) -> Result<Response, AppError> {
    let staff_id = caller.require_staff()?;
    let request = RedeemRequest {
        token: body.token,
        staff_id,
        activity_id: body.activity_id,
    };
    let outcome = state.tickets.redeem(&request).await?;
    let message = outcome.message.clone();
    Ok(success(outcome, message))
}
