use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored anti-replay record for one issued ticket.
///
/// Rows are never deleted. `used` and `revoked` only ever move from
/// `false` to `true`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub user_id: Uuid,
    pub activity_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<Uuid>,
    pub revoked: bool,
}

impl TicketRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Signed payload carried inside a ticket token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClaims {
    pub sub: String,
    pub act: String,
    pub iat: i64,
    pub jti: String,
    pub exp: i64,
}

/// Result of a successful issuance; `token` is what ends up in the QR code.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedTicket {
    pub ticket_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketFormat {
    Signed,
    Legacy,
}

/// What a scanner receives back from a redemption attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RedemptionOutcome {
    pub success: bool,
    pub message: String,
    pub already_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub user_id: Uuid,
    pub activity_id: Uuid,
    pub format: TicketFormat,
}
