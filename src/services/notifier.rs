use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedSeat {
    pub activity_id: Uuid,
    pub seat_number: i32,
    /// `None` while the ticket is still pending.
    pub ticket_token: Option<String>,
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound confirmation channel (email, push, ...). Fire-and-forget.
#[async_trait]
pub trait EnrollmentNotifier: Send + Sync {
    async fn notify_enrollment_confirmed(
        &self,
        user_id: Uuid,
        seats: &[ConfirmedSeat],
    ) -> Result<(), NotifyError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl EnrollmentNotifier for LogNotifier {
    async fn notify_enrollment_confirmed(
        &self,
        user_id: Uuid,
        seats: &[ConfirmedSeat],
    ) -> Result<(), NotifyError> {
        let pending = seats.iter().filter(|s| s.ticket_token.is_none()).count();
        tracing::info!(
            %user_id,
            seats = seats.len(),
            pending_tickets = pending,
            "enrollment confirmation queued"
        );
        Ok(())
    }
}
