use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub activity_id: Uuid,
    pub seat_number: i32,
    pub attended: bool,
    pub ticket_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn is_live(&self) -> bool {
        self.cancelled_at.is_none()
    }
}

/// A row staged inside an admission transaction.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub user_id: Uuid,
    pub activity_id: Uuid,
    pub seat_number: i32,
    pub created_at: DateTime<Utc>,
}

impl NewEnrollment {
    pub fn into_enrollment(self) -> Enrollment {
        Enrollment {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            activity_id: self.activity_id,
            seat_number: self.seat_number,
            attended: false,
            ticket_id: None,
            created_at: self.created_at,
            cancelled_at: None,
        }
    }
}

/// Per-activity seat bookkeeping read under the activity lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeatStats {
    pub live: i64,
    /// Highest seat number ever handed out, cancelled rows included.
    pub highest_seat: i32,
}
