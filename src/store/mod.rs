//! Persistence seams for the enrollment and ticketing engine.
//!
//! The engine only talks to these traits. [`PgStore`] backs them with
//! Postgres; [`MemoryStore`] keeps everything in process and is what the
//! tests run against. Both must give the same guarantees:
//!
//! - an [`AdmissionTx`] holds the requesting user's lock and every requested
//!   activity's lock until it commits, rolls back or is dropped;
//! - locks are always taken user first, then activities in ascending id
//!   order, so two admissions can never wait on each other in a cycle;
//! - [`TicketStore::mark_used`] is a single compare-and-set on `used`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Activity, Enrollment, NewEnrollment, SeatStats, TicketRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Failures after which re-running the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => {
                // serialization_failure, deadlock_detected
                matches!(db.code().as_deref(), Some("40001" | "40P01"))
            }
            StoreError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read side of the external activity catalog.
#[async_trait]
pub trait ActivityCatalog: Send + Sync {
    /// Returns the activities that exist among `ids`; unknown ids are skipped.
    async fn get_activities_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Activity>>;

    async fn get_activity(&self, id: Uuid) -> StoreResult<Option<Activity>>;

    async fn count_live_enrollments(&self, activity_id: Uuid) -> StoreResult<i64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, user_id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Opens the serialized admission region for `user_id` and `activity_ids`.
    ///
    /// Returns once every lock is held.
    async fn begin_admission(
        &self,
        user_id: Uuid,
        activity_ids: &[Uuid],
    ) -> StoreResult<Box<dyn AdmissionTx>>;

    async fn find_live_enrollment(
        &self,
        user_id: Uuid,
        activity_id: Uuid,
    ) -> StoreResult<Option<Enrollment>>;

    async fn get_enrollment(&self, enrollment_id: Uuid) -> StoreResult<Option<Enrollment>>;

    async fn list_live_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Enrollment>>;

    async fn attach_ticket(&self, enrollment_id: Uuid, ticket_id: &str) -> StoreResult<()>;

    /// Flips `attended` to `true`. Returns `false` if it already was.
    async fn mark_attended(&self, enrollment_id: Uuid) -> StoreResult<bool>;

    /// Removes the enrollment from the live set. Returns `false` if it was
    /// not live.
    async fn cancel_enrollment(&self, enrollment_id: Uuid, now: DateTime<Utc>)
        -> StoreResult<bool>;
}

/// The serialized region of one admission.
#[async_trait]
pub trait AdmissionTx: Send {
    /// The user's live enrollments paired with their activities.
    async fn live_enrollments_for_user(
        &mut self,
        user_id: Uuid,
    ) -> StoreResult<Vec<(Enrollment, Activity)>>;

    async fn seat_stats(&mut self, activity_id: Uuid) -> StoreResult<SeatStats>;

    async fn insert(&mut self, enrollment: NewEnrollment) -> StoreResult<Enrollment>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Outcome of the compare-and-set on a ticket's `used` flag.
#[derive(Debug, Clone)]
pub enum MarkUsed {
    /// This call flipped the flag.
    Applied(TicketRecord),
    /// Someone else got there first; carries the winner's record.
    AlreadyUsed(TicketRecord),
    Missing,
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, record: &TicketRecord) -> StoreResult<()>;

    async fn find_ticket(&self, ticket_id: &str) -> StoreResult<Option<TicketRecord>>;

    async fn mark_used(
        &self,
        ticket_id: &str,
        used_at: DateTime<Utc>,
        staff_id: Uuid,
    ) -> StoreResult<MarkUsed>;

    /// Revokes every unused, unexpired ticket of the record's user and
    /// activity, then stores the record, as one atomic step. Concurrent calls
    /// for the same pair are serialized. Returns how many were revoked.
    async fn reissue_ticket(&self, record: &TicketRecord) -> StoreResult<u64>;
}

/// Everything the engine needs from one backend.
pub trait EngineStore:
    ActivityCatalog + UserDirectory + EnrollmentStore + TicketStore + 'static
{
}

impl<T> EngineStore for T where
    T: ActivityCatalog + UserDirectory + EnrollmentStore + TicketStore + 'static
{
}
