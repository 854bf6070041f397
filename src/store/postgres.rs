//! Postgres backend.
//!
//! Admission locks are row locks (`SELECT ... FOR UPDATE`) taken inside the
//! admission transaction: the user row first, then the activity rows in id
//! order. They are released by `COMMIT`/`ROLLBACK`, or when the transaction
//! is dropped and sqlx rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    ActivityCatalog, AdmissionTx, EnrollmentStore, MarkUsed, StoreError, StoreResult, TicketStore,
    UserDirectory,
};
use crate::models::{Activity, Enrollment, NewEnrollment, SeatStats, TicketRecord};

const ACTIVITY_COLUMNS: &str = "id, title, start_time, end_time, capacity, published";
const ENROLLMENT_COLUMNS: &str =
    "id, user_id, activity_id, seat_number, attended, ticket_id, created_at, cancelled_at";
const TICKET_COLUMNS: &str =
    "ticket_id, user_id, activity_id, issued_at, expires_at, used, used_at, used_by, revoked";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }
}

#[async_trait]
impl ActivityCatalog for PgStore {
    async fn get_activities_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Activity>> {
        let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, Activity>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_activity(&self, id: Uuid) -> StoreResult<Option<Activity>> {
        let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = $1");
        let row = sqlx::query_as::<_, Activity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn count_live_enrollments(&self, activity_id: Uuid) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM enrollments WHERE activity_id = $1 AND cancelled_at IS NULL",
        )
        .bind(activity_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn user_exists(&self, user_id: Uuid) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl EnrollmentStore for PgStore {
    async fn begin_admission(
        &self,
        user_id: Uuid,
        activity_ids: &[Uuid],
    ) -> StoreResult<Box<dyn AdmissionTx>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let mut ordered = activity_ids.to_vec();
        ordered.sort();
        ordered.dedup();
        sqlx::query("SELECT id FROM activities WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&ordered)
            .fetch_all(&mut *tx)
            .await?;

        Ok(Box::new(PgAdmissionTx { tx }))
    }

    async fn find_live_enrollment(
        &self,
        user_id: Uuid,
        activity_id: Uuid,
    ) -> StoreResult<Option<Enrollment>> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE user_id = $1 AND activity_id = $2 AND cancelled_at IS NULL"
        );
        let row = sqlx::query_as::<_, Enrollment>(&sql)
            .bind(user_id)
            .bind(activity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> StoreResult<Option<Enrollment>> {
        let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1");
        let row = sqlx::query_as::<_, Enrollment>(&sql)
            .bind(enrollment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_live_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE user_id = $1 AND cancelled_at IS NULL ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, Enrollment>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn attach_ticket(&self, enrollment_id: Uuid, ticket_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE enrollments SET ticket_id = $2 WHERE id = $1")
            .bind(enrollment_id)
            .bind(ticket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_attended(&self, enrollment_id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE enrollments SET attended = TRUE WHERE id = $1 AND attended = FALSE")
                .bind(enrollment_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_enrollment(
        &self,
        enrollment_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE enrollments SET cancelled_at = $2 WHERE id = $1 AND cancelled_at IS NULL",
        )
        .bind(enrollment_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

struct PgAdmissionTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AdmissionTx for PgAdmissionTx {
    async fn live_enrollments_for_user(
        &mut self,
        user_id: Uuid,
    ) -> StoreResult<Vec<(Enrollment, Activity)>> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE user_id = $1 AND cancelled_at IS NULL"
        );
        let enrollments = sqlx::query_as::<_, Enrollment>(&sql)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        if enrollments.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = enrollments.iter().map(|e| e.activity_id).collect();
        let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ANY($1)");
        let activities = sqlx::query_as::<_, Activity>(&sql)
            .bind(&ids)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(enrollments
            .into_iter()
            .filter_map(|e| {
                activities
                    .iter()
                    .find(|a| a.id == e.activity_id)
                    .cloned()
                    .map(|a| (e, a))
            })
            .collect())
    }

    async fn seat_stats(&mut self, activity_id: Uuid) -> StoreResult<SeatStats> {
        let (live, highest_seat): (i64, i32) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE cancelled_at IS NULL), \
                    COALESCE(MAX(seat_number), 0) \
             FROM enrollments WHERE activity_id = $1",
        )
        .bind(activity_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(SeatStats { live, highest_seat })
    }

    async fn insert(&mut self, enrollment: NewEnrollment) -> StoreResult<Enrollment> {
        let row = enrollment.into_enrollment();
        sqlx::query(
            "INSERT INTO enrollments (id, user_id, activity_id, seat_number, attended, created_at) \
             VALUES ($1, $2, $3, $4, FALSE, $5)",
        )
        .bind(row.id)
        .bind(row.user_id)
        .bind(row.activity_id)
        .bind(row.seat_number)
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert_ticket(&self, record: &TicketRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tickets (ticket_id, user_id, activity_id, issued_at, expires_at, used, revoked) \
             VALUES ($1, $2, $3, $4, $5, FALSE, FALSE)",
        )
        .bind(&record.ticket_id)
        .bind(record.user_id)
        .bind(record.activity_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_ticket(&self, ticket_id: &str) -> StoreResult<Option<TicketRecord>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_id = $1");
        let row = sqlx::query_as::<_, TicketRecord>(&sql)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn mark_used(
        &self,
        ticket_id: &str,
        used_at: DateTime<Utc>,
        staff_id: Uuid,
    ) -> StoreResult<MarkUsed> {
        let sql = format!(
            "UPDATE tickets SET used = TRUE, used_at = $2, used_by = $3 \
             WHERE ticket_id = $1 AND used = FALSE RETURNING {TICKET_COLUMNS}"
        );
        let applied = sqlx::query_as::<_, TicketRecord>(&sql)
            .bind(ticket_id)
            .bind(used_at)
            .bind(staff_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(record) = applied {
            return Ok(MarkUsed::Applied(record));
        }

        Ok(match self.find_ticket(ticket_id).await? {
            Some(record) => MarkUsed::AlreadyUsed(record),
            None => MarkUsed::Missing,
        })
    }

    async fn reissue_ticket(&self, record: &TicketRecord) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        // Serializes with admission and other reissues for this user.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(record.user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let revoked = sqlx::query(
            "UPDATE tickets SET revoked = TRUE \
             WHERE user_id = $1 AND activity_id = $2 \
               AND used = FALSE AND revoked = FALSE AND expires_at >= $3",
        )
        .bind(record.user_id)
        .bind(record.activity_id)
        .bind(record.issued_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "INSERT INTO tickets (ticket_id, user_id, activity_id, issued_at, expires_at, used, revoked) \
             VALUES ($1, $2, $3, $4, $5, FALSE, FALSE)",
        )
        .bind(&record.ticket_id)
        .bind(record.user_id)
        .bind(record.activity_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(revoked)
    }
}
