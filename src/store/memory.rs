//! Process-local backend.
//!
//! Serialization comes from one `tokio::sync::Mutex` per lock key, taken in
//! `LockKey` order. Data lives behind a plain `std::sync::Mutex` that is never
//! held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    ActivityCatalog, AdmissionTx, EnrollmentStore, MarkUsed, StoreResult, TicketStore,
    UserDirectory,
};
use crate::models::{Activity, Enrollment, NewEnrollment, SeatStats, TicketRecord, User};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    activities: HashMap<Uuid, Activity>,
    enrollments: HashMap<Uuid, Enrollment>,
    tickets: HashMap<String, TicketRecord>,
}

impl MemoryState {
    fn seat_stats(&self, activity_id: Uuid) -> SeatStats {
        self.enrollments
            .values()
            .filter(|e| e.activity_id == activity_id)
            .fold(SeatStats::default(), |mut stats, e| {
                if e.is_live() {
                    stats.live += 1;
                }
                stats.highest_seat = stats.highest_seat.max(e.seat_number);
                stats
            })
    }
}

/// Variant order is the global lock order: the user, then activities by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum LockKey {
    User(Uuid),
    Activity(Uuid),
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        lock(&self.state).users.insert(user.id, user);
    }

    pub fn add_activity(&self, activity: Activity) {
        lock(&self.state).activities.insert(activity.id, activity);
    }

    /// Live enrollments of an activity, ordered by seat.
    pub fn live_enrollments_for_activity(&self, activity_id: Uuid) -> Vec<Enrollment> {
        let state = lock(&self.state);
        let mut rows: Vec<Enrollment> = state
            .enrollments
            .values()
            .filter(|e| e.activity_id == activity_id && e.is_live())
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.seat_number);
        rows
    }

    fn lock_handles(&self, keys: &[LockKey]) -> Vec<Arc<AsyncMutex<()>>> {
        let mut locks = lock(&self.locks);
        keys.iter()
            .map(|key| Arc::clone(locks.entry(*key).or_default()))
            .collect()
    }
}

#[async_trait]
impl ActivityCatalog for MemoryStore {
    async fn get_activities_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Activity>> {
        let state = lock(&self.state);
        Ok(ids
            .iter()
            .filter_map(|id| state.activities.get(id).cloned())
            .collect())
    }

    async fn get_activity(&self, id: Uuid) -> StoreResult<Option<Activity>> {
        Ok(lock(&self.state).activities.get(&id).cloned())
    }

    async fn count_live_enrollments(&self, activity_id: Uuid) -> StoreResult<i64> {
        Ok(lock(&self.state).seat_stats(activity_id).live)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn user_exists(&self, user_id: Uuid) -> StoreResult<bool> {
        Ok(lock(&self.state).users.contains_key(&user_id))
    }
}

#[async_trait]
impl EnrollmentStore for MemoryStore {
    async fn begin_admission(
        &self,
        user_id: Uuid,
        activity_ids: &[Uuid],
    ) -> StoreResult<Box<dyn AdmissionTx>> {
        let mut keys: Vec<LockKey> = std::iter::once(LockKey::User(user_id))
            .chain(activity_ids.iter().copied().map(LockKey::Activity))
            .collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for handle in self.lock_handles(&keys) {
            guards.push(handle.lock_owned().await);
        }

        Ok(Box::new(MemoryAdmissionTx {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            _guards: guards,
        }))
    }

    async fn find_live_enrollment(
        &self,
        user_id: Uuid,
        activity_id: Uuid,
    ) -> StoreResult<Option<Enrollment>> {
        Ok(lock(&self.state)
            .enrollments
            .values()
            .find(|e| e.user_id == user_id && e.activity_id == activity_id && e.is_live())
            .cloned())
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> StoreResult<Option<Enrollment>> {
        Ok(lock(&self.state).enrollments.get(&enrollment_id).cloned())
    }

    async fn list_live_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let state = lock(&self.state);
        let mut rows: Vec<Enrollment> = state
            .enrollments
            .values()
            .filter(|e| e.user_id == user_id && e.is_live())
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    async fn attach_ticket(&self, enrollment_id: Uuid, ticket_id: &str) -> StoreResult<()> {
        if let Some(enrollment) = lock(&self.state).enrollments.get_mut(&enrollment_id) {
            enrollment.ticket_id = Some(ticket_id.to_string());
        }
        Ok(())
    }

    async fn mark_attended(&self, enrollment_id: Uuid) -> StoreResult<bool> {
        let mut state = lock(&self.state);
        match state.enrollments.get_mut(&enrollment_id) {
            Some(enrollment) if !enrollment.attended => {
                enrollment.attended = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_enrollment(
        &self,
        enrollment_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = lock(&self.state);
        match state.enrollments.get_mut(&enrollment_id) {
            Some(enrollment) if enrollment.is_live() => {
                enrollment.cancelled_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct MemoryAdmissionTx {
    state: Arc<Mutex<MemoryState>>,
    staged: Vec<Enrollment>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

#[async_trait]
impl AdmissionTx for MemoryAdmissionTx {
    async fn live_enrollments_for_user(
        &mut self,
        user_id: Uuid,
    ) -> StoreResult<Vec<(Enrollment, Activity)>> {
        let state = lock(&self.state);
        Ok(state
            .enrollments
            .values()
            .chain(self.staged.iter())
            .filter(|e| e.user_id == user_id && e.is_live())
            .filter_map(|e| {
                state
                    .activities
                    .get(&e.activity_id)
                    .map(|activity| (e.clone(), activity.clone()))
            })
            .collect())
    }

    async fn seat_stats(&mut self, activity_id: Uuid) -> StoreResult<SeatStats> {
        let mut stats = lock(&self.state).seat_stats(activity_id);
        for staged in self.staged.iter().filter(|e| e.activity_id == activity_id) {
            stats.live += 1;
            stats.highest_seat = stats.highest_seat.max(staged.seat_number);
        }
        Ok(stats)
    }

    async fn insert(&mut self, enrollment: NewEnrollment) -> StoreResult<Enrollment> {
        let row = enrollment.into_enrollment();
        self.staged.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut state = lock(&self.state);
        for row in &self.staged {
            state.enrollments.insert(row.id, row.clone());
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_ticket(&self, record: &TicketRecord) -> StoreResult<()> {
        lock(&self.state)
            .tickets
            .insert(record.ticket_id.clone(), record.clone());
        Ok(())
    }

    async fn find_ticket(&self, ticket_id: &str) -> StoreResult<Option<TicketRecord>> {
        Ok(lock(&self.state).tickets.get(ticket_id).cloned())
    }

    async fn mark_used(
        &self,
        ticket_id: &str,
        used_at: DateTime<Utc>,
        staff_id: Uuid,
    ) -> StoreResult<MarkUsed> {
        let mut state = lock(&self.state);
        let Some(record) = state.tickets.get_mut(ticket_id) else {
            return Ok(MarkUsed::Missing);
        };
        if record.used {
            return Ok(MarkUsed::AlreadyUsed(record.clone()));
        }
        record.used = true;
        record.used_at = Some(used_at);
        record.used_by = Some(staff_id);
        Ok(MarkUsed::Applied(record.clone()))
    }

    async fn reissue_ticket(&self, record: &TicketRecord) -> StoreResult<u64> {
        let mut state = lock(&self.state);
        let mut revoked = 0;
        for active in state.tickets.values_mut().filter(|t| {
            t.user_id == record.user_id
                && t.activity_id == record.activity_id
                && !t.used
                && !t.revoked
                && !t.is_expired_at(record.issued_at)
        }) {
            active.revoked = true;
            revoked += 1;
        }
        state
            .tickets
            .insert(record.ticket_id.clone(), record.clone());
        Ok(revoked)
    }
}
