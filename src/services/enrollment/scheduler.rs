//! Batch admission of a user into scheduled activities.
//!
//! An admission runs inside one [`AdmissionTx`]: the user's lock and every
//! requested activity's lock are held from the first read until commit or
//! rollback. Inside that region the checks run in a fixed order (duplicate,
//! overlap within the batch, overlap with held enrollments, capacity) and the
//! whole batch is written or nothing is. Ticket issuance and the confirmation
//! notice happen after commit, outside the locks.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::conflict;
use crate::models::{Activity, Enrollment, IssuedTicket, NewEnrollment, Requester};
use crate::services::clock::Clock;
use crate::services::notifier::{ConfirmedSeat, EnrollmentNotifier};
use crate::services::observer::EngineObserver;
use crate::services::tickets::TicketService;
use crate::store::{ActivityCatalog, AdmissionTx, EnrollmentStore, StoreError, UserDirectory};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("already enrolled in activity {activity_id}")]
    DuplicateEnrollment { activity_id: Uuid },

    #[error("activities {first} and {second} overlap")]
    TimeConflict { first: Uuid, second: Uuid },

    #[error("activity {activity_id} is full (capacity {capacity})")]
    CapacityExceeded { activity_id: Uuid, capacity: i32 },

    #[error("enrollment {0} not found")]
    NotFound(Uuid),

    #[error("not allowed to cancel enrollment {0}")]
    Forbidden(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    pub fn label(&self) -> &'static str {
        match self {
            AdmissionError::InvalidRequest(_) => "invalid_request",
            AdmissionError::DuplicateEnrollment { .. } => "duplicate_enrollment",
            AdmissionError::TimeConflict { .. } => "time_conflict",
            AdmissionError::CapacityExceeded { .. } => "capacity_exceeded",
            AdmissionError::NotFound(_) => "not_found",
            AdmissionError::Forbidden(_) => "forbidden",
            AdmissionError::Store(_) => "store_error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmittedSeat {
    pub enrollment_id: Uuid,
    pub activity_id: Uuid,
    pub seat_number: i32,
    /// `None` when issuance failed after commit; retry through the ticket service.
    pub ticket: Option<IssuedTicket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionReceipt {
    pub user_id: Uuid,
    pub seats: Vec<AdmittedSeat>,
}

impl AdmissionReceipt {
    /// Activities whose enrollment committed but whose ticket is still missing.
    pub fn pending_tickets(&self) -> Vec<Uuid> {
        self.seats
            .iter()
            .filter(|s| s.ticket.is_none())
            .map(|s| s.activity_id)
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        self.seats.iter().any(|s| s.ticket.is_none())
    }
}

pub struct EnrollmentScheduler {
    store: Arc<dyn EnrollmentStore>,
    catalog: Arc<dyn ActivityCatalog>,
    users: Arc<dyn UserDirectory>,
    tickets: Arc<TicketService>,
    notifier: Arc<dyn EnrollmentNotifier>,
    observer: Arc<dyn EngineObserver>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl EnrollmentScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn EnrollmentStore>,
        catalog: Arc<dyn ActivityCatalog>,
        users: Arc<dyn UserDirectory>,
        tickets: Arc<TicketService>,
        notifier: Arc<dyn EnrollmentNotifier>,
        observer: Arc<dyn EngineObserver>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            users,
            tickets,
            notifier,
            observer,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Admits `user_id` into every activity in `activity_ids`, or into none.
    pub async fn admit_batch(
        &self,
        user_id: Uuid,
        activity_ids: &[Uuid],
    ) -> Result<AdmissionReceipt, AdmissionError> {
        let created = match self.admit_with_retry(user_id, activity_ids).await {
            Ok(created) => created,
            Err(err) => {
                self.observer.admission(err.label());
                match &err {
                    AdmissionError::Store(e) => {
                        tracing::error!(%user_id, error = %e, "admission failed in store");
                    }
                    other => info!(%user_id, reason = other.label(), "admission rejected"),
                }
                return Err(err);
            }
        };

        info!(
            %user_id,
            enrollments = created.len(),
            "admission committed"
        );

        let mut seats = Vec::with_capacity(created.len());
        for enrollment in created {
            let ticket = match self.tickets.issue(user_id, enrollment.activity_id).await {
                Ok(ticket) => Some(ticket),
                Err(e) => {
                    warn!(
                        %user_id,
                        activity_id = %enrollment.activity_id,
                        error = %e,
                        "ticket issuance failed after admission; left pending"
                    );
                    None
                }
            };
            seats.push(AdmittedSeat {
                enrollment_id: enrollment.id,
                activity_id: enrollment.activity_id,
                seat_number: enrollment.seat_number,
                ticket,
            });
        }

        let receipt = AdmissionReceipt { user_id, seats };
        self.observer.admission(if receipt.is_partial() {
            "partial"
        } else {
            "admitted"
        });
        self.dispatch_confirmation(&receipt);
        Ok(receipt)
    }

    /// Cancels a live enrollment on behalf of its owner or a staff member.
    ///
    /// The seat number is not handed out again.
    pub async fn cancel(
        &self,
        enrollment_id: Uuid,
        requester: Requester,
    ) -> Result<Enrollment, AdmissionError> {
        let enrollment = self
            .store
            .get_enrollment(enrollment_id)
            .await?
            .filter(Enrollment::is_live)
            .ok_or(AdmissionError::NotFound(enrollment_id))?;

        if enrollment.user_id != requester.user_id && !requester.is_staff {
            return Err(AdmissionError::Forbidden(enrollment_id));
        }

        if !self
            .store
            .cancel_enrollment(enrollment_id, self.clock.now())
            .await?
        {
            return Err(AdmissionError::NotFound(enrollment_id));
        }

        info!(
            %enrollment_id,
            user_id = %enrollment.user_id,
            activity_id = %enrollment.activity_id,
            by = %requester.user_id,
            "enrollment cancelled"
        );
        Ok(enrollment)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>, AdmissionError> {
        Ok(self.store.list_live_for_user(user_id).await?)
    }

    async fn admit_with_retry(
        &self,
        user_id: Uuid,
        activity_ids: &[Uuid],
    ) -> Result<Vec<Enrollment>, AdmissionError> {
        if activity_ids.is_empty() {
            return Err(AdmissionError::InvalidRequest(
                "at least one activity is required".to_string(),
            ));
        }

        if !self.users.user_exists(user_id).await? {
            return Err(AdmissionError::InvalidRequest(format!(
                "unknown user: {user_id}"
            )));
        }

        let mut attempt = 1;
        loop {
            match self.try_admit(user_id, activity_ids).await {
                Err(AdmissionError::Store(e)) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(%user_id, attempt, error = %e, "retrying admission transaction");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_admit(
        &self,
        user_id: Uuid,
        activity_ids: &[Uuid],
    ) -> Result<Vec<Enrollment>, AdmissionError> {
        let requested = self.resolve(activity_ids).await?;

        let mut tx = self.store.begin_admission(user_id, activity_ids).await?;
        let outcome = self.admit_locked(tx.as_mut(), user_id, &requested).await;
        match outcome {
            Ok(created) => {
                tx.commit().await?;
                Ok(created)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(%user_id, error = %rollback, "admission rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Loads the requested activities sorted by id; every id must be known,
    /// published and appear once.
    async fn resolve(&self, activity_ids: &[Uuid]) -> Result<Vec<Activity>, AdmissionError> {
        let distinct: HashSet<Uuid> = activity_ids.iter().copied().collect();
        if distinct.len() != activity_ids.len() {
            return Err(AdmissionError::InvalidRequest(
                "activity ids must not repeat".to_string(),
            ));
        }

        let mut requested = self.catalog.get_activities_by_ids(activity_ids).await?;
        if requested.len() != activity_ids.len() {
            let known: HashSet<Uuid> = requested.iter().map(|a| a.id).collect();
            let missing: Vec<String> = activity_ids
                .iter()
                .filter(|id| !known.contains(id))
                .map(Uuid::to_string)
                .collect();
            return Err(AdmissionError::InvalidRequest(format!(
                "unknown activity: {}",
                missing.join(", ")
            )));
        }

        if let Some(closed) = requested.iter().find(|a| !a.published) {
            return Err(AdmissionError::InvalidRequest(format!(
                "activity {} is not open for enrollment",
                closed.id
            )));
        }

        requested.sort_by_key(|a| a.id);
        Ok(requested)
    }

    async fn admit_locked(
        &self,
        tx: &mut dyn AdmissionTx,
        user_id: Uuid,
        requested: &[Activity],
    ) -> Result<Vec<Enrollment>, AdmissionError> {
        let held = tx.live_enrollments_for_user(user_id).await?;

        if let Some(activity) = requested
            .iter()
            .find(|a| held.iter().any(|(e, _)| e.activity_id == a.id))
        {
            return Err(AdmissionError::DuplicateEnrollment {
                activity_id: activity.id,
            });
        }

        if let Some((first, second)) = conflict::first_pairwise_conflict(requested) {
            return Err(AdmissionError::TimeConflict { first, second });
        }

        let held_activities: Vec<Activity> = held.into_iter().map(|(_, a)| a).collect();
        if let Some((first, second)) = conflict::first_conflict_with(requested, &held_activities) {
            return Err(AdmissionError::TimeConflict { first, second });
        }

        let now = self.clock.now();
        let mut staged = Vec::with_capacity(requested.len());
        for activity in requested {
            let stats = tx.seat_stats(activity.id).await?;
            if !activity.has_room_for(stats.live) {
                return Err(AdmissionError::CapacityExceeded {
                    activity_id: activity.id,
                    capacity: activity.capacity.unwrap_or_default(),
                });
            }
            debug!(
                activity_id = %activity.id,
                live = stats.live,
                seat = stats.highest_seat + 1,
                "seat reserved"
            );
            staged.push(NewEnrollment {
                user_id,
                activity_id: activity.id,
                seat_number: stats.highest_seat + 1,
                created_at: now,
            });
        }

        let mut created = Vec::with_capacity(staged.len());
        for row in staged {
            created.push(tx.insert(row).await?);
        }
        Ok(created)
    }

    fn dispatch_confirmation(&self, receipt: &AdmissionReceipt) {
        let notifier = Arc::clone(&self.notifier);
        let user_id = receipt.user_id;
        let seats: Vec<ConfirmedSeat> = receipt
            .seats
            .iter()
            .map(|s| ConfirmedSeat {
                activity_id: s.activity_id,
                seat_number: s.seat_number,
                ticket_token: s.ticket.as_ref().map(|t| t.token.clone()),
            })
            .collect();

        tokio::spawn(async move {
            if let Err(e) = notifier.notify_enrollment_confirmed(user_id, &seats).await {
                warn!(%user_id, error = %e, "enrollment confirmation not delivered");
            }
        });
    }
}
