//! Batch admission against the in-memory backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{at, ticket_config, Harness};
use conference_server::config::{AdmissionConfig, ReissuePolicy};
use conference_server::models::{Requester, TicketRecord};
use conference_server::services::{AdmissionError, Clock, EnrollmentScheduler, TicketService};
use conference_server::store::{
    EnrollmentStore, MarkUsed, MemoryStore, StoreError, StoreResult, TicketStore,
};
use conference_server::EngineDeps;
use uuid::Uuid;

#[tokio::test]
async fn test_overlapping_batch_is_rejected_atomically() {
    let h = Harness::new();
    let user = h.user("Ada");
    let a = h.activity("Keynote", Some((at(9, 0), at(10, 0))), Some(1));
    let b = h.activity("Workshop", Some((at(9, 30), at(10, 30))), Some(5));

    let err = h.state.scheduler.admit_batch(user, &[a, b]).await.unwrap_err();
    match err {
        AdmissionError::TimeConflict { first, second } => {
            let mut pair = [first, second];
            pair.sort();
            let mut expected = [a, b];
            expected.sort();
            assert_eq!(pair, expected);
        }
        other => panic!("expected TimeConflict, got {other:?}"),
    }

    assert!(h.store.live_enrollments_for_activity(a).is_empty());
    assert!(h.store.live_enrollments_for_activity(b).is_empty());
}

#[tokio::test]
async fn test_back_to_back_activities_do_not_conflict() {
    let h = Harness::new();
    let user = h.user("Ada");
    let a = h.activity("Morning", Some((at(9, 0), at(10, 0))), None);
    let b = h.activity("Late morning", Some((at(10, 0), at(11, 0))), None);

    let receipt = h.state.scheduler.admit_batch(user, &[a, b]).await.unwrap();
    assert_eq!(receipt.seats.len(), 2);
    assert!(!receipt.is_partial());
    assert!(receipt.seats.iter().all(|s| s.seat_number == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_seat_goes_to_exactly_one_user() {
    let h = Harness::new();
    let a = h.activity("Masterclass", Some((at(14, 0), at(15, 0))), Some(1));
    let u1 = h.user("First");
    let u2 = h.user("Second");

    let s1 = Arc::clone(&h.state.scheduler);
    let s2 = Arc::clone(&h.state.scheduler);
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { s1.admit_batch(u1, &[a]).await }),
        tokio::spawn(async move { s2.admit_batch(u2, &[a]).await }),
    );
    let results = [r1.unwrap(), r2.unwrap()];

    let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].seats[0].seat_number, 1);

    let rejected = results.iter().filter_map(|r| r.as_ref().err()).next().unwrap();
    assert!(matches!(
        rejected,
        AdmissionError::CapacityExceeded { activity_id, capacity: 1 } if *activity_id == a
    ));
    assert_eq!(h.store.live_enrollments_for_activity(a).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_capacity_holds_under_load() {
    const CAPACITY: i32 = 10;
    const CONTENDERS: usize = 100;

    let h = Harness::new();
    let a = h.activity("Popular talk", Some((at(11, 0), at(12, 0))), Some(CAPACITY));

    let mut handles = Vec::with_capacity(CONTENDERS);
    for i in 0..CONTENDERS {
        let user = h.user(&format!("attendee{i}"));
        let scheduler = Arc::clone(&h.state.scheduler);
        handles.push(tokio::spawn(
            async move { scheduler.admit_batch(user, &[a]).await },
        ));
    }

    let mut successes = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AdmissionError::CapacityExceeded { .. }) => full += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(successes, CAPACITY as usize);
    assert_eq!(full, CONTENDERS - CAPACITY as usize);

    let live = h.store.live_enrollments_for_activity(a);
    let seats: Vec<i32> = live.iter().map(|e| e.seat_number).collect();
    assert_eq!(seats, (1..=CAPACITY).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_cannot_race_into_overlapping_activities() {
    let h = Harness::new();
    let user = h.user("Ada");
    let a = h.activity("Track A", Some((at(13, 0), at(14, 0))), None);
    let b = h.activity("Track B", Some((at(13, 30), at(14, 30))), None);

    for _ in 0..20 {
        let s1 = Arc::clone(&h.state.scheduler);
        let s2 = Arc::clone(&h.state.scheduler);
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { s1.admit_batch(user, &[a]).await }),
            tokio::spawn(async move { s2.admit_batch(user, &[b]).await }),
        );
        let (r1, r2) = (r1.unwrap(), r2.unwrap());
        assert!(
            r1.is_ok() != r2.is_ok(),
            "exactly one of two overlapping admissions must win"
        );

        let held = h.state.scheduler.list_for_user(user).await.unwrap();
        assert_eq!(held.len(), 1);
        let requester = Requester {
            user_id: user,
            is_staff: false,
        };
        h.state.scheduler.cancel(held[0].id, requester).await.unwrap();
    }
}

#[tokio::test]
async fn test_duplicate_enrollment_is_rejected() {
    let h = Harness::new();
    let user = h.user("Ada");
    let a = h.activity("Keynote", Some((at(9, 0), at(10, 0))), None);

    h.state.scheduler.admit_batch(user, &[a]).await.unwrap();
    let err = h.state.scheduler.admit_batch(user, &[a]).await.unwrap_err();
    assert!(matches!(err, AdmissionError::DuplicateEnrollment { activity_id } if activity_id == a));
}

#[tokio::test]
async fn test_conflict_with_held_enrollment_rejects_whole_batch() {
    let h = Harness::new();
    let user = h.user("Ada");
    let held = h.activity("Keynote", Some((at(9, 0), at(10, 0))), None);
    let free = h.activity("Lunch talk", Some((at(12, 0), at(13, 0))), None);
    let clash = h.activity("Panel", Some((at(9, 45), at(10, 15))), None);

    h.state.scheduler.admit_batch(user, &[held]).await.unwrap();
    let err = h
        .state
        .scheduler
        .admit_batch(user, &[free, clash])
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::TimeConflict { .. }));
    assert!(h.store.live_enrollments_for_activity(free).is_empty());
}

#[tokio::test]
async fn test_unscheduled_activities_never_conflict() {
    let h = Harness::new();
    let user = h.user("Ada");
    let a = h.activity("Keynote", Some((at(9, 0), at(10, 0))), None);
    let open = h.activity("Expo hall", None, None);

    let receipt = h.state.scheduler.admit_batch(user, &[a, open]).await.unwrap();
    assert_eq!(receipt.seats.len(), 2);
}

#[tokio::test]
async fn test_invalid_requests() {
    let h = Harness::new();
    let user = h.user("Ada");
    let a = h.activity("Keynote", None, None);

    let empty = h.state.scheduler.admit_batch(user, &[]).await.unwrap_err();
    assert!(matches!(empty, AdmissionError::InvalidRequest(_)));

    let repeated = h.state.scheduler.admit_batch(user, &[a, a]).await.unwrap_err();
    assert!(matches!(repeated, AdmissionError::InvalidRequest(_)));

    let unknown = Uuid::new_v4();
    let err = h
        .state
        .scheduler
        .admit_batch(user, &[a, unknown])
        .await
        .unwrap_err();
    match err {
        AdmissionError::InvalidRequest(msg) => assert!(msg.contains(&unknown.to_string())),
        other => panic!("expected InvalidRequest, got {other:?}"),
    }
    assert!(h.store.live_enrollments_for_activity(a).is_empty());
}

#[tokio::test]
async fn test_cancelled_seat_is_not_reused() {
    let h = Harness::new();
    let a = h.activity("Workshop", None, Some(2));
    let u1 = h.user("One");
    let u2 = h.user("Two");
    let u3 = h.user("Three");

    let first = h.state.scheduler.admit_batch(u1, &[a]).await.unwrap();
    h.state.scheduler.admit_batch(u2, &[a]).await.unwrap();

    let requester = Requester {
        user_id: u1,
        is_staff: false,
    };
    h.state
        .scheduler
        .cancel(first.seats[0].enrollment_id, requester)
        .await
        .unwrap();

    let third = h.state.scheduler.admit_batch(u3, &[a]).await.unwrap();
    assert_eq!(third.seats[0].seat_number, 3);

    let seats: Vec<i32> = h
        .store
        .live_enrollments_for_activity(a)
        .iter()
        .map(|e| e.seat_number)
        .collect();
    assert_eq!(seats, vec![2, 3]);
}

#[tokio::test]
async fn test_cancel_requires_owner_or_staff() {
    let h = Harness::new();
    let a = h.activity("Workshop", None, None);
    let owner = h.user("Owner");
    let other = h.user("Other");
    let staff = h.user("Staff");

    let receipt = h.state.scheduler.admit_batch(owner, &[a]).await.unwrap();
    let enrollment_id = receipt.seats[0].enrollment_id;

    let err = h
        .state
        .scheduler
        .cancel(
            enrollment_id,
            Requester {
                user_id: other,
                is_staff: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::Forbidden(id) if id == enrollment_id));

    let staff = Requester {
        user_id: staff,
        is_staff: true,
    };
    let cancelled = h.state.scheduler.cancel(enrollment_id, staff).await.unwrap();
    assert_eq!(cancelled.user_id, owner);

    let again = h.state.scheduler.cancel(enrollment_id, staff).await.unwrap_err();
    assert!(matches!(again, AdmissionError::NotFound(_)));

    let stored = h.store.get_enrollment(enrollment_id).await.unwrap().unwrap();
    assert!(stored.cancelled_at.is_some());
}

#[tokio::test]
async fn test_unpublished_activities_and_unknown_users_are_rejected() {
    let h = Harness::new();
    let user = h.user("Ada");
    let last_seat = h.activity("Masterclass", None, Some(1));
    let hidden = h.unpublished_activity("Rehearsal");

    let err = h
        .state
        .scheduler
        .admit_batch(user, &[last_seat, hidden])
        .await
        .unwrap_err();
    match err {
        AdmissionError::InvalidRequest(msg) => assert!(msg.contains(&hidden.to_string())),
        other => panic!("expected InvalidRequest, got {other:?}"),
    }

    let stranger = Uuid::new_v4();
    let err = h
        .state
        .scheduler
        .admit_batch(stranger, &[last_seat])
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::InvalidRequest(_)));
    assert!(h.store.live_enrollments_for_activity(last_seat).is_empty());

    let receipt = h.state.scheduler.admit_batch(user, &[last_seat]).await.unwrap();
    assert_eq!(receipt.seats[0].seat_number, 1);
}

#[tokio::test]
async fn test_enrollment_timestamps_follow_the_engine_clock() {
    let h = Harness::new();
    let user = h.user("Ada");
    let a = h.activity("Keynote", None, None);
    h.clock.advance(Duration::minutes(42));

    let receipt = h.state.scheduler.admit_batch(user, &[a]).await.unwrap();
    let stored = h
        .store
        .get_enrollment(receipt.seats[0].enrollment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.created_at, h.clock.now());
}

/// Ticket backend that refuses to store tickets for one activity.
struct RefusingTickets {
    inner: Arc<MemoryStore>,
    refused: Uuid,
}

impl RefusingTickets {
    fn check(&self, record: &TicketRecord) -> StoreResult<()> {
        if record.activity_id == self.refused {
            Err(StoreError::Unavailable("ticket table offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TicketStore for RefusingTickets {
    async fn insert_ticket(&self, record: &TicketRecord) -> StoreResult<()> {
        self.check(record)?;
        self.inner.insert_ticket(record).await
    }

    async fn find_ticket(&self, ticket_id: &str) -> StoreResult<Option<TicketRecord>> {
        self.inner.find_ticket(ticket_id).await
    }

    async fn mark_used(
        &self,
        ticket_id: &str,
        used_at: DateTime<Utc>,
        staff_id: Uuid,
    ) -> StoreResult<MarkUsed> {
        self.inner.mark_used(ticket_id, used_at, staff_id).await
    }

    async fn reissue_ticket(&self, record: &TicketRecord) -> StoreResult<u64> {
        self.check(record)?;
        self.inner.reissue_ticket(record).await
    }
}

#[tokio::test]
async fn test_failed_issuance_leaves_ticket_pending() {
    let h = Harness::new();
    let user = h.user("Ada");
    let issued = h.activity("Keynote", None, None);
    let refused = h.activity("Workshop", None, None);

    let deps = EngineDeps {
        clock: h.clock.clone(),
        ..EngineDeps::default()
    };
    let tickets = Arc::new(
        TicketService::new(
            Arc::new(RefusingTickets {
                inner: Arc::clone(&h.store),
                refused,
            }),
            h.store.clone(),
            h.store.clone(),
            h.store.clone(),
            &ticket_config(ReissuePolicy::AllowMany),
            Arc::clone(&deps.clock),
            Arc::clone(&deps.observer),
        )
        .unwrap(),
    );
    let scheduler = EnrollmentScheduler::new(
        h.store.clone(),
        h.store.clone(),
        h.store.clone(),
        Arc::clone(&tickets),
        deps.notifier,
        deps.observer,
        deps.clock,
        AdmissionConfig::default().max_attempts,
    );

    let receipt = scheduler.admit_batch(user, &[issued, refused]).await.unwrap();
    assert!(receipt.is_partial());
    assert_eq!(receipt.pending_tickets(), vec![refused]);

    let with_ticket = receipt
        .seats
        .iter()
        .find(|s| s.activity_id == issued)
        .unwrap();
    let stored = h
        .store
        .find_live_enrollment(user, issued)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.ticket_id.as_deref(),
        with_ticket.ticket.as_ref().map(|t| t.ticket_id.as_str())
    );

    // The committed seat stays and can be ticketed later.
    let pending = h
        .store
        .find_live_enrollment(user, refused)
        .await
        .unwrap()
        .unwrap();
    assert!(pending.ticket_id.is_none());
    assert!(h.state.tickets.issue(user, refused).await.is_ok());
}
