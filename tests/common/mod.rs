#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use conference_server::config::{AdmissionConfig, LegacyTicketConfig, ReissuePolicy, TicketConfig};
use conference_server::models::{Activity, User};
use conference_server::services::ManualClock;
use conference_server::store::MemoryStore;
use conference_server::{AppState, EngineDeps};
use uuid::Uuid;

pub const SECRET: &str = "an-integration-test-secret-of-at-least-32-bytes";

pub fn conference_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    conference_day() + Duration::hours(hour.into()) + Duration::minutes(minute.into())
}

pub fn ticket_config(policy: ReissuePolicy) -> TicketConfig {
    TicketConfig {
        secret: SECRET.to_string(),
        ttl: Duration::days(7),
        reissue_policy: policy,
        legacy: Some(LegacyTicketConfig {
            prefix: "CONF".to_string(),
            max_age: Duration::days(7),
        }),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(ReissuePolicy::AllowMany)
    }

    pub fn with_policy(policy: ReissuePolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(conference_day() - Duration::days(1)));
        let deps = EngineDeps {
            clock: clock.clone(),
            ..EngineDeps::default()
        };
        let state = AppState::build(
            store.clone(),
            &ticket_config(policy),
            &AdmissionConfig::default(),
            deps,
        )
        .unwrap();
        Self {
            store,
            clock,
            state,
        }
    }

    pub fn user(&self, name: &str) -> Uuid {
        let user = User::new(name, format!("{}@example.com", name.to_lowercase()));
        let id = user.id;
        self.store.add_user(user);
        id
    }

    pub fn activity(
        &self,
        title: &str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        capacity: Option<i32>,
    ) -> Uuid {
        let activity = Activity {
            id: Uuid::new_v4(),
            title: title.to_string(),
            start_time: window.map(|(start, _)| start),
            end_time: window.map(|(_, end)| end),
            capacity,
            published: true,
        };
        let id = activity.id;
        self.store.add_activity(activity);
        id
    }

    pub fn unpublished_activity(&self, title: &str) -> Uuid {
        let activity = Activity {
            id: Uuid::new_v4(),
            title: title.to_string(),
            start_time: None,
            end_time: None,
            capacity: None,
            published: false,
        };
        let id = activity.id;
        self.store.add_activity(activity);
        id
    }
}
