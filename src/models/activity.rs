use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A scheduled activity as exposed by the catalog.
///
/// `start_time`/`end_time` form the half-open interval `[start, end)`; an
/// activity missing either bound never takes part in overlap checks. A
/// missing `capacity` means unlimited seats.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: Uuid,
    pub title: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub capacity: Option<i32>,
    pub published: bool,
}

impl Activity {
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Whether one more live enrollment would still fit.
    pub fn has_room_for(&self, live_enrollments: i64) -> bool {
        match self.capacity {
            None => true,
            Some(capacity) => live_enrollments + 1 <= i64::from(capacity),
        }
    }
}
