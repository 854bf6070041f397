//! Time-overlap checks over half-open `[start, end)` intervals.

use uuid::Uuid;

use crate::models::Activity;

/// `[a_start, a_end)` and `[b_start, b_end)` share at least one instant.
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Activities without both bounds never conflict.
pub fn activities_overlap(a: &Activity, b: &Activity) -> bool {
    match (a.window(), b.window()) {
        (Some((a_start, a_end)), Some((b_start, b_end))) => {
            intervals_overlap(a_start, a_end, b_start, b_end)
        }
        _ => false,
    }
}

/// First overlapping pair inside one batch, in batch order.
pub fn first_pairwise_conflict(batch: &[Activity]) -> Option<(Uuid, Uuid)> {
    batch.iter().enumerate().find_map(|(i, a)| {
        batch[i + 1..]
            .iter()
            .find(|b| activities_overlap(a, b))
            .map(|b| (a.id, b.id))
    })
}

/// First requested activity overlapping one the user already holds.
pub fn first_conflict_with(requested: &[Activity], held: &[Activity]) -> Option<(Uuid, Uuid)> {
    requested.iter().find_map(|r| {
        held.iter()
            .find(|h| activities_overlap(r, h))
            .map(|h| (r.id, h.id))
    })
}
