pub mod codec;
pub mod legacy;
pub mod service;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub use codec::{CodecError, TicketCodec};
pub use legacy::{LegacyTicket, LegacyTicketValidator};
pub use service::{RedeemRequest, TicketService, ValidatedTicket};

/// Why a presented ticket was refused. Only ever logged; callers see a
/// generic message except for [`Rejection::Expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Malformed,
    Signature,
    Expired,
    Unknown,
    Replay,
    Revoked,
    WrongActivity,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Malformed => "malformed",
            Rejection::Signature => "signature",
            Rejection::Expired => "expired",
            Rejection::Unknown => "unknown",
            Rejection::Replay => "replay",
            Rejection::Revoked => "revoked",
            Rejection::WrongActivity => "wrong_activity",
        }
    }
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket rejected: {}", .0.as_str())]
    Rejected(Rejection),

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("activity {0} not found")]
    ActivityNotFound(Uuid),

    #[error("activity {0} is not published")]
    ActivityNotPublished(Uuid),

    #[error("no enrollment for user {user_id} in activity {activity_id}")]
    EnrollmentNotFound { user_id: Uuid, activity_id: Uuid },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("ticket encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
