//! Issuance, validation and redemption of attendance tickets.
//!
//! A ticket is persisted before its token leaves this service, so every
//! valid signature points at a stored record. Redemption consumes the record
//! with a single compare-and-set; the caller that loses the race gets the
//! winner's `used_at` back as an already-processed success. Signature checks
//! and JSON parsing happen before any store access and never under a lock.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::RngCore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::codec::{CodecError, TicketCodec};
use super::legacy::{LegacyError, LegacyTicket, LegacyTicketValidator};
use super::{Rejection, TicketError};
use crate::config::{ReissuePolicy, TicketConfig};
use crate::models::{
    IssuedTicket, RedemptionOutcome, TicketClaims, TicketFormat, TicketRecord,
};
use crate::services::clock::Clock;
use crate::services::observer::EngineObserver;
use crate::store::{ActivityCatalog, EnrollmentStore, MarkUsed, TicketStore, UserDirectory};

/// Entropy of a ticket id, in bytes.
const TICKET_ID_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedTicket {
    Signed(TicketClaims),
    Legacy(LegacyTicket),
}

#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub token: String,
    pub staff_id: Uuid,
    /// Activity the scanning station is checking people into, if known.
    pub activity_id: Option<Uuid>,
}

pub struct TicketService {
    tickets: Arc<dyn TicketStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    catalog: Arc<dyn ActivityCatalog>,
    users: Arc<dyn UserDirectory>,
    codec: TicketCodec,
    legacy: Option<LegacyTicketValidator>,
    ttl: Duration,
    reissue_policy: ReissuePolicy,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn EngineObserver>,
}

fn new_ticket_id() -> String {
    let mut bytes = [0u8; TICKET_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn rejected(reason: Rejection) -> TicketError {
    TicketError::Rejected(reason)
}

impl TicketService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        catalog: Arc<dyn ActivityCatalog>,
        users: Arc<dyn UserDirectory>,
        config: &TicketConfig,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn EngineObserver>,
    ) -> Result<Self, regex::Error> {
        let legacy = config
            .legacy
            .as_ref()
            .map(LegacyTicketValidator::new)
            .transpose()?;

        Ok(Self {
            tickets,
            enrollments,
            catalog,
            users,
            codec: TicketCodec::new(config.secret.as_bytes()),
            legacy,
            ttl: config.ttl,
            reissue_policy: config.reissue_policy,
            clock,
            observer,
        })
    }

    /// Issues a signed ticket for an existing enrollment.
    pub async fn issue(
        &self,
        user_id: Uuid,
        activity_id: Uuid,
    ) -> Result<IssuedTicket, TicketError> {
        if !self.users.user_exists(user_id).await? {
            return Err(TicketError::UserNotFound(user_id));
        }

        let activity = self
            .catalog
            .get_activity(activity_id)
            .await?
            .ok_or(TicketError::ActivityNotFound(activity_id))?;
        if !activity.published {
            return Err(TicketError::ActivityNotPublished(activity_id));
        }

        let enrollment = self
            .enrollments
            .find_live_enrollment(user_id, activity_id)
            .await?
            .ok_or(TicketError::EnrollmentNotFound {
                user_id,
                activity_id,
            })?;

        let issued_at = self.clock.now().trunc_subsecs(0);
        let record = TicketRecord {
            ticket_id: new_ticket_id(),
            user_id,
            activity_id,
            issued_at,
            expires_at: issued_at + self.ttl,
            used: false,
            used_at: None,
            used_by: None,
            revoked: false,
        };
        match self.reissue_policy {
            ReissuePolicy::AllowMany => self.tickets.insert_ticket(&record).await?,
            ReissuePolicy::InvalidatePrevious => {
                let revoked = self.tickets.reissue_ticket(&record).await?;
                if revoked > 0 {
                    debug!(%user_id, %activity_id, revoked, "previous tickets revoked on reissue");
                }
            }
        }
        self.enrollments
            .attach_ticket(enrollment.id, &record.ticket_id)
            .await?;

        let claims = TicketClaims {
            sub: user_id.to_string(),
            act: activity_id.to_string(),
            iat: record.issued_at.timestamp(),
            jti: record.ticket_id.clone(),
            exp: record.expires_at.timestamp(),
        };
        let token = self.codec.encode(&claims)?;

        self.observer.ticket_issued();
        info!(%user_id, %activity_id, ticket_id = %record.ticket_id, "ticket issued");

        Ok(IssuedTicket {
            ticket_id: record.ticket_id,
            token,
            expires_at: record.expires_at,
        })
    }

    /// Checks a token without consuming it.
    ///
    /// A used signed ticket is a replay here; only [`TicketService::redeem`]
    /// treats it as already processed.
    pub async fn validate(&self, token: &str) -> Result<ValidatedTicket, TicketError> {
        let token = token.trim();
        let now = self.clock.now();

        let result = match self.check_signed(token, now).await {
            Ok((_, record)) if record.used => Err(rejected(Rejection::Replay)),
            Ok((claims, _)) => Ok(ValidatedTicket::Signed(claims)),
            Err(TicketError::Rejected(Rejection::Malformed)) => self
                .parse_legacy(token, now)
                .map(ValidatedTicket::Legacy),
            Err(e) => Err(e),
        };
        self.observe(result)
    }

    /// Consumes a ticket and marks the enrollment attended.
    pub async fn redeem(&self, request: &RedeemRequest) -> Result<RedemptionOutcome, TicketError> {
        let token = request.token.trim();
        let now = self.clock.now();

        let result = match self.check_signed(token, now).await {
            Ok((claims, record)) => {
                self.redeem_signed(&claims, &record, request, now).await
            }
            Err(TicketError::Rejected(Rejection::Malformed)) if self.legacy.is_some() => {
                self.redeem_legacy(token, request, now).await
            }
            Err(e) => Err(e),
        };

        if let Ok(outcome) = &result {
            self.observer
                .redemption(outcome.format, outcome.already_processed);
        }
        self.observe(result)
    }

    /// Signature, expiry and store checks shared by validate and redeem.
    /// Does not look at `used`.
    async fn check_signed(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(TicketClaims, TicketRecord), TicketError> {
        let claims = self.codec.decode(token).map_err(|e| match e {
            CodecError::Signature => rejected(Rejection::Signature),
            e if e.is_structural() => rejected(Rejection::Malformed),
            e => TicketError::Codec(e),
        })?;

        if now.timestamp() > claims.exp {
            return Err(rejected(Rejection::Expired));
        }

        let record = self
            .tickets
            .find_ticket(&claims.jti)
            .await?
            .ok_or(rejected(Rejection::Unknown))?;

        if record.user_id.to_string() != claims.sub || record.activity_id.to_string() != claims.act
        {
            return Err(rejected(Rejection::Unknown));
        }
        if record.revoked {
            return Err(rejected(Rejection::Revoked));
        }

        Ok((claims, record))
    }

    async fn redeem_signed(
        &self,
        claims: &TicketClaims,
        record: &TicketRecord,
        request: &RedeemRequest,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOutcome, TicketError> {
        let (user_id, activity_id) = (record.user_id, record.activity_id);
        if request.activity_id.is_some_and(|station| station != activity_id) {
            return Err(rejected(Rejection::WrongActivity));
        }

        if record.used {
            return Ok(already_processed(record, TicketFormat::Signed));
        }

        let consumed = match self
            .tickets
            .mark_used(&claims.jti, now, request.staff_id)
            .await?
        {
            MarkUsed::Applied(consumed) => consumed,
            MarkUsed::AlreadyUsed(winner) => {
                debug!(ticket_id = %claims.jti, "lost redemption race");
                return Ok(already_processed(&winner, TicketFormat::Signed));
            }
            MarkUsed::Missing => return Err(rejected(Rejection::Unknown)),
        };

        let Some(enrollment) = self
            .enrollments
            .find_live_enrollment(user_id, activity_id)
            .await?
        else {
            warn!(
                %user_id,
                %activity_id,
                ticket_id = %claims.jti,
                "valid ticket redeemed for a missing enrollment"
            );
            return Err(TicketError::EnrollmentNotFound {
                user_id,
                activity_id,
            });
        };
        self.enrollments.mark_attended(enrollment.id).await?;

        info!(
            %user_id,
            %activity_id,
            staff_id = %request.staff_id,
            ticket_id = %claims.jti,
            "ticket redeemed"
        );
        Ok(RedemptionOutcome {
            success: true,
            message: "Attendance recorded".to_string(),
            already_processed: false,
            processed_at: consumed.used_at,
            user_id,
            activity_id,
            format: TicketFormat::Signed,
        })
    }

    async fn redeem_legacy(
        &self,
        token: &str,
        request: &RedeemRequest,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOutcome, TicketError> {
        let ticket = self.parse_legacy(token, now)?;
        let activity_id = request.activity_id.ok_or_else(|| {
            TicketError::InvalidRequest(
                "legacy tickets can only be redeemed at an activity station".to_string(),
            )
        })?;

        let enrollment = self
            .enrollments
            .find_live_enrollment(ticket.user_id, activity_id)
            .await?
            .ok_or(TicketError::EnrollmentNotFound {
                user_id: ticket.user_id,
                activity_id,
            })?;

        let first = self.enrollments.mark_attended(enrollment.id).await?;
        warn!(
            user_id = %ticket.user_id,
            %activity_id,
            staff_id = %request.staff_id,
            already_processed = !first,
            "legacy ticket accepted"
        );

        Ok(RedemptionOutcome {
            success: true,
            message: if first {
                "Attendance recorded".to_string()
            } else {
                "Attendance was already recorded".to_string()
            },
            already_processed: !first,
            // Legacy redemptions keep no timestamp of the first scan.
            processed_at: first.then_some(now),
            user_id: ticket.user_id,
            activity_id,
            format: TicketFormat::Legacy,
        })
    }

    fn parse_legacy(&self, token: &str, now: DateTime<Utc>) -> Result<LegacyTicket, TicketError> {
        let Some(legacy) = &self.legacy else {
            return Err(rejected(Rejection::Malformed));
        };
        legacy.parse(token, now).map_err(|e| match e {
            LegacyError::TooOld => rejected(Rejection::Expired),
            LegacyError::Format | LegacyError::FromFuture => rejected(Rejection::Malformed),
        })
    }

    fn observe<T>(&self, result: Result<T, TicketError>) -> Result<T, TicketError> {
        if let Err(TicketError::Rejected(reason)) = &result {
            self.observer.ticket_rejected(*reason);
            match reason {
                Rejection::Expired => info!(reason = reason.as_str(), "ticket rejected"),
                _ => warn!(reason = reason.as_str(), "ticket rejected"),
            }
        }
        result
    }
}

fn already_processed(record: &TicketRecord, format: TicketFormat) -> RedemptionOutcome {
    RedemptionOutcome {
        success: true,
        message: "Ticket was already redeemed".to_string(),
        already_processed: true,
        processed_at: record.used_at,
        user_id: record.user_id,
        activity_id: record.activity_id,
        format,
    }
}
