//! Deprecated unsigned tickets of the form `PREFIX-{user uuid}-{unix seconds}`.
//!
//! Nothing here is signed or stored; a legacy ticket is only trusted for
//! `max_age` after its timestamp, and replays are absorbed by the
//! enrollment's own `attended` flag. New tickets are never issued in this
//! format.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::config::LegacyTicketConfig;

/// Tolerated clock drift for timestamps slightly ahead of the server.
const MAX_FUTURE_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTicket {
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LegacyError {
    #[error("not a legacy ticket")]
    Format,

    #[error("legacy ticket is older than the accepted age")]
    TooOld,

    #[error("legacy ticket timestamp is in the future")]
    FromFuture,
}

#[derive(Debug, Clone)]
pub struct LegacyTicketValidator {
    pattern: Regex,
    max_age: Duration,
}

impl LegacyTicketValidator {
    pub fn new(config: &LegacyTicketConfig) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"^{}-([0-9a-fA-F]{{8}}-[0-9a-fA-F]{{4}}-[0-9a-fA-F]{{4}}-[0-9a-fA-F]{{4}}-[0-9a-fA-F]{{12}})-([0-9]{{1,12}})$",
            regex::escape(&config.prefix)
        ))?;
        Ok(Self {
            pattern,
            max_age: config.max_age,
        })
    }

    pub fn parse(&self, token: &str, now: DateTime<Utc>) -> Result<LegacyTicket, LegacyError> {
        let captures = self.pattern.captures(token).ok_or(LegacyError::Format)?;
        let user_id = Uuid::parse_str(&captures[1]).map_err(|_| LegacyError::Format)?;
        let seconds: i64 = captures[2].parse().map_err(|_| LegacyError::Format)?;
        let issued_at = DateTime::from_timestamp(seconds, 0).ok_or(LegacyError::Format)?;

        if issued_at > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(LegacyError::FromFuture);
        }
        if now - issued_at > self.max_age {
            return Err(LegacyError::TooOld);
        }

        Ok(LegacyTicket { user_id, issued_at })
    }
}
