//! Side-channel hooks for admission and ticket outcomes.
//!
//! The engine reports through [`EngineObserver`] and never depends on what
//! the observer does with it.

use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::models::TicketFormat;

use super::tickets::Rejection;

pub trait EngineObserver: Send + Sync {
    /// `outcome` is `admitted`, `partial` or the rejection label.
    fn admission(&self, _outcome: &'static str) {}

    fn ticket_issued(&self) {}

    fn ticket_rejected(&self, _reason: Rejection) {}

    fn redemption(&self, _format: TicketFormat, _already_processed: bool) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

/// Registers descriptions for every counter [`MetricsObserver`] records.
pub fn register_metrics() {
    describe_counter!(
        "enrollment_admissions_total",
        "Admission attempts by outcome (admitted, partial or the rejection label)"
    );
    describe_counter!("tickets_issued_total", "Signed tickets issued");
    describe_counter!(
        "ticket_redemptions_total",
        "Successful redemptions by ticket format and outcome"
    );
    describe_counter!(
        "ticket_rejections_total",
        "Rejected ticket presentations by reason"
    );
}

/// Installs the global Prometheus recorder and registers the engine's
/// counters. Call once at startup.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// Publishes counters through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl EngineObserver for MetricsObserver {
    fn admission(&self, outcome: &'static str) {
        metrics::counter!("enrollment_admissions_total", "outcome" => outcome).increment(1);
    }

    fn ticket_issued(&self) {
        metrics::counter!("tickets_issued_total").increment(1);
    }

    fn ticket_rejected(&self, reason: Rejection) {
        metrics::counter!("ticket_rejections_total", "reason" => reason.as_str()).increment(1);
    }

    fn redemption(&self, format: TicketFormat, already_processed: bool) {
        let format = match format {
            TicketFormat::Signed => "signed",
            TicketFormat::Legacy => "legacy",
        };
        let outcome = if already_processed {
            "already_processed"
        } else {
            "redeemed"
        };
        metrics::counter!("ticket_redemptions_total", "format" => format, "outcome" => outcome)
            .increment(1);
    }
}
