//! The enrollment and attendance-ticketing engine.

pub mod clock;
pub mod enrollment;
pub mod notifier;
pub mod observer;
pub mod tickets;

pub use clock::{Clock, ManualClock, SystemClock};
pub use enrollment::{AdmissionError, AdmissionReceipt, AdmittedSeat, EnrollmentScheduler};
pub use notifier::{ConfirmedSeat, EnrollmentNotifier, LogNotifier, NotifyError};
pub use observer::{
    install_prometheus_recorder, register_metrics, EngineObserver, MetricsObserver, NoopObserver,
};
pub use tickets::{RedeemRequest, Rejection, TicketError, TicketService, ValidatedTicket};
