pub mod conflict;
pub mod scheduler;

pub use scheduler::{AdmissionError, AdmissionReceipt, AdmittedSeat, EnrollmentScheduler};
