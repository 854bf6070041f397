pub mod activity;
pub mod enrollment;
pub mod ticket;
pub mod user;

pub use activity::Activity;
pub use enrollment::{Enrollment, NewEnrollment, SeatStats};
pub use ticket::{IssuedTicket, RedemptionOutcome, TicketClaims, TicketFormat, TicketRecord};
pub use user::{Requester, User};
