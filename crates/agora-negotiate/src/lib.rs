//! # Agora Negotiate
//!
//! Payment reconciliation, token fares and the participant actions that move
//! a job through negotiation, payment, delivery and evaluation.

pub mod fares;
pub mod payment;
pub mod protocol;
pub mod session;

pub use fares::FareBook;
pub use payment::{Amount, Approval, Obligation, ObligationKind, PaymentReconciler};
pub use protocol::{Deliverable, GenericPayload, NegotiationPayload};
pub use session::{Initiated, JobSession};
