//! # Agora State
//!
//! Job state: the append-only memo ledger, the phase state machine and
//! phase-change subscriptions.

pub mod job;
pub mod ledger;
pub mod machine;
pub mod replay;
pub mod sandbox;
pub mod subscription;

pub use job::{Job, JobSpec, Parties, PhaseChange};
pub use ledger::MemoLedger;
pub use machine::{EvaluationHook, JobStateMachine};
pub use replay::{replay, Replay};
pub use sandbox::SandboxLedger;
pub use subscription::{PhaseChangeEvent, PhaseFilter, PhaseSubscription, PhaseWatch};
