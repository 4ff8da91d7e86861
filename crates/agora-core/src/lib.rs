//! # Agora Core
//!
//! Core primitives and types for the Agora commerce protocol.
//!
//! This crate provides the fundamental building blocks:
//! - [`JobPhase`] - Lifecycle phases of a job
//! - [`Memo`] - Signed proposal attached to a job
//! - [`Fare`] - Payment token with base-unit conversion
//! - [`Agent`] / [`Offering`] - Registry snapshots used for discovery
//! - [`LedgerGateway`] / [`RegistryService`] - External collaborators
//! - [`AgoraError`] - Protocol error types

pub mod agent;
pub mod error;
pub mod fare;
pub mod gateway;
pub mod memo;
pub mod record;
pub mod types;

// Re-exports for convenience
pub use agent::{Agent, AgentMetrics, AgentSortKey, Offering, PriceType};
pub use error::{AgoraError, Result};
pub use fare::{Fare, FareAmount};
pub use gateway::{AgentSearch, LedgerGateway, OnlineFilter, RegistryService};
pub use memo::{Memo, PayableDetails, StructuredContent};
pub use record::{JobEvent, JobEventKind, JobRecord, JobRequest};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::agent::{Agent, Offering};
    pub use crate::error::{AgoraError, Result};
    pub use crate::fare::{Fare, FareAmount};
    pub use crate::gateway::{LedgerGateway, RegistryService};
    pub use crate::memo::Memo;
    pub use crate::types::{Address, JobId, JobPhase, MemoId, MemoStatus, MemoType};
}
