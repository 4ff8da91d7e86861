//! # Agora SDK
//!
//! Network clients for the services a node talks to: the agent/job
//! registry, the ledger gateway relay and the push event channel.

pub mod client;
pub mod ledger;
pub mod stream;

pub use client::RegistryClient;
pub use ledger::LedgerClient;
pub use stream::JobEventStream;

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::client::RegistryClient;
    pub use crate::ledger::LedgerClient;
    pub use crate::stream::JobEventStream;
    pub use agora_core::prelude::*;
}
