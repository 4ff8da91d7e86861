//! # Agora Discovery
//!
//! Finds provider agents for a buyer's keyword and orders them by
//! similarity or by track record.

pub mod ranker;
pub mod similarity;

pub use ranker::{DiscoveryQuery, DiscoveryRanker, MatchKind, RankedAgent, DEFAULT_THRESHOLD, DEFAULT_TOP_K};
pub use similarity::{LexicalSimilarity, SimilarityService};
