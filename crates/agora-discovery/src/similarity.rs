//! Similarity scoring between a search keyword and an agent's text.

use std::collections::HashSet;

use agora_core::Result;
use async_trait::async_trait;

/// Scores how well `corpus` matches `keyword`, in `[0, 1]`.
#[async_trait]
pub trait SimilarityService: Send + Sync {
    async fn similarity(&self, keyword: &str, corpus: &str) -> Result<f64>;
}

/// Token-overlap similarity that needs no embedding backend.
///
/// The score is the share of keyword tokens that also occur in the corpus.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSimilarity;

impl LexicalSimilarity {
    pub fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

#[async_trait]
impl SimilarityService for LexicalSimilarity {
    async fn similarity(&self, keyword: &str, corpus: &str) -> Result<f64> {
        let wanted = Self::tokens(keyword);
        if wanted.is_empty() {
            return Ok(0.0);
        }
        let available = Self::tokens(corpus);
        let hits = wanted.iter().filter(|t| available.contains(*t)).count();
        Ok(hits as f64 / wanted.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lexical_scores() {
        let s = LexicalSimilarity::new();
        assert_eq!(s.similarity("weather report", "Daily weather_report for Oslo").await.unwrap(), 1.0);
        assert_eq!(s.similarity("weather forecast", "weather station").await.unwrap(), 0.5);
        assert_eq!(s.similarity("", "anything").await.unwrap(), 0.0);
        assert_eq!(s.similarity("tax", "weather").await.unwrap(), 0.0);
    }
}
