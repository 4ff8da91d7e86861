//! Agents and the offerings they sell.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AgoraError, Result};
use crate::fare::{Fare, FareAmount};
use crate::record::JobRequest;
use crate::types::Address;

/// Snapshot of a registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Wallet the agent signs memos with.
    #[serde(rename = "walletAddress")]
    pub wallet: Address,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default, rename = "jobs")]
    pub offerings: Vec<Offering>,
    #[serde(default)]
    pub metrics: AgentMetrics,
}

/// Activity counters reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentMetrics {
    pub is_online: bool,
    pub successful_job_count: u64,
    pub rejected_job_count: u64,
    pub unique_buyer_count: u64,
    pub last_online: Option<DateTime<Utc>>,
}

impl AgentMetrics {
    /// Successful jobs as a fraction of finished jobs; 0 with no history.
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_job_count + self.rejected_job_count;
        if finished == 0 {
            0.0
        } else {
            self.successful_job_count as f64 / finished as f64
        }
    }
}

impl Agent {
    /// Text the semantic matcher compares a keyword against.
    pub fn search_corpus(&self) -> String {
        let mut corpus = format!("{} {}", self.name, self.description);
        for offering in &self.offerings {
            corpus.push(' ');
            corpus.push_str(&offering.name);
        }
        corpus
    }

    /// Look up an offering by name.
    pub fn offering(&self, name: &str) -> Option<&Offering> {
        self.offerings.iter().find(|o| o.name == name)
    }
}

/// How an offering's price is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    /// Fixed amount in the base fare.
    #[default]
    Fixed,
    /// Share of a transferred amount; the job itself carries no price.
    Percentage,
}

/// A service an agent sells, used as the template for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offering {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default = "Address::zero")]
    pub provider: Address,
    pub price: Decimal,
    #[serde(default)]
    pub price_type: PriceType,
    /// JSON schema the buyer's requirement must satisfy.
    #[serde(default)]
    pub requirement: Option<serde_json::Value>,
    /// JSON schema describing the deliverable.
    #[serde(default)]
    pub deliverable: Option<serde_json::Value>,
}

impl Offering {
    /// Check a requirement against the schema's `required` keys.
    pub fn validate_requirement(&self, requirement: &serde_json::Value) -> Result<()> {
        let Some(schema) = self.requirement.as_ref().and_then(|s| s.as_object()) else {
            return Ok(());
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|keys| keys.iter().filter_map(|k| k.as_str()).collect())
            .unwrap_or_default();

        if schema.get("type").and_then(|t| t.as_str()) == Some("object") || !required.is_empty() {
            let object = requirement.as_object().ok_or_else(|| {
                AgoraError::InvalidRequest(format!(
                    "requirement for '{}' must be a JSON object",
                    self.name
                ))
            })?;
            if let Some(missing) = required.iter().find(|key| !object.contains_key(**key)) {
                return Err(AgoraError::InvalidRequest(format!(
                    "requirement for '{}' is missing '{}'",
                    self.name, missing
                )));
            }
        }
        Ok(())
    }

    /// Build the request that opens a job for this offering.
    pub fn job_request(
        &self,
        requirement: serde_json::Value,
        base_fare: &Fare,
        evaluator: Option<Address>,
        expires_at: DateTime<Utc>,
    ) -> Result<JobRequest> {
        self.validate_requirement(&requirement)?;

        let price = match self.price_type {
            PriceType::Fixed => self.price,
            PriceType::Percentage => Decimal::ZERO,
        };
        let fare_amount = FareAmount::from_human(price, base_fare.clone())?;

        let content = serde_json::json!({
            "name": self.name,
            "requirement": requirement,
            "priceValue": self.price,
            "priceType": self.price_type,
        });

        Ok(JobRequest {
            provider: self.provider.clone(),
            evaluator,
            price,
            fare_amount,
            requirement: content,
            expires_at,
        })
    }
}

/// Metric keys for manual ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentSortKey {
    SuccessfulJobCount,
    SuccessRate,
    UniqueBuyerCount,
    #[serde(rename = "minsFromLastOnlineTime")]
    MinsFromLastOnline,
    IsOnline,
}
