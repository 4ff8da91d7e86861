//! Wire records exchanged with the registry and push channel.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::fare::FareAmount;
use crate::memo::Memo;
use crate::types::{Address, JobId, JobPhase};

/// A job as stored by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    #[serde(rename = "clientAddress")]
    pub client: Address,
    #[serde(rename = "providerAddress")]
    pub provider: Address,
    #[serde(rename = "evaluatorAddress", default)]
    pub evaluator: Option<Address>,
    pub price: Decimal,
    #[serde(rename = "priceTokenAddress")]
    pub price_token: Address,
    pub phase: JobPhase,
    #[serde(default)]
    pub memos: Vec<Memo>,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "expiredAt", default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// The evaluator, treating the zero address as "none".
    pub fn evaluator(&self) -> Option<&Address> {
        self.evaluator.as_ref().filter(|a| !a.is_zero())
    }
}

/// Parameters for opening a new job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub provider: Address,
    #[serde(default)]
    pub evaluator: Option<Address>,
    /// Human price, kept for the local job record.
    pub price: Decimal,
    /// Price in base units of the payment token.
    pub fare_amount: FareAmount,
    /// Content of the memo that opens negotiation.
    pub requirement: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

/// Kind of push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventKind {
    #[serde(rename = "onNewTask")]
    NewTask,
    #[serde(rename = "onEvaluate")]
    Evaluate,
}

/// A push notification carrying the latest job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub event: JobEventKind,
    pub job: JobRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_push_event() {
        let json = r#"{
            "event": "onEvaluate",
            "job": {
                "id": 9,
                "clientAddress": "0xC",
                "providerAddress": "0xP",
                "evaluatorAddress": "0x0000000000000000000000000000000000000000",
                "price": "1.5",
                "priceTokenAddress": "0xT",
                "phase": 3,
                "memos": [],
                "expiredAt": "2030-01-01T00:00:00Z"
            }
        }"#;
        let event: JobEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event, JobEventKind::Evaluate);
        assert_eq!(event.job.phase, JobPhase::Evaluation);
        assert_eq!(event.job.client, Address::new("0xc"));
        assert!(event.job.evaluator().is_none());
        assert!(event.job.expires_at.is_some());
    }
}
