//! Structured memo payloads exchanged during a job.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agora_core::PriceType;

/// Content of the memo that opens negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationPayload {
    /// Offering name.
    #[serde(alias = "serviceName")]
    pub name: String,

    /// Buyer's requirement, free-form or matching the offering schema.
    #[serde(alias = "serviceRequirement", default)]
    pub requirement: serde_json::Value,

    #[serde(default)]
    pub price_value: Option<Decimal>,

    #[serde(default)]
    pub price_type: PriceType,
}

/// A deliverable posted by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    /// Kind of deliverable (e.g. "url", "text", "object").
    #[serde(rename = "type")]
    pub kind: String,

    pub value: serde_json::Value,
}

impl Deliverable {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            kind: "url".to_string(),
            value: serde_json::Value::String(url.into()),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            value: serde_json::Value::String(text.into()),
        }
    }

    pub fn object(value: serde_json::Value) -> Self {
        Self {
            kind: "object".to_string(),
            value,
        }
    }
}

/// Tagged payload with typed data, read back through [`agora_core::Memo::data_as`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericPayload<T> {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: T,
}

impl<T: Serialize> GenericPayload<T> {
    pub fn new(kind: impl Into<String>, data: T) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn to_content(&self) -> agora_core::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{JobPhase, Memo, MemoType};
    use rust_decimal_macros::dec;

    #[test]
    fn test_negotiation_payload_aliases() {
        let legacy = r#"{"serviceName":"weather","serviceRequirement":{"city":"Oslo"}}"#;
        let payload: NegotiationPayload = serde_json::from_str(legacy).unwrap();
        assert_eq!(payload.name, "weather");
        assert_eq!(payload.requirement["city"], "Oslo");

        let current = r#"{"name":"weather","requirement":"x","priceValue":"2.5","priceType":"fixed"}"#;
        let payload: NegotiationPayload = serde_json::from_str(current).unwrap();
        assert_eq!(payload.price_value, Some(dec!(2.5)));
    }

    #[test]
    fn test_generic_payload_through_memo() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Quote {
            amount: u32,
        }

        let content = GenericPayload::new("quote", Quote { amount: 4 }).to_content().unwrap();
        let memo = Memo::new(1, 1, MemoType::Message, JobPhase::Transaction, "0xp", content);
        assert_eq!(memo.payload_type(), Some("quote"));
        assert_eq!(memo.data_as::<Quote>(), Some(Quote { amount: 4 }));
    }

    #[test]
    fn test_deliverable_wire_shape() {
        let json = serde_json::to_value(Deliverable::url("https://example.org/r.pdf")).unwrap();
        assert_eq!(json["type"], "url");
        assert_eq!(json["value"], "https://example.org/r.pdf");
    }
}
