//! Synthetic and observed transactions.

use crate::behavior::TransactionType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A synthetic transaction produced by the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Sequence number, unique within one synthesizer
    pub id: u64,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Behavior that generated this transaction
    pub behavior: String,
    pub region: String,
    #[serde(rename = "payloadSize")]
    pub payload_bytes: u32,
    /// Inter-arrival offset, only meaningful for ordering within a tick
    pub offset_ms: f64,
}

/// A transaction as seen by the pattern analyzer.
///
/// Every field is optional: the analyzer accepts batches from any source
/// and never assumes they came from this harness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedTransaction {
    #[serde(default, rename = "type", alias = "txType")]
    pub tx_type: Option<String>,
    #[serde(default, rename = "payloadSize", alias = "size", alias = "payloadBytes")]
    pub payload_bytes: Option<f64>,
    #[serde(default, alias = "userBehavior")]
    pub behavior: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl ObservedTransaction {
    /// Leniently reads one record from arbitrary JSON.
    ///
    /// Non-objects and fields of the wrong type become empty observations
    /// rather than errors.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };

        let string = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| object.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };
        let number = |keys: &[&str]| keys.iter().find_map(|k| object.get(*k).and_then(Value::as_f64));

        Self {
            tx_type: string(&["type", "txType"]),
            payload_bytes: number(&["payloadSize", "size", "payloadBytes"]),
            behavior: string(&["behavior", "userBehavior"]),
            region: string(&["region"]),
        }
    }

    /// Parses the type as a known transaction type, if it is one.
    pub fn known_type(&self) -> Option<TransactionType> {
        self.tx_type.as_deref().and_then(|t| t.parse().ok())
    }
}

impl From<&Transaction> for ObservedTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            tx_type: Some(tx.tx_type.name().to_string()),
            payload_bytes: Some(tx.payload_bytes as f64),
            behavior: Some(tx.behavior.clone()),
            region: Some(tx.region.clone()),
        }
    }
}
