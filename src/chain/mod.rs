//! Chain module - read-only probes, broadcast and block notifications
//!
//! This module provides:
//! - The `ChainApi` seam used by the executor for every network call
//! - A Stacks indexer implementation over HTTP
//! - A polling block listener that triggers executor runs

pub mod listener;
pub mod provider;

pub use listener::BlockListener;
pub use provider::StacksApi;

use crate::error::AirdropResult;
use crate::events::BlockEvent;
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use serde::Deserialize;

/// Nonce view of an account as reported by the indexer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountNonces {
    pub possible_next_nonce: u64,
    #[serde(default)]
    pub detected_missing_nonces: Vec<u64>,
    #[serde(default)]
    pub last_executed_tx_nonce: Option<u64>,
    #[serde(default)]
    pub last_mempool_tx_nonce: Option<u64>,
}

/// Outcome of a transport-level successful broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BroadcastResult {
    #[serde(default)]
    pub txid: String,
    pub error: Option<String>,
    pub reason: Option<String>,
}

impl BroadcastResult {
    pub fn accepted(txid: impl Into<String>) -> Self {
        Self {
            txid: txid.into(),
            error: None,
            reason: None,
        }
    }

    /// Network refused the transaction (bad nonce, fee too low, ...)
    pub fn is_rejected(&self) -> bool {
        self.error.is_some()
    }

    /// Human readable rejection cause
    pub fn rejection_reason(&self) -> &str {
        self.reason
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("unknown")
    }
}

/// Network calls made by the executor. All queries are idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainApi: Send + Sync {
    /// Next likely nonce and detected gaps for `address`
    async fn account_nonces(&self, address: &str) -> AirdropResult<AccountNonces>;

    /// Number of unconfirmed transactions sent by `address`
    async fn mempool_tx_count(&self, address: &str) -> AirdropResult<u64>;

    /// Submit a signed transaction
    async fn broadcast(&self, tx: &SignedTransaction) -> AirdropResult<BroadcastResult>;

    /// Most recent block known to the indexer
    async fn latest_block(&self) -> AirdropResult<BlockEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonces_deserialize_indexer_payload() {
        let json = r#"{
            "last_mempool_tx_nonce": 11,
            "last_executed_tx_nonce": 8,
            "possible_next_nonce": 12,
            "detected_missing_nonces": [9],
            "detected_mempool_nonces": [10, 11]
        }"#;
        let nonces: AccountNonces = serde_json::from_str(json).unwrap();
        assert_eq!(nonces.possible_next_nonce, 12);
        assert_eq!(nonces.detected_missing_nonces, vec![9]);
        assert_eq!(nonces.last_executed_tx_nonce, Some(8));
    }

    #[test]
    fn test_rejection_reason_prefers_reason_field() {
        let result = BroadcastResult {
            txid: "0xabc".to_string(),
            error: Some("transaction rejected".to_string()),
            reason: Some("BadNonce".to_string()),
        };
        assert!(result.is_rejected());
        assert_eq!(result.rejection_reason(), "BadNonce");
        assert!(!BroadcastResult::accepted("0xabc").is_rejected());
    }
}
