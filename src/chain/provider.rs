//! Stacks indexer client

use super::{AccountNonces, BroadcastResult, ChainApi};
use crate::error::{AirdropError, AirdropResult};
use crate::events::{BlockEvent, BlockPage};
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Deserialize)]
struct MempoolPage {
    total: u64,
}

/// HTTP client for the chain indexing API
pub struct StacksApi {
    client: Client,
    base_url: String,
}

impl StacksApi {
    /// Create a client for the given indexer root URL
    pub fn new(base_url: &str, timeout: Duration) -> AirdropResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AirdropError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> AirdropResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AirdropError::transient(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AirdropError::transient(
                operation,
                format!("HTTP {}: {}", status, body),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AirdropError::transient(operation, format!("invalid response: {}", e)))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.latest_block().await {
            Ok(_) => true,
            Err(e) => {
                error!("Indexer health check failed for {}: {}", self.base_url, e);
                false
            }
        }
    }
}

#[async_trait]
impl ChainApi for StacksApi {
    async fn account_nonces(&self, address: &str) -> AirdropResult<AccountNonces> {
        self.get_json("nonce probe", &format!("/extended/v1/address/{}/nonces", address))
            .await
    }

    async fn mempool_tx_count(&self, address: &str) -> AirdropResult<u64> {
        let page: MempoolPage = self
            .get_json(
                "mempool probe",
                &format!("/extended/v1/tx/mempool?sender_address={}&limit=1", address),
            )
            .await?;
        Ok(page.total)
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> AirdropResult<BroadcastResult> {
        let url = format!("{}/v2/transactions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(tx.payload.clone())
            .send()
            .await
            .map_err(|e| AirdropError::transient("broadcast", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AirdropError::transient("broadcast", e))?;

        parse_broadcast_response(status, &body)
    }

    async fn latest_block(&self) -> AirdropResult<BlockEvent> {
        let page: BlockPage = self.get_json("block probe", "/extended/v1/block?limit=1").await?;
        page.results
            .into_iter()
            .next()
            .ok_or_else(|| AirdropError::transient("block probe", "indexer returned no blocks"))
    }
}

/// Split a broadcast response into acceptance, protocol rejection or transport failure
fn parse_broadcast_response(status: StatusCode, body: &str) -> AirdropResult<BroadcastResult> {
    if status.is_success() {
        let txid = serde_json::from_str::<String>(body)
            .unwrap_or_else(|_| body.trim().trim_matches('"').to_string());
        return Ok(BroadcastResult::accepted(txid));
    }

    if status == StatusCode::BAD_REQUEST {
        let mut result = match serde_json::from_str::<BroadcastResult>(body) {
            Ok(result) => result,
            Err(_) => {
                warn!("Unparseable rejection body: {}", body);
                BroadcastResult {
                    txid: String::new(),
                    error: Some(body.trim().to_string()),
                    reason: None,
                }
            }
        };
        if result.error.is_none() {
            result.error = Some("transaction rejected".to_string());
        }
        return Ok(result);
    }

    Err(AirdropError::transient(
        "broadcast",
        format!("HTTP {}: {}", status, body),
    ))
}
