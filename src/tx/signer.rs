//! Transaction signing through an external signing service
//!
//! Key derivation stays with the service; the executor only holds a key
//! reference (the account index) and an API credential.

use crate::config::{SignerConfig, SUB_LIST_COUNT};
use crate::error::{AirdropError, AirdropResult};
use crate::state::Recipient;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Fully specified airdrop contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractCall {
    pub contract_address: String,
    pub contract_name: String,
    pub function_name: String,
    /// One list argument per contract parameter, in order
    pub recipient_lists: [Vec<Recipient>; SUB_LIST_COUNT],
}

impl ContractCall {
    pub fn contract_id(&self) -> String {
        format!("{}.{}", self.contract_address, self.contract_name)
    }

    pub fn recipient_count(&self) -> usize {
        self.recipient_lists.iter().map(Vec::len).sum()
    }
}

/// Serialized, signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub payload: Vec<u8>,
    pub nonce: u64,
    pub fee: u64,
    pub recipients: usize,
}

/// Signing collaborator. Must be deterministic for identical inputs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, call: &ContractCall, nonce: u64, fee: u64)
        -> AirdropResult<SignedTransaction>;
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    account_index: u32,
    contract_address: &'a str,
    contract_name: &'a str,
    function_name: &'a str,
    function_args: &'a [Vec<Recipient>; SUB_LIST_COUNT],
    fee: u64,
    nonce: u64,
    post_condition_mode: &'static str,
    anchor_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    tx_hex: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    address: String,
}

/// HTTP client for the signing service
pub struct RemoteSigner {
    client: Client,
    url: String,
    api_key: String,
    account_index: u32,
    address: String,
}

impl RemoteSigner {
    /// Connect and resolve the sender address of `account_index`
    pub async fn connect(
        config: &SignerConfig,
        account_index: u32,
        timeout: Duration,
    ) -> AirdropResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AirdropError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let url = config.url.trim_end_matches('/').to_string();

        let response = client
            .get(format!("{}/accounts/{}", url, account_index))
            .bearer_auth(&config.api_key)
            .send()
            .await
            .map_err(|e| AirdropError::transient("signer account lookup", e))?;

        if response.status().is_client_error() {
            return Err(AirdropError::Signing(format!(
                "signer refused account {}: HTTP {}",
                account_index,
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(AirdropError::transient(
                "signer account lookup",
                format!("HTTP {}", response.status()),
            ));
        }

        let account: AccountResponse = response
            .json()
            .await
            .map_err(|e| AirdropError::Signing(format!("invalid account response: {}", e)))?;

        info!("Signer resolved account {} to {}", account_index, account.address);

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            account_index,
            address: account.address,
        })
    }

    /// Sender address derived by the signing service
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    async fn sign(
        &self,
        call: &ContractCall,
        nonce: u64,
        fee: u64,
    ) -> AirdropResult<SignedTransaction> {
        let request = SignRequest {
            account_index: self.account_index,
            contract_address: &call.contract_address,
            contract_name: &call.contract_name,
            function_name: &call.function_name,
            function_args: &call.recipient_lists,
            fee,
            nonce,
            post_condition_mode: "deny",
            anchor_mode: "any",
        };

        let response = self
            .client
            .post(format!("{}/sign", self.url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AirdropError::transient("sign", e))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AirdropError::Signing(format!("HTTP {}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(AirdropError::transient("sign", format!("HTTP {}", status)));
        }

        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| AirdropError::Signing(format!("invalid sign response: {}", e)))?;

        let payload = decode_payload(&signed.tx_hex)?;
        debug!(
            "Signed {} for {} recipients, nonce {}, {} bytes",
            call.contract_id(),
            call.recipient_count(),
            nonce,
            payload.len()
        );

        Ok(SignedTransaction {
            payload,
            nonce,
            fee,
            recipients: call.recipient_count(),
        })
    }
}

fn decode_payload(tx_hex: &str) -> AirdropResult<Vec<u8>> {
    let trimmed = tx_hex.trim().trim_start_matches("0x");
    hex::decode(trimmed).map_err(|e| AirdropError::Signing(format!("payload is not hex: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ContractCall {
        let r = |s: &str| Recipient::new(s).unwrap();
        ContractCall {
            contract_address: "SP1DEPLOYER".to_string(),
            contract_name: "nft".to_string(),
            function_name: "airdrop".to_string(),
            recipient_lists: [vec![r("SP1"), r("SP2")], vec![r("SP3")], vec![]],
        }
    }

    #[test]
    fn test_contract_call_shape() {
        let call = call();
        assert_eq!(call.contract_id(), "SP1DEPLOYER.nft");
        assert_eq!(call.recipient_count(), 3);
    }

    #[test]
    fn test_sign_request_serializes_lists_as_strings() {
        let call = call();
        let request = SignRequest {
            account_index: 2,
            contract_address: &call.contract_address,
            contract_name: &call.contract_name,
            function_name: &call.function_name,
            function_args: &call.recipient_lists,
            fee: 500000,
            nonce: 7,
            post_condition_mode: "deny",
            anchor_mode: "any",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["function_args"],
            serde_json::json!([["SP1", "SP2"], ["SP3"], []])
        );
        assert_eq!(json["nonce"], 7);
        assert_eq!(json["account_index"], 2);
    }

    #[test]
    fn test_decode_payload_accepts_prefixed_hex() {
        assert_eq!(decode_payload("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(decode_payload("ff\n").unwrap(), vec![0xff]);
        assert!(matches!(
            decode_payload("zz"),
            Err(AirdropError::Signing(_))
        ));
    }
}
