//! Batch transaction builder and broadcaster with transport retry

use super::signer::{ContractCall, SignedTransaction, TransactionSigner};
use super::RetryPolicy;
use crate::chain::{BroadcastResult, ChainApi};
use crate::error::{AirdropError, AirdropResult};
use crate::executor::BatchPlan;

use std::sync::Arc;
use tracing::{info, warn};

/// Contract the airdrop calls are addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTarget {
    pub address: String,
    pub name: String,
    pub function: String,
}

/// Builds signed airdrop calls and submits them
pub struct TransactionBroadcaster {
    api: Arc<dyn ChainApi>,
    signer: Arc<dyn TransactionSigner>,
    retry: RetryPolicy,
    target: ContractTarget,
}

impl TransactionBroadcaster {
    pub fn new(
        api: Arc<dyn ChainApi>,
        signer: Arc<dyn TransactionSigner>,
        retry: RetryPolicy,
        target: ContractTarget,
    ) -> Self {
        Self {
            api,
            signer,
            retry,
            target,
        }
    }

    pub fn target(&self) -> &ContractTarget {
        &self.target
    }

    /// Contract call carrying the plan's three recipient lists
    pub fn contract_call(&self, plan: &BatchPlan) -> ContractCall {
        ContractCall {
            contract_address: self.target.address.clone(),
            contract_name: self.target.name.clone(),
            function_name: self.target.function.clone(),
            recipient_lists: plan.sub_lists.clone(),
        }
    }

    /// Sign the plan at `nonce`
    pub async fn build(
        &self,
        plan: &BatchPlan,
        nonce: u64,
        fee: u64,
    ) -> AirdropResult<SignedTransaction> {
        let call = self.contract_call(plan);
        self.retry
            .run("sign", || self.signer.sign(&call, nonce, fee))
            .await
    }

    /// Submit `tx`, resending the same payload on transport failures.
    ///
    /// A protocol rejection comes back as `Ok` with `error` set and is never
    /// resent here. Running out of attempts is a `Submission` error.
    pub async fn broadcast(&self, tx: &SignedTransaction) -> AirdropResult<BroadcastResult> {
        info!(
            "Sending transaction: nonce {}, fee {}, {} recipients",
            tx.nonce, tx.fee, tx.recipients
        );

        match self.retry.run("broadcast", || self.api.broadcast(tx)).await {
            Ok(result) => {
                if result.is_rejected() {
                    warn!(
                        "Transaction at nonce {} rejected: {}",
                        tx.nonce,
                        result.rejection_reason()
                    );
                    crate::metrics::record_rejection(result.rejection_reason());
                } else {
                    info!("TXID: {}", result.txid);
                    crate::metrics::record_broadcast(tx.recipients);
                }
                Ok(result)
            }
            Err(e) if e.is_retryable() => Err(AirdropError::Submission {
                attempts: self.retry.max_attempts(),
                message: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainApi;
    use crate::executor::BatchPlanner;
    use crate::state::Recipient;
    use crate::tx::signer::MockTransactionSigner;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn target() -> ContractTarget {
        ContractTarget {
            address: "SP1DEPLOYER".to_string(),
            name: "nft".to_string(),
            function: "airdrop".to_string(),
        }
    }

    fn plan() -> BatchPlan {
        let pending: VecDeque<_> = ["SP1", "SP2", "SP3"]
            .iter()
            .map(|s| Recipient::new(s).unwrap())
            .collect();
        BatchPlanner::new([2, 2, 2]).plan(pending, 3)
    }

    fn signed(nonce: u64) -> SignedTransaction {
        SignedTransaction {
            payload: vec![0x80, 0x00],
            nonce,
            fee: 500,
            recipients: 3,
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_build_passes_lists_nonce_and_fee_to_signer() {
        let mut signer = MockTransactionSigner::new();
        signer
            .expect_sign()
            .withf(|call, nonce, fee| {
                call.contract_id() == "SP1DEPLOYER.nft"
                    && call.function_name == "airdrop"
                    && call.recipient_lists[0].len() == 2
                    && call.recipient_lists[1].len() == 1
                    && call.recipient_lists[2].is_empty()
                    && *nonce == 42
                    && *fee == 500
            })
            .times(1)
            .returning(|_, nonce, _| Ok(signed(nonce)));

        let broadcaster = TransactionBroadcaster::new(
            Arc::new(MockChainApi::new()),
            Arc::new(signer),
            fast_retry(1),
            target(),
        );

        let tx = broadcaster.build(&plan(), 42, 500).await.unwrap();
        assert_eq!(tx.nonce, 42);
    }

    #[tokio::test]
    async fn test_transport_failure_resends_same_payload() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut api = MockChainApi::new();
        api.expect_broadcast().returning(move |tx| {
            assert_eq!(tx.payload, vec![0x80, 0x00]);
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AirdropError::transient("broadcast", "connection refused"))
            } else {
                Ok(BroadcastResult::accepted("0xfeed"))
            }
        });

        let broadcaster = TransactionBroadcaster::new(
            Arc::new(api),
            Arc::new(MockTransactionSigner::new()),
            fast_retry(5),
            target(),
        );

        let result = broadcaster.broadcast(&signed(1)).await.unwrap();
        assert_eq!(result.txid, "0xfeed");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_submission_error() {
        let mut api = MockChainApi::new();
        api.expect_broadcast()
            .times(3)
            .returning(|_| Err(AirdropError::transient("broadcast", "timeout")));

        let broadcaster = TransactionBroadcaster::new(
            Arc::new(api),
            Arc::new(MockTransactionSigner::new()),
            fast_retry(3),
            target(),
        );

        let err = broadcaster.broadcast(&signed(1)).await.unwrap_err();
        assert!(matches!(err, AirdropError::Submission { attempts: 3, .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_rejection_is_returned_without_resend() {
        let mut api = MockChainApi::new();
        api.expect_broadcast().times(1).returning(|_| {
            Ok(BroadcastResult {
                txid: "0xbad".to_string(),
                error: Some("transaction rejected".to_string()),
                reason: Some("FeeTooLow".to_string()),
            })
        });

        let broadcaster = TransactionBroadcaster::new(
            Arc::new(api),
            Arc::new(MockTransactionSigner::new()),
            fast_retry(5),
            target(),
        );

        let result = broadcaster.broadcast(&signed(1)).await.unwrap();
        assert!(result.is_rejected());
        assert_eq!(result.rejection_reason(), "FeeTooLow");
    }
}
