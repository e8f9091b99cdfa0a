//! Mempool backlog probe for the sending account

use super::RetryPolicy;
use crate::chain::ChainApi;
use crate::error::AirdropResult;

use std::sync::Arc;
use tracing::debug;

/// Reports how many of the sender's transactions are still unconfirmed
pub struct PendingTxMonitor {
    api: Arc<dyn ChainApi>,
    retry: RetryPolicy,
}

impl PendingTxMonitor {
    pub fn new(api: Arc<dyn ChainApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Latest pending count. A failed probe is an error, never a zero.
    pub async fn refresh(&self, address: &str) -> AirdropResult<u64> {
        let count = self
            .retry
            .run("mempool probe", || self.api.mempool_tx_count(address))
            .await?;

        debug!("{} pending transactions for {}", count, address);
        crate::metrics::record_pending_txs(count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainApi;
    use crate::error::AirdropError;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_reports_indexer_total() {
        let mut api = MockChainApi::new();
        api.expect_mempool_tx_count().times(1).returning(|_| Ok(4));

        let monitor = PendingTxMonitor::new(Arc::new(api), fast_retry());
        assert_eq!(monitor.refresh("SP1SENDER").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failure_is_surfaced_not_zero() {
        let mut api = MockChainApi::new();
        api.expect_mempool_tx_count()
            .times(2)
            .returning(|_| Err(AirdropError::transient("mempool probe", "503")));

        let monitor = PendingTxMonitor::new(Arc::new(api), fast_retry());
        let err = monitor.refresh("SP1SENDER").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
