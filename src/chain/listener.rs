//! Block listener with HTTP polling

use super::ChainApi;
use crate::events::BlockEvent;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Polls the indexer and emits one event per observed height increase
pub struct BlockListener {
    api: Arc<dyn ChainApi>,
    poll_interval: Duration,
    trigger_tx: mpsc::Sender<BlockEvent>,
    last_height: RwLock<u64>,
    shutdown: Arc<RwLock<bool>>,
}

impl BlockListener {
    /// `trigger_tx` should have capacity 1 so bursts of blocks coalesce into one run
    pub fn new(
        api: Arc<dyn ChainApi>,
        poll_interval: Duration,
        trigger_tx: mpsc::Sender<BlockEvent>,
    ) -> Self {
        Self {
            api,
            poll_interval,
            trigger_tx,
            last_height: RwLock::new(0),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main listening loop
    pub async fn listen(&self) {
        info!("Block listener started, polling every {:?}", self.poll_interval);

        loop {
            if *self.shutdown.read().await {
                break;
            }

            if !self.poll_once().await {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        info!("Block listener stopped");
    }

    /// Returns false once the executor side of the channel is gone
    async fn poll_once(&self) -> bool {
        let block = match self.api.latest_block().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to get latest block: {}", e);
                return true;
            }
        };

        let mut last = self.last_height.write().await;
        if block.height <= *last {
            return true;
        }
        *last = block.height;
        drop(last);

        debug!("New block {}", block.label());
        crate::metrics::record_block_seen(block.height);

        match self.trigger_tx.try_send(block) {
            Ok(()) => true,
            Err(TrySendError::Full(block)) => {
                debug!("Executor busy, coalescing block {}", block.label());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the listener after the current poll
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainApi;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn block(height: u64) -> BlockEvent {
        BlockEvent {
            height,
            hash: format!("0x{:064x}", height),
            burn_block_height: 0,
        }
    }

    #[tokio::test]
    async fn test_emits_only_on_new_height() {
        let heights = Arc::new(AtomicU64::new(0));
        let script = [100u64, 100, 101, 101, 103];
        let counter = heights.clone();

        let mut api = MockChainApi::new();
        api.expect_latest_block().returning(move || {
            let idx = counter.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(block(script[idx.min(script.len() - 1)]))
        });

        let (tx, mut rx) = mpsc::channel(8);
        let listener = BlockListener::new(Arc::new(api), Duration::from_millis(1), tx);

        for _ in 0..5 {
            assert!(listener.poll_once().await);
        }

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.height);
        }
        assert_eq!(seen, vec![100, 101, 103]);
    }

    #[tokio::test]
    async fn test_busy_executor_coalesces_blocks() {
        let heights = Arc::new(AtomicU64::new(200));
        let counter = heights.clone();

        let mut api = MockChainApi::new();
        api.expect_latest_block()
            .returning(move || Ok(block(counter.fetch_add(1, Ordering::SeqCst))));

        let (tx, mut rx) = mpsc::channel(1);
        let listener = BlockListener::new(Arc::new(api), Duration::from_millis(1), tx);

        for _ in 0..3 {
            assert!(listener.poll_once().await);
        }

        assert_eq!(rx.try_recv().unwrap().height, 200);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_probe_failure_keeps_listening() {
        let mut api = MockChainApi::new();
        api.expect_latest_block()
            .returning(|| Err(crate::error::AirdropError::transient("block probe", "timeout")));

        let (tx, mut rx) = mpsc::channel(1);
        let listener = BlockListener::new(Arc::new(api), Duration::from_millis(1), tx);

        assert!(listener.poll_once().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_stops_listener() {
        let mut api = MockChainApi::new();
        api.expect_latest_block().returning(|| Ok(block(1)));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let listener = BlockListener::new(Arc::new(api), Duration::from_millis(1), tx);

        assert!(!listener.poll_once().await);
    }
}
