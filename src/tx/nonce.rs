//! Nonce tracking for the sending account
//!
//! Handles:
//! - Monotonic adoption of the indexer's next-nonce estimate
//! - Nonce gap detection and backfill
//! - Local ratcheting after an accepted broadcast

use super::RetryPolicy;
use crate::chain::{AccountNonces, ChainApi};
use crate::error::AirdropResult;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Nonce view threaded through executor rounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NonceState {
    /// Nonce the next transaction will use
    pub current_nonce: u64,
    /// A lower nonce was skipped and is being refilled
    pub has_gap: bool,
}

/// Queries the indexer and applies the nonce update rules
pub struct NonceTracker {
    api: Arc<dyn ChainApi>,
    retry: RetryPolicy,
}

impl NonceTracker {
    pub fn new(api: Arc<dyn ChainApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Probe the indexer and fold the answer into `current`
    pub async fn refresh(&self, address: &str, current: NonceState) -> AirdropResult<NonceState> {
        let probe = self
            .retry
            .run("nonce probe", || self.api.account_nonces(address))
            .await?;

        let next = Self::apply(current, &probe);
        if next.has_gap {
            warn!(
                "Detected missing nonces {:?}, refilling {}",
                probe.detected_missing_nonces, next.current_nonce
            );
        }
        debug!(
            "Nonce for {}: {} -> {} (indexer next {})",
            address, current.current_nonce, next.current_nonce, probe.possible_next_nonce
        );
        crate::metrics::record_nonce(next.current_nonce, next.has_gap);
        Ok(next)
    }

    /// Update rule.
    ///
    /// The reported next nonce is adopted only when it is strictly greater than
    /// the held one, so a stale read never moves the nonce backwards. A reported
    /// gap below the (updated) held nonce takes precedence: the lowest such gap
    /// is used and `has_gap` is raised.
    pub fn apply(current: NonceState, probe: &AccountNonces) -> NonceState {
        let mut nonce = current.current_nonce;
        if probe.possible_next_nonce > nonce {
            nonce = probe.possible_next_nonce;
        }

        match probe
            .detected_missing_nonces
            .iter()
            .copied()
            .filter(|missing| *missing < nonce)
            .min()
        {
            Some(lowest) => NonceState {
                current_nonce: lowest,
                has_gap: true,
            },
            None => NonceState {
                current_nonce: nonce,
                has_gap: false,
            },
        }
    }

    /// Account for a transaction the network accepted at `sent`
    pub fn record_broadcast(current: NonceState, sent: u64) -> NonceState {
        NonceState {
            current_nonce: current.current_nonce.max(sent + 1),
            has_gap: current.has_gap,
        }
    }
}
