//! Airdrop execution loop
//!
//! One `run` probes the account, plans a batch, broadcasts it and commits the
//! queue, repeating until the mempool backlog reaches its cap or the queue is
//! empty. Runs for the same account never overlap.

use super::planner::{BatchPlan, BatchPlanner};
use crate::chain::ChainApi;
use crate::config::ExecutorConfig;
use crate::error::{AirdropError, AirdropResult};
use crate::state::QueueStore;
use crate::tx::{
    ContractTarget, NonceState, NonceTracker, PendingTxMonitor, RetryPolicy,
    TransactionBroadcaster, TransactionSigner,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Position of the execution loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Probing,
    Planning,
    Broadcasting,
    Committing,
    Draining,
    Halted,
}

/// How a `run` invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was in flight
    Skipped,
    /// Backlog cap reached, waiting for the next block
    Halted { broadcasts: u32 },
    /// Every recipient has been committed
    Drained { broadcasts: u32 },
}

impl RunOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            RunOutcome::Skipped => "skipped",
            RunOutcome::Halted { .. } => "halted",
            RunOutcome::Drained { .. } => "drained",
        }
    }
}

/// Snapshot served by the status API
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatus {
    pub address: String,
    pub phase: Phase,
    pub next_nonce: u64,
    pub has_gap: bool,
    pub pending_tx: u64,
    pub max_pending_tx: u64,
    pub queue_remaining: Option<usize>,
    pub committed_this_session: u64,
    pub broadcasts_this_session: u64,
    pub rejections_this_session: u64,
    pub last_txid: Option<String>,
    pub last_round_at: Option<DateTime<Utc>>,
    pub drained: bool,
}

/// State owned by the run lock
#[derive(Debug, Default)]
struct RunState {
    nonce: NonceState,
    pending_tx: u64,
    consecutive_rejections: u32,
    drained: bool,
}

/// Drives batched airdrop transactions for one sending account
pub struct Executor {
    address: String,
    config: ExecutorConfig,
    store: Arc<dyn QueueStore>,
    planner: BatchPlanner,
    nonce_tracker: NonceTracker,
    monitor: PendingTxMonitor,
    broadcaster: TransactionBroadcaster,
    run_state: Mutex<RunState>,
    nonce_override: Mutex<Option<u64>>,
    status: RwLock<ExecutorStatus>,
}

impl Executor {
    /// Create an executor. Invalid limits are a fatal configuration error.
    pub fn new(
        config: ExecutorConfig,
        address: String,
        target: ContractTarget,
        api: Arc<dyn ChainApi>,
        signer: Arc<dyn TransactionSigner>,
        store: Arc<dyn QueueStore>,
    ) -> AirdropResult<Self> {
        config.validate()?;

        let retry = RetryPolicy::from_config(&config.retry);
        let status = ExecutorStatus {
            address: address.clone(),
            phase: Phase::Idle,
            next_nonce: 0,
            has_gap: false,
            pending_tx: 0,
            max_pending_tx: config.max_pending_tx,
            queue_remaining: None,
            committed_this_session: 0,
            broadcasts_this_session: 0,
            rejections_this_session: 0,
            last_txid: None,
            last_round_at: None,
            drained: false,
        };

        Ok(Self {
            planner: BatchPlanner::new(config.sub_list_capacities),
            nonce_tracker: NonceTracker::new(api.clone(), retry.clone()),
            monitor: PendingTxMonitor::new(api.clone(), retry.clone()),
            broadcaster: TransactionBroadcaster::new(api, signer, retry, target),
            nonce_override: Mutex::new(config.nonce_override),
            run_state: Mutex::new(RunState::default()),
            status: RwLock::new(status),
            address,
            config,
            store,
        })
    }

    pub fn target(&self) -> &ContractTarget {
        self.broadcaster.target()
    }

    pub async fn status(&self) -> ExecutorStatus {
        self.status.read().await.clone()
    }

    /// Entry point for block notifications.
    ///
    /// Returns `Skipped` without touching anything if a run is already in
    /// flight, and `Drained` immediately once the queue has been emptied.
    pub async fn run(&self) -> AirdropResult<RunOutcome> {
        let Ok(mut state) = self.run_state.try_lock() else {
            debug!("Run already in flight, ignoring trigger");
            crate::metrics::record_round(RunOutcome::Skipped.name());
            return Ok(RunOutcome::Skipped);
        };

        if state.drained {
            return Ok(RunOutcome::Drained { broadcasts: 0 });
        }

        let result = self.run_rounds(&mut state).await;

        let mut status = self.status.write().await;
        status.last_round_at = Some(Utc::now());
        match &result {
            Ok(outcome) => crate::metrics::record_round(outcome.name()),
            Err(e) => {
                status.phase = Phase::Halted;
                if e.is_fatal() {
                    error!("Executor stopped: {}", e);
                } else {
                    warn!("Round interrupted, waiting for next block: {}", e);
                }
                crate::metrics::record_round("error");
            }
        }

        result
    }

    async fn run_rounds(&self, state: &mut RunState) -> AirdropResult<RunOutcome> {
        // Cleared only once a broadcast at the override nonce has been attempted
        let mut override_nonce = *self.nonce_override.lock().await;
        let mut phase = Phase::Probing;
        let mut plan = BatchPlan::default();
        let mut round_nonce = 0;
        let mut broadcasts = 0;

        loop {
            self.set_phase(phase).await;

            phase = match phase {
                Phase::Idle => Phase::Probing,

                Phase::Probing => {
                    state.pending_tx = self.monitor.refresh(&self.address).await?;
                    round_nonce = match override_nonce {
                        Some(nonce) => {
                            info!("Using nonce override {} for this round", nonce);
                            nonce
                        }
                        None => {
                            state.nonce =
                                self.nonce_tracker.refresh(&self.address, state.nonce).await?;
                            state.nonce.current_nonce
                        }
                    };
                    self.publish_probe(state, round_nonce).await;

                    info!("- Pending TX: {}", state.pending_tx);
                    info!("- Next nonce: {}", round_nonce);

                    let has_capacity = state.pending_tx < self.config.max_pending_tx
                        || state.nonce.has_gap
                        || override_nonce.is_some();
                    if has_capacity {
                        Phase::Planning
                    } else {
                        info!(
                            "{} pending transactions (max {}), waiting for next block",
                            state.pending_tx, self.config.max_pending_tx
                        );
                        Phase::Halted
                    }
                }

                Phase::Planning => {
                    let pending = self.store.load_pending().await?;
                    plan = self.planner.plan(pending, self.config.batch_size);
                    if plan.is_empty() {
                        Phase::Draining
                    } else {
                        let [l1, l2, l3] = plan.sizes();
                        info!("- New batch: L1: {}, L2: {}, L3: {}", l1, l2, l3);
                        crate::metrics::record_batch_planned(plan.len());
                        Phase::Broadcasting
                    }
                }

                Phase::Broadcasting => {
                    let tx = self
                        .broadcaster
                        .build(&plan, round_nonce, self.config.fee)
                        .await?;
                    let sent = self.broadcaster.broadcast(&tx).await;
                    if override_nonce.take().is_some() {
                        *self.nonce_override.lock().await = None;
                    }
                    let result = sent?;

                    if result.is_rejected() {
                        state.consecutive_rejections += 1;
                        self.status.write().await.rejections_this_session += 1;

                        let limit = self.config.max_consecutive_rejections;
                        if limit > 0 && state.consecutive_rejections >= limit {
                            return Err(AirdropError::PersistentRejection {
                                attempts: state.consecutive_rejections,
                                reason: result.rejection_reason().to_string(),
                            });
                        }

                        warn!(
                            "Batch rejected ({}), queue not committed, will retry in {}s",
                            result.rejection_reason(),
                            self.config.rejection_cooldown_secs
                        );
                        tokio::time::sleep(Duration::from_secs(self.config.rejection_cooldown_secs))
                            .await;
                        Phase::Probing
                    } else {
                        state.consecutive_rejections = 0;
                        state.nonce = NonceTracker::record_broadcast(state.nonce, round_nonce);
                        broadcasts += 1;

                        let mut status = self.status.write().await;
                        status.broadcasts_this_session += 1;
                        status.last_txid = Some(result.txid);
                        drop(status);

                        Phase::Committing
                    }
                }

                Phase::Committing => {
                    self.store.commit(&plan.consumed, &plan.remaining).await?;
                    crate::metrics::record_committed(plan.len(), plan.remaining.len());

                    let mut status = self.status.write().await;
                    status.committed_this_session += plan.len() as u64;
                    status.queue_remaining = Some(plan.remaining.len());
                    drop(status);

                    info!(
                        "Committed {} recipients, {} remaining",
                        plan.len(),
                        plan.remaining.len()
                    );
                    plan = BatchPlan::default();

                    tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
                    Phase::Probing
                }

                Phase::Draining => {
                    state.drained = true;
                    let mut status = self.status.write().await;
                    status.drained = true;
                    status.queue_remaining = Some(0);
                    drop(status);

                    info!("AIRDROP COMPLETE!");
                    return Ok(RunOutcome::Drained { broadcasts });
                }

                Phase::Halted => return Ok(RunOutcome::Halted { broadcasts }),
            };
        }
    }

    async fn set_phase(&self, phase: Phase) {
        self.status.write().await.phase = phase;
    }

    async fn publish_probe(&self, state: &RunState, round_nonce: u64) {
        let mut status = self.status.write().await;
        status.pending_tx = state.pending_tx;
        status.next_nonce = round_nonce;
        status.has_gap = state.nonce.has_gap;
    }
}
