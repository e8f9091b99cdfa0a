//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Block notifications and executor rounds
//! - Broadcasts, rejections and transport retries
//! - Nonce, mempool backlog and queue progress

use crate::error::{AirdropError, AirdropResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Chain metrics
    pub static ref BLOCK_HEIGHT: Gauge = register_gauge!(
        "airdrop_block_height",
        "Latest block height seen by the listener"
    ).unwrap();

    // Executor metrics
    pub static ref ROUNDS: CounterVec = register_counter_vec!(
        "airdrop_runs_total",
        "Executor invocations by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        "airdrop_batch_size",
        "Recipients per planned batch",
        vec![1.0, 10.0, 100.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 14995.0]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_BROADCAST: Counter = register_counter!(
        "airdrop_transactions_broadcast_total",
        "Transactions accepted by the network"
    ).unwrap();

    pub static ref TX_REJECTED: CounterVec = register_counter_vec!(
        "airdrop_transactions_rejected_total",
        "Transactions rejected by the network",
        &["reason"]
    ).unwrap();

    pub static ref RETRIES: CounterVec = register_counter_vec!(
        "airdrop_transport_retries_total",
        "Retried network operations",
        &["operation"]
    ).unwrap();

    pub static ref RECIPIENTS_SENT: Counter = register_counter!(
        "airdrop_recipients_broadcast_total",
        "Recipients carried by accepted transactions"
    ).unwrap();

    // Account metrics
    pub static ref NEXT_NONCE: Gauge = register_gauge!(
        "airdrop_next_nonce",
        "Nonce the next transaction will use"
    ).unwrap();

    pub static ref NONCE_GAP: Gauge = register_gauge!(
        "airdrop_nonce_gap",
        "Nonce gap being refilled (1=yes, 0=no)"
    ).unwrap();

    pub static ref PENDING_TX: Gauge = register_gauge!(
        "airdrop_pending_transactions",
        "Unconfirmed transactions from the sending account"
    ).unwrap();

    // Queue metrics
    pub static ref RECIPIENTS_COMMITTED: Counter = register_counter!(
        "airdrop_recipients_committed_total",
        "Recipients moved to the completed log"
    ).unwrap();

    pub static ref QUEUE_REMAINING: Gauge = register_gauge!(
        "airdrop_queue_remaining",
        "Recipients still pending after the last commit"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> AirdropResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| AirdropError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| AirdropError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        warn!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> AirdropResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AirdropError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| AirdropError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_block_seen(height: u64) {
    BLOCK_HEIGHT.set(height as f64);
}

pub fn record_round(outcome: &str) {
    ROUNDS.with_label_values(&[outcome]).inc();
}

pub fn record_batch_planned(recipients: usize) {
    BATCH_SIZE.observe(recipients as f64);
}

pub fn record_broadcast(recipients: usize) {
    TX_BROADCAST.inc();
    RECIPIENTS_SENT.inc_by(recipients as f64);
}

pub fn record_rejection(reason: &str) {
    TX_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_retry(operation: &str) {
    RETRIES.with_label_values(&[operation]).inc();
}

pub fn record_nonce(nonce: u64, has_gap: bool) {
    NEXT_NONCE.set(nonce as f64);
    NONCE_GAP.set(if has_gap { 1.0 } else { 0.0 });
}

pub fn record_pending_txs(count: u64) {
    PENDING_TX.set(count as f64);
}

pub fn record_committed(recipients: usize, remaining: usize) {
    RECIPIENTS_COMMITTED.inc_by(recipients as f64);
    QUEUE_REMAINING.set(remaining as f64);
}
