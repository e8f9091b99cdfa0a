//! Transaction submission module with nonce tracking and backlog monitoring

mod monitor;
mod nonce;
mod retry;
mod sender;
mod signer;

pub use monitor::PendingTxMonitor;
pub use nonce::{NonceState, NonceTracker};
pub use retry::RetryPolicy;
pub use sender::{ContractTarget, TransactionBroadcaster};
pub use signer::{RemoteSigner, SignedTransaction, TransactionSigner};

#[cfg(test)]
pub use signer::MockTransactionSigner;
