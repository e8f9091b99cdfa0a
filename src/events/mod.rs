//! Block notifications that trigger executor runs

use serde::{Deserialize, Serialize};

/// A new block observed on the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub burn_block_height: u64,
}

/// Page of blocks returned by the indexer
#[derive(Debug, Deserialize)]
pub(crate) struct BlockPage {
    pub results: Vec<BlockEvent>,
}

impl BlockEvent {
    /// Short label for logs
    pub fn label(&self) -> String {
        let short = self.hash.get(..10).unwrap_or(&self.hash);
        format!("#{} ({})", self.height, short)
    }
}
