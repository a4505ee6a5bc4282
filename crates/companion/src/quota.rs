//! Quota gate: the first check of every turn.

use kindred_core::error::TurnError;
use kindred_core::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// A user's standing against the free-tier limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub message_count: u64,
    pub limit: u64,
    pub is_premium: bool,
}

impl QuotaState {
    pub fn allows_turn(&self) -> bool {
        self.is_premium || self.message_count < self.limit
    }
}

pub struct QuotaGate {
    store: Arc<dyn Storage>,
    free_message_limit: u64,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn Storage>, free_message_limit: u64) -> Self {
        Self {
            store,
            free_message_limit,
        }
    }

    pub fn limit(&self) -> u64 {
        self.free_message_limit
    }

    /// Read the user's usage. A failed read counts as zero messages.
    pub async fn state(&self, user_id: &str) -> QuotaState {
        match self.store.usage(user_id).await {
            Ok(usage) => QuotaState {
                message_count: usage.message_count,
                limit: self.free_message_limit,
                is_premium: usage.is_premium,
            },
            Err(e) => {
                warn!(user_id, error = %e, "Usage lookup failed, allowing turn");
                QuotaState {
                    message_count: 0,
                    limit: self.free_message_limit,
                    is_premium: false,
                }
            }
        }
    }

    /// Reject non-premium users at or above the limit.
    pub async fn check(&self, user_id: &str) -> Result<QuotaState, TurnError> {
        let state = self.state(user_id).await;
        if state.allows_turn() {
            Ok(state)
        } else {
            Err(TurnError::QuotaExceeded {
                count: state.message_count,
                limit: state.limit,
            })
        }
    }
}
