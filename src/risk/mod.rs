//! Advisory risk heuristic over recent transaction history.
//!
//! The score never blocks an operation and never surfaces an error: a
//! storage failure degrades to a neutral score so callers keep working.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::core::config::RiskConfig;
use crate::core::domain::StoredTransaction;
use crate::storage::VaultStorageTrait;

pub struct RiskEngine {
    storage: Arc<dyn VaultStorageTrait>,
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(storage: Arc<dyn VaultStorageTrait>, config: RiskConfig) -> Self {
        Self { storage, config }
    }

    /// Risk score for `owner_id` in `[0, cap]`.
    ///
    /// An empty lookback window yields the configured baseline. If the store
    /// cannot be read the neutral score is returned instead of an error.
    pub async fn risk_score(&self, owner_id: &str) -> f64 {
        let since = Utc::now() - Duration::hours(self.config.lookback_hours);
        let transactions = match self.storage.transactions_since(owner_id, since).await {
            Ok(txs) => txs,
            Err(e) => {
                warn!(owner = %owner_id, "risk lookup failed, returning neutral: {}", e);
                return self.config.neutral;
            }
        };

        if transactions.is_empty() {
            return self.config.baseline;
        }

        let score = combine(&self.config, &transactions);
        debug!(owner = %owner_id, count = transactions.len(), score, "risk score computed");
        score
    }
}

/// Monotone combination of transaction count, aggregate amount, and
/// last-hour velocity, scaled between baseline and cap.
fn combine(config: &RiskConfig, transactions: &[StoredTransaction]) -> f64 {
    let count = transactions.len();
    let total: f64 = transactions
        .iter()
        .filter_map(|tx| tx.amount.parse::<f64>().ok())
        .filter(|a| a.is_finite() && *a >= 0.0)
        .sum();

    // Velocity: share of the window's activity packed into the last hour.
    let hour_ago = Utc::now() - Duration::hours(1);
    let recent = transactions.iter().filter(|tx| tx.created_at >= hour_ago).count();

    let count_factor = (count as f64 / config.count_saturation as f64).min(1.0);
    let amount_factor = (total / config.amount_saturation).min(1.0);
    let velocity_factor = recent as f64 / count as f64;

    let weighted = 0.4 * count_factor + 0.4 * amount_factor + 0.2 * velocity_factor;
    let score = config.baseline + (config.cap - config.baseline) * weighted;
    score.min(config.cap)
}
