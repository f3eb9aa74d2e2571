use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

use crate::Ticker;

#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum PriceSnapshotError {
    #[error("price for {ticker} must be finite (got={got})")]
    NonFinite { ticker: Ticker, got: f64 },
    #[error("price for {ticker} must be positive (got={got})")]
    NonPositive { ticker: Ticker, got: f64 },
    #[error("snapshot contains no prices")]
    Empty,
}

/// USD price per ticker at a single fetch instant.
///
/// Written only by the price-ingest path; the lifecycle service and the
/// settlement job read it and never mutate it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub prices: BTreeMap<Ticker, f64>,
    pub fetched_at_ms: u64,
}

impl PriceSnapshot {
    pub fn new(prices: BTreeMap<Ticker, f64>, fetched_at_ms: u64) -> Self {
        Self {
            prices,
            fetched_at_ms,
        }
    }

    pub fn price(&self, ticker: Ticker) -> Option<f64> {
        self.prices.get(&ticker).copied()
    }

    /// Ingest validation: a snapshot must be non-empty with every price finite
    /// and positive. Rejected snapshots are never stored.
    pub fn validate(&self) -> Result<(), PriceSnapshotError> {
        if self.prices.is_empty() {
            return Err(PriceSnapshotError::Empty);
        }
        for (&ticker, &price) in &self.prices {
            if !price.is_finite() {
                return Err(PriceSnapshotError::NonFinite { ticker, got: price });
            }
            if price <= 0.0 {
                return Err(PriceSnapshotError::NonPositive { ticker, got: price });
            }
        }
        Ok(())
    }
}
