use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

use crate::{Ticker, TOTAL_ALLOCATION_BLOCKS};

#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum AllocationError {
    #[error("unsupported ticker: {ticker}")]
    UnknownTicker { ticker: String },
    #[error("allocation for {ticker} must be a whole number of blocks (got={got})")]
    NonIntegerBlocks { ticker: Ticker, got: f64 },
    #[error("allocation for {ticker} out of range (got={got}, max={max})")]
    BlockOutOfRange { ticker: Ticker, got: f64, max: u8 },
    #[error("allocation blocks must sum to {expected} (got={got})")]
    BadTotal { got: u32, expected: u8 },
}

/// A portfolio allocation: blocks per ticker, summing to exactly
/// [`TOTAL_ALLOCATION_BLOCKS`]. Zero entries are dropped on construction so
/// equal portfolios compare equal regardless of how the caller spelled them.
///
/// Immutable once attached to a persisted game or participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Ticker, u8>", into = "BTreeMap<Ticker, u8>")]
pub struct AllocationVector {
    blocks: BTreeMap<Ticker, u8>,
}

impl AllocationVector {
    /// Validate raw client input: symbols must be supported tickers, block
    /// values whole numbers in [0, 10], and the total exactly 10.
    pub fn try_from_blocks(raw: &BTreeMap<String, f64>) -> Result<Self, AllocationError> {
        let mut blocks = BTreeMap::new();
        let mut total: u32 = 0;
        for (symbol, &value) in raw {
            let ticker: Ticker = symbol.parse().map_err(|_| AllocationError::UnknownTicker {
                ticker: symbol.clone(),
            })?;
            if !value.is_finite() || value.fract() != 0.0 {
                return Err(AllocationError::NonIntegerBlocks { ticker, got: value });
            }
            if value < 0.0 || value > f64::from(TOTAL_ALLOCATION_BLOCKS) {
                return Err(AllocationError::BlockOutOfRange {
                    ticker,
                    got: value,
                    max: TOTAL_ALLOCATION_BLOCKS,
                });
            }
            let count = value as u8;
            total += u32::from(count);
            if count > 0 {
                blocks.insert(ticker, count);
            }
        }
        if total != u32::from(TOTAL_ALLOCATION_BLOCKS) {
            return Err(AllocationError::BadTotal {
                got: total,
                expected: TOTAL_ALLOCATION_BLOCKS,
            });
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &BTreeMap<Ticker, u8> {
        &self.blocks
    }

    pub fn get(&self, ticker: Ticker) -> u8 {
        self.blocks.get(&ticker).copied().unwrap_or(0)
    }

    /// Nonzero (ticker, blocks) pairs in deterministic ticker order.
    pub fn positions(&self) -> impl Iterator<Item = (Ticker, u8)> + '_ {
        self.blocks.iter().map(|(t, b)| (*t, *b))
    }
}

impl TryFrom<BTreeMap<Ticker, u8>> for AllocationVector {
    type Error = AllocationError;

    fn try_from(raw: BTreeMap<Ticker, u8>) -> Result<Self, Self::Error> {
        let mut blocks = BTreeMap::new();
        let mut total: u32 = 0;
        for (ticker, count) in raw {
            if count > TOTAL_ALLOCATION_BLOCKS {
                return Err(AllocationError::BlockOutOfRange {
                    ticker,
                    got: f64::from(count),
                    max: TOTAL_ALLOCATION_BLOCKS,
                });
            }
            total += u32::from(count);
            if count > 0 {
                blocks.insert(ticker, count);
            }
        }
        if total != u32::from(TOTAL_ALLOCATION_BLOCKS) {
            return Err(AllocationError::BadTotal {
                got: total,
                expected: TOTAL_ALLOCATION_BLOCKS,
            });
        }
        Ok(Self { blocks })
    }
}

impl From<AllocationVector> for BTreeMap<Ticker, u8> {
    fn from(allocation: AllocationVector) -> Self {
        allocation.blocks
    }
}
