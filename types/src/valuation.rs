use thiserror::Error as ThisError;

use crate::{AllocationVector, PriceSnapshot, Ticker, TOTAL_ALLOCATION_BLOCKS};

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ValuationError {
    #[error("no entry price for {ticker}")]
    MissingEntryPrice { ticker: Ticker },
    #[error("no current price for {ticker}")]
    MissingCurrentPrice { ticker: Ticker },
}

/// Value a portfolio: each allocated block buys `starting_balance / 10` worth
/// of its ticker at the entry price, and the resulting units are marked at the
/// current price. Tickers with zero blocks are never looked up.
///
/// A missing or non-positive entry price would silently zero out a position,
/// so it is an error rather than a zero contribution. This is the single
/// valuation implementation; both the creation-time preview and the settlement
/// job call it.
pub fn portfolio_value(
    allocation: &AllocationVector,
    entry: &PriceSnapshot,
    current: &PriceSnapshot,
    starting_balance: f64,
) -> Result<f64, ValuationError> {
    let mut total = 0.0;
    for (ticker, blocks) in allocation.positions() {
        let entry_price = entry
            .price(ticker)
            .filter(|p| *p > 0.0)
            .ok_or(ValuationError::MissingEntryPrice { ticker })?;
        let current_price = current
            .price(ticker)
            .ok_or(ValuationError::MissingCurrentPrice { ticker })?;
        let notional = f64::from(blocks) / f64::from(TOTAL_ALLOCATION_BLOCKS) * starting_balance;
        let units = notional / entry_price;
        total += units * current_price;
    }
    Ok(total)
}
