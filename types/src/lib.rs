//! Domain types for moonrace: tickers, allocation vectors, price snapshots,
//! game/participant records, the portfolio valuation function, and leaderboard
//! ranking.
//!
//! Everything in this crate is pure data and pure functions. Persistence and
//! transport live in `moonrace-engine` and `moonrace-server`.

mod allocation;
mod constants;
mod error;
mod game;
mod leaderboard;
mod prices;
mod ticker;
mod valuation;

pub use allocation::*;
pub use constants::*;
pub use error::*;
pub use game::*;
pub use leaderboard::*;
pub use prices::*;
pub use ticker::*;
pub use valuation::*;
