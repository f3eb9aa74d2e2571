//! Moonrace game engine.
//!
//! Business logic for the portfolio game, programmed against the [`Store`]
//! persistence seam: the game lifecycle service ([`Games`]) and the periodic
//! revaluation/completion pass ([`SettlementJob`]).
//!
//! ## Time and idempotency requirements
//! - Nothing in this crate reads the wall clock; callers pass `now_ms`.
//! - Settlement recomputes absolute values from fixed entry prices (never
//!   deltas), so re-running a pass against the same snapshot is a no-op.
//! - Completion is one-way: the store-level guard keeps a completed game
//!   completed no matter how often settlement sees it.
//!
//! ## Write discipline
//! The store offers per-row atomicity only. Multi-row sequences order their
//! writes so a failure can be compensated with a delete of the row just
//! written (game before creator participant, participant before counter
//! increment).

pub mod store;

mod lifecycle;
mod settlement;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


pub use lifecycle::{GameDetails, Games, JoinedGame, LifecycleConfig, PortfolioPreview};
pub use settlement::{SettlementConfig, SettlementJob, SettlementReport};
pub use store::{MemoryStore, SettlementLease, SqliteStore, Store, StoreError, StoreResult};
