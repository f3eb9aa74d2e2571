//! Persistence seam for the game engine.
//!
//! The [`Store`] trait models the hosted database the way the engine is
//! allowed to use it: single-row reads and writes plus a handful of
//! conditional single-statement updates. There are no cross-table
//! transactions; the lifecycle service compensates for mid-sequence failures
//! with explicit deletes instead.

use moonrace_types::{Game, GameError, Participant, PriceSnapshot, ValueHistoryEntry};
use thiserror::Error as ThisError;
use uuid::Uuid;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, ThisError)]
pub enum StoreError {
    /// Transient backend condition (lock contention, connection churn). The
    /// caller should retry the whole operation later.
    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),
    /// A uniqueness guarantee rejected the write (duplicate participant,
    /// open-game code collision).
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => GameError::TemporarilyUnavailable,
            // A lost uniqueness race is retryable with fresh randomness;
            // callers that can name the conflict map it before this.
            StoreError::Conflict(_) => GameError::TemporarilyUnavailable,
            StoreError::Backend(msg) => GameError::Internal(msg),
        }
    }
}

/// Snapshot of the settlement run-lock row. A run is in flight while
/// `started_at_ms > finished_at_ms`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettlementLease {
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    /// Completed runs so far; drives the history sampling cadence.
    pub total_runs: u64,
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait Store: Send + Sync {
    // Price snapshots (read-mostly; written only by the ingest path).
    fn latest_prices(&self) -> StoreResult<Option<PriceSnapshot>>;
    fn put_prices(&self, snapshot: &PriceSnapshot) -> StoreResult<()>;

    // Games.
    fn insert_game(&self, game: &Game) -> StoreResult<()>;
    fn get_game(&self, id: Uuid) -> StoreResult<Option<Game>>;
    /// Compensating delete for a failed create sequence. Returns whether a
    /// row was removed.
    fn delete_game(&self, id: Uuid) -> StoreResult<bool>;
    /// Exact, case-sensitive lookup among non-complete games.
    fn find_open_game_by_code(&self, code: &str) -> StoreResult<Option<Game>>;
    /// Whether any non-complete game currently holds `code`. Completed games
    /// do not reserve their codes.
    fn code_in_use(&self, code: &str) -> StoreResult<bool>;
    fn active_games(&self) -> StoreResult<Vec<Game>>;
    /// Games the user created or joined, newest first.
    fn games_for_user(&self, user_id: &str) -> StoreResult<Vec<Game>>;
    /// Write back the game record's own current value. No-op once the game
    /// is complete. Returns whether a row was written.
    fn update_game_value(&self, id: Uuid, value: f64) -> StoreResult<bool>;
    /// One-way completion: writes only while the game is still active, so a
    /// completed game can never be re-completed or reopened. Returns whether
    /// the transition happened.
    fn complete_game(&self, id: Uuid, completed_at_ms: u64, final_value: f64)
        -> StoreResult<bool>;
    /// Atomic counter bump returning the new count. The service layer never
    /// read-modify-writes this field.
    fn increment_participant_count(&self, game_id: Uuid) -> StoreResult<u32>;

    // Participants.
    fn insert_participant(&self, participant: &Participant) -> StoreResult<()>;
    fn get_participant(&self, game_id: Uuid, user_id: &str) -> StoreResult<Option<Participant>>;
    /// All participants of a game, in join order.
    fn participants_for_game(&self, game_id: Uuid) -> StoreResult<Vec<Participant>>;
    /// Compensating delete for a failed join sequence.
    fn delete_participant(&self, id: Uuid) -> StoreResult<bool>;
    fn update_participant_value(&self, id: Uuid, value: f64) -> StoreResult<bool>;

    // Settlement run lock.
    /// Try to mark a run started at `now_ms`. Returns the prior lease when
    /// acquired, or `None` while another non-stale run is in flight.
    fn begin_settlement_run(
        &self,
        now_ms: u64,
        stale_after_ms: u64,
    ) -> StoreResult<Option<SettlementLease>>;
    /// Mark the in-flight run finished and count it; returns the new total.
    fn finish_settlement_run(&self, now_ms: u64) -> StoreResult<u64>;

    // Value history.
    fn append_value_history(&self, entry: &ValueHistoryEntry) -> StoreResult<()>;
    /// History rows for a game, oldest first.
    fn value_history(&self, game_id: Uuid) -> StoreResult<Vec<ValueHistoryEntry>>;
}
