use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AllocationVector, PriceSnapshot, DAY_MS, GAME_CODE_ALPHABET, GAME_CODE_LENGTH,
    SUPPORTED_DURATIONS_DAYS,
};

pub fn is_supported_duration(days: u32) -> bool {
    SUPPORTED_DURATIONS_DAYS.contains(&days)
}

/// Shape check only; whether a code is in use is a store question.
pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == GAME_CODE_LENGTH && code.bytes().all(|b| GAME_CODE_ALPHABET.contains(&b))
}

/// A portfolio game. Carries the creator's own allocation and value alongside
/// the shared parameters (entry prices, duration, starting balance) that every
/// participant is scored against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: Uuid,
    /// Shareable join code, unique among non-complete games.
    pub code: String,
    /// Opaque user id of the creator, as resolved by the identity provider.
    pub creator: String,
    pub duration_days: u32,
    pub starting_balance: f64,
    pub allocation: AllocationVector,
    /// Prices snapshotted at creation; fixed for the lifetime of the game.
    pub entry_prices: PriceSnapshot,
    pub created_at_ms: u64,
    pub ends_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    /// Denormalized participant counter, the creator included. Incremented
    /// only through the store's atomic increment.
    pub participant_count: u32,
    pub is_complete: bool,
    pub current_value: f64,
    pub final_value: Option<f64>,
}

impl Game {
    /// A freshly created game: active, creator counted as its first
    /// participant, valued at the starting balance until settlement runs.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: Uuid,
        code: String,
        creator: String,
        duration_days: u32,
        starting_balance: f64,
        allocation: AllocationVector,
        entry_prices: PriceSnapshot,
        created_at_ms: u64,
    ) -> Self {
        let ends_at_ms = created_at_ms.saturating_add(u64::from(duration_days) * DAY_MS);
        Self {
            id,
            code,
            creator,
            duration_days,
            starting_balance,
            allocation,
            entry_prices,
            created_at_ms,
            ends_at_ms,
            completed_at_ms: None,
            participant_count: 1,
            is_complete: false,
            current_value: starting_balance,
            final_value: None,
        }
    }
}

/// One user's entry in one game. At most one per (game, user).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub game_id: Uuid,
    pub user_id: String,
    pub allocation: AllocationVector,
    pub starting_value: f64,
    pub current_value: f64,
    pub joined_at_ms: u64,
    pub is_original_creator: bool,
}

impl Participant {
    pub fn new(
        id: Uuid,
        game_id: Uuid,
        user_id: String,
        allocation: AllocationVector,
        starting_value: f64,
        joined_at_ms: u64,
        is_original_creator: bool,
    ) -> Self {
        Self {
            id,
            game_id,
            user_id,
            allocation,
            starting_value,
            current_value: starting_value,
            joined_at_ms,
            is_original_creator,
        }
    }
}

/// A sampled point in a game's value history. `participant_id` of `None` is
/// the game record's own allocation; the price snapshot is recorded only on
/// that row to bound growth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueHistoryEntry {
    pub game_id: Uuid,
    pub participant_id: Option<Uuid>,
    pub value: f64,
    pub prices: Option<PriceSnapshot>,
    pub recorded_at_ms: u64,
}
