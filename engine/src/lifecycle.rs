use moonrace_types::{
    is_supported_duration, portfolio_value, rank_participants, AllocationVector, Game, GameError,
    LeaderboardEntry, Participant, PriceSnapshot, ValueHistoryEntry, DEFAULT_CODE_ATTEMPTS,
    GAME_CODE_ALPHABET, GAME_CODE_LENGTH, STARTING_BALANCE_USD,
};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{Store, StoreError};

/// Tunables for game creation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Paper balance every portfolio starts from, in USD.
    pub starting_balance: f64,
    /// Distinct codes drawn before creation gives up.
    pub code_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            starting_balance: STARTING_BALANCE_USD,
            code_attempts: DEFAULT_CODE_ATTEMPTS,
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.starting_balance.is_finite() || self.starting_balance <= 0.0 {
            return Err("starting_balance must be positive");
        }
        if self.code_attempts == 0 {
            return Err("code_attempts must be at least 1");
        }
        Ok(())
    }
}

/// A game plus its participants in join order.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDetails {
    pub game: Game,
    pub participants: Vec<Participant>,
}

/// Result of joining: the refreshed game record and the new membership.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedGame {
    pub game: Game,
    pub participant: Participant,
}

/// What a hypothetical portfolio would be worth at the latest prices.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPreview {
    pub value: f64,
    pub priced_at_ms: u64,
}

/// Game lifecycle service: creation, joining and read projections. All writes
/// go through the [`Store`] seam; multi-row sequences compensate on failure so
/// no half-created game or membership survives an error.
#[derive(Clone)]
pub struct Games {
    store: Arc<dyn Store>,
    config: LifecycleConfig,
}

impl Games {
    pub fn new(store: Arc<dyn Store>, config: LifecycleConfig) -> Self {
        Self { store, config }
    }

    /// Creates a game and enrolls the creator as its first participant.
    ///
    /// Entry prices are snapshotted here and never change afterwards, so the
    /// latest snapshot must cover every allocated ticker or the game could
    /// never be valued.
    pub fn create_game(
        &self,
        rng: &mut impl Rng,
        creator: &str,
        duration_days: u32,
        blocks: &BTreeMap<String, f64>,
        now_ms: u64,
    ) -> Result<Game, GameError> {
        if !is_supported_duration(duration_days) {
            return Err(GameError::InvalidDuration { got: duration_days });
        }
        let allocation = AllocationVector::try_from_blocks(blocks)?;
        let entry_prices = self
            .store
            .latest_prices()?
            .ok_or(GameError::PriceUnavailable)?;
        if portfolio_value(
            &allocation,
            &entry_prices,
            &entry_prices,
            self.config.starting_balance,
        )
        .is_err()
        {
            // The live feed does not price an allocated ticker yet.
            return Err(GameError::PriceUnavailable);
        }

        let code = self.draw_code(rng)?;
        let game = Game::open(
            Uuid::new_v4(),
            code,
            creator.to_string(),
            duration_days,
            self.config.starting_balance,
            allocation.clone(),
            entry_prices,
            now_ms,
        );
        self.store.insert_game(&game)?;

        let participant = Participant::new(
            Uuid::new_v4(),
            game.id,
            creator.to_string(),
            allocation,
            self.config.starting_balance,
            now_ms,
            true,
        );
        if let Err(err) = self.store.insert_participant(&participant) {
            // Compensate so no creator-less game lingers.
            if let Err(cleanup) = self.store.delete_game(game.id) {
                warn!(game_id = %game.id, error = %cleanup, "orphaned game row left behind");
            }
            return Err(err.into());
        }

        info!(
            game_id = %game.id,
            code = %game.code,
            creator,
            duration_days,
            "game created"
        );
        Ok(game)
    }

    /// Adds `user_id` to an open game with their own allocation.
    pub fn join_game(
        &self,
        user_id: &str,
        game_id: Uuid,
        blocks: &BTreeMap<String, f64>,
        now_ms: u64,
    ) -> Result<JoinedGame, GameError> {
        let allocation = AllocationVector::try_from_blocks(blocks)?;
        let mut game = self
            .store
            .get_game(game_id)?
            .filter(|g| !g.is_complete)
            .ok_or(GameError::GameNotFound)?;
        if self.store.get_participant(game_id, user_id)?.is_some() {
            return Err(GameError::AlreadyJoined);
        }
        // The membership check already covers creators; this remains for games
        // whose creator row went missing.
        if game.creator == user_id {
            return Err(GameError::CannotJoinOwnGame);
        }
        // Joiners are scored against the entry snapshot fixed at creation, so
        // every allocated ticker must have been priced back then.
        portfolio_value(
            &allocation,
            &game.entry_prices,
            &game.entry_prices,
            game.starting_balance,
        )?;

        let participant = Participant::new(
            Uuid::new_v4(),
            game.id,
            user_id.to_string(),
            allocation,
            game.starting_balance,
            now_ms,
            false,
        );
        match self.store.insert_participant(&participant) {
            Ok(()) => {}
            // A concurrent join of the same user landed first.
            Err(StoreError::Conflict(_)) => return Err(GameError::AlreadyJoined),
            Err(err) => return Err(err.into()),
        }
        match self.store.increment_participant_count(game.id) {
            Ok(count) => game.participant_count = count,
            Err(err) => {
                if let Err(cleanup) = self.store.delete_participant(participant.id) {
                    warn!(
                        participant_id = %participant.id,
                        error = %cleanup,
                        "orphaned participant row left behind"
                    );
                }
                return Err(err.into());
            }
        }

        info!(
            game_id = %game.id,
            user_id,
            participant_count = game.participant_count,
            "participant joined"
        );
        Ok(JoinedGame { game, participant })
    }

    /// Looks up an open game by its shareable code. Exact match; codes of
    /// completed games are not resolvable.
    pub fn find_game_by_code(&self, code: &str) -> Result<Game, GameError> {
        self.store
            .find_open_game_by_code(code)?
            .ok_or(GameError::GameNotFound)
    }

    /// A game (open or completed) with its participants in join order.
    pub fn game_details(&self, game_id: Uuid) -> Result<GameDetails, GameError> {
        let game = self
            .store
            .get_game(game_id)?
            .ok_or(GameError::GameNotFound)?;
        let participants = self.store.participants_for_game(game_id)?;
        Ok(GameDetails { game, participants })
    }

    pub fn leaderboard(&self, game_id: Uuid) -> Result<Vec<LeaderboardEntry>, GameError> {
        let details = self.game_details(game_id)?;
        Ok(rank_participants(&details.participants))
    }

    /// Games the user created or joined, newest first.
    pub fn games_for_user(&self, user_id: &str) -> Result<Vec<Game>, GameError> {
        Ok(self.store.games_for_user(user_id)?)
    }

    /// Sampled value history for a game, oldest first.
    pub fn value_history(&self, game_id: Uuid) -> Result<Vec<ValueHistoryEntry>, GameError> {
        if self.store.get_game(game_id)?.is_none() {
            return Err(GameError::GameNotFound);
        }
        Ok(self.store.value_history(game_id)?)
    }

    /// Values a hypothetical allocation at the latest prices without touching
    /// any game. `entry` defaults to the latest snapshot, which prices the
    /// portfolio as if it were opened right now.
    pub fn preview(
        &self,
        blocks: &BTreeMap<String, f64>,
        entry: Option<&PriceSnapshot>,
    ) -> Result<PortfolioPreview, GameError> {
        let allocation = AllocationVector::try_from_blocks(blocks)?;
        let current = self
            .store
            .latest_prices()?
            .ok_or(GameError::PriceUnavailable)?;
        let entry = entry.unwrap_or(&current);
        let value = portfolio_value(&allocation, entry, &current, self.config.starting_balance)?;
        Ok(PortfolioPreview {
            value,
            priced_at_ms: current.fetched_at_ms,
        })
    }

    fn draw_code(&self, rng: &mut impl Rng) -> Result<String, GameError> {
        for _ in 0..self.config.code_attempts {
            let code: String = (0..GAME_CODE_LENGTH)
                .map(|_| GAME_CODE_ALPHABET[rng.gen_range(0..GAME_CODE_ALPHABET.len())] as char)
                .collect();
            if !self.store.code_in_use(&code)? {
                return Ok(code);
            }
        }
        Err(GameError::CodeGenerationExhausted {
            attempts: self.config.code_attempts,
        })
    }
}
