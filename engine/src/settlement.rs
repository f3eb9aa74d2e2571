use moonrace_types::{
    portfolio_value, Game, GameError, PriceSnapshot, ValueHistoryEntry,
    DEFAULT_HISTORY_SAMPLE_EVERY, SETTLEMENT_LEASE_STALE_MS,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::Store;

/// Tunables for the settlement pass.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementConfig {
    /// Value-history rows are appended every N-th run.
    pub history_sample_every: u32,
    /// Age after which an unfinished run's lock is reclaimed.
    pub lease_stale_after_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            history_sample_every: DEFAULT_HISTORY_SAMPLE_EVERY,
            lease_stale_after_ms: SETTLEMENT_LEASE_STALE_MS,
        }
    }
}

impl SettlementConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.history_sample_every == 0 {
            return Err("history_sample_every must be at least 1");
        }
        if self.lease_stale_after_ms == 0 {
            return Err("lease_stale_after_ms must be positive");
        }
        Ok(())
    }
}

/// Counters from one settlement pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    /// True when another run held the lock and this one did nothing.
    pub skipped: bool,
    pub games_seen: usize,
    pub games_valued: usize,
    pub games_completed: usize,
    pub participants_valued: usize,
    pub valuation_failures: usize,
    pub history_appended: usize,
    pub total_runs: u64,
}

/// Periodic revaluation and completion pass over all active games.
///
/// Each pass recomputes absolute values from the fixed entry prices and the
/// latest snapshot, completes games past their end time, and samples value
/// history. Per-item failures are counted and skipped so one bad record never
/// stalls the rest.
#[derive(Clone)]
pub struct SettlementJob {
    store: Arc<dyn Store>,
    config: SettlementConfig,
}

impl SettlementJob {
    pub fn new(store: Arc<dyn Store>, config: SettlementConfig) -> Self {
        Self { store, config }
    }

    pub fn run(&self, now_ms: u64) -> Result<SettlementReport, GameError> {
        // Snapshot first: with no price data there is nothing to settle and
        // nothing may be written, the run lock included.
        let prices = self.store.latest_prices()?.ok_or(GameError::NoPriceData)?;

        let lease = match self
            .store
            .begin_settlement_run(now_ms, self.config.lease_stale_after_ms)?
        {
            Some(lease) => lease,
            None => {
                info!("settlement already running; skipping this pass");
                return Ok(SettlementReport {
                    skipped: true,
                    ..SettlementReport::default()
                });
            }
        };

        let record_history = lease.total_runs % u64::from(self.config.history_sample_every) == 0;
        let outcome = self.run_locked(&prices, record_history, now_ms);
        // Release the lock even when the pass failed midway.
        let total_runs = self.store.finish_settlement_run(now_ms)?;

        let mut report = outcome?;
        report.total_runs = total_runs;
        info!(
            total_runs,
            games_seen = report.games_seen,
            games_valued = report.games_valued,
            games_completed = report.games_completed,
            participants_valued = report.participants_valued,
            valuation_failures = report.valuation_failures,
            history_appended = report.history_appended,
            "settlement pass finished"
        );
        Ok(report)
    }

    fn run_locked(
        &self,
        prices: &PriceSnapshot,
        record_history: bool,
        now_ms: u64,
    ) -> Result<SettlementReport, GameError> {
        let games = self.store.active_games()?;
        let mut report = SettlementReport {
            games_seen: games.len(),
            ..SettlementReport::default()
        };
        for game in &games {
            self.settle_game(game, prices, record_history, now_ms, &mut report);
        }
        Ok(report)
    }

    fn settle_game(
        &self,
        game: &Game,
        prices: &PriceSnapshot,
        record_history: bool,
        now_ms: u64,
        report: &mut SettlementReport,
    ) {
        match portfolio_value(
            &game.allocation,
            &game.entry_prices,
            prices,
            game.starting_balance,
        ) {
            Ok(value) => {
                if now_ms > game.ends_at_ms {
                    match self.store.complete_game(game.id, now_ms, value) {
                        Ok(true) => {
                            report.games_completed += 1;
                            info!(game_id = %game.id, final_value = value, "game completed");
                        }
                        Ok(false) => debug!(game_id = %game.id, "game already completed"),
                        Err(err) => {
                            warn!(game_id = %game.id, error = %err, "completing game failed")
                        }
                    }
                } else {
                    match self.store.update_game_value(game.id, value) {
                        Ok(_) => report.games_valued += 1,
                        Err(err) => {
                            warn!(game_id = %game.id, error = %err, "updating game value failed")
                        }
                    }
                }
                if record_history {
                    // The snapshot rides on the game-level row only; the
                    // participant rows below stay value-only.
                    let entry = ValueHistoryEntry {
                        game_id: game.id,
                        participant_id: None,
                        value,
                        prices: Some(prices.clone()),
                        recorded_at_ms: now_ms,
                    };
                    match self.store.append_value_history(&entry) {
                        Ok(()) => report.history_appended += 1,
                        Err(err) => {
                            warn!(game_id = %game.id, error = %err, "appending game history failed")
                        }
                    }
                }
            }
            Err(err) => {
                report.valuation_failures += 1;
                warn!(game_id = %game.id, error = %err, "valuing game failed; skipping");
            }
        }

        let participants = match self.store.participants_for_game(game.id) {
            Ok(participants) => participants,
            Err(err) => {
                warn!(game_id = %game.id, error = %err, "listing participants failed; skipping");
                return;
            }
        };
        for participant in &participants {
            match portfolio_value(
                &participant.allocation,
                &game.entry_prices,
                prices,
                participant.starting_value,
            ) {
                Ok(value) => {
                    match self.store.update_participant_value(participant.id, value) {
                        Ok(_) => report.participants_valued += 1,
                        Err(err) => warn!(
                            participant_id = %participant.id,
                            error = %err,
                            "updating participant value failed"
                        ),
                    }
                    if record_history {
                        let entry = ValueHistoryEntry {
                            game_id: game.id,
                            participant_id: Some(participant.id),
                            value,
                            prices: None,
                            recorded_at_ms: now_ms,
                        };
                        match self.store.append_value_history(&entry) {
                            Ok(()) => report.history_appended += 1,
                            Err(err) => warn!(
                                participant_id = %participant.id,
                                error = %err,
                                "appending participant history failed"
                            ),
                        }
                    }
                }
                Err(err) => {
                    report.valuation_failures += 1;
                    warn!(
                        game_id = %game.id,
                        participant_id = %participant.id,
                        error = %err,
                        "valuing participant failed; skipping"
                    );
                }
            }
        }
    }
}
