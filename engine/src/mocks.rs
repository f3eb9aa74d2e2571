//! Test fixtures and a fault-injecting store used by the engine tests.

use crate::store::{MemoryStore, SettlementLease, Store, StoreError, StoreResult};
use moonrace_types::{AllocationVector, Game, Participant, PriceSnapshot, Ticker, ValueHistoryEntry};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Creates a price snapshot with realistic spot prices for every ticker
pub fn snapshot_at(fetched_at_ms: u64) -> PriceSnapshot {
    let prices: BTreeMap<Ticker, f64> = [
        (Ticker::BTC, 60_000.0),
        (Ticker::ETH, 3_000.0),
        (Ticker::SOL, 150.0),
        (Ticker::BNB, 600.0),
        (Ticker::XRP, 0.5),
        (Ticker::ADA, 0.4),
        (Ticker::DOGE, 0.1),
        (Ticker::AVAX, 35.0),
        (Ticker::DOT, 7.0),
        (Ticker::LINK, 15.0),
        (Ticker::MATIC, 0.9),
        (Ticker::LTC, 80.0),
    ]
    .into_iter()
    .collect();
    PriceSnapshot::new(prices, fetched_at_ms)
}

/// Creates a snapshot with every price from [`snapshot_at`] multiplied by `factor`
pub fn scaled_snapshot(factor: f64, fetched_at_ms: u64) -> PriceSnapshot {
    let base = snapshot_at(fetched_at_ms);
    let prices = base
        .prices
        .into_iter()
        .map(|(ticker, price)| (ticker, price * factor))
        .collect();
    PriceSnapshot::new(prices, fetched_at_ms)
}

/// Creates an allocation from ticker/block pairs, panicking on invalid input
pub fn allocation(blocks: &[(Ticker, u8)]) -> AllocationVector {
    let map: BTreeMap<Ticker, u8> = blocks.iter().copied().collect();
    AllocationVector::try_from(map).expect("test allocation must satisfy the block rules")
}

/// Creates the raw request-shaped block map clients submit
pub fn raw_blocks(blocks: &[(&str, f64)]) -> BTreeMap<String, f64> {
    blocks
        .iter()
        .map(|(ticker, blocks)| (ticker.to_string(), *blocks))
        .collect()
}

/// A [`MemoryStore`] wrapper with switchable failure points, used to exercise
/// the compensating-write paths in game creation and joining.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    /// When set, `insert_participant` fails without writing.
    pub fail_insert_participant: AtomicBool,
    /// When set, `increment_participant_count` fails without writing.
    pub fail_increment_count: AtomicBool,
    /// When set, every code probe reports a collision.
    pub force_code_collisions: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn injected(flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Store for FlakyStore {
    fn latest_prices(&self) -> StoreResult<Option<PriceSnapshot>> {
        self.inner.latest_prices()
    }

    fn put_prices(&self, snapshot: &PriceSnapshot) -> StoreResult<()> {
        self.inner.put_prices(snapshot)
    }

    fn insert_game(&self, game: &Game) -> StoreResult<()> {
        self.inner.insert_game(game)
    }

    fn get_game(&self, id: Uuid) -> StoreResult<Option<Game>> {
        self.inner.get_game(id)
    }

    fn delete_game(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_game(id)
    }

    fn find_open_game_by_code(&self, code: &str) -> StoreResult<Option<Game>> {
        self.inner.find_open_game_by_code(code)
    }

    fn code_in_use(&self, code: &str) -> StoreResult<bool> {
        if self.force_code_collisions.load(Ordering::SeqCst) {
            return Ok(true);
        }
        self.inner.code_in_use(code)
    }

    fn active_games(&self) -> StoreResult<Vec<Game>> {
        self.inner.active_games()
    }

    fn games_for_user(&self, user_id: &str) -> StoreResult<Vec<Game>> {
        self.inner.games_for_user(user_id)
    }

    fn update_game_value(&self, id: Uuid, value: f64) -> StoreResult<bool> {
        self.inner.update_game_value(id, value)
    }

    fn complete_game(
        &self,
        id: Uuid,
        completed_at_ms: u64,
        final_value: f64,
    ) -> StoreResult<bool> {
        self.inner.complete_game(id, completed_at_ms, final_value)
    }

    fn increment_participant_count(&self, game_id: Uuid) -> StoreResult<u32> {
        Self::injected(&self.fail_increment_count)?;
        self.inner.increment_participant_count(game_id)
    }

    fn insert_participant(&self, participant: &Participant) -> StoreResult<()> {
        Self::injected(&self.fail_insert_participant)?;
        self.inner.insert_participant(participant)
    }

    fn get_participant(&self, game_id: Uuid, user_id: &str) -> StoreResult<Option<Participant>> {
        self.inner.get_participant(game_id, user_id)
    }

    fn participants_for_game(&self, game_id: Uuid) -> StoreResult<Vec<Participant>> {
        self.inner.participants_for_game(game_id)
    }

    fn delete_participant(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_participant(id)
    }

    fn update_participant_value(&self, id: Uuid, value: f64) -> StoreResult<bool> {
        self.inner.update_participant_value(id, value)
    }

    fn begin_settlement_run(
        &self,
        now_ms: u64,
        stale_after_ms: u64,
    ) -> StoreResult<Option<SettlementLease>> {
        self.inner.begin_settlement_run(now_ms, stale_after_ms)
    }

    fn finish_settlement_run(&self, now_ms: u64) -> StoreResult<u64> {
        self.inner.finish_settlement_run(now_ms)
    }

    fn append_value_history(&self, entry: &ValueHistoryEntry) -> StoreResult<()> {
        self.inner.append_value_history(entry)
    }

    fn value_history(&self, game_id: Uuid) -> StoreResult<Vec<ValueHistoryEntry>> {
        self.inner.value_history(game_id)
    }
}
