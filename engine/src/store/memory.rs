use moonrace_types::{Game, Participant, PriceSnapshot, ValueHistoryEntry};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{SettlementLease, Store, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    prices: Option<PriceSnapshot>,
    games: HashMap<Uuid, Game>,
    participants: HashMap<Uuid, Participant>,
    lease: SettlementLease,
    history: Vec<ValueHistoryEntry>,
}

/// In-memory store. The default backend for local runs and the test backend
/// everywhere; it enforces the same uniqueness rules the SQLite schema does
/// so either backend surfaces the same conflicts.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("state mutex poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn latest_prices(&self) -> StoreResult<Option<PriceSnapshot>> {
        Ok(self.lock()?.prices.clone())
    }

    fn put_prices(&self, snapshot: &PriceSnapshot) -> StoreResult<()> {
        self.lock()?.prices = Some(snapshot.clone());
        Ok(())
    }

    fn insert_game(&self, game: &Game) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.games.contains_key(&game.id) {
            return Err(StoreError::Conflict(format!("game {} exists", game.id)));
        }
        if inner
            .games
            .values()
            .any(|g| !g.is_complete && g.code == game.code)
        {
            return Err(StoreError::Conflict(format!(
                "code {} held by an open game",
                game.code
            )));
        }
        inner.games.insert(game.id, game.clone());
        Ok(())
    }

    fn get_game(&self, id: Uuid) -> StoreResult<Option<Game>> {
        Ok(self.lock()?.games.get(&id).cloned())
    }

    fn delete_game(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.lock()?.games.remove(&id).is_some())
    }

    fn find_open_game_by_code(&self, code: &str) -> StoreResult<Option<Game>> {
        let inner = self.lock()?;
        Ok(inner
            .games
            .values()
            .find(|g| !g.is_complete && g.code == code)
            .cloned())
    }

    fn code_in_use(&self, code: &str) -> StoreResult<bool> {
        let inner = self.lock()?;
        Ok(inner
            .games
            .values()
            .any(|g| !g.is_complete && g.code == code))
    }

    fn active_games(&self) -> StoreResult<Vec<Game>> {
        let inner = self.lock()?;
        let mut games: Vec<Game> = inner
            .games
            .values()
            .filter(|g| !g.is_complete)
            .cloned()
            .collect();
        games.sort_by_key(|g| (g.created_at_ms, g.id));
        Ok(games)
    }

    fn games_for_user(&self, user_id: &str) -> StoreResult<Vec<Game>> {
        let inner = self.lock()?;
        let mut games: Vec<Game> = inner
            .games
            .values()
            .filter(|g| {
                g.creator == user_id
                    || inner
                        .participants
                        .values()
                        .any(|p| p.game_id == g.id && p.user_id == user_id)
            })
            .cloned()
            .collect();
        games.sort_by_key(|g| (std::cmp::Reverse(g.created_at_ms), g.id));
        Ok(games)
    }

    fn update_game_value(&self, id: Uuid, value: f64) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        match inner.games.get_mut(&id) {
            Some(game) if !game.is_complete => {
                game.current_value = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn complete_game(
        &self,
        id: Uuid,
        completed_at_ms: u64,
        final_value: f64,
    ) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        match inner.games.get_mut(&id) {
            Some(game) if !game.is_complete => {
                game.is_complete = true;
                game.completed_at_ms = Some(completed_at_ms);
                game.final_value = Some(final_value);
                game.current_value = final_value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn increment_participant_count(&self, game_id: Uuid) -> StoreResult<u32> {
        let mut inner = self.lock()?;
        let game = inner
            .games
            .get_mut(&game_id)
            .ok_or_else(|| StoreError::Backend(format!("game {game_id} missing")))?;
        game.participant_count += 1;
        Ok(game.participant_count)
    }

    fn insert_participant(&self, participant: &Participant) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.participants.contains_key(&participant.id) {
            return Err(StoreError::Conflict(format!(
                "participant {} exists",
                participant.id
            )));
        }
        if inner
            .participants
            .values()
            .any(|p| p.game_id == participant.game_id && p.user_id == participant.user_id)
        {
            return Err(StoreError::Conflict(format!(
                "user already in game {}",
                participant.game_id
            )));
        }
        inner.participants.insert(participant.id, participant.clone());
        Ok(())
    }

    fn get_participant(&self, game_id: Uuid, user_id: &str) -> StoreResult<Option<Participant>> {
        let inner = self.lock()?;
        Ok(inner
            .participants
            .values()
            .find(|p| p.game_id == game_id && p.user_id == user_id)
            .cloned())
    }

    fn participants_for_game(&self, game_id: Uuid) -> StoreResult<Vec<Participant>> {
        let inner = self.lock()?;
        let mut participants: Vec<Participant> = inner
            .participants
            .values()
            .filter(|p| p.game_id == game_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| (p.joined_at_ms, p.id));
        Ok(participants)
    }

    fn delete_participant(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.lock()?.participants.remove(&id).is_some())
    }

    fn update_participant_value(&self, id: Uuid, value: f64) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        match inner.participants.get_mut(&id) {
            Some(participant) => {
                participant.current_value = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn begin_settlement_run(
        &self,
        now_ms: u64,
        stale_after_ms: u64,
    ) -> StoreResult<Option<SettlementLease>> {
        let mut inner = self.lock()?;
        let lease = &mut inner.lease;
        let in_flight = lease.started_at_ms > lease.finished_at_ms;
        if in_flight && now_ms.saturating_sub(lease.started_at_ms) < stale_after_ms {
            return Ok(None);
        }
        let prior = lease.clone();
        lease.started_at_ms = now_ms;
        Ok(Some(prior))
    }

    fn finish_settlement_run(&self, now_ms: u64) -> StoreResult<u64> {
        let mut inner = self.lock()?;
        inner.lease.finished_at_ms = now_ms;
        inner.lease.total_runs += 1;
        Ok(inner.lease.total_runs)
    }

    fn append_value_history(&self, entry: &ValueHistoryEntry) -> StoreResult<()> {
        self.lock()?.history.push(entry.clone());
        Ok(())
    }

    fn value_history(&self, game_id: Uuid) -> StoreResult<Vec<ValueHistoryEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .history
            .iter()
            .filter(|e| e.game_id == game_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{allocation, snapshot_at};
    use moonrace_types::{Ticker, STARTING_BALANCE_USD};

    fn game(id: u128, code: &str, created_at_ms: u64) -> Game {
        Game::open(
            Uuid::from_u128(id),
            code.to_string(),
            format!("creator-{id}"),
            30,
            STARTING_BALANCE_USD,
            allocation(&[(Ticker::BTC, 10)]),
            snapshot_at(created_at_ms),
            created_at_ms,
        )
    }

    #[test]
    fn test_open_code_collision_is_a_conflict() {
        let store = MemoryStore::new();
        store.insert_game(&game(1, "ABCD", 10)).unwrap();
        let err = store.insert_game(&game(2, "ABCD", 20)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_completed_game_releases_its_code() {
        let store = MemoryStore::new();
        store.insert_game(&game(1, "ABCD", 10)).unwrap();
        assert!(store.code_in_use("ABCD").unwrap());

        assert!(store
            .complete_game(Uuid::from_u128(1), 100, STARTING_BALANCE_USD)
            .unwrap());
        assert!(!store.code_in_use("ABCD").unwrap());
        assert!(store.find_open_game_by_code("ABCD").unwrap().is_none());
        // A new open game can reuse it.
        store.insert_game(&game(2, "ABCD", 200)).unwrap();
    }

    #[test]
    fn test_complete_game_is_one_way() {
        let store = MemoryStore::new();
        store.insert_game(&game(1, "ABCD", 10)).unwrap();
        let id = Uuid::from_u128(1);

        assert!(store.complete_game(id, 100, 1.0).unwrap());
        // Second completion and later value writes are refused.
        assert!(!store.complete_game(id, 200, 2.0).unwrap());
        assert!(!store.update_game_value(id, 3.0).unwrap());

        let stored = store.get_game(id).unwrap().unwrap();
        assert_eq!(stored.completed_at_ms, Some(100));
        assert_eq!(stored.final_value, Some(1.0));
        assert_eq!(stored.current_value, 1.0);
    }

    #[test]
    fn test_increment_participant_count() {
        let store = MemoryStore::new();
        store.insert_game(&game(1, "ABCD", 10)).unwrap();
        let id = Uuid::from_u128(1);

        assert_eq!(store.increment_participant_count(id).unwrap(), 2);
        assert_eq!(store.increment_participant_count(id).unwrap(), 3);
        assert!(store
            .increment_participant_count(Uuid::from_u128(9))
            .is_err());
    }

    #[test]
    fn test_duplicate_participant_is_a_conflict() {
        let store = MemoryStore::new();
        store.insert_game(&game(1, "ABCD", 10)).unwrap();
        let p = Participant::new(
            Uuid::from_u128(11),
            Uuid::from_u128(1),
            "user-a".to_string(),
            allocation(&[(Ticker::ETH, 10)]),
            STARTING_BALANCE_USD,
            20,
            false,
        );
        store.insert_participant(&p).unwrap();

        let mut again = p.clone();
        again.id = Uuid::from_u128(12);
        let err = store.insert_participant(&again).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_lease_blocks_until_finished_or_stale() {
        let store = MemoryStore::new();
        let prior = store.begin_settlement_run(1_000, 500).unwrap();
        assert_eq!(prior, Some(SettlementLease::default()));

        // In flight and fresh: refused.
        assert_eq!(store.begin_settlement_run(1_200, 500).unwrap(), None);

        // Finished: next run acquires and sees the counted run.
        assert_eq!(store.finish_settlement_run(1_300).unwrap(), 1);
        let lease = store.begin_settlement_run(1_400, 500).unwrap().unwrap();
        assert_eq!(lease.total_runs, 1);

        // Abandoned (no finish): reclaimable once stale.
        assert_eq!(store.begin_settlement_run(1_500, 500).unwrap(), None);
        assert!(store.begin_settlement_run(1_900, 500).unwrap().is_some());
    }

    #[test]
    fn test_games_for_user_spans_created_and_joined() {
        let store = MemoryStore::new();
        store.insert_game(&game(1, "AAAA", 10)).unwrap();
        store.insert_game(&game(2, "BBBB", 20)).unwrap();
        let p = Participant::new(
            Uuid::from_u128(11),
            Uuid::from_u128(2),
            "creator-1".to_string(),
            allocation(&[(Ticker::SOL, 10)]),
            STARTING_BALANCE_USD,
            30,
            false,
        );
        store.insert_participant(&p).unwrap();

        let games = store.games_for_user("creator-1").unwrap();
        // Created game 1, joined game 2; newest first.
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].id, Uuid::from_u128(2));
        assert_eq!(games[1].id, Uuid::from_u128(1));
    }
}
