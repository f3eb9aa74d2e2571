use moonrace_types::{Game, Participant, PriceSnapshot, ValueHistoryEntry};
use rusqlite::{
    params,
    types::Type,
    Connection, OptionalExtension, Row, TransactionBehavior,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{SettlementLease, Store, StoreError, StoreResult};

const SCHEMA: &str = "PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS price_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fetched_at_ms INTEGER NOT NULL,
    snapshot TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_price_snapshots_fetched
    ON price_snapshots(fetched_at_ms DESC);

CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL,
    creator TEXT NOT NULL,
    duration_days INTEGER NOT NULL,
    starting_balance REAL NOT NULL,
    allocation TEXT NOT NULL,
    entry_prices TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    ends_at_ms INTEGER NOT NULL,
    completed_at_ms INTEGER,
    participant_count INTEGER NOT NULL,
    is_complete INTEGER NOT NULL DEFAULT 0,
    current_value REAL NOT NULL,
    final_value REAL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_games_open_code
    ON games(code) WHERE is_complete = 0;
CREATE INDEX IF NOT EXISTS idx_games_active ON games(is_complete, created_at_ms);
CREATE INDEX IF NOT EXISTS idx_games_creator ON games(creator);

CREATE TABLE IF NOT EXISTS participants (
    id TEXT PRIMARY KEY,
    game_id TEXT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    allocation TEXT NOT NULL,
    starting_value REAL NOT NULL,
    current_value REAL NOT NULL,
    joined_at_ms INTEGER NOT NULL,
    is_original_creator INTEGER NOT NULL DEFAULT 0,
    UNIQUE (game_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_participants_game
    ON participants(game_id, joined_at_ms);
CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id);

CREATE TABLE IF NOT EXISTS settlement_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    started_at_ms INTEGER NOT NULL DEFAULT 0,
    finished_at_ms INTEGER NOT NULL DEFAULT 0,
    total_runs INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO settlement_lease (id) VALUES (1);

CREATE TABLE IF NOT EXISTS value_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT NOT NULL,
    participant_id TEXT,
    value REAL NOT NULL,
    prices TEXT,
    recorded_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_value_history_game ON value_history(game_id, id);
";

const GAME_COLUMNS: &str = "id, code, creator, duration_days, starting_balance, \
     allocation, entry_prices, created_at_ms, ends_at_ms, completed_at_ms, \
     participant_count, is_complete, current_value, final_value";

/// SQLite-backed store. Open games hold their code through a partial unique
/// index and joins through a (game_id, user_id) constraint, so concurrent
/// writers surface [`StoreError::Conflict`] instead of corrupting state.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".to_string()))
    }
}

impl Store for SqliteStore {
    fn latest_prices(&self) -> StoreResult<Option<PriceSnapshot>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT snapshot FROM price_snapshots
             ORDER BY fetched_at_ms DESC, id DESC LIMIT 1",
            [],
            |row| json_column(row, 0),
        )
        .optional()
        .map_err(store_err)
    }

    fn put_prices(&self, snapshot: &PriceSnapshot) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO price_snapshots (fetched_at_ms, snapshot) VALUES (?1, ?2)",
            params![snapshot.fetched_at_ms, to_json(snapshot)?],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn insert_game(&self, game: &Game) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO games (id, code, creator, duration_days, starting_balance,
                 allocation, entry_prices, created_at_ms, ends_at_ms, completed_at_ms,
                 participant_count, is_complete, current_value, final_value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                game.id.to_string(),
                game.code,
                game.creator,
                game.duration_days,
                game.starting_balance,
                to_json(&game.allocation)?,
                to_json(&game.entry_prices)?,
                game.created_at_ms,
                game.ends_at_ms,
                game.completed_at_ms,
                game.participant_count,
                game.is_complete,
                game.current_value,
                game.final_value,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn get_game(&self, id: Uuid) -> StoreResult<Option<Game>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"),
            params![id.to_string()],
            game_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    fn delete_game(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM games WHERE id = ?1", params![id.to_string()])
            .map_err(store_err)?;
        Ok(affected > 0)
    }

    fn find_open_game_by_code(&self, code: &str) -> StoreResult<Option<Game>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {GAME_COLUMNS} FROM games WHERE code = ?1 AND is_complete = 0"),
            params![code],
            game_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    fn code_in_use(&self, code: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT 1 FROM games WHERE code = ?1 AND is_complete = 0",
            params![code],
            |_| Ok(()),
        )
        .optional()
        .map_err(store_err)
        .map(|found| found.is_some())
    }

    fn active_games(&self) -> StoreResult<Vec<Game>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {GAME_COLUMNS} FROM games WHERE is_complete = 0
                 ORDER BY created_at_ms, id"
            ))
            .map_err(store_err)?;
        let rows = stmt.query_map([], game_from_row).map_err(store_err)?;
        collect_rows(rows)
    }

    fn games_for_user(&self, user_id: &str) -> StoreResult<Vec<Game>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {GAME_COLUMNS} FROM games
                 WHERE creator = ?1
                    OR id IN (SELECT game_id FROM participants WHERE user_id = ?1)
                 ORDER BY created_at_ms DESC, id"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![user_id], game_from_row)
            .map_err(store_err)?;
        collect_rows(rows)
    }

    fn update_game_value(&self, id: Uuid, value: f64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE games SET current_value = ?2 WHERE id = ?1 AND is_complete = 0",
                params![id.to_string(), value],
            )
            .map_err(store_err)?;
        Ok(affected > 0)
    }

    fn complete_game(
        &self,
        id: Uuid,
        completed_at_ms: u64,
        final_value: f64,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE games
                 SET is_complete = 1, completed_at_ms = ?2, final_value = ?3,
                     current_value = ?3
                 WHERE id = ?1 AND is_complete = 0",
                params![id.to_string(), completed_at_ms, final_value],
            )
            .map_err(store_err)?;
        Ok(affected > 0)
    }

    fn increment_participant_count(&self, game_id: Uuid) -> StoreResult<u32> {
        let conn = self.lock()?;
        conn.query_row(
            "UPDATE games SET participant_count = participant_count + 1
             WHERE id = ?1 RETURNING participant_count",
            params![game_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_err)?
        .ok_or_else(|| StoreError::Backend(format!("game {game_id} missing")))
    }

    fn insert_participant(&self, participant: &Participant) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO participants (id, game_id, user_id, allocation,
                 starting_value, current_value, joined_at_ms, is_original_creator)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                participant.id.to_string(),
                participant.game_id.to_string(),
                participant.user_id,
                to_json(&participant.allocation)?,
                participant.starting_value,
                participant.current_value,
                participant.joined_at_ms,
                participant.is_original_creator,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn get_participant(&self, game_id: Uuid, user_id: &str) -> StoreResult<Option<Participant>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, game_id, user_id, allocation, starting_value, current_value,
                 joined_at_ms, is_original_creator
             FROM participants WHERE game_id = ?1 AND user_id = ?2",
            params![game_id.to_string(), user_id],
            participant_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    fn participants_for_game(&self, game_id: Uuid) -> StoreResult<Vec<Participant>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, game_id, user_id, allocation, starting_value, current_value,
                     joined_at_ms, is_original_creator
                 FROM participants WHERE game_id = ?1
                 ORDER BY joined_at_ms, id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![game_id.to_string()], participant_from_row)
            .map_err(store_err)?;
        collect_rows(rows)
    }

    fn delete_participant(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "DELETE FROM participants WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(store_err)?;
        Ok(affected > 0)
    }

    fn update_participant_value(&self, id: Uuid, value: f64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE participants SET current_value = ?2 WHERE id = ?1",
                params![id.to_string(), value],
            )
            .map_err(store_err)?;
        Ok(affected > 0)
    }

    fn begin_settlement_run(
        &self,
        now_ms: u64,
        stale_after_ms: u64,
    ) -> StoreResult<Option<SettlementLease>> {
        let mut conn = self.lock()?;
        // Immediate transaction so the read-check-write is atomic across
        // processes sharing the database file.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;
        let lease = tx
            .query_row(
                "SELECT started_at_ms, finished_at_ms, total_runs
                 FROM settlement_lease WHERE id = 1",
                [],
                |row| {
                    Ok(SettlementLease {
                        started_at_ms: row.get(0)?,
                        finished_at_ms: row.get(1)?,
                        total_runs: row.get(2)?,
                    })
                },
            )
            .map_err(store_err)?;
        let in_flight = lease.started_at_ms > lease.finished_at_ms;
        if in_flight && now_ms.saturating_sub(lease.started_at_ms) < stale_after_ms {
            return Ok(None);
        }
        tx.execute(
            "UPDATE settlement_lease SET started_at_ms = ?1 WHERE id = 1",
            params![now_ms],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(Some(lease))
    }

    fn finish_settlement_run(&self, now_ms: u64) -> StoreResult<u64> {
        let conn = self.lock()?;
        conn.query_row(
            "UPDATE settlement_lease
             SET finished_at_ms = ?1, total_runs = total_runs + 1
             WHERE id = 1 RETURNING total_runs",
            params![now_ms],
            |row| row.get(0),
        )
        .map_err(store_err)
    }

    fn append_value_history(&self, entry: &ValueHistoryEntry) -> StoreResult<()> {
        let prices = match &entry.prices {
            Some(snapshot) => Some(to_json(snapshot)?),
            None => None,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO value_history (game_id, participant_id, value, prices, recorded_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.game_id.to_string(),
                entry.participant_id.map(|id| id.to_string()),
                entry.value,
                prices,
                entry.recorded_at_ms,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn value_history(&self, game_id: Uuid) -> StoreResult<Vec<ValueHistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT game_id, participant_id, value, prices, recorded_at_ms
                 FROM value_history WHERE game_id = ?1 ORDER BY id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![game_id.to_string()], history_from_row)
            .map_err(store_err)?;
        collect_rows(rows)
    }
}

fn store_err(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            let detail = msg.unwrap_or_else(|| e.to_string());
            match e.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    StoreError::Unavailable(detail)
                }
                rusqlite::ErrorCode::ConstraintViolation => StoreError::Conflict(detail),
                _ => StoreError::Backend(detail),
            }
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|err| StoreError::Backend(format!("encode json: {err}")))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn game_from_row(row: &Row) -> rusqlite::Result<Game> {
    Ok(Game {
        id: uuid_column(row, 0)?,
        code: row.get(1)?,
        creator: row.get(2)?,
        duration_days: row.get(3)?,
        starting_balance: row.get(4)?,
        allocation: json_column(row, 5)?,
        entry_prices: json_column(row, 6)?,
        created_at_ms: row.get(7)?,
        ends_at_ms: row.get(8)?,
        completed_at_ms: row.get(9)?,
        participant_count: row.get(10)?,
        is_complete: row.get(11)?,
        current_value: row.get(12)?,
        final_value: row.get(13)?,
    })
}

fn participant_from_row(row: &Row) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: uuid_column(row, 0)?,
        game_id: uuid_column(row, 1)?,
        user_id: row.get(2)?,
        allocation: json_column(row, 3)?,
        starting_value: row.get(4)?,
        current_value: row.get(5)?,
        joined_at_ms: row.get(6)?,
        is_original_creator: row.get(7)?,
    })
}

fn history_from_row(row: &Row) -> rusqlite::Result<ValueHistoryEntry> {
    let participant_id = match row.get::<_, Option<String>>(1)? {
        Some(raw) => Some(Uuid::parse_str(&raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(err))
        })?),
        None => None,
    };
    let prices = match row.get::<_, Option<String>>(3)? {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err))
        })?),
        None => None,
    };
    Ok(ValueHistoryEntry {
        game_id: uuid_column(row, 0)?,
        participant_id,
        value: row.get(2)?,
        prices,
        recorded_at_ms: row.get(4)?,
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> StoreResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(store_err)?);
    }
    Ok(out)
}
