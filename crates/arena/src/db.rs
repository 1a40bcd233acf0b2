//! Postgres-backed `GameStore`.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chess_core::{GameResult, Side, Strength, StrengthMode};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};

use crate::error::ArenaError;
use crate::models::{
    Game, GameId, GameStatus, MatchRecord, MoveRecord, MoverConfig, MoverKind, NewGame,
    PendingMove, TerminationReason,
};
use crate::store::GameStore;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Run the arena schema inline. Safe to repeat.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS arena_games (
    id                   BIGSERIAL PRIMARY KEY,
    status               TEXT NOT NULL DEFAULT 'configured',
    fen                  TEXT NOT NULL,
    side_to_move         TEXT NOT NULL,
    ply_count            INTEGER NOT NULL DEFAULT 0,
    move_interval_ms     BIGINT NOT NULL,
    preview_ms           BIGINT NOT NULL,
    next_action_at       TIMESTAMPTZ,
    last_move            TEXT,
    pending_move         TEXT,
    pending_set_at       TIMESTAMPTZ,
    result               TEXT,
    termination_reason   TEXT,
    initial_position_key TEXT,
    tick_lock            BOOLEAN NOT NULL DEFAULT FALSE,
    tick_lock_at         TIMESTAMPTZ,
    started_at           TIMESTAMPTZ,
    finished_at          TIMESTAMPTZ,
    created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_arena_games_status ON arena_games (status);

CREATE TABLE IF NOT EXISTS arena_mover_configs (
    id             BIGSERIAL PRIMARY KEY,
    game_id        BIGINT NOT NULL REFERENCES arena_games(id) ON DELETE CASCADE,
    side           TEXT NOT NULL,
    kind           TEXT NOT NULL,
    strength_mode  TEXT NOT NULL,
    strength_value INTEGER NOT NULL,
    movetime_ms    BIGINT NOT NULL,
    engine_options JSONB NOT NULL DEFAULT '{}'::jsonb,
    UNIQUE(game_id, side)
);

-- Append-only move log, one row per ply
CREATE TABLE IF NOT EXISTS arena_moves (
    id                 BIGSERIAL PRIMARY KEY,
    game_id            BIGINT NOT NULL REFERENCES arena_games(id) ON DELETE CASCADE,
    ply_index          INTEGER NOT NULL,
    uci                TEXT NOT NULL,
    fen_after          TEXT NOT NULL,
    position_key_after TEXT NOT NULL,
    is_check           BOOLEAN NOT NULL DEFAULT FALSE,
    created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(game_id, ply_index)
);

CREATE INDEX IF NOT EXISTS idx_arena_moves_key
    ON arena_moves (game_id, position_key_after);

CREATE TABLE IF NOT EXISTS arena_match_records (
    id                   BIGSERIAL PRIMARY KEY,
    game_id              BIGINT NOT NULL UNIQUE REFERENCES arena_games(id) ON DELETE CASCADE,
    result               TEXT NOT NULL,
    termination_reason   TEXT NOT NULL,
    white_strength_mode  TEXT NOT NULL,
    white_strength_value INTEGER NOT NULL,
    black_strength_mode  TEXT NOT NULL,
    black_strength_value INTEGER NOT NULL,
    move_interval_ms     BIGINT NOT NULL,
    finished_at          TIMESTAMPTZ NOT NULL
);
"#;

const GAME_COLUMNS: &str = "id, status, fen, side_to_move, ply_count, move_interval_ms, \
    preview_ms, next_action_at, last_move, pending_move, pending_set_at, result, \
    termination_reason, initial_position_key, tick_lock, tick_lock_at, started_at, \
    finished_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct GameRow {
    id: i64,
    status: String,
    fen: String,
    side_to_move: String,
    ply_count: i32,
    move_interval_ms: i64,
    preview_ms: i64,
    next_action_at: Option<DateTime<Utc>>,
    last_move: Option<String>,
    pending_move: Option<String>,
    pending_set_at: Option<DateTime<Utc>>,
    result: Option<String>,
    termination_reason: Option<String>,
    initial_position_key: Option<String>,
    tick_lock: bool,
    tick_lock_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MoverRow {
    side: String,
    kind: String,
    strength_mode: String,
    strength_value: i32,
    movetime_ms: i64,
    engine_options: JsonValue,
}

#[derive(sqlx::FromRow)]
struct MoveRow {
    game_id: i64,
    ply_index: i32,
    uci: String,
    fen_after: String,
    position_key_after: String,
    is_check: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    game_id: i64,
    result: String,
    termination_reason: String,
    white_strength_mode: String,
    white_strength_value: i32,
    black_strength_mode: String,
    black_strength_value: i32,
    move_interval_ms: i64,
    finished_at: DateTime<Utc>,
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T, ArenaError> {
    value.parse().map_err(ArenaError::Storage)
}

fn to_u32(value: i64, column: &str) -> Result<u32, ArenaError> {
    u32::try_from(value).map_err(|_| ArenaError::Storage(format!("{column} out of range: {value}")))
}

fn strength(mode: &str, value: i32) -> Result<Strength, ArenaError> {
    let mode: StrengthMode = parse_column(mode)?;
    Strength::new(mode, to_u32(i64::from(value), "strength_value")?).map_err(ArenaError::Storage)
}

impl TryFrom<GameRow> for Game {
    type Error = ArenaError;

    fn try_from(row: GameRow) -> Result<Self, Self::Error> {
        let pending = match (row.pending_move, row.pending_set_at) {
            (Some(uci), Some(set_at)) => Some(PendingMove { uci, set_at }),
            _ => None,
        };
        Ok(Game {
            id: row.id,
            status: parse_column(&row.status)?,
            fen: row.fen,
            side_to_move: parse_column(&row.side_to_move)?,
            ply_count: to_u32(i64::from(row.ply_count), "ply_count")?,
            move_interval_ms: to_u32(row.move_interval_ms, "move_interval_ms")?,
            preview_ms: to_u32(row.preview_ms, "preview_ms")?,
            next_action_at: row.next_action_at,
            last_move: row.last_move,
            pending,
            result: row.result.as_deref().map(parse_column::<GameResult>).transpose()?,
            termination_reason: row
                .termination_reason
                .as_deref()
                .map(parse_column::<TerminationReason>)
                .transpose()?,
            initial_position_key: row.initial_position_key,
            tick_lock: row.tick_lock,
            tick_lock_at: row.tick_lock_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<MoverRow> for MoverConfig {
    type Error = ArenaError;

    fn try_from(row: MoverRow) -> Result<Self, Self::Error> {
        let engine_options: BTreeMap<String, String> = serde_json::from_value(row.engine_options)?;
        Ok(MoverConfig {
            side: parse_column::<Side>(&row.side)?,
            kind: parse_column::<MoverKind>(&row.kind)?,
            strength: strength(&row.strength_mode, row.strength_value)?,
            movetime_ms: to_u32(row.movetime_ms, "movetime_ms")?,
            engine_options,
        })
    }
}

impl TryFrom<MoveRow> for MoveRecord {
    type Error = ArenaError;

    fn try_from(row: MoveRow) -> Result<Self, Self::Error> {
        Ok(MoveRecord {
            game_id: row.game_id,
            ply_index: to_u32(i64::from(row.ply_index), "ply_index")?,
            uci: row.uci,
            fen_after: row.fen_after,
            position_key_after: row.position_key_after,
            is_check: row.is_check,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<MatchRow> for MatchRecord {
    type Error = ArenaError;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        Ok(MatchRecord {
            game_id: row.game_id,
            result: parse_column(&row.result)?,
            termination_reason: parse_column(&row.termination_reason)?,
            white_strength: strength(&row.white_strength_mode, row.white_strength_value)?,
            black_strength: strength(&row.black_strength_mode, row.black_strength_value)?,
            move_interval_ms: to_u32(row.move_interval_ms, "move_interval_ms")?,
            finished_at: row.finished_at,
        })
    }
}

/// Postgres keeps microseconds, so lock timestamps are truncated before
/// they are written or compared.
fn lock_time(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

async fn update_game(conn: &mut PgConnection, game: &Game) -> Result<(), ArenaError> {
    let result = sqlx::query(
        r#"UPDATE arena_games SET
            status = $2,
            fen = $3,
            side_to_move = $4,
            ply_count = $5,
            move_interval_ms = $6,
            preview_ms = $7,
            next_action_at = $8,
            last_move = $9,
            pending_move = $10,
            pending_set_at = $11,
            result = $12,
            termination_reason = $13,
            initial_position_key = $14,
            started_at = $15,
            finished_at = $16,
            updated_at = $17
        WHERE id = $1"#,
    )
    .bind(game.id)
    .bind(game.status.as_str())
    .bind(&game.fen)
    .bind(game.side_to_move.as_str())
    .bind(game.ply_count as i32)
    .bind(i64::from(game.move_interval_ms))
    .bind(i64::from(game.preview_ms))
    .bind(game.next_action_at)
    .bind(&game.last_move)
    .bind(game.pending.as_ref().map(|p| p.uci.clone()))
    .bind(game.pending.as_ref().map(|p| p.set_at))
    .bind(game.result.map(|r| r.as_str()))
    .bind(game.termination_reason.map(|r| r.as_str()))
    .bind(&game.initial_position_key)
    .bind(game.started_at)
    .bind(game.finished_at)
    .bind(game.updated_at)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ArenaError::GameNotFound(game.id));
    }
    Ok(())
}

async fn insert_next_move(conn: &mut PgConnection, record: &MoveRecord) -> Result<(), ArenaError> {
    // Only inserts when the ply directly follows the last stored one
    let result = sqlx::query(
        r#"INSERT INTO arena_moves
            (game_id, ply_index, uci, fen_after, position_key_after, is_check, created_at)
        SELECT $1, $2, $3, $4, $5, $6, $7
        WHERE (SELECT COALESCE(MAX(ply_index), 0) FROM arena_moves WHERE game_id = $1) = $2 - 1"#,
    )
    .bind(record.game_id)
    .bind(record.ply_index as i32)
    .bind(&record.uci)
    .bind(&record.fen_after)
    .bind(&record.position_key_after)
    .bind(record.is_check)
    .bind(record.created_at)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ArenaError::Storage(format!(
            "game {} ply {} does not follow the last stored ply",
            record.game_id, record.ply_index
        )));
    }
    Ok(())
}

async fn upsert_match(conn: &mut PgConnection, record: &MatchRecord) -> Result<(), ArenaError> {
    sqlx::query(
        r#"INSERT INTO arena_match_records (
            game_id, result, termination_reason,
            white_strength_mode, white_strength_value,
            black_strength_mode, black_strength_value,
            move_interval_ms, finished_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (game_id) DO UPDATE SET
            result = EXCLUDED.result,
            termination_reason = EXCLUDED.termination_reason,
            white_strength_mode = EXCLUDED.white_strength_mode,
            white_strength_value = EXCLUDED.white_strength_value,
            black_strength_mode = EXCLUDED.black_strength_mode,
            black_strength_value = EXCLUDED.black_strength_value,
            move_interval_ms = EXCLUDED.move_interval_ms,
            finished_at = EXCLUDED.finished_at"#,
    )
    .bind(record.game_id)
    .bind(record.result.as_str())
    .bind(record.termination_reason.as_str())
    .bind(record.white_strength.mode().as_str())
    .bind(record.white_strength.value() as i32)
    .bind(record.black_strength.mode().as_str())
    .bind(record.black_strength.value() as i32)
    .bind(i64::from(record.move_interval_ms))
    .bind(record.finished_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, ArenaError> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl GameStore for PgStore {
    async fn create_game(&self, new: &NewGame, now: DateTime<Utc>) -> Result<Game, ArenaError> {
        let side = chess_core::side_to_move(&new.fen)?;
        let row = sqlx::query_as::<_, GameRow>(&format!(
            r#"INSERT INTO arena_games (fen, side_to_move, move_interval_ms, preview_ms, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $5)
               RETURNING {GAME_COLUMNS}"#
        ))
        .bind(&new.fen)
        .bind(side.as_str())
        .bind(i64::from(new.move_interval_ms))
        .bind(i64::from(new.preview_ms))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn load_game(&self, id: GameId) -> Result<Option<Game>, ArenaError> {
        let row = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM arena_games WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Game::try_from).transpose()
    }

    async fn save_game(&self, game: &Game) -> Result<(), ArenaError> {
        let mut conn = self.pool.acquire().await?;
        update_game(&mut *conn, game).await
    }

    async fn try_acquire_tick_lock(
        &self,
        id: GameId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, ArenaError> {
        let result = sqlx::query(
            r#"UPDATE arena_games SET tick_lock = TRUE, tick_lock_at = $2
               WHERE id = $1
                 AND (tick_lock = FALSE OR tick_lock_at IS NULL OR tick_lock_at < $3)"#,
        )
        .bind(id)
        .bind(lock_time(now))
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM arena_games WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if exists.0 {
            Ok(false)
        } else {
            Err(ArenaError::GameNotFound(id))
        }
    }

    async fn release_tick_lock(
        &self,
        id: GameId,
        acquired_at: DateTime<Utc>,
    ) -> Result<(), ArenaError> {
        sqlx::query(
            r#"UPDATE arena_games SET tick_lock = FALSE, tick_lock_at = NULL
               WHERE id = $1 AND tick_lock_at = $2"#,
        )
        .bind(id)
        .bind(lock_time(acquired_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mover_config(&self, id: GameId, side: Side) -> Result<Option<MoverConfig>, ArenaError> {
        let row = sqlx::query_as::<_, MoverRow>(
            r#"SELECT side, kind, strength_mode, strength_value, movetime_ms, engine_options
               FROM arena_mover_configs WHERE game_id = $1 AND side = $2"#,
        )
        .bind(id)
        .bind(side.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(MoverConfig::try_from).transpose()
    }

    async fn save_mover_config(&self, id: GameId, cfg: &MoverConfig) -> Result<(), ArenaError> {
        let options = serde_json::to_value(&cfg.engine_options)?;
        sqlx::query(
            r#"INSERT INTO arena_mover_configs
                (game_id, side, kind, strength_mode, strength_value, movetime_ms, engine_options)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (game_id, side) DO UPDATE SET
                kind = EXCLUDED.kind,
                strength_mode = EXCLUDED.strength_mode,
                strength_value = EXCLUDED.strength_value,
                movetime_ms = EXCLUDED.movetime_ms,
                engine_options = EXCLUDED.engine_options"#,
        )
        .bind(id)
        .bind(cfg.side.as_str())
        .bind(cfg.kind.as_str())
        .bind(cfg.strength.mode().as_str())
        .bind(cfg.strength.value() as i32)
        .bind(i64::from(cfg.movetime_ms))
        .bind(options)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn commit_move(&self, record: &MoveRecord, game: &Game) -> Result<(), ArenaError> {
        let mut tx = self.pool.begin().await?;
        insert_next_move(&mut *tx, record).await?;
        update_game(&mut *tx, game).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn finish_game(
        &self,
        game: &Game,
        last_move: Option<&MoveRecord>,
        record: &MatchRecord,
    ) -> Result<(), ArenaError> {
        let mut tx = self.pool.begin().await?;
        if let Some(last) = last_move {
            insert_next_move(&mut *tx, last).await?;
        }
        update_game(&mut *tx, game).await?;
        upsert_match(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_moves(&self, id: GameId) -> Result<Vec<MoveRecord>, ArenaError> {
        let rows = sqlx::query_as::<_, MoveRow>(
            r#"SELECT game_id, ply_index, uci, fen_after, position_key_after, is_check, created_at
               FROM arena_moves WHERE game_id = $1 ORDER BY ply_index"#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MoveRecord::try_from).collect()
    }

    async fn count_position_key(&self, id: GameId, key: &str) -> Result<u32, ArenaError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM arena_moves WHERE game_id = $1 AND position_key_after = $2",
        )
        .bind(id)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        to_u32(row.0, "count")
    }

    async fn match_record(&self, id: GameId) -> Result<Option<MatchRecord>, ArenaError> {
        let row = sqlx::query_as::<_, MatchRow>(
            r#"SELECT game_id, result, termination_reason,
                      white_strength_mode, white_strength_value,
                      black_strength_mode, black_strength_value,
                      move_interval_ms, finished_at
               FROM arena_match_records WHERE game_id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MatchRecord::try_from).transpose()
    }

    async fn running_game_ids(&self) -> Result<Vec<GameId>, ArenaError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM arena_games WHERE status = $1 ORDER BY id")
            .bind(GameStatus::Running.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
