//! Storage seam for the scheduler, plus an in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chess_core::Side;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::ArenaError;
use crate::models::{
    Game, GameId, GameStatus, MatchRecord, MoveRecord, MoverConfig, NewGame,
};

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn create_game(&self, new: &NewGame, now: DateTime<Utc>) -> Result<Game, ArenaError>;

    async fn load_game(&self, id: GameId) -> Result<Option<Game>, ArenaError>;

    /// Persists everything except the tick lock columns.
    async fn save_game(&self, game: &Game) -> Result<(), ArenaError>;

    /// Takes the tick lock when it is free, unset, or older than `stale_before`.
    async fn try_acquire_tick_lock(
        &self,
        id: GameId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, ArenaError>;

    /// Clears the tick lock only while it is still the one taken at
    /// `acquired_at`, so a holder that went stale leaves its successor's
    /// lock alone.
    async fn release_tick_lock(
        &self,
        id: GameId,
        acquired_at: DateTime<Utc>,
    ) -> Result<(), ArenaError>;

    async fn mover_config(&self, id: GameId, side: Side) -> Result<Option<MoverConfig>, ArenaError>;

    async fn save_mover_config(&self, id: GameId, cfg: &MoverConfig) -> Result<(), ArenaError>;

    /// Appends `record` and saves `game` as one unit. Nothing changes
    /// unless `record.ply_index` directly follows the last stored ply.
    async fn commit_move(&self, record: &MoveRecord, game: &Game) -> Result<(), ArenaError>;

    /// Saves a finished game with its match record, plus the move that
    /// ended it if any, as one unit.
    async fn finish_game(
        &self,
        game: &Game,
        last_move: Option<&MoveRecord>,
        record: &MatchRecord,
    ) -> Result<(), ArenaError>;

    async fn list_moves(&self, id: GameId) -> Result<Vec<MoveRecord>, ArenaError>;

    /// Number of move records whose resulting position has `key`.
    async fn count_position_key(&self, id: GameId, key: &str) -> Result<u32, ArenaError>;

    async fn match_record(&self, id: GameId) -> Result<Option<MatchRecord>, ArenaError>;

    async fn running_game_ids(&self) -> Result<Vec<GameId>, ArenaError>;
}

#[derive(Default)]
struct MemoryState {
    next_id: GameId,
    games: HashMap<GameId, Game>,
    movers: HashMap<(GameId, Side), MoverConfig>,
    moves: HashMap<GameId, Vec<MoveRecord>>,
    match_records: HashMap<GameId, MatchRecord>,
}

impl MemoryState {
    /// Overwrites the stored game, keeping its tick lock columns.
    fn replace_game(&mut self, game: &Game) -> Result<(), ArenaError> {
        let stored = self
            .games
            .get_mut(&game.id)
            .ok_or(ArenaError::GameNotFound(game.id))?;
        let (tick_lock, tick_lock_at) = (stored.tick_lock, stored.tick_lock_at);
        *stored = game.clone();
        stored.tick_lock = tick_lock;
        stored.tick_lock_at = tick_lock_at;
        Ok(())
    }

    fn check_next_ply(&self, record: &MoveRecord) -> Result<(), ArenaError> {
        if !self.games.contains_key(&record.game_id) {
            return Err(ArenaError::GameNotFound(record.game_id));
        }
        let expected = self
            .moves
            .get(&record.game_id)
            .and_then(|moves| moves.last())
            .map_or(1, |m| m.ply_index + 1);
        if record.ply_index != expected {
            return Err(ArenaError::Storage(format!(
                "game {} expected ply {expected}, got {}",
                record.game_id, record.ply_index
            )));
        }
        Ok(())
    }
}

/// Process-local store used when no database is configured, and in tests.
/// Every operation runs under one guard, so multi-part writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn create_game(&self, new: &NewGame, now: DateTime<Utc>) -> Result<Game, ArenaError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        let side_to_move = chess_core::side_to_move(&new.fen)?;
        let game = Game {
            id,
            status: GameStatus::Configured,
            fen: new.fen.clone(),
            side_to_move,
            ply_count: 0,
            move_interval_ms: new.move_interval_ms,
            preview_ms: new.preview_ms,
            next_action_at: None,
            last_move: None,
            pending: None,
            result: None,
            termination_reason: None,
            initial_position_key: None,
            tick_lock: false,
            tick_lock_at: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        state.games.insert(id, game.clone());
        Ok(game)
    }

    async fn load_game(&self, id: GameId) -> Result<Option<Game>, ArenaError> {
        Ok(self.state.lock().await.games.get(&id).cloned())
    }

    async fn save_game(&self, game: &Game) -> Result<(), ArenaError> {
        self.state.lock().await.replace_game(game)
    }

    async fn try_acquire_tick_lock(
        &self,
        id: GameId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, ArenaError> {
        let mut state = self.state.lock().await;
        let game = state.games.get_mut(&id).ok_or(ArenaError::GameNotFound(id))?;
        let free = !game.tick_lock || game.tick_lock_at.map_or(true, |at| at < stale_before);
        if free {
            game.tick_lock = true;
            game.tick_lock_at = Some(now);
        }
        Ok(free)
    }

    async fn release_tick_lock(
        &self,
        id: GameId,
        acquired_at: DateTime<Utc>,
    ) -> Result<(), ArenaError> {
        let mut state = self.state.lock().await;
        let game = state.games.get_mut(&id).ok_or(ArenaError::GameNotFound(id))?;
        if game.tick_lock_at == Some(acquired_at) {
            game.tick_lock = false;
            game.tick_lock_at = None;
        }
        Ok(())
    }

    async fn mover_config(&self, id: GameId, side: Side) -> Result<Option<MoverConfig>, ArenaError> {
        Ok(self.state.lock().await.movers.get(&(id, side)).cloned())
    }

    async fn save_mover_config(&self, id: GameId, cfg: &MoverConfig) -> Result<(), ArenaError> {
        let mut state = self.state.lock().await;
        if !state.games.contains_key(&id) {
            return Err(ArenaError::GameNotFound(id));
        }
        state.movers.insert((id, cfg.side), cfg.clone());
        Ok(())
    }

    async fn commit_move(&self, record: &MoveRecord, game: &Game) -> Result<(), ArenaError> {
        let mut state = self.state.lock().await;
        state.check_next_ply(record)?;
        state.replace_game(game)?;
        state.moves.entry(record.game_id).or_default().push(record.clone());
        Ok(())
    }

    async fn finish_game(
        &self,
        game: &Game,
        last_move: Option<&MoveRecord>,
        record: &MatchRecord,
    ) -> Result<(), ArenaError> {
        let mut state = self.state.lock().await;
        if let Some(last) = last_move {
            state.check_next_ply(last)?;
        }
        state.replace_game(game)?;
        if let Some(last) = last_move {
            state.moves.entry(last.game_id).or_default().push(last.clone());
        }
        state.match_records.insert(record.game_id, record.clone());
        Ok(())
    }

    async fn list_moves(&self, id: GameId) -> Result<Vec<MoveRecord>, ArenaError> {
        Ok(self
            .state
            .lock()
            .await
            .moves
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn count_position_key(&self, id: GameId, key: &str) -> Result<u32, ArenaError> {
        let state = self.state.lock().await;
        let count = state
            .moves
            .get(&id)
            .map_or(0, |moves| moves.iter().filter(|m| m.position_key_after == key).count());
        Ok(count as u32)
    }

    async fn match_record(&self, id: GameId) -> Result<Option<MatchRecord>, ArenaError> {
        Ok(self.state.lock().await.match_records.get(&id).cloned())
    }

    async fn running_game_ids(&self) -> Result<Vec<GameId>, ArenaError> {
        let state = self.state.lock().await;
        let mut ids: Vec<GameId> = state
            .games
            .values()
            .filter(|g| g.status == GameStatus::Running)
            .map(|g| g.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
