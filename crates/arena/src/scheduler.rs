//! Tick-driven game scheduler.
//!
//! Every mutating entry point runs under the per-game tick lock, which is
//! released on every exit path. A tick either proposes a move (the preview
//! phase), commits a previously proposed move once the preview has been
//! shown, or does nothing. Human moves arrive through
//! [`GameScheduler::apply_external_move`] and share the commit path with
//! engine moves.

use std::sync::Arc;

use chess_core::{
    is_insufficient_material, parse_square, side_to_move, ChessPosition, GameResult, Side,
    STARTPOS_FEN,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::error::ArenaError;
use crate::models::{
    Game, GameId, GameStatus, MatchRecord, MoveRecord, MoverConfig, MoverKind, NewGame,
    PendingMove, TerminationReason,
};
use crate::mover::{MoveChoice, Mover, MoverError, Movers};
use crate::store::GameStore;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_plies: u32,
    /// A tick lock older than this is taken over.
    pub lock_stale: Duration,
    /// Budget given to lazily created mover configs.
    pub default_movetime_ms: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_plies: 600,
            lock_stale: Duration::seconds(60),
            default_movetime_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Another tick holds the lock.
    Busy,
    NotRunning,
    /// A move is pending and still being shown.
    Previewing,
    /// Cadence not reached yet.
    Waiting,
    AwaitingHuman,
    Advanced,
    Finished(TerminationReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// True when a move was committed to the position.
    pub advanced: bool,
    pub status: TickStatus,
    pub message: String,
}

impl TickOutcome {
    fn idle(status: TickStatus, message: impl Into<String>) -> Self {
        Self {
            advanced: false,
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotRunning,
    PreviewPending,
    NotHumanTurn,
    IllegalMove,
    InvalidPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalMoveOutcome {
    Applied {
        ply_index: u32,
        termination: Option<TerminationReason>,
    },
    Busy,
    Rejected(RejectReason),
}

/// Where the move being committed came from.
enum MoveSource {
    Mover(Arc<dyn Mover>),
    External,
}

enum Commit {
    Applied {
        ply_index: u32,
        termination: Option<TerminationReason>,
    },
    Forfeited,
}

pub struct GameScheduler {
    store: Arc<dyn GameStore>,
    movers: Movers,
    settings: SchedulerSettings,
}

impl GameScheduler {
    pub fn new(store: Arc<dyn GameStore>, movers: Movers, settings: SchedulerSettings) -> Self {
        Self {
            store,
            movers,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    async fn acquire(&self, id: GameId, now: DateTime<Utc>) -> Result<bool, ArenaError> {
        self.store
            .try_acquire_tick_lock(id, now, now - self.settings.lock_stale)
            .await
    }

    async fn release(&self, id: GameId, acquired_at: DateTime<Utc>) {
        if let Err(e) = self.store.release_tick_lock(id, acquired_at).await {
            error!(game_id = id, error = %e, "Failed to release tick lock");
        }
    }

    async fn acquire_or_busy(&self, id: GameId, now: DateTime<Utc>) -> Result<(), ArenaError> {
        if self.acquire(id, now).await? {
            Ok(())
        } else {
            Err(ArenaError::LockBusy(id))
        }
    }

    async fn load(&self, id: GameId) -> Result<Game, ArenaError> {
        self.store
            .load_game(id)
            .await?
            .ok_or(ArenaError::GameNotFound(id))
    }

    /// The side's config, created with defaults on first use.
    pub async fn mover_config(&self, id: GameId, side: Side) -> Result<MoverConfig, ArenaError> {
        if let Some(cfg) = self.store.mover_config(id, side).await? {
            return Ok(cfg);
        }
        let cfg = MoverConfig::default_for(side, self.settings.default_movetime_ms);
        self.store.save_mover_config(id, &cfg).await?;
        Ok(cfg)
    }

    pub async fn tick(&self, id: GameId) -> Result<TickOutcome, ArenaError> {
        self.tick_at(id, Utc::now()).await
    }

    pub async fn tick_at(&self, id: GameId, now: DateTime<Utc>) -> Result<TickOutcome, ArenaError> {
        if !self.acquire(id, now).await? {
            debug!(game_id = id, "Tick skipped, lock busy");
            return Ok(TickOutcome::idle(TickStatus::Busy, "busy"));
        }
        let result = self.tick_locked(id, now).await;
        self.release(id, now).await;
        result
    }

    async fn tick_locked(&self, id: GameId, now: DateTime<Utc>) -> Result<TickOutcome, ArenaError> {
        let mut game = self.load(id).await?;
        if !game.is_running() {
            return Ok(TickOutcome::idle(TickStatus::NotRunning, "game is not running"));
        }

        if let Some(pending) = game.pending.clone() {
            if !game.preview_elapsed(now) {
                return Ok(TickOutcome::idle(TickStatus::Previewing, "preview still showing"));
            }
            let Some(pos) = self.position_or_finish(&mut game, now).await? else {
                return Ok(finished_outcome(false, TerminationReason::Unknown));
            };
            let cfg = self.mover_config(id, pos.side_to_move()).await?;
            let Some(mover) = self.movers.resolve(cfg.kind) else {
                // side was switched to a human while a move was pending
                game.clear_pending();
                game.updated_at = now;
                self.store.save_game(&game).await?;
                return Ok(TickOutcome::idle(TickStatus::AwaitingHuman, "awaiting human move"));
            };
            return match self
                .apply_move(&mut game, &pos, MoveSource::Mover(mover), &pending.uci, now)
                .await?
            {
                Commit::Applied {
                    ply_index,
                    termination: None,
                } => Ok(TickOutcome {
                    advanced: true,
                    status: TickStatus::Advanced,
                    message: format!("ply {ply_index}: {}", pending.uci),
                }),
                Commit::Applied {
                    termination: Some(reason),
                    ..
                } => Ok(finished_outcome(true, reason)),
                Commit::Forfeited => Ok(finished_outcome(false, TerminationReason::Forfeit)),
            };
        }

        if game.next_action_at.is_some_and(|at| now < at) {
            return Ok(TickOutcome::idle(TickStatus::Waiting, "waiting for cadence"));
        }

        let Some(pos) = self.position_or_finish(&mut game, now).await? else {
            return Ok(finished_outcome(false, TerminationReason::Unknown));
        };
        let side = pos.side_to_move();
        let cfg = self.mover_config(id, side).await?;
        let Some(mover) = self.movers.resolve(cfg.kind) else {
            return Ok(TickOutcome::idle(TickStatus::AwaitingHuman, "awaiting human move"));
        };

        match mover.choose_move(&game.fen, &cfg).await {
            Err(MoverError::InvalidPosition(e)) => {
                warn!(game_id = id, side = %side, error = %e, "Mover rejected the position, ending game");
                self.finish(&mut game, None, GameResult::Draw, TerminationReason::Unknown, now)
                    .await?;
                Ok(finished_outcome(false, TerminationReason::Unknown))
            }
            Err(e) => {
                warn!(game_id = id, side = %side, error = %e, "Mover failed, forfeiting");
                self.finish(&mut game, None, side.opponent().wins(), TerminationReason::Forfeit, now)
                    .await?;
                Ok(finished_outcome(false, TerminationReason::Forfeit))
            }
            Ok(MoveChoice::NoLegalMove) => {
                let reason = self.resolve_no_legal_move(&mut game, &pos, now).await?;
                Ok(finished_outcome(false, reason))
            }
            Ok(MoveChoice::Move(uci)) => {
                debug!(game_id = id, side = %side, uci = %uci, "Move proposed");
                game.pending = Some(PendingMove {
                    uci: uci.clone(),
                    set_at: now,
                });
                game.updated_at = now;
                self.store.save_game(&game).await?;
                Ok(TickOutcome::idle(TickStatus::Previewing, format!("previewing {uci}")))
            }
        }
    }

    /// The stored position, fully validated. A position that cannot be
    /// played ends the game as a draw and yields `None`.
    async fn position_or_finish(
        &self,
        game: &mut Game,
        now: DateTime<Utc>,
    ) -> Result<Option<ChessPosition>, ArenaError> {
        match ChessPosition::parse(&game.fen) {
            Ok(pos) => Ok(Some(pos)),
            Err(e) => {
                warn!(game_id = game.id, error = %e, "Unplayable position, ending game");
                self.finish(game, None, GameResult::Draw, TerminationReason::Unknown, now)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Checkmate when the side to move is in check, otherwise stalemate.
    async fn resolve_no_legal_move(
        &self,
        game: &mut Game,
        pos: &ChessPosition,
        now: DateTime<Utc>,
    ) -> Result<TerminationReason, ArenaError> {
        let (result, reason) = if pos.is_check() {
            (pos.side_to_move().opponent().wins(), TerminationReason::Checkmate)
        } else {
            (GameResult::Draw, TerminationReason::Stalemate)
        };
        self.finish(game, None, result, reason, now).await?;
        Ok(reason)
    }

    /// Commits `uci`, played from `before`, and evaluates the end-of-game
    /// rules. The move record and the updated game are stored together.
    /// Shared by engine ticks and external moves.
    async fn apply_move(
        &self,
        game: &mut Game,
        before: &ChessPosition,
        source: MoveSource,
        uci: &str,
        now: DateTime<Utc>,
    ) -> Result<Commit, ArenaError> {
        let side = before.side_to_move();
        let applier = match &source {
            MoveSource::Mover(mover) => mover.clone(),
            MoveSource::External => self.movers.embedded.clone(),
        };

        let inspection = match applier.apply_and_inspect(&game.fen, uci).await {
            Ok(inspection) => inspection,
            Err(e) => {
                warn!(game_id = game.id, side = %side, uci, error = %e, "Apply failed, forfeiting");
                self.finish(game, None, side.opponent().wins(), TerminationReason::Forfeit, now)
                    .await?;
                return Ok(Commit::Forfeited);
            }
        };

        let after = match ChessPosition::parse(&inspection.fen) {
            Ok(pos) if pos.position_key() != before.position_key() => pos,
            _ => {
                warn!(game_id = game.id, side = %side, uci, "Move left the position unchanged, forfeiting");
                self.finish(game, None, side.opponent().wins(), TerminationReason::Forfeit, now)
                    .await?;
                return Ok(Commit::Forfeited);
            }
        };

        let ply_index = game.ply_count + 1;
        let record = MoveRecord {
            game_id: game.id,
            ply_index,
            uci: uci.to_string(),
            fen_after: inspection.fen.clone(),
            position_key_after: after.position_key(),
            is_check: inspection.in_check,
            created_at: now,
        };

        game.fen = inspection.fen;
        game.ply_count = ply_index;
        game.last_move = Some(record.uci.clone());
        game.side_to_move = side.opponent();
        game.clear_pending();
        game.next_action_at = Some(now + game.decision_gap());
        game.updated_at = now;

        let termination = self.terminal_condition(game, &record, &after).await?;
        match termination {
            Some((result, reason)) => {
                self.finish(game, Some(&record), result, reason, now).await?;
            }
            None => self.store.commit_move(&record, game).await?,
        }

        info!(
            game_id = game.id,
            ply = ply_index,
            side = %side,
            uci,
            engine_key = %inspection.key,
            "Move committed"
        );
        Ok(Commit::Applied {
            ply_index,
            termination: termination.map(|(_, reason)| reason),
        })
    }

    /// First matching rule wins: ply cap, threefold repetition, fifty-move
    /// rule, insufficient material, then mate or stalemate on the board.
    async fn terminal_condition(
        &self,
        game: &Game,
        record: &MoveRecord,
        after: &ChessPosition,
    ) -> Result<Option<(GameResult, TerminationReason)>, ArenaError> {
        if game.ply_count >= self.settings.max_plies {
            return Ok(Some((GameResult::Draw, TerminationReason::MaxPlies)));
        }

        // `record` is not stored yet, so it counts itself
        let key = &record.position_key_after;
        let mut occurrences = self.store.count_position_key(game.id, key).await? + 1;
        if game.initial_position_key.as_deref() == Some(key.as_str()) {
            occurrences += 1;
        }
        if occurrences >= 3 {
            return Ok(Some((GameResult::Draw, TerminationReason::Repetition)));
        }

        if after.halfmove_clock() >= 100 {
            return Ok(Some((GameResult::Draw, TerminationReason::FiftyMove)));
        }

        if is_insufficient_material(&game.fen)? {
            return Ok(Some((GameResult::Draw, TerminationReason::Insufficient)));
        }

        if !after.has_legal_moves() {
            return Ok(Some(if after.is_check() {
                (after.side_to_move().opponent().wins(), TerminationReason::Checkmate)
            } else {
                (GameResult::Draw, TerminationReason::Stalemate)
            }));
        }

        Ok(None)
    }

    /// Marks the game finished and stores it with its match record, and
    /// with the move that ended it when there is one.
    async fn finish(
        &self,
        game: &mut Game,
        last_move: Option<&MoveRecord>,
        result: GameResult,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<(), ArenaError> {
        let white = self.mover_config(game.id, Side::White).await?;
        let black = self.mover_config(game.id, Side::Black).await?;
        game.mark_finished(result, reason, now);
        let record = MatchRecord {
            game_id: game.id,
            result,
            termination_reason: reason,
            white_strength: white.strength,
            black_strength: black.strength,
            move_interval_ms: game.move_interval_ms,
            finished_at: now,
        };
        self.store.finish_game(game, last_move, &record).await?;

        info!(
            game_id = game.id,
            plies = game.ply_count,
            result = %result,
            reason = %reason,
            "Game finished"
        );
        Ok(())
    }

    pub async fn apply_external_move(
        &self,
        id: GameId,
        from: &str,
        to: &str,
    ) -> Result<ExternalMoveOutcome, ArenaError> {
        self.apply_external_move_at(id, from, to, Utc::now()).await
    }

    /// Submits a human move given as two squares. Pawns reaching the last
    /// rank become queens.
    pub async fn apply_external_move_at(
        &self,
        id: GameId,
        from: &str,
        to: &str,
        now: DateTime<Utc>,
    ) -> Result<ExternalMoveOutcome, ArenaError> {
        let from_sq = parse_square(from).map_err(|_| ArenaError::InvalidSquare(from.to_string()))?;
        let to_sq = parse_square(to).map_err(|_| ArenaError::InvalidSquare(to.to_string()))?;

        if !self.acquire(id, now).await? {
            return Ok(ExternalMoveOutcome::Busy);
        }
        let result = self.external_locked(id, from_sq, to_sq, now).await;
        self.release(id, now).await;
        result
    }

    async fn external_locked(
        &self,
        id: GameId,
        from: shakmaty::Square,
        to: shakmaty::Square,
        now: DateTime<Utc>,
    ) -> Result<ExternalMoveOutcome, ArenaError> {
        let mut game = self.load(id).await?;
        if !game.is_running() {
            return Ok(ExternalMoveOutcome::Rejected(RejectReason::NotRunning));
        }
        if game.pending.is_some() {
            return Ok(ExternalMoveOutcome::Rejected(RejectReason::PreviewPending));
        }

        let Some(pos) = self.position_or_finish(&mut game, now).await? else {
            return Ok(ExternalMoveOutcome::Rejected(RejectReason::InvalidPosition));
        };
        let cfg = self.mover_config(id, pos.side_to_move()).await?;
        if cfg.kind != MoverKind::Human {
            return Ok(ExternalMoveOutcome::Rejected(RejectReason::NotHumanTurn));
        }

        let uci = pos.uci_for_squares(from, to);
        if pos.apply_uci(&uci).is_err() {
            debug!(game_id = id, uci = %uci, "Rejected illegal human move");
            return Ok(ExternalMoveOutcome::Rejected(RejectReason::IllegalMove));
        }

        Ok(
            match self
                .apply_move(&mut game, &pos, MoveSource::External, &uci, now)
                .await?
            {
                Commit::Applied {
                    ply_index,
                    termination,
                } => ExternalMoveOutcome::Applied {
                    ply_index,
                    termination,
                },
                Commit::Forfeited => ExternalMoveOutcome::Rejected(RejectReason::IllegalMove),
            },
        )
    }

    /// Creates a configured game with default movers for both sides.
    pub async fn create_game(&self, new: NewGame) -> Result<Game, ArenaError> {
        let pos = ChessPosition::parse(&new.fen)?;
        if new.move_interval_ms == 0 {
            return Err(ArenaError::InvalidConfig("move interval must be positive".into()));
        }
        let now = Utc::now();
        let mut game = self.store.create_game(&new, now).await?;
        game.initial_position_key = Some(pos.position_key());
        self.store.save_game(&game).await?;
        for side in [Side::White, Side::Black] {
            self.mover_config(game.id, side).await?;
        }
        info!(game_id = game.id, "Game created");
        Ok(game)
    }

    pub async fn start(&self, id: GameId) -> Result<Game, ArenaError> {
        self.start_at(id, Utc::now()).await
    }

    pub async fn start_at(&self, id: GameId, now: DateTime<Utc>) -> Result<Game, ArenaError> {
        self.acquire_or_busy(id, now).await?;
        let result = self.start_locked(id, now).await;
        self.release(id, now).await;
        result
    }

    async fn start_locked(&self, id: GameId, now: DateTime<Utc>) -> Result<Game, ArenaError> {
        let mut game = self.load(id).await?;
        match game.status {
            GameStatus::Running => return Ok(game),
            GameStatus::Finished => {
                return Err(ArenaError::InvalidTransition {
                    action: "start",
                    status: game.status,
                })
            }
            GameStatus::Configured | GameStatus::Paused => {}
        }
        if game.initial_position_key.is_none() {
            game.initial_position_key = Some(ChessPosition::parse(&game.fen)?.position_key());
        }
        game.mark_started(now);
        self.store.save_game(&game).await?;
        info!(game_id = id, "Game started");
        Ok(game)
    }

    pub async fn pause(&self, id: GameId) -> Result<Game, ArenaError> {
        let now = Utc::now();
        self.acquire_or_busy(id, now).await?;
        let result = self.pause_locked(id, now).await;
        self.release(id, now).await;
        result
    }

    async fn pause_locked(&self, id: GameId, now: DateTime<Utc>) -> Result<Game, ArenaError> {
        let mut game = self.load(id).await?;
        match game.status {
            GameStatus::Paused => return Ok(game),
            GameStatus::Running => {}
            status => {
                return Err(ArenaError::InvalidTransition {
                    action: "pause",
                    status,
                })
            }
        }
        game.mark_paused(now);
        self.store.save_game(&game).await?;
        info!(game_id = id, "Game paused");
        Ok(game)
    }

    /// Replaces one side's mover config.
    pub async fn update_mover(&self, id: GameId, cfg: MoverConfig) -> Result<(), ArenaError> {
        if cfg.movetime_ms == 0 {
            return Err(ArenaError::InvalidConfig("movetime must be positive".into()));
        }
        if cfg.kind != MoverKind::ExternalEngine && !cfg.engine_options.is_empty() {
            return Err(ArenaError::InvalidConfig(format!(
                "engine options are only used by external engines, not {}",
                cfg.kind
            )));
        }

        let now = Utc::now();
        self.acquire_or_busy(id, now).await?;
        let result = self.update_mover_locked(id, cfg, now).await;
        self.release(id, now).await;
        result
    }

    async fn update_mover_locked(
        &self,
        id: GameId,
        cfg: MoverConfig,
        now: DateTime<Utc>,
    ) -> Result<(), ArenaError> {
        let mut game = self.load(id).await?;
        self.store.save_mover_config(id, &cfg).await?;

        let to_move = side_to_move(&game.fen).ok();
        if cfg.kind == MoverKind::Human && to_move == Some(cfg.side) && game.pending.is_some() {
            game.clear_pending();
            game.updated_at = now;
            self.store.save_game(&game).await?;
        }
        info!(game_id = id, side = %cfg.side, kind = %cfg.kind, "Mover updated");
        Ok(())
    }

    pub async fn update_speed(
        &self,
        id: GameId,
        move_interval_ms: u32,
        preview_ms: u32,
    ) -> Result<Game, ArenaError> {
        if move_interval_ms == 0 {
            return Err(ArenaError::InvalidConfig("move interval must be positive".into()));
        }
        let now = Utc::now();
        self.acquire_or_busy(id, now).await?;
        let result = self
            .update_speed_locked(id, move_interval_ms, preview_ms, now)
            .await;
        self.release(id, now).await;
        result
    }

    async fn update_speed_locked(
        &self,
        id: GameId,
        move_interval_ms: u32,
        preview_ms: u32,
        now: DateTime<Utc>,
    ) -> Result<Game, ArenaError> {
        let mut game = self.load(id).await?;
        game.move_interval_ms = move_interval_ms;
        game.preview_ms = preview_ms;
        game.updated_at = now;
        self.store.save_game(&game).await?;
        Ok(game)
    }

    /// Starts over in a new configured game with the same movers and speed.
    pub async fn reset(&self, id: GameId) -> Result<Game, ArenaError> {
        let now = Utc::now();
        self.acquire_or_busy(id, now).await?;
        let result = self.reset_locked(id).await;
        self.release(id, now).await;
        result
    }

    async fn reset_locked(&self, id: GameId) -> Result<Game, ArenaError> {
        let old = self.load(id).await?;
        let white = self.mover_config(id, Side::White).await?;
        let black = self.mover_config(id, Side::Black).await?;

        let fresh = self
            .create_game(NewGame {
                fen: STARTPOS_FEN.to_string(),
                move_interval_ms: old.move_interval_ms,
                preview_ms: old.preview_ms,
            })
            .await?;
        self.store.save_mover_config(fresh.id, &white).await?;
        self.store.save_mover_config(fresh.id, &black).await?;
        info!(game_id = id, new_game_id = fresh.id, "Game reset");
        Ok(fresh)
    }
}

fn finished_outcome(advanced: bool, reason: TerminationReason) -> TickOutcome {
    TickOutcome {
        advanced,
        status: TickStatus::Finished(reason),
        message: format!("finished: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mover::EmbeddedMover;
    use crate::store::MemoryStore;
    use chess_core::Strength;

    fn scheduler() -> GameScheduler {
        let movers = Movers {
            embedded: Arc::new(EmbeddedMover),
            external: Arc::new(EmbeddedMover),
        };
        GameScheduler::new(Arc::new(MemoryStore::new()), movers, SchedulerSettings::default())
    }

    #[tokio::test]
    async fn test_create_game_sets_up_movers_and_key() {
        let s = scheduler();
        let game = s.create_game(NewGame::standard(500, 350)).await.unwrap();
        assert_eq!(game.status, GameStatus::Configured);
        assert_eq!(
            game.initial_position_key,
            Some(ChessPosition::startpos().position_key())
        );
        let black = s.store().mover_config(game.id, Side::Black).await.unwrap();
        assert_eq!(black.unwrap().kind, MoverKind::ExternalEngine);
    }

    #[tokio::test]
    async fn test_create_game_rejects_bad_position() {
        let s = scheduler();
        let err = s
            .create_game(NewGame {
                fen: "8/8/8 w - - 0 1".into(),
                move_interval_ms: 500,
                preview_ms: 350,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidPosition(_)));
    }

    #[tokio::test]
    async fn test_tick_on_configured_game_is_noop() {
        let s = scheduler();
        let game = s.create_game(NewGame::standard(500, 350)).await.unwrap();
        let outcome = s.tick(game.id).await.unwrap();
        assert_eq!(outcome.status, TickStatus::NotRunning);
        assert!(!outcome.advanced);
    }

    #[tokio::test]
    async fn test_pause_clears_pending_and_rejects_finished() {
        let s = scheduler();
        let game = s.create_game(NewGame::standard(500, 350)).await.unwrap();
        let now = Utc::now();
        s.start_at(game.id, now).await.unwrap();
        let outcome = s.tick_at(game.id, now).await.unwrap();
        assert_eq!(outcome.status, TickStatus::Previewing);

        let paused = s.pause(game.id).await.unwrap();
        assert_eq!(paused.status, GameStatus::Paused);
        assert!(paused.pending.is_none());

        let mut finished = paused.clone();
        finished.mark_finished(GameResult::Draw, TerminationReason::Unknown, now);
        s.store().save_game(&finished).await.unwrap();
        assert!(matches!(
            s.start(game.id).await,
            Err(ArenaError::InvalidTransition { action: "start", .. })
        ));
    }

    #[tokio::test]
    async fn test_switching_side_to_human_drops_preview() {
        let s = scheduler();
        let game = s.create_game(NewGame::standard(500, 350)).await.unwrap();
        let now = Utc::now();
        s.start_at(game.id, now).await.unwrap();
        s.tick_at(game.id, now).await.unwrap();

        let human = MoverConfig::new(Side::White, MoverKind::Human, Strength::skill(10), 150);
        s.update_mover(game.id, human).await.unwrap();
        let game = s.store().load_game(game.id).await.unwrap().unwrap();
        assert!(game.pending.is_none());
    }

    #[tokio::test]
    async fn test_update_mover_validation() {
        let s = scheduler();
        let game = s.create_game(NewGame::standard(500, 350)).await.unwrap();
        let bad = MoverConfig::new(Side::White, MoverKind::EmbeddedSearch, Strength::skill(5), 150)
            .with_option("Hash", "16");
        assert!(matches!(
            s.update_mover(game.id, bad).await,
            Err(ArenaError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_control_ops_fail_when_locked() {
        let s = scheduler();
        let game = s.create_game(NewGame::standard(500, 350)).await.unwrap();
        let now = Utc::now();
        assert!(s.store().try_acquire_tick_lock(game.id, now, now).await.unwrap());
        assert!(matches!(s.start(game.id).await, Err(ArenaError::LockBusy(_))));
        assert!(matches!(
            s.update_speed(game.id, 300, 100).await,
            Err(ArenaError::LockBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_copies_movers_and_speed() {
        let s = scheduler();
        let game = s.create_game(NewGame::standard(800, 200)).await.unwrap();
        let cfg = MoverConfig::new(Side::Black, MoverKind::EmbeddedSearch, Strength::rating(1500), 300);
        s.update_mover(game.id, cfg.clone()).await.unwrap();

        let fresh = s.reset(game.id).await.unwrap();
        assert_ne!(fresh.id, game.id);
        assert_eq!(fresh.move_interval_ms, 800);
        assert_eq!(fresh.preview_ms, 200);
        assert_eq!(fresh.status, GameStatus::Configured);
        let black = s.store().mover_config(fresh.id, Side::Black).await.unwrap();
        assert_eq!(black, Some(cfg));
    }
}
