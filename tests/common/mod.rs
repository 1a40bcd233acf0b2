#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use arena::{
    ArenaError, EmbeddedMover, Game, GameId, GameScheduler, GameStore, Inspection, MatchRecord,
    MemoryStore, MoveChoice, MoveRecord, Mover, MoverConfig, MoverError, Movers, NewGame,
    SchedulerSettings, TickOutcome,
};
use async_trait::async_trait;
use chess_core::{ChessPosition, FenError, Side};
use chrono::{DateTime, Duration, Utc};

pub const INTERVAL_MS: u32 = 500;
pub const PREVIEW_MS: u32 = 350;

/// Plays a fixed list of moves, then reports no legal move.
pub struct ScriptedMover {
    moves: Mutex<VecDeque<String>>,
}

impl ScriptedMover {
    pub fn new(moves: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            moves: Mutex::new(moves.iter().map(|m| m.to_string()).collect()),
        })
    }
}

#[async_trait]
impl Mover for ScriptedMover {
    async fn choose_move(&self, _fen: &str, _cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        let next = self.moves.lock().unwrap().pop_front();
        Ok(next.map_or(MoveChoice::NoLegalMove, MoveChoice::Move))
    }

    async fn apply_and_inspect(&self, fen: &str, uci: &str) -> Result<Inspection, MoverError> {
        EmbeddedMover.apply_and_inspect(fen, uci).await
    }
}

/// Fails like an engine that stopped answering.
pub struct FailingMover;

#[async_trait]
impl Mover for FailingMover {
    async fn choose_move(&self, _fen: &str, _cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        Err(MoverError::Search("engine went away".into()))
    }

    async fn apply_and_inspect(&self, _fen: &str, _uci: &str) -> Result<Inspection, MoverError> {
        Err(MoverError::Search("engine went away".into()))
    }
}

/// Proposes e2e4, then loses the engine before the move is applied.
pub struct DropsOnApplyMover;

#[async_trait]
impl Mover for DropsOnApplyMover {
    async fn choose_move(&self, _fen: &str, _cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        Ok(MoveChoice::Move("e2e4".into()))
    }

    async fn apply_and_inspect(&self, _fen: &str, _uci: &str) -> Result<Inspection, MoverError> {
        Err(MoverError::Search("engine went away".into()))
    }
}

/// Refuses every position it is handed.
pub struct RejectingMover;

#[async_trait]
impl Mover for RejectingMover {
    async fn choose_move(&self, _fen: &str, _cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        Err(FenError::Illegal("engine rejected the position".into()).into())
    }

    async fn apply_and_inspect(&self, _fen: &str, _uci: &str) -> Result<Inspection, MoverError> {
        Err(FenError::Illegal("engine rejected the position".into()).into())
    }
}

/// Proposes a move but never changes the position when applying it.
pub struct StuckMover;

#[async_trait]
impl Mover for StuckMover {
    async fn choose_move(&self, _fen: &str, _cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        Ok(MoveChoice::Move("e2e4".into()))
    }

    async fn apply_and_inspect(&self, fen: &str, _uci: &str) -> Result<Inspection, MoverError> {
        Ok(Inspection::from(&ChessPosition::parse(fen)?))
    }
}

/// Embedded search that takes a while to answer.
pub struct SlowMover(pub StdDuration);

#[async_trait]
impl Mover for SlowMover {
    async fn choose_move(&self, fen: &str, cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        tokio::time::sleep(self.0).await;
        EmbeddedMover.choose_move(fen, cfg).await
    }

    async fn apply_and_inspect(&self, fen: &str, uci: &str) -> Result<Inspection, MoverError> {
        EmbeddedMover.apply_and_inspect(fen, uci).await
    }
}

/// In-memory store whose next commit or finish can be made to fail once,
/// like a database connection dropping mid-write.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_commit: AtomicBool,
    fail_finish: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_finish(&self) {
        self.fail_finish.store(true, Ordering::SeqCst);
    }

    fn trip(flag: &AtomicBool) -> Result<(), ArenaError> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(ArenaError::Storage("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GameStore for FlakyStore {
    async fn create_game(&self, new: &NewGame, now: DateTime<Utc>) -> Result<Game, ArenaError> {
        self.inner.create_game(new, now).await
    }

    async fn load_game(&self, id: GameId) -> Result<Option<Game>, ArenaError> {
        self.inner.load_game(id).await
    }

    async fn save_game(&self, game: &Game) -> Result<(), ArenaError> {
        self.inner.save_game(game).await
    }

    async fn try_acquire_tick_lock(
        &self,
        id: GameId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, ArenaError> {
        self.inner.try_acquire_tick_lock(id, now, stale_before).await
    }

    async fn release_tick_lock(
        &self,
        id: GameId,
        acquired_at: DateTime<Utc>,
    ) -> Result<(), ArenaError> {
        self.inner.release_tick_lock(id, acquired_at).await
    }

    async fn mover_config(&self, id: GameId, side: Side) -> Result<Option<MoverConfig>, ArenaError> {
        self.inner.mover_config(id, side).await
    }

    async fn save_mover_config(&self, id: GameId, cfg: &MoverConfig) -> Result<(), ArenaError> {
        self.inner.save_mover_config(id, cfg).await
    }

    async fn commit_move(&self, record: &MoveRecord, game: &Game) -> Result<(), ArenaError> {
        Self::trip(&self.fail_commit)?;
        self.inner.commit_move(record, game).await
    }

    async fn finish_game(
        &self,
        game: &Game,
        last_move: Option<&MoveRecord>,
        record: &MatchRecord,
    ) -> Result<(), ArenaError> {
        Self::trip(&self.fail_finish)?;
        self.inner.finish_game(game, last_move, record).await
    }

    async fn list_moves(&self, id: GameId) -> Result<Vec<MoveRecord>, ArenaError> {
        self.inner.list_moves(id).await
    }

    async fn count_position_key(&self, id: GameId, key: &str) -> Result<u32, ArenaError> {
        self.inner.count_position_key(id, key).await
    }

    async fn match_record(&self, id: GameId) -> Result<Option<MatchRecord>, ArenaError> {
        self.inner.match_record(id).await
    }

    async fn running_game_ids(&self) -> Result<Vec<GameId>, ArenaError> {
        self.inner.running_game_ids().await
    }
}

/// Default mover configs put White on the embedded slot and Black on the
/// external slot, so these two movers play White and Black respectively.
pub fn scheduler(white: Arc<dyn Mover>, black: Arc<dyn Mover>) -> GameScheduler {
    scheduler_with(white, black, SchedulerSettings::default())
}

pub fn scheduler_with(
    white: Arc<dyn Mover>,
    black: Arc<dyn Mover>,
    settings: SchedulerSettings,
) -> GameScheduler {
    scheduler_on(Arc::new(MemoryStore::new()), white, black, settings)
}

pub fn scheduler_on(
    store: Arc<dyn GameStore>,
    white: Arc<dyn Mover>,
    black: Arc<dyn Mover>,
    settings: SchedulerSettings,
) -> GameScheduler {
    let movers = Movers {
        embedded: white,
        external: black,
    };
    GameScheduler::new(store, movers, settings)
}

pub fn embedded_scheduler() -> GameScheduler {
    scheduler(Arc::new(EmbeddedMover), Arc::new(EmbeddedMover))
}

/// Creates and starts a game from `fen`. Returns its id and start time.
pub async fn start_game(s: &GameScheduler, fen: &str) -> (GameId, DateTime<Utc>) {
    let game = s
        .create_game(NewGame {
            fen: fen.to_string(),
            move_interval_ms: INTERVAL_MS,
            preview_ms: PREVIEW_MS,
        })
        .await
        .unwrap();
    let t0 = Utc::now();
    s.start_at(game.id, t0).await.unwrap();
    (game.id, t0)
}

pub fn ms(n: i64) -> Duration {
    Duration::milliseconds(n)
}

/// Proposes at `*now`, commits once the preview has run, then moves `*now`
/// to the next decision time. Returns the outcome of the committing tick.
pub async fn play_ply(s: &GameScheduler, id: GameId, now: &mut DateTime<Utc>) -> TickOutcome {
    let proposed = s.tick_at(id, *now).await.unwrap();
    if !matches!(proposed.status, arena::TickStatus::Previewing) {
        return proposed;
    }
    let committed = s.tick_at(id, *now + ms(i64::from(PREVIEW_MS))).await.unwrap();
    *now = *now + ms(i64::from(INTERVAL_MS));
    committed
}

/// Plays plies until the game stops advancing. Returns the last outcome.
pub async fn play_out(s: &GameScheduler, id: GameId, now: &mut DateTime<Utc>, limit: usize) -> TickOutcome {
    let mut last = play_ply(s, id, now).await;
    for _ in 1..limit {
        if !last.advanced || matches!(last.status, arena::TickStatus::Finished(_)) {
            break;
        }
        last = play_ply(s, id, now).await;
    }
    last
}
