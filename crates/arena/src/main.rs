//! Arena driver
//!
//! Ticks every running game on a fixed cadence. With `--demo` it first
//! creates and starts one engine-vs-engine game and exits once it ends.
//! Black plays the embedded search unless `--black external` is given.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chess_core::Side;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use arena::{
    ArenaConfig, GameId, GameScheduler, GameStore, MemoryStore, MoverConfig, MoverKind, Movers,
    NewGame, StockfishClient, TickStatus,
};

struct Args {
    demo: bool,
    black: MoverKind,
}

/// Parse `--demo` and `--black external|embedded` from CLI args
fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        demo: false,
        black: MoverKind::EmbeddedSearch,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--demo" => parsed.demo = true,
            "--black" => {
                let value = args.get(i + 1).context("--black needs a value")?;
                parsed.black = value
                    .parse::<MoverKind>()
                    .map_err(|e| anyhow::anyhow!(e))?;
                i += 1;
            }
            other => warn!(arg = other, "Ignoring unknown argument"),
        }
        i += 1;
    }
    Ok(parsed)
}

async fn open_store(config: &ArenaConfig) -> anyhow::Result<Arc<dyn GameStore>> {
    match &config.database_url {
        Some(url) => {
            let store = arena::db::PgStore::connect(url).await?;
            info!("Postgres store ready");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Tick every running game once, concurrently. Returns how many games were
/// still running at the start of the round.
async fn run_round(scheduler: &Arc<GameScheduler>) -> anyhow::Result<usize> {
    let ids = scheduler.store().running_game_ids().await?;
    let mut ticks = JoinSet::new();
    for id in ids.iter().copied() {
        let scheduler = scheduler.clone();
        ticks.spawn(async move { (id, scheduler.tick(id).await) });
    }

    while let Some(joined) = ticks.join_next().await {
        match joined {
            Ok((id, Ok(outcome))) => match outcome.status {
                TickStatus::Advanced => info!(game_id = id, "{}", outcome.message),
                TickStatus::Finished(reason) => {
                    info!(game_id = id, reason = %reason, "Game ended")
                }
                _ => {}
            },
            Ok((id, Err(e))) => error!(game_id = id, error = %e, "Tick failed"),
            Err(e) => error!(error = %e, "Tick task panicked"),
        }
    }
    Ok(ids.len())
}

/// One round of the driver loop. A failed round is logged and reported as
/// `None`; the next interval tries again.
async fn poll_round(scheduler: &Arc<GameScheduler>) -> Option<usize> {
    match run_round(scheduler).await {
        Ok(running) => Some(running),
        Err(e) => {
            error!(error = %e, "Round failed");
            None
        }
    }
}

async fn create_demo_game(
    scheduler: &GameScheduler,
    config: &ArenaConfig,
    black: MoverKind,
) -> anyhow::Result<GameId> {
    let game = scheduler
        .create_game(NewGame::standard(config.move_interval_ms, config.preview_ms))
        .await?;

    let white_cfg = scheduler.mover_config(game.id, Side::White).await?;
    let black_cfg = scheduler.mover_config(game.id, Side::Black).await?;
    scheduler
        .update_mover(
            game.id,
            MoverConfig::new(Side::Black, black, black_cfg.strength, black_cfg.movetime_ms),
        )
        .await?;
    scheduler.start(game.id).await?;

    info!(
        game_id = game.id,
        white = %white_cfg.kind,
        black = %black,
        "Demo game started"
    );
    Ok(game.id)
}

async fn print_summary(scheduler: &GameScheduler, id: GameId) -> anyhow::Result<()> {
    let moves = scheduler.store().list_moves(id).await?;
    let line: Vec<&str> = moves.iter().map(|m| m.uci.as_str()).collect();
    println!("{}", line.join(" "));
    match scheduler.store().match_record(id).await? {
        Some(record) => println!(
            "Result: {} ({}) after {} plies",
            record.result,
            record.termination_reason,
            moves.len()
        ),
        None => println!("Game {id} did not finish"),
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

// Windows fallback (no SIGTERM handling)
#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let args = parse_args()?;
    let config = ArenaConfig::from_env()?;
    info!(
        stockfish_path = %config.stockfish_path,
        tick_interval_ms = config.tick_interval_ms,
        "Arena config loaded"
    );

    let store = open_store(&config).await?;
    let stockfish = Arc::new(StockfishClient::new(
        config.stockfish_path.clone(),
        config.uci_timeouts(),
    ));
    let movers = Movers::new(stockfish.clone());
    let scheduler = Arc::new(GameScheduler::new(
        store,
        movers,
        config.scheduler_settings(),
    ));

    let demo_game = if args.demo {
        Some(create_demo_game(&scheduler, &config, args.black).await?)
    } else {
        None
    };

    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Starting tick loop");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            _ = interval.tick() => {
                let running = poll_round(&scheduler).await;
                if demo_game.is_some() && running == Some(0) {
                    break;
                }
            }
        }
    }

    if let Some(id) = demo_game {
        print_summary(&scheduler, id).await?;
    }

    stockfish.close().await;
    info!("Arena stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena::{ArenaError, Game, MatchRecord, MoveRecord, SchedulerSettings};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    /// Every call fails, like a database that went away.
    struct DownStore;

    fn down<T>() -> Result<T, ArenaError> {
        Err(ArenaError::Storage("database unavailable".into()))
    }

    #[async_trait]
    impl GameStore for DownStore {
        async fn create_game(&self, _new: &NewGame, _now: DateTime<Utc>) -> Result<Game, ArenaError> {
            down()
        }
        async fn load_game(&self, _id: GameId) -> Result<Option<Game>, ArenaError> {
            down()
        }
        async fn save_game(&self, _game: &Game) -> Result<(), ArenaError> {
            down()
        }
        async fn try_acquire_tick_lock(
            &self,
            _id: GameId,
            _now: DateTime<Utc>,
            _stale_before: DateTime<Utc>,
        ) -> Result<bool, ArenaError> {
            down()
        }
        async fn release_tick_lock(
            &self,
            _id: GameId,
            _acquired_at: DateTime<Utc>,
        ) -> Result<(), ArenaError> {
            down()
        }
        async fn mover_config(&self, _id: GameId, _side: Side) -> Result<Option<MoverConfig>, ArenaError> {
            down()
        }
        async fn save_mover_config(&self, _id: GameId, _cfg: &MoverConfig) -> Result<(), ArenaError> {
            down()
        }
        async fn commit_move(&self, _record: &MoveRecord, _game: &Game) -> Result<(), ArenaError> {
            down()
        }
        async fn finish_game(
            &self,
            _game: &Game,
            _last_move: Option<&MoveRecord>,
            _record: &MatchRecord,
        ) -> Result<(), ArenaError> {
            down()
        }
        async fn list_moves(&self, _id: GameId) -> Result<Vec<MoveRecord>, ArenaError> {
            down()
        }
        async fn count_position_key(&self, _id: GameId, _key: &str) -> Result<u32, ArenaError> {
            down()
        }
        async fn match_record(&self, _id: GameId) -> Result<Option<MatchRecord>, ArenaError> {
            down()
        }
        async fn running_game_ids(&self) -> Result<Vec<GameId>, ArenaError> {
            down()
        }
    }

    fn scheduler_over(store: Arc<dyn GameStore>) -> Arc<GameScheduler> {
        let movers = Movers {
            embedded: Arc::new(arena::EmbeddedMover),
            external: Arc::new(arena::EmbeddedMover),
        };
        Arc::new(GameScheduler::new(store, movers, SchedulerSettings::default()))
    }

    #[tokio::test]
    async fn test_failed_round_is_survivable() {
        let down = scheduler_over(Arc::new(DownStore));
        assert_eq!(poll_round(&down).await, None);
        // the loop keeps calling; nothing is latched
        assert_eq!(poll_round(&down).await, None);

        let healthy = scheduler_over(Arc::new(MemoryStore::new()));
        assert_eq!(poll_round(&healthy).await, Some(0));
    }
}
