pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod mover;
pub mod scheduler;
pub mod stockfish;
pub mod store;

pub use config::ArenaConfig;
pub use error::ArenaError;
pub use models::{
    Game, GameId, GameStatus, MatchRecord, MoveRecord, MoverConfig, MoverKind, NewGame,
    PendingMove, TerminationReason,
};
pub use mover::{EmbeddedMover, Inspection, MoveChoice, Mover, MoverError, Movers, ProcessMover};
pub use scheduler::{
    ExternalMoveOutcome, GameScheduler, RejectReason, SchedulerSettings, TickOutcome, TickStatus,
};
pub use stockfish::{StockfishClient, UciError, UciTimeouts};
pub use store::{GameStore, MemoryStore};
