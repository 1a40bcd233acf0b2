//! Arena error types

use chess_core::{FenError, MoveError};
use thiserror::Error;

use crate::models::{GameId, GameStatus};
use crate::mover::MoverError;

#[derive(Error, Debug)]
pub enum ArenaError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Mover error: {0}")]
    Mover(#[from] MoverError),

    #[error("Invalid position: {0}")]
    InvalidPosition(#[from] FenError),

    #[error("Illegal move: {0}")]
    IllegalMove(#[from] MoveError),

    #[error("Game {0} is locked by another tick")]
    LockBusy(GameId),

    #[error("Game not found: {0}")]
    GameNotFound(GameId),

    #[error("Invalid square: {0}")]
    InvalidSquare(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot {action} a {status} game")]
    InvalidTransition {
        action: &'static str,
        status: GameStatus,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}
