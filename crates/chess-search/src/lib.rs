//! Embedded move search.
//!
//! A small negamax engine with alpha-beta pruning, capture quiescence and
//! iterative deepening under a wall-clock budget. Strength settings map to
//! a search depth and, at low skill levels, to random noise on root scores.

pub mod eval;
pub mod ordering;
pub mod search;
pub mod strength;

use chess_core::{ChessPosition, FenError, Strength};

pub use eval::{evaluate, MATE_SCORE};
pub use search::{search, SearchOutcome, SearchParams};
pub use strength::{depth_for, noise_for};

/// Parses `fen` and searches it with parameters derived from `strength`.
pub fn choose_move(
    fen: &str,
    strength: Strength,
    movetime_ms: u32,
) -> Result<SearchOutcome, FenError> {
    let pos = ChessPosition::parse(fen)?;
    Ok(search(pos.chess(), &SearchParams::from_strength(strength, movetime_ms)))
}
