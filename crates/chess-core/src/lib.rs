//! Position codec and shared value types.

pub mod fen;
pub mod types;

pub use fen::{
    halfmove_clock, is_insufficient_material, parse_square, side_to_move, ChessPosition,
    FenError, FenFields, MoveError, STARTPOS_FEN,
};
pub use types::{GameResult, Side, Strength, StrengthMode};
