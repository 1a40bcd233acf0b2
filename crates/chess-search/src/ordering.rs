//! Move ordering: profitable captures, then promotions and checks.

use shakmaty::{Chess, Move, MoveList, Position};

use crate::eval::piece_value;

fn order_score(pos: &Chess, mv: &Move) -> i32 {
    let mut score = 0;
    if let Some(victim) = mv.capture() {
        score += 1000 + piece_value(victim) - piece_value(mv.role()) / 10;
    }
    if mv.promotion().is_some() {
        score += 900;
    }
    let mut after = pos.clone();
    after.play_unchecked(mv);
    if after.is_check() {
        score += 60;
    }
    score
}

/// Sorts `moves` best-first. Ties keep generation order so the result is
/// deterministic.
pub fn order_moves(pos: &Chess, moves: MoveList) -> Vec<Move> {
    let mut scored: Vec<(i32, Move)> = moves
        .into_iter()
        .map(|mv| (order_score(pos, &mv), mv))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, mv)| mv).collect()
}

/// Moves `first` to the front, keeping the relative order of the rest.
pub fn promote_to_front(moves: &mut Vec<Move>, first: &Move) {
    if let Some(idx) = moves.iter().position(|m| m == first) {
        let mv = moves.remove(idx);
        moves.insert(0, mv);
    }
}
