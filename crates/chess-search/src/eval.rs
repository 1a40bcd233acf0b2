//! Static evaluation, always from the side to move's point of view.

use shakmaty::{Bitboard, Board, Chess, Color, Position, Role, Square};

pub const MATE_SCORE: i32 = 1_000_000;

/// Non-pawn material of both sides in the initial position.
const OPENING_NON_PAWN: f64 = 6400.0;

pub fn piece_value(role: Role) -> i32 {
    match role {
        Role::Pawn => 100,
        Role::Knight => 320,
        Role::Bishop => 330,
        Role::Rook => 500,
        Role::Queen => 900,
        Role::King => 0,
    }
}

fn coords(sq: Square) -> (i32, i32) {
    (sq.file() as i32, sq.rank() as i32)
}

fn center_distance(sq: Square) -> f64 {
    let (f, r) = coords(sq);
    (f as f64 - 3.5).abs() + (r as f64 - 3.5).abs()
}

fn corner_distance(sq: Square) -> i32 {
    let (f, r) = coords(sq);
    [(0, 0), (7, 0), (0, 7), (7, 7)]
        .iter()
        .map(|&(cf, cr)| (f - cf).abs().max((r - cr).abs()))
        .min()
        .unwrap_or(0)
}

fn relative_rank(sq: Square, color: Color) -> i32 {
    let r = sq.rank() as i32;
    match color {
        Color::White => r,
        Color::Black => 7 - r,
    }
}

fn material(board: &Board, color: Color) -> i32 {
    let ours = board.by_color(color);
    [
        (board.pawns(), Role::Pawn),
        (board.knights(), Role::Knight),
        (board.bishops(), Role::Bishop),
        (board.rooks(), Role::Rook),
        (board.queens(), Role::Queen),
    ]
    .into_iter()
    .map(|(bb, role)| (bb & ours).count() as i32 * piece_value(role))
    .sum()
}

/// 0.0 with full material on the board, 1.0 once only kings and pawns remain.
pub fn endgame_phase(board: &Board) -> f64 {
    let non_pawn = board.knights().count() as i32 * piece_value(Role::Knight)
        + board.bishops().count() as i32 * piece_value(Role::Bishop)
        + board.rooks().count() as i32 * piece_value(Role::Rook)
        + board.queens().count() as i32 * piece_value(Role::Queen);
    ((OPENING_NON_PAWN - non_pawn as f64) / OPENING_NON_PAWN).clamp(0.0, 1.0)
}

fn has_pawn_on_file(pawns: Bitboard, file: i32) -> bool {
    pawns.into_iter().any(|sq| sq.file() as i32 == file)
}

fn positional_bonus(board: &Board, color: Color, phase: f64) -> i32 {
    let ours = board.by_color(color);
    let mut bonus = 0;

    if let Some(king) = board.king_of(color) {
        let endgame = ((7.0 - center_distance(king)) * 12.0) as i32;
        let midgame = (7 - corner_distance(king)) * 10 - (center_distance(king) * 6.0) as i32;
        bonus += (phase * endgame as f64 + (1.0 - phase) * midgame as f64) as i32;
    }

    for sq in board.pawns() & ours {
        let f = sq.file() as i32 as f64;
        bonus += relative_rank(sq, color) * 6;
        bonus += ((3.5 - (f - 3.5).abs()) * 2.0) as i32;
    }

    for (pieces, weight) in [
        (board.knights(), 10.0),
        (board.bishops(), 6.0),
        (board.queens(), 2.0),
    ] {
        for sq in pieces & ours {
            bonus += ((7.0 - center_distance(sq)) * weight) as i32;
        }
    }

    let own_pawns = board.pawns() & ours;
    let enemy_pawns = board.pawns() & board.by_color(color.other());
    for sq in board.rooks() & ours {
        let file = sq.file() as i32;
        let own = has_pawn_on_file(own_pawns, file);
        let enemy = has_pawn_on_file(enemy_pawns, file);
        if !own && !enemy {
            bonus += 18;
        } else if !own {
            bonus += 10;
        }
        if relative_rank(sq, color) == 6 {
            bonus += 12;
        }
    }

    if (board.bishops() & ours).count() >= 2 {
        bonus += 18;
    }

    bonus
}

/// Scores `pos` for the side to move. Checkmate is `-MATE_SCORE`; stalemate
/// and dead positions are zero.
pub fn evaluate(pos: &Chess) -> i32 {
    let moves = pos.legal_moves();
    if moves.is_empty() {
        return if pos.is_check() { -MATE_SCORE } else { 0 };
    }
    if pos.is_insufficient_material() {
        return 0;
    }

    let board = pos.board();
    let us = pos.turn();
    let them = us.other();
    let phase = endgame_phase(board);

    let mut score = material(board, us) - material(board, them);
    score += positional_bonus(board, us, phase) - positional_bonus(board, them, phase);
    score += moves.len() as i32 * 2;
    if pos.is_check() {
        score -= 20;
    }
    score
}
