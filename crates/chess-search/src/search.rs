//! Iterative-deepening negamax with alpha-beta pruning and a capture-only
//! quiescence search, bounded by a wall-clock deadline.

use std::time::{Duration, Instant};

use chess_core::Strength;
use rand::Rng;
use shakmaty::{CastlingMode, Chess, Move, Position};
use tracing::debug;

use crate::eval::{evaluate, MATE_SCORE};
use crate::ordering::{order_moves, promote_to_front};
use crate::strength::{depth_for, noise_for, MAX_DEPTH, MIN_DEPTH};

/// Floor applied to tiny budgets before the safety margin.
const MIN_BUDGET: Duration = Duration::from_millis(20);
/// Fraction of the budget the search may use.
const SAFETY_MARGIN: f64 = 0.92;
/// Nodes between deadline checks.
const TIME_CHECK_MASK: u64 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub depth: u8,
    pub movetime: Duration,
    /// Half-width of the uniform noise added to root scores, in centipawns.
    pub noise_cp: i32,
}

impl SearchParams {
    pub fn new(depth: u8, movetime_ms: u32) -> Self {
        Self {
            depth: depth.clamp(MIN_DEPTH, MAX_DEPTH),
            movetime: Duration::from_millis(u64::from(movetime_ms)),
            noise_cp: 0,
        }
    }

    pub fn from_strength(strength: Strength, movetime_ms: u32) -> Self {
        Self {
            noise_cp: noise_for(strength),
            ..Self::new(depth_for(strength, movetime_ms), movetime_ms)
        }
    }

    /// Same depth and budget with root noise disabled.
    pub fn deterministic(self) -> Self {
        Self {
            noise_cp: 0,
            ..self
        }
    }

    fn budget(&self) -> Duration {
        self.movetime.max(MIN_BUDGET).mul_f64(SAFETY_MARGIN)
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// `None` only when the position has no legal moves.
    pub best_move: Option<Move>,
    pub score: i32,
    /// Deepest iteration that finished before the deadline.
    pub depth_completed: u8,
    pub nodes: u64,
}

impl SearchOutcome {
    pub fn best_move_uci(&self) -> Option<String> {
        self.best_move
            .as_ref()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
    }
}

struct Searcher {
    deadline: Instant,
    aborted: bool,
    nodes: u64,
}

impl Searcher {
    fn out_of_time(&mut self) -> bool {
        if !self.aborted && (self.nodes & TIME_CHECK_MASK == 0) && Instant::now() >= self.deadline
        {
            self.aborted = true;
        }
        self.aborted
    }

    fn negamax(&mut self, pos: &Chess, depth: u8, mut alpha: i32, beta: i32, ply: i32) -> i32 {
        if self.out_of_time() {
            return evaluate(pos);
        }

        let moves = pos.legal_moves();
        if moves.is_empty() {
            return if pos.is_check() { -MATE_SCORE + ply } else { 0 };
        }
        if depth == 0 {
            return self.quiesce(pos, alpha, beta);
        }

        let mut best = -MATE_SCORE;
        for mv in order_moves(pos, moves) {
            if self.out_of_time() {
                break;
            }
            let mut child = pos.clone();
            child.play_unchecked(&mv);
            self.nodes += 1;

            let score = -self.negamax(&child, depth - 1, -beta, -alpha, ply + 1);
            if score > best {
                best = score;
            }
            if best > alpha {
                alpha = best;
            }
            if alpha >= beta {
                break;
            }
        }
        best
    }

    fn quiesce(&mut self, pos: &Chess, mut alpha: i32, beta: i32) -> i32 {
        let stand_pat = evaluate(pos);
        if self.out_of_time() {
            return stand_pat;
        }
        if stand_pat >= beta {
            return beta;
        }
        if stand_pat > alpha {
            alpha = stand_pat;
        }

        let mut captures = pos.legal_moves();
        captures.retain(|m| m.is_capture());
        for mv in order_moves(pos, captures) {
            if self.out_of_time() {
                break;
            }
            let mut child = pos.clone();
            child.play_unchecked(&mv);
            self.nodes += 1;

            let score = -self.quiesce(&child, -beta, -alpha);
            if score >= beta {
                return beta;
            }
            if score > alpha {
                alpha = score;
            }
        }
        alpha
    }
}

/// Picks a move for the side to move in `pos`.
pub fn search(pos: &Chess, params: &SearchParams) -> SearchOutcome {
    let moves = pos.legal_moves();
    if moves.is_empty() {
        let score = if pos.is_check() { -MATE_SCORE } else { 0 };
        return SearchOutcome {
            best_move: None,
            score,
            depth_completed: 0,
            nodes: 0,
        };
    }

    let mut searcher = Searcher {
        deadline: Instant::now() + params.budget(),
        aborted: false,
        nodes: 0,
    };
    let mut rng = rand::thread_rng();

    let mut ordered = order_moves(pos, moves);
    let mut best_move = ordered[0].clone();
    let mut best_score = -MATE_SCORE;
    let mut depth_completed = 0;

    for depth in 1..=params.depth {
        if Instant::now() >= searcher.deadline {
            break;
        }

        let mut iter_best: Option<(Move, i32)> = None;
        for mv in &ordered {
            let mut child = pos.clone();
            child.play_unchecked(mv);
            searcher.nodes += 1;

            let mut score = -searcher.negamax(&child, depth - 1, -MATE_SCORE, MATE_SCORE, 1);
            if searcher.aborted {
                break;
            }
            if params.noise_cp > 0 {
                score += rng.gen_range(-params.noise_cp..=params.noise_cp);
            }
            if iter_best.as_ref().map_or(true, |(_, s)| score > *s) {
                iter_best = Some((mv.clone(), score));
            }
        }

        // A cut-off iteration only counts when nothing deeper finished yet.
        if searcher.aborted && depth_completed > 0 {
            break;
        }
        if let Some((mv, score)) = iter_best {
            best_move = mv;
            best_score = score;
        }
        if searcher.aborted {
            break;
        }
        depth_completed = depth;
        promote_to_front(&mut ordered, &best_move);
    }

    debug!(
        depth = depth_completed,
        nodes = searcher.nodes,
        score = best_score,
        "search finished"
    );

    SearchOutcome {
        best_move: Some(best_move),
        score: best_score,
        depth_completed,
        nodes: searcher.nodes,
    }
}
