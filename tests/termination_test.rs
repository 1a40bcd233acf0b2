//! End-of-game rules evaluated after each committed move, and positions
//! with no legal move at decision time.

mod common;

use std::sync::Arc;

use arena::{EmbeddedMover, GameStore, SchedulerSettings, TerminationReason, TickStatus};
use chess_core::{GameResult, STARTPOS_FEN};
use common::*;

const FOOLS_MATE: &str = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";

fn knight_shuffle() -> (Arc<ScriptedMover>, Arc<ScriptedMover>) {
    (
        ScriptedMover::new(&["g1f3", "f3g1", "g1f3", "f3g1", "g1f3"]),
        ScriptedMover::new(&["g8f6", "f6g8", "g8f6", "f6g8", "g8f6"]),
    )
}

#[tokio::test]
async fn test_threefold_repetition_counts_start_position() {
    let (white, black) = knight_shuffle();
    let s = scheduler(white, black);
    let (id, mut now) = start_game(&s, STARTPOS_FEN).await;

    let last = play_out(&s, id, &mut now, 20).await;
    assert_eq!(last.status, TickStatus::Finished(TerminationReason::Repetition));
    assert!(last.advanced);

    // the start position recurs after plies 4 and 8
    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.ply_count, 8);
    assert_eq!(game.result, Some(GameResult::Draw));

    let record = s.store().match_record(id).await.unwrap().unwrap();
    assert_eq!(record.termination_reason, TerminationReason::Repetition);
    assert_eq!(record.move_interval_ms, INTERVAL_MS);
}

#[tokio::test]
async fn test_ply_cap_wins_over_other_rules() {
    let (white, black) = knight_shuffle();
    let settings = SchedulerSettings {
        max_plies: 4,
        ..SchedulerSettings::default()
    };
    let s = scheduler_with(white, black, settings);
    let (id, mut now) = start_game(&s, STARTPOS_FEN).await;

    let last = play_out(&s, id, &mut now, 20).await;
    assert_eq!(last.status, TickStatus::Finished(TerminationReason::MaxPlies));
    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.ply_count, 4);
    assert_eq!(game.result, Some(GameResult::Draw));
}

#[tokio::test]
async fn test_fifty_move_rule_at_hundred_half_moves() {
    let s = scheduler(ScriptedMover::new(&["a2a3"]), ScriptedMover::new(&[]));
    let (id, mut now) = start_game(&s, "8/8/8/4k3/8/8/R7/4K3 w - - 99 80").await;

    let outcome = play_ply(&s, id, &mut now).await;
    assert_eq!(outcome.status, TickStatus::Finished(TerminationReason::FiftyMove));
    assert!(outcome.advanced);
}

#[tokio::test]
async fn test_ninety_nine_half_moves_keeps_playing() {
    let s = scheduler(
        ScriptedMover::new(&["a2a3"]),
        ScriptedMover::new(&["e5d5"]),
    );
    let (id, mut now) = start_game(&s, "8/8/8/4k3/8/8/R7/4K3 w - - 98 80").await;

    let first = play_ply(&s, id, &mut now).await;
    assert_eq!(first.status, TickStatus::Advanced);

    let second = play_ply(&s, id, &mut now).await;
    assert_eq!(second.status, TickStatus::Finished(TerminationReason::FiftyMove));
    assert_eq!(s.store().list_moves(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_bare_kings_are_insufficient() {
    // White is in check from the pawn and takes it
    let s = scheduler(ScriptedMover::new(&["e1d2"]), ScriptedMover::new(&[]));
    let (id, mut now) = start_game(&s, "4k3/8/8/8/8/8/3p4/4K3 w - - 0 1").await;

    let outcome = play_ply(&s, id, &mut now).await;
    assert_eq!(outcome.status, TickStatus::Finished(TerminationReason::Insufficient));
    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.result, Some(GameResult::Draw));
}

#[tokio::test]
async fn test_mate_by_committed_move() {
    let s = scheduler(
        ScriptedMover::new(&["f2f3", "g2g4"]),
        ScriptedMover::new(&["e7e5", "d8h4"]),
    );
    let (id, mut now) = start_game(&s, STARTPOS_FEN).await;

    let last = play_out(&s, id, &mut now, 10).await;
    assert_eq!(last.status, TickStatus::Finished(TerminationReason::Checkmate));
    assert!(last.advanced);

    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.result, Some(GameResult::BlackWins));
    assert_eq!(game.ply_count, 4);
    let moves = s.store().list_moves(id).await.unwrap();
    assert!(moves[3].is_check);
    assert_eq!(moves[3].fen_after, FOOLS_MATE);
}

#[tokio::test]
async fn test_no_legal_move_in_check_is_checkmate() {
    let s = scheduler(Arc::new(EmbeddedMover), Arc::new(EmbeddedMover));
    let (id, t0) = start_game(&s, FOOLS_MATE).await;

    let outcome = s.tick_at(id, t0).await.unwrap();
    assert_eq!(outcome.status, TickStatus::Finished(TerminationReason::Checkmate));
    assert!(!outcome.advanced);
    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.result, Some(GameResult::BlackWins));
}

#[tokio::test]
async fn test_no_legal_move_out_of_check_is_stalemate() {
    let s = scheduler(Arc::new(EmbeddedMover), Arc::new(EmbeddedMover));
    let (id, t0) = start_game(&s, "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").await;

    let outcome = s.tick_at(id, t0).await.unwrap();
    assert_eq!(outcome.status, TickStatus::Finished(TerminationReason::Stalemate));
    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.result, Some(GameResult::Draw));
    assert!(s.store().list_moves(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unplayable_stored_position_is_unknown_draw() {
    let s = embedded_scheduler();
    let (id, t0) = start_game(&s, STARTPOS_FEN).await;

    // side-to-move field is fine, the board has no kings
    let mut game = s.store().load_game(id).await.unwrap().unwrap();
    game.fen = "8/8/8/8/8/8/8/8 w - - 0 1".into();
    s.store().save_game(&game).await.unwrap();

    let outcome = s.tick_at(id, t0).await.unwrap();
    assert_eq!(outcome.status, TickStatus::Finished(TerminationReason::Unknown));
    assert!(!outcome.advanced);

    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.result, Some(GameResult::Draw));
    let record = s.store().match_record(id).await.unwrap().unwrap();
    assert_eq!(record.termination_reason, TerminationReason::Unknown);
}

#[tokio::test]
async fn test_mover_rejecting_position_is_unknown_draw() {
    let s = scheduler(Arc::new(RejectingMover), Arc::new(EmbeddedMover));
    let (id, t0) = start_game(&s, STARTPOS_FEN).await;

    let outcome = s.tick_at(id, t0).await.unwrap();
    assert_eq!(outcome.status, TickStatus::Finished(TerminationReason::Unknown));
    let game = s.store().load_game(id).await.unwrap().unwrap();
    assert_eq!(game.result, Some(GameResult::Draw));
}
