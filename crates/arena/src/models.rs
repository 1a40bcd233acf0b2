//! Persisted arena entities: games, mover configs, move and match records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chess_core::{GameResult, Side, Strength, STARTPOS_FEN};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type GameId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Configured,
    Running,
    Paused,
    Finished,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Configured => "configured",
            GameStatus::Running => "running",
            GameStatus::Paused => "paused",
            GameStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "configured" => Ok(GameStatus::Configured),
            "running" => Ok(GameStatus::Running),
            "paused" => Ok(GameStatus::Paused),
            "finished" => Ok(GameStatus::Finished),
            other => Err(format!("unknown game status '{other}'")),
        }
    }
}

/// Why a game finished. Exactly one reason is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Checkmate,
    Stalemate,
    Repetition,
    FiftyMove,
    Insufficient,
    Forfeit,
    MaxPlies,
    Unknown,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Checkmate => "checkmate",
            TerminationReason::Stalemate => "stalemate",
            TerminationReason::Repetition => "repetition",
            TerminationReason::FiftyMove => "fifty_move",
            TerminationReason::Insufficient => "insufficient",
            TerminationReason::Forfeit => "forfeit",
            TerminationReason::MaxPlies => "max_plies",
            TerminationReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkmate" => Ok(TerminationReason::Checkmate),
            "stalemate" => Ok(TerminationReason::Stalemate),
            "repetition" => Ok(TerminationReason::Repetition),
            "fifty_move" => Ok(TerminationReason::FiftyMove),
            "insufficient" => Ok(TerminationReason::Insufficient),
            "forfeit" => Ok(TerminationReason::Forfeit),
            "max_plies" => Ok(TerminationReason::MaxPlies),
            "unknown" => Ok(TerminationReason::Unknown),
            other => Err(format!("unknown termination reason '{other}'")),
        }
    }
}

/// Who picks the moves for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoverKind {
    ExternalEngine,
    EmbeddedSearch,
    Human,
}

impl MoverKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MoverKind::ExternalEngine => "external_engine",
            MoverKind::EmbeddedSearch => "embedded_search",
            MoverKind::Human => "human",
        }
    }
}

impl fmt::Display for MoverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external_engine" | "external" => Ok(MoverKind::ExternalEngine),
            "embedded_search" | "embedded" => Ok(MoverKind::EmbeddedSearch),
            "human" => Ok(MoverKind::Human),
            other => Err(format!("unknown mover kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoverConfig {
    pub side: Side,
    pub kind: MoverKind,
    pub strength: Strength,
    pub movetime_ms: u32,
    /// Extra engine options, only sent to external engines.
    #[serde(default)]
    pub engine_options: BTreeMap<String, String>,
}

impl MoverConfig {
    /// The config created for a side that has none yet.
    pub fn default_for(side: Side, movetime_ms: u32) -> Self {
        let kind = match side {
            Side::White => MoverKind::EmbeddedSearch,
            Side::Black => MoverKind::ExternalEngine,
        };
        Self::new(side, kind, Strength::skill(10), movetime_ms)
    }

    pub fn new(side: Side, kind: MoverKind, strength: Strength, movetime_ms: u32) -> Self {
        Self {
            side,
            kind,
            strength,
            movetime_ms,
            engine_options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.engine_options.insert(name.into(), value.into());
        self
    }
}

/// A chosen move shown during the preview window before it is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMove {
    pub uci: String,
    pub set_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub status: GameStatus,
    pub fen: String,
    pub side_to_move: Side,
    pub ply_count: u32,
    pub move_interval_ms: u32,
    pub preview_ms: u32,
    pub next_action_at: Option<DateTime<Utc>>,
    pub last_move: Option<String>,
    pub pending: Option<PendingMove>,
    pub result: Option<GameResult>,
    pub termination_reason: Option<TerminationReason>,
    /// Repetition key of the starting position.
    pub initial_position_key: Option<String>,
    pub tick_lock: bool,
    pub tick_lock_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn is_running(&self) -> bool {
        self.status == GameStatus::Running
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Pause between a commit and the next decision: the interval minus the
    /// preview, never negative.
    pub fn decision_gap(&self) -> Duration {
        Duration::milliseconds(i64::from(
            self.move_interval_ms.saturating_sub(self.preview_ms),
        ))
    }

    /// True once the pending move has been shown for the full preview.
    pub fn preview_elapsed(&self, now: DateTime<Utc>) -> bool {
        match &self.pending {
            Some(p) => now >= p.set_at + Duration::milliseconds(i64::from(self.preview_ms)),
            None => true,
        }
    }

    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = GameStatus::Running;
        self.started_at.get_or_insert(now);
        self.next_action_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_paused(&mut self, now: DateTime<Utc>) {
        self.status = GameStatus::Paused;
        self.clear_pending();
        self.updated_at = now;
    }

    pub fn mark_finished(
        &mut self,
        result: GameResult,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) {
        self.status = GameStatus::Finished;
        self.clear_pending();
        self.result = Some(result);
        self.termination_reason = Some(reason);
        self.next_action_at = None;
        self.finished_at = Some(now);
        self.updated_at = now;
    }
}

/// Parameters for a new game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGame {
    pub fen: String,
    pub move_interval_ms: u32,
    pub preview_ms: u32,
}

impl NewGame {
    pub fn standard(move_interval_ms: u32, preview_ms: u32) -> Self {
        Self {
            fen: STARTPOS_FEN.to_string(),
            move_interval_ms,
            preview_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub game_id: GameId,
    /// 1-based, contiguous per game.
    pub ply_index: u32,
    pub uci: String,
    pub fen_after: String,
    pub position_key_after: String,
    pub is_check: bool,
    pub created_at: DateTime<Utc>,
}

/// Summary written once when a game finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub game_id: GameId,
    pub result: GameResult,
    pub termination_reason: TerminationReason,
    pub white_strength: Strength,
    pub black_strength: Strength,
    pub move_interval_ms: u32,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(now: DateTime<Utc>) -> Game {
        Game {
            id: 1,
            status: GameStatus::Configured,
            fen: STARTPOS_FEN.to_string(),
            side_to_move: Side::White,
            ply_count: 0,
            move_interval_ms: 500,
            preview_ms: 350,
            next_action_at: None,
            last_move: None,
            pending: None,
            result: None,
            termination_reason: None,
            initial_position_key: None,
            tick_lock: false,
            tick_lock_at: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_decision_gap_never_negative() {
        let mut g = game(Utc::now());
        assert_eq!(g.decision_gap(), Duration::milliseconds(150));
        g.preview_ms = 900;
        assert_eq!(g.decision_gap(), Duration::zero());
    }

    #[test]
    fn test_leaving_running_clears_pending() {
        let now = Utc::now();
        let mut g = game(now);
        g.mark_started(now);
        g.pending = Some(PendingMove {
            uci: "e2e4".into(),
            set_at: now,
        });
        g.mark_paused(now);
        assert!(g.pending.is_none());

        g.mark_started(now + Duration::seconds(5));
        assert_eq!(g.started_at, Some(now));
        g.pending = Some(PendingMove {
            uci: "e2e4".into(),
            set_at: now,
        });
        g.mark_finished(GameResult::Draw, TerminationReason::MaxPlies, now);
        assert!(g.pending.is_none());
        assert_eq!(g.status, GameStatus::Finished);
    }

    #[test]
    fn test_preview_elapsed() {
        let now = Utc::now();
        let mut g = game(now);
        g.pending = Some(PendingMove {
            uci: "e2e4".into(),
            set_at: now,
        });
        assert!(!g.preview_elapsed(now + Duration::milliseconds(349)));
        assert!(g.preview_elapsed(now + Duration::milliseconds(350)));
    }

    #[test]
    fn test_enum_text_round_trip() {
        for reason in [
            TerminationReason::Checkmate,
            TerminationReason::FiftyMove,
            TerminationReason::MaxPlies,
        ] {
            assert_eq!(reason.as_str().parse::<TerminationReason>().unwrap(), reason);
        }
        assert_eq!("external".parse::<MoverKind>().unwrap(), MoverKind::ExternalEngine);
        assert!("robot".parse::<MoverKind>().is_err());
    }

    #[test]
    fn test_default_movers() {
        let white = MoverConfig::default_for(Side::White, 150);
        let black = MoverConfig::default_for(Side::Black, 150);
        assert_eq!(white.kind, MoverKind::EmbeddedSearch);
        assert_eq!(black.kind, MoverKind::ExternalEngine);
        assert_eq!(white.strength, Strength::skill(10));
    }
}
