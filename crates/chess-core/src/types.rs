//! Value types shared by the search engine and the arena scheduler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fen::FenError;

/// One of the two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// The side-to-move letter used in position text.
    pub fn fen_char(self) -> char {
        match self {
            Side::White => 'w',
            Side::Black => 'b',
        }
    }

    pub fn from_fen_field(field: &str) -> Result<Side, FenError> {
        match field {
            "w" => Ok(Side::White),
            "b" => Ok(Side::Black),
            other => Err(FenError::SideToMove(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }

    /// The result recorded when this side wins.
    pub fn wins(self) -> GameResult {
        match self {
            Side::White => GameResult::WhiteWins,
            Side::Black => GameResult::BlackWins,
        }
    }
}

impl From<shakmaty::Color> for Side {
    fn from(color: shakmaty::Color) -> Self {
        match color {
            shakmaty::Color::White => Side::White,
            shakmaty::Color::Black => Side::Black,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" | "w" => Ok(Side::White),
            "black" | "b" => Ok(Side::Black),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// Final score of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    #[serde(rename = "1-0")]
    WhiteWins,
    #[serde(rename = "0-1")]
    BlackWins,
    #[serde(rename = "1/2-1/2")]
    Draw,
}

impl GameResult {
    pub fn as_str(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1-0" => Ok(GameResult::WhiteWins),
            "0-1" => Ok(GameResult::BlackWins),
            "1/2-1/2" => Ok(GameResult::Draw),
            other => Err(format!("unknown result '{other}'")),
        }
    }
}

/// How a mover's strength value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthMode {
    /// Skill level 1..=20
    SkillLevel,
    /// Target rating 800..=3200
    TargetRating,
}

impl StrengthMode {
    pub fn range(self) -> (u32, u32) {
        match self {
            StrengthMode::SkillLevel => (1, 20),
            StrengthMode::TargetRating => (800, 3200),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrengthMode::SkillLevel => "skill_level",
            StrengthMode::TargetRating => "target_rating",
        }
    }
}

impl fmt::Display for StrengthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrengthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skill_level" => Ok(StrengthMode::SkillLevel),
            "target_rating" => Ok(StrengthMode::TargetRating),
            other => Err(format!("unknown strength mode '{other}'")),
        }
    }
}

/// A strength setting whose value is known to be inside its mode's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strength {
    mode: StrengthMode,
    value: u32,
}

impl Strength {
    /// Validates `value` against the mode's range.
    pub fn new(mode: StrengthMode, value: u32) -> Result<Self, String> {
        let (min, max) = mode.range();
        if value < min || value > max {
            return Err(format!(
                "{mode} value {value} outside {min}..={max}"
            ));
        }
        Ok(Self { mode, value })
    }

    /// Clamps `value` into the mode's range.
    pub fn clamped(mode: StrengthMode, value: u32) -> Self {
        let (min, max) = mode.range();
        Self {
            mode,
            value: value.clamp(min, max),
        }
    }

    pub fn skill(level: u32) -> Self {
        Self::clamped(StrengthMode::SkillLevel, level)
    }

    pub fn rating(elo: u32) -> Self {
        Self::clamped(StrengthMode::TargetRating, elo)
    }

    pub fn mode(&self) -> StrengthMode {
        self.mode
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}
