//! Mapping from a mover's strength setting to search depth and root noise.

use chess_core::{Strength, StrengthMode};

pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 7;

/// Target search depth for a strength and per-move budget.
pub fn depth_for(strength: Strength, movetime_ms: u32) -> u8 {
    let v = strength.value();
    let base: u8 = match strength.mode() {
        StrengthMode::SkillLevel => match v {
            0..=3 => 1,
            4..=6 => 2,
            7..=10 => 3,
            11..=14 => 4,
            15..=17 => 5,
            _ => 6,
        },
        StrengthMode::TargetRating => match v {
            0..=1099 => 2,
            1100..=1499 => 3,
            1500..=1899 => 4,
            1900..=2299 => 5,
            _ => 6,
        },
    };

    let mut depth = base;
    if movetime_ms >= 500 {
        depth += 1;
    }
    if movetime_ms >= 1000 {
        depth += 1;
    }
    depth.clamp(MIN_DEPTH, MAX_DEPTH)
}

/// Half-width in centipawns of the uniform noise added to root scores.
/// Only low skill levels are weakened this way.
pub fn noise_for(strength: Strength) -> i32 {
    match strength.mode() {
        StrengthMode::SkillLevel => match strength.value() {
            0..=6 => 70,
            7..=10 => 30,
            _ => 0,
        },
        StrengthMode::TargetRating => 0,
    }
}
