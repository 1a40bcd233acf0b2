//! UCI front end for the embedded search.
//!
//! Speaks enough of the protocol for the arena's engine client: the
//! handshake, strength options, `position`, `go movetime` and the `d`
//! diagnostic dump.

use std::io::{self, BufRead, Write};

use chess_core::{ChessPosition, Strength, StrengthMode};
use tracing::{debug, warn};

const DEFAULT_MOVETIME_MS: u32 = 150;

struct EngineState {
    position: ChessPosition,
    skill: u32,
    limit_strength: bool,
    elo: u32,
}

impl EngineState {
    fn new() -> Self {
        Self {
            position: ChessPosition::startpos(),
            skill: 20,
            limit_strength: false,
            elo: 1500,
        }
    }

    fn strength(&self) -> Strength {
        if self.limit_strength {
            Strength::clamped(StrengthMode::TargetRating, self.elo)
        } else {
            Strength::clamped(StrengthMode::SkillLevel, self.skill)
        }
    }

    fn set_option(&mut self, args: &str) {
        // "name <Name words> value <v>"
        let Some(rest) = args.trim().strip_prefix("name ") else {
            warn!(args, "setoption without name");
            return;
        };
        let (name, value) = match rest.split_once(" value ") {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (rest.trim(), ""),
        };
        match name.to_ascii_lowercase().as_str() {
            "skill level" => {
                if let Ok(v) = value.parse() {
                    self.skill = v;
                }
            }
            "uci_limitstrength" => self.limit_strength = value.eq_ignore_ascii_case("true"),
            "uci_elo" => {
                if let Ok(v) = value.parse() {
                    self.elo = v;
                }
            }
            _ => debug!(name, value, "Ignoring option"),
        }
    }

    fn set_position(&mut self, args: &str) {
        let mut tokens = args.split_whitespace();
        let base = match tokens.next() {
            Some("startpos") => ChessPosition::startpos(),
            Some("fen") => {
                let fen: Vec<&str> = tokens.by_ref().take_while(|t| *t != "moves").collect();
                match ChessPosition::parse(&fen.join(" ")) {
                    Ok(pos) => pos,
                    Err(e) => {
                        warn!(error = %e, "Bad position, keeping the current one");
                        return;
                    }
                }
            }
            _ => {
                warn!(args, "Unknown position command");
                return;
            }
        };

        let mut pos = base;
        for uci in tokens.filter(|t| *t != "moves") {
            match pos.apply_uci(uci) {
                Ok(next) => pos = next,
                Err(e) => {
                    // Later moves depend on this one, so stop here
                    debug!(uci, error = %e, "Illegal move in position command");
                    break;
                }
            }
        }
        self.position = pos;
    }

    fn go(&self, args: &str) -> String {
        let mut tokens = args.split_whitespace();
        let mut movetime = DEFAULT_MOVETIME_MS;
        while let Some(token) = tokens.next() {
            if token == "movetime" {
                if let Some(ms) = tokens.next().and_then(|v| v.parse().ok()) {
                    movetime = ms;
                }
            }
        }

        let params = chess_search::SearchParams::from_strength(self.strength(), movetime);
        let outcome = chess_search::search(self.position.chess(), &params);
        debug!(
            depth = outcome.depth_completed,
            nodes = outcome.nodes,
            score = outcome.score,
            "Search finished"
        );
        match outcome.best_move_uci() {
            Some(uci) => format!("bestmove {uci}"),
            None => "bestmove (none)".to_string(),
        }
    }

    fn display(&self) -> Vec<String> {
        vec![
            format!("Fen: {}", self.position.to_fen()),
            format!("Key: {}", self.position.position_key()),
            format!("Checkers: {}", self.position.checkers()),
        ]
    }
}

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let mut state = EngineState::new();
    let stdin = io::stdin();
    let mut out = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        let (cmd, args) = line.split_once(' ').unwrap_or((line, ""));

        match cmd {
            "uci" => {
                writeln!(out, "id name arena-uci")?;
                writeln!(out, "id author arena")?;
                writeln!(out, "option name Skill Level type spin default 20 min 1 max 20")?;
                writeln!(out, "option name UCI_LimitStrength type check default false")?;
                writeln!(out, "option name UCI_Elo type spin default 1500 min 800 max 3200")?;
                writeln!(out, "uciok")?;
            }
            "isready" => writeln!(out, "readyok")?,
            "setoption" => state.set_option(args),
            "ucinewgame" => state.position = ChessPosition::startpos(),
            "position" => state.set_position(args),
            "go" => writeln!(out, "{}", state.go(args))?,
            "d" => {
                for l in state.display() {
                    writeln!(out, "{l}")?;
                }
            }
            "quit" => break,
            "" => {}
            other => debug!(cmd = other, "Unknown command"),
        }
        out.flush()?;
    }

    Ok(())
}
